//! Process-level plumbing shared by the `wardrobe` binary.

pub mod logging;
