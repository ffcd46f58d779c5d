//! Storage and persistence domain for the outfit tracker.

pub mod adapter;
pub mod data_manager;
pub mod document;
pub mod migration;
