//! Shared types for the outfit tracker: slot values, text normalization, errors.

pub mod error;
pub mod slots;
pub mod text;

pub type CharacterId = String;
pub type InstanceId = String;
