//! Message serialization.

pub mod eml;
