//! Core data model types: the MIME tree, classified parts, links, and addresses.

pub mod address;
pub mod node;
pub mod part;
