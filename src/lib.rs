//! `mailfwd` — forwards inbound mail stored in a blob bucket through an
//! authorized relay.
//!
//! The library parses the stored message, optionally moves its attachments
//! behind expiring links, rewrites the envelope headers so the relay may
//! send it, and files the original under an archive or error prefix.

pub mod config;
pub mod error;
pub mod export;
pub mod forward;
pub mod model;
pub mod parser;
pub mod relay;
pub mod store;
pub mod transform;
