//! Input decoding: MIME tree parsing, charset decoding, and trigger events.

pub mod charset;
pub mod event;
pub mod mime;
