//! Message transformation: classify leaves, relocate attachments, rebuild
//! the body, rewrite envelope headers, and build failure notices.

pub mod classify;
pub mod html;
pub mod notice;
pub mod rebuild;
pub mod relocate;
pub mod rewrite;
