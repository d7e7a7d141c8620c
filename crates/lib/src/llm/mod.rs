//! Upstream inference service client.
//!
//! The assistant's reasoning runs in the external Becky AI service; this module only shapes
//! requests to it and hands back its responses.

mod becky;

pub use becky::{BeckyClient, BeckyError, UpstreamChat, UpstreamFile, DEFAULT_BASE_URL};
