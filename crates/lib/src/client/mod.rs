//! Chat client core: request building and the streamed turn loop.

mod chat;
mod request;

pub use chat::{ChatClient, ClientError, EffectSink};
pub use request::{OutboundFile, OutboundRequest, RequestError};
