//! Gateway: HTTP API in front of the inference service.
//!
//! Authenticates callers with a session cookie, relays chat turns upstream as a stream,
//! serves stored chats and the chat list, and collects bug reports.

mod auth;
mod bug_report;
pub mod protocol;
mod relay;
mod server;
mod store;

pub use auth::{cookie_value, mint_token, verify_token, AuthError, AuthUser, Claims};
pub use bug_report::append_report;
pub use server::{router, run_gateway, GatewayState};
pub use store::{
    ChatExchange, ChatStore, JsonChatStore, SavedChat, StoreError, UserChats, UserRecord,
    DEFAULT_USER,
};
