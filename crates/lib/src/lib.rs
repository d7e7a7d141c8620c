//! Becky core library: the chat gateway (relay, stored chats, auth) and the streaming chat
//! client core (frame decoder, session state machine, request builder) used by the CLI.

pub mod client;
pub mod config;
pub mod forms;
pub mod gateway;
pub mod init;
pub mod llm;
pub mod render;
pub mod router;
pub mod session;
pub mod stream;
