pub mod channel_log;
pub mod codec;
pub mod config;
pub mod handler;
pub mod message;
pub mod numeric;
pub mod server;
pub mod state;
pub mod tls;
