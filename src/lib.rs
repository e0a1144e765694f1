pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod pathspace;
pub mod server;
pub mod session;
pub mod transport;
