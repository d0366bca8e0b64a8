mod connection;
mod dispatch;
mod server;

pub use connection::{ConnState, Connection, Socket};
pub use dispatch::dispatch;
pub use server::{Server, ServerConfig, Transport};
