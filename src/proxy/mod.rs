//! HTTP proxy server

mod handler;
pub mod server;
mod streaming;

pub use handler::ProxyHandler;
pub use server::{run_server, ProxyState};
