//! Management API of the custody daemon, served over a Unix socket.

pub mod client;
pub mod dto;
pub mod error;
pub mod server;

pub const DEFAULT_UDS: &str = "/var/run/custody.sock";
