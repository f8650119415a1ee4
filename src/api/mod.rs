//! HTTP surface: the upload handler and its server.

pub mod handler;
pub mod server;
