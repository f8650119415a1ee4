//! Authenticated transport shared by the server and the client.

pub mod psk;
