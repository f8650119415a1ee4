//! Domain model module declarations.

pub mod response;
pub mod upload;
