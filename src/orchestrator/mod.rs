//! Process orchestration modules.
//!
//! Covers launching debugger-wrapped processes, the per-identity session
//! registry with its kill-and-replace protocol, and background reaping.

pub mod launcher;
pub mod reaper;
pub mod registry;
