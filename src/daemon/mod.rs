//! Daemon subsystem: event loop, per-tick dispatch, restart transitions and
//! shutdown signal handling.

pub mod dispatch;
pub mod loop_main;
pub mod restart;
pub mod signals;
