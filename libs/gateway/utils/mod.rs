//! Common utilities for gateway binaries

mod shutdown;

pub use shutdown::ShutdownManager;
