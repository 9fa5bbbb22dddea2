//! Muse - Main Library
//!
//! ## Architecture
//!
//! - **bin_common**: Common utilities for binary executables (CLI, runners)
//! - **muse_gateway**: Gateway protocol, configuration, shutdown (re-exported from workspace)
//! - **muse_transport**: Reactor, HTTP/WebSocket engine, request lifecycle (re-exported from workspace)
//!
//! ## Usage in Binaries
//!
//! ```rust
//! use muse::bin_common::{load_config_from_env, ConfigType};
//! use muse::muse_gateway::{Gateway, GatewayConfig};
//! ```

// Re-export workspace libraries for convenience
pub use muse_gateway;
pub use muse_transport;

// Binary common utilities
pub mod bin_common {
    //! Common utilities for binary executables

    pub mod cli;
    pub mod runner;

    pub use cli::{config_path_from_args, load_config_from_env, parse_args, ConfigType};
    pub use runner::{BinaryRunner, RunConfig};
}
