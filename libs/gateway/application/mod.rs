//! Application Layer
//!
//! The gateway loop and REST helpers built on the session and transport.

pub mod gateway;
pub mod rest;

pub use gateway::Gateway;
pub use rest::RestClient;
