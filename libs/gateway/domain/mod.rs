//! Domain Layer
//!
//! Wire-level gateway types. No I/O lives here.

pub mod envelope;
pub mod opcode;
pub mod payloads;

pub use envelope::Envelope;
pub use opcode::OpCode;
pub use payloads::{ConnectionProperties, CreateMessage, Hello, Identify, Ready, ReadyUser, Resume};
