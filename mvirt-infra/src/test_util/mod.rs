//! Test utilities: an in-memory cloud and in-memory scopes.
//!
//! Also backs the `simulate` command of the binary.

pub mod cloud;
pub mod scope;

pub use cloud::{FakeCall, FakeCloud, RecordedCall, Simulated};
pub use scope::{MachinePoolStatus, MemoryAgentPoolScope, MemoryVmExtensionScope};
