//! Per-kind resource services.

pub mod agentpools;
pub mod vmextensions;
