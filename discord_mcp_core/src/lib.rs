pub mod connections;
pub mod core;

// re-export ergonomic entry points
pub use crate::core::agent_registry::{
    AgentHandle, AgentInfo, AgentRegistry, RegistryError, SendReceipt,
};
