// src/lib.rs

// Import the top-level `pantheon` module.
pub mod pantheon;

// Re-exporting key items for easier external access.
pub use pantheon::{
    AgentCapability, Bus, Coordinator, DualStore, Gateway, Magic, PantheonConfig, PantheonDriver,
    PantheonError, Result,
};
