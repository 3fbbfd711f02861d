//! Core of the Pantheon multi-agent orchestration framework: an in-process message bus, an AI
//! provider gateway, a resilience layer (circuit breakers + Magic), and a swarm coordinator.

pub mod agent;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod dual_store;
pub mod error;
pub mod gateway;
pub mod rate_limiter;
pub mod resilience;
pub mod telemetry;

pub use agent::{AgentCapability, PantheonDriver, PipelineFailure, Step, StepContext};
pub use bus::{Bus, Message, Priority};
pub use config::PantheonConfig;
pub use coordinator::{Coordinator, TaskState, TaskSummary};
pub use dual_store::{ConversationRecord, DualStore, PrimaryStore};
pub use error::{PantheonError, Result};
pub use gateway::{Gateway, ProviderConnector, ProviderDescriptor, TokenAccounting};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use resilience::{BreakerSet, BreakerState, Magic};
pub use telemetry::{ComponentStats, Telemetry};
