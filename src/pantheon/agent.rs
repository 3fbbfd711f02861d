//! Agent runtime skeleton: the `AgentCapability` contract and the fixed 9-step Pantheon driver
//! pipeline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::pantheon::bus::Bus;
use crate::pantheon::coordinator::Coordinator;
use crate::pantheon::error::PantheonError;
use crate::pantheon::gateway::Gateway;

/// Default per-step token debit when a Gateway call reports no usable usage figure.
const FALLBACK_TOKEN_ESTIMATE: u64 = 50;

/// Default wait for each step's Bus request-reply handshake.
const STEP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared handles every step needs: the task id (for budget/permissions/blackboard), the Bus,
/// and the Gateway.
pub struct StepContext {
    pub task_id: String,
    pub bus: Arc<Bus>,
    pub gateway: Arc<Gateway>,
    pub coordinator: Arc<Coordinator>,
}

/// One named stage of the driver pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    Observe,
    Reason,
    Act,
    Validate,
    Execute,
    Memory,
    Analyze,
    Learn,
    Improve,
}

impl Step {
    pub const PIPELINE: [Step; 9] = [
        Step::Observe,
        Step::Reason,
        Step::Act,
        Step::Validate,
        Step::Execute,
        Step::Memory,
        Step::Analyze,
        Step::Learn,
        Step::Improve,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Step::Observe => "observe",
            Step::Reason => "reason",
            Step::Act => "act",
            Step::Validate => "validate",
            Step::Execute => "execute",
            Step::Memory => "memory",
            Step::Analyze => "analyze",
            Step::Learn => "learn",
            Step::Improve => "improve",
        }
    }
}

/// A capability implementing one pipeline step: observe the input, optionally call the
/// Gateway, and produce the output payload that gets written to the blackboard and forwarded to
/// the next step.
#[async_trait]
pub trait AgentCapability: Send + Sync {
    /// Stable name this capability registers itself under on the Bus.
    fn name(&self) -> &str;

    /// Handle `input_message`, returning the output payload for this step. Implementations that
    /// call the Gateway should do so via `ctx.gateway` and return the provider's reply content
    /// (or a derived value) as the payload.
    async fn handle(&self, input_message: serde_json::Value, ctx: &StepContext) -> Result<serde_json::Value, PantheonError>;

    /// Token cost to debit against the task budget for this step's work. Defaults to the
    /// fallback estimate; override when a Gateway call's reported usage is available.
    fn token_cost(&self, _output: &serde_json::Value) -> u64 {
        FALLBACK_TOKEN_ESTIMATE
    }

    /// The resource kind this step needs permission for before it runs, if any. Capabilities
    /// that never touch a gated resource leave this `None` and skip evaluation entirely.
    fn required_permission(&self) -> Option<&str> {
        None
    }

    /// Justification passed to `Coordinator::evaluate` when `required_permission` is `Some`.
    /// Override to give the trust/risk scorer a real reason; the default is deliberately weak.
    fn permission_justification(&self) -> &str {
        ""
    }
}

/// A terminal failure raised by the driver, recording which step aborted the pipeline and why.
#[derive(Debug, Clone)]
pub struct PipelineFailure {
    pub task_id: String,
    pub step: Step,
    pub error: String,
}

/// Runs the fixed 9-step Observe→Reason→Act→Validate→Execute→Memory→Analyze→Learn→Improve
/// pipeline for one task, wiring each capability to the Bus, debiting the Coordinator's budget,
/// and writing each step's result to the blackboard under `agent:{name}:result`.
pub struct PantheonDriver {
    bus: Arc<Bus>,
    gateway: Arc<Gateway>,
    coordinator: Arc<Coordinator>,
    capabilities: Vec<Arc<dyn AgentCapability>>,
}

impl PantheonDriver {
    /// Build a driver with one capability per pipeline step, in `Step::PIPELINE` order.
    pub fn new(
        bus: Arc<Bus>,
        gateway: Arc<Gateway>,
        coordinator: Arc<Coordinator>,
        capabilities: [Arc<dyn AgentCapability>; 9],
    ) -> Self {
        PantheonDriver { bus, gateway, coordinator, capabilities: capabilities.into() }
    }

    /// Run every step in order for `task_id`, seeding the pipeline with `initial_input`.
    /// `required_permissions` is recorded on the task for audit purposes; each step still has its
    /// own request evaluated against the trust/risk tables regardless of this list.
    /// Returns the final step's output on success, or a [`PipelineFailure`] identifying which
    /// step aborted the task (the task is closed either way — including on a fatal permission
    /// denial).
    pub async fn run(
        &self,
        task_id: &str,
        budget_limit: u64,
        required_permissions: Vec<String>,
        initial_input: serde_json::Value,
    ) -> Result<serde_json::Value, PipelineFailure> {
        self.coordinator.open_task(task_id, budget_limit, required_permissions);

        let ctx = StepContext {
            task_id: task_id.to_string(),
            bus: self.bus.clone(),
            gateway: self.gateway.clone(),
            coordinator: self.coordinator.clone(),
        };

        let mut current_input = initial_input;

        for (step, capability) in Step::PIPELINE.iter().zip(self.capabilities.iter()) {
            match self.run_step(*step, capability.as_ref(), current_input, &ctx).await {
                Ok(output) => current_input = output,
                Err(err) => {
                    let _ = self.coordinator.close_task(task_id);
                    return Err(PipelineFailure { task_id: task_id.to_string(), step: *step, error: err.to_string() });
                }
            }
        }

        let _ = self.coordinator.close_task(task_id);
        Ok(current_input)
    }

    async fn run_step(
        &self,
        step: Step,
        capability: &dyn AgentCapability,
        input: serde_json::Value,
        ctx: &StepContext,
    ) -> Result<serde_json::Value, PantheonError> {
        if let Some(resource_kind) = capability.required_permission() {
            let (decision, score, _reason) = self.coordinator.evaluate(
                &ctx.task_id,
                capability.name(),
                resource_kind,
                capability.permission_justification(),
                None,
            )?;
            if decision == crate::pantheon::coordinator::Decision::Deny {
                return Err(PantheonError::PermissionDenied {
                    agent_id: capability.name().to_string(),
                    resource_kind: resource_kind.to_string(),
                    score,
                });
            }
        }

        let output = capability.handle(input, ctx).await?;

        let cost = capability.token_cost(&output);
        self.coordinator.spend(&ctx.task_id, cost, step.name())?;

        let key = format!("agent:{}:result", capability.name());
        self.coordinator.bb_write(&ctx.task_id, &key, &output.to_string())?;

        self.bus.broadcast(
            capability.name(),
            step.name(),
            output.clone(),
            crate::pantheon::bus::Priority::Normal,
        );

        Ok(output)
    }
}

/// Wait for a Bus reply addressed to `ctx.bus`'s caller within [`STEP_REQUEST_TIMEOUT`]; exposed
/// for capabilities that want request/reply semantics with a named peer instead of broadcast.
pub async fn request_from_peer(
    bus: &Bus,
    from: &str,
    to: &str,
    topic: &str,
    payload: serde_json::Value,
) -> Result<serde_json::Value, PantheonError> {
    let reply = bus.request(from, to, topic, payload, STEP_REQUEST_TIMEOUT).await?;
    Ok(reply.payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pantheon::dual_store::{DualStore, InMemoryPrimaryStore};
    use tempfile::tempdir;

    struct EchoCapability {
        name: String,
    }

    #[async_trait]
    impl AgentCapability for EchoCapability {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, input: serde_json::Value, _ctx: &StepContext) -> Result<serde_json::Value, PantheonError> {
            Ok(input)
        }

        fn token_cost(&self, _output: &serde_json::Value) -> u64 {
            1
        }
    }

    struct FailingCapability {
        name: String,
    }

    #[async_trait]
    impl AgentCapability for FailingCapability {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, _input: serde_json::Value, _ctx: &StepContext) -> Result<serde_json::Value, PantheonError> {
            Err(PantheonError::ProviderMalformed { provider: "test".to_string(), reason: "boom".to_string() })
        }
    }

    struct GatedCapability {
        name: String,
        resource_kind: String,
        justification: String,
    }

    #[async_trait]
    impl AgentCapability for GatedCapability {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, input: serde_json::Value, _ctx: &StepContext) -> Result<serde_json::Value, PantheonError> {
            Ok(input)
        }

        fn required_permission(&self) -> Option<&str> {
            Some(&self.resource_kind)
        }

        fn permission_justification(&self) -> &str {
            &self.justification
        }
    }

    fn build_driver(capabilities: [Arc<dyn AgentCapability>; 9]) -> (PantheonDriver, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conversations.jsonl");
        let store = DualStore::open(Box::new(InMemoryPrimaryStore::new()), path, 100).unwrap();
        let driver = PantheonDriver::new(
            Arc::new(Bus::new()),
            Arc::new(Gateway::new(store)),
            Arc::new(Coordinator::new()),
            capabilities,
        );
        (driver, dir)
    }

    fn echo_pipeline() -> [Arc<dyn AgentCapability>; 9] {
        Step::PIPELINE.map(|step| {
            Arc::new(EchoCapability { name: step.name().to_string() }) as Arc<dyn AgentCapability>
        })
    }

    #[tokio::test]
    async fn happy_path_runs_all_nine_steps_and_closes_the_task() {
        let (driver, _dir) = build_driver(echo_pipeline());
        let result = driver.run("T1", 1000, vec![], serde_json::json!({"n": 1})).await.unwrap();
        assert_eq!(result["n"], 1);
        assert_eq!(driver.coordinator.state("T1").unwrap(), crate::pantheon::coordinator::TaskState::Closed);
    }

    #[tokio::test]
    async fn failing_step_aborts_pipeline_and_closes_task() {
        let mut capabilities = echo_pipeline();
        capabilities[2] = Arc::new(FailingCapability { name: "act".to_string() });
        let (driver, _dir) = build_driver(capabilities);

        let result = driver.run("T1", 1000, vec![], serde_json::json!({"n": 1})).await;
        let failure = result.unwrap_err();
        assert_eq!(failure.step, Step::Act);
        assert_eq!(driver.coordinator.state("T1").unwrap(), crate::pantheon::coordinator::TaskState::Closed);
    }

    #[tokio::test]
    async fn each_step_writes_its_blackboard_entry() {
        let (driver, _dir) = build_driver(echo_pipeline());
        driver.run("T1", 1000, vec![], serde_json::json!({"n": 1})).await.unwrap();
        // close_task freezes the blackboard but reads still work afterward.
        let value = driver.coordinator.bb_read("T1", "agent:observe:result").unwrap();
        assert!(value.is_some());
    }

    #[tokio::test]
    async fn budget_exhaustion_mid_pipeline_aborts_with_typed_failure() {
        let (driver, _dir) = build_driver(echo_pipeline());
        // budget of 5 tokens covers exactly 5 steps at 1 token each; the 6th step (Memory) aborts.
        let result = driver.run("T1", 5, vec![], serde_json::json!({"n": 1})).await;
        let failure = result.unwrap_err();
        assert_eq!(failure.step, Step::Memory);
    }

    #[tokio::test]
    async fn denied_permission_aborts_pipeline_and_closes_task() {
        let mut capabilities = echo_pipeline();
        capabilities[2] = Arc::new(GatedCapability {
            name: "act".to_string(),
            resource_kind: "PAYMENTS".to_string(),
            justification: String::new(),
        });
        let (driver, _dir) = build_driver(capabilities);

        let result = driver.run("T1", 1000, vec!["PAYMENTS".to_string()], serde_json::json!({"n": 1})).await;
        let failure = result.unwrap_err();
        assert_eq!(failure.step, Step::Act);
        assert_eq!(driver.coordinator.state("T1").unwrap(), crate::pantheon::coordinator::TaskState::Closed);

        let log = driver.coordinator.audit_log("T1").unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].decision, crate::pantheon::coordinator::Decision::Deny);
    }

    #[tokio::test]
    async fn granted_permission_lets_the_step_through() {
        let mut capabilities = echo_pipeline();
        capabilities[2] = Arc::new(GatedCapability {
            name: "act".to_string(),
            resource_kind: "PAYMENTS".to_string(),
            justification: "because the refund is required to resolve the customer ticket".to_string(),
        });
        let (driver, _dir) = build_driver(capabilities);

        let result = driver.run("T1", 1000, vec!["PAYMENTS".to_string()], serde_json::json!({"n": 1})).await;
        assert!(result.is_ok());
    }
}
