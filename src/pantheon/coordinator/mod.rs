//! Swarm Coordinator: per-task budget, permission gate, and blackboard.

pub mod blackboard;
pub mod budget;
pub mod permissions;

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

pub use blackboard::Blackboard;
pub use budget::{Budget, BudgetStatus};
pub use permissions::{AuditEntry, Decision, PermissionEvaluator};

use crate::pantheon::error::PantheonError;

/// Where a task sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Open,
    Active,
    Closed,
}

/// A summary emitted on `close_task`.
#[derive(Debug, Clone)]
pub struct TaskSummary {
    pub task_id: String,
    pub used: u64,
    pub status: BudgetStatus,
    pub granted: usize,
    pub denied: usize,
    pub blackboard_keys: usize,
    pub duration: std::time::Duration,
}

/// One task's coordinator-side state: budget, permission evaluator, blackboard, and lifecycle.
struct TaskContext {
    state: TaskState,
    budget: Budget,
    permissions: PermissionEvaluator,
    blackboard: Blackboard,
    opened_at: DateTime<Utc>,
    /// Resource kinds this task was opened to touch. Declarative audit metadata — `evaluate`
    /// still scores every request against the trust/risk tables regardless of this list.
    required_permissions: Vec<String>,
}

/// The Swarm Coordinator: a directory of task contexts, each independently mutexed so unrelated
/// tasks never contend.
pub struct Coordinator {
    tasks: Mutex<HashMap<String, Mutex<TaskContext>>>,
}

impl Coordinator {
    pub fn new() -> Self {
        Coordinator { tasks: Mutex::new(HashMap::new()) }
    }

    /// Open a new task with the given token budget and the resource kinds it will need
    /// permission for. Re-opening an existing id replaces its state.
    pub fn open_task(&self, task_id: &str, budget_limit: u64, required_permissions: Vec<String>) {
        let task = TaskContext {
            state: TaskState::Open,
            budget: Budget::new(budget_limit),
            permissions: PermissionEvaluator::new(),
            blackboard: Blackboard::new(),
            opened_at: Utc::now(),
            required_permissions,
        };
        let mut tasks = self.tasks.lock().expect("coordinator lock poisoned");
        tasks.insert(task_id.to_string(), Mutex::new(task));
    }

    /// The resource kinds `task_id` was opened to touch.
    pub fn required_permissions(&self, task_id: &str) -> Result<Vec<String>, PantheonError> {
        self.with_task(task_id, |task| task.required_permissions.clone())
    }

    fn with_task<T>(&self, task_id: &str, f: impl FnOnce(&mut TaskContext) -> T) -> Result<T, PantheonError> {
        let tasks = self.tasks.lock().expect("coordinator lock poisoned");
        let task_lock = tasks
            .get(task_id)
            .ok_or_else(|| PantheonError::StoreUnavailable(format!("unknown task: {task_id}")))?;
        let mut task = task_lock.lock().expect("task lock poisoned");
        if task.state == TaskState::Open {
            task.state = TaskState::Active;
        }
        Ok(f(&mut task))
    }

    /// Debit `tokens` from `task_id`'s budget for `reason`.
    pub fn spend(&self, task_id: &str, tokens: u64, reason: &str) -> Result<BudgetStatus, PantheonError> {
        self.with_task(task_id, |task| task.budget.spend(tokens, reason, task_id))?
    }

    /// Current budget status for `task_id`, without spending.
    pub fn budget_status(&self, task_id: &str) -> Result<BudgetStatus, PantheonError> {
        self.with_task(task_id, |task| task.budget.status())
    }

    /// Configure a trust score used by subsequent `evaluate` calls on this task.
    pub fn set_trust(&self, task_id: &str, agent_id: &str, trust: f64) -> Result<(), PantheonError> {
        self.with_task(task_id, |task| task.permissions.set_trust(agent_id, trust))
    }

    /// Configure a risk score used by subsequent `evaluate` calls on this task.
    pub fn set_risk(&self, task_id: &str, resource_kind: &str, risk: f64) -> Result<(), PantheonError> {
        self.with_task(task_id, |task| task.permissions.set_risk(resource_kind, risk))
    }

    /// Evaluate a permission request against `task_id`'s trust/risk tables, appending the result
    /// to the task's audit log.
    pub fn evaluate(
        &self,
        task_id: &str,
        agent_id: &str,
        resource_kind: &str,
        justification: &str,
        scope: Option<&str>,
    ) -> Result<(Decision, f64, String), PantheonError> {
        self.with_task(task_id, |task| task.permissions.evaluate(agent_id, resource_kind, justification, scope))
    }

    /// Full audit log for `task_id`.
    pub fn audit_log(&self, task_id: &str) -> Result<Vec<AuditEntry>, PantheonError> {
        self.with_task(task_id, |task| task.permissions.audit_log().to_vec())
    }

    /// Write `value` under `key` on `task_id`'s blackboard.
    pub fn bb_write(&self, task_id: &str, key: &str, value: &str) -> Result<(), PantheonError> {
        self.with_task(task_id, |task| task.blackboard.write(key, value))?
    }

    /// Read `key` from `task_id`'s blackboard.
    pub fn bb_read(&self, task_id: &str, key: &str) -> Result<Option<String>, PantheonError> {
        self.with_task(task_id, |task| task.blackboard.read(key))
    }

    /// Freeze the blackboard and mark the task closed, returning a summary. Closing an
    /// already-closed task returns the same summary again (idempotent).
    pub fn close_task(&self, task_id: &str) -> Result<TaskSummary, PantheonError> {
        self.with_task(task_id, |task| {
            task.blackboard.freeze();
            task.state = TaskState::Closed;
            let (granted, denied) = task.permissions.grant_deny_counts();
            TaskSummary {
                task_id: task_id.to_string(),
                used: task.budget.used(),
                status: task.budget.status(),
                granted,
                denied,
                blackboard_keys: task.blackboard.key_count(),
                duration: (Utc::now() - task.opened_at)
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO),
            }
        })
    }

    /// Current lifecycle state of `task_id`.
    pub fn state(&self, task_id: &str) -> Result<TaskState, PantheonError> {
        self.with_task(task_id, |task| task.state)
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_d_budget_exhaustion() {
        let coordinator = Coordinator::new();
        coordinator.open_task("T1", 100, vec![]);
        coordinator.spend("T1", 60, "first").unwrap();
        coordinator.spend("T1", 40, "second").unwrap();

        let result = coordinator.spend("T1", 1, "extra");
        assert!(matches!(result, Err(PantheonError::BudgetExhausted { .. })));

        let summary = coordinator.close_task("T1").unwrap();
        assert_eq!(summary.used, 100);
        assert_eq!(summary.status, BudgetStatus::Exhausted);
    }

    #[test]
    fn scenario_e_permission_deny() {
        let coordinator = Coordinator::new();
        coordinator.open_task("T1", 1000, vec!["PAYMENTS".to_string()]);
        coordinator.set_trust("T1", "actor", 0.5).unwrap();
        coordinator.set_risk("T1", "PAYMENTS", 0.9).unwrap();

        let (decision, score, _) = coordinator.evaluate("T1", "actor", "PAYMENTS", "do it", None).unwrap();
        assert_eq!(decision, Decision::Deny);
        assert!(score < 0.5);

        let log = coordinator.audit_log("T1").unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn blackboard_rejects_unprefixed_keys_through_coordinator() {
        let coordinator = Coordinator::new();
        coordinator.open_task("T1", 100, vec![]);
        let result = coordinator.bb_write("T1", "global:x", "y");
        assert!(matches!(result, Err(PantheonError::ForbiddenKey(_))));
    }

    #[test]
    fn open_task_starts_open_and_transitions_to_active_on_first_touch() {
        let coordinator = Coordinator::new();
        coordinator.open_task("T1", 100, vec![]);
        assert_eq!(coordinator.state("T1").unwrap(), TaskState::Open);
        coordinator.spend("T1", 1, "touch").unwrap();
        assert_eq!(coordinator.state("T1").unwrap(), TaskState::Active);
    }

    #[test]
    fn close_task_freezes_blackboard() {
        let coordinator = Coordinator::new();
        coordinator.open_task("T1", 100, vec![]);
        coordinator.bb_write("T1", "task:T1:x", "1").unwrap();
        coordinator.close_task("T1").unwrap();
        let result = coordinator.bb_write("T1", "task:T1:x", "2");
        assert!(result.is_err());
    }

    #[test]
    fn required_permissions_are_retained_from_open_task() {
        let coordinator = Coordinator::new();
        coordinator.open_task("T1", 100, vec!["PAYMENTS".to_string(), "EMAIL".to_string()]);
        let required = coordinator.required_permissions("T1").unwrap();
        assert_eq!(required, vec!["PAYMENTS".to_string(), "EMAIL".to_string()]);
    }
}
