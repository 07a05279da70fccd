//! Guided workflow controller
//!
//! A small persistent state machine driving a change through a linear
//! phase sequence. Every phase ends at a wait point: progress suspends
//! until an external approval arrives. State is written through to
//! `.workflow-state.yaml` on every transition; absence of the file means
//! no workflow is running.

use crate::store::{ChangeStatus, Store, StoreError, WORKFLOW_STATE_FILE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// The guided workflow phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    /// Understand the problem and draft the proposal.
    Discovery,
    /// Shape deltas and tasks.
    Planning,
    /// Work through the task list.
    Execution,
    /// Strict validation of the change.
    Validation,
    /// Archive and merge.
    Lifecycle,
}

impl WorkflowPhase {
    /// All phases in order.
    pub fn all() -> &'static [WorkflowPhase] {
        &[
            WorkflowPhase::Discovery,
            WorkflowPhase::Planning,
            WorkflowPhase::Execution,
            WorkflowPhase::Validation,
            WorkflowPhase::Lifecycle,
        ]
    }

    /// The next phase, if any.
    pub fn next(&self) -> Option<WorkflowPhase> {
        match self {
            WorkflowPhase::Discovery => Some(WorkflowPhase::Planning),
            WorkflowPhase::Planning => Some(WorkflowPhase::Execution),
            WorkflowPhase::Execution => Some(WorkflowPhase::Validation),
            WorkflowPhase::Validation => Some(WorkflowPhase::Lifecycle),
            WorkflowPhase::Lifecycle => None,
        }
    }

    /// 0-based position in the sequence.
    pub fn index(&self) -> usize {
        match self {
            WorkflowPhase::Discovery => 0,
            WorkflowPhase::Planning => 1,
            WorkflowPhase::Execution => 2,
            WorkflowPhase::Validation => 3,
            WorkflowPhase::Lifecycle => 4,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            WorkflowPhase::Discovery => "Discovery",
            WorkflowPhase::Planning => "Planning",
            WorkflowPhase::Execution => "Execution",
            WorkflowPhase::Validation => "Validation",
            WorkflowPhase::Lifecycle => "Lifecycle",
        }
    }
}

impl Default for WorkflowPhase {
    fn default() -> Self {
        WorkflowPhase::Discovery
    }
}

/// Whether a workflow is live or terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Cancelled,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Persisted workflow state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub change_id: String,
    pub current_phase: WorkflowPhase,
    /// The phase currently gated on an approval, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_point: Option<WorkflowPhase>,
    /// Phases approved so far, in approval order.
    #[serde(default)]
    pub approvals: Vec<WorkflowPhase>,
    #[serde(default = "default_status")]
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

fn default_status() -> WorkflowStatus {
    WorkflowStatus::Running
}

/// Point-in-time view returned by `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatusReport {
    pub change_id: String,
    pub current_phase: WorkflowPhase,
    pub phase_index: usize,
    pub phase_count: usize,
    /// Whether an approval is currently awaited.
    pub waiting: bool,
    pub approvals: Vec<WorkflowPhase>,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of an `approve` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ApproveOutcome {
    /// The wait point was approved; `next` is the phase now running, or
    /// None when the approval completed the workflow.
    Advanced {
        approved: WorkflowPhase,
        next: Option<WorkflowPhase>,
    },
    /// Nothing was waiting for approval; the call was a no-op.
    NothingWaiting,
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow for change '{0}': already running")]
    AlreadyRunning(String),

    #[error("workflow: none running")]
    NoneRunning,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(".workflow-state.yaml: {0}")]
    Malformed(String),
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// The workflow controller. Stateless between calls; everything lives in
/// the state file.
pub struct WorkflowController {
    store: Store,
}

impl WorkflowController {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Start a workflow for an active change at the given phase. Refuses
    /// to start while another workflow is running.
    pub fn start(&self, change_id: &str, phase: WorkflowPhase) -> WorkflowResult<WorkflowState> {
        if let Some(existing) = self.load()? {
            if existing.status == WorkflowStatus::Running {
                return Err(WorkflowError::AlreadyRunning(existing.change_id));
            }
        }
        let is_active = self
            .store
            .list_changes(Some(ChangeStatus::Active))?
            .iter()
            .any(|c| c.id == change_id);
        if !is_active {
            return Err(StoreError::NotFound(
                Store::change_dir(change_id).display().to_string(),
            )
            .into());
        }

        let now = Utc::now();
        let state = WorkflowState {
            change_id: change_id.to_string(),
            current_phase: phase,
            wait_point: Some(phase),
            approvals: Vec::new(),
            status: WorkflowStatus::Running,
            started_at: now,
            updated_at: now,
            extra: BTreeMap::new(),
        };
        self.save(&state)?;
        log::info!(
            "workflow started for {} at phase {}",
            change_id,
            phase.display_name()
        );
        Ok(state)
    }

    /// Current workflow status, or None when no workflow is running.
    pub fn status(&self) -> WorkflowResult<Option<WorkflowStatusReport>> {
        Ok(self.load()?.map(|state| WorkflowStatusReport {
            change_id: state.change_id.clone(),
            current_phase: state.current_phase,
            phase_index: state.current_phase.index(),
            phase_count: WorkflowPhase::all().len(),
            waiting: state.status == WorkflowStatus::Running && state.wait_point.is_some(),
            approvals: state.approvals.clone(),
            status: state.status,
            started_at: state.started_at,
            updated_at: state.updated_at,
        }))
    }

    /// Approve the active wait point and advance. Safe to retry: when no
    /// wait point is active (including when no workflow exists at all)
    /// this is a no-op.
    pub fn approve(&self) -> WorkflowResult<ApproveOutcome> {
        let Some(mut state) = self.load()? else {
            return Ok(ApproveOutcome::NothingWaiting);
        };
        if state.status != WorkflowStatus::Running {
            return Ok(ApproveOutcome::NothingWaiting);
        }
        let Some(waiting) = state.wait_point else {
            return Ok(ApproveOutcome::NothingWaiting);
        };

        state.approvals.push(waiting);
        let next = waiting.next();
        match next {
            Some(next_phase) => {
                state.current_phase = next_phase;
                state.wait_point = Some(next_phase);
            }
            None => {
                state.wait_point = None;
                state.status = WorkflowStatus::Completed;
            }
        }
        state.updated_at = Utc::now();
        self.save(&state)?;

        log::info!(
            "phase {} approved for {}{}",
            waiting.display_name(),
            state.change_id,
            match next {
                Some(p) => format!(", now in {}", p.display_name()),
                None => ", workflow complete".to_string(),
            }
        );
        Ok(ApproveOutcome::Advanced {
            approved: waiting,
            next,
        })
    }

    /// Terminate the running workflow. The state file is kept as an
    /// auditable record.
    pub fn cancel(&self) -> WorkflowResult<WorkflowState> {
        let Some(mut state) = self.load()? else {
            return Err(WorkflowError::NoneRunning);
        };
        if state.status == WorkflowStatus::Running {
            state.status = WorkflowStatus::Cancelled;
            state.wait_point = None;
            state.updated_at = Utc::now();
            self.save(&state)?;
            log::info!("workflow for {} cancelled", state.change_id);
        }
        Ok(state)
    }

    fn load(&self) -> WorkflowResult<Option<WorkflowState>> {
        match self.store.read(WORKFLOW_STATE_FILE) {
            Ok(text) => serde_yaml::from_str(&text)
                .map(Some)
                .map_err(|e| WorkflowError::Malformed(e.to_string())),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, state: &WorkflowState) -> WorkflowResult<()> {
        let text = serde_yaml::to_string(state)
            .map_err(|e| WorkflowError::Malformed(e.to_string()))?;
        self.store.write(WORKFLOW_STATE_FILE, &text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Store, WorkflowController) {
        let temp = TempDir::new().unwrap();
        let store = Store::new(temp.path());
        store.init().unwrap();
        store
            .create_change("add-mfa", "## Why\nbecause\n", "- [ ] 1.1 Build\n")
            .unwrap();
        let controller = WorkflowController::new(store.clone());
        (temp, store, controller)
    }

    #[test]
    fn test_phase_sequence() {
        assert_eq!(WorkflowPhase::all().len(), 5);
        assert_eq!(WorkflowPhase::Discovery.next(), Some(WorkflowPhase::Planning));
        assert_eq!(WorkflowPhase::Lifecycle.next(), None);
        assert_eq!(WorkflowPhase::Validation.index(), 3);
    }

    #[test]
    fn test_start_persists_state() {
        let (_temp, store, controller) = setup();
        controller
            .start("add-mfa", WorkflowPhase::Discovery)
            .unwrap();

        assert!(store.read(WORKFLOW_STATE_FILE).is_ok());
        let report = controller.status().unwrap().unwrap();
        assert_eq!(report.change_id, "add-mfa");
        assert_eq!(report.current_phase, WorkflowPhase::Discovery);
        assert!(report.waiting);
        assert!(report.approvals.is_empty());
    }

    #[test]
    fn test_status_without_workflow_is_none() {
        let (_temp, _store, controller) = setup();
        assert!(controller.status().unwrap().is_none());
    }

    #[test]
    fn test_start_refuses_missing_change() {
        let (_temp, _store, controller) = setup();
        let err = controller
            .start("ghost", WorkflowPhase::Discovery)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Store(StoreError::NotFound(_))));
    }

    #[test]
    fn test_start_refuses_second_workflow() {
        let (_temp, _store, controller) = setup();
        controller
            .start("add-mfa", WorkflowPhase::Discovery)
            .unwrap();
        let err = controller
            .start("add-mfa", WorkflowPhase::Planning)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyRunning(_)));
    }

    #[test]
    fn test_approve_advances_and_logs_approval() {
        let (_temp, _store, controller) = setup();
        controller
            .start("add-mfa", WorkflowPhase::Discovery)
            .unwrap();

        let outcome = controller.approve().unwrap();
        assert_eq!(
            outcome,
            ApproveOutcome::Advanced {
                approved: WorkflowPhase::Discovery,
                next: Some(WorkflowPhase::Planning),
            }
        );

        let report = controller.status().unwrap().unwrap();
        assert_eq!(report.current_phase, WorkflowPhase::Planning);
        assert_eq!(report.approvals, vec![WorkflowPhase::Discovery]);
        assert!(report.waiting);
    }

    #[test]
    fn test_approving_every_phase_completes() {
        let (_temp, _store, controller) = setup();
        controller
            .start("add-mfa", WorkflowPhase::Discovery)
            .unwrap();

        for _ in 0..4 {
            assert!(matches!(
                controller.approve().unwrap(),
                ApproveOutcome::Advanced { .. }
            ));
        }
        let outcome = controller.approve().unwrap();
        assert_eq!(
            outcome,
            ApproveOutcome::Advanced {
                approved: WorkflowPhase::Lifecycle,
                next: None,
            }
        );

        let report = controller.status().unwrap().unwrap();
        assert_eq!(report.status, WorkflowStatus::Completed);
        assert!(!report.waiting);
        assert_eq!(report.approvals.len(), 5);

        // Further approvals are idempotent no-ops.
        assert_eq!(controller.approve().unwrap(), ApproveOutcome::NothingWaiting);
    }

    #[test]
    fn test_approve_without_workflow_is_noop() {
        let (_temp, _store, controller) = setup();
        assert_eq!(controller.approve().unwrap(), ApproveOutcome::NothingWaiting);
    }

    #[test]
    fn test_cancel_leaves_audit_record() {
        let (_temp, store, controller) = setup();
        controller
            .start("add-mfa", WorkflowPhase::Execution)
            .unwrap();
        let state = controller.cancel().unwrap();
        assert_eq!(state.status, WorkflowStatus::Cancelled);

        // State file survives for forensics; approvals are frozen.
        let text = store.read(WORKFLOW_STATE_FILE).unwrap();
        assert!(text.contains("cancelled"));
        assert_eq!(controller.approve().unwrap(), ApproveOutcome::NothingWaiting);
    }

    #[test]
    fn test_start_after_terminal_workflow() {
        let (_temp, store, controller) = setup();
        controller
            .start("add-mfa", WorkflowPhase::Discovery)
            .unwrap();
        controller.cancel().unwrap();

        store
            .create_change("next-change", "## Why\nbecause\n", "- [ ] 1 t\n")
            .unwrap();
        let state = controller
            .start("next-change", WorkflowPhase::Discovery)
            .unwrap();
        assert_eq!(state.change_id, "next-change");
    }

    #[test]
    fn test_start_mid_sequence() {
        let (_temp, _store, controller) = setup();
        controller
            .start("add-mfa", WorkflowPhase::Validation)
            .unwrap();
        controller.approve().unwrap();
        controller.approve().unwrap();

        let report = controller.status().unwrap().unwrap();
        assert_eq!(report.status, WorkflowStatus::Completed);
        assert_eq!(
            report.approvals,
            vec![WorkflowPhase::Validation, WorkflowPhase::Lifecycle]
        );
    }
}
