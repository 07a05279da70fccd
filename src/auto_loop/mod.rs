//! Autonomous retry loop
//!
//! A bounded loop around an externally-driven task: the controller never
//! executes anything itself, it records the outcome the external agent
//! reports for each iteration and decides whether to keep going. Stops on
//! success, on iteration exhaustion, on cancellation, or when the same
//! error comes back three consecutive iterations (stall). Adjustment
//! history is kept for forensics and survives terminal states.
//!
//! State is written through to `.loop-state.yaml` after every transition.

use crate::config::{ConfigManager, GuardConfig};
use crate::store::{Store, StoreError, LOOP_STATE_FILE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Consecutive identical errors before the loop is declared stalled.
const STALL_THRESHOLD: u32 = 3;

/// Lifecycle status of a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Stalled,
}

impl LoopStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LoopStatus::Running)
    }
}

impl std::fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopStatus::Running => write!(f, "running"),
            LoopStatus::Succeeded => write!(f, "succeeded"),
            LoopStatus::Failed => write!(f, "failed"),
            LoopStatus::Cancelled => write!(f, "cancelled"),
            LoopStatus::Stalled => write!(f, "stalled"),
        }
    }
}

impl std::str::FromStr for LoopStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(LoopStatus::Running),
            "succeeded" => Ok(LoopStatus::Succeeded),
            "failed" => Ok(LoopStatus::Failed),
            "cancelled" => Ok(LoopStatus::Cancelled),
            "stalled" => Ok(LoopStatus::Stalled),
            _ => Err(format!("unknown loop status: {}", s)),
        }
    }
}

/// One entry in the loop's adjustment history. Every reported iteration
/// leaves an entry; `change` is empty when the agent adjusted nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub iteration: u32,
    #[serde(default)]
    pub change: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Persisted loop state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopState {
    pub id: String,
    pub task_description: String,
    pub iteration: u32,
    pub max_iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// How many consecutive iterations reported `last_error`.
    #[serde(default)]
    pub consecutive_errors: u32,
    #[serde(default)]
    pub adjustments: Vec<Adjustment>,
    pub status: LoopStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// What the external agent proposes to change before the next iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentRequest {
    /// Description of the change, typically naming the files touched.
    pub change: String,
    pub reason: String,
}

/// Outcome of one externally-executed iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationReport {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjustment: Option<AdjustmentRequest>,
}

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("loop '{0}': already running")]
    AlreadyRunning(String),

    #[error("loop: none running")]
    NoneRunning,

    #[error("loop '{id}': already {status}, report ignored")]
    Terminal { id: String, status: LoopStatus },

    #[error("loop '{id}': adjustment touches protected path '{path}'")]
    ProtectedPath { id: String, path: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(".loop-state.yaml: {0}")]
    Malformed(String),
}

pub type LoopResult<T> = Result<T, LoopError>;

/// The loop controller.
pub struct LoopController {
    store: Store,
    guard: GuardConfig,
}

impl LoopController {
    /// Build a controller, picking up guard settings from the project
    /// config when present.
    pub fn new(store: Store) -> Self {
        let guard = ConfigManager::new(store.root())
            .read()
            .map(|c| c.guard)
            .unwrap_or_else(|e| {
                log::warn!("loop guard falling back to defaults: {}", e);
                GuardConfig::default()
            });
        Self { store, guard }
    }

    /// Override guard settings, mainly for tests and embedders.
    pub fn with_guard(store: Store, guard: GuardConfig) -> Self {
        Self { store, guard }
    }

    /// Start a new loop. Refuses to start while another loop is running.
    pub fn start(&self, task: &str, max_iterations: u32) -> LoopResult<LoopState> {
        if let Some(existing) = self.load()? {
            if existing.status == LoopStatus::Running {
                return Err(LoopError::AlreadyRunning(existing.id));
            }
        }
        let now = Utc::now();
        let state = LoopState {
            id: Uuid::new_v4().to_string(),
            task_description: task.to_string(),
            iteration: 0,
            max_iterations,
            last_error: None,
            consecutive_errors: 0,
            adjustments: Vec::new(),
            status: LoopStatus::Running,
            started_at: now,
            updated_at: now,
            extra: BTreeMap::new(),
        };
        self.save(&state)?;
        log::info!(
            "loop {} started: '{}' (max {} iterations)",
            state.id,
            task,
            max_iterations
        );
        Ok(state)
    }

    /// Current loop state, or None when no loop has ever been started.
    pub fn get(&self) -> LoopResult<Option<LoopState>> {
        self.load()
    }

    /// The adjustment history of the current loop.
    pub fn history(&self) -> LoopResult<Vec<Adjustment>> {
        Ok(self.load()?.map(|s| s.adjustments).unwrap_or_default())
    }

    /// Record the outcome of one iteration and apply the stopping rules.
    ///
    /// A report against a terminal loop is an error and never resurrects
    /// it. An adjustment naming a protected path is rejected before any
    /// state changes.
    pub fn report(&self, outcome: &IterationReport) -> LoopResult<LoopState> {
        let Some(mut state) = self.load()? else {
            return Err(LoopError::NoneRunning);
        };
        if state.status.is_terminal() {
            return Err(LoopError::Terminal {
                id: state.id,
                status: state.status,
            });
        }

        // Critical-path guard: advisory refusal, state untouched.
        if let Some(adjustment) = &outcome.adjustment {
            if let Some(path) = self.protected_hit(&adjustment.change) {
                return Err(LoopError::ProtectedPath { id: state.id, path });
            }
        }

        state.iteration += 1;
        let reason = match (&outcome.adjustment, &outcome.error) {
            (Some(adjustment), _) => adjustment.reason.clone(),
            (None, Some(error)) => error.clone(),
            (None, None) => "iteration completed".to_string(),
        };
        state.adjustments.push(Adjustment {
            iteration: state.iteration,
            change: outcome
                .adjustment
                .as_ref()
                .map(|a| a.change.clone())
                .unwrap_or_default(),
            reason,
            timestamp: Utc::now(),
        });

        match &outcome.error {
            Some(error) if Some(error) == state.last_error.as_ref() => {
                state.consecutive_errors += 1;
            }
            Some(error) => {
                state.last_error = Some(error.clone());
                state.consecutive_errors = 1;
            }
            None => {
                state.last_error = None;
                state.consecutive_errors = 0;
            }
        }

        state.status = if outcome.success {
            LoopStatus::Succeeded
        } else if state.consecutive_errors >= STALL_THRESHOLD {
            LoopStatus::Stalled
        } else if state.iteration >= state.max_iterations {
            LoopStatus::Failed
        } else {
            LoopStatus::Running
        };

        state.updated_at = Utc::now();
        self.save(&state)?;

        if state.status.is_terminal() {
            log::info!(
                "loop {} finished after {} iteration(s): {}",
                state.id,
                state.iteration,
                state.status
            );
        }
        Ok(state)
    }

    /// Cancel the running loop. Cancelling a terminal loop is a no-op
    /// that returns the preserved state.
    pub fn cancel(&self) -> LoopResult<LoopState> {
        let Some(mut state) = self.load()? else {
            return Err(LoopError::NoneRunning);
        };
        if state.status == LoopStatus::Running {
            state.status = LoopStatus::Cancelled;
            state.updated_at = Utc::now();
            self.save(&state)?;
            log::info!("loop {} cancelled", state.id);
        }
        Ok(state)
    }

    fn protected_hit(&self, change: &str) -> Option<String> {
        self.guard
            .protected_paths
            .iter()
            .find(|p| change.contains(p.as_str()))
            .cloned()
    }

    fn load(&self) -> LoopResult<Option<LoopState>> {
        match self.store.read(LOOP_STATE_FILE) {
            Ok(text) => serde_yaml::from_str(&text)
                .map(Some)
                .map_err(|e| LoopError::Malformed(e.to_string())),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, state: &LoopState) -> LoopResult<()> {
        let text =
            serde_yaml::to_string(state).map_err(|e| LoopError::Malformed(e.to_string()))?;
        self.store.write(LOOP_STATE_FILE, &text)?;
        Ok(())
    }
}
