//! Task records, status/priority state, and task-num ordering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Status of a task in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Pending
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Blocked => write!(f, "blocked"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" | "in-progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "blocked" => Ok(TaskStatus::Blocked),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(format!("unknown task status: {}", s)),
        }
    }
}

/// Priority of a task. Ordering for the scheduler is critical > high >
/// medium > low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl TaskPriority {
    /// Scheduler rank; lower sorts first.
    pub fn rank(&self) -> u8 {
        match self {
            TaskPriority::Critical => 0,
            TaskPriority::High => 1,
            TaskPriority::Medium => 2,
            TaskPriority::Low => 3,
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Medium
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Critical => write!(f, "critical"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Medium => write!(f, "medium"),
            TaskPriority::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(TaskPriority::Critical),
            "high" => Ok(TaskPriority::High),
            "medium" => Ok(TaskPriority::Medium),
            "low" => Ok(TaskPriority::Low),
            _ => Err(format!("unknown task priority: {}", s)),
        }
    }
}

/// A unit of work tracked by the registry, keyed externally by
/// `<change-id>/<task-num>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub title: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Unknown keys are carried through the YAML round-trip untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Task {
    /// Create a fresh task record.
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            title: title.into(),
            status: TaskStatus::default(),
            priority: TaskPriority::default(),
            assignee: None,
            notes: None,
            depends_on: Vec::new(),
            blocked_by: Vec::new(),
            created_at: now,
            updated_at: now,
            extra: BTreeMap::new(),
        }
    }
}

/// Split a task id into `(change_id, task_num)`.
pub fn split_task_id(id: &str) -> Option<(&str, &str)> {
    id.split_once('/')
}

/// Build a task id from its parts.
pub fn task_id(change_id: &str, num: &str) -> String {
    format!("{}/{}", change_id, num)
}

/// One segment of a task num, for ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
enum NumSegment {
    Numeric(u64),
    Text(String),
}

impl Ord for NumSegment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (NumSegment::Numeric(a), NumSegment::Numeric(b)) => a.cmp(b),
            // Numeric segments sort before non-numeric ones.
            (NumSegment::Numeric(_), NumSegment::Text(_)) => Ordering::Less,
            (NumSegment::Text(_), NumSegment::Numeric(_)) => Ordering::Greater,
            (NumSegment::Text(a), NumSegment::Text(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for NumSegment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn num_segments(num: &str) -> Vec<NumSegment> {
    num.split('.')
        .map(|seg| match seg.parse::<u64>() {
            Ok(n) => NumSegment::Numeric(n),
            Err(_) => NumSegment::Text(seg.to_string()),
        })
        .collect()
}

/// Compare two task nums as dotted numeric tuples, so `1.2 < 1.10 <
/// 1.10.1 < 2`. A dotted num that is a strict prefix of another sorts
/// first (`1.10 < 1.10.1`), but a bare single-segment num sorts after
/// every dotted num sharing its leading segment (`1.1 < 1.2 < 1`).
pub fn compare_task_nums(a: &str, b: &str) -> Ordering {
    let a_segments = num_segments(a);
    let b_segments = num_segments(b);
    if a_segments.len() == 1 && b_segments.len() > 1 && a_segments[0] == b_segments[0] {
        return Ordering::Greater;
    }
    if b_segments.len() == 1 && a_segments.len() > 1 && a_segments[0] == b_segments[0] {
        return Ordering::Less;
    }
    a_segments.cmp(&b_segments)
}

/// Compare two full task ids: change id lexicographically, then task num
/// as dotted numerics.
pub fn compare_task_ids(a: &str, b: &str) -> Ordering {
    let (a_change, a_num) = split_task_id(a).unwrap_or((a, ""));
    let (b_change, b_num) = split_task_id(b).unwrap_or((b, ""));
    a_change
        .cmp(b_change)
        .then_with(|| compare_task_nums(a_num, b_num))
}

/// Whether a task num is purely dotted-numeric (`1`, `1.2`, `2.3.4`).
pub fn is_numeric_num(num: &str) -> bool {
    !num.is_empty() && num.split('.').all(|seg| !seg.is_empty() && seg.parse::<u64>().is_ok())
}
