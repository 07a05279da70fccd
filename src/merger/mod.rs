//! Delta merger
//!
//! Applies a parsed delta onto a parsed base spec in a fixed order
//! (RENAMED, REMOVED, MODIFIED, ADDED) so the result is deterministic.
//! Requirement order and verbatim bodies are preserved; removals leave a
//! marker comment behind for auditability.

use crate::parser::{Delta, Requirement, Spec};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Merge failure: a delta operation has no valid target in the base.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("conflict on requirement '{name}': {reason}")]
    Conflict { name: String, reason: String },
}

impl MergeError {
    fn conflict(name: &str, reason: &str) -> Self {
        MergeError::Conflict {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// The kind of a single applied operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOperation {
    Renamed,
    Removed,
    Modified,
    Added,
}

impl std::fmt::Display for MergeOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeOperation::Renamed => write!(f, "renamed"),
            MergeOperation::Removed => write!(f, "removed"),
            MergeOperation::Modified => write!(f, "modified"),
            MergeOperation::Added => write!(f, "added"),
        }
    }
}

/// One applied operation, for traceability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedOperation {
    pub operation: MergeOperation,
    pub requirement: String,
    /// Extra context, e.g. the old name of a rename.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Everything a merge did, in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub operations: Vec<AppliedOperation>,
}

impl MergeReport {
    fn record(&mut self, operation: MergeOperation, requirement: &str, detail: Option<String>) {
        self.operations.push(AppliedOperation {
            operation,
            requirement: requirement.to_string(),
            detail,
        });
    }
}

/// Apply `delta` to `base`, yielding the new spec and a report of every
/// operation applied.
pub fn merge(base: &Spec, delta: &Delta) -> Result<(Spec, MergeReport), MergeError> {
    let mut report = MergeReport::default();
    let mut preamble = base.preamble.clone();
    let mut requirements: Vec<Requirement> = base.requirements.clone();

    // RENAMED: rewrite the key and heading of the matching requirement.
    for rename in &delta.renamed {
        let index = find(&requirements, &rename.from).ok_or_else(|| {
            MergeError::conflict(&rename.from, "renamed requirement not found in base")
        })?;
        if rename.to != rename.from && find(&requirements, &rename.to).is_some() {
            return Err(MergeError::conflict(
                &rename.to,
                "rename target already exists",
            ));
        }
        requirements[index].name = rename.to.clone();
        report.record(
            MergeOperation::Renamed,
            &rename.to,
            Some(format!("from '{}'", rename.from)),
        );
    }

    // REMOVED: drop the requirement, leaving a marker comment where it
    // stood so the history stays visible in the document.
    for removed in &delta.removed {
        let index = find(&requirements, &removed.name).ok_or_else(|| {
            MergeError::conflict(&removed.name, "removed requirement not found in base")
        })?;
        let marker = format!("<!-- removed requirement: {} -->\n", removed.name);
        if index == 0 {
            preamble.push_str(&marker);
        } else {
            requirements[index - 1].body.push_str(&marker);
        }
        requirements.remove(index);
        report.record(MergeOperation::Removed, &removed.name, None);
    }

    // MODIFIED: replace the body of the matching requirement.
    for modified in &delta.modified {
        let index = find(&requirements, &modified.name).ok_or_else(|| {
            MergeError::conflict(&modified.name, "modified requirement not found in base")
        })?;
        requirements[index].body = modified.body.clone();
        requirements[index].scenarios = modified.scenarios.clone();
        report.record(MergeOperation::Modified, &modified.name, None);
    }

    // ADDED: append to the end, in delta order.
    for added in &delta.added {
        if find(&requirements, &added.name).is_some() {
            return Err(MergeError::conflict(
                &added.name,
                "added requirement already exists",
            ));
        }
        requirements.push(added.clone());
        report.record(MergeOperation::Added, &added.name, None);
    }

    Ok((
        Spec {
            preamble,
            requirements,
        },
        report,
    ))
}

fn find(requirements: &[Requirement], name: &str) -> Option<usize> {
    requirements.iter().position(|r| r.name == name)
}
