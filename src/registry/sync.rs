//! tasks.md parsing for registry reconciliation
//!
//! Task documents are ordered checkbox lists:
//!
//! ```markdown
//! ## 1. Implementation
//! - [ ] 1.1 Create schema
//! - [x] 1.2 Wire endpoint [priority: high] [assignee: alice] [depends: 1.1]
//! ```
//!
//! Everything that is not a checkbox line is ignored. Bracketed metadata is
//! optional; unknown keys are kept for the validator to warn about.

use crate::registry::task::TaskPriority;
use regex::Regex;
use std::sync::OnceLock;

fn task_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*-\s*\[([ xX])\]\s+(\S+)\s+(.+?)\s*$").unwrap())
}

fn metadata_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([a-z][a-z_-]*):\s*([^\]]*)\]").unwrap())
}

/// One parsed checkbox line from a tasks document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLine {
    pub num: String,
    pub title: String,
    pub completed: bool,
    pub priority: Option<TaskPriority>,
    pub assignee: Option<String>,
    /// Dependency references as written; bare nums refer to tasks in the
    /// same change and are qualified by the caller.
    pub depends: Vec<String>,
    /// 1-indexed source line.
    pub line: usize,
    /// Metadata keys this parser does not understand.
    pub unknown_keys: Vec<String>,
}

/// Parse every checkbox task line out of a tasks document.
pub fn parse_tasks(text: &str) -> Vec<TaskLine> {
    let mut tasks = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let Some(caps) = task_line_re().captures(line) else {
            continue;
        };
        let completed = &caps[1] != " ";
        let num = caps[2].to_string();
        let rest = caps[3].to_string();

        let mut priority = None;
        let mut assignee = None;
        let mut depends = Vec::new();
        let mut unknown_keys = Vec::new();

        for meta in metadata_re().captures_iter(&rest) {
            let key = &meta[1];
            let value = meta[2].trim();
            match key {
                "priority" => priority = value.parse::<TaskPriority>().ok(),
                "assignee" => {
                    if !value.is_empty() {
                        assignee = Some(value.to_string());
                    }
                }
                "depends" => {
                    depends.extend(
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|v| !v.is_empty())
                            .map(String::from),
                    );
                }
                other => unknown_keys.push(other.to_string()),
            }
        }

        let title = metadata_re().replace_all(&rest, "").trim().to_string();

        tasks.push(TaskLine {
            num,
            title,
            completed,
            priority,
            assignee,
            depends,
            line: idx + 1,
            unknown_keys,
        });
    }
    tasks
}

/// Qualify a dependency reference from a tasks document: bare nums belong
/// to the same change, `other-change/1.2` forms pass through.
pub fn qualify_dependency(change_id: &str, reference: &str) -> String {
    if reference.contains('/') {
        reference.to_string()
    } else {
        format!("{}/{}", change_id, reference)
    }
}
