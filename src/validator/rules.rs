//! The ordered rule list.
//!
//! Each rule is a pure function from a [`Context`] to zero or more
//! [`Issue`]s; the engine runs them in declaration order.

use super::{Artifact, Context, Issue, Severity};
use crate::parser::{Requirement, ScanIssue};
use crate::registry::task::is_numeric_num;
use crate::store::{PROPOSAL_FILE, TASKS_FILE};

pub const R_REQ_HEADER: &str = "R-REQ-HEADER";
pub const R_SCN_HEADER: &str = "R-SCN-HEADER";
pub const R_REQ_HAS_SCN: &str = "R-REQ-HAS-SCN";
pub const R_DELTA_OPS: &str = "R-DELTA-OPS";
pub const R_RENAME_MARKERS: &str = "R-RENAME-MARKERS";
pub const R_CHANGE_FILES: &str = "R-CHANGE-FILES";
pub const R_TASK_NUM: &str = "R-TASK-NUM";
pub const R_TASK_STATS: &str = "R-TASK-STATS";
pub const R_IO: &str = "R-IO";

/// A validation rule: an id plus a pure check function.
pub struct Rule {
    pub id: &'static str,
    pub check: fn(&Context) -> Vec<Issue>,
}

static RULES: [Rule; 8] = [
    Rule {
        id: R_REQ_HEADER,
        check: check_requirement_headers,
    },
    Rule {
        id: R_SCN_HEADER,
        check: check_scenario_headers,
    },
    Rule {
        id: R_REQ_HAS_SCN,
        check: check_requirements_have_scenarios,
    },
    Rule {
        id: R_DELTA_OPS,
        check: check_delta_operations,
    },
    Rule {
        id: R_RENAME_MARKERS,
        check: check_rename_markers,
    },
    Rule {
        id: R_CHANGE_FILES,
        check: check_change_files,
    },
    Rule {
        id: R_TASK_NUM,
        check: check_task_nums,
    },
    Rule {
        id: R_TASK_STATS,
        check: check_task_stats,
    },
];

/// The full rule list, in evaluation order.
pub fn all() -> &'static [Rule] {
    &RULES
}

fn scan_issues(ctx: &Context) -> &[ScanIssue] {
    match &ctx.artifact {
        Artifact::Spec { scan } => &scan.issues,
        Artifact::Delta { scan } => &scan.issues,
        _ => &[],
    }
}

fn check_requirement_headers(ctx: &Context) -> Vec<Issue> {
    scan_issues(ctx)
        .iter()
        .filter_map(|issue| match issue {
            ScanIssue::EmptyRequirementName { line } => Some(Issue::new(
                R_REQ_HEADER,
                Severity::Error,
                "requirement heading has an empty name",
                Some(ctx.file.clone()),
                Some(*line),
            )),
            _ => None,
        })
        .collect()
}

fn check_scenario_headers(ctx: &Context) -> Vec<Issue> {
    scan_issues(ctx)
        .iter()
        .filter_map(|issue| match issue {
            ScanIssue::EmptyScenarioName { line } => Some(Issue::new(
                R_SCN_HEADER,
                Severity::Error,
                "scenario heading has an empty name",
                Some(ctx.file.clone()),
                Some(*line),
            )),
            ScanIssue::NonScenarioSubheading { line, heading } => Some(Issue::new(
                R_SCN_HEADER,
                Severity::Error,
                format!("level-4 heading is not a scenario: '{}'", heading),
                Some(ctx.file.clone()),
                Some(*line),
            )),
            _ => None,
        })
        .collect()
}

fn missing_scenarios<'a>(
    reqs: impl IntoIterator<Item = &'a Requirement>,
    file: &str,
) -> Vec<Issue> {
    reqs.into_iter()
        .filter(|r| r.scenarios.is_empty())
        .map(|r| {
            Issue::new(
                R_REQ_HAS_SCN,
                Severity::Error,
                format!("requirement '{}' has no scenarios", r.name),
                Some(file.to_string()),
                Some(r.line),
            )
        })
        .collect()
}

fn check_requirements_have_scenarios(ctx: &Context) -> Vec<Issue> {
    match &ctx.artifact {
        Artifact::Spec { scan } => missing_scenarios(&scan.spec.requirements, &ctx.file),
        // Removed blocks only name the requirement; added and modified
        // blocks carry full requirement text and need scenarios.
        Artifact::Delta { scan } => {
            let mut issues = missing_scenarios(&scan.delta.added, &ctx.file);
            issues.extend(missing_scenarios(&scan.delta.modified, &ctx.file));
            issues
        }
        _ => Vec::new(),
    }
}

fn check_delta_operations(ctx: &Context) -> Vec<Issue> {
    let Artifact::Delta { scan } = &ctx.artifact else {
        return Vec::new();
    };
    let mut issues: Vec<Issue> = scan
        .issues
        .iter()
        .filter_map(|issue| match issue {
            ScanIssue::UnknownOperation { line, heading } => Some(Issue::new(
                R_DELTA_OPS,
                Severity::Error,
                format!(
                    "'{}' is not a delta operation; expected one of ADDED/MODIFIED/REMOVED/RENAMED Requirements",
                    heading
                ),
                Some(ctx.file.clone()),
                Some(*line),
            )),
            ScanIssue::OrphanRequirement { line, name } => Some(Issue::new(
                R_DELTA_OPS,
                Severity::Error,
                format!("requirement '{}' appears outside any operation section", name),
                Some(ctx.file.clone()),
                Some(*line),
            )),
            _ => None,
        })
        .collect();

    if scan.delta.operations.is_empty() {
        issues.push(Issue::new(
            R_DELTA_OPS,
            Severity::Error,
            "delta has no operation sections",
            Some(ctx.file.clone()),
            None,
        ));
    }
    issues
}

fn check_rename_markers(ctx: &Context) -> Vec<Issue> {
    scan_issues(ctx)
        .iter()
        .filter_map(|issue| match issue {
            ScanIssue::UnpairedRenameMarker { line, marker } => Some(Issue::new(
                R_RENAME_MARKERS,
                Severity::Error,
                format!("renamed requirement has a {} marker without its pair", marker),
                Some(ctx.file.clone()),
                Some(*line),
            )),
            _ => None,
        })
        .collect()
}

fn check_change_files(ctx: &Context) -> Vec<Issue> {
    let Artifact::ChangeLayout { files, stray } = &ctx.artifact else {
        return Vec::new();
    };
    let mut issues = Vec::new();
    for required in [PROPOSAL_FILE, TASKS_FILE] {
        if !files.iter().any(|f| f == required) {
            issues.push(Issue::new(
                R_CHANGE_FILES,
                Severity::Error,
                format!("missing {}", required),
                Some(ctx.file.clone()),
                None,
            ));
        }
    }
    for path in stray {
        issues.push(Issue::new(
            R_CHANGE_FILES,
            Severity::Warning,
            format!("unexpected file: {}", path),
            Some(ctx.file.clone()),
            None,
        ));
    }
    issues
}

fn check_task_nums(ctx: &Context) -> Vec<Issue> {
    let Artifact::Tasks { lines } = &ctx.artifact else {
        return Vec::new();
    };
    let mut issues = Vec::new();
    for line in lines {
        if !is_numeric_num(&line.num) {
            issues.push(Issue::new(
                R_TASK_NUM,
                Severity::Warning,
                format!("task num '{}' is not dotted numeric", line.num),
                Some(ctx.file.clone()),
                Some(line.line),
            ));
        }
        for key in &line.unknown_keys {
            issues.push(Issue::new(
                R_TASK_NUM,
                Severity::Warning,
                format!("task {}: unknown metadata key '{}'", line.num, key),
                Some(ctx.file.clone()),
                Some(line.line),
            ));
        }
    }
    issues
}

fn check_task_stats(ctx: &Context) -> Vec<Issue> {
    let Artifact::Tasks { lines } = &ctx.artifact else {
        return Vec::new();
    };
    if lines.is_empty() {
        return Vec::new();
    }
    let completed = lines.iter().filter(|l| l.completed).count();
    vec![Issue::new(
        R_TASK_STATS,
        Severity::Info,
        format!("tasks: {}/{} completed", completed, lines.len()),
        Some(ctx.file.clone()),
        None,
    )]
}
