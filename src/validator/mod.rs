//! Validation engine
//!
//! Runs an ordered rule list over parsed artifacts and aggregates
//! structured issues. Rule evaluation never panics: malformed documents
//! are scanned leniently and their structural problems become issues.
//! Filesystem errors on missing targets surface as a single `R-IO` error
//! issue rather than a terminal failure.

pub mod rules;

use crate::parser::{scan_delta, scan_spec, DeltaScan, SpecScan};
use crate::registry::sync::{parse_tasks, TaskLine};
use crate::store::{
    ChangeStatus, Store, StoreError, DESIGN_FILE, PROPOSAL_FILE, SPECS_DIR, TASKS_FILE,
};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// Severity of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// A single finding from a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Issue {
    pub fn new(
        rule_id: &str,
        severity: Severity,
        message: impl Into<String>,
        file: Option<String>,
        line: Option<usize>,
    ) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            severity,
            message: message.into(),
            file,
            line,
        }
    }
}

/// Aggregated outcome of a validation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub issues: Vec<Issue>,
    pub error_count: usize,
    pub warning_count: usize,
    pub summary: String,
}

impl ValidationResult {
    /// Build a result from collected issues. In strict mode warnings also
    /// flip `valid` to false.
    pub fn from_issues(issues: Vec<Issue>, strict: bool) -> Self {
        let error_count = issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count();
        let warning_count = issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .count();
        let valid = error_count == 0 && (!strict || warning_count == 0);

        let summary = if error_count == 0 && warning_count == 0 {
            "no issues found".to_string()
        } else {
            let mut files: Vec<&str> = issues
                .iter()
                .filter_map(|i| i.file.as_deref())
                .collect();
            files.sort_unstable();
            files.dedup();
            format!(
                "{} error(s), {} warning(s) across {} file(s)",
                error_count,
                warning_count,
                files.len().max(1)
            )
        };

        Self {
            valid,
            issues,
            error_count,
            warning_count,
            summary,
        }
    }
}

/// The artifact a rule is looking at.
#[derive(Debug)]
pub enum Artifact {
    Spec {
        scan: SpecScan,
    },
    Delta {
        scan: DeltaScan,
    },
    /// Layout of an active change directory.
    ChangeLayout {
        /// Top-level file names.
        files: Vec<String>,
        /// Relative paths of files that do not belong to the layout.
        stray: Vec<String>,
    },
    Tasks {
        lines: Vec<TaskLine>,
    },
}

/// Input handed to every rule: the artifact plus the file it came from.
#[derive(Debug)]
pub struct Context {
    pub file: String,
    pub artifact: Artifact,
}

/// The validation service.
pub struct Validator {
    store: Store,
}

impl Validator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Validate a single base spec.
    pub fn validate_spec(&self, spec_id: &str, strict: bool) -> ValidationResult {
        let mut issues = Vec::new();
        match self.spec_context(spec_id) {
            Ok(ctx) => issues.extend(run_rules(&[ctx])),
            Err(issue) => issues.push(issue),
        }
        ValidationResult::from_issues(issues, strict)
    }

    /// Validate an active change: its layout, tasks document, and every
    /// delta it carries.
    pub fn validate_change(&self, change_id: &str, strict: bool) -> ValidationResult {
        let mut issues = Vec::new();
        match self.change_contexts(change_id) {
            Ok(contexts) => issues.extend(run_rules(&contexts)),
            Err(issue) => issues.push(issue),
        }
        ValidationResult::from_issues(issues, strict)
    }

    /// Validate every spec and every active change. Archived changes are
    /// skipped.
    pub fn validate_all(&self, strict: bool) -> ValidationResult {
        let mut issues = Vec::new();

        match self.store.list_specs() {
            Ok(spec_ids) => {
                for spec_id in spec_ids {
                    match self.spec_context(&spec_id) {
                        Ok(ctx) => issues.extend(run_rules(&[ctx])),
                        Err(issue) => issues.push(issue),
                    }
                }
            }
            Err(e) => issues.push(io_issue(SPECS_DIR, &e)),
        }

        match self.store.list_changes(Some(ChangeStatus::Active)) {
            Ok(changes) => {
                for change in changes {
                    match self.change_contexts(&change.id) {
                        Ok(contexts) => issues.extend(run_rules(&contexts)),
                        Err(issue) => issues.push(issue),
                    }
                }
            }
            Err(e) => issues.push(io_issue("changes", &e)),
        }

        ValidationResult::from_issues(issues, strict)
    }

    fn spec_context(&self, spec_id: &str) -> Result<Context, Issue> {
        let rel = Store::spec_path(spec_id);
        let file = rel.display().to_string();
        let text = self
            .store
            .read(&rel)
            .map_err(|e| io_issue(&file, &e))?;
        Ok(Context {
            file,
            artifact: Artifact::Spec {
                scan: scan_spec(&text),
            },
        })
    }

    fn change_contexts(&self, change_id: &str) -> Result<Vec<Context>, Issue> {
        let change_rel = Store::change_dir(change_id);
        let change_file = change_rel.display().to_string();
        let files = self
            .store
            .list_change_files(change_id)
            .map_err(|e| io_issue(&change_file, &e))?;

        let mut contexts = vec![Context {
            file: change_file.clone(),
            artifact: Artifact::ChangeLayout {
                files: files.clone(),
                stray: self.stray_paths(change_id),
            },
        }];

        if files.iter().any(|f| f == TASKS_FILE) {
            let rel = Store::change_file(change_id, TASKS_FILE);
            match self.store.read(&rel) {
                Ok(text) => contexts.push(Context {
                    file: rel.display().to_string(),
                    artifact: Artifact::Tasks {
                        lines: parse_tasks(&text),
                    },
                }),
                Err(e) => return Err(io_issue(&rel.display().to_string(), &e)),
            }
        }

        for spec_id in self
            .store
            .list_deltas(change_id)
            .map_err(|e| io_issue(&change_file, &e))?
        {
            let rel = Store::delta_path(change_id, &spec_id);
            let file = rel.display().to_string();
            let text = self.store.read(&rel).map_err(|e| io_issue(&file, &e))?;
            contexts.push(Context {
                file,
                artifact: Artifact::Delta {
                    scan: scan_delta(&text),
                },
            });
        }

        Ok(contexts)
    }

    /// Walk the change directory for files that do not belong to the
    /// layout: anything top-level beyond proposal/design/tasks, and
    /// anything nested that is not a `specs/*.md` delta.
    fn stray_paths(&self, change_id: &str) -> Vec<String> {
        let root = self.store.root().join(Store::change_dir(change_id));
        let mut stray = Vec::new();
        for entry in WalkDir::new(&root)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_path_buf();
            let known_top = rel.parent().map(|p| p.as_os_str().is_empty()).unwrap_or(true)
                && matches!(
                    rel.to_string_lossy().as_ref(),
                    PROPOSAL_FILE | DESIGN_FILE | TASKS_FILE
                );
            let known_delta = rel.components().count() == 2
                && rel.starts_with(SPECS_DIR)
                && rel.extension().map(|e| e == "md").unwrap_or(false);
            if !known_top && !known_delta {
                stray.push(rel.display().to_string());
            }
        }
        stray.sort();
        stray
    }
}

/// Run the full rule list over a set of contexts, in rule order.
fn run_rules(contexts: &[Context]) -> Vec<Issue> {
    let mut issues = Vec::new();
    for rule in rules::all() {
        for ctx in contexts {
            issues.extend((rule.check)(ctx));
        }
    }
    issues
}

fn io_issue(file: &str, err: &StoreError) -> Issue {
    Issue::new(
        rules::R_IO,
        Severity::Error,
        err.to_string(),
        Some(file.to_string()),
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GOOD_SPEC: &str = "\
# auth

### Requirement: Login

#### Scenario: OK

- WHEN valid credentials
- THEN session created
";

    const GOOD_DELTA: &str = "\
## ADDED Requirements

### Requirement: MFA

#### Scenario: Enroll

- WHEN user enrolls
- THEN TOTP secret stored
";

    fn setup() -> (TempDir, Store, Validator) {
        let temp = TempDir::new().unwrap();
        let store = Store::new(temp.path());
        store.init().unwrap();
        let validator = Validator::new(store.clone());
        (temp, store, validator)
    }

    #[test]
    fn test_valid_spec_passes() {
        let (_temp, store, validator) = setup();
        store.create_spec("auth", GOOD_SPEC).unwrap();
        let result = validator.validate_spec("auth", false);
        assert!(result.valid, "issues: {:?}", result.issues);
        assert_eq!(result.error_count, 0);
    }

    #[test]
    fn test_missing_spec_is_single_io_issue() {
        let (_temp, _store, validator) = setup();
        let result = validator.validate_spec("nope", false);
        assert!(!result.valid);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].rule_id, rules::R_IO);
    }

    #[test]
    fn test_requirement_without_scenario_fails() {
        let (_temp, store, validator) = setup();
        store
            .create_spec("auth", "### Requirement: Login\n\nProse only.\n")
            .unwrap();
        let result = validator.validate_spec("auth", false);
        assert!(!result.valid);
        assert!(result
            .issues
            .iter()
            .any(|i| i.rule_id == rules::R_REQ_HAS_SCN));
    }

    #[test]
    fn test_valid_change_passes_strict() {
        let (_temp, store, validator) = setup();
        store
            .create_change("add-mfa", "## Why\nbecause\n", "- [ ] 1.1 Build it\n")
            .unwrap();
        store.write_delta("add-mfa", "auth", GOOD_DELTA).unwrap();

        let result = validator.validate_change("add-mfa", true);
        assert!(result.valid, "issues: {:?}", result.issues);
    }

    #[test]
    fn test_change_missing_tasks_fails() {
        let (_temp, store, validator) = setup();
        store
            .create_change("add-mfa", "## Why\nbecause\n", "tasks")
            .unwrap();
        store.delete_file("changes/add-mfa/tasks.md").unwrap();

        let result = validator.validate_change("add-mfa", false);
        assert!(!result.valid);
        assert!(result
            .issues
            .iter()
            .any(|i| i.rule_id == rules::R_CHANGE_FILES && i.message.contains("tasks.md")));
    }

    #[test]
    fn test_stray_file_is_warning_and_strict_flips_valid() {
        let (_temp, store, validator) = setup();
        store
            .create_change("add-mfa", "## Why\nbecause\n", "- [ ] 1.1 Build it\n")
            .unwrap();
        store.write_delta("add-mfa", "auth", GOOD_DELTA).unwrap();
        store
            .write("changes/add-mfa/notes.txt", "scratch")
            .unwrap();

        let lax = validator.validate_change("add-mfa", false);
        assert!(lax.valid);
        assert!(lax.warning_count >= 1);

        let strict = validator.validate_change("add-mfa", true);
        assert!(!strict.valid);
    }

    #[test]
    fn test_bad_delta_heading_fails() {
        let (_temp, store, validator) = setup();
        store
            .create_change("add-mfa", "## Why\nbecause\n", "- [ ] 1.1 Build it\n")
            .unwrap();
        store
            .write_delta(
                "add-mfa",
                "auth",
                "## CHANGED Requirements\n\n### Requirement: X\n",
            )
            .unwrap();

        let result = validator.validate_change("add-mfa", false);
        assert!(!result.valid);
        assert!(result
            .issues
            .iter()
            .any(|i| i.rule_id == rules::R_DELTA_OPS));
    }

    #[test]
    fn test_rename_without_to_fails() {
        let (_temp, store, validator) = setup();
        store
            .create_change("ren", "## Why\nbecause\n", "- [ ] 1.1 Rename\n")
            .unwrap();
        store
            .write_delta("ren", "auth", "## RENAMED Requirements\n\n- FROM: Old\n")
            .unwrap();

        let result = validator.validate_change("ren", false);
        assert!(!result.valid);
        assert!(result
            .issues
            .iter()
            .any(|i| i.rule_id == rules::R_RENAME_MARKERS));
    }

    #[test]
    fn test_validate_all_skips_archived() {
        let (_temp, store, validator) = setup();
        store.create_spec("auth", GOOD_SPEC).unwrap();
        store
            .create_change("bad-change", "p", "- [ ] 1 t\n")
            .unwrap();
        store
            .write_delta("bad-change", "auth", "## CHANGED Requirements\n")
            .unwrap();
        // Move the bad change to the archive; its issues must vanish.
        store
            .rename_dir("changes/bad-change", "archive/2026-01-20-bad-change")
            .unwrap();

        let result = validator.validate_all(false);
        assert!(result.valid, "issues: {:?}", result.issues);
    }

    #[test]
    fn test_non_numeric_task_num_warns() {
        let (_temp, store, validator) = setup();
        store
            .create_change("chg", "## Why\nbecause\n", "- [ ] x.1 Odd numbering\n")
            .unwrap();
        store.write_delta("chg", "auth", GOOD_DELTA).unwrap();

        let result = validator.validate_change("chg", false);
        assert!(result
            .issues
            .iter()
            .any(|i| i.rule_id == rules::R_TASK_NUM && i.severity == Severity::Warning));
    }
}
