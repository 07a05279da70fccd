//! Spec and delta document parsing
//!
//! Documents are plain Markdown. A spec is a sequence of requirement blocks
//! (`### Requirement: <name>`) each containing scenario blocks
//! (`#### Scenario: <name>`). A delta groups requirement blocks under one of
//! four level-2 operation headings (ADDED / MODIFIED / REMOVED / RENAMED
//! Requirements). Parsing is line-based and forgiving: prose between
//! headings is preserved verbatim in the owning block's body, and structural
//! problems are collected as issues rather than aborting the scan.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

/// The four delta operation headings, in canonical form.
pub const DELTA_HEADINGS: [&str; 4] = [
    "## ADDED Requirements",
    "## MODIFIED Requirements",
    "## REMOVED Requirements",
    "## RENAMED Requirements",
];

fn requirement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^###\s+Requirement:\s*(.*)$").unwrap())
}

fn scenario_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^####\s+Scenario:\s*(.*)$").unwrap())
}

fn rename_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Accepts `FROM: name`, `- FROM: `### Requirement: name``, etc.
    RE.get_or_init(|| Regex::new(r"^[-*\s]*(FROM|TO):\s*(.+?)\s*$").unwrap())
}

/// Parse failure: the document cannot be given any usable structure.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("delta line {line}: renamed requirement missing {marker} marker")]
    MissingRenameMarker { marker: &'static str, line: usize },

    #[error("delta: no operation headings found")]
    NoOperations,
}

/// A structural problem found during a lenient scan. The validator maps
/// these onto its rule ids; strict parsing turns the first one into an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanIssue {
    /// `### Requirement:` heading with an empty name.
    EmptyRequirementName { line: usize },
    /// `#### Scenario:` heading with an empty name.
    EmptyScenarioName { line: usize },
    /// Level-4 heading inside a requirement that is not a scenario heading.
    NonScenarioSubheading { line: usize, heading: String },
    /// Level-2 heading in a delta that is not one of the four operations.
    UnknownOperation { line: usize, heading: String },
    /// Requirement block in a delta appearing before any operation heading.
    OrphanRequirement { line: usize, name: String },
    /// RENAMED entry with a FROM but no TO (or vice versa).
    UnpairedRenameMarker { line: usize, marker: String },
}

/// A scenario block inside a requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    /// Verbatim text after the heading, up to the next heading.
    pub body: String,
    /// 1-indexed line of the heading in the source document.
    pub line: usize,
}

/// A requirement block: heading name plus verbatim body (which contains the
/// scenario blocks).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub name: String,
    /// Verbatim text between this heading and the next requirement heading.
    pub body: String,
    pub scenarios: Vec<Scenario>,
    pub line: usize,
}

impl Requirement {
    /// The canonical heading line for this requirement.
    pub fn heading(&self) -> String {
        format!("### Requirement: {}", self.name)
    }
}

/// A parsed spec document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spec {
    /// Verbatim text before the first requirement heading.
    pub preamble: String,
    pub requirements: Vec<Requirement>,
}

impl Spec {
    /// Look up a requirement by name.
    pub fn requirement(&self, name: &str) -> Option<&Requirement> {
        self.requirements.iter().find(|r| r.name == name)
    }

    /// Re-serialize the spec, preserving requirement order and verbatim
    /// bodies. Round-trips structurally: parsing the output yields the
    /// same requirements and scenarios.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.preamble);
        if !self.preamble.is_empty() && !self.preamble.ends_with('\n') {
            out.push('\n');
        }
        for req in &self.requirements {
            out.push_str(&req.heading());
            out.push('\n');
            out.push_str(&req.body);
            if !req.body.is_empty() && !req.body.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }
}

/// A rename entry in a delta's RENAMED section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rename {
    pub from: String,
    pub to: String,
    pub line: usize,
}

/// A parsed delta document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub added: Vec<Requirement>,
    pub modified: Vec<Requirement>,
    pub removed: Vec<Requirement>,
    pub renamed: Vec<Rename>,
    /// Canonical operation headings present, in document order.
    pub operations: Vec<String>,
}

impl Delta {
    /// True when the delta carries no operations at all.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.removed.is_empty()
            && self.renamed.is_empty()
    }
}

/// Result of a lenient scan: best-effort structure plus collected issues.
#[derive(Debug, Clone)]
pub struct DeltaScan {
    pub delta: Delta,
    pub issues: Vec<ScanIssue>,
}

/// Result of a lenient spec scan.
#[derive(Debug, Clone)]
pub struct SpecScan {
    pub spec: Spec,
    pub issues: Vec<ScanIssue>,
}

/// Parse a spec document. Never fails: malformed headings are collected
/// as issues and the surrounding text is preserved.
pub fn parse_spec(text: &str) -> Spec {
    scan_spec(text).spec
}

/// Lenient spec scan, exposing structural issues for validation.
pub fn scan_spec(text: &str) -> SpecScan {
    let lines: Vec<&str> = text.lines().collect();
    let mut issues = Vec::new();
    let mut requirements = Vec::new();
    let mut preamble_end = lines.len();

    let mut idx = 0;
    while idx < lines.len() {
        if let Some(caps) = requirement_re().captures(lines[idx]) {
            if preamble_end == lines.len() {
                preamble_end = idx;
            }
            let name = caps[1].trim().to_string();
            let heading_line = idx + 1;
            if name.is_empty() {
                issues.push(ScanIssue::EmptyRequirementName { line: heading_line });
            }

            // Body runs to the next requirement heading or EOF.
            let body_start = idx + 1;
            let mut body_end = body_start;
            while body_end < lines.len() && !requirement_re().is_match(lines[body_end]) {
                body_end += 1;
            }
            let body = join_lines(&lines[body_start..body_end]);
            let scenarios = scan_scenarios(&lines[body_start..body_end], body_start, &mut issues);

            requirements.push(Requirement {
                name,
                body,
                scenarios,
                line: heading_line,
            });
            idx = body_end;
        } else {
            idx += 1;
        }
    }

    let preamble = join_lines(&lines[..preamble_end.min(lines.len())]);
    SpecScan {
        spec: Spec {
            preamble,
            requirements,
        },
        issues,
    }
}

/// Parse a delta document strictly: rename-marker problems become errors.
pub fn parse_delta(text: &str) -> Result<Delta, ParseError> {
    let scan = scan_delta(text);
    for issue in &scan.issues {
        if let ScanIssue::UnpairedRenameMarker { line, marker } = issue {
            let marker = if marker == "FROM" { "TO" } else { "FROM" };
            return Err(ParseError::MissingRenameMarker {
                marker,
                line: *line,
            });
        }
    }
    Ok(scan.delta)
}

/// Lenient delta scan. Requirement blocks attach to the nearest preceding
/// operation heading; unknown level-2 headings and orphan blocks are
/// reported as issues.
pub fn scan_delta(text: &str) -> DeltaScan {
    let lines: Vec<&str> = text.lines().collect();
    let mut issues = Vec::new();
    let mut delta = Delta::default();
    let mut current_op: Option<usize> = None; // index into DELTA_HEADINGS

    let mut idx = 0;
    while idx < lines.len() {
        let line = lines[idx];
        let trimmed = line.trim_end();

        if trimmed.starts_with("## ") && !trimmed.starts_with("### ") {
            match DELTA_HEADINGS
                .iter()
                .position(|h| trimmed.eq_ignore_ascii_case(h))
            {
                Some(op) => {
                    current_op = Some(op);
                    delta.operations.push(DELTA_HEADINGS[op].to_string());
                }
                None => {
                    current_op = None;
                    issues.push(ScanIssue::UnknownOperation {
                        line: idx + 1,
                        heading: trimmed.to_string(),
                    });
                }
            }
            idx += 1;
            continue;
        }

        if let Some(caps) = requirement_re().captures(line) {
            let name = caps[1].trim().to_string();
            let heading_line = idx + 1;
            if name.is_empty() {
                issues.push(ScanIssue::EmptyRequirementName { line: heading_line });
            }

            // Block runs to the next requirement heading or operation heading.
            let body_start = idx + 1;
            let mut body_end = body_start;
            while body_end < lines.len()
                && !requirement_re().is_match(lines[body_end])
                && !is_level2_heading(lines[body_end])
            {
                body_end += 1;
            }
            let body = join_lines(&lines[body_start..body_end]);
            let scenarios = scan_scenarios(&lines[body_start..body_end], body_start, &mut issues);
            let req = Requirement {
                name: name.clone(),
                body,
                scenarios,
                line: heading_line,
            };

            match current_op {
                Some(0) => delta.added.push(req),
                Some(1) => delta.modified.push(req),
                Some(2) => delta.removed.push(req),
                Some(3) => {
                    // Rename markers live inside the block body.
                    collect_renames(
                        &lines[body_start..body_end],
                        body_start,
                        &mut delta.renamed,
                        &mut issues,
                    );
                }
                _ => issues.push(ScanIssue::OrphanRequirement {
                    line: heading_line,
                    name,
                }),
            }
            idx = body_end;
            continue;
        }

        // RENAMED sections may carry bare FROM/TO list entries without a
        // requirement heading.
        if current_op == Some(3) && rename_marker_re().is_match(line) {
            let mut end = idx;
            while end < lines.len()
                && !is_level2_heading(lines[end])
                && !requirement_re().is_match(lines[end])
            {
                end += 1;
            }
            collect_renames(&lines[idx..end], idx, &mut delta.renamed, &mut issues);
            idx = end;
            continue;
        }

        idx += 1;
    }

    DeltaScan { delta, issues }
}

fn is_level2_heading(line: &str) -> bool {
    let t = line.trim_end();
    t.starts_with("## ") && !t.starts_with("### ")
}

/// Scan FROM/TO marker pairs out of a RENAMED block. Markers must pair in
/// order; an unpaired marker is recorded as an issue.
fn collect_renames(
    lines: &[&str],
    offset: usize,
    renames: &mut Vec<Rename>,
    issues: &mut Vec<ScanIssue>,
) {
    let mut pending_from: Option<(String, usize)> = None;
    for (i, line) in lines.iter().enumerate() {
        let Some(caps) = rename_marker_re().captures(line) else {
            continue;
        };
        let marker = &caps[1];
        let value = clean_rename_name(&caps[2]);
        let line_no = offset + i + 1;
        match (marker, &pending_from) {
            ("FROM", None) => pending_from = Some((value, line_no)),
            ("FROM", Some((_, prev_line))) => {
                issues.push(ScanIssue::UnpairedRenameMarker {
                    line: *prev_line,
                    marker: "FROM".to_string(),
                });
                pending_from = Some((value, line_no));
            }
            ("TO", Some((from, from_line))) => {
                renames.push(Rename {
                    from: from.clone(),
                    to: value,
                    line: *from_line,
                });
                pending_from = None;
            }
            ("TO", None) => issues.push(ScanIssue::UnpairedRenameMarker {
                line: line_no,
                marker: "TO".to_string(),
            }),
            _ => {}
        }
    }
    if let Some((_, line)) = pending_from {
        issues.push(ScanIssue::UnpairedRenameMarker {
            line,
            marker: "FROM".to_string(),
        });
    }
}

/// Strip backticks and an optional `### Requirement:` prefix from a rename
/// marker value, leaving the bare requirement name.
fn clean_rename_name(raw: &str) -> String {
    let mut name = raw.trim().trim_matches('`').trim();
    if let Some(rest) = name.strip_prefix("### Requirement:") {
        name = rest.trim();
    }
    name.to_string()
}

fn scan_scenarios(lines: &[&str], offset: usize, issues: &mut Vec<ScanIssue>) -> Vec<Scenario> {
    let mut scenarios = Vec::new();
    let mut idx = 0;
    while idx < lines.len() {
        let line = lines[idx];
        if let Some(caps) = scenario_re().captures(line) {
            let name = caps[1].trim().to_string();
            let heading_line = offset + idx + 1;
            if name.is_empty() {
                issues.push(ScanIssue::EmptyScenarioName { line: heading_line });
            }
            let body_start = idx + 1;
            let mut body_end = body_start;
            while body_end < lines.len() && !is_any_heading(lines[body_end]) {
                body_end += 1;
            }
            scenarios.push(Scenario {
                name,
                body: join_lines(&lines[body_start..body_end]),
                line: heading_line,
            });
            idx = body_end;
        } else if line.trim_end().starts_with("#### ") {
            issues.push(ScanIssue::NonScenarioSubheading {
                line: offset + idx + 1,
                heading: line.trim_end().to_string(),
            });
            idx += 1;
        } else {
            idx += 1;
        }
    }
    scenarios
}

fn is_any_heading(line: &str) -> bool {
    let t = line.trim_end();
    t.starts_with("## ") || t.starts_with("### ") || t.starts_with("#### ")
}

fn join_lines(lines: &[&str]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut s = lines.join("\n");
    s.push('\n');
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = "\
# auth

Purpose prose.

### Requirement: Login

Users can log in.

#### Scenario: OK

- WHEN valid credentials
- THEN session created

### Requirement: Logout

#### Scenario: Clears session

- WHEN logout
- THEN session dropped
";

    #[test]
    fn test_parse_spec_requirements_and_scenarios() {
        let spec = parse_spec(SPEC);
        assert_eq!(spec.requirements.len(), 2);
        assert_eq!(spec.requirements[0].name, "Login");
        assert_eq!(spec.requirements[0].scenarios.len(), 1);
        assert_eq!(spec.requirements[0].scenarios[0].name, "OK");
        assert_eq!(spec.requirements[1].name, "Logout");
        assert!(spec.preamble.contains("Purpose prose."));
    }

    #[test]
    fn test_bodies_are_verbatim() {
        let spec = parse_spec(SPEC);
        assert!(spec.requirements[0].body.contains("Users can log in."));
        assert!(spec.requirements[0].body.contains("- WHEN valid credentials"));
    }

    #[test]
    fn test_roundtrip_is_structurally_stable() {
        let spec = parse_spec(SPEC);
        let reparsed = parse_spec(&spec.to_markdown());
        assert_eq!(spec.requirements, reparsed.requirements);
    }

    #[test]
    fn test_empty_requirement_name_is_an_issue() {
        let scan = scan_spec("### Requirement:\n\n#### Scenario: X\n- THEN ok\n");
        assert!(scan
            .issues
            .iter()
            .any(|i| matches!(i, ScanIssue::EmptyRequirementName { line: 1 })));
    }

    #[test]
    fn test_non_scenario_subheading_is_an_issue() {
        let text = "### Requirement: R\n\n#### Notes\n\n#### Scenario: S\n- THEN ok\n";
        let scan = scan_spec(text);
        assert!(scan
            .issues
            .iter()
            .any(|i| matches!(i, ScanIssue::NonScenarioSubheading { .. })));
        assert_eq!(scan.spec.requirements[0].scenarios.len(), 1);
    }

    const DELTA: &str = "\
# auth delta

## ADDED Requirements

### Requirement: MFA

Multi-factor auth.

#### Scenario: Enroll

- WHEN user enrolls
- THEN TOTP secret stored

## MODIFIED Requirements

### Requirement: Login

Login now requires MFA when enrolled.

#### Scenario: OK

- WHEN valid credentials and TOTP
- THEN session created

## REMOVED Requirements

### Requirement: Legacy Tokens

## RENAMED Requirements

- FROM: `### Requirement: Logout`
- TO: `### Requirement: Sign Out`
";

    #[test]
    fn test_parse_delta_sections() {
        let delta = parse_delta(DELTA).unwrap();
        assert_eq!(delta.added.len(), 1);
        assert_eq!(delta.added[0].name, "MFA");
        assert_eq!(delta.modified.len(), 1);
        assert_eq!(delta.removed.len(), 1);
        assert_eq!(delta.removed[0].name, "Legacy Tokens");
        assert_eq!(delta.renamed.len(), 1);
        assert_eq!(delta.renamed[0].from, "Logout");
        assert_eq!(delta.renamed[0].to, "Sign Out");
        assert_eq!(delta.operations.len(), 4);
    }

    #[test]
    fn test_rename_markers_inside_requirement_block() {
        let text = "\
## RENAMED Requirements

### Requirement: Sign Out

FROM: Logout
TO: Sign Out
";
        let delta = parse_delta(text).unwrap();
        assert_eq!(delta.renamed.len(), 1);
        assert_eq!(delta.renamed[0].from, "Logout");
        assert_eq!(delta.renamed[0].to, "Sign Out");
    }

    #[test]
    fn test_missing_to_marker_is_parse_error() {
        let text = "## RENAMED Requirements\n\n- FROM: Old Name\n";
        let err = parse_delta(text).unwrap_err();
        assert!(matches!(
            err,
            ParseError::MissingRenameMarker { marker: "TO", .. }
        ));
    }

    #[test]
    fn test_unknown_operation_heading_is_an_issue() {
        let text = "## CHANGED Requirements\n\n### Requirement: X\n";
        let scan = scan_delta(text);
        assert!(scan
            .issues
            .iter()
            .any(|i| matches!(i, ScanIssue::UnknownOperation { .. })));
        // The requirement under the unknown heading is an orphan.
        assert!(scan
            .issues
            .iter()
            .any(|i| matches!(i, ScanIssue::OrphanRequirement { .. })));
        assert!(scan.delta.is_empty());
    }

    #[test]
    fn test_operation_headings_case_insensitive() {
        let text = "## ADDED REQUIREMENTS\n\n### Requirement: X\n\n#### Scenario: S\n- THEN ok\n";
        let delta = parse_delta(text).unwrap();
        assert_eq!(delta.added.len(), 1);
    }

    #[test]
    fn test_prose_between_headings_preserved() {
        let text = "\
## ADDED Requirements

Intro prose for the section.

### Requirement: X

Body prose.

More body prose.

#### Scenario: S

- THEN ok
";
        let delta = parse_delta(text).unwrap();
        assert!(delta.added[0].body.contains("Body prose."));
        assert!(delta.added[0].body.contains("More body prose."));
    }
}
