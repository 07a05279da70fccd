//! Change archival
//!
//! Archiving a change validates it in strict mode, merges each of its
//! deltas into the matching base spec, and moves the change directory to
//! `archive/<YYYY-MM-DD>-<change-id>`, suffixing `-1`, `-2`, ... on
//! collision. Dry-run mode computes the full plan without touching the
//! filesystem. Spec writes are ordered by spec id; if any write fails the
//! directory is not moved and already-written specs are best-effort rolled
//! back to their previous bytes.

use crate::merger::{merge, MergeError, MergeReport};
use crate::parser::{parse_delta, parse_spec, ParseError, Spec};
use crate::store::{ChangeStatus, Store, StoreError, ARCHIVE_DIR, SPECS_DIR};
use crate::validator::{ValidationResult, Validator};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that abort an archive before any mutation happens.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive {change_id}: validation failed: {}", .result.summary)]
    ValidationFailed {
        change_id: String,
        result: ValidationResult,
    },

    #[error("merge delta {change_id}/{spec_id}: {source}")]
    Merge {
        change_id: String,
        spec_id: String,
        #[source]
        source: MergeError,
    },

    #[error("parse delta {change_id}/{spec_id}: {source}")]
    Parse {
        change_id: String,
        spec_id: String,
        #[source]
        source: ParseError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ArchiveOutcome<T> = Result<T, ArchiveError>;

/// Outcome of an archive request.
///
/// `errors` is non-empty when spec writes failed after validation; the
/// change directory is only moved when it is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveResult {
    pub change_id: String,
    /// Archive directory relative to the project root.
    pub archive_path: String,
    /// Spec ids whose base documents were (or, on dry-run, would be) updated.
    pub updated_specs: Vec<String>,
    pub errors: Vec<String>,
    pub dry_run: bool,
    /// Per-spec merge traces, keyed by spec id.
    pub reports: BTreeMap<String, MergeReport>,
}

impl ArchiveResult {
    /// Whether the change directory was moved into the archive.
    pub fn archived(&self) -> bool {
        !self.dry_run && self.errors.is_empty()
    }
}

/// The archival service.
pub struct Archiver {
    store: Store,
    validator: Validator,
}

struct StagedSpec {
    spec_id: String,
    merged: String,
    report: MergeReport,
    /// Previous document bytes, for rollback. None when the spec is new.
    previous: Option<String>,
}

impl Archiver {
    pub fn new(store: Store) -> Self {
        let validator = Validator::new(store.clone());
        Self { store, validator }
    }

    /// Run full change validation the way archive will.
    pub fn validate_before_archive(&self, change_id: &str, strict: bool) -> ValidationResult {
        self.validator.validate_change(change_id, strict)
    }

    /// Merge one delta onto its base spec without writing anything.
    /// Returns the merged document and the operation trace.
    pub fn merge_delta(
        &self,
        change_id: &str,
        spec_id: &str,
    ) -> ArchiveOutcome<(String, MergeReport)> {
        let staged = self.stage_spec(change_id, spec_id)?;
        Ok((staged.merged, staged.report))
    }

    /// Archive a change, dating the archive directory with today.
    pub fn archive(
        &self,
        change_id: &str,
        skip_specs: bool,
        dry_run: bool,
    ) -> ArchiveOutcome<ArchiveResult> {
        self.archive_on(change_id, skip_specs, dry_run, Utc::now().date_naive())
    }

    /// Archive with an explicit date; `archive` passes today.
    pub fn archive_on(
        &self,
        change_id: &str,
        skip_specs: bool,
        dry_run: bool,
        date: NaiveDate,
    ) -> ArchiveOutcome<ArchiveResult> {
        // Resolve the change directory first; a missing change fails fast.
        let exists = self
            .store
            .list_changes(Some(ChangeStatus::Active))?
            .iter()
            .any(|c| c.id == change_id);
        if !exists {
            return Err(StoreError::NotFound(
                Store::change_dir(change_id).display().to_string(),
            )
            .into());
        }

        if !dry_run && !skip_specs {
            let result = self.validator.validate_change(change_id, true);
            if !result.valid {
                return Err(ArchiveError::ValidationFailed {
                    change_id: change_id.to_string(),
                    result,
                });
            }
        }

        // Stage every merge in spec-id order before touching anything.
        let mut staged: Vec<StagedSpec> = Vec::new();
        if !skip_specs {
            for spec_id in self.store.list_deltas(change_id)? {
                staged.push(self.stage_spec(change_id, &spec_id)?);
            }
        }

        let archive_name = self.next_archive_name(change_id, date);
        let archive_path = format!("{}/{}", ARCHIVE_DIR, archive_name);
        let updated_specs: Vec<String> = staged.iter().map(|s| s.spec_id.clone()).collect();
        let reports: BTreeMap<String, MergeReport> = staged
            .iter()
            .map(|s| (s.spec_id.clone(), s.report.clone()))
            .collect();

        if dry_run {
            return Ok(ArchiveResult {
                change_id: change_id.to_string(),
                archive_path,
                updated_specs,
                errors: Vec::new(),
                dry_run: true,
                reports,
            });
        }

        // Write staged specs; collect failures instead of stopping.
        let mut errors = Vec::new();
        let mut written: Vec<&StagedSpec> = Vec::new();
        for spec in &staged {
            match self.store.write(Store::spec_path(&spec.spec_id), &spec.merged) {
                Ok(()) => written.push(spec),
                Err(e) => errors.push(format!("write spec {}: {}", spec.spec_id, e)),
            }
        }

        if errors.is_empty() {
            if let Err(e) = self.store.rename_dir(Store::change_dir(change_id), &archive_path) {
                errors.push(format!("move change {}: {}", change_id, e));
            }
        }

        if !errors.is_empty() {
            self.rollback(&written);
            log::warn!(
                "archive {} aborted with {} error(s); change left active",
                change_id,
                errors.len()
            );
        } else {
            log::info!(
                "archived {} to {} ({} spec(s) updated)",
                change_id,
                archive_path,
                updated_specs.len()
            );
        }

        Ok(ArchiveResult {
            change_id: change_id.to_string(),
            archive_path,
            updated_specs,
            errors,
            dry_run: false,
            reports,
        })
    }

    fn stage_spec(&self, change_id: &str, spec_id: &str) -> ArchiveOutcome<StagedSpec> {
        let delta_text = self.store.read(Store::delta_path(change_id, spec_id))?;
        let delta = parse_delta(&delta_text).map_err(|source| ArchiveError::Parse {
            change_id: change_id.to_string(),
            spec_id: spec_id.to_string(),
            source,
        })?;

        let previous = match self.store.read_spec(spec_id) {
            Ok(text) => Some(text),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        let base = match &previous {
            Some(text) => parse_spec(text),
            None => Spec {
                preamble: format!("# {}\n\n", spec_id),
                requirements: Vec::new(),
            },
        };

        let (merged, report) = merge(&base, &delta).map_err(|source| ArchiveError::Merge {
            change_id: change_id.to_string(),
            spec_id: spec_id.to_string(),
            source,
        })?;

        Ok(StagedSpec {
            spec_id: spec_id.to_string(),
            merged: merged.to_markdown(),
            report,
            previous,
        })
    }

    /// Restore previous spec bytes after a partial failure. Best-effort:
    /// rollback problems are logged, not raised.
    fn rollback(&self, written: &[&StagedSpec]) {
        for spec in written {
            let result = match &spec.previous {
                Some(text) => self.store.write(Store::spec_path(&spec.spec_id), text),
                None => self
                    .store
                    .delete_dir(std::path::Path::new(SPECS_DIR).join(&spec.spec_id)),
            };
            if let Err(e) = result {
                log::warn!("rollback of spec {} failed: {}", spec.spec_id, e);
            }
        }
    }

    /// `<date>-<change-id>`, appending `-1`, `-2`, ... until the name is
    /// free. Gives at-most-once semantics per change and date.
    fn next_archive_name(&self, change_id: &str, date: NaiveDate) -> String {
        let base = format!("{}-{}", date.format("%Y-%m-%d"), change_id);
        let archive_root = self.store.root().join(ARCHIVE_DIR);
        if !archive_root.join(&base).exists() {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{}-{}", base, n);
            if !archive_root.join(&candidate).exists() {
                return candidate;
            }
            n += 1;
        }
    }
}
