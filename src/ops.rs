//! Operation surface for transport adapters
//!
//! A thin facade bundling every service against one project root, the way
//! an adapter (stdio tool server, editor plugin) consumes the core: open a
//! toolkit for the request's root, call one operation, drop it. Service
//! errors unify into `anyhow::Error` at this seam with the operation and
//! identifier attached.

use crate::archiver::{ArchiveResult, Archiver};
use crate::auto_loop::LoopController;
use crate::registry::Registry;
use crate::store::{ChangeStatus, ChangeSummary, Store, DESIGN_FILE, PROPOSAL_FILE, TASKS_FILE};
use crate::validator::{ValidationResult, Validator};
use crate::workflow::WorkflowController;
use anyhow::{Context, Result};
use std::path::Path;

/// Everything a change directory holds, for `show`.
#[derive(Debug, Clone)]
pub struct ChangeDocuments {
    pub id: String,
    pub proposal: String,
    pub design: Option<String>,
    pub tasks: String,
    /// `(spec_id, delta text)` pairs, sorted by spec id.
    pub deltas: Vec<(String, String)>,
}

/// All services bound to one project root.
pub struct Toolkit {
    pub store: Store,
    pub validator: Validator,
    pub archiver: Archiver,
    pub registry: Registry,
    pub workflow: WorkflowController,
    pub auto_loop: LoopController,
}

impl Toolkit {
    /// Bind the full service set to a project root.
    pub fn open(root: impl AsRef<Path>) -> Self {
        let store = Store::new(root.as_ref());
        Self {
            validator: Validator::new(store.clone()),
            archiver: Archiver::new(store.clone()),
            registry: Registry::new(store.clone()),
            workflow: WorkflowController::new(store.clone()),
            auto_loop: LoopController::new(store.clone()),
            store,
        }
    }

    /// Initialize the project layout. Returns whether anything was created.
    pub fn init(&self) -> Result<bool> {
        self.store.init().context("init project root")
    }

    /// Ordered spec ids.
    pub fn list_specs(&self) -> Result<Vec<String>> {
        self.store.list_specs().context("list specs")
    }

    /// Changes, optionally filtered by status.
    pub fn list_changes(&self, status: Option<ChangeStatus>) -> Result<Vec<ChangeSummary>> {
        self.store.list_changes(status).context("list changes")
    }

    /// Full text of a base spec.
    pub fn show_spec(&self, spec_id: &str) -> Result<String> {
        self.store
            .read_spec(spec_id)
            .with_context(|| format!("show spec '{}'", spec_id))
    }

    /// Every document of an active change.
    pub fn show_change(&self, change_id: &str) -> Result<ChangeDocuments> {
        let read = |file: &str| {
            self.store
                .read(Store::change_file(change_id, file))
                .with_context(|| format!("show change '{}'", change_id))
        };
        let proposal = read(PROPOSAL_FILE)?;
        let tasks = read(TASKS_FILE)?;
        let design = self
            .store
            .read(Store::change_file(change_id, DESIGN_FILE))
            .ok();

        let mut deltas = Vec::new();
        for spec_id in self
            .store
            .list_deltas(change_id)
            .with_context(|| format!("show change '{}'", change_id))?
        {
            let text = self
                .store
                .read(Store::delta_path(change_id, &spec_id))
                .with_context(|| format!("show change '{}' delta '{}'", change_id, spec_id))?;
            deltas.push((spec_id, text));
        }

        Ok(ChangeDocuments {
            id: change_id.to_string(),
            proposal,
            design,
            tasks,
            deltas,
        })
    }

    /// Create a spec document.
    pub fn create_spec(&self, spec_id: &str, body: &str) -> Result<()> {
        self.store
            .create_spec(spec_id, body)
            .with_context(|| format!("create spec '{}'", spec_id))
    }

    /// Replace a spec document.
    pub fn update_spec(&self, spec_id: &str, body: &str) -> Result<()> {
        self.store
            .update_spec(spec_id, body)
            .with_context(|| format!("update spec '{}'", spec_id))
    }

    /// Delete a spec and its directory.
    pub fn delete_spec(&self, spec_id: &str) -> Result<()> {
        self.store
            .delete_spec(spec_id)
            .with_context(|| format!("delete spec '{}'", spec_id))
    }

    /// Create a change directory with its seed documents.
    pub fn create_change(&self, change_id: &str, proposal: &str, tasks: &str) -> Result<()> {
        self.store
            .create_change(change_id, proposal, tasks)
            .with_context(|| format!("create change '{}'", change_id))
    }

    /// Write a delta document into a change.
    pub fn write_delta(&self, change_id: &str, spec_id: &str, body: &str) -> Result<()> {
        self.store
            .write_delta(change_id, spec_id, body)
            .with_context(|| format!("write delta '{}/{}'", change_id, spec_id))
    }

    /// Delete an active change directory.
    pub fn delete_change(&self, change_id: &str) -> Result<()> {
        self.store
            .delete_change(change_id)
            .with_context(|| format!("delete change '{}'", change_id))
    }

    /// Validate one spec.
    pub fn validate_spec(&self, spec_id: &str, strict: bool) -> ValidationResult {
        self.validator.validate_spec(spec_id, strict)
    }

    /// Validate one change.
    pub fn validate_change(&self, change_id: &str, strict: bool) -> ValidationResult {
        self.validator.validate_change(change_id, strict)
    }

    /// Validate every spec and active change.
    pub fn validate_all(&self, strict: bool) -> ValidationResult {
        self.validator.validate_all(strict)
    }

    /// Archive a change, today-dated.
    pub fn archive(
        &self,
        change_id: &str,
        skip_specs: bool,
        dry_run: bool,
    ) -> Result<ArchiveResult> {
        self.archiver
            .archive(change_id, skip_specs, dry_run)
            .with_context(|| format!("archive change '{}'", change_id))
    }
}
