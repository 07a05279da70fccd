//! Project-root file store
//!
//! Every entity the toolkit manages is a file under a single project root:
//! `specs/<spec-id>/spec.md`, `changes/<change-id>/...`, the date-prefixed
//! `archive/` tree, `registry.yaml`, and the dot-file state documents. The
//! store owns path resolution, containment checks, and atomic writes; it
//! holds no state beyond the root path.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Directory holding durable specifications.
pub const SPECS_DIR: &str = "specs";
/// Directory holding in-flight change proposals.
pub const CHANGES_DIR: &str = "changes";
/// Directory holding archived changes.
pub const ARCHIVE_DIR: &str = "archive";

/// Canonical file names inside spec and change directories.
pub const SPEC_FILE: &str = "spec.md";
pub const PROPOSAL_FILE: &str = "proposal.md";
pub const DESIGN_FILE: &str = "design.md";
pub const TASKS_FILE: &str = "tasks.md";

/// Root-level state documents.
pub const REGISTRY_FILE: &str = "registry.yaml";
pub const WORKFLOW_STATE_FILE: &str = ".workflow-state.yaml";
pub const LOOP_STATE_FILE: &str = ".loop-state.yaml";
pub const CONFIG_FILE: &str = ".specdeck.yaml";

/// Errors surfaced by store operations.
///
/// Callers treat `NotFound` and `AlreadyExists` as domain signals; `Io` is
/// fatal for the request that hit it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}: not found")]
    NotFound(String),

    #[error("{0}: already exists")]
    AlreadyExists(String),

    #[error("{0}: escapes project root")]
    PathEscape(String),

    #[error("invalid identifier '{0}': expected kebab-case")]
    InvalidId(String),

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Lifecycle status of a change, derived from its location on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    /// Still under `changes/`.
    Active,
    /// Moved under `archive/` with a date prefix.
    Archived,
}

impl std::fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeStatus::Active => write!(f, "active"),
            ChangeStatus::Archived => write!(f, "archived"),
        }
    }
}

/// Minimal listing entry for a change directory.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChangeSummary {
    pub id: String,
    pub status: ChangeStatus,
    /// Archive directory name (`<YYYY-MM-DD>-<id>[-<N>]`), present once archived.
    pub archive_name: Option<String>,
}

/// Check that an identifier is kebab-case (`[a-z0-9][a-z0-9-]*`).
pub fn is_valid_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// File store bound to a project root.
///
/// Cheap to construct; every operation reopens the files it touches.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Bind a store to a project root. The root does not need to exist yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The project root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the root has been initialized (has a `specs/` directory).
    pub fn exists(&self) -> bool {
        self.root.join(SPECS_DIR).is_dir()
    }

    /// Create the project layout. Returns `true` when directories were
    /// created, `false` when the root was already initialized.
    pub fn init(&self) -> StoreResult<bool> {
        if self.exists() {
            return Ok(false);
        }
        for dir in [SPECS_DIR, CHANGES_DIR, ARCHIVE_DIR] {
            let path = self.root.join(dir);
            fs::create_dir_all(&path).map_err(|e| StoreError::io(&path, e))?;
        }
        log::info!("initialized project root at {}", self.root.display());
        Ok(true)
    }

    /// Resolve a relative path under the root, rejecting anything that
    /// would escape it (absolute paths, `..` components).
    pub fn resolve(&self, relative: impl AsRef<Path>) -> StoreResult<PathBuf> {
        let relative = relative.as_ref();
        if relative.is_absolute() {
            return Err(StoreError::PathEscape(relative.display().to_string()));
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(StoreError::PathEscape(relative.display().to_string())),
            }
        }
        Ok(self.root.join(relative))
    }

    /// Read a file under the root as UTF-8 text.
    pub fn read(&self, relative: impl AsRef<Path>) -> StoreResult<String> {
        let path = self.resolve(&relative)?;
        match fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(relative.as_ref().display().to_string()))
            }
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Write a file under the root, creating intermediate directories.
    ///
    /// The write goes to a temp sibling first and is renamed into place, so
    /// readers never observe a partial file.
    pub fn write(&self, relative: impl AsRef<Path>, contents: &str) -> StoreResult<()> {
        let path = self.resolve(&relative)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        atomic_write(&path, contents)?;
        log::debug!("wrote {}", path.display());
        Ok(())
    }

    /// Delete a single file.
    pub fn delete_file(&self, relative: impl AsRef<Path>) -> StoreResult<()> {
        let path = self.resolve(&relative)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(relative.as_ref().display().to_string()))
            }
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Recursively delete a directory.
    pub fn delete_dir(&self, relative: impl AsRef<Path>) -> StoreResult<()> {
        let path = self.resolve(&relative)?;
        match fs::remove_dir_all(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(relative.as_ref().display().to_string()))
            }
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Rename a directory under the root. Used by archival; fails if the
    /// destination already exists.
    pub fn rename_dir(
        &self,
        from: impl AsRef<Path>,
        to: impl AsRef<Path>,
    ) -> StoreResult<()> {
        let from_path = self.resolve(&from)?;
        let to_path = self.resolve(&to)?;
        if !from_path.is_dir() {
            return Err(StoreError::NotFound(from.as_ref().display().to_string()));
        }
        if to_path.exists() {
            return Err(StoreError::AlreadyExists(to.as_ref().display().to_string()));
        }
        if let Some(parent) = to_path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        fs::rename(&from_path, &to_path).map_err(|e| StoreError::io(&from_path, e))
    }

    // ------------------------------------------------------------------
    // Layout helpers
    // ------------------------------------------------------------------

    /// Relative path of a base spec document.
    pub fn spec_path(spec_id: &str) -> PathBuf {
        Path::new(SPECS_DIR).join(spec_id).join(SPEC_FILE)
    }

    /// Relative path of an active change directory.
    pub fn change_dir(change_id: &str) -> PathBuf {
        Path::new(CHANGES_DIR).join(change_id)
    }

    /// Relative path of a file inside an active change directory.
    pub fn change_file(change_id: &str, file: &str) -> PathBuf {
        Self::change_dir(change_id).join(file)
    }

    /// Relative path of a delta document inside a change.
    pub fn delta_path(change_id: &str, spec_id: &str) -> PathBuf {
        Self::change_dir(change_id)
            .join(SPECS_DIR)
            .join(format!("{}.md", spec_id))
    }

    // ------------------------------------------------------------------
    // Typed entity operations
    // ------------------------------------------------------------------

    /// Create a new spec document. Fails with `AlreadyExists` if the spec
    /// is already present.
    pub fn create_spec(&self, spec_id: &str, body: &str) -> StoreResult<()> {
        require_valid_id(spec_id)?;
        let rel = Self::spec_path(spec_id);
        if self.resolve(&rel)?.exists() {
            return Err(StoreError::AlreadyExists(rel.display().to_string()));
        }
        self.write(rel, body)
    }

    /// Replace the body of an existing spec document.
    pub fn update_spec(&self, spec_id: &str, body: &str) -> StoreResult<()> {
        require_valid_id(spec_id)?;
        let rel = Self::spec_path(spec_id);
        if !self.resolve(&rel)?.exists() {
            return Err(StoreError::NotFound(rel.display().to_string()));
        }
        self.write(rel, body)
    }

    /// Read a spec document body.
    pub fn read_spec(&self, spec_id: &str) -> StoreResult<String> {
        self.read(Self::spec_path(spec_id))
    }

    /// Delete a spec and its directory.
    pub fn delete_spec(&self, spec_id: &str) -> StoreResult<()> {
        require_valid_id(spec_id)?;
        self.delete_dir(Path::new(SPECS_DIR).join(spec_id))
    }

    /// Create a change directory seeded with a proposal and tasks document.
    pub fn create_change(
        &self,
        change_id: &str,
        proposal: &str,
        tasks: &str,
    ) -> StoreResult<()> {
        require_valid_id(change_id)?;
        let dir = Self::change_dir(change_id);
        if self.resolve(&dir)?.exists() {
            return Err(StoreError::AlreadyExists(dir.display().to_string()));
        }
        self.write(Self::change_file(change_id, PROPOSAL_FILE), proposal)?;
        self.write(Self::change_file(change_id, TASKS_FILE), tasks)
    }

    /// Write (create or replace) a delta document for a spec inside a change.
    pub fn write_delta(&self, change_id: &str, spec_id: &str, body: &str) -> StoreResult<()> {
        require_valid_id(change_id)?;
        require_valid_id(spec_id)?;
        if !self.resolve(Self::change_dir(change_id))?.is_dir() {
            return Err(StoreError::NotFound(
                Self::change_dir(change_id).display().to_string(),
            ));
        }
        self.write(Self::delta_path(change_id, spec_id), body)
    }

    /// Delete an entire active change directory.
    pub fn delete_change(&self, change_id: &str) -> StoreResult<()> {
        require_valid_id(change_id)?;
        self.delete_dir(Self::change_dir(change_id))
    }

    // ------------------------------------------------------------------
    // Listing primitives
    // ------------------------------------------------------------------

    /// List spec ids, sorted.
    pub fn list_specs(&self) -> StoreResult<Vec<String>> {
        let mut ids = self.list_subdirs(SPECS_DIR)?;
        ids.retain(|id| self.root.join(SPECS_DIR).join(id).join(SPEC_FILE).is_file());
        ids.sort();
        Ok(ids)
    }

    /// List changes, optionally filtered by status. Active changes come
    /// from `changes/`, archived ones from `archive/`.
    pub fn list_changes(&self, status: Option<ChangeStatus>) -> StoreResult<Vec<ChangeSummary>> {
        let mut changes = Vec::new();

        if status != Some(ChangeStatus::Archived) {
            for id in self.list_subdirs(CHANGES_DIR)? {
                changes.push(ChangeSummary {
                    id,
                    status: ChangeStatus::Active,
                    archive_name: None,
                });
            }
        }

        if status != Some(ChangeStatus::Active) {
            for name in self.list_subdirs(ARCHIVE_DIR)? {
                changes.push(ChangeSummary {
                    id: strip_archive_prefix(&name).to_string(),
                    status: ChangeStatus::Archived,
                    archive_name: Some(name),
                });
            }
        }

        changes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(changes)
    }

    /// List the `tasks.md` file of every active change, as
    /// `(change_id, absolute path)` pairs sorted by change id.
    pub fn list_tasks(&self) -> StoreResult<Vec<(String, PathBuf)>> {
        let mut out = Vec::new();
        for id in self.list_subdirs(CHANGES_DIR)? {
            let path = self.root.join(CHANGES_DIR).join(&id).join(TASKS_FILE);
            if path.is_file() {
                out.push((id, path));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    /// List delta spec ids (`<spec-id>.md` files) inside a change, sorted
    /// lexicographically for reproducible archive ordering.
    pub fn list_deltas(&self, change_id: &str) -> StoreResult<Vec<String>> {
        let dir = self.root.join(CHANGES_DIR).join(change_id).join(SPECS_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            let path = entry.path();
            if path.is_file() && path.extension().map(|e| e == "md").unwrap_or(false) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// List top-level file names in an active change directory.
    pub fn list_change_files(&self, change_id: &str) -> StoreResult<Vec<String>> {
        let dir = self.root.join(CHANGES_DIR).join(change_id);
        if !dir.is_dir() {
            return Err(StoreError::NotFound(
                Self::change_dir(change_id).display().to_string(),
            ));
        }
        let entries = fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            if entry.path().is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn list_subdirs(&self, dir: &str) -> StoreResult<Vec<String>> {
        let path = self.root.join(dir);
        if !path.is_dir() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&path).map_err(|e| StoreError::io(&path, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&path, e))?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        Ok(names)
    }
}

fn require_valid_id(id: &str) -> StoreResult<()> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

/// Strip the `<YYYY-MM-DD>-` date prefix from an archive directory name.
/// A trailing collision suffix (`-1`, `-2`, ...) is kept in the returned
/// id, so same-day re-archives of one change list under distinct ids.
pub fn strip_archive_prefix(name: &str) -> &str {
    // Date prefix is exactly 10 chars plus the joining dash.
    if name.len() > 11 && name.as_bytes()[10] == b'-' {
        let (prefix, rest) = name.split_at(10);
        if prefix.chars().filter(|c| *c == '-').count() == 2
            && prefix.chars().all(|c| c.is_ascii_digit() || c == '-')
        {
            return &rest[1..];
        }
    }
    name
}

/// Write `contents` to `path` via a temp sibling and rename, so the write
/// is atomic within a single filesystem.
pub fn atomic_write(path: &Path, contents: &str) -> StoreResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    fs::write(&tmp, contents).map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, Store) {
        let temp = TempDir::new().unwrap();
        let store = Store::new(temp.path());
        store.init().unwrap();
        (temp, store)
    }

    #[test]
    fn test_init_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = Store::new(temp.path());
        assert!(!store.exists());
        assert!(store.init().unwrap());
        assert!(store.exists());
        assert!(!store.init().unwrap());
    }

    #[test]
    fn test_write_read_roundtrip() {
        let (_temp, store) = store();
        store.write("specs/auth/spec.md", "# auth").unwrap();
        assert_eq!(store.read("specs/auth/spec.md").unwrap(), "# auth");
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let (_temp, store) = store();
        let err = store.read("specs/nope/spec.md").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_path_containment() {
        let (_temp, store) = store();
        assert!(matches!(
            store.read("../outside.md").unwrap_err(),
            StoreError::PathEscape(_)
        ));
        assert!(matches!(
            store.write("/etc/passwd", "x").unwrap_err(),
            StoreError::PathEscape(_)
        ));
        assert!(matches!(
            store.read("specs/../../up.md").unwrap_err(),
            StoreError::PathEscape(_)
        ));
    }

    #[test]
    fn test_create_spec_refuses_duplicate() {
        let (_temp, store) = store();
        store.create_spec("auth", "body").unwrap();
        let err = store.create_spec("auth", "other").unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn test_update_spec_requires_existing() {
        let (_temp, store) = store();
        let err = store.update_spec("auth", "body").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_invalid_id_rejected() {
        let (_temp, store) = store();
        assert!(matches!(
            store.create_spec("Bad Name", "x").unwrap_err(),
            StoreError::InvalidId(_)
        ));
        assert!(matches!(
            store.create_spec("-leading", "x").unwrap_err(),
            StoreError::InvalidId(_)
        ));
    }

    #[test]
    fn test_is_valid_id() {
        assert!(is_valid_id("add-mfa"));
        assert!(is_valid_id("a"));
        assert!(is_valid_id("2fa-login"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("Add-MFA"));
        assert!(!is_valid_id("spaced id"));
    }

    #[test]
    fn test_list_specs_and_changes() {
        let (_temp, store) = store();
        store.create_spec("auth", "a").unwrap();
        store.create_spec("billing", "b").unwrap();
        store.create_change("add-mfa", "why", "- [ ] 1.1 t").unwrap();

        assert_eq!(store.list_specs().unwrap(), vec!["auth", "billing"]);

        let active = store.list_changes(Some(ChangeStatus::Active)).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "add-mfa");
        assert!(active[0].archive_name.is_none());
    }

    #[test]
    fn test_archived_change_listing() {
        let (_temp, store) = store();
        store.create_change("add-mfa", "why", "tasks").unwrap();
        store
            .rename_dir("changes/add-mfa", "archive/2026-01-20-add-mfa")
            .unwrap();

        let archived = store.list_changes(Some(ChangeStatus::Archived)).unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].id, "add-mfa");
        assert_eq!(
            archived[0].archive_name.as_deref(),
            Some("2026-01-20-add-mfa")
        );
        assert!(store
            .list_changes(Some(ChangeStatus::Active))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_strip_archive_prefix() {
        assert_eq!(strip_archive_prefix("2026-01-20-add-mfa"), "add-mfa");
        assert_eq!(strip_archive_prefix("2026-01-20-add-mfa-1"), "add-mfa-1");
        assert_eq!(strip_archive_prefix("not-dated"), "not-dated");
    }

    #[test]
    fn test_list_deltas_sorted() {
        let (_temp, store) = store();
        store.create_change("add-mfa", "why", "tasks").unwrap();
        store.write_delta("add-mfa", "users", "## ADDED Requirements").unwrap();
        store.write_delta("add-mfa", "auth", "## ADDED Requirements").unwrap();
        assert_eq!(store.list_deltas("add-mfa").unwrap(), vec!["auth", "users"]);
    }

    #[test]
    fn test_delete_dir_and_file() {
        let (_temp, store) = store();
        store.create_change("tmp-change", "p", "t").unwrap();
        store.delete_file("changes/tmp-change/proposal.md").unwrap();
        assert!(matches!(
            store.read("changes/tmp-change/proposal.md").unwrap_err(),
            StoreError::NotFound(_)
        ));
        store.delete_change("tmp-change").unwrap();
        assert!(store
            .list_changes(Some(ChangeStatus::Active))
            .unwrap()
            .is_empty());
    }
}
