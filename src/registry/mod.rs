//! Task registry
//!
//! A YAML-backed store of every task aggregated across active changes,
//! with a dependency graph, derived `blocked_by` state, a deterministic
//! scheduler, and reconciliation from the `tasks.md` source documents.
//!
//! One registry instance per process mutates the on-disk file. Mutations
//! serialize through an in-process lock plus an fs2 advisory lock on a
//! sidecar lock file; readers take the shared lock and see a consistent
//! snapshot.

pub mod graph;
pub mod sync;
pub mod task;

use crate::store::{Store, StoreError, REGISTRY_FILE};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::sync::Mutex;
use thiserror::Error;

use graph::{DependencyGraph, GraphError};
use task::{
    compare_task_ids, split_task_id, task_id, Task, TaskPriority, TaskStatus,
};

/// Registry schema version written to the YAML document.
pub const REGISTRY_VERSION: &str = "1";

const LOCK_FILE: &str = ".registry.lock";

/// Errors surfaced by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("task {0}: not found")]
    NotFound(String),

    #[error("{0}: already exists")]
    AlreadyExists(String),

    #[error(transparent)]
    Cycle(#[from] GraphError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("registry.yaml: {0}")]
    Malformed(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Aggregate counters embedded in the persisted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    #[serde(default)]
    pub by_status: BTreeMap<String, usize>,
    #[serde(default)]
    pub by_priority: BTreeMap<String, usize>,
    #[serde(default)]
    pub by_change: BTreeMap<String, usize>,
}

impl RegistryStats {
    fn compute(tasks: &BTreeMap<String, Task>) -> Self {
        let mut stats = RegistryStats::default();
        for (id, task) in tasks {
            *stats.by_status.entry(task.status.to_string()).or_insert(0) += 1;
            *stats
                .by_priority
                .entry(task.priority.to_string())
                .or_insert(0) += 1;
            if let Some((change, _)) = split_task_id(id) {
                *stats.by_change.entry(change.to_string()).or_insert(0) += 1;
            }
        }
        stats
    }
}

/// The persisted registry document. Unknown keys round-trip untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryFile {
    pub version: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub stats: RegistryStats,
    #[serde(default)]
    pub tasks: BTreeMap<String, Task>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl RegistryFile {
    fn empty() -> Self {
        Self {
            version: REGISTRY_VERSION.to_string(),
            updated_at: Utc::now(),
            stats: RegistryStats::default(),
            tasks: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    fn build_graph(&self) -> DependencyGraph {
        DependencyGraph::from_edges(
            self.tasks
                .iter()
                .map(|(id, t)| (id.as_str(), t.depends_on.as_slice())),
        )
    }
}

/// A task together with its registry key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEntry {
    pub id: String,
    #[serde(flatten)]
    pub task: Task,
}

/// Filter for `list`. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub change_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee: Option<String>,
    /// Only tasks whose `blocked_by` is empty.
    pub unblocked: bool,
    pub limit: Option<usize>,
}

/// Field updates for a single task. Unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee: Option<String>,
    pub notes: Option<String>,
}

/// One-hop dependency neighborhood of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyNeighborhood {
    pub task_id: String,
    pub depends_on: Vec<String>,
    pub dependents: Vec<String>,
}

/// Outcome of `rebuild_from_source`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub total: usize,
}

/// The registry service.
pub struct Registry {
    store: Store,
    /// In-process serialization of mutating operations.
    mutate: Mutex<()>,
}

impl Registry {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            mutate: Mutex::new(()),
        }
    }

    /// Create an empty registry file. Fails if one is already present.
    pub fn init(&self) -> RegistryResult<()> {
        let _guard = self.guard();
        let lock = self.lock_exclusive()?;
        let result = (|| {
            if self.store.resolve(REGISTRY_FILE)?.exists() {
                return Err(RegistryError::AlreadyExists(REGISTRY_FILE.to_string()));
            }
            self.save(RegistryFile::empty())
        })();
        let _ = FileExt::unlock(&lock);
        result
    }

    /// List tasks matching a filter, in deterministic id order.
    pub fn list(&self, filter: &TaskFilter) -> RegistryResult<Vec<TaskEntry>> {
        let lock = self.lock_shared()?;
        let result = self.load();
        let _ = FileExt::unlock(&lock);
        let file = result?;

        let mut entries: Vec<TaskEntry> = file
            .tasks
            .into_iter()
            .filter(|(id, t)| Self::matches(id, t, filter))
            .map(|(id, task)| TaskEntry { id, task })
            .collect();
        entries.sort_by(|a, b| compare_task_ids(&a.id, &b.id));
        if let Some(limit) = filter.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    fn matches(id: &str, t: &Task, filter: &TaskFilter) -> bool {
        if let Some(change) = &filter.change_id {
            if split_task_id(id).map(|(c, _)| c) != Some(change.as_str()) {
                return false;
            }
        }
        if let Some(status) = filter.status {
            if t.status != status {
                return false;
            }
        }
        if let Some(priority) = filter.priority {
            if t.priority != priority {
                return false;
            }
        }
        if let Some(assignee) = &filter.assignee {
            if t.assignee.as_deref() != Some(assignee.as_str()) {
                return false;
            }
        }
        if filter.unblocked && !t.blocked_by.is_empty() {
            return false;
        }
        true
    }

    /// Fetch a single task by id.
    pub fn get(&self, id: &str) -> RegistryResult<TaskEntry> {
        let lock = self.lock_shared()?;
        let result = self.load();
        let _ = FileExt::unlock(&lock);
        let file = result?;
        file.tasks
            .get(id)
            .cloned()
            .map(|task| TaskEntry {
                id: id.to_string(),
                task,
            })
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Atomically update a single task. A status change re-derives
    /// `blocked_by` for every task that depends on this one.
    pub fn update(&self, id: &str, update: &TaskUpdate) -> RegistryResult<TaskEntry> {
        self.with_exclusive(|file| {
            let graph = file.build_graph();
            let task = file
                .tasks
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

            let old_status = task.status;
            if let Some(status) = update.status {
                task.status = status;
            }
            if let Some(priority) = update.priority {
                task.priority = priority;
            }
            if let Some(assignee) = &update.assignee {
                task.assignee = Some(assignee.clone());
            }
            if let Some(notes) = &update.notes {
                task.notes = Some(notes.clone());
            }
            task.updated_at = Utc::now();
            let entry = TaskEntry {
                id: id.to_string(),
                task: task.clone(),
            };

            if update.status.is_some() && update.status != Some(old_status) {
                for dependent in graph.dependents(id) {
                    Self::derive_blocked_by(&mut file.tasks, &dependent);
                }
            }
            Ok(entry)
        })
    }

    /// Add a dependency edge `id -> depends_on`. Refuses unknown tasks and
    /// cycle-introducing edges; a refused edge is never persisted.
    pub fn add_dependency(&self, id: &str, depends_on: &str) -> RegistryResult<TaskEntry> {
        self.with_exclusive(|file| {
            if !file.tasks.contains_key(id) {
                return Err(RegistryError::NotFound(id.to_string()));
            }
            if !file.tasks.contains_key(depends_on) {
                return Err(RegistryError::NotFound(depends_on.to_string()));
            }

            let mut graph = file.build_graph();
            graph.add_dependency(id, depends_on)?;

            if let Some(task) = file.tasks.get_mut(id) {
                if !task.depends_on.iter().any(|d| d == depends_on) {
                    task.depends_on.push(depends_on.to_string());
                }
                task.updated_at = Utc::now();
            }
            Self::derive_blocked_by(&mut file.tasks, id);
            Ok(TaskEntry {
                id: id.to_string(),
                task: file.tasks[id].clone(),
            })
        })
    }

    /// Remove a dependency edge. Removing an absent edge is a no-op.
    pub fn remove_dependency(&self, id: &str, depends_on: &str) -> RegistryResult<TaskEntry> {
        self.with_exclusive(|file| {
            let task = file
                .tasks
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            task.depends_on.retain(|d| d != depends_on);
            task.updated_at = Utc::now();
            Self::derive_blocked_by(&mut file.tasks, id);
            Ok(TaskEntry {
                id: id.to_string(),
                task: file.tasks[id].clone(),
            })
        })
    }

    /// Immediate dependencies and dependents of a task.
    pub fn get_dependency_graph(&self, id: &str) -> RegistryResult<DependencyNeighborhood> {
        let lock = self.lock_shared()?;
        let result = self.load();
        let _ = FileExt::unlock(&lock);
        let file = result?;
        if !file.tasks.contains_key(id) {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        let graph = file.build_graph();
        let mut dependents = graph.dependents(id);
        dependents.sort_by(|a, b| compare_task_ids(a, b));
        Ok(DependencyNeighborhood {
            task_id: id.to_string(),
            depends_on: file.tasks[id].depends_on.clone(),
            dependents,
        })
    }

    /// Deterministic scheduler: the top `count` pending, unblocked tasks
    /// ordered by priority, then change id, then dotted task num.
    ///
    /// A task inherits the priority of any open task it transitively
    /// blocks, so a low-priority task gating critical work schedules
    /// ahead of unrelated higher-priority tasks.
    pub fn next_task(&self, count: usize) -> RegistryResult<Vec<TaskEntry>> {
        let lock = self.lock_shared()?;
        let result = self.load();
        let _ = FileExt::unlock(&lock);
        let file = result?;
        let graph = file.build_graph();

        let mut candidates: Vec<(u8, TaskEntry)> = file
            .tasks
            .iter()
            .filter(|(_, t)| t.status == TaskStatus::Pending && t.blocked_by.is_empty())
            .map(|(id, task)| {
                (
                    Self::effective_rank(id, &file.tasks, &graph),
                    TaskEntry {
                        id: id.clone(),
                        task: task.clone(),
                    },
                )
            })
            .collect();
        candidates.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| compare_task_ids(&a.1.id, &b.1.id))
        });
        candidates.truncate(count);
        Ok(candidates.into_iter().map(|(_, entry)| entry).collect())
    }

    /// Best (lowest) priority rank among a task and the open tasks that
    /// transitively depend on it.
    fn effective_rank(
        id: &str,
        tasks: &BTreeMap<String, Task>,
        graph: &DependencyGraph,
    ) -> u8 {
        let mut best = tasks[id].priority.rank();
        let mut stack = graph.dependents(id);
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
        while let Some(dependent) = stack.pop() {
            if !seen.insert(dependent.clone()) {
                continue;
            }
            if let Some(task) = tasks.get(&dependent) {
                let open = task.status != TaskStatus::Completed
                    && task.status != TaskStatus::Cancelled;
                if open {
                    best = best.min(task.priority.rank());
                    stack.extend(graph.dependents(&dependent));
                }
            }
        }
        best
    }

    /// Counts by status, priority, and change.
    pub fn stats(&self) -> RegistryResult<RegistryStats> {
        let lock = self.lock_shared()?;
        let result = self.load();
        let _ = FileExt::unlock(&lock);
        Ok(RegistryStats::compute(&result?.tasks))
    }

    /// Reconcile the registry with the `tasks.md` documents of every
    /// active change. Tasks whose id persists keep their status, assignee,
    /// and notes; tasks no longer present in any source file are dropped.
    pub fn rebuild_from_source(&self) -> RegistryResult<SyncReport> {
        let _guard = self.guard();
        let lock = self.lock_exclusive()?;
        let result = self.rebuild_locked();
        let _ = FileExt::unlock(&lock);
        result
    }

    fn rebuild_locked(&self) -> RegistryResult<SyncReport> {
        let old = match self.load() {
            Ok(file) => file,
            Err(RegistryError::Store(StoreError::NotFound(_))) => RegistryFile::empty(),
            Err(e) => return Err(e),
        };

        let mut tasks: BTreeMap<String, Task> = BTreeMap::new();
        let mut report = SyncReport::default();

        for (change_id, path) in self.store.list_tasks()? {
            let text = std::fs::read_to_string(&path).map_err(|e| {
                RegistryError::Store(StoreError::Io {
                    path: path.display().to_string(),
                    source: e,
                })
            })?;
            for line in sync::parse_tasks(&text) {
                let id = task_id(&change_id, &line.num);
                let mut deps: Vec<String> = line
                    .depends
                    .iter()
                    .map(|d| sync::qualify_dependency(&change_id, d))
                    .collect();

                let task = match old.tasks.get(&id) {
                    Some(existing) => {
                        // Registry-owned state survives; document-owned
                        // fields refresh from the source line.
                        for dep in &existing.depends_on {
                            if !deps.contains(dep) {
                                deps.push(dep.clone());
                            }
                        }
                        let mut task = existing.clone();
                        task.title = line.title.clone();
                        if let Some(priority) = line.priority {
                            task.priority = priority;
                        }
                        if task.assignee.is_none() {
                            task.assignee = line.assignee.clone();
                        }
                        task.depends_on = deps;
                        task
                    }
                    None => {
                        let mut task = Task::new(line.title.clone());
                        task.status = if line.completed {
                            TaskStatus::Completed
                        } else {
                            TaskStatus::Pending
                        };
                        task.priority = line.priority.unwrap_or_default();
                        task.assignee = line.assignee.clone();
                        task.depends_on = deps;
                        task
                    }
                };
                tasks.insert(id, task);
            }
        }

        // Invariant: every dependency resolves to a registered task. Edges
        // pointing at vanished tasks are dropped with a warning.
        let known: Vec<String> = tasks.keys().cloned().collect();
        for (id, task) in tasks.iter_mut() {
            let before = task.depends_on.len();
            task.depends_on.retain(|d| known.binary_search(d).is_ok());
            if task.depends_on.len() != before {
                log::warn!("task {}: dropped dependencies on unknown tasks", id);
            }
        }

        // Refuse source files that introduce a dependency cycle.
        let graph = DependencyGraph::from_edges(
            tasks.iter().map(|(id, t)| (id.as_str(), t.depends_on.as_slice())),
        );
        graph.validate()?;

        for id in tasks.keys().cloned().collect::<Vec<_>>() {
            Self::derive_blocked_by(&mut tasks, &id);
        }

        for (id, task) in tasks.iter_mut() {
            match old.tasks.get(id) {
                None => report.added += 1,
                Some(previous) => {
                    if !Self::same_content(previous, task) {
                        task.updated_at = Utc::now();
                        report.updated += 1;
                    }
                }
            }
        }
        report.removed = old.tasks.keys().filter(|id| !tasks.contains_key(*id)).count();
        report.total = tasks.len();

        let mut file = old;
        file.tasks = tasks;
        self.save(file)?;

        log::info!(
            "registry rebuilt: {} added, {} updated, {} removed, {} total",
            report.added,
            report.updated,
            report.removed,
            report.total
        );
        Ok(report)
    }

    fn same_content(a: &Task, b: &Task) -> bool {
        a.title == b.title
            && a.priority == b.priority
            && a.assignee == b.assignee
            && a.depends_on == b.depends_on
            && a.blocked_by == b.blocked_by
    }

    /// `blocked_by(t) = { d in depends_on(t) | status(d) != completed }`.
    fn derive_blocked_by(tasks: &mut BTreeMap<String, Task>, id: &str) {
        let Some(task) = tasks.get(id) else {
            return;
        };
        let blocked: Vec<String> = task
            .depends_on
            .iter()
            .filter(|dep| {
                tasks
                    .get(*dep)
                    .map(|d| d.status != TaskStatus::Completed)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if let Some(task) = tasks.get_mut(id) {
            task.blocked_by = blocked;
        }
    }

    // ------------------------------------------------------------------
    // Persistence and locking
    // ------------------------------------------------------------------

    fn with_exclusive<T>(
        &self,
        f: impl FnOnce(&mut RegistryFile) -> RegistryResult<T>,
    ) -> RegistryResult<T> {
        let _guard = self.guard();
        let lock = self.lock_exclusive()?;
        let result = (|| {
            let mut file = self.load()?;
            let out = f(&mut file)?;
            self.save(file)?;
            Ok(out)
        })();
        let _ = FileExt::unlock(&lock);
        result
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.mutate.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load(&self) -> RegistryResult<RegistryFile> {
        let text = self.store.read(REGISTRY_FILE)?;
        serde_yaml::from_str(&text).map_err(|e| RegistryError::Malformed(e.to_string()))
    }

    fn save(&self, mut file: RegistryFile) -> RegistryResult<()> {
        file.version = REGISTRY_VERSION.to_string();
        file.updated_at = Utc::now();
        file.stats = RegistryStats::compute(&file.tasks);
        let text = serde_yaml::to_string(&file)
            .map_err(|e| RegistryError::Malformed(e.to_string()))?;
        self.store.write(REGISTRY_FILE, &text)?;
        Ok(())
    }

    fn open_lock_file(&self) -> RegistryResult<File> {
        let path = self.store.root().join(LOCK_FILE);
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                RegistryError::Store(StoreError::Io {
                    path: path.display().to_string(),
                    source: e,
                })
            })
    }

    fn lock_exclusive(&self) -> RegistryResult<File> {
        let file = self.open_lock_file()?;
        file.lock_exclusive().map_err(|e| {
            RegistryError::Store(StoreError::Io {
                path: LOCK_FILE.to_string(),
                source: e,
            })
        })?;
        Ok(file)
    }

    fn lock_shared(&self) -> RegistryResult<File> {
        let file = self.open_lock_file()?;
        file.lock_shared().map_err(|e| {
            RegistryError::Store(StoreError::Io {
                path: LOCK_FILE.to_string(),
                source: e,
            })
        })?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry() -> (TempDir, Registry) {
        let temp = TempDir::new().unwrap();
        let store = Store::new(temp.path());
        store.init().unwrap();
        let registry = Registry::new(store);
        registry.init().unwrap();
        (temp, registry)
    }

    fn seed_change(registry: &Registry, change: &str, tasks_md: &str) {
        registry
            .store
            .create_change(change, "## Why\nbecause\n", tasks_md)
            .unwrap();
        registry.rebuild_from_source().unwrap();
    }

    #[test]
    fn test_init_refuses_existing() {
        let (_temp, registry) = registry();
        assert!(matches!(
            registry.init().unwrap_err(),
            RegistryError::AlreadyExists(_)
        ));
    }

    #[test]
    fn test_rebuild_and_list() {
        let (_temp, registry) = registry();
        seed_change(
            &registry,
            "add-mfa",
            "- [ ] 1.1 Schema\n- [x] 1.2 Endpoint\n",
        );

        let all = registry.list(&TaskFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "add-mfa/1.1");
        assert_eq!(all[0].task.status, TaskStatus::Pending);
        assert_eq!(all[1].task.status, TaskStatus::Completed);
    }

    #[test]
    fn test_update_propagates_blocked_by() {
        let (_temp, registry) = registry();
        seed_change(
            &registry,
            "add-mfa",
            "- [ ] 1.1 Schema\n- [ ] 1.2 Endpoint [depends: 1.1]\n",
        );

        let blocked = registry.get("add-mfa/1.2").unwrap();
        assert_eq!(blocked.task.blocked_by, vec!["add-mfa/1.1"]);

        registry
            .update(
                "add-mfa/1.1",
                &TaskUpdate {
                    status: Some(TaskStatus::Completed),
                    ..Default::default()
                },
            )
            .unwrap();

        let unblocked = registry.get("add-mfa/1.2").unwrap();
        assert!(unblocked.task.blocked_by.is_empty());
    }

    #[test]
    fn test_add_dependency_refuses_cycle() {
        let (_temp, registry) = registry();
        seed_change(
            &registry,
            "chg",
            "- [ ] 1 A\n- [ ] 2 B\n- [ ] 3 C\n",
        );

        registry.add_dependency("chg/1", "chg/2").unwrap();
        registry.add_dependency("chg/2", "chg/3").unwrap();
        registry.add_dependency("chg/1", "chg/3").unwrap();

        let err = registry.add_dependency("chg/3", "chg/1").unwrap_err();
        assert!(matches!(err, RegistryError::Cycle(_)));

        // Refused edge is not persisted.
        let task = registry.get("chg/3").unwrap();
        assert!(task.task.depends_on.is_empty());
    }

    #[test]
    fn test_self_dependency_refused() {
        let (_temp, registry) = registry();
        seed_change(&registry, "chg", "- [ ] 1 A\n");
        assert!(matches!(
            registry.add_dependency("chg/1", "chg/1").unwrap_err(),
            RegistryError::Cycle(_)
        ));
    }

    #[test]
    fn test_dependency_on_unknown_task_is_not_found() {
        let (_temp, registry) = registry();
        seed_change(&registry, "chg", "- [ ] 1 A\n");
        assert!(matches!(
            registry.add_dependency("chg/1", "chg/99").unwrap_err(),
            RegistryError::NotFound(_)
        ));
    }

    #[test]
    fn test_next_task_scheduler() {
        let (_temp, registry) = registry();
        seed_change(
            &registry,
            "chg",
            "- [ ] 1 High task [priority: high]\n\
             - [ ] 2 Critical but blocked [priority: critical] [depends: 3]\n\
             - [ ] 3 Low task [priority: low]\n",
        );

        let next = registry.next_task(2).unwrap();
        assert_eq!(next.len(), 2);
        // chg/2 is blocked by chg/3 and excluded. chg/3 inherits the
        // critical priority of the task it gates, so it schedules first.
        assert_eq!(next[0].id, "chg/3");
        assert_eq!(next[1].id, "chg/1");
    }

    #[test]
    fn test_next_task_num_ordering() {
        let (_temp, registry) = registry();
        seed_change(
            &registry,
            "chg",
            "- [ ] 1.10 Later\n- [ ] 1.2 Earlier\n- [ ] 2 Last\n",
        );
        let next = registry.next_task(10).unwrap();
        let ids: Vec<&str> = next.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["chg/1.2", "chg/1.10", "chg/2"]);
    }

    #[test]
    fn test_rebuild_preserves_registry_owned_state() {
        let (_temp, registry) = registry();
        seed_change(&registry, "chg", "- [ ] 1 A\n- [ ] 2 B\n");

        registry
            .update(
                "chg/1",
                &TaskUpdate {
                    status: Some(TaskStatus::InProgress),
                    assignee: Some("alice".to_string()),
                    notes: Some("halfway".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        // Source file changes title of 1 and drops 2.
        registry
            .store
            .write("changes/chg/tasks.md", "- [ ] 1 A renamed\n- [ ] 3 C\n")
            .unwrap();
        let report = registry.rebuild_from_source().unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(report.total, 2);

        let task = registry.get("chg/1").unwrap().task;
        assert_eq!(task.title, "A renamed");
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.assignee.as_deref(), Some("alice"));
        assert_eq!(task.notes.as_deref(), Some("halfway"));

        assert!(matches!(
            registry.get("chg/2").unwrap_err(),
            RegistryError::NotFound(_)
        ));
    }

    #[test]
    fn test_rebuild_refuses_cyclic_source() {
        let (_temp, registry) = registry();
        registry
            .store
            .create_change(
                "chg",
                "p",
                "- [ ] 1 A [depends: 2]\n- [ ] 2 B [depends: 1]\n",
            )
            .unwrap();
        assert!(matches!(
            registry.rebuild_from_source().unwrap_err(),
            RegistryError::Cycle(_)
        ));
    }

    #[test]
    fn test_stats() {
        let (_temp, registry) = registry();
        seed_change(
            &registry,
            "chg",
            "- [ ] 1 A [priority: high]\n- [x] 2 B\n",
        );
        let stats = registry.stats().unwrap();
        assert_eq!(stats.by_status.get("pending"), Some(&1));
        assert_eq!(stats.by_status.get("completed"), Some(&1));
        assert_eq!(stats.by_priority.get("high"), Some(&1));
        assert_eq!(stats.by_change.get("chg"), Some(&2));
    }

    #[test]
    fn test_unknown_yaml_keys_roundtrip() {
        let (_temp, registry) = registry();
        seed_change(&registry, "chg", "- [ ] 1 A\n");

        // Inject an unknown top-level key the way an external tool might.
        let raw = registry.store.read(REGISTRY_FILE).unwrap();
        let amended = format!("{}\ncustom_marker: kept\n", raw.trim_end());
        registry.store.write(REGISTRY_FILE, &amended).unwrap();

        registry
            .update(
                "chg/1",
                &TaskUpdate {
                    status: Some(TaskStatus::Completed),
                    ..Default::default()
                },
            )
            .unwrap();

        let roundtripped = registry.store.read(REGISTRY_FILE).unwrap();
        assert!(roundtripped.contains("custom_marker: kept"));
    }

    #[test]
    fn test_dependency_neighborhood() {
        let (_temp, registry) = registry();
        seed_change(&registry, "chg", "- [ ] 1 A\n- [ ] 2 B\n- [ ] 3 C\n");
        registry.add_dependency("chg/2", "chg/1").unwrap();
        registry.add_dependency("chg/3", "chg/1").unwrap();

        let hood = registry.get_dependency_graph("chg/1").unwrap();
        assert!(hood.depends_on.is_empty());
        assert_eq!(hood.dependents, vec!["chg/2", "chg/3"]);
    }

    #[test]
    fn test_list_filters() {
        let (_temp, registry) = registry();
        seed_change(
            &registry,
            "chg",
            "- [ ] 1 A [priority: high]\n- [ ] 2 B [depends: 1]\n",
        );
        let unblocked = registry
            .list(&TaskFilter {
                unblocked: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(unblocked.len(), 1);
        assert_eq!(unblocked[0].id, "chg/1");

        let high = registry
            .list(&TaskFilter {
                priority: Some(TaskPriority::High),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(high.len(), 1);

        let limited = registry
            .list(&TaskFilter {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);
    }
}
