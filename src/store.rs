//! High-level store API for Tangle.
//!
//! `Store` owns the storage handle and configuration. Repository operations
//! (create, read, update, hierarchy, logs, labels) live here; the graph,
//! lifecycle and merge engines add their own `impl Store` blocks.

use crate::config::Config;
use crate::graph;
use crate::id::generate_id;
use crate::storage::{self, ItemFilter, Storage};
use crate::types::{validate_label, validate_title, Item, ItemType, LogEntry, Status, ValidationError};
use chrono::Utc;
use eyre::{Context, Result};
use log::{debug, info};
use rusqlite::Connection;
use std::collections::{HashSet, VecDeque};
use std::path::Path;

/// Broad failure classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    GuardViolation,
    CycleDetected,
}

/// Errors that can occur during store operations.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Item not found.
    ItemNotFound(String),
    /// Dependency edge not found.
    DependencyNotFound { item_id: String, depends_on: String },
    /// An item cannot depend on itself.
    SelfDependency(String),
    /// The pair is already related as parent/child.
    HierarchyConflict { item_id: String, depends_on: String },
    /// The new parent is the item itself or one of its descendants.
    ParentCycle { item_id: String, parent_id: String },
    /// Source and target of a merge are the same item.
    MergeSameItem(String),
    /// The merge target sits below the source in the hierarchy.
    MergeIntoDescendant { source_id: String, target_id: String },
    /// Adding this edge would create a cycle.
    CycleDetected { item_id: String, depends_on: String },
    /// Merging would make the target depend on itself.
    MergeCycle { source_id: String, target_id: String },
    /// Closed items cannot take new children.
    ParentClosed { parent_id: String, status: Status },
    /// Closing blocked by children that are still open.
    OpenChildren { id: String, children: Vec<String> },
    /// Closing or deleting blocked by items that still depend on this one.
    HasDependents { id: String, dependents: Vec<String> },
    /// Deleting blocked by children.
    HasChildren { id: String, count: usize },
    /// Validation error.
    Validation(ValidationError),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::ItemNotFound(_) | StoreError::DependencyNotFound { .. } => ErrorKind::NotFound,
            StoreError::SelfDependency(_)
            | StoreError::HierarchyConflict { .. }
            | StoreError::ParentCycle { .. }
            | StoreError::MergeSameItem(_)
            | StoreError::MergeIntoDescendant { .. }
            | StoreError::Validation(_) => ErrorKind::Validation,
            StoreError::CycleDetected { .. } | StoreError::MergeCycle { .. } => ErrorKind::CycleDetected,
            StoreError::ParentClosed { .. }
            | StoreError::OpenChildren { .. }
            | StoreError::HasDependents { .. }
            | StoreError::HasChildren { .. } => ErrorKind::GuardViolation,
        }
    }

    /// Classify a report, if it carries a `StoreError`.
    pub fn kind_of(report: &eyre::Report) -> Option<ErrorKind> {
        report.downcast_ref::<StoreError>().map(StoreError::kind)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::ItemNotFound(id) => write!(f, "item not found: {}", id),
            StoreError::DependencyNotFound { item_id, depends_on } => {
                write!(f, "dependency not found: {} does not depend on {}", item_id, depends_on)
            }
            StoreError::SelfDependency(id) => write!(f, "{} cannot depend on itself", id),
            StoreError::HierarchyConflict { item_id, depends_on } => write!(
                f,
                "{} and {} are parent and child; they cannot also depend on each other",
                item_id, depends_on
            ),
            StoreError::ParentCycle { item_id, parent_id } => {
                write!(f, "{} cannot become a child of {}: it is its own ancestor", parent_id, item_id)
            }
            StoreError::MergeSameItem(id) => write!(f, "cannot merge {} into itself", id),
            StoreError::MergeIntoDescendant { source_id, target_id } => {
                write!(f, "cannot merge {} into its descendant {}", source_id, target_id)
            }
            StoreError::CycleDetected { item_id, depends_on } => write!(
                f,
                "adding {} -> {} would create a cycle: {} already depends on {}",
                item_id, depends_on, depends_on, item_id
            ),
            StoreError::MergeCycle { source_id, target_id } => write!(
                f,
                "merging {} into {} would make {} depend on itself",
                source_id, target_id, target_id
            ),
            StoreError::ParentClosed { parent_id, status } => {
                write!(f, "cannot add a child to {}: it is {}", parent_id, status)
            }
            StoreError::OpenChildren { id, children } => write!(
                f,
                "cannot close {}: {} child item(s) still open ({})",
                id,
                children.len(),
                children.join(", ")
            ),
            StoreError::HasDependents { id, dependents } => write!(
                f,
                "{} task(s) depend on {} ({}); use --force to override",
                dependents.len(),
                id,
                dependents.join(", ")
            ),
            StoreError::HasChildren { id, count } => write!(
                f,
                "{} has {} child item(s); use --force --cascade to delete them too",
                id, count
            ),
            StoreError::Validation(e) => write!(f, "validation error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<ValidationError> for StoreError {
    fn from(e: ValidationError) -> Self {
        StoreError::Validation(e)
    }
}

/// Load an item or fail with `ItemNotFound`.
pub(crate) fn require_item(conn: &Connection, id: &str) -> Result<Item> {
    storage::get_item(conn, id)?.ok_or_else(|| eyre::eyre!(StoreError::ItemNotFound(id.to_string())))
}

/// Everything needed to create an item.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub project: String,
    pub title: String,
    pub item_type: ItemType,
    pub status: Status,
    pub priority: u8,
    pub description: Option<String>,
    pub parent_id: Option<String>,
    pub labels: Vec<String>,
    pub shared_context: Option<String>,
    pub closing_instructions: Option<String>,
}

impl NewItem {
    pub fn new(project: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            title: title.into(),
            item_type: ItemType::Task,
            status: Status::Open,
            priority: 2,
            description: None,
            parent_id: None,
            labels: Vec::new(),
            shared_context: None,
            closing_instructions: None,
        }
    }
}

/// Field changes for `Store::update`. `None` leaves a field untouched;
/// `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default)]
pub struct ItemUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<u8>,
    pub shared_context: Option<Option<String>>,
    pub closing_instructions: Option<Option<String>>,
    pub worktree_path: Option<Option<String>>,
    pub worktree_branch: Option<Option<String>>,
}

/// The main Tangle store.
pub struct Store {
    pub(crate) storage: Storage,
    pub(crate) config: Config,
}

impl Store {
    /// Initialize a new store in the given directory.
    pub fn init(root: &Path) -> Result<Self> {
        Self::init_with_config(root, Config::from_env())
    }

    pub fn init_with_config(root: &Path, config: Config) -> Result<Self> {
        let storage = Storage::init(root)?;
        Ok(Self { storage, config })
    }

    /// Open an existing store.
    pub fn open(root: &Path) -> Result<Self> {
        Self::open_with_config(root, Config::from_env())
    }

    pub fn open_with_config(root: &Path, config: Config) -> Result<Self> {
        let storage = Storage::open(root)?;
        Ok(Self { storage, config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn root(&self) -> &Path {
        self.storage.root()
    }

    /// Create a new item.
    pub fn create(&mut self, new: NewItem) -> Result<Item> {
        for label in &new.labels {
            validate_label(label).map_err(|e| eyre::eyre!(StoreError::Validation(e)))?;
        }

        let now = Utc::now();
        let item = Item {
            id: generate_id(new.item_type, &new.title, now),
            project: new.project,
            item_type: new.item_type,
            title: new.title,
            description: new.description,
            status: new.status,
            priority: new.priority,
            parent_id: new.parent_id,
            agent_id: None,
            agent_last_active: None,
            results: None,
            shared_context: new.shared_context,
            closing_instructions: new.closing_instructions,
            worktree_path: None,
            worktree_branch: None,
            created_at: now,
            updated_at: now,
        };

        // Validate before persisting
        item.validate().map_err(|e| eyre::eyre!(StoreError::Validation(e)))?;

        let labels = new.labels;
        self.storage.transaction(|tx| {
            if let Some(parent_id) = &item.parent_id {
                let parent = require_item(tx, parent_id)?;
                if parent.status.is_closed() {
                    return Err(eyre::eyre!(StoreError::ParentClosed {
                        parent_id: parent.id,
                        status: parent.status,
                    }));
                }
            }
            storage::insert_item(tx, &item)?;
            for label in &labels {
                storage::insert_label(tx, &item.id, label)?;
            }
            Ok(())
        })?;

        debug!("Created {} {} in project {}", item.item_type, item.id, item.project);
        Ok(item)
    }

    /// Get an item by ID.
    pub fn get(&self, id: &str) -> Result<Option<Item>> {
        storage::get_item(self.storage.conn(), id)
    }

    /// Get an item by ID, failing with `ItemNotFound` when absent.
    pub fn get_required(&self, id: &str) -> Result<Item> {
        require_item(self.storage.conn(), id)
    }

    /// List items matching the filter, most urgent first.
    pub fn list(&self, filter: &ItemFilter) -> Result<Vec<Item>> {
        storage::list_items(self.storage.conn(), filter)
    }

    /// Update an item's descriptive fields.
    pub fn update(&mut self, id: &str, changes: ItemUpdate) -> Result<Item> {
        let existing = require_item(self.storage.conn(), id)?;

        if let Some(title) = &changes.title {
            validate_title(title).map_err(|e| eyre::eyre!(StoreError::Validation(e)))?;
        }

        let updated = Item {
            title: changes.title.unwrap_or(existing.title.clone()),
            description: changes.description.unwrap_or(existing.description.clone()),
            priority: changes.priority.unwrap_or(existing.priority),
            shared_context: changes.shared_context.unwrap_or(existing.shared_context.clone()),
            closing_instructions: changes
                .closing_instructions
                .unwrap_or(existing.closing_instructions.clone()),
            worktree_path: changes.worktree_path.unwrap_or(existing.worktree_path.clone()),
            worktree_branch: changes.worktree_branch.unwrap_or(existing.worktree_branch.clone()),
            updated_at: Utc::now(),
            ..existing
        };

        // Validate before persisting
        updated.validate().map_err(|e| eyre::eyre!(StoreError::Validation(e)))?;

        storage::update_item(self.storage.conn(), &updated).context("Failed to persist updated item")?;

        Ok(updated)
    }

    /// Move an item under a new parent, or detach it with `None`.
    pub fn set_parent(&mut self, id: &str, parent_id: Option<&str>) -> Result<Item> {
        let max_depth = self.config.max_traversal_depth;
        let updated = self.storage.transaction(|tx| {
            let mut item = require_item(tx, id)?;

            if let Some(parent_id) = parent_id {
                let parent = require_item(tx, parent_id)?;
                if parent.id == item.id || graph::ancestor_ids(tx, &parent.id, max_depth)?.contains(&item.id) {
                    return Err(eyre::eyre!(StoreError::ParentCycle {
                        item_id: item.id.clone(),
                        parent_id: parent.id,
                    }));
                }
                if parent.status.is_closed() {
                    return Err(eyre::eyre!(StoreError::ParentClosed {
                        parent_id: parent.id,
                        status: parent.status,
                    }));
                }
                if storage::dependency_exists(tx, &item.id, &parent.id)? {
                    return Err(eyre::eyre!(StoreError::HierarchyConflict {
                        item_id: item.id.clone(),
                        depends_on: parent.id,
                    }));
                }
                if storage::dependency_exists(tx, &parent.id, &item.id)? {
                    return Err(eyre::eyre!(StoreError::HierarchyConflict {
                        item_id: parent.id,
                        depends_on: item.id.clone(),
                    }));
                }
            }

            item.parent_id = parent_id.map(String::from);
            item.updated_at = Utc::now();
            storage::update_item(tx, &item)?;
            Ok(item)
        })?;

        info!("Set parent of {} to {:?}", updated.id, updated.parent_id);
        Ok(updated)
    }

    /// Direct children of an item.
    pub fn children(&self, id: &str) -> Result<Vec<Item>> {
        storage::children(self.storage.conn(), id)
    }

    /// Every item below `id` in the hierarchy, breadth first.
    pub fn descendants(&self, id: &str) -> Result<Vec<Item>> {
        descendants(self.storage.conn(), id)
    }

    /// Append a free-text entry to an item's log.
    pub fn add_log(&mut self, id: &str, message: &str) -> Result<LogEntry> {
        require_item(self.storage.conn(), id)?;
        storage::insert_log(self.storage.conn(), id, message, Utc::now())
    }

    /// An item's log, oldest first.
    pub fn logs(&self, id: &str) -> Result<Vec<LogEntry>> {
        storage::logs_for(self.storage.conn(), id)
    }

    /// Attach a label. Returns false if it was already attached.
    pub fn add_label(&mut self, id: &str, label: &str) -> Result<bool> {
        validate_label(label).map_err(|e| eyre::eyre!(StoreError::Validation(e)))?;
        require_item(self.storage.conn(), id)?;
        storage::insert_label(self.storage.conn(), id, label)
    }

    /// Detach a label. Returns false if it was not attached.
    pub fn remove_label(&mut self, id: &str, label: &str) -> Result<bool> {
        storage::delete_label(self.storage.conn(), id, label)
    }

    pub fn labels(&self, id: &str) -> Result<Vec<String>> {
        storage::labels_for(self.storage.conn(), id)
    }

    /// The in-progress item of a project touched most recently, if any.
    pub fn current_in_progress(&self, project: &str) -> Result<Option<Item>> {
        let items = storage::list_items(
            self.storage.conn(),
            &ItemFilter::new().project(project).status(Status::InProgress),
        )?;
        Ok(items.into_iter().max_by_key(|item| item.updated_at))
    }

    /// Open items with nothing left to wait on, directly or through an ancestor epic.
    pub fn ready(&self, project: &str) -> Result<Vec<Item>> {
        let conn = self.storage.conn();
        let max_depth = self.config.max_traversal_depth;
        let candidates = storage::list_items(conn, &ItemFilter::new().project(project).status(Status::Open))?;

        let mut ready = Vec::new();
        for item in candidates {
            if graph::has_unmet_dependencies(conn, &item.id)? {
                continue;
            }
            if !graph::ancestor_dependencies(conn, &item.id, max_depth)?.is_empty() {
                continue;
            }
            ready.push(item);
        }
        Ok(ready)
    }
}

/// Every item below `id`, breadth first.
pub(crate) fn descendants(conn: &Connection, id: &str) -> Result<Vec<Item>> {
    let mut seen = HashSet::from([id.to_string()]);
    let mut queue = VecDeque::from([id.to_string()]);
    let mut out = Vec::new();

    while let Some(current) = queue.pop_front() {
        for child in storage::children(conn, &current)? {
            if seen.insert(child.id.clone()) {
                queue.push_back(child.id.clone());
                out.push(child);
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_store() -> (TempDir, Store) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::init_with_config(temp_dir.path(), Config::default()).unwrap();
        (temp_dir, store)
    }

    fn task(store: &mut Store, title: &str) -> Item {
        store.create(NewItem::new("demo", title)).unwrap()
    }

    fn kind(result: Result<impl std::fmt::Debug>) -> ErrorKind {
        StoreError::kind_of(&result.unwrap_err()).expect("expected a StoreError")
    }

    #[test]
    fn test_create_and_get() {
        let (_temp_dir, mut store) = setup_test_store();

        let mut new = NewItem::new("demo", "Test task");
        new.description = Some("A description".to_string());
        new.labels = vec!["test".to_string(), "example".to_string()];
        let item = store.create(new).unwrap();

        assert!(item.id.starts_with("task-"));
        assert_eq!(item.status, Status::Open);

        let retrieved = store.get(&item.id).unwrap().unwrap();
        assert_eq!(retrieved.title, "Test task");
        assert_eq!(store.labels(&item.id).unwrap(), vec!["example", "test"]);
    }

    #[test]
    fn test_create_rejects_epic_fields_on_task() {
        let (_temp_dir, mut store) = setup_test_store();

        let mut new = NewItem::new("demo", "Task");
        new.shared_context = Some("context".to_string());
        assert_eq!(kind(store.create(new)), ErrorKind::Validation);
    }

    #[test]
    fn test_create_under_closed_parent_fails() {
        let (_temp_dir, mut store) = setup_test_store();

        let mut new = NewItem::new("demo", "Finished");
        new.status = Status::Done;
        let parent = store.create(new).unwrap();

        let mut child = NewItem::new("demo", "Child");
        child.parent_id = Some(parent.id.clone());
        assert_eq!(kind(store.create(child)), ErrorKind::GuardViolation);
    }

    #[test]
    fn test_create_with_missing_parent_fails() {
        let (_temp_dir, mut store) = setup_test_store();

        let mut child = NewItem::new("demo", "Child");
        child.parent_id = Some("epic-missing".to_string());
        assert_eq!(kind(store.create(child)), ErrorKind::NotFound);
        assert!(store.list(&ItemFilter::new()).unwrap().is_empty());
    }

    #[test]
    fn test_update_fields() {
        let (_temp_dir, mut store) = setup_test_store();
        let item = task(&mut store, "Original");

        let updated = store
            .update(
                &item.id,
                ItemUpdate {
                    title: Some("Renamed".to_string()),
                    description: Some(Some("Now with text".to_string())),
                    priority: Some(0),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.priority, 0);
        assert_eq!(store.get_required(&item.id).unwrap().description.as_deref(), Some("Now with text"));
    }

    #[test]
    fn test_set_parent_rejects_loops() {
        let (_temp_dir, mut store) = setup_test_store();
        let a = task(&mut store, "A");
        let b = task(&mut store, "B");
        let c = task(&mut store, "C");

        store.set_parent(&b.id, Some(&a.id)).unwrap();
        store.set_parent(&c.id, Some(&b.id)).unwrap();

        assert_eq!(kind(store.set_parent(&a.id, Some(&c.id))), ErrorKind::Validation);
        assert_eq!(kind(store.set_parent(&a.id, Some(&a.id))), ErrorKind::Validation);

        let below_a: Vec<_> = store.descendants(&a.id).unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(below_a, vec![b.id.clone(), c.id.clone()]);
    }

    #[test]
    fn test_current_in_progress() {
        let (_temp_dir, mut store) = setup_test_store();
        let a = task(&mut store, "A");
        assert!(store.current_in_progress("demo").unwrap().is_none());

        store.update_status(&a.id, Status::InProgress, None, false).unwrap();
        assert_eq!(store.current_in_progress("demo").unwrap().unwrap().id, a.id);
        assert!(store.current_in_progress("other").unwrap().is_none());
    }

    #[test]
    fn test_logs_and_labels() {
        let (_temp_dir, mut store) = setup_test_store();
        let a = task(&mut store, "A");

        store.add_log(&a.id, "first").unwrap();
        store.add_log(&a.id, "second").unwrap();
        let messages: Vec<_> = store.logs(&a.id).unwrap().into_iter().map(|l| l.message).collect();
        assert_eq!(messages, vec!["first", "second"]);

        assert!(store.add_label(&a.id, "infra").unwrap());
        assert!(!store.add_label(&a.id, "infra").unwrap());
        assert!(store.add_label(&a.id, "not valid").is_err());
        assert!(store.remove_label(&a.id, "infra").unwrap());
        assert!(store.labels(&a.id).unwrap().is_empty());
    }
}
