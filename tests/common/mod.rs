//! Shared test infrastructure for Tangle integration tests.
//!
//! Provides TestEnv helper for consistent test setup/teardown.

#![allow(dead_code)]

use tangle::{AgentContext, Config, ErrorKind, Item, ItemType, NewItem, Status, Store, StoreError};
use tempfile::TempDir;

pub const PROJECT: &str = "demo";

/// Test environment with automatic cleanup.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub store: Store,
}

impl TestEnv {
    /// Create a new test environment with an initialized store.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Store::init_with_config(temp_dir.path(), config).expect("Failed to init store");
        Self { temp_dir, store }
    }

    /// Create a task with default priority.
    pub fn create_task(&mut self, title: &str) -> Item {
        self.store
            .create(NewItem::new(PROJECT, title))
            .expect("Failed to create task")
    }

    /// Create a task with specified priority.
    pub fn create_task_with_priority(&mut self, title: &str, priority: u8) -> Item {
        let mut new = NewItem::new(PROJECT, title);
        new.priority = priority;
        self.store.create(new).expect("Failed to create task")
    }

    /// Create an epic.
    pub fn create_epic(&mut self, title: &str) -> Item {
        let mut new = NewItem::new(PROJECT, title);
        new.item_type = ItemType::Epic;
        self.store.create(new).expect("Failed to create epic")
    }

    /// Create a task under a parent.
    pub fn create_child(&mut self, parent: &Item, title: &str) -> Item {
        let mut new = NewItem::new(PROJECT, title);
        new.parent_id = Some(parent.id.clone());
        self.store.create(new).expect("Failed to create child")
    }

    /// Make `item` depend on `on`.
    pub fn depend(&mut self, item: &Item, on: &Item) {
        self.store
            .add_dependency(&item.id, &on.id)
            .expect("Failed to add dependency");
    }

    /// Set status without force or agent.
    pub fn set_status(&mut self, item: &Item, status: Status) -> Item {
        self.store
            .update_status(&item.id, status, None, false)
            .expect("Failed to set status")
    }

    /// Claim an item for an agent.
    pub fn claim(&mut self, item: &Item, agent: &str) -> Item {
        self.store
            .update_status(&item.id, Status::InProgress, Some(&AgentContext::new(agent)), false)
            .expect("Failed to claim item")
    }

    /// Reload an item from the store.
    pub fn reload(&self, item: &Item) -> Item {
        self.store.get_required(&item.id).expect("Failed to reload item")
    }

    /// IDs of the items `item` depends on, sorted.
    pub fn dependency_ids(&self, item: &Item) -> Vec<String> {
        let mut ids: Vec<String> = self
            .store
            .get_dependencies(&item.id)
            .expect("Failed to get dependencies")
            .into_iter()
            .map(|d| d.id)
            .collect();
        ids.sort();
        ids
    }

    /// Assert that an item is in the ready list.
    pub fn assert_ready(&self, item: &Item) {
        let ready = self.store.ready(PROJECT).expect("Failed to get ready items");
        assert!(
            ready.iter().any(|i| i.id == item.id),
            "Expected item {} to be ready, but it wasn't. Ready items: {:?}",
            item.id,
            ready.iter().map(|i| &i.id).collect::<Vec<_>>()
        );
    }

    /// Assert that an item is NOT in the ready list.
    pub fn assert_not_ready(&self, item: &Item) {
        let ready = self.store.ready(PROJECT).expect("Failed to get ready items");
        assert!(
            !ready.iter().any(|i| i.id == item.id),
            "Expected item {} to NOT be ready, but it was",
            item.id
        );
    }

    /// Number of dependency edges in the store.
    pub fn edge_count(&self) -> usize {
        self.store.list_dependencies().expect("Failed to list edges").len()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// The error class of a failed call.
pub fn error_kind<T: std::fmt::Debug>(result: eyre::Result<T>) -> ErrorKind {
    let err = result.expect_err("expected the call to fail");
    StoreError::kind_of(&err).unwrap_or_else(|| panic!("not a StoreError: {:#}", err))
}
