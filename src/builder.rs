//! Builder pattern API for creating items.

use crate::store::{NewItem, Store};
use crate::types::{Item, ItemType, Status};
use eyre::{Context, Result};

/// Builder for creating items with a fluent API.
///
/// # Example
///
/// ```ignore
/// let epic = store.build("auth", "Login rework").epic().priority(1).create()?;
/// let task = store.build("auth", "Add OAuth callback")
///     .parent(&epic.id)
///     .label("backend")
///     .description("Handle the provider redirect")
///     .create()?;
/// ```
pub struct ItemBuilder<'a> {
    store: &'a mut Store,
    new: NewItem,
}

impl<'a> ItemBuilder<'a> {
    /// Create a new builder with the given project and title.
    pub fn new(store: &'a mut Store, project: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            store,
            new: NewItem::new(project, title),
        }
    }

    /// Make the item an epic.
    pub fn epic(mut self) -> Self {
        self.new.item_type = ItemType::Epic;
        self
    }

    /// Set the priority (0=critical, 4=low).
    pub fn priority(mut self, priority: u8) -> Self {
        self.new.priority = priority;
        self
    }

    /// Set the initial status.
    pub fn status(mut self, status: Status) -> Self {
        self.new.status = status;
        self
    }

    /// Place the item under a parent.
    pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
        self.new.parent_id = Some(parent_id.into());
        self
    }

    /// Add a label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.new.labels.push(label.into());
        self
    }

    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.new.description = Some(description.into());
        self
    }

    /// Epic only.
    pub fn shared_context(mut self, context: impl Into<String>) -> Self {
        self.new.shared_context = Some(context.into());
        self
    }

    /// Epic only.
    pub fn closing_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.new.closing_instructions = Some(instructions.into());
        self
    }

    /// Create the item.
    pub fn create(self) -> Result<Item> {
        self.store.create(self.new).context("Failed to create item")
    }
}

/// Extension trait to add builder method to Store.
pub trait StoreBuilderExt {
    /// Start building a new item with the given project and title.
    fn build(&mut self, project: impl Into<String>, title: impl Into<String>) -> ItemBuilder<'_>;
}

impl StoreBuilderExt for Store {
    fn build(&mut self, project: impl Into<String>, title: impl Into<String>) -> ItemBuilder<'_> {
        ItemBuilder::new(self, project, title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    fn setup_test_store() -> (TempDir, Store) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::init_with_config(temp_dir.path(), Config::default()).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_builder_basic() {
        let (_temp_dir, mut store) = setup_test_store();

        let item = store.build("demo", "Test task").create().unwrap();

        assert_eq!(item.title, "Test task");
        assert_eq!(item.priority, 2);
        assert_eq!(item.item_type, ItemType::Task);
        assert!(item.description.is_none());
    }

    #[test]
    fn test_builder_epic_with_child() {
        let (_temp_dir, mut store) = setup_test_store();

        let epic = store
            .build("demo", "Epic")
            .epic()
            .priority(1)
            .closing_instructions("Open a PR")
            .create()
            .unwrap();
        let child = store
            .build("demo", "Child")
            .parent(&epic.id)
            .label("backend")
            .create()
            .unwrap();

        assert!(epic.id.starts_with("epic-"));
        assert_eq!(epic.closing_instructions.as_deref(), Some("Open a PR"));
        assert_eq!(child.parent_id.as_deref(), Some(epic.id.as_str()));
        assert_eq!(store.labels(&child.id).unwrap(), vec!["backend"]);
    }

    #[test]
    fn test_builder_rejects_epic_fields_on_task() {
        let (_temp_dir, mut store) = setup_test_store();

        let result = store.build("demo", "Task").shared_context("nope").create();
        assert!(result.is_err());
    }
}
