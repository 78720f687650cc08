//! Integration tests for error handling.
//!
//! Tests that failed operations report the right error class and leave the
//! store untouched.

mod common;

use common::{error_kind, TestEnv, PROJECT};
use tangle::{ErrorKind, ItemUpdate, NewItem, Status, Store};
use tempfile::TempDir;

// =============================================================================
// Item Not Found Tests
// =============================================================================

#[test]
fn test_get_nonexistent_item_returns_none() {
    let env = TestEnv::new();

    assert!(env.store.get("task-nonexistent").unwrap().is_none());
    assert_eq!(error_kind(env.store.get_required("task-nonexistent")), ErrorKind::NotFound);
}

#[test]
fn test_update_nonexistent_item_fails() {
    let mut env = TestEnv::new();

    let changes = ItemUpdate {
        title: Some("title".to_string()),
        ..Default::default()
    };
    assert_eq!(error_kind(env.store.update("task-nonexistent", changes)), ErrorKind::NotFound);
}

#[test]
fn test_complete_nonexistent_item_fails() {
    let mut env = TestEnv::new();

    assert_eq!(error_kind(env.store.complete_item("task-nonexistent", "", None)), ErrorKind::NotFound);
}

#[test]
fn test_graph_queries_on_nonexistent_item_fail() {
    let env = TestEnv::new();

    assert_eq!(error_kind(env.store.get_ancestor_dependencies("task-nonexistent")), ErrorKind::NotFound);
    assert_eq!(error_kind(env.store.check_parent_epic_completion("task-nonexistent")), ErrorKind::NotFound);
}

#[test]
fn test_log_on_nonexistent_item_fails() {
    let mut env = TestEnv::new();

    assert_eq!(error_kind(env.store.add_log("task-nonexistent", "note")), ErrorKind::NotFound);
    assert_eq!(error_kind(env.store.add_label("task-nonexistent", "backend")), ErrorKind::NotFound);
}

#[test]
fn test_create_under_nonexistent_parent_fails() {
    let mut env = TestEnv::new();

    let mut new = NewItem::new(PROJECT, "Orphan");
    new.parent_id = Some("epic-nonexistent".to_string());
    assert_eq!(error_kind(env.store.create(new)), ErrorKind::NotFound);
    assert!(env.store.list(&Default::default()).unwrap().is_empty());
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_create_empty_title_fails() {
    let mut env = TestEnv::new();

    assert_eq!(error_kind(env.store.create(NewItem::new(PROJECT, ""))), ErrorKind::Validation);
}

#[test]
fn test_create_title_too_long_fails() {
    let mut env = TestEnv::new();

    let title = "x".repeat(501);
    assert_eq!(error_kind(env.store.create(NewItem::new(PROJECT, title))), ErrorKind::Validation);
}

#[test]
fn test_create_invalid_priority_fails() {
    let mut env = TestEnv::new();

    let mut new = NewItem::new(PROJECT, "Task");
    new.priority = 5;
    assert_eq!(error_kind(env.store.create(new)), ErrorKind::Validation);
}

#[test]
fn test_create_empty_project_fails() {
    let mut env = TestEnv::new();

    assert_eq!(error_kind(env.store.create(NewItem::new("  ", "Task"))), ErrorKind::Validation);
}

#[test]
fn test_create_control_chars_in_label_fails() {
    let mut env = TestEnv::new();

    let mut new = NewItem::new(PROJECT, "Task");
    new.labels = vec!["bad\tlabel".to_string()];
    assert_eq!(error_kind(env.store.create(new)), ErrorKind::Validation);
    assert!(env.store.list(&Default::default()).unwrap().is_empty());
}

#[test]
fn test_epic_only_fields_rejected_on_task() {
    let mut env = TestEnv::new();

    let mut new = NewItem::new(PROJECT, "Task");
    new.closing_instructions = Some("merge the branch".to_string());
    assert_eq!(error_kind(env.store.create(new)), ErrorKind::Validation);
}

#[test]
fn test_update_to_empty_title_fails() {
    let mut env = TestEnv::new();
    let item = env.create_task("Valid");

    let changes = ItemUpdate {
        title: Some(String::new()),
        ..Default::default()
    };
    assert_eq!(error_kind(env.store.update(&item.id, changes)), ErrorKind::Validation);
    assert_eq!(env.reload(&item).title, "Valid");
}

#[test]
fn test_update_to_invalid_priority_fails() {
    let mut env = TestEnv::new();
    let item = env.create_task("Valid");

    let changes = ItemUpdate {
        priority: Some(9),
        ..Default::default()
    };
    assert_eq!(error_kind(env.store.update(&item.id, changes)), ErrorKind::Validation);
}

#[test]
fn test_status_and_type_parsing() {
    assert!("in_progress".parse::<Status>().is_ok());
    assert!("finished".parse::<Status>().is_err());
    assert!("story".parse::<tangle::ItemType>().is_err());
}

// =============================================================================
// Guard Tests
// =============================================================================

#[test]
fn test_child_of_closed_parent_rejected() {
    let mut env = TestEnv::new();
    let epic = env.create_epic("Epic");
    env.set_status(&epic, Status::Done);

    let mut new = NewItem::new(PROJECT, "Late child");
    new.parent_id = Some(epic.id.clone());
    assert_eq!(error_kind(env.store.create(new)), ErrorKind::GuardViolation);

    let loose = env.create_task("Loose");
    assert_eq!(error_kind(env.store.set_parent(&loose.id, Some(&epic.id))), ErrorKind::GuardViolation);
}

#[test]
fn test_parent_cycle_rejected() {
    let mut env = TestEnv::new();
    let epic = env.create_epic("Epic");
    let child = env.create_child(&epic, "Child");

    assert_eq!(error_kind(env.store.set_parent(&epic.id, Some(&child.id))), ErrorKind::Validation);
    assert_eq!(error_kind(env.store.set_parent(&epic.id, Some(&epic.id))), ErrorKind::Validation);
}

// =============================================================================
// Store Lifecycle Tests
// =============================================================================

#[test]
fn test_init_creates_tangle_directory() {
    let temp_dir = TempDir::new().unwrap();
    let _store = Store::init(temp_dir.path()).unwrap();

    assert!(temp_dir.path().join(".tangle").exists());
    assert!(temp_dir.path().join(".tangle/tangle.db").exists());
}

#[test]
fn test_open_existing_store() {
    let temp_dir = TempDir::new().unwrap();
    let id = {
        let mut store = Store::init(temp_dir.path()).unwrap();
        store.create(NewItem::new(PROJECT, "Persisted")).unwrap().id
    };

    let store = Store::open(temp_dir.path()).unwrap();
    assert_eq!(store.get_required(&id).unwrap().title, "Persisted");
}

#[test]
fn test_open_nonexistent_store_fails() {
    let temp_dir = TempDir::new().unwrap();

    let result = Store::open(temp_dir.path());
    assert!(result.is_err());
}
