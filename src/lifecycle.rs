//! Status lifecycle: transitions with closing guards, agent claims, epic
//! completion, and deletion.
//!
//! Claims are last-write-wins. A second agent moving an item to in_progress
//! overwrites the first agent's claim without error.

use crate::storage;
use crate::store::{descendants, require_item, Store, StoreError};
use crate::types::{AgentContext, EpicCompletion, Item, Status};
use chrono::{DateTime, Utc};
use eyre::Result;
use log::{debug, info};
use rusqlite::Connection;

/// Children of `item_id` that are neither done nor canceled.
fn open_children(conn: &Connection, item_id: &str) -> Result<Vec<String>> {
    Ok(storage::children(conn, item_id)?
        .into_iter()
        .filter(|child| !child.status.is_closed())
        .map(|child| child.id)
        .collect())
}

fn guard_children(conn: &Connection, item_id: &str) -> Result<()> {
    let children = open_children(conn, item_id)?;
    if !children.is_empty() {
        return Err(eyre::eyre!(StoreError::OpenChildren {
            id: item_id.to_string(),
            children,
        }));
    }
    Ok(())
}

fn guard_dependents(conn: &Connection, item_id: &str) -> Result<()> {
    let dependents: Vec<String> = storage::dependents_of(conn, item_id)?
        .into_iter()
        .filter(|dep| !dep.status.is_closed())
        .map(|dep| dep.id)
        .collect();
    if !dependents.is_empty() {
        return Err(eyre::eyre!(StoreError::HasDependents {
            id: item_id.to_string(),
            dependents,
        }));
    }
    Ok(())
}

/// Set status and apply the claim rules, without any guards.
fn apply_status(item: &mut Item, status: Status, agent: Option<&AgentContext>, now: DateTime<Utc>) {
    if status == Status::InProgress
        && let Some(agent) = agent
    {
        item.agent_id = Some(agent.agent_id.clone());
        item.agent_last_active = Some(now);
    }
    if status.releases_claim() {
        item.agent_id = None;
        item.agent_last_active = None;
    }
    item.status = status;
    item.updated_at = now;
}

fn by_agent(agent: Option<&AgentContext>) -> String {
    agent.map(|a| format!(" by {}", a.agent_id)).unwrap_or_default()
}

/// Remove one item and everything hanging off it, in a fixed order:
/// logs, edges, label links, then the row.
fn purge_item(conn: &Connection, item_id: &str) -> Result<()> {
    let logs = storage::delete_logs_for(conn, item_id)?;
    let edges = storage::delete_edges_for(conn, item_id)?;
    let labels = storage::delete_labels_for(conn, item_id)?;
    storage::delete_item_row(conn, item_id)?;
    debug!(
        "Purged {} ({} logs, {} edges, {} labels)",
        item_id, logs, edges, labels
    );
    Ok(())
}

impl Store {
    /// Move an item to `status`.
    ///
    /// Closing (done/canceled) always fails while a child is still open, and
    /// fails while items depend on this one unless `force` is set. Only
    /// dependents that are not themselves done or canceled count; closed
    /// dependents never hold an item open.
    /// Moving to in_progress with an agent records the claim; moving to done,
    /// blocked or canceled clears it.
    pub fn update_status(
        &mut self,
        id: &str,
        status: Status,
        agent: Option<&AgentContext>,
        force: bool,
    ) -> Result<Item> {
        let updated = self.storage.transaction(|tx| {
            let mut item = require_item(tx, id)?;

            if status.is_closed() {
                guard_children(tx, id)?;
                if !force {
                    guard_dependents(tx, id)?;
                }
            }

            let previous = item.status;
            let now = Utc::now();
            apply_status(&mut item, status, agent, now);
            storage::update_item(tx, &item)?;

            if previous != status {
                let message = format!("Status changed from {} to {}{}", previous, status, by_agent(agent));
                storage::insert_log(tx, id, &message, now)?;
            }

            Ok(item)
        })?;

        info!("Set status of {} to {}", updated.id, updated.status);
        Ok(updated)
    }

    /// Mark an item done with a results summary and release its claim.
    /// Only the children guard applies.
    pub fn complete_item(&mut self, id: &str, results: &str, agent: Option<&AgentContext>) -> Result<Item> {
        let completed = self.storage.transaction(|tx| {
            let mut item = require_item(tx, id)?;
            guard_children(tx, id)?;

            let now = Utc::now();
            apply_status(&mut item, Status::Done, agent, now);
            let results = results.trim();
            if !results.is_empty() {
                item.results = Some(results.to_string());
            }
            storage::update_item(tx, &item)?;
            storage::insert_log(tx, id, &format!("Completed{}", by_agent(agent)), now)?;

            Ok(item)
        })?;

        info!("Completed {}", completed.id);
        Ok(completed)
    }

    /// After a child changes status: if its parent is still open and every
    /// child of the parent is now done or canceled, describe what closing the
    /// parent involves. The caller decides whether to act on it.
    pub fn check_parent_epic_completion(&self, item_id: &str) -> Result<Option<EpicCompletion>> {
        let conn = self.storage.conn();
        let item = require_item(conn, item_id)?;

        let Some(parent_id) = item.parent_id else {
            return Ok(None);
        };
        let Some(parent) = storage::get_item(conn, &parent_id)? else {
            return Ok(None);
        };
        if parent.status.is_closed() {
            return Ok(None);
        }

        let children = storage::children(conn, &parent.id)?;
        if children.iter().any(|child| !child.status.is_closed()) {
            return Ok(None);
        }

        let done_children = children.iter().filter(|c| c.status == Status::Done).count();
        Ok(Some(EpicCompletion {
            worktree: parent.worktree(),
            epic_id: parent.id,
            title: parent.title,
            closing_instructions: parent.closing_instructions,
            total_children: children.len(),
            done_children,
            canceled_children: children.len() - done_children,
        }))
    }

    /// Close an epic whose children are all closed, summarizing them in its results.
    pub fn auto_complete_epic(&mut self, epic_id: &str) -> Result<Item> {
        let completed = self.storage.transaction(|tx| {
            let mut epic = require_item(tx, epic_id)?;
            guard_children(tx, epic_id)?;

            let children = storage::children(tx, epic_id)?;
            let done = children.iter().filter(|c| c.status == Status::Done).count();
            let canceled = children.len() - done;
            let summary = if canceled > 0 {
                format!(
                    "All {} child tasks completed ({} done, {} canceled)",
                    children.len(),
                    done,
                    canceled
                )
            } else {
                format!("All {} child tasks completed ({} done)", children.len(), done)
            };

            let now = Utc::now();
            apply_status(&mut epic, Status::Done, None, now);
            epic.results = Some(summary.clone());
            storage::update_item(tx, &epic)?;
            storage::insert_log(tx, epic_id, &format!("Auto-completed: {}", summary), now)?;

            Ok(epic)
        })?;

        info!("Auto-completed epic {}", completed.id);
        Ok(completed)
    }

    /// Delete an item with its logs, edges and label links.
    ///
    /// Fails if other items depend on it unless `force`, and fails if it has
    /// children unless both `force` and `cascade_children`, in which case the
    /// whole subtree goes. Returns the deleted IDs, deepest first.
    pub fn delete_item(&mut self, id: &str, force: bool, cascade_children: bool) -> Result<Vec<String>> {
        let deleted = self.storage.transaction(|tx| {
            let item = require_item(tx, id)?;

            let dependents = storage::dependent_ids(tx, id)?;
            if !dependents.is_empty() && !force {
                return Err(eyre::eyre!(StoreError::HasDependents {
                    id: item.id,
                    dependents,
                }));
            }

            let children = storage::children(tx, id)?;
            if !children.is_empty() && !(force && cascade_children) {
                return Err(eyre::eyre!(StoreError::HasChildren {
                    id: item.id,
                    count: children.len(),
                }));
            }

            let mut doomed: Vec<String> = descendants(tx, id)?.into_iter().map(|d| d.id).collect();
            doomed.reverse();
            doomed.push(item.id);

            for victim in &doomed {
                purge_item(tx, victim)?;
            }
            Ok(doomed)
        })?;

        info!("Deleted {} item(s): {}", deleted.len(), deleted.join(", "));
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::{ErrorKind, NewItem};
    use crate::types::ItemType;
    use tempfile::TempDir;

    fn setup_test_store() -> (TempDir, Store) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::init_with_config(temp_dir.path(), Config::default()).unwrap();
        (temp_dir, store)
    }

    fn create(store: &mut Store, title: &str, item_type: ItemType, parent: Option<&Item>) -> Item {
        let mut new = NewItem::new("demo", title);
        new.item_type = item_type;
        new.parent_id = parent.map(|p| p.id.clone());
        store.create(new).unwrap()
    }

    #[test]
    fn test_claim_overwrites_previous_agent() {
        let (_temp_dir, mut store) = setup_test_store();
        let item = create(&mut store, "Task", ItemType::Task, None);

        let first = AgentContext::new("agent-1");
        let second = AgentContext::new("agent-2");
        store.update_status(&item.id, Status::InProgress, Some(&first), false).unwrap();
        let claimed = store.update_status(&item.id, Status::InProgress, Some(&second), false).unwrap();

        assert_eq!(claimed.agent_id.as_deref(), Some("agent-2"));
        assert!(claimed.agent_last_active.is_some());
    }

    #[test]
    fn test_release_on_blocked() {
        let (_temp_dir, mut store) = setup_test_store();
        let item = create(&mut store, "Task", ItemType::Task, None);
        let agent = AgentContext::new("agent-1");

        store.update_status(&item.id, Status::InProgress, Some(&agent), false).unwrap();
        let blocked = store.update_status(&item.id, Status::Blocked, None, false).unwrap();

        assert_eq!(blocked.agent_id, None);
        assert_eq!(blocked.agent_last_active, None);
    }

    #[test]
    fn test_status_change_is_logged_once() {
        let (_temp_dir, mut store) = setup_test_store();
        let item = create(&mut store, "Task", ItemType::Task, None);

        store.update_status(&item.id, Status::Blocked, None, false).unwrap();
        store.update_status(&item.id, Status::Blocked, None, false).unwrap();

        let logs = store.logs(&item.id).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "Status changed from open to blocked");
    }

    #[test]
    fn test_dependents_guard_ignores_closed_dependents() {
        let (_temp_dir, mut store) = setup_test_store();
        let base = create(&mut store, "Base", ItemType::Task, None);
        let dependent = create(&mut store, "Dependent", ItemType::Task, None);
        store.add_dependency(&dependent.id, &base.id).unwrap();

        let err = store.update_status(&base.id, Status::Done, None, false).unwrap_err();
        assert_eq!(StoreError::kind_of(&err), Some(ErrorKind::GuardViolation));

        store.update_status(&dependent.id, Status::Canceled, None, false).unwrap();
        store.update_status(&base.id, Status::Done, None, false).unwrap();
    }

    #[test]
    fn test_complete_item_records_results() {
        let (_temp_dir, mut store) = setup_test_store();
        let item = create(&mut store, "Task", ItemType::Task, None);
        let agent = AgentContext::new("agent-1");
        store.update_status(&item.id, Status::InProgress, Some(&agent), false).unwrap();

        let done = store.complete_item(&item.id, "Shipped it", Some(&agent)).unwrap();
        assert_eq!(done.status, Status::Done);
        assert_eq!(done.results.as_deref(), Some("Shipped it"));
        assert_eq!(done.agent_id, None);
    }

    #[test]
    fn test_parent_completion_info() {
        let (_temp_dir, mut store) = setup_test_store();
        let epic = create(&mut store, "Epic", ItemType::Epic, None);
        store
            .update(
                &epic.id,
                crate::store::ItemUpdate {
                    closing_instructions: Some(Some("Merge the branch".to_string())),
                    worktree_path: Some(Some("/tmp/wt".to_string())),
                    ..Default::default()
                },
            )
            .unwrap();
        let a = create(&mut store, "A", ItemType::Task, Some(&epic));
        let b = create(&mut store, "B", ItemType::Task, Some(&epic));

        store.complete_item(&a.id, "", None).unwrap();
        assert!(store.check_parent_epic_completion(&a.id).unwrap().is_none());

        store.update_status(&b.id, Status::Canceled, None, false).unwrap();
        let info = store.check_parent_epic_completion(&b.id).unwrap().unwrap();
        assert_eq!(info.epic_id, epic.id);
        assert_eq!(info.closing_instructions.as_deref(), Some("Merge the branch"));
        assert_eq!(info.worktree.unwrap().path, "/tmp/wt");
        assert_eq!((info.total_children, info.done_children, info.canceled_children), (2, 1, 1));

        let closed = store.auto_complete_epic(&epic.id).unwrap();
        assert_eq!(closed.status, Status::Done);
        assert_eq!(
            closed.results.as_deref(),
            Some("All 2 child tasks completed (1 done, 1 canceled)")
        );
        assert!(store.check_parent_epic_completion(&a.id).unwrap().is_none());
    }

    #[test]
    fn test_parent_completion_without_parent() {
        let (_temp_dir, mut store) = setup_test_store();
        let item = create(&mut store, "Orphan", ItemType::Task, None);
        assert!(store.check_parent_epic_completion(&item.id).unwrap().is_none());
    }

    #[test]
    fn test_delete_cascade_removes_subtree() {
        let (_temp_dir, mut store) = setup_test_store();
        let epic = create(&mut store, "Epic", ItemType::Epic, None);
        let child = create(&mut store, "Child", ItemType::Task, Some(&epic));
        let grandchild = create(&mut store, "Grandchild", ItemType::Task, Some(&child));
        store.add_log(&grandchild.id, "note").unwrap();
        store.add_label(&grandchild.id, "infra").unwrap();

        let err = store.delete_item(&epic.id, true, false).unwrap_err();
        assert_eq!(StoreError::kind_of(&err), Some(ErrorKind::GuardViolation));

        let deleted = store.delete_item(&epic.id, true, true).unwrap();
        assert_eq!(deleted, vec![grandchild.id.clone(), child.id.clone(), epic.id.clone()]);
        assert!(store.get(&grandchild.id).unwrap().is_none());
        assert!(store.logs(&grandchild.id).unwrap().is_empty());
        assert!(store.labels(&grandchild.id).unwrap().is_empty());
    }
}
