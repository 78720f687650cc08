//! Merging one item into another.

use crate::graph::{ancestor_ids, is_hierarchy_pair, reaches_any};
use crate::storage;
use crate::store::{require_item, Store, StoreError};
use crate::types::Item;
use chrono::Utc;
use eyre::Result;
use log::info;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

/// What a merge moved onto the target.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MergeSummary {
    pub source_id: String,
    pub target: Item,
    pub dependencies_moved: usize,
    pub dependents_moved: usize,
    pub logs_moved: usize,
    pub labels_copied: usize,
    pub children_moved: usize,
}

/// Reject merges that would leave the target depending on itself.
fn guard_merge_cycle(conn: &Connection, source_id: &str, target_id: &str) -> Result<()> {
    let cycle = || {
        eyre::eyre!(StoreError::MergeCycle {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
        })
    };

    if storage::dependency_exists(conn, source_id, target_id)? || storage::dependency_exists(conn, target_id, source_id)? {
        return Err(cycle());
    }

    // After the merge the source is the target, so reaching either one from
    // the target's new dependency set closes a loop.
    let mut proposed: BTreeSet<String> = storage::dependency_ids(conn, target_id)?.into_iter().collect();
    proposed.extend(storage::dependency_ids(conn, source_id)?);
    proposed.remove(target_id);
    proposed.remove(source_id);

    let proposed: Vec<String> = proposed.into_iter().collect();
    let merged = HashSet::from([source_id, target_id]);
    if reaches_any(conn, &proposed, &merged)? {
        return Err(cycle());
    }

    Ok(())
}

/// Fail if any of the target's edges now links it with its parent or a child.
fn guard_merged_hierarchy(conn: &Connection, target: &Item) -> Result<()> {
    let mut neighbors = storage::dependency_ids(conn, &target.id)?;
    neighbors.extend(storage::dependent_ids(conn, &target.id)?);

    for neighbor_id in neighbors {
        let Some(neighbor) = storage::get_item(conn, &neighbor_id)? else {
            continue;
        };
        if is_hierarchy_pair(target, &neighbor) {
            return Err(eyre::eyre!(StoreError::HierarchyConflict {
                item_id: target.id.clone(),
                depends_on: neighbor.id,
            }));
        }
    }
    Ok(())
}

impl Store {
    /// Fold `source_id` into `target_id` and delete the source.
    ///
    /// The target takes over the source's dependencies, dependents, children,
    /// log entries and labels, and its description is appended to the
    /// target's. A done or canceled target cannot take children, so merging
    /// a source that has any into it fails. Runs as one transaction; any
    /// failure leaves both items as they were.
    pub fn merge_items(&mut self, source_id: &str, target_id: &str) -> Result<MergeSummary> {
        if source_id == target_id {
            return Err(eyre::eyre!(StoreError::MergeSameItem(source_id.to_string())));
        }
        let max_depth = self.config.max_traversal_depth;

        let summary = self.storage.transaction(|tx| {
            let source = require_item(tx, source_id)?;
            let mut target = require_item(tx, target_id)?;

            if ancestor_ids(tx, target_id, max_depth)?.iter().any(|id| id == source_id) {
                return Err(eyre::eyre!(StoreError::MergeIntoDescendant {
                    source_id: source_id.to_string(),
                    target_id: target_id.to_string(),
                }));
            }
            guard_merge_cycle(tx, source_id, target_id)?;

            // Closed items cannot take on the source's children.
            if target.status.is_closed() && !storage::children(tx, source_id)?.is_empty() {
                return Err(eyre::eyre!(StoreError::ParentClosed {
                    parent_id: target.id.clone(),
                    status: target.status,
                }));
            }

            let now = Utc::now();

            let mut dependencies_moved = 0;
            for dep in storage::dependency_ids(tx, source_id)? {
                if dep != target_id && storage::insert_dependency(tx, target_id, &dep, now)? {
                    dependencies_moved += 1;
                }
            }

            let mut dependents_moved = 0;
            for dependent in storage::dependent_ids(tx, source_id)? {
                if dependent != target_id && storage::insert_dependency(tx, &dependent, target_id, now)? {
                    dependents_moved += 1;
                }
            }

            storage::delete_edges_for(tx, source_id)?;
            let children_moved = storage::reparent_children(tx, source_id, target_id, now)?;

            let logs_moved = storage::move_logs(tx, source_id, target_id)?;
            storage::insert_log(
                tx,
                target_id,
                &format!("Merged {} ({}) into this item", source.id, source.title),
                now,
            )?;

            let labels_copied = storage::copy_labels(tx, source_id, target_id)?;
            storage::delete_labels_for(tx, source_id)?;

            if let Some(text) = source.description.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                let addition = format!("--- Merged from {} ({}) ---\n{}", source.id, source.title, text);
                target.description = Some(match target.description.as_deref().filter(|d| !d.trim().is_empty()) {
                    Some(existing) => format!("{}\n\n{}", existing, addition),
                    None => addition,
                });
            }
            target.updated_at = now;
            storage::update_item(tx, &target)?;

            storage::delete_item_row(tx, source_id)?;
            guard_merged_hierarchy(tx, &target)?;

            Ok(MergeSummary {
                source_id: source.id,
                target,
                dependencies_moved,
                dependents_moved,
                logs_moved,
                labels_copied,
                children_moved,
            })
        })?;

        info!(
            "Merged {} into {} ({} deps, {} dependents, {} logs, {} labels, {} children)",
            summary.source_id,
            summary.target.id,
            summary.dependencies_moved,
            summary.dependents_moved,
            summary.logs_moved,
            summary.labels_copied,
            summary.children_moved
        );
        Ok(summary)
    }
}
