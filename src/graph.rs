//! Dependency graph: edge management, cycle prevention, inherited blockers,
//! impact analysis and the repair audits.
//!
//! Adjacency is loaded from the store on demand and walked with an explicit
//! visited set. Walks that can fan out (impact, ancestor chains) stop at
//! `Config::max_traversal_depth`.

use crate::storage;
use crate::store::{require_item, Store, StoreError};
use crate::types::{
    Dependency, DependencyInfo, DependencyOutcome, HierarchyConflict, ImpactItem, InheritedDependency, Item, Status,
};
use chrono::Utc;
use eyre::Result;
use log::{debug, info, warn};
use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// True if `depends_on` can already reach `item_id` along "depends on" edges,
/// so adding `item_id -> depends_on` would close a loop.
pub(crate) fn would_create_cycle(conn: &Connection, item_id: &str, depends_on: &str) -> Result<bool> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([depends_on.to_string()]);

    while let Some(node) = queue.pop_front() {
        if node == item_id {
            return Ok(true);
        }
        if visited.insert(node.clone()) {
            for next in storage::dependency_ids(conn, &node)? {
                if !visited.contains(&next) {
                    queue.push_back(next);
                }
            }
        }
    }

    Ok(false)
}

/// True if `from` reaches any of `targets` along "depends on" edges, starting
/// from `from`'s own dependencies.
pub(crate) fn reaches_any(conn: &Connection, from: &[String], targets: &HashSet<&str>) -> Result<bool> {
    let mut visited = HashSet::new();
    let mut queue: VecDeque<String> = from.iter().cloned().collect();

    while let Some(node) = queue.pop_front() {
        if targets.contains(node.as_str()) {
            return Ok(true);
        }
        if visited.insert(node.clone()) {
            queue.extend(storage::dependency_ids(conn, &node)?);
        }
    }

    Ok(false)
}

pub(crate) fn has_unmet_dependencies(conn: &Connection, item_id: &str) -> Result<bool> {
    let deps = storage::dependencies_of(conn, item_id)?;
    Ok(deps.iter().any(|dep| dep.status != Status::Done))
}

/// Parent chain of `item_id`, nearest first. Stops early on a repeated ID.
pub(crate) fn ancestor_ids(conn: &Connection, item_id: &str, max_depth: usize) -> Result<Vec<String>> {
    let mut chain = Vec::new();
    let mut seen = HashSet::from([item_id.to_string()]);
    let mut current = storage::get_item(conn, item_id)?.and_then(|item| item.parent_id);

    while let Some(parent_id) = current {
        if chain.len() >= max_depth {
            warn!("Parent chain of {} exceeds {} levels; truncating", item_id, max_depth);
            break;
        }
        if !seen.insert(parent_id.clone()) {
            warn!("Parent chain of {} loops back to {}", item_id, parent_id);
            break;
        }
        current = storage::get_item(conn, &parent_id)?.and_then(|item| item.parent_id);
        chain.push(parent_id);
    }

    Ok(chain)
}

/// Unmet direct dependencies of every ancestor epic, nearest ancestor first.
pub(crate) fn ancestor_dependencies(
    conn: &Connection,
    item_id: &str,
    max_depth: usize,
) -> Result<Vec<InheritedDependency>> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();

    for ancestor_id in ancestor_ids(conn, item_id, max_depth)? {
        let Some(ancestor) = storage::get_item(conn, &ancestor_id)? else {
            continue;
        };
        if !ancestor.is_epic() {
            continue;
        }
        for dep in storage::dependencies_of(conn, &ancestor.id)? {
            if dep.status == Status::Done || !seen.insert(dep.id.clone()) {
                continue;
            }
            out.push(InheritedDependency {
                dependency: dep,
                inherited: true,
                inherited_from: ancestor.id.clone(),
            });
        }
    }

    Ok(out)
}

/// Open items that would become ready if `item_id` were completed now.
pub(crate) fn impact(conn: &Connection, item_id: &str, max_depth: usize) -> Result<Vec<ImpactItem>> {
    // Downstream closure along "depends on me" edges, keeping the shallowest depth.
    let mut depth_of: HashMap<String, usize> = HashMap::new();
    let mut queue = VecDeque::from([(item_id.to_string(), 0usize)]);

    while let Some((node, depth)) = queue.pop_front() {
        if depth >= max_depth {
            debug!("Impact walk from {} hit depth limit at {}", item_id, node);
            continue;
        }
        for dependent in storage::dependent_ids(conn, &node)? {
            if dependent == item_id || depth_of.contains_key(&dependent) {
                continue;
            }
            depth_of.insert(dependent.clone(), depth + 1);
            queue.push_back((dependent, depth + 1));
        }
    }

    let mut out = Vec::new();
    for (candidate_id, depth) in &depth_of {
        let Some(candidate) = storage::get_item(conn, candidate_id)? else {
            continue;
        };
        if candidate.status != Status::Open {
            continue;
        }

        // Every remaining blocker must be the completed item or something that ripples with it.
        let unblocked = storage::dependencies_of(conn, candidate_id)?
            .iter()
            .filter(|dep| dep.status != Status::Done)
            .all(|dep| dep.id == item_id || depth_of.contains_key(&dep.id));

        if unblocked {
            out.push(ImpactItem {
                id: candidate.id,
                title: candidate.title,
                priority: candidate.priority,
                created_at: candidate.created_at,
                depth: *depth,
            });
        }
    }

    out.sort_by(|a, b| {
        a.depth
            .cmp(&b.depth)
            .then(a.priority.cmp(&b.priority))
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });

    Ok(out)
}

/// Every distinct cycle reachable in the edge set, each as a path that starts
/// and ends on the same ID.
pub(crate) fn find_cycles(conn: &Connection) -> Result<Vec<Vec<String>>> {
    let mut adjacency: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for edge in storage::all_dependencies(conn)? {
        adjacency.entry(edge.depends_on.clone()).or_default();
        adjacency.entry(edge.item_id).or_default().push(edge.depends_on);
    }

    let mut walker = CycleWalker {
        adjacency: &adjacency,
        path: Vec::new(),
        on_path: HashSet::new(),
        finished: HashSet::new(),
        cycles: Vec::new(),
    };

    for node in adjacency.keys() {
        if !walker.finished.contains(node.as_str()) {
            walker.visit(node);
        }
    }

    Ok(walker.cycles)
}

struct CycleWalker<'a> {
    adjacency: &'a BTreeMap<String, Vec<String>>,
    path: Vec<&'a str>,
    on_path: HashSet<&'a str>,
    finished: HashSet<&'a str>,
    cycles: Vec<Vec<String>>,
}

impl<'a> CycleWalker<'a> {
    fn visit(&mut self, node: &'a str) {
        self.path.push(node);
        self.on_path.insert(node);

        let adjacency = self.adjacency;
        let neighbors = adjacency.get(node).map(Vec::as_slice).unwrap_or_default();
        for next in neighbors {
            let next = next.as_str();
            if self.on_path.contains(next) {
                let start = self.path.iter().position(|id| *id == next).unwrap_or(0);
                let mut cycle: Vec<String> = self.path[start..].iter().map(|id| id.to_string()).collect();
                cycle.push(next.to_string());
                self.cycles.push(cycle);
            } else if !self.finished.contains(next) {
                self.visit(next);
            }
        }

        self.path.pop();
        self.on_path.remove(node);
        self.finished.insert(node);
    }
}

/// True if one of the two is the other's parent.
pub(crate) fn is_hierarchy_pair(a: &Item, b: &Item) -> bool {
    a.parent_id.as_deref() == Some(b.id.as_str()) || b.parent_id.as_deref() == Some(a.id.as_str())
}

/// Dependency edges that coincide with a parent/child link.
pub(crate) fn parent_child_conflicts(conn: &Connection) -> Result<Vec<HierarchyConflict>> {
    let parents: HashMap<String, Option<String>> = storage::list_items(conn, &storage::ItemFilter::new())?
        .into_iter()
        .map(|item| (item.id, item.parent_id))
        .collect();

    let mut out = Vec::new();
    for edge in storage::all_dependencies(conn)? {
        let item_parent = parents.get(&edge.item_id).cloned().flatten();
        let dep_parent = parents.get(&edge.depends_on).cloned().flatten();

        let pair = if item_parent.as_deref() == Some(edge.depends_on.as_str()) {
            Some((edge.depends_on.clone(), edge.item_id.clone()))
        } else if dep_parent.as_deref() == Some(edge.item_id.as_str()) {
            Some((edge.item_id.clone(), edge.depends_on.clone()))
        } else {
            None
        };

        if let Some((parent_id, child_id)) = pair {
            out.push(HierarchyConflict {
                item_id: edge.item_id,
                depends_on: edge.depends_on,
                parent_id,
                child_id,
            });
        }
    }

    Ok(out)
}

impl Store {
    /// Make `item_id` depend on `depends_on`.
    ///
    /// Rejects self-edges, edges between a parent and its child, and edges that
    /// would close a cycle. Inserting an existing edge is a no-op. If `item_id`
    /// is in progress and `depends_on` is not done, `item_id` drops back to
    /// open, loses its agent claim, and gets a log entry saying why.
    pub fn add_dependency(&mut self, item_id: &str, depends_on: &str) -> Result<DependencyOutcome> {
        if item_id == depends_on {
            return Err(eyre::eyre!(StoreError::SelfDependency(item_id.to_string())));
        }

        let outcome = self.storage.transaction(|tx| {
            let mut item = require_item(tx, item_id)?;
            let dependency = require_item(tx, depends_on)?;

            if is_hierarchy_pair(&item, &dependency) {
                return Err(eyre::eyre!(StoreError::HierarchyConflict {
                    item_id: item_id.to_string(),
                    depends_on: depends_on.to_string(),
                }));
            }

            if would_create_cycle(tx, item_id, depends_on)? {
                return Err(eyre::eyre!(StoreError::CycleDetected {
                    item_id: item_id.to_string(),
                    depends_on: depends_on.to_string(),
                }));
            }

            let now = Utc::now();
            let created = storage::insert_dependency(tx, item_id, depends_on, now)?;

            let mut reverted = false;
            if item.status == Status::InProgress && dependency.status != Status::Done {
                let previous_agent = item.agent_id.take();
                item.status = Status::Open;
                item.agent_last_active = None;
                item.updated_at = now;
                storage::update_item(tx, &item)?;

                let claim = previous_agent
                    .map(|agent| format!("; released claim held by {}", agent))
                    .unwrap_or_default();
                let message = format!(
                    "Reverted to open: now depends on {} ({}), which is {}{}",
                    dependency.id, dependency.title, dependency.status, claim
                );
                storage::insert_log(tx, item_id, &message, now)?;
                reverted = true;
            }

            Ok(DependencyOutcome {
                item_id: item_id.to_string(),
                depends_on: depends_on.to_string(),
                created,
                reverted,
            })
        })?;

        if outcome.created {
            info!("Added dependency {} -> {}", item_id, depends_on);
        }
        if outcome.reverted {
            info!("Reverted {} to open after depending on unfinished {}", item_id, depends_on);
        }
        Ok(outcome)
    }

    /// Remove the edge `item_id -> depends_on`.
    pub fn remove_dependency(&mut self, item_id: &str, depends_on: &str) -> Result<()> {
        if !storage::delete_dependency(self.storage.conn(), item_id, depends_on)? {
            return Err(eyre::eyre!(StoreError::DependencyNotFound {
                item_id: item_id.to_string(),
                depends_on: depends_on.to_string(),
            }));
        }
        info!("Removed dependency {} -> {}", item_id, depends_on);
        Ok(())
    }

    /// Items `item_id` depends on.
    pub fn get_dependencies(&self, item_id: &str) -> Result<Vec<DependencyInfo>> {
        let conn = self.storage.conn();
        require_item(conn, item_id)?;
        storage::dependencies_of(conn, item_id)
    }

    /// Items that depend on `item_id`, i.e. the ones it blocks.
    pub fn get_blocked_by(&self, item_id: &str) -> Result<Vec<DependencyInfo>> {
        let conn = self.storage.conn();
        require_item(conn, item_id)?;
        storage::dependents_of(conn, item_id)
    }

    /// True if any direct dependency is not done.
    pub fn has_unmet_dependencies(&self, item_id: &str) -> Result<bool> {
        let conn = self.storage.conn();
        require_item(conn, item_id)?;
        has_unmet_dependencies(conn, item_id)
    }

    /// Unmet dependencies inherited from ancestor epics.
    pub fn get_ancestor_dependencies(&self, item_id: &str) -> Result<Vec<InheritedDependency>> {
        let conn = self.storage.conn();
        require_item(conn, item_id)?;
        ancestor_dependencies(conn, item_id, self.config.max_traversal_depth)
    }

    /// Open items that would become ready if `item_id` were completed now,
    /// ordered by ripple depth, then priority, then age.
    pub fn get_impact(&self, item_id: &str) -> Result<Vec<ImpactItem>> {
        let conn = self.storage.conn();
        require_item(conn, item_id)?;
        impact(conn, item_id, self.config.max_traversal_depth)
    }

    /// Every dependency edge in the store.
    pub fn list_dependencies(&self) -> Result<Vec<Dependency>> {
        storage::all_dependencies(self.storage.conn())
    }

    /// Audit: every dependency cycle present in the store.
    pub fn find_circular_deps(&self) -> Result<Vec<Vec<String>>> {
        find_cycles(self.storage.conn())
    }

    /// Audit: every dependency edge that duplicates a parent/child link.
    pub fn find_parent_child_circular_deps(&self) -> Result<Vec<HierarchyConflict>> {
        parent_child_conflicts(self.storage.conn())
    }

    /// Repair: delete every edge reported by `find_parent_child_circular_deps`.
    pub fn fix_all_parent_child_circular_deps(&mut self) -> Result<Vec<HierarchyConflict>> {
        let removed = self.storage.transaction(|tx| {
            let conflicts = parent_child_conflicts(tx)?;
            let now = Utc::now();
            for conflict in &conflicts {
                storage::delete_dependency(tx, &conflict.item_id, &conflict.depends_on)?;
                let message = format!(
                    "Removed dependency on {}: it duplicates the parent/child link between {} and {}",
                    conflict.depends_on, conflict.parent_id, conflict.child_id
                );
                storage::insert_log(tx, &conflict.item_id, &message, now)?;
            }
            Ok(conflicts)
        })?;

        if !removed.is_empty() {
            warn!("Removed {} dependency edge(s) conflicting with the hierarchy", removed.len());
        }
        Ok(removed)
    }
}
