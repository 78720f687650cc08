//! Tangle: a dependency and lifecycle graph for tasks and epics.
//!
//! Items live in a SQLite store. The engine keeps the dependency graph
//! acyclic, keeps dependency edges and parent/child links disjoint, guards
//! closing and deleting, and merges items without breaking either rule.
//!
//! # Example
//!
//! ```no_run
//! use tangle::{Status, Store, StoreBuilderExt};
//! use std::path::Path;
//!
//! let mut store = Store::init(Path::new(".")).unwrap();
//!
//! let schema = store.build("api", "Design schema").priority(1).create().unwrap();
//! let handler = store.build("api", "Write handlers").create().unwrap();
//!
//! store.add_dependency(&handler.id, &schema.id).unwrap();
//! assert!(store.has_unmet_dependencies(&handler.id).unwrap());
//!
//! // Finishing the schema unblocks the handlers
//! let impact = store.get_impact(&schema.id).unwrap();
//! assert_eq!(impact[0].id, handler.id);
//!
//! store.update_status(&schema.id, Status::Done, None, true).unwrap();
//! assert!(!store.has_unmet_dependencies(&handler.id).unwrap());
//! ```

mod graph;
mod id;
mod lifecycle;
mod storage;
mod store;
mod types;

pub mod builder;
pub mod config;
pub mod merge;

// Re-export public API
pub use builder::{ItemBuilder, StoreBuilderExt};
pub use config::{Config, DEFAULT_MAX_TRAVERSAL_DEPTH};
pub use merge::MergeSummary;
pub use storage::ItemFilter;
pub use store::{ErrorKind, ItemUpdate, NewItem, Store, StoreError};
pub use types::{
    AgentContext, Dependency, DependencyInfo, DependencyOutcome, EpicCompletion, HierarchyConflict, ImpactItem,
    InheritedDependency, Item, ItemType, LogEntry, Status, ValidationError, WorktreeInfo,
};
