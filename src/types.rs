//! Core data types for the Tangle work graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A task or epic tracked in the graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    /// Unique identifier: "task-" or "epic-" + 10 hex chars
    pub id: String,

    /// Grouping key
    pub project: String,

    /// Task or epic
    #[serde(rename = "type")]
    pub item_type: ItemType,

    /// Short description of the work
    pub title: String,

    /// Optional longer description (markdown)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Current state
    pub status: Status,

    /// Priority 0-4 (0 = critical, 4 = low)
    pub priority: u8,

    /// Parent in the hierarchy, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Agent currently holding the claim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    /// Last time the claiming agent touched the item
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_last_active: Option<DateTime<Utc>>,

    /// Summary written on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<String>,

    /// Epic only: context shared with every child
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_context: Option<String>,

    /// Epic only: what to do once every child is closed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closing_instructions: Option<String>,

    /// Worktree the item is being worked in, if recorded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<String>,

    /// Branch of that worktree
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree_branch: Option<String>,

    /// When created
    pub created_at: DateTime<Utc>,

    /// Last modification
    pub updated_at: DateTime<Utc>,
}

/// Item status states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Open,
    InProgress,
    Blocked,
    Done,
    Canceled,
}

impl Status {
    pub const ALL: [Status; 5] = [
        Status::Open,
        Status::InProgress,
        Status::Blocked,
        Status::Done,
        Status::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::InProgress => "in_progress",
            Status::Blocked => "blocked",
            Status::Done => "done",
            Status::Canceled => "canceled",
        }
    }

    /// Done or canceled.
    pub fn is_closed(&self) -> bool {
        matches!(self, Status::Done | Status::Canceled)
    }

    /// Moving into this status drops any agent claim.
    pub fn releases_claim(&self) -> bool {
        matches!(self, Status::Done | Status::Blocked | Status::Canceled)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidStatus(s.to_string()))
    }
}

/// Kinds of work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Task,
    Epic,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Task => "task",
            ItemType::Epic => "epic",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(ItemType::Task),
            "epic" => Ok(ItemType::Epic),
            other => Err(ValidationError::InvalidType(other.to_string())),
        }
    }
}

/// A directed "item_id depends on depends_on" edge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dependency {
    /// The item that is blocked
    pub item_id: String,

    /// The item it waits on
    pub depends_on: String,

    /// When the edge was created
    pub created_at: DateTime<Utc>,
}

/// What `add_dependency` did.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DependencyOutcome {
    pub item_id: String,
    pub depends_on: String,

    /// False when the edge already existed
    pub created: bool,

    /// True when the dependent item was knocked back from in_progress to open
    pub reverted: bool,
}

/// One end of a dependency edge, with enough detail for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DependencyInfo {
    pub id: String,
    pub title: String,
    pub status: Status,
    #[serde(rename = "type")]
    pub item_type: ItemType,
}

/// An unmet dependency picked up from an ancestor epic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InheritedDependency {
    #[serde(flatten)]
    pub dependency: DependencyInfo,

    /// Always true; kept on the wire so consumers can mix direct and inherited lists
    pub inherited: bool,

    /// The ancestor epic that owns the edge
    pub inherited_from: String,
}

/// An item that would become ready if the queried item were completed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImpactItem {
    pub id: String,
    pub title: String,
    pub priority: u8,
    pub created_at: DateTime<Utc>,

    /// Hops away from the completed item along "depends on me" edges
    pub depth: usize,
}

/// Audit log entry attached to an item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub id: i64,
    pub item_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// A dependency edge that duplicates a parent/child link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HierarchyConflict {
    pub item_id: String,
    pub depends_on: String,

    /// The parent of the pair
    pub parent_id: String,

    /// The child of the pair
    pub child_id: String,
}

/// Worktree metadata handed back when an epic is ready to close.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorktreeInfo {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// Returned when every child of a parent has been closed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpicCompletion {
    pub epic_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closing_instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree: Option<WorktreeInfo>,
    pub total_children: usize,
    pub done_children: usize,
    pub canceled_children: usize,
}

/// Identity of the agent issuing a status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentContext {
    pub agent_id: String,
}

impl AgentContext {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
        }
    }

    /// Read the agent identity from `TANGLE_AGENT_ID`, if set and non-empty.
    pub fn from_env() -> Option<Self> {
        std::env::var(crate::config::AGENT_ENV_VAR)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(Self::new)
    }
}

/// Validation errors for items.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyTitle,
    TitleTooLong,
    InvalidCharacters,
    InvalidPriority,
    EmptyProject,
    InvalidStatus(String),
    InvalidType(String),
    InvalidLabel(String),
    EpicOnlyField(&'static str),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyTitle => write!(f, "title cannot be empty"),
            ValidationError::TitleTooLong => write!(f, "title exceeds 500 characters"),
            ValidationError::InvalidCharacters => write!(f, "title contains control characters"),
            ValidationError::InvalidPriority => write!(f, "priority must be 0-4"),
            ValidationError::EmptyProject => write!(f, "project cannot be empty"),
            ValidationError::InvalidStatus(s) => {
                write!(f, "invalid status '{}': expected open, in_progress, blocked, done or canceled", s)
            }
            ValidationError::InvalidType(t) => write!(f, "invalid type '{}': expected task or epic", t),
            ValidationError::InvalidLabel(label) => {
                write!(
                    f,
                    "invalid label '{}': must be alphanumeric with hyphens/underscores",
                    label
                )
            }
            ValidationError::EpicOnlyField(field) => write!(f, "{} can only be set on epics", field),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a title on its own, shared by create and update.
pub fn validate_title(title: &str) -> Result<(), ValidationError> {
    if title.is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    if title.chars().count() > 500 {
        return Err(ValidationError::TitleTooLong);
    }
    if title.chars().any(|c| c.is_control()) {
        return Err(ValidationError::InvalidCharacters);
    }
    Ok(())
}

/// Labels: alphanumeric + hyphens/underscores, no spaces.
pub fn validate_label(label: &str) -> Result<(), ValidationError> {
    if label.is_empty() || !label.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
        return Err(ValidationError::InvalidLabel(label.to_string()));
    }
    Ok(())
}

impl Item {
    /// Validate the item's fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_title(&self.title)?;

        if self.project.trim().is_empty() {
            return Err(ValidationError::EmptyProject);
        }

        if self.priority > 4 {
            return Err(ValidationError::InvalidPriority);
        }

        if !self.is_epic() {
            if self.shared_context.is_some() {
                return Err(ValidationError::EpicOnlyField("shared_context"));
            }
            if self.closing_instructions.is_some() {
                return Err(ValidationError::EpicOnlyField("closing_instructions"));
            }
        }

        Ok(())
    }

    pub fn is_epic(&self) -> bool {
        self.item_type == ItemType::Epic
    }

    pub fn worktree(&self) -> Option<WorktreeInfo> {
        self.worktree_path.as_ref().map(|path| WorktreeInfo {
            path: path.clone(),
            branch: self.worktree_branch.clone(),
        })
    }
}
