/**
 * Shared Diagram Types
 *
 * Types describing diagram content as it crosses the wire. Cell geometry and
 * styling belong to the rendering surface, so cells are carried as opaque JSON
 * objects keyed by their `id`.
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned, monotonically increasing counter that totally orders
/// accepted diagram changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateVector(pub u64);

impl UpdateVector {
    /// The vector before any change has been accepted
    pub const ZERO: UpdateVector = UpdateVector(0);

    pub fn value(self) -> u64 {
        self.0
    }

    /// Whether `self` is strictly ahead of `other`
    pub fn is_ahead_of(self, other: UpdateVector) -> bool {
        self.0 > other.0
    }
}

impl fmt::Display for UpdateVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UpdateVector {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A diagram cell (node or edge)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cell {
    /// Cell ID
    pub id: String,
    /// Shape name (e.g. "process", "edge"), if the server sent one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<String>,
    /// Remaining cell attributes, untouched by the sync engine
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Cell {
    /// Create a bare cell with only an id and shape
    pub fn new(id: impl Into<String>, shape: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            shape: Some(shape.into()),
            attributes: serde_json::Map::new(),
        }
    }

    /// Set a single attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Kind of change applied to a single cell
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CellOperationKind {
    Add,
    Update,
    Remove,
}

/// One cell-level change inside a diagram patch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CellOperation {
    /// ID of the affected cell
    pub id: String,
    /// What happened to the cell
    pub operation: CellOperationKind,
    /// Full cell data for add/update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Cell>,
}

impl CellOperation {
    pub fn add(cell: Cell) -> Self {
        Self {
            id: cell.id.clone(),
            operation: CellOperationKind::Add,
            data: Some(cell),
        }
    }

    pub fn update(cell: Cell) -> Self {
        Self {
            id: cell.id.clone(),
            operation: CellOperationKind::Update,
            data: Some(cell),
        }
    }

    pub fn remove(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            operation: CellOperationKind::Remove,
            data: None,
        }
    }
}

/// A diagram operation: a typed batch of cell changes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiagramPatch {
    /// Operation type tag (the server currently only sends "patch")
    #[serde(rename = "type")]
    pub patch_type: String,
    /// Cell changes in application order
    #[serde(default)]
    pub cells: Vec<CellOperation>,
}

impl DiagramPatch {
    /// Create a "patch" typed operation
    pub fn new(cells: Vec<CellOperation>) -> Self {
        Self {
            patch_type: "patch".to_string(),
            cells,
        }
    }

    /// IDs of every cell touched by this patch
    pub fn cell_ids(&self) -> Vec<String> {
        self.cells.iter().map(|c| c.id.clone()).collect()
    }
}

/// Full authoritative diagram content at a given update vector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiagramSnapshot {
    /// Diagram ID
    pub diagram_id: String,
    /// Server counter this snapshot corresponds to
    pub update_vector: UpdateVector,
    /// Every cell in the diagram
    #[serde(default)]
    pub cells: Vec<Cell>,
}

/// A user as identified by the collaboration server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct User {
    /// Stable user identifier
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl User {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Name to show in notices, falling back to the user id
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.user_id)
    }
}

/// An entry in the server's participant roster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub user: User,
    /// Permission level ("reader", "writer", "owner")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<chrono::DateTime<chrono::Utc>>,
}

impl Participant {
    pub fn new(user: User) -> Self {
        Self {
            user,
            permissions: None,
            last_activity: None,
        }
    }
}
