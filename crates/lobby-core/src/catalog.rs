//! Room catalog.
//!
//! The catalog is the read-only list of rooms a connection may join.
//! Membership lives in [`RoomRoster`](crate::roster::RoomRoster), not here.

use lobby_protocol::Room;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Maximum room id length.
pub const MAX_ROOM_ID_LENGTH: usize = 64;

/// A room identifier.
pub type RoomId = String;

/// Catalog loading errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A room id failed validation.
    #[error("Invalid room id {id:?}: {reason}")]
    InvalidRoomId { id: String, reason: &'static str },

    /// Two rooms share an id.
    #[error("Duplicate room id: {0}")]
    DuplicateRoomId(String),

    /// The catalog file could not be read.
    #[error("Failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    /// The catalog file is not a JSON array of rooms.
    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Validate a room id.
///
/// # Errors
///
/// Returns the reason if the id is invalid.
pub fn validate_room_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("Room id cannot be empty");
    }
    if id.len() > MAX_ROOM_ID_LENGTH {
        return Err("Room id too long");
    }
    if !id.chars().all(|c| c.is_ascii_graphic()) {
        return Err("Room id contains invalid characters");
    }
    Ok(())
}

/// Source of the rooms connections may join.
pub trait RoomCatalog: Send + Sync {
    /// All rooms, in display order.
    fn list_rooms(&self) -> Vec<Room>;

    /// Look up a room by id.
    fn get(&self, id: &str) -> Option<Room>;

    /// Check whether a room exists.
    fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }
}

/// A fixed, validated list of rooms.
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    rooms: Vec<Room>,
}

impl StaticCatalog {
    /// Build a catalog from a list of rooms.
    ///
    /// # Errors
    ///
    /// Returns an error if any id is invalid or repeated.
    pub fn new(rooms: Vec<Room>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for room in &rooms {
            validate_room_id(&room.id).map_err(|reason| CatalogError::InvalidRoomId {
                id: room.id.clone(),
                reason,
            })?;
            if !seen.insert(room.id.as_str()) {
                return Err(CatalogError::DuplicateRoomId(room.id.clone()));
            }
        }
        Ok(Self { rooms })
    }

    /// Parse a catalog from a JSON array of `{id, name, description}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the rooms are invalid.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let rooms: Vec<Room> = serde_json::from_str(json)?;
        Self::new(rooms)
    }

    /// Load a catalog from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let catalog = Self::from_json(&contents)?;
        debug!(path = %path.display(), rooms = catalog.len(), "Loaded room catalog");
        Ok(catalog)
    }

    /// Number of rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

impl Default for StaticCatalog {
    fn default() -> Self {
        Self {
            rooms: vec![
                Room::new("general", "General", "General discussion"),
                Room::new("tech", "Technology", "Tech discussions"),
                Room::new("random", "Random", "Random conversations"),
            ],
        }
    }
}

impl RoomCatalog for StaticCatalog {
    fn list_rooms(&self) -> Vec<Room> {
        self.rooms.clone()
    }

    fn get(&self, id: &str) -> Option<Room> {
        self.rooms.iter().find(|r| r.id == id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog() {
        let catalog = StaticCatalog::default();
        let ids: Vec<_> = catalog.list_rooms().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, ["general", "tech", "random"]);
        assert!(catalog.contains("tech"));
        assert!(!catalog.contains("nonexistent"));
        assert_eq!(catalog.get("tech").unwrap().name, "Technology");
    }

    #[test]
    fn test_room_id_validation() {
        assert!(validate_room_id("general").is_ok());
        assert!(validate_room_id("").is_err());
        assert!(validate_room_id("has space").is_err());
        assert!(validate_room_id(&"a".repeat(MAX_ROOM_ID_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_catalog_from_json() {
        let catalog = StaticCatalog::from_json(
            r#"[{"id": "ops", "name": "Ops", "description": "On-call chatter"}]"#,
        )
        .unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.contains("ops"));
    }

    #[test]
    fn test_catalog_rejects_duplicates() {
        let result = StaticCatalog::new(vec![
            Room::new("a", "A", ""),
            Room::new("a", "Again", ""),
        ]);
        assert!(matches!(result, Err(CatalogError::DuplicateRoomId(id)) if id == "a"));
    }

    #[test]
    fn test_catalog_rejects_malformed_json() {
        assert!(matches!(
            StaticCatalog::from_json("{}"),
            Err(CatalogError::Parse(_))
        ));
    }
}
