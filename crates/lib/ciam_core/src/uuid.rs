//! Identifier generation.
//!
//! Request history rows use UUIDv7 so they sort by insertion time. User ids
//! are random v4 UUIDs and carry no timing information.

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}

/// Generate a fresh user id.
pub fn new_user_id() -> String {
    Uuid::new_v4().to_string()
}
