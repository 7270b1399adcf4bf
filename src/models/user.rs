use serde::{Deserialize, Serialize};
use std::fmt;

/// A user document. `name` is the de-facto primary key, enforced by the unique index.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub age: i32,
}

impl User {
    pub fn new(name: impl Into<String>, age: i32) -> Self {
        Self {
            name: name.into(),
            age,
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.name, self.age)
    }
}

/// Acknowledgment returned by an insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertAck {
    /// Generated identifier (hex for an ObjectId)
    pub inserted_id: String,
}

impl InsertAck {
    pub fn from_bson(id: &mongodb::bson::Bson) -> Self {
        let inserted_id = match id {
            mongodb::bson::Bson::ObjectId(oid) => oid.to_hex(),
            mongodb::bson::Bson::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self { inserted_id }
    }
}

impl fmt::Display for InsertAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inserted {}", self.inserted_id)
    }
}
