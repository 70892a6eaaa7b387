use std::fmt;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Opaque handle to a document in a named collection. Two references are
/// equal iff their `collection/id` paths are equal, which makes them usable
/// as set members and dedup-key components.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reference {
    collection: String,
    id: String,
}

impl Reference {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self::new("users", id)
    }

    pub fn post(id: impl Into<String>) -> Self {
        Self::new("posts", id)
    }

    pub fn genre(id: impl Into<String>) -> Self {
        Self::new("genres", id)
    }

    pub fn chat(id: impl Into<String>) -> Self {
        Self::new("chats", id)
    }

    /// Collection path; may itself be nested (`posts/<id>/comments`).
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> String {
        format!("{}/{}", self.collection, self.id)
    }

    /// Collection path of a subcollection scoped under this document,
    /// e.g. `posts/<id>/comments` or `users/<id>/notifications`.
    pub fn subcollection(&self, name: &str) -> String {
        format!("{}/{}/{}", self.collection, self.id, name)
    }

    pub fn parse(path: &str) -> Option<Self> {
        let (collection, id) = path.rsplit_once('/')?;
        if collection.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self::new(collection, id))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

impl Serialize for Reference {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.path())
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let path = String::deserialize(deserializer)?;
        Reference::parse(&path)
            .ok_or_else(|| D::Error::custom(format!("invalid document path: {}", path)))
    }
}
