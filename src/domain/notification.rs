use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::OffsetDateTime;

use crate::domain::reference::Reference;

/// Stored in the recipient's `users/<id>/notifications` subcollection.
/// The document id is derived from the `(sender, post, kind)` dedup key,
/// so a duplicate event collides with the existing document instead of
/// racing a lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub sender: Reference,
    pub kind: NotificationKind,
    pub post: Option<Reference>,
    pub read: bool,
    #[serde(with = "crate::domain::ts_nanos")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Like,
    Comment,
    Message,
}

impl NotificationKind {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Like),
            1 => Some(Self::Comment),
            2 => Some(Self::Message),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Like => 0,
            Self::Comment => 1,
            Self::Message => 2,
        }
    }
}

impl Serialize for NotificationKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for NotificationKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let code = i64::deserialize(deserializer)?;
        NotificationKind::from_code(code)
            .ok_or_else(|| D::Error::custom(format!("unknown notification kind: {}", code)))
    }
}
