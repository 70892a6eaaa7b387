use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::reference::Reference;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub members: BTreeSet<Reference>,
    /// Direct chats are unique per unordered member pair; the id is
    /// derived from the pair so concurrent starts collide on one document.
    pub is_direct: bool,
    pub last_message: Option<String>,
    #[serde(with = "crate::domain::ts_nanos")]
    pub last_message_at: OffsetDateTime,
    #[serde(with = "crate::domain::ts_nanos")]
    pub created_at: OffsetDateTime,
}

/// Lives in `chats/<id>/messages`. At least one of `text` / `image_url`
/// is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender: Reference,
    pub text: Option<String>,
    pub image_url: Option<String>,
    #[serde(with = "crate::domain::ts_nanos")]
    pub sent_at: OffsetDateTime,
}
