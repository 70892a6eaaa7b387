use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::reference::Reference;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub handle: String,
    pub display_name: String,
    pub bio: Option<String>,
    pub photo_url: Option<String>,
    /// Device token for push delivery; absent means no push for this user.
    pub push_token: Option<String>,
    // Mirrors of relations whose source of truth lives on the target
    // entity. Kept in sync by the relation toggle, eventually consistent.
    pub liked_posts: BTreeSet<Reference>,
    pub liked_comments: BTreeSet<Reference>,
    pub commented_posts: BTreeSet<Reference>,
    pub chats: BTreeSet<Reference>,
    #[serde(with = "crate::domain::ts_nanos")]
    pub created_at: OffsetDateTime,
}
