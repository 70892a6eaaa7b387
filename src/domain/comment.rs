use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::reference::Reference;

/// Top-level comments live in `posts/<id>/comments`; replies live one
/// level deeper in `posts/<id>/comments/<id>/replies` and carry the
/// parent's id. Nesting stops there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post: Reference,
    pub author: Reference,
    pub content: String,
    pub num_likes: i64,
    pub liked_by: BTreeSet<Reference>,
    pub parent_comment_id: Option<String>,
    #[serde(with = "crate::domain::ts_nanos")]
    pub created_at: OffsetDateTime,
}

/// One rendered thread entry: a top-level comment plus its replies in
/// creation order.
#[derive(Debug, Clone)]
pub struct CommentThread {
    pub comment: Comment,
    pub replies: Vec<Comment>,
}
