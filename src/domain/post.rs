use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::reference::Reference;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub body: String,
    pub author: Reference,
    pub genre: Reference,
    pub anonymous: bool,
    pub photo_url: Option<String>,
    pub num_likes: i64,
    pub num_comments: i64,
    pub views: i64,
    /// Mirror of every user that currently likes this post; `num_likes`
    /// converges to its size, not necessarily instantaneously.
    pub liked_by: BTreeSet<Reference>,
    pub poll: Option<Poll>,
    #[serde(with = "crate::domain::ts_nanos")]
    pub posted_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub options: Vec<PollOption>,
    /// Paths of users that already voted; a member here blocks a second
    /// vote.
    pub voters: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOption {
    pub label: String,
    pub votes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genre {
    pub id: String,
    pub name: String,
}
