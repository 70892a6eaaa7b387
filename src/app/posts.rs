use std::collections::BTreeSet;
use std::sync::Arc;

use time::OffsetDateTime;
use ulid::Ulid;

use crate::app::counters::{CounterField, CounterMutator};
use crate::config::EngineConfig;
use crate::domain::post::{Poll, PollOption, Post};
use crate::domain::reference::Reference;
use crate::error::EngineError;
use crate::infra::store::{decode, encode, DocumentStore, Query};

pub struct NewPost {
    pub author: Reference,
    pub genre: Reference,
    pub title: String,
    pub body: String,
    pub anonymous: bool,
    pub photo_url: Option<String>,
    pub poll_options: Option<Vec<String>>,
}

#[derive(Clone)]
pub struct PostService {
    store: Arc<dyn DocumentStore>,
    counters: CounterMutator,
    config: EngineConfig,
}

impl PostService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        counters: CounterMutator,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            counters,
            config,
        }
    }

    pub async fn create_post(&self, new: NewPost) -> Result<Post, EngineError> {
        let title = new.title.trim().to_string();
        if title.is_empty() {
            return Err(EngineError::EmptyTitle);
        }
        if title.chars().count() > self.config.max_title_chars {
            return Err(EngineError::TitleTooLong(self.config.max_title_chars));
        }
        if new.body.chars().count() > self.config.max_body_chars {
            return Err(EngineError::BodyTooLong(self.config.max_body_chars));
        }

        let poll = match new.poll_options {
            Some(labels) => Some(build_poll(labels)?),
            None => None,
        };

        let post = Post {
            id: Ulid::new().to_string(),
            title,
            body: new.body,
            author: new.author,
            genre: new.genre,
            anonymous: new.anonymous,
            photo_url: new.photo_url,
            num_likes: 0,
            num_comments: 0,
            views: 0,
            liked_by: BTreeSet::new(),
            poll,
            posted_at: OffsetDateTime::now_utc(),
        };

        self.store
            .set(&Reference::post(&post.id), encode(&post)?)
            .await?;
        Ok(post)
    }

    pub async fn get_post(&self, post: &Reference) -> Result<Option<Post>, EngineError> {
        let post = match self.store.get(post).await? {
            Some(fields) => Some(decode(post, fields)?),
            None => None,
        };
        Ok(post)
    }

    /// Fire-and-count view tracking: one counter bump, no mirror, no
    /// notification.
    pub async fn record_view(&self, post: &Reference) -> Result<(), EngineError> {
        self.counters
            .apply_counter_delta(post, CounterField::PostViews, 1)
            .await
    }

    /// Removes the post and every comment and reply under it. Entries left
    /// in users' `liked_posts` mirrors dangle; readers of those mirrors
    /// tolerate missing targets.
    pub async fn delete_post(&self, post: &Reference, actor: &Reference) -> Result<bool, EngineError> {
        let fields = match self.store.get(post).await? {
            Some(fields) => fields,
            None => return Ok(false),
        };
        let existing: Post = decode(post, fields)?;
        if existing.author != *actor {
            return Err(EngineError::NotPostAuthor);
        }

        let comments = self
            .store
            .query(Query::collection(post.subcollection("comments")))
            .await?;
        for comment in comments.docs {
            let replies = self
                .store
                .query(Query::collection(comment.reference.subcollection("replies")))
                .await?;
            for reply in replies.docs {
                self.store.delete(&reply.reference).await?;
            }
            self.store.delete(&comment.reference).await?;
        }

        self.store.delete(post).await?;
        Ok(true)
    }
}

fn build_poll(labels: Vec<String>) -> Result<Poll, EngineError> {
    if labels.len() < 2 {
        return Err(EngineError::BadPoll(
            "a poll needs at least two options".to_string(),
        ));
    }
    if labels.iter().any(|label| label.trim().is_empty()) {
        return Err(EngineError::BadPoll(
            "every poll option needs a label".to_string(),
        ));
    }
    Ok(Poll {
        options: labels
            .into_iter()
            .map(|label| PollOption { label, votes: 0 })
            .collect(),
        voters: BTreeSet::new(),
    })
}
