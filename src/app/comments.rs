use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use time::OffsetDateTime;
use tracing::warn;
use ulid::Ulid;

use crate::app::counters::{CounterField, CounterMutator, RelationField};
use crate::app::notifications::NotificationService;
use crate::config::EngineConfig;
use crate::domain::comment::{Comment, CommentThread};
use crate::domain::notification::NotificationKind;
use crate::domain::post::Post;
use crate::domain::reference::Reference;
use crate::error::EngineError;
use crate::infra::store::{decode, encode, DocumentStore, OrderBy, Query, StoreError};

#[derive(Clone)]
pub struct CommentService {
    store: Arc<dyn DocumentStore>,
    counters: CounterMutator,
    notifications: NotificationService,
    config: EngineConfig,
}

impl CommentService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        counters: CounterMutator,
        notifications: NotificationService,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            counters,
            notifications,
            config,
        }
    }

    /// Adds a comment or, when `parent` is given, a reply. Threads are two
    /// levels deep at most; replying to a reply is rejected. Returns the
    /// comment as written so the caller can append it without a re-fetch.
    pub async fn add_comment(
        &self,
        post: &Reference,
        author: &Reference,
        content: String,
        parent: Option<&Reference>,
    ) -> Result<Comment, EngineError> {
        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(EngineError::EmptyComment);
        }
        if content.chars().count() > self.config.max_comment_chars {
            return Err(EngineError::CommentTooLong(self.config.max_comment_chars));
        }

        let post_fields = self
            .store
            .get(post)
            .await?
            .ok_or_else(|| StoreError::NotFound(post.clone()))?;
        let post_doc: Post = decode(post, post_fields)?;

        let (collection, parent_comment_id) = match parent {
            Some(parent_ref) => {
                let fields = self
                    .store
                    .get(parent_ref)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(parent_ref.clone()))?;
                let parent_comment: Comment = decode(parent_ref, fields)?;
                if parent_comment.parent_comment_id.is_some() {
                    return Err(EngineError::ReplyTooDeep);
                }
                (
                    parent_ref.subcollection("replies"),
                    Some(parent_ref.id().to_string()),
                )
            }
            None => (post.subcollection("comments"), None),
        };

        let comment = Comment {
            id: Ulid::new().to_string(),
            post: post.clone(),
            author: author.clone(),
            content,
            num_likes: 0,
            liked_by: BTreeSet::new(),
            parent_comment_id,
            created_at: OffsetDateTime::now_utc(),
        };

        self.store
            .set(&Reference::new(collection, &comment.id), encode(&comment)?)
            .await?;
        // Replies count toward the post total too.
        self.counters
            .apply_counter_delta(post, CounterField::PostComments, 1)
            .await?;
        self.counters
            .apply_relation_delta(author, RelationField::UserCommentedPosts, post, true)
            .await?;

        if let Err(err) = self
            .notifications
            .maybe_notify(author, &post_doc.author, NotificationKind::Comment, Some(post))
            .await
        {
            warn!(error = ?err, post = %post, "comment notification failed");
        }

        Ok(comment)
    }

    /// Top-level comments in creation order, each with its replies. A
    /// failed reply fetch degrades that thread to an empty reply list
    /// instead of failing the whole load.
    pub async fn load_thread(&self, post: &Reference) -> Result<Vec<CommentThread>, EngineError> {
        let top_level = self
            .load_comments(
                Query::collection(post.subcollection("comments"))
                    .order_by(OrderBy::asc("created_at")),
            )
            .await?;

        let comments_path = post.subcollection("comments");
        let reply_futures = top_level.iter().map(|comment| {
            let reference = Reference::new(&comments_path, &comment.id);
            async move { self.fetch_replies(&reference).await }
        });
        let replies = join_all(reply_futures).await;

        Ok(top_level
            .into_iter()
            .zip(replies)
            .map(|(comment, replies)| CommentThread { comment, replies })
            .collect())
    }

    /// Author-only. Deleting a top-level comment removes its replies first
    /// and decrements the post count by everything removed. `false` when
    /// the comment is already gone.
    pub async fn delete_comment(
        &self,
        post: &Reference,
        comment: &Reference,
        actor: &Reference,
    ) -> Result<bool, EngineError> {
        let fields = match self.store.get(comment).await? {
            Some(fields) => fields,
            None => return Ok(false),
        };
        let existing: Comment = decode(comment, fields)?;
        if existing.author != *actor {
            return Err(EngineError::NotCommentAuthor);
        }

        let mut removed: i64 = 1;
        if existing.parent_comment_id.is_none() {
            let replies = self
                .store
                .query(Query::collection(comment.subcollection("replies")))
                .await?;
            for reply in replies.docs {
                self.store.delete(&reply.reference).await?;
                removed += 1;
            }
        }

        self.store.delete(comment).await?;
        self.counters
            .apply_counter_delta(post, CounterField::PostComments, -removed)
            .await?;
        Ok(true)
    }

    async fn fetch_replies(&self, comment: &Reference) -> Vec<Comment> {
        let query = Query::collection(comment.subcollection("replies"))
            .order_by(OrderBy::asc("created_at"));
        match self.load_comments(query).await {
            Ok(replies) => replies,
            Err(err) => {
                warn!(error = ?err, comment = %comment, "reply fetch failed, returning thread without replies");
                Vec::new()
            }
        }
    }

    async fn load_comments(&self, query: Query) -> Result<Vec<Comment>, EngineError> {
        let page = self.store.query(query).await?;
        let mut comments = Vec::with_capacity(page.docs.len());
        for doc in page.docs {
            comments.push(decode(&doc.reference, doc.fields)?);
        }
        Ok(comments)
    }
}
