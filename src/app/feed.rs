use std::sync::Arc;

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::warn;

use crate::config::EngineConfig;
use crate::domain::post::{Genre, Post};
use crate::domain::reference::Reference;
use crate::domain::timestamp_nanos;
use crate::domain::user::User;
use crate::error::EngineError;
use crate::infra::store::{decode, Cursor, DocumentStore, OrderBy, Query};

/// Client-side predicates; the store only orders and slices.
#[derive(Debug, Clone, Default)]
pub struct FeedFilter {
    /// Case-insensitive substring match on title or body.
    pub text: Option<String>,
    pub genre_id: Option<String>,
}

impl FeedFilter {
    fn is_active(&self) -> bool {
        self.text.is_some() || self.genre_id.is_some()
    }

    fn matches(&self, post: &Post) -> bool {
        if let Some(text) = &self.text {
            let needle = text.to_lowercase();
            if !post.title.to_lowercase().contains(&needle)
                && !post.body.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        if let Some(genre_id) = &self.genre_id {
            if post.genre.id() != genre_id {
                return false;
            }
        }
        true
    }
}

/// Pagination position. The two variants belong to the two fetch paths
/// and are not interchangeable: a filtered feed counts consumed items, an
/// unfiltered one resumes after a `(posted_at, id)` position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCursor {
    After { posted_at: OffsetDateTime, id: String },
    Offset(usize),
}

#[derive(Debug, Clone)]
pub struct FeedItem {
    pub post: Post,
    pub author: Option<User>,
    pub genre: Option<Genre>,
}

#[derive(Debug, Clone)]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    pub next_cursor: Option<FeedCursor>,
    pub has_more: bool,
}

#[derive(Clone)]
pub struct FeedService {
    store: Arc<dyn DocumentStore>,
    config: EngineConfig,
}

impl FeedService {
    pub fn new(store: Arc<dyn DocumentStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// One feed page, newest first. `page_size` of zero means the
    /// configured default; anything above the configured maximum is
    /// clamped down to it.
    pub async fn load_page(
        &self,
        cursor: Option<FeedCursor>,
        page_size: usize,
        filter: &FeedFilter,
    ) -> Result<FeedPage, EngineError> {
        let size = if page_size == 0 {
            self.config.default_page_size
        } else {
            page_size.min(self.config.max_page_size)
        };

        if filter.is_active() {
            self.load_filtered(cursor, size, filter).await
        } else {
            self.load_unfiltered(cursor, size).await
        }
    }

    async fn load_unfiltered(
        &self,
        cursor: Option<FeedCursor>,
        size: usize,
    ) -> Result<FeedPage, EngineError> {
        let mut query = Query::collection("posts")
            .order_by(OrderBy::desc("posted_at"))
            .limit(size);
        match cursor {
            None => {}
            Some(FeedCursor::After { posted_at, id }) => {
                query = query.start_after(Cursor {
                    value: Value::from(timestamp_nanos(posted_at)),
                    id,
                });
            }
            Some(FeedCursor::Offset(_)) => return Err(EngineError::CursorMismatch),
        }

        let page = self.store.query(query).await?;
        let mut posts = Vec::with_capacity(page.docs.len());
        for doc in page.docs {
            posts.push(decode::<Post>(&doc.reference, doc.fields)?);
        }

        // A short page means the feed is exhausted.
        let has_more = posts.len() == size;
        let next_cursor = if has_more {
            posts.last().map(|post| FeedCursor::After {
                posted_at: post.posted_at,
                id: post.id.clone(),
            })
        } else {
            None
        };

        let items = self.enrich(posts).await;
        Ok(FeedPage {
            items,
            next_cursor,
            has_more,
        })
    }

    async fn load_filtered(
        &self,
        cursor: Option<FeedCursor>,
        size: usize,
        filter: &FeedFilter,
    ) -> Result<FeedPage, EngineError> {
        let offset = match cursor {
            None => 0,
            Some(FeedCursor::Offset(offset)) => offset,
            Some(FeedCursor::After { .. }) => return Err(EngineError::CursorMismatch),
        };

        let scan = self
            .store
            .query(
                Query::collection("posts")
                    .order_by(OrderBy::desc("posted_at"))
                    .limit(self.config.feed_scan_limit),
            )
            .await?;
        let scan_truncated = scan.has_more;

        let mut filtered = Vec::new();
        for doc in scan.docs {
            let post: Post = decode(&doc.reference, doc.fields)?;
            if filter.matches(&post) {
                filtered.push(post);
            }
        }

        let total = filtered.len();
        let window: Vec<Post> = filtered.into_iter().skip(offset).take(size).collect();
        let consumed = offset + window.len();
        // May overreport when only the scan was truncated; never
        // underreports within the scanned range.
        let has_more = consumed < total || scan_truncated;
        let next_cursor = has_more.then_some(FeedCursor::Offset(consumed));

        let items = self.enrich(window).await;
        Ok(FeedPage {
            items,
            next_cursor,
            has_more,
        })
    }

    async fn enrich(&self, posts: Vec<Post>) -> Vec<FeedItem> {
        join_all(posts.into_iter().map(|post| self.enrich_post(post))).await
    }

    /// Missing or unreadable author/genre documents degrade to `None`;
    /// anonymous posts never look the author up.
    async fn enrich_post(&self, post: Post) -> FeedItem {
        let author = if post.anonymous {
            None
        } else {
            self.fetch::<User>(&post.author).await
        };
        let genre = self.fetch::<Genre>(&post.genre).await;
        FeedItem { post, author, genre }
    }

    async fn fetch<T: DeserializeOwned>(&self, reference: &Reference) -> Option<T> {
        match self.store.get(reference).await {
            Ok(Some(fields)) => match decode(reference, fields) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(error = ?err, reference = %reference, "feed enrichment decode failed");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(error = ?err, reference = %reference, "feed enrichment fetch failed");
                None
            }
        }
    }
}
