use std::sync::Arc;

use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::domain::notification::{Notification, NotificationKind};
use crate::domain::reference::Reference;
use crate::domain::timestamp_nanos;
use crate::error::EngineError;
use crate::infra::push::PushTransport;
use crate::infra::store::{decode, encode, Cursor, DocumentStore, Filter, OrderBy, Query};

#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn DocumentStore>,
    push: Arc<dyn PushTransport>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn DocumentStore>, push: Arc<dyn PushTransport>) -> Self {
        Self { store, push }
    }

    /// Inserts a notification for `recipient` unless one with the same
    /// `(sender, post, kind)` identity already exists. The identity is the
    /// document id itself, so concurrent senders collide on `create`
    /// instead of racing a lookup. Returns `None` when suppressed or
    /// deduplicated.
    pub async fn maybe_notify(
        &self,
        sender: &Reference,
        recipient: &Reference,
        kind: NotificationKind,
        post: Option<&Reference>,
    ) -> Result<Option<Notification>, EngineError> {
        if sender == recipient {
            debug!(user = %sender, "skipping self notification");
            return Ok(None);
        }

        let notification = Notification {
            id: dedup_id(sender, post, kind),
            sender: sender.clone(),
            kind,
            post: post.cloned(),
            read: false,
            created_at: OffsetDateTime::now_utc(),
        };

        let reference = Reference::new(
            recipient.subcollection("notifications"),
            &notification.id,
        );
        let created = self
            .store
            .create(&reference, encode(&notification)?)
            .await?;
        if !created {
            return Ok(None);
        }

        self.dispatch_push(recipient, kind).await;
        Ok(Some(notification))
    }

    /// Best effort: a missing token or transport failure never unwinds the
    /// notification that was already stored.
    async fn dispatch_push(&self, recipient: &Reference, kind: NotificationKind) {
        let fields = match self.store.get(recipient).await {
            Ok(Some(fields)) => fields,
            Ok(None) => return,
            Err(err) => {
                warn!(error = ?err, recipient = %recipient, "failed to load push token");
                return;
            }
        };
        let token = match fields.get("push_token").and_then(Value::as_str) {
            Some(token) => token,
            None => return,
        };

        let (title, body) = push_copy(kind);
        if let Err(err) = self.push.send(token, title, body).await {
            warn!(error = ?err, recipient = %recipient, "push delivery failed");
        }
    }

    pub async fn list(
        &self,
        recipient: &Reference,
        cursor: Option<(OffsetDateTime, String)>,
        limit: usize,
    ) -> Result<Vec<Notification>, EngineError> {
        let mut query = Query::collection(recipient.subcollection("notifications"))
            .order_by(OrderBy::desc("created_at"))
            .limit(limit);
        if let Some((created_at, id)) = cursor {
            query = query.start_after(Cursor {
                value: Value::from(timestamp_nanos(created_at)),
                id,
            });
        }

        let page = self.store.query(query).await?;
        let mut notifications = Vec::with_capacity(page.docs.len());
        for doc in page.docs {
            notifications.push(decode(&doc.reference, doc.fields)?);
        }
        Ok(notifications)
    }

    /// Flips the read flag. `false` when the notification is absent or was
    /// already read.
    pub async fn mark_read(
        &self,
        recipient: &Reference,
        notification_id: &str,
    ) -> Result<bool, EngineError> {
        let reference = Reference::new(recipient.subcollection("notifications"), notification_id);
        let fields = match self.store.get(&reference).await? {
            Some(fields) => fields,
            None => return Ok(false),
        };
        if fields.get("read").and_then(Value::as_bool) == Some(true) {
            return Ok(false);
        }

        let mut patch = serde_json::Map::new();
        patch.insert("read".to_string(), Value::Bool(true));
        self.store.update(&reference, patch).await?;
        Ok(true)
    }

    pub async fn unread_count(&self, recipient: &Reference) -> Result<usize, EngineError> {
        let query = Query::collection(recipient.subcollection("notifications"))
            .filter(Filter::Eq("read", Value::Bool(false)));
        let page = self.store.query(query).await?;
        Ok(page.docs.len())
    }
}

/// Identity of a notification: same sender, same post context, same kind
/// means the same document.
fn dedup_id(sender: &Reference, post: Option<&Reference>, kind: NotificationKind) -> String {
    let post_path = post.map(Reference::path).unwrap_or_default();
    let key = format!("{}|{}|{}", sender.path(), post_path, kind.code());
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn push_copy(kind: NotificationKind) -> (&'static str, &'static str) {
    match kind {
        NotificationKind::Like => ("New like", "Someone liked your post"),
        NotificationKind::Comment => ("New comment", "Someone commented on your post"),
        NotificationKind::Message => ("New message", "You have a new message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_id_ignores_everything_but_sender_post_and_kind() {
        let sender = Reference::user("u1");
        let post = Reference::post("p1");

        let a = dedup_id(&sender, Some(&post), NotificationKind::Like);
        let b = dedup_id(&sender, Some(&post), NotificationKind::Like);
        assert_eq!(a, b);

        let other_kind = dedup_id(&sender, Some(&post), NotificationKind::Comment);
        assert_ne!(a, other_kind);

        let no_post = dedup_id(&sender, None, NotificationKind::Like);
        assert_ne!(a, no_post);
    }
}
