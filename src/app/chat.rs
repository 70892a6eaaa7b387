use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::warn;
use ulid::Ulid;

use crate::app::counters::{relation_op, RelationField};
use crate::app::notifications::NotificationService;
use crate::config::EngineConfig;
use crate::domain::chat::{Chat, Message};
use crate::domain::notification::NotificationKind;
use crate::domain::reference::Reference;
use crate::domain::timestamp_nanos;
use crate::domain::user::User;
use crate::error::EngineError;
use crate::infra::store::{
    decode, encode, Cursor, DocumentStore, FieldOp, OrderBy, Query, StoreError, Subscription,
};

#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn DocumentStore>,
    notifications: NotificationService,
    config: EngineConfig,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        notifications: NotificationService,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            notifications,
            config,
        }
    }

    /// Returns the direct chat between two users, creating it on first
    /// use. The chat id is derived from the unordered user pair, so
    /// concurrent and repeated calls converge on the same document.
    pub async fn start_or_get_direct_chat(
        &self,
        a: &Reference,
        b: &Reference,
    ) -> Result<Chat, EngineError> {
        if a == b {
            return Err(EngineError::SelfChat);
        }

        let now = OffsetDateTime::now_utc();
        let chat = Chat {
            id: direct_chat_id(a, b),
            members: BTreeSet::from([a.clone(), b.clone()]),
            is_direct: true,
            last_message: None,
            last_message_at: now,
            created_at: now,
        };
        let reference = Reference::chat(&chat.id);

        let created = self.store.create(&reference, encode(&chat)?).await?;
        let chat = if created {
            chat
        } else {
            let fields = self
                .store
                .get(&reference)
                .await?
                .ok_or_else(|| StoreError::NotFound(reference.clone()))?;
            decode(&reference, fields)?
        };

        // Idempotent either way; also repairs a mirror the losing side of
        // a race never got to write.
        for member in [a, b] {
            self.store
                .apply(
                    member,
                    vec![relation_op(RelationField::UserChats, &reference, true)],
                )
                .await?;
        }

        Ok(chat)
    }

    pub async fn create_group_chat(&self, members: &[Reference]) -> Result<Chat, EngineError> {
        let members: BTreeSet<Reference> = members.iter().cloned().collect();
        if members.len() < 2 {
            return Err(EngineError::GroupTooSmall);
        }

        let now = OffsetDateTime::now_utc();
        let chat = Chat {
            id: Ulid::new().to_string(),
            members,
            is_direct: false,
            last_message: None,
            last_message_at: now,
            created_at: now,
        };
        let reference = Reference::chat(&chat.id);

        self.store.set(&reference, encode(&chat)?).await?;
        for member in &chat.members {
            self.store
                .apply(
                    member,
                    vec![relation_op(RelationField::UserChats, &reference, true)],
                )
                .await?;
        }

        Ok(chat)
    }

    /// Appends a message, denormalizes the preview onto the chat document,
    /// and notifies every other member. Message notifications carry no
    /// post context, so repeated messages from the same sender coalesce
    /// into a single unread notification.
    pub async fn send_message(
        &self,
        chat: &Reference,
        sender: &Reference,
        text: Option<String>,
        image_url: Option<String>,
    ) -> Result<Message, EngineError> {
        let fields = self
            .store
            .get(chat)
            .await?
            .ok_or_else(|| StoreError::NotFound(chat.clone()))?;
        let chat_doc: Chat = decode(chat, fields)?;
        if !chat_doc.members.contains(sender) {
            return Err(EngineError::NotChatMember);
        }

        let text = text
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        if text.is_none() && image_url.is_none() {
            return Err(EngineError::EmptyMessage);
        }
        if let Some(text) = &text {
            if text.chars().count() > self.config.max_message_chars {
                return Err(EngineError::MessageTooLong(self.config.max_message_chars));
            }
        }

        let message = Message {
            id: Ulid::new().to_string(),
            sender: sender.clone(),
            text,
            image_url,
            sent_at: OffsetDateTime::now_utc(),
        };

        self.store
            .set(
                &Reference::new(chat.subcollection("messages"), &message.id),
                encode(&message)?,
            )
            .await?;

        let preview = message
            .text
            .clone()
            .unwrap_or_else(|| "[photo]".to_string());
        self.store
            .apply(
                chat,
                vec![
                    FieldOp::Set("last_message", Value::String(preview)),
                    FieldOp::Set(
                        "last_message_at",
                        Value::from(timestamp_nanos(message.sent_at)),
                    ),
                ],
            )
            .await?;

        let recipients = chat_doc
            .members
            .iter()
            .filter(|member| *member != sender)
            .map(|member| async move {
                let result = self
                    .notifications
                    .maybe_notify(sender, member, NotificationKind::Message, None)
                    .await;
                if let Err(err) = result {
                    warn!(error = ?err, member = %member, "message notification failed");
                }
            });
        join_all(recipients).await;

        Ok(message)
    }

    pub async fn list_messages(
        &self,
        chat: &Reference,
        cursor: Option<(OffsetDateTime, String)>,
        limit: usize,
    ) -> Result<Vec<Message>, EngineError> {
        let mut query = Query::collection(chat.subcollection("messages"))
            .order_by(OrderBy::desc("sent_at"))
            .limit(limit);
        if let Some((sent_at, id)) = cursor {
            query = query.start_after(Cursor {
                value: Value::from(timestamp_nanos(sent_at)),
                id,
            });
        }

        let page = self.store.query(query).await?;
        let mut messages = Vec::with_capacity(page.docs.len());
        for doc in page.docs {
            messages.push(decode(&doc.reference, doc.fields)?);
        }
        Ok(messages)
    }

    /// Full-snapshot listener over the chat's messages in send order.
    /// Dropping the subscription releases the listener.
    pub async fn subscribe_messages(&self, chat: &Reference) -> Result<Subscription, EngineError> {
        let subscription = self
            .store
            .subscribe(
                Query::collection(chat.subcollection("messages"))
                    .order_by(OrderBy::asc("sent_at")),
            )
            .await?;
        Ok(subscription)
    }

    /// The user's chats from their mirror set, most recent activity first.
    /// A chat that fails to load is dropped from the result, not fatal.
    pub async fn list_chats(&self, user: &Reference) -> Result<Vec<Chat>, EngineError> {
        let fields = match self.store.get(user).await? {
            Some(fields) => fields,
            None => return Ok(Vec::new()),
        };
        let user_doc: User = decode(user, fields)?;

        let fetches = user_doc
            .chats
            .iter()
            .map(|reference| async move { self.fetch_chat(reference).await });
        let mut chats: Vec<Chat> = join_all(fetches).await.into_iter().flatten().collect();

        chats.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(chats)
    }

    async fn fetch_chat(&self, reference: &Reference) -> Option<Chat> {
        match self.store.get(reference).await {
            Ok(Some(fields)) => match decode(reference, fields) {
                Ok(chat) => Some(chat),
                Err(err) => {
                    warn!(error = ?err, chat = %reference, "chat decode failed");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(error = ?err, chat = %reference, "chat fetch failed");
                None
            }
        }
    }
}

/// Identity of a direct chat: the unordered pair of members.
fn direct_chat_id(a: &Reference, b: &Reference) -> String {
    let (lo, hi) = if a.path() <= b.path() { (a, b) } else { (b, a) };
    let key = format!("{}|{}", lo.path(), hi.path());
    hex::encode(Sha256::digest(key.as_bytes()))
}
