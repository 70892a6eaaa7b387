use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::app::counters::{counter_op, relation_op, CounterField, RelationField};
use crate::app::notifications::NotificationService;
use crate::config::EngineConfig;
use crate::domain::notification::NotificationKind;
use crate::domain::reference::Reference;
use crate::error::EngineError;
use crate::infra::store::DocumentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TogglePhase {
    Idle,
    Pending,
    Committed,
    RolledBack,
}

/// Optimistic local state of one membership relation, shared between the
/// caller's view and the in-flight toggle. The flip happens before the
/// first await, so a concurrent observer sees `Pending` with the new value
/// while the writes are still outstanding.
#[derive(Clone)]
pub struct RelationState {
    inner: Arc<Mutex<StateInner>>,
}

struct StateInner {
    phase: TogglePhase,
    active: bool,
    count: i64,
}

impl RelationState {
    pub fn new(active: bool, count: i64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StateInner {
                phase: TogglePhase::Idle,
                active,
                count,
            })),
        }
    }

    pub fn snapshot(&self) -> (bool, i64, TogglePhase) {
        let inner = self.inner.lock().unwrap();
        (inner.active, inner.count, inner.phase)
    }

    /// Flips the relation and enters `Pending`. Rejected while a previous
    /// toggle is still in flight.
    fn begin(&self) -> Result<bool, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.phase == TogglePhase::Pending {
            return Err(EngineError::ToggleInFlight);
        }
        inner.active = !inner.active;
        inner.count += if inner.active { 1 } else { -1 };
        inner.phase = TogglePhase::Pending;
        Ok(inner.active)
    }

    fn commit(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.phase = TogglePhase::Committed;
    }

    /// Undoes the optimistic flip exactly.
    fn rollback(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.count += if inner.active { -1 } else { 1 };
        inner.active = !inner.active;
        inner.phase = TogglePhase::RolledBack;
    }
}

/// The documents and fields one toggle touches. Built only through the
/// typed constructors so counter, relation array, and mirror field always
/// agree on the entity kind.
#[derive(Debug, Clone)]
pub struct RelationBinding {
    target: Reference,
    counter: CounterField,
    target_field: RelationField,
    actor: Reference,
    actor_field: RelationField,
    recipient: Reference,
    post: Reference,
}

impl RelationBinding {
    pub fn post_like(post: &Reference, post_author: &Reference, actor: &Reference) -> Self {
        Self {
            target: post.clone(),
            counter: CounterField::PostLikes,
            target_field: RelationField::PostLikedBy,
            actor: actor.clone(),
            actor_field: RelationField::UserLikedPosts,
            recipient: post_author.clone(),
            post: post.clone(),
        }
    }

    pub fn comment_like(
        comment: &Reference,
        comment_author: &Reference,
        post: &Reference,
        actor: &Reference,
    ) -> Self {
        Self {
            target: comment.clone(),
            counter: CounterField::CommentLikes,
            target_field: RelationField::CommentLikedBy,
            actor: actor.clone(),
            actor_field: RelationField::UserLikedComments,
            recipient: comment_author.clone(),
            post: post.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub active: bool,
    pub count: i64,
}

#[derive(Clone)]
pub struct RelationService {
    store: Arc<dyn DocumentStore>,
    notifications: NotificationService,
    config: EngineConfig,
}

impl RelationService {
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

    /// Toggles membership of `binding.actor` in the target's relation set.
    ///
    /// The target write bundles the counter and the array change
    /// atomically; the actor's mirror is a second write. Deliberately not
    /// transactional across the two documents: if the first write lands
    /// and the second fails, the remote side stays ahead of the reverted
    /// local state rather than hiding the partial result.
    pub async fn toggle(
        &self,
        binding: &RelationBinding,
        state: &RelationState,
    ) -> Result<ToggleOutcome, EngineError> {
        let now_active = state.begin()?;
        let delta: i64 = if now_active { 1 } else { -1 };

        let writes = async {
            self.store
                .apply(
                    &binding.target,
                    vec![
                        counter_op(binding.counter, delta),
                        relation_op(binding.target_field, &binding.actor, now_active),
                    ],
                )
                .await?;
            self.store
                .apply(
                    &binding.actor,
                    vec![relation_op(binding.actor_field, &binding.target, now_active)],
                )
                .await?;
            Ok::<(), EngineError>(())
        };

        match tokio::time::timeout(self.config.toggle_timeout(), writes).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                state.rollback();
                return Err(err);
            }
            Err(_) => {
                state.rollback();
                return Err(EngineError::ToggleTimeout);
            }
        }

        if now_active {
            // The engagement is already durable; a failed notification
            // must not unwind it.
            if let Err(err) = self
                .notifications
                .maybe_notify(
                    &binding.actor,
                    &binding.recipient,
                    NotificationKind::Like,
                    Some(&binding.post),
                )
                .await
            {
                warn!(error = ?err, target = %binding.target, "like notification failed");
            }
        }

        state.commit();
        let (active, count, _) = state.snapshot();
        Ok(ToggleOutcome { active, count })
    }
}
