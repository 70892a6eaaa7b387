use std::sync::Arc;

use serde_json::Value;

use crate::domain::reference::Reference;
use crate::error::EngineError;
use crate::infra::store::{DocumentStore, FieldOp};

/// Denormalized integer counters. Each variant names the one stored field
/// it may touch, so callers can't bump arbitrary fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterField {
    PostLikes,
    PostComments,
    PostViews,
    CommentLikes,
}

impl CounterField {
    pub fn name(self) -> &'static str {
        match self {
            CounterField::PostLikes | CounterField::CommentLikes => "num_likes",
            CounterField::PostComments => "num_comments",
            CounterField::PostViews => "views",
        }
    }
}

/// Reference-set fields holding one side of a mirrored relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationField {
    PostLikedBy,
    CommentLikedBy,
    UserLikedPosts,
    UserLikedComments,
    UserCommentedPosts,
    UserChats,
}

impl RelationField {
    pub fn name(self) -> &'static str {
        match self {
            RelationField::PostLikedBy | RelationField::CommentLikedBy => "liked_by",
            RelationField::UserLikedPosts => "liked_posts",
            RelationField::UserLikedComments => "liked_comments",
            RelationField::UserCommentedPosts => "commented_posts",
            RelationField::UserChats => "chats",
        }
    }
}

pub(crate) fn counter_op(field: CounterField, delta: i64) -> FieldOp {
    FieldOp::Increment(field.name(), delta)
}

pub(crate) fn relation_op(field: RelationField, member: &Reference, add: bool) -> FieldOp {
    let value = Value::String(member.path());
    if add {
        FieldOp::SetAdd(field.name(), value)
    } else {
        FieldOp::SetRemove(field.name(), value)
    }
}

#[derive(Clone)]
pub struct CounterMutator {
    store: Arc<dyn DocumentStore>,
}

impl CounterMutator {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn apply_counter_delta(
        &self,
        target: &Reference,
        field: CounterField,
        delta: i64,
    ) -> Result<(), EngineError> {
        self.store.apply(target, vec![counter_op(field, delta)]).await?;
        Ok(())
    }

    pub async fn apply_relation_delta(
        &self,
        target: &Reference,
        field: RelationField,
        member: &Reference,
        add: bool,
    ) -> Result<(), EngineError> {
        self.store
            .apply(target, vec![relation_op(field, member, add)])
            .await?;
        Ok(())
    }
}
