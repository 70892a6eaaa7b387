use std::sync::Arc;

use crate::domain::post::{PollOption, Post};
use crate::domain::reference::Reference;
use crate::error::EngineError;
use crate::infra::store::{decode, DocumentStore, StoreError};

#[derive(Clone)]
pub struct PollService {
    store: Arc<dyn DocumentStore>,
}

impl PollService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Records one vote. Read, check, and write happen inside a store
    /// transaction, so two votes by the same user cannot both pass the
    /// guard and a lost concurrent increment cannot occur.
    pub async fn vote(
        &self,
        post: &Reference,
        voter: &Reference,
        option_index: usize,
    ) -> Result<Vec<PollOption>, EngineError> {
        let mut tx = self.store.transaction().await?;

        let fields = tx
            .get(post)
            .await?
            .ok_or_else(|| StoreError::NotFound(post.clone()))?;
        let post_doc: Post = decode(post, fields)?;
        let mut poll = post_doc.poll.ok_or(EngineError::NoPoll)?;

        if option_index >= poll.options.len() {
            return Err(EngineError::PollOptionOutOfRange(option_index));
        }
        let voter_key = voter.path();
        if poll.voters.contains(&voter_key) {
            return Err(EngineError::AlreadyVoted);
        }

        poll.options[option_index].votes += 1;
        poll.voters.insert(voter_key);

        let mut patch = serde_json::Map::new();
        patch.insert(
            "poll".to_string(),
            serde_json::to_value(&poll).map_err(|err| StoreError::Malformed(err.to_string()))?,
        );
        tx.update(post, patch);
        tx.commit().await?;

        Ok(poll.options)
    }
}
