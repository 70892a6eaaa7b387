pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod infra;

use std::sync::Arc;

use crate::app::chat::ChatService;
use crate::app::comments::CommentService;
use crate::app::counters::CounterMutator;
use crate::app::feed::FeedService;
use crate::app::notifications::NotificationService;
use crate::app::polls::PollService;
use crate::app::posts::PostService;
use crate::app::relations::RelationService;
use crate::config::EngineConfig;
use crate::infra::push::PushTransport;
use crate::infra::store::DocumentStore;

/// All engine services wired over one store and one push transport.
#[derive(Clone)]
pub struct Engine {
    pub posts: PostService,
    pub comments: CommentService,
    pub relations: RelationService,
    pub notifications: NotificationService,
    pub feed: FeedService,
    pub chats: ChatService,
    pub polls: PollService,
    pub counters: CounterMutator,
}

impl Engine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        push: Arc<dyn PushTransport>,
        config: EngineConfig,
    ) -> Self {
        let counters = CounterMutator::new(Arc::clone(&store));
        let notifications = NotificationService::new(Arc::clone(&store), push);

        Self {
            posts: PostService::new(Arc::clone(&store), counters.clone(), config.clone()),
            comments: CommentService::new(
                Arc::clone(&store),
                counters.clone(),
                notifications.clone(),
                config.clone(),
            ),
            relations: RelationService::new(
                Arc::clone(&store),
                notifications.clone(),
                config.clone(),
            ),
            feed: FeedService::new(Arc::clone(&store), config.clone()),
            chats: ChatService::new(Arc::clone(&store), notifications.clone(), config),
            polls: PollService::new(store),
            notifications,
            counters,
        }
    }
}
