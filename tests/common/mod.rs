#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use time::OffsetDateTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use agora::app::posts::NewPost;
use agora::config::EngineConfig;
use agora::domain::post::Genre;
use agora::domain::reference::Reference;
use agora::domain::user::User;
use agora::infra::memory::MemoryStore;
use agora::infra::push::{PushError, PushTransport};
use agora::infra::store::{encode, DocumentStore};
use agora::Engine;

// ---------------------------------------------------------------------------
// RecordingPush: captures every dispatched push for assertions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPush {
    pub token: String,
    pub title: String,
    pub body: String,
}

#[derive(Default)]
pub struct RecordingPush {
    sent: Mutex<Vec<SentPush>>,
    fail: Mutex<bool>,
}

impl RecordingPush {
    pub fn sent(&self) -> Vec<SentPush> {
        self.sent.lock().unwrap().clone()
    }

    /// Makes every subsequent send fail with a transport error.
    pub fn fail_sends(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

#[async_trait::async_trait]
impl PushTransport for RecordingPush {
    async fn send(&self, token: &str, title: &str, body: &str) -> Result<(), PushError> {
        if *self.fail.lock().unwrap() {
            return Err(PushError::Transport("recording push set to fail".to_string()));
        }
        self.sent.lock().unwrap().push(SentPush {
            token: token.to_string(),
            title: title.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TestEngine: engine over a MemoryStore, fresh per test
// ---------------------------------------------------------------------------

pub struct TestEngine {
    pub engine: Engine,
    /// Concrete store handle, kept for fault injection and counting hooks.
    pub store: MemoryStore,
    pub push: Arc<RecordingPush>,
}

/// Idempotent; tests race to install the subscriber and the losers no-op.
fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_tracing();
        let store = MemoryStore::new();
        let push = Arc::new(RecordingPush::default());
        let engine = Engine::new(
            Arc::new(store.clone()),
            Arc::clone(&push) as Arc<dyn PushTransport>,
            config,
        );
        Self {
            engine,
            store,
            push,
        }
    }

    // ------------------------------------------------------------------
    // Seed helpers
    // ------------------------------------------------------------------

    /// Insert a user document directly. Returns its reference.
    pub async fn seed_user(&self, id: &str) -> Reference {
        self.seed_user_with_token(id, None).await
    }

    pub async fn seed_user_with_token(&self, id: &str, push_token: Option<&str>) -> Reference {
        let user = User {
            id: id.to_string(),
            handle: format!("user_{}", id),
            display_name: format!("User {}", id),
            bio: None,
            photo_url: None,
            push_token: push_token.map(str::to_string),
            liked_posts: BTreeSet::new(),
            liked_comments: BTreeSet::new(),
            commented_posts: BTreeSet::new(),
            chats: BTreeSet::new(),
            created_at: OffsetDateTime::now_utc(),
        };
        let reference = Reference::user(id);
        self.store
            .set(&reference, encode(&user).expect("encode user"))
            .await
            .expect("seed user");
        reference
    }

    pub async fn seed_genre(&self, id: &str, name: &str) -> Reference {
        let genre = Genre {
            id: id.to_string(),
            name: name.to_string(),
        };
        let reference = Reference::genre(id);
        self.store
            .set(&reference, encode(&genre).expect("encode genre"))
            .await
            .expect("seed genre");
        reference
    }

    /// Create a post through the engine. Returns its reference.
    pub async fn seed_post(
        &self,
        author: &Reference,
        genre: &Reference,
        title: &str,
    ) -> Reference {
        self.seed_post_with(author, genre, title, "body", None).await
    }

    pub async fn seed_post_with(
        &self,
        author: &Reference,
        genre: &Reference,
        title: &str,
        body: &str,
        poll_options: Option<Vec<String>>,
    ) -> Reference {
        let post = self
            .engine
            .posts
            .create_post(NewPost {
                author: author.clone(),
                genre: genre.clone(),
                title: title.to_string(),
                body: body.to_string(),
                anonymous: false,
                photo_url: None,
                poll_options,
            })
            .await
            .expect("seed post");
        Reference::post(&post.id)
    }
}
