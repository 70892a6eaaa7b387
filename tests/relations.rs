//! Relation Toggle Tests
//!
//! Covers the optimistic like state machine, counter/mirror convergence,
//! rollback on failure and timeout, and the in-flight guard.

mod common;

use std::time::Duration;

use futures::future::join_all;

use agora::app::relations::{RelationBinding, RelationState, TogglePhase};
use agora::config::EngineConfig;
use agora::domain::reference::Reference;
use agora::domain::user::User;
use agora::error::EngineError;
use agora::infra::store::{decode, DocumentStore};
use common::TestEngine;

async fn load_user(test: &TestEngine, user: &Reference) -> User {
    let fields = test.store.get(user).await.unwrap().unwrap();
    decode(user, fields).unwrap()
}

// ===========================================================================
// Convergence
// ===========================================================================

#[tokio::test]
async fn concurrent_likes_by_distinct_users_converge() {
    let test = TestEngine::new();
    let author = test.seed_user("author").await;
    let genre = test.seed_genre("g1", "General").await;
    let post = test.seed_post(&author, &genre, "hello").await;

    let mut users = Vec::new();
    for i in 0..8 {
        users.push(test.seed_user(&format!("u{}", i)).await);
    }

    let tasks = users.iter().map(|user| {
        let relations = test.engine.relations.clone();
        let binding = RelationBinding::post_like(&post, &author, user);
        let state = RelationState::new(false, 0);
        tokio::spawn(async move {
            let outcome = relations.toggle(&binding, &state).await.unwrap();
            assert!(outcome.active);
            state.snapshot()
        })
    });
    let states = join_all(tasks).await;

    let liked = states
        .into_iter()
        .map(|result| result.unwrap())
        .filter(|(active, _, phase)| *active && *phase == TogglePhase::Committed)
        .count();
    assert_eq!(liked, 8);

    let stored = test.engine.posts.get_post(&post).await.unwrap().unwrap();
    assert_eq!(stored.num_likes, 8);
    assert_eq!(stored.liked_by.len(), 8);

    for user in &users {
        let user_doc = load_user(&test, user).await;
        assert!(user_doc.liked_posts.contains(&post));
    }
}

#[tokio::test]
async fn like_then_unlike_restores_every_side() {
    let test = TestEngine::new();
    let author = test.seed_user("author").await;
    let user = test.seed_user("liker").await;
    let genre = test.seed_genre("g1", "General").await;
    let post = test.seed_post(&author, &genre, "hello").await;

    let binding = RelationBinding::post_like(&post, &author, &user);
    let state = RelationState::new(false, 0);

    let outcome = test.engine.relations.toggle(&binding, &state).await.unwrap();
    assert!(outcome.active);
    assert_eq!(outcome.count, 1);

    let stored = test.engine.posts.get_post(&post).await.unwrap().unwrap();
    assert_eq!(stored.num_likes, 1);
    assert!(stored.liked_by.contains(&user));
    assert!(load_user(&test, &user).await.liked_posts.contains(&post));

    let outcome = test.engine.relations.toggle(&binding, &state).await.unwrap();
    assert!(!outcome.active);
    assert_eq!(outcome.count, 0);

    let stored = test.engine.posts.get_post(&post).await.unwrap().unwrap();
    assert_eq!(stored.num_likes, 0);
    assert!(stored.liked_by.is_empty());
    assert!(load_user(&test, &user).await.liked_posts.is_empty());
    assert_eq!(state.snapshot(), (false, 0, TogglePhase::Committed));
}

#[tokio::test]
async fn unlike_leaves_the_like_notification_in_place() {
    let test = TestEngine::new();
    let author = test.seed_user("author").await;
    let user = test.seed_user("liker").await;
    let genre = test.seed_genre("g1", "General").await;
    let post = test.seed_post(&author, &genre, "hello").await;

    let binding = RelationBinding::post_like(&post, &author, &user);
    let state = RelationState::new(false, 0);

    test.engine.relations.toggle(&binding, &state).await.unwrap();
    assert_eq!(
        test.engine.notifications.unread_count(&author).await.unwrap(),
        1
    );

    test.engine.relations.toggle(&binding, &state).await.unwrap();
    assert_eq!(
        test.engine.notifications.unread_count(&author).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn comment_likes_touch_the_comment_not_the_post() {
    let test = TestEngine::new();
    let author = test.seed_user("author").await;
    let commenter = test.seed_user("commenter").await;
    let liker = test.seed_user("liker").await;
    let genre = test.seed_genre("g1", "General").await;
    let post = test.seed_post(&author, &genre, "hello").await;

    let comment = test
        .engine
        .comments
        .add_comment(&post, &commenter, "nice".to_string(), None)
        .await
        .unwrap();
    let comment_ref = Reference::new(post.subcollection("comments"), &comment.id);

    let binding = RelationBinding::comment_like(&comment_ref, &commenter, &post, &liker);
    let state = RelationState::new(false, 0);
    test.engine.relations.toggle(&binding, &state).await.unwrap();

    let stored = test.engine.posts.get_post(&post).await.unwrap().unwrap();
    assert_eq!(stored.num_likes, 0);

    let threads = test.engine.comments.load_thread(&post).await.unwrap();
    assert_eq!(threads[0].comment.num_likes, 1);
    assert!(threads[0].comment.liked_by.contains(&liker));
    assert!(load_user(&test, &liker)
        .await
        .liked_comments
        .contains(&comment_ref));
}

// ===========================================================================
// Failure handling
// ===========================================================================

#[tokio::test]
async fn failed_primary_write_rolls_back_local_state() {
    let test = TestEngine::new();
    let author = test.seed_user("author").await;
    let user = test.seed_user("liker").await;
    let genre = test.seed_genre("g1", "General").await;
    let post = test.seed_post(&author, &genre, "hello").await;

    let binding = RelationBinding::post_like(&post, &author, &user);
    let state = RelationState::new(false, 0);

    test.store.fail_writes(0, 1);
    let err = test
        .engine
        .relations
        .toggle(&binding, &state)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));
    assert_eq!(state.snapshot(), (false, 0, TogglePhase::RolledBack));

    let stored = test.engine.posts.get_post(&post).await.unwrap().unwrap();
    assert_eq!(stored.num_likes, 0);
    assert!(stored.liked_by.is_empty());
}

#[tokio::test]
async fn failed_mirror_write_rolls_back_local_state_but_not_the_landed_write() {
    let test = TestEngine::new();
    let author = test.seed_user("author").await;
    let user = test.seed_user("liker").await;
    let genre = test.seed_genre("g1", "General").await;
    let post = test.seed_post(&author, &genre, "hello").await;

    let binding = RelationBinding::post_like(&post, &author, &user);
    let state = RelationState::new(false, 0);

    // Let the target write through, fail the user mirror.
    test.store.fail_writes(1, 1);
    let err = test
        .engine
        .relations
        .toggle(&binding, &state)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));
    assert_eq!(state.snapshot(), (false, 0, TogglePhase::RolledBack));

    // The first write already landed; the remote side stays ahead of the
    // reverted local state until a retry reconciles them.
    let stored = test.engine.posts.get_post(&post).await.unwrap().unwrap();
    assert_eq!(stored.num_likes, 1);
    assert!(load_user(&test, &user).await.liked_posts.is_empty());
}

#[tokio::test]
async fn toggle_times_out_and_rolls_back() {
    let config = EngineConfig {
        toggle_timeout_ms: 50,
        ..EngineConfig::default()
    };
    let test = TestEngine::with_config(config);
    let author = test.seed_user("author").await;
    let user = test.seed_user("liker").await;
    let genre = test.seed_genre("g1", "General").await;
    let post = test.seed_post(&author, &genre, "hello").await;

    let binding = RelationBinding::post_like(&post, &author, &user);
    let state = RelationState::new(false, 0);

    test.store.set_write_delay(Some(Duration::from_millis(500)));
    let err = test
        .engine
        .relations
        .toggle(&binding, &state)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ToggleTimeout));
    assert_eq!(state.snapshot(), (false, 0, TogglePhase::RolledBack));

    test.store.set_write_delay(None);
    let stored = test.engine.posts.get_post(&post).await.unwrap().unwrap();
    assert_eq!(stored.num_likes, 0);
}

#[tokio::test]
async fn second_toggle_is_rejected_while_the_first_is_in_flight() {
    let test = TestEngine::new();
    let author = test.seed_user("author").await;
    let user = test.seed_user("liker").await;
    let genre = test.seed_genre("g1", "General").await;
    let post = test.seed_post(&author, &genre, "hello").await;

    let binding = RelationBinding::post_like(&post, &author, &user);
    let state = RelationState::new(false, 0);

    test.store.set_write_delay(Some(Duration::from_millis(100)));
    let first = {
        let relations = test.engine.relations.clone();
        let binding = binding.clone();
        let state = state.clone();
        tokio::spawn(async move { relations.toggle(&binding, &state).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(state.snapshot().2, TogglePhase::Pending);
    let err = test
        .engine
        .relations
        .toggle(&binding, &state)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ToggleInFlight));

    test.store.set_write_delay(None);
    let outcome = first.await.unwrap().unwrap();
    assert!(outcome.active);
    assert_eq!(state.snapshot(), (true, 1, TogglePhase::Committed));

    let stored = test.engine.posts.get_post(&post).await.unwrap().unwrap();
    assert_eq!(stored.num_likes, 1);
}

#[tokio::test]
async fn liking_your_own_post_creates_no_notification() {
    let test = TestEngine::new();
    let author = test.seed_user("author").await;
    let genre = test.seed_genre("g1", "General").await;
    let post = test.seed_post(&author, &genre, "hello").await;

    let binding = RelationBinding::post_like(&post, &author, &author);
    let state = RelationState::new(false, 0);
    test.engine.relations.toggle(&binding, &state).await.unwrap();

    let stored = test.engine.posts.get_post(&post).await.unwrap().unwrap();
    assert_eq!(stored.num_likes, 1);
    assert_eq!(
        test.engine.notifications.unread_count(&author).await.unwrap(),
        0
    );
}
