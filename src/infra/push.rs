use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("push transport error: {0}")]
    Transport(String),
}

/// Delivery channel for push notifications. The engine treats delivery as
/// best effort; a transport failure never fails the write that triggered it.
#[async_trait::async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, token: &str, title: &str, body: &str) -> Result<(), PushError>;
}

/// Transport that drops every notification. Default for embedded use and
/// for tests that don't assert on delivery.
#[derive(Debug, Clone, Default)]
pub struct NoopPush;

#[async_trait::async_trait]
impl PushTransport for NoopPush {
    async fn send(&self, token: &str, title: &str, _body: &str) -> Result<(), PushError> {
        debug!(token = %token, title = %title, "dropping push notification");
        Ok(())
    }
}
