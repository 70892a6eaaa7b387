pub mod chat;
pub mod comments;
pub mod counters;
pub mod feed;
pub mod notifications;
pub mod polls;
pub mod posts;
pub mod relations;
