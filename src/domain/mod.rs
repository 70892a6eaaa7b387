pub mod chat;
pub mod comment;
pub mod notification;
pub mod post;
pub mod reference;
pub mod user;

pub use chat::{Chat, Message};
pub use comment::{Comment, CommentThread};
pub use notification::{Notification, NotificationKind};
pub use post::{Genre, Poll, PollOption, Post};
pub use reference::Reference;
pub use user::User;

use time::OffsetDateTime;

/// Timestamps are persisted as unix nanoseconds so a document store can
/// order them as plain numbers instead of parsing strings.
pub(crate) mod ts_nanos {
    use serde::de::Error as DeError;
    use serde::ser::Error as SerError;
    use serde::{Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;

    pub fn serialize<S>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let nanos = i64::try_from(value.unix_timestamp_nanos())
            .map_err(|_| S::Error::custom("timestamp out of range"))?;
        serializer.serialize_i64(nanos)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = i64::deserialize(deserializer)?;
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
            .map_err(D::Error::custom)
    }
}

pub(crate) fn timestamp_nanos(value: OffsetDateTime) -> i64 {
    i64::try_from(value.unix_timestamp_nanos()).unwrap_or(i64::MAX)
}
