use crate::infra::store::StoreError;

/// Everything an engine operation can fail with. Store-level failures pass
/// through; the rest are domain rule violations caught before any write.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("a toggle for this relation is already in flight")]
    ToggleInFlight,
    #[error("toggle write timed out and was rolled back")]
    ToggleTimeout,

    #[error("post has no poll")]
    NoPoll,
    #[error("poll option {0} is out of range")]
    PollOptionOutOfRange(usize),
    #[error("user has already voted in this poll")]
    AlreadyVoted,
    #[error("invalid poll: {0}")]
    BadPoll(String),

    #[error("title must not be empty")]
    EmptyTitle,
    #[error("title exceeds {0} characters")]
    TitleTooLong(usize),
    #[error("body exceeds {0} characters")]
    BodyTooLong(usize),

    #[error("comment must not be empty")]
    EmptyComment,
    #[error("comment exceeds {0} characters")]
    CommentTooLong(usize),
    #[error("replies to replies are not allowed")]
    ReplyTooDeep,
    #[error("only the comment author may delete it")]
    NotCommentAuthor,
    #[error("only the post author may delete it")]
    NotPostAuthor,

    #[error("message must not be empty")]
    EmptyMessage,
    #[error("message exceeds {0} characters")]
    MessageTooLong(usize),
    #[error("user is not a member of this chat")]
    NotChatMember,
    #[error("a direct chat needs two distinct users")]
    SelfChat,
    #[error("a group chat needs at least two members")]
    GroupTooSmall,

    #[error("cursor does not belong to this feed filter")]
    CursorMismatch,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
