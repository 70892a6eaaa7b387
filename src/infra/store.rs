use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::domain::reference::Reference;

/// Raw field map of one document.
pub type Fields = Map<String, Value>;

#[derive(Debug, Clone)]
pub struct Document {
    pub reference: Reference,
    pub fields: Fields,
}

/// One entry of an atomic write. All ops passed to a single
/// [`DocumentStore::apply`] call land in one write: a counter bump and the
/// matching relation-array change travel together.
///
/// Field names are `'static` on purpose: every writable field belongs to a
/// closed set declared next to its entity, never built from runtime input.
#[derive(Debug, Clone)]
pub enum FieldOp {
    Set(&'static str, Value),
    Increment(&'static str, i64),
    SetAdd(&'static str, Value),
    SetRemove(&'static str, Value),
}

/// Server-side predicates are equality-only; anything richer is a
/// client-side filter concern (see the feed paginator).
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(&'static str, Value),
}

impl Filter {
    pub fn matches(&self, fields: &Fields) -> bool {
        match self {
            Filter::Eq(name, value) => fields.get(*name) == Some(value),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderBy {
    pub field: &'static str,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(field: &'static str) -> Self {
        Self { field, descending: false }
    }

    pub fn desc(field: &'static str) -> Self {
        Self { field, descending: true }
    }
}

/// Start-after position: the order-by value and id of the last document of
/// the previous page. Queries always tie-break on document id in the same
/// direction, so the pair addresses a unique position.
#[derive(Debug, Clone)]
pub struct Cursor {
    pub value: Value,
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    pub start_after: Option<Cursor>,
}

impl Query {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
            start_after: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = Some(order_by);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, cursor: Cursor) -> Self {
        self.start_after = Some(cursor);
        self
    }
}

#[derive(Debug, Clone)]
pub struct QueryPage {
    pub docs: Vec<Document>,
    /// Whether matching documents remain beyond this page.
    pub has_more: bool,
}

/// Long-lived listener over one query. Every underlying change (and the
/// moment of registration) delivers the full current result set. Dropping
/// the subscription releases the listener; holding one past its view's
/// lifetime is a resource leak.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Vec<Document>>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        receiver: mpsc::UnboundedReceiver<Vec<Document>>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            receiver,
            release: Some(Box::new(release)),
        }
    }

    /// Next full snapshot, or `None` once the backing store is gone.
    pub async fn next_snapshot(&mut self) -> Option<Vec<Document>> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(Reference),
    #[error("document already exists: {0}")]
    AlreadyExists(Reference),
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("malformed document: {0}")]
    Malformed(String),
}

/// Capability set the engine consumes from whatever document database backs
/// it. No implementation ships here except the in-memory reference backend;
/// adapters for real stores implement this trait out of tree.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// An absent document is a value, not an error.
    async fn get(&self, reference: &Reference) -> Result<Option<Fields>, StoreError>;

    /// Full overwrite; creates the document when absent.
    async fn set(&self, reference: &Reference, fields: Fields) -> Result<(), StoreError>;

    /// Insert-if-absent. Returns `false` when the id is already taken,
    /// which is what deterministic dedup ids collide on.
    async fn create(&self, reference: &Reference, fields: Fields) -> Result<bool, StoreError>;

    /// Partial merge of top-level fields; `NotFound` when absent.
    async fn update(&self, reference: &Reference, fields: Fields) -> Result<(), StoreError>;

    /// One atomic composite write; `NotFound` when absent. Ops either all
    /// apply or none do.
    async fn apply(&self, reference: &Reference, ops: Vec<FieldOp>) -> Result<(), StoreError>;

    /// Idempotent; deleting an absent document is a no-op.
    async fn delete(&self, reference: &Reference) -> Result<(), StoreError>;

    async fn query(&self, query: Query) -> Result<QueryPage, StoreError>;

    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError>;

    /// Read-check-write scope. Between `transaction()` and `commit()` no
    /// other operation may be issued against the same store handle.
    async fn transaction(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

#[async_trait::async_trait]
pub trait StoreTransaction: Send {
    /// Reads observe writes already staged in this transaction.
    async fn get(&mut self, reference: &Reference) -> Result<Option<Fields>, StoreError>;

    fn set(&mut self, reference: &Reference, fields: Fields);

    fn update(&mut self, reference: &Reference, fields: Fields);

    fn delete(&mut self, reference: &Reference);

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

pub fn encode<T: Serialize>(entity: &T) -> Result<Fields, StoreError> {
    match serde_json::to_value(entity) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(StoreError::Malformed(
            "entity did not serialize to an object".to_string(),
        )),
        Err(err) => Err(StoreError::Malformed(err.to_string())),
    }
}

pub fn decode<T: DeserializeOwned>(
    reference: &Reference,
    fields: Fields,
) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(fields))
        .map_err(|err| StoreError::Malformed(format!("{}: {}", reference, err)))
}
