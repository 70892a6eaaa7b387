use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::reference::Reference;
use crate::infra::store::{
    Document, DocumentStore, FieldOp, Fields, OrderBy, Query, QueryPage, StoreError,
    StoreTransaction, Subscription,
};

/// In-process reference backend. Single ordered map keyed by document path,
/// one async lock around it; good enough for tests and embedded use, not a
/// real database.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<BTreeMap<String, Fields>>>,
    listeners: Arc<StdMutex<HashMap<Uuid, ListenerEntry>>>,
    write_delay: Arc<StdMutex<Option<Duration>>>,
    fail_plan: Arc<StdMutex<FailPlan>>,
}

struct ListenerEntry {
    query: Query,
    sender: mpsc::UnboundedSender<Vec<Document>>,
}

#[derive(Debug, Clone, Copy, Default)]
struct FailPlan {
    skip: u32,
    fail: u32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault injection: let the next `skip` writes through, then fail the
    /// following `fail` writes with `Unavailable`.
    pub fn fail_writes(&self, skip: u32, fail: u32) {
        *self.fail_plan.lock().unwrap() = FailPlan { skip, fail };
    }

    /// Stalls every write by `delay`. `None` clears the stall.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.lock().unwrap() = delay;
    }

    pub async fn document_count(&self) -> usize {
        self.data.lock().await.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// Applies the configured delay and fail plan before a write touches
    /// the data map. Failed writes leave the store untouched.
    async fn write_gate(&self) -> Result<(), StoreError> {
        let delay = *self.write_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut plan = self.fail_plan.lock().unwrap();
        if plan.skip > 0 {
            plan.skip -= 1;
            return Ok(());
        }
        if plan.fail > 0 {
            plan.fail -= 1;
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, reference: &Reference) -> Result<Option<Fields>, StoreError> {
        let data = self.data.lock().await;
        Ok(data.get(&reference.path()).cloned())
    }

    async fn set(&self, reference: &Reference, fields: Fields) -> Result<(), StoreError> {
        self.write_gate().await?;
        let mut data = self.data.lock().await;
        data.insert(reference.path(), fields);
        notify_listeners(&self.listeners, &data);
        Ok(())
    }

    async fn create(&self, reference: &Reference, fields: Fields) -> Result<bool, StoreError> {
        self.write_gate().await?;
        let mut data = self.data.lock().await;
        let path = reference.path();
        if data.contains_key(&path) {
            return Ok(false);
        }
        data.insert(path, fields);
        notify_listeners(&self.listeners, &data);
        Ok(true)
    }

    async fn update(&self, reference: &Reference, fields: Fields) -> Result<(), StoreError> {
        self.write_gate().await?;
        let mut data = self.data.lock().await;
        let doc = data
            .get_mut(&reference.path())
            .ok_or_else(|| StoreError::NotFound(reference.clone()))?;
        for (name, value) in fields {
            doc.insert(name, value);
        }
        notify_listeners(&self.listeners, &data);
        Ok(())
    }

    async fn apply(&self, reference: &Reference, ops: Vec<FieldOp>) -> Result<(), StoreError> {
        self.write_gate().await?;
        let mut data = self.data.lock().await;
        let doc = data
            .get_mut(&reference.path())
            .ok_or_else(|| StoreError::NotFound(reference.clone()))?;
        // Mutate a scratch copy so a mid-sequence error leaves the document
        // as it was.
        let mut updated = doc.clone();
        apply_ops(&mut updated, &ops)?;
        *doc = updated;
        notify_listeners(&self.listeners, &data);
        Ok(())
    }

    async fn delete(&self, reference: &Reference) -> Result<(), StoreError> {
        self.write_gate().await?;
        let mut data = self.data.lock().await;
        if data.remove(&reference.path()).is_some() {
            notify_listeners(&self.listeners, &data);
        }
        Ok(())
    }

    async fn query(&self, query: Query) -> Result<QueryPage, StoreError> {
        let data = self.data.lock().await;
        Ok(run_query(&data, &query))
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError> {
        let data = self.data.lock().await;
        let (sender, receiver) = mpsc::unbounded_channel();
        let initial = run_query(&data, &query).docs;
        let _ = sender.send(initial);

        let id = Uuid::new_v4();
        self.listeners
            .lock()
            .unwrap()
            .insert(id, ListenerEntry { query, sender });

        let listeners = Arc::clone(&self.listeners);
        Ok(Subscription::new(receiver, move || {
            listeners.lock().unwrap().remove(&id);
        }))
    }

    async fn transaction(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        // Holding the data lock for the transaction's lifetime is what
        // makes read-check-write safe here.
        let guard = Arc::clone(&self.data).lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            guard,
            staged: Vec::new(),
            listeners: Arc::clone(&self.listeners),
        }))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<BTreeMap<String, Fields>>,
    staged: Vec<Staged>,
    listeners: Arc<StdMutex<HashMap<Uuid, ListenerEntry>>>,
}

enum Staged {
    Set(Reference, Fields),
    Update(Reference, Fields),
    Delete(Reference),
}

#[async_trait::async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get(&mut self, reference: &Reference) -> Result<Option<Fields>, StoreError> {
        let mut current = self.guard.get(&reference.path()).cloned();
        for op in &self.staged {
            match op {
                Staged::Set(target, fields) if target == reference => {
                    current = Some(fields.clone());
                }
                Staged::Update(target, fields) if target == reference => {
                    if let Some(doc) = current.as_mut() {
                        for (name, value) in fields {
                            doc.insert(name.clone(), value.clone());
                        }
                    }
                }
                Staged::Delete(target) if target == reference => {
                    current = None;
                }
                _ => {}
            }
        }
        Ok(current)
    }

    fn set(&mut self, reference: &Reference, fields: Fields) {
        self.staged.push(Staged::Set(reference.clone(), fields));
    }

    fn update(&mut self, reference: &Reference, fields: Fields) {
        self.staged.push(Staged::Update(reference.clone(), fields));
    }

    fn delete(&mut self, reference: &Reference) {
        self.staged.push(Staged::Delete(reference.clone()));
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut this = *self;
        // Replay onto a copy so a failing update leaves the map untouched.
        let mut next = (*this.guard).clone();
        for op in this.staged.drain(..) {
            match op {
                Staged::Set(reference, fields) => {
                    next.insert(reference.path(), fields);
                }
                Staged::Update(reference, fields) => {
                    let doc = next
                        .get_mut(&reference.path())
                        .ok_or_else(|| StoreError::NotFound(reference.clone()))?;
                    for (name, value) in fields {
                        doc.insert(name, value);
                    }
                }
                Staged::Delete(reference) => {
                    next.remove(&reference.path());
                }
            }
        }
        *this.guard = next;
        notify_listeners(&this.listeners, &this.guard);
        Ok(())
    }
}

fn apply_ops(fields: &mut Fields, ops: &[FieldOp]) -> Result<(), StoreError> {
    for op in ops {
        match op {
            FieldOp::Set(name, value) => {
                fields.insert((*name).to_string(), value.clone());
            }
            FieldOp::Increment(name, delta) => {
                let current = match fields.get(*name) {
                    None => 0,
                    Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
                        StoreError::Malformed(format!("field `{}` is not an integer", name))
                    })?,
                    Some(_) => {
                        return Err(StoreError::Malformed(format!(
                            "field `{}` is not a number",
                            name
                        )))
                    }
                };
                fields.insert((*name).to_string(), Value::from(current + delta));
            }
            FieldOp::SetAdd(name, value) => {
                let entries = array_field(fields, name)?;
                if !entries.contains(value) {
                    entries.push(value.clone());
                }
            }
            FieldOp::SetRemove(name, value) => {
                let entries = array_field(fields, name)?;
                entries.retain(|entry| entry != value);
            }
        }
    }
    Ok(())
}

fn array_field<'a>(
    fields: &'a mut Fields,
    name: &'static str,
) -> Result<&'a mut Vec<Value>, StoreError> {
    match fields
        .entry(name.to_string())
        .or_insert_with(|| Value::Array(Vec::new()))
    {
        Value::Array(entries) => Ok(entries),
        _ => Err(StoreError::Malformed(format!(
            "field `{}` is not an array",
            name
        ))),
    }
}

fn run_query(data: &BTreeMap<String, Fields>, query: &Query) -> QueryPage {
    let order = query
        .order_by
        .clone()
        .unwrap_or_else(|| OrderBy::asc(""));

    let mut docs: Vec<Document> = data
        .iter()
        .filter_map(|(path, fields)| {
            let reference = Reference::parse(path)?;
            if reference.collection() != query.collection {
                return None;
            }
            if !query.filters.iter().all(|filter| filter.matches(fields)) {
                return None;
            }
            Some(Document {
                reference,
                fields: fields.clone(),
            })
        })
        .collect();

    docs.sort_by(|a, b| {
        cmp_position(
            &order,
            &order_value(&a.fields, order.field),
            a.reference.id(),
            &order_value(&b.fields, order.field),
            b.reference.id(),
        )
    });

    if let Some(cursor) = &query.start_after {
        docs.retain(|doc| {
            cmp_position(
                &order,
                &order_value(&doc.fields, order.field),
                doc.reference.id(),
                &cursor.value,
                &cursor.id,
            ) == Ordering::Greater
        });
    }

    match query.limit {
        Some(limit) if docs.len() > limit => {
            docs.truncate(limit);
            QueryPage {
                docs,
                has_more: true,
            }
        }
        _ => QueryPage {
            docs,
            has_more: false,
        },
    }
}

fn order_value(fields: &Fields, field: &str) -> Value {
    fields.get(field).cloned().unwrap_or(Value::Null)
}

/// Position of `a` relative to `b` in presentation order: the order-by
/// value first, document id as tie-break, both in the same direction.
fn cmp_position(
    order: &OrderBy,
    a_value: &Value,
    a_id: &str,
    b_value: &Value,
    b_id: &str,
) -> Ordering {
    let forward = cmp_values(a_value, b_value).then_with(|| a_id.cmp(b_id));
    if order.descending {
        forward.reverse()
    } else {
        forward
    }
}

fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn notify_listeners(
    listeners: &StdMutex<HashMap<Uuid, ListenerEntry>>,
    data: &BTreeMap<String, Fields>,
) {
    let mut listeners = listeners.lock().unwrap();
    listeners.retain(|_, entry| {
        let snapshot = run_query(data, &entry.query).docs;
        entry.sender.send(snapshot).is_ok()
    });
}
