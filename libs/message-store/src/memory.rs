//! In-memory implementations of the persistence contracts.
//!
//! Writes are staged on the unit of work and applied to the shared tables on
//! commit, or discarded on rollback, so tests observe the same atomicity the
//! SQLx implementations provide. Used by the scenario suite and available to
//! downstream services for their own tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use message_contracts::{
    ConsumerEvent, ConsumerEventCommandRepository, ConsumerEventQueryRepository, ConsumerScope,
    Event, EventCommandRepository, EventPublisher, EventRoute, IsolationLevel, ScopeFactory,
    StoreError, StoreResult, TransactionSide, UnitOfWork,
};

type Apply = Box<dyn FnOnce() + Send>;

/// Unit of work that stages writes and applies them on commit.
pub struct MemoryUnitOfWork {
    side: TransactionSide,
    state: Mutex<TxState>,
    fail_next_commit: AtomicBool,
}

#[derive(Default)]
struct TxState {
    active: bool,
    staged: Vec<Apply>,
}

impl MemoryUnitOfWork {
    pub fn new(side: TransactionSide) -> Arc<Self> {
        Arc::new(Self {
            side,
            state: Mutex::new(TxState::default()),
            fail_next_commit: AtomicBool::new(false),
        })
    }

    /// Make the next `commit` fail and discard its staged writes, simulating
    /// a crash between broker publish and database commit.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    fn stage(&self, apply: Apply) -> StoreResult<()> {
        let mut state = self.state.lock().expect("uow state poisoned");
        if !state.active {
            return Err(StoreError::NoActiveTransaction(self.side));
        }
        state.staged.push(apply);
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    fn side(&self) -> TransactionSide {
        self.side
    }

    async fn begin(&self, _isolation: IsolationLevel) -> StoreResult<()> {
        let mut state = self.state.lock().expect("uow state poisoned");
        if state.active {
            return Err(StoreError::TransactionAlreadyActive(self.side));
        }
        state.active = true;
        Ok(())
    }

    async fn commit(&self) -> StoreResult<()> {
        let staged = {
            let mut state = self.state.lock().expect("uow state poisoned");
            if !state.active {
                return Err(StoreError::NoActiveTransaction(self.side));
            }
            state.active = false;
            std::mem::take(&mut state.staged)
        };

        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database(anyhow::anyhow!(
                "injected commit failure"
            )));
        }

        for apply in staged {
            apply();
        }
        Ok(())
    }

    async fn rollback(&self) -> StoreResult<()> {
        let mut state = self.state.lock().expect("uow state poisoned");
        state.active = false;
        state.staged.clear();
        Ok(())
    }
}

/// Shared outbox table.
#[derive(Default)]
pub struct MemoryEventTable {
    rows: Mutex<Vec<Event>>,
}

impl MemoryEventTable {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Direct insert for seeding tests; bypasses any transaction.
    pub fn insert(&self, event: Event) {
        self.rows.lock().expect("event table poisoned").push(event);
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.rows.lock().expect("event table poisoned").clone()
    }

    pub fn find(&self, id: &str) -> Option<Event> {
        self.rows
            .lock()
            .expect("event table poisoned")
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().expect("event table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct MemoryEventCommandRepository {
    uow: Arc<MemoryUnitOfWork>,
    table: Arc<MemoryEventTable>,
}

impl MemoryEventCommandRepository {
    pub fn new(uow: Arc<MemoryUnitOfWork>, table: Arc<MemoryEventTable>) -> Self {
        Self { uow, table }
    }
}

#[async_trait]
impl EventCommandRepository for MemoryEventCommandRepository {
    async fn add(&self, event: &Event) -> StoreResult<()> {
        let table = self.table.clone();
        let event = event.clone();
        self.uow.stage(Box::new(move || table.insert(event)))
    }

    async fn find_all_ordered_by_date(&self) -> StoreResult<Vec<Event>> {
        let mut rows = self.table.snapshot();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn change(&self, event: &Event) -> StoreResult<()> {
        let table = self.table.clone();
        let changed = event.clone();
        self.uow.stage(Box::new(move || {
            let mut rows = table.rows.lock().expect("event table poisoned");
            if let Some(row) = rows.iter_mut().find(|e| e.id == changed.id) {
                *row = changed;
            }
        }))
    }

    async fn remove(&self, event: &Event) -> StoreResult<()> {
        let table = self.table.clone();
        let id = event.id.clone();
        self.uow.stage(Box::new(move || {
            table
                .rows
                .lock()
                .expect("event table poisoned")
                .retain(|e| e.id != id);
        }))
    }
}

/// Shared inbox table.
#[derive(Default)]
pub struct MemoryMarkerTable {
    rows: Mutex<HashMap<String, ConsumerEvent>>,
}

impl MemoryMarkerTable {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rows
            .lock()
            .expect("marker table poisoned")
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.rows.lock().expect("marker table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Inbox repository over a shared marker table; serves both sides.
pub struct MemoryConsumerEventRepository {
    uow: Arc<MemoryUnitOfWork>,
    table: Arc<MemoryMarkerTable>,
}

impl MemoryConsumerEventRepository {
    pub fn new(uow: Arc<MemoryUnitOfWork>, table: Arc<MemoryMarkerTable>) -> Self {
        Self { uow, table }
    }

    async fn find(&self, id: &str) -> StoreResult<Option<ConsumerEvent>> {
        Ok(self
            .table
            .rows
            .lock()
            .expect("marker table poisoned")
            .get(id)
            .cloned())
    }

    async fn insert(&self, marker: &ConsumerEvent) -> StoreResult<()> {
        let table = self.table.clone();
        let marker = marker.clone();
        self.uow.stage(Box::new(move || {
            table
                .rows
                .lock()
                .expect("marker table poisoned")
                .insert(marker.id.clone(), marker);
        }))
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut rows = self.table.rows.lock().expect("marker table poisoned");
        let before = rows.len();
        rows.retain(|_, marker| marker.created_at >= cutoff);
        Ok((before - rows.len()) as u64)
    }
}

#[async_trait]
impl ConsumerEventCommandRepository for MemoryConsumerEventRepository {
    async fn find_by_id(&self, id: &str) -> StoreResult<Option<ConsumerEvent>> {
        self.find(id).await
    }

    async fn add(&self, marker: &ConsumerEvent) -> StoreResult<()> {
        self.insert(marker).await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.prune(cutoff).await
    }
}

#[async_trait]
impl ConsumerEventQueryRepository for MemoryConsumerEventRepository {
    async fn find_by_id(&self, id: &str) -> StoreResult<Option<ConsumerEvent>> {
        self.find(id).await
    }

    async fn add(&self, marker: &ConsumerEvent) -> StoreResult<()> {
        self.insert(marker).await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.prune(cutoff).await
    }
}

/// Scope factory over shared marker tables; each scope gets fresh units of
/// work, mirroring the per-delivery scope rule.
pub struct MemoryScopeFactory {
    pub command_markers: Arc<MemoryMarkerTable>,
    pub query_markers: Arc<MemoryMarkerTable>,
}

impl MemoryScopeFactory {
    pub fn new() -> Self {
        Self {
            command_markers: MemoryMarkerTable::shared(),
            query_markers: MemoryMarkerTable::shared(),
        }
    }
}

impl Default for MemoryScopeFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScopeFactory for MemoryScopeFactory {
    async fn create_scope(&self) -> anyhow::Result<ConsumerScope> {
        let command_uow = MemoryUnitOfWork::new(TransactionSide::Command);
        let query_uow = MemoryUnitOfWork::new(TransactionSide::Query);

        Ok(ConsumerScope {
            command_inbox: Arc::new(MemoryConsumerEventRepository::new(
                command_uow.clone(),
                self.command_markers.clone(),
            )),
            query_inbox: Arc::new(MemoryConsumerEventRepository::new(
                query_uow.clone(),
                self.query_markers.clone(),
            )),
            command_uow,
            query_uow,
        })
    }
}

/// Event publisher that records what it is handed, with optional failure
/// injection for crash-point tests.
#[derive(Default)]
pub struct RecordingEventPublisher {
    published: Mutex<Vec<(EventRoute, Event)>>,
    fail_remaining: AtomicU32,
}

impl RecordingEventPublisher {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `n` publishes before recovering.
    pub fn fail_times(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<(EventRoute, Event)> {
        self.published.lock().expect("publisher poisoned").clone()
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().expect("publisher poisoned").len()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish_event(&self, route: &EventRoute, event: &Event) -> anyhow::Result<()> {
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("injected publish failure for event `{}`", event.id);
        }
        self.published
            .lock()
            .expect("publisher poisoned")
            .push((route.clone(), event.clone()));
        Ok(())
    }
}
