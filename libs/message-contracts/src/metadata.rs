//! Handler metadata value records.
//!
//! Attached to a handler at registration time instead of being discovered
//! from annotations, so the dispatch engine reads plain data on the hot path.

/// Which unit of work a handler's transaction runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionSide {
    Command,
    Query,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Declares the side and isolation level of the transaction a handler runs
/// inside. Every handler must carry one; its absence is surfaced as a hard
/// error at dispatch time, not at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionConfig {
    pub side: TransactionSide,
    pub isolation: IsolationLevel,
}

/// What the handler binds to on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// Typed message from a queue.
    Message,
    /// Domain event from a queue (`Event` envelope).
    Event,
    /// Record from a stream topic.
    Stream,
}

/// Per-handler dispatch metadata.
#[derive(Debug, Clone)]
pub struct HandlerMetadata {
    pub kind: BindingKind,
    /// Retry ceiling: the handler is attempted at most `max_retry + 1` times.
    pub max_retry: u32,
    /// Whether the after-max hook should run once the ceiling is exceeded.
    pub has_after_max_hook: bool,
    pub transaction: Option<TransactionConfig>,
    /// Cache keys deleted after a successful commit.
    pub clean_cache_keys: Vec<String>,
    /// Stream topic the handler is bound to (stream bindings only).
    pub topic: Option<String>,
}

const DEFAULT_MAX_RETRY: u32 = 5;

impl HandlerMetadata {
    pub fn message() -> Self {
        Self::with_kind(BindingKind::Message, None)
    }

    pub fn event() -> Self {
        Self::with_kind(BindingKind::Event, None)
    }

    pub fn stream(topic: impl Into<String>) -> Self {
        Self::with_kind(BindingKind::Stream, Some(topic.into()))
    }

    fn with_kind(kind: BindingKind, topic: Option<String>) -> Self {
        Self {
            kind,
            max_retry: DEFAULT_MAX_RETRY,
            has_after_max_hook: false,
            transaction: None,
            clean_cache_keys: Vec::new(),
            topic,
        }
    }

    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn with_after_max_hook(mut self) -> Self {
        self.has_after_max_hook = true;
        self
    }

    pub fn transaction(mut self, side: TransactionSide, isolation: IsolationLevel) -> Self {
        self.transaction = Some(TransactionConfig { side, isolation });
        self
    }

    /// Declare cache keys to invalidate, pipe-separated ("A|B|C").
    pub fn clean_cache(mut self, keys: &str) -> Self {
        self.clean_cache_keys = keys
            .split('|')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_owned)
            .collect();
        self
    }

    /// Which inbox table records this handler's idempotency marker:
    /// command-side events use the command inbox, query-side events and all
    /// messages use the query inbox.
    pub fn idempotency_side(&self) -> TransactionSide {
        match (self.kind, self.transaction) {
            (BindingKind::Event, Some(config)) if config.side == TransactionSide::Command => {
                TransactionSide::Command
            }
            _ => TransactionSide::Query,
        }
    }
}
