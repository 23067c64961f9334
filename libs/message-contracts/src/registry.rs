//! Static handler registry.
//!
//! Populated once at startup, then shared immutably behind an `Arc`. Each
//! entry pairs a type-erased invoker with the handler's metadata record, so
//! the dispatch hot path is a map lookup plus a virtual call — no reflective
//! method resolution anywhere.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::envelope;
use crate::metadata::{BindingKind, HandlerMetadata};

/// Consumer handler capability. One implementation per message type; the
/// after-max hook is optional and only invoked when the metadata declares it.
#[async_trait]
pub trait ConsumeMessage<T: Send + 'static>: Send + Sync {
    async fn handle(&self, message: T) -> anyhow::Result<()>;

    /// Invoked once the retry ceiling is exceeded, outside any transaction.
    /// Best-effort: failures are logged and the message is still given up on.
    async fn after_max_retry(&self, _message: T) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a handler for message type `{0}` is already registered")]
    DuplicateHandler(String),

    #[error("a publish route for event type `{0}` is already declared")]
    DuplicateRoute(String),
}

#[async_trait]
trait ErasedHandler: Send + Sync {
    async fn invoke(&self, payload: &str) -> anyhow::Result<()>;
    async fn invoke_after_max(&self, payload: &str) -> anyhow::Result<()>;
}

struct TypedHandler<T, H> {
    handler: H,
    type_name: String,
    _payload: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T, H> ErasedHandler for TypedHandler<T, H>
where
    T: DeserializeOwned + Send + 'static,
    H: ConsumeMessage<T>,
{
    async fn invoke(&self, payload: &str) -> anyhow::Result<()> {
        let message: T = envelope::decode(payload)
            .with_context(|| format!("decoding payload for `{}`", self.type_name))?;
        self.handler.handle(message).await
    }

    async fn invoke_after_max(&self, payload: &str) -> anyhow::Result<()> {
        let message: T = envelope::decode(payload)
            .with_context(|| format!("decoding payload for `{}`", self.type_name))?;
        self.handler.after_max_retry(message).await
    }
}

/// One registered binding: wire type name, metadata, erased invoker.
#[derive(Clone)]
pub struct HandlerBinding {
    type_name: String,
    pub metadata: HandlerMetadata,
    invoker: Arc<dyn ErasedHandler>,
}

impl HandlerBinding {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Decode the payload and run the handler.
    pub async fn invoke(&self, payload: &str) -> anyhow::Result<()> {
        self.invoker.invoke(payload).await
    }

    /// Decode the payload and run the after-max hook.
    pub async fn invoke_after_max(&self, payload: &str) -> anyhow::Result<()> {
        self.invoker.invoke_after_max(payload).await
    }
}

/// Type-name -> handler binding map. Ambiguity (two handlers for one type)
/// is rejected at registration, which is a startup error.
#[derive(Default)]
pub struct HandlerRegistry {
    bindings: HashMap<String, HandlerBinding>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T, H>(
        &mut self,
        type_name: impl Into<String>,
        handler: H,
        metadata: HandlerMetadata,
    ) -> Result<(), RegistryError>
    where
        T: DeserializeOwned + Send + 'static,
        H: ConsumeMessage<T> + 'static,
    {
        let type_name = type_name.into();
        if self.bindings.contains_key(&type_name) {
            return Err(RegistryError::DuplicateHandler(type_name));
        }

        let invoker = Arc::new(TypedHandler {
            handler,
            type_name: type_name.clone(),
            _payload: PhantomData,
        });
        self.bindings.insert(
            type_name.clone(),
            HandlerBinding {
                type_name,
                metadata,
                invoker,
            },
        );
        Ok(())
    }

    /// Look up the unique handler for a wire type name. `None` means the
    /// type belongs to another service and the delivery is simply acked.
    pub fn binding(&self, type_name: &str) -> Option<&HandlerBinding> {
        self.bindings.get(type_name)
    }

    /// Distinct stream topics declared by registered stream bindings, for
    /// the hosted workers to open one subscription each.
    pub fn stream_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .bindings
            .values()
            .filter(|binding| binding.metadata.kind == BindingKind::Stream)
            .filter_map(|binding| binding.metadata.topic.clone())
            .collect();
        topics.sort();
        topics.dedup();
        topics
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::HandlerMetadata;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Deserialize)]
    struct Ping {
        #[allow(dead_code)]
        id: String,
    }

    #[derive(Default)]
    struct CountingHandler {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ConsumeMessage<Ping> for Arc<CountingHandler> {
        async fn handle(&self, _message: Ping) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn registered_handler_is_invoked_through_the_erased_binding() {
        let handler = Arc::new(CountingHandler::default());
        let mut registry = HandlerRegistry::new();
        registry
            .register::<Ping, _>("Ping", handler.clone(), HandlerMetadata::message())
            .unwrap();

        let binding = registry.binding("Ping").expect("binding registered");
        binding.invoke(r#"{"id":"p1"}"#).await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry
            .register::<Ping, _>(
                "Ping",
                Arc::new(CountingHandler::default()),
                HandlerMetadata::message(),
            )
            .unwrap();
        let err = registry
            .register::<Ping, _>(
                "Ping",
                Arc::new(CountingHandler::default()),
                HandlerMetadata::message(),
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateHandler(name) if name == "Ping"));
    }

    #[tokio::test]
    async fn stream_topics_are_distinct_and_sorted() {
        let mut registry = HandlerRegistry::new();
        registry
            .register::<Ping, _>(
                "A",
                Arc::new(CountingHandler::default()),
                HandlerMetadata::stream("orders"),
            )
            .unwrap();
        registry
            .register::<Ping, _>(
                "B",
                Arc::new(CountingHandler::default()),
                HandlerMetadata::stream("orders"),
            )
            .unwrap();
        registry
            .register::<Ping, _>(
                "C",
                Arc::new(CountingHandler::default()),
                HandlerMetadata::stream("billing"),
            )
            .unwrap();

        assert_eq!(registry.stream_topics(), vec!["billing", "orders"]);
    }

    #[test]
    fn unknown_type_has_no_binding() {
        let registry = HandlerRegistry::new();
        assert!(registry.binding("NoSuchType").is_none());
    }
}
