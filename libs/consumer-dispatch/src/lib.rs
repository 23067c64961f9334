//! # Consumer Dispatch Engine
//!
//! The single delivery protocol shared by the queue and stream adapters.
//! For one decoded delivery, in order:
//!
//! 1. **Bind** — look the handler up by wire type name. Unknown types are
//!    acknowledged, not errors: the queue/topic is shared and the type
//!    belongs to another service.
//! 2. **Retry ceiling** — if the transport's retry counter exceeds the
//!    handler's declared maximum, run the optional after-max hook (outside
//!    any transaction, best-effort) and acknowledge; the message is given
//!    up on.
//! 3. **Transaction config** — a handler with no declared transaction
//!    config is a programmer error: logged loudly and sent down the retry
//!    path.
//! 4. **Idempotency gate** — if the side-appropriate inbox already holds
//!    the message id, the effects are in place; acknowledge.
//! 5. **Transact** — open a transaction at the declared isolation level,
//!    insert the inbox marker, invoke the handler, commit.
//! 6. **Cache invalidation** — delete the handler's declared keys; failures
//!    here are logged but never fail the delivery (the effects committed).
//! 7. **Acknowledge.**
//!
//! Any failure after bind rolls the transaction back, ships a trace through
//! the failure side-channel, and returns [`DispatchOutcome::Retry`] for the
//! transport to translate (dead-letter nack on the queue side, republish on
//! the stream side). Handlers never see infrastructure errors.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use failure_log::{FailureLogger, FailureTrace};
use message_contracts::{
    envelope, AckKind, CacheStore, ConsumerEvent, DispatchOutcome, HandlerBinding,
    HandlerMetadata, HandlerRegistry, InboundMessage, MessageDispatch, ScopeFactory,
    TransactionConfig,
};

pub struct DispatchEngine {
    service: String,
    registry: Arc<HandlerRegistry>,
    scopes: Arc<dyn ScopeFactory>,
    cache: Arc<dyn CacheStore>,
    failures: Arc<FailureLogger>,
}

impl DispatchEngine {
    pub fn new(
        service: impl Into<String>,
        registry: Arc<HandlerRegistry>,
        scopes: Arc<dyn ScopeFactory>,
        cache: Arc<dyn CacheStore>,
        failures: Arc<FailureLogger>,
    ) -> Self {
        Self {
            service: service.into(),
            registry,
            scopes,
            cache,
            failures,
        }
    }

    async fn fail(&self, message: &InboundMessage, stage: &str, error: String) -> DispatchOutcome {
        self.failures
            .report(
                FailureTrace::new(&self.service, &message.type_name, stage, error)
                    .retry_count(message.retry_count),
            )
            .await;
        DispatchOutcome::Retry
    }

    async fn run_after_max_hook(&self, binding: &HandlerBinding, message: &InboundMessage) {
        // Outside any transaction and best-effort: a failing hook still
        // terminates the message.
        if let Err(e) = binding.invoke_after_max(&message.payload).await {
            warn!(
                type_name = %message.type_name,
                error = %e,
                "after-max-retry hook failed"
            );
        }
    }

    async fn transact(
        &self,
        binding: &HandlerBinding,
        metadata: &HandlerMetadata,
        transaction: TransactionConfig,
        scope: &message_contracts::ConsumerScope,
        message: &InboundMessage,
        message_id: &str,
    ) -> anyhow::Result<()> {
        let uow = scope.unit_of_work(transaction.side);
        uow.begin(transaction.isolation).await?;

        scope
            .add_marker(
                metadata.idempotency_side(),
                &ConsumerEvent::new(message_id, &message.type_name, message.retry_count as i32),
            )
            .await?;
        binding.invoke(&message.payload).await?;

        uow.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl MessageDispatch for DispatchEngine {
    async fn dispatch(&self, message: InboundMessage) -> DispatchOutcome {
        // 1. Bind.
        let Some(binding) = self.registry.binding(&message.type_name) else {
            debug!(type_name = %message.type_name, "no handler registered, acknowledging");
            return DispatchOutcome::Ack(AckKind::UnknownType);
        };
        let metadata = binding.metadata.clone();

        // 2. Retry ceiling.
        if message.retry_count > metadata.max_retry {
            info!(
                type_name = %message.type_name,
                retry_count = message.retry_count,
                max_retry = metadata.max_retry,
                "retry ceiling exceeded, giving up on message"
            );
            if metadata.has_after_max_hook {
                self.run_after_max_hook(binding, &message).await;
            }
            return DispatchOutcome::Ack(AckKind::MaxRetryExceeded);
        }

        // 3. Transaction config is mandatory.
        let Some(transaction) = metadata.transaction else {
            error!(
                type_name = %message.type_name,
                "handler declares no transaction config; this is a programmer error"
            );
            return self
                .fail(
                    &message,
                    "transaction-config",
                    "handler declares no transaction config".to_string(),
                )
                .await;
        };

        let message_id = match envelope::extract_message_id(&message.payload) {
            Ok(id) => id,
            Err(e) => return self.fail(&message, "message-id", e.to_string()).await,
        };

        // Fresh scope per delivery; dropped on every exit path.
        let scope = match self.scopes.create_scope().await {
            Ok(scope) => scope,
            Err(e) => return self.fail(&message, "scope", e.to_string()).await,
        };

        // 4. Idempotency gate.
        match scope
            .find_marker(metadata.idempotency_side(), &message_id)
            .await
        {
            Ok(Some(_)) => {
                debug!(message_id = %message_id, "already processed, acknowledging");
                return DispatchOutcome::Ack(AckKind::AlreadyProcessed);
            }
            Ok(None) => {}
            Err(e) => return self.fail(&message, "idempotency-check", e.to_string()).await,
        }

        // 5. Transact: marker + handler effects commit together or not at all.
        if let Err(e) = self
            .transact(binding, &metadata, transaction, &scope, &message, &message_id)
            .await
        {
            let _ = scope.unit_of_work(transaction.side).rollback().await;
            return self.fail(&message, "transact", format!("{e:#}")).await;
        }

        // 6. Cache invalidation, after the commit. Log-only on failure.
        for key in &metadata.clean_cache_keys {
            if let Err(e) = self.cache.delete(key).await {
                warn!(key = %key, error = %e, "cache invalidation failed");
            }
        }

        // 7. Acknowledge.
        info!(
            type_name = %message.type_name,
            message_id = %message_id,
            "delivery processed"
        );
        DispatchOutcome::Ack(AckKind::Processed)
    }
}
