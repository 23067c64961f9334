//! # Hosted Workers
//!
//! Long-running loops that own the subscription lifecycles: the outbox
//! worker (interval drain), one queue consumer per configured queue, and one
//! stream consumer per topic discovered from the handler registry's stream
//! bindings.
//!
//! All workers share one `watch` shutdown channel. On shutdown the consume
//! loops exit at their next iteration; in-flight deliveries finish their
//! transaction or roll back, and nothing is acknowledged on the way down, so
//! pending deliveries simply redeliver.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use message_contracts::{HandlerRegistry, MessageDispatch, StreamBrokerConfig};
use outbox_publisher::OutboxPublisher;
use queue_broker::QueueBroker;
use stream_broker::{StreamBrokerResult, StreamPublisher, StreamSubscription};

/// Owns the worker tasks and their shared shutdown signal.
pub struct WorkerSet {
    shutdown_tx: watch::Sender<()>,
    shutdown_rx: watch::Receiver<()>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerSet {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        Self {
            shutdown_tx,
            shutdown_rx,
            handles: Vec::new(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Drain the outbox on a fixed interval until shutdown.
    pub fn spawn_outbox_worker(&mut self, publisher: Arc<OutboxPublisher>, interval: Duration) {
        let mut shutdown = self.shutdown_rx.clone();
        self.handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = interval.as_secs(), "outbox worker starting");

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("outbox worker stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        // Pass errors already rolled back and were logged;
                        // the next tick retries.
                        let _ = publisher.drain_once().await;
                    }
                }
            }
        }));
    }

    /// One subscription on a queue of `Event` envelopes.
    pub fn spawn_queue_event_worker(
        &mut self,
        broker: Arc<QueueBroker>,
        queue: String,
        dispatch: Arc<dyn MessageDispatch>,
    ) {
        let shutdown = self.shutdown_rx.clone();
        self.handles.push(tokio::spawn(async move {
            if let Err(e) = broker.subscribe_event(&queue, dispatch, shutdown).await {
                error!(queue = %queue, error = %e, "queue event worker exited with error");
            }
        }));
    }

    /// One subscription on a queue of typed messages.
    pub fn spawn_queue_message_worker(
        &mut self,
        broker: Arc<QueueBroker>,
        queue: String,
        type_name: String,
        dispatch: Arc<dyn MessageDispatch>,
    ) {
        let shutdown = self.shutdown_rx.clone();
        self.handles.push(tokio::spawn(async move {
            if let Err(e) = broker
                .subscribe_message(&queue, &type_name, dispatch, shutdown)
                .await
            {
                error!(queue = %queue, error = %e, "queue message worker exited with error");
            }
        }));
    }

    /// One stream subscription per topic the registry's stream bindings
    /// declare.
    pub fn spawn_stream_workers(
        &mut self,
        config: &StreamBrokerConfig,
        service: &str,
        registry: &HandlerRegistry,
        publisher: Arc<StreamPublisher>,
        dispatch: Arc<dyn MessageDispatch>,
    ) -> StreamBrokerResult<()> {
        for topic in registry.stream_topics() {
            let subscription = StreamSubscription::new(
                config,
                service,
                &topic,
                publisher.clone(),
                dispatch.clone(),
            )?;
            let shutdown = self.shutdown_rx.clone();
            self.handles.push(tokio::spawn(async move {
                subscription.run(shutdown).await;
            }));
        }
        Ok(())
    }

    /// Signal shutdown and wait for every worker to finish.
    pub async fn shutdown(self) {
        info!(workers = self.handles.len(), "stopping hosted workers");
        let _ = self.shutdown_tx.send(());
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

impl Default for WorkerSet {
    fn default() -> Self {
        Self::new()
    }
}
