//! Queue worker that leases message batches and dispatches them to a handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, instrument, warn};

use devgraph_core::{
    defaults, AuditRecord, Error, ErrorClass, LogEvent, LogLevel, QueueMessage, Result,
};

use crate::handler::{HandlerOutcome, MessageContext, MessageHandler, Stores};

/// Configuration for a queue worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between polls when the queue is empty, in milliseconds.
    pub poll_interval_ms: u64,
    /// Visibility timeout applied on dequeue.
    pub visibility_timeout: Duration,
    /// Maximum messages leased per dequeue.
    pub batch_size: usize,
    /// A message read more often than this is dead-lettered unprocessed.
    pub max_reads: i32,
    /// Per-message processing timeout. Must stay below `visibility_timeout`.
    pub message_timeout: Duration,
    /// Delay before a retried message becomes visible again.
    pub retry_delay: Duration,
    /// Hard wall-clock budget of one invocation.
    pub budget: Option<Duration>,
    /// Stop as soon as a dequeue returns nothing.
    pub stop_when_idle: bool,
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::WORKER_POLL_INTERVAL_MS,
            visibility_timeout: Duration::from_secs(defaults::QUEUE_VISIBILITY_TIMEOUT_SECS),
            batch_size: defaults::QUEUE_BATCH_SIZE,
            max_reads: defaults::QUEUE_MAX_READS,
            message_timeout: Duration::from_secs(defaults::WORKER_MESSAGE_TIMEOUT_SECS),
            retry_delay: Duration::from_secs(defaults::QUEUE_NACK_DELAY_SECS),
            budget: None,
            stop_when_idle: false,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WORKER_POLL_INTERVAL_MS` | `1000` | Polling interval when the queue is empty |
    /// | `QUEUE_VISIBILITY_TIMEOUT_SECS` | `600` | Visibility timeout on dequeue |
    /// | `QUEUE_BATCH_SIZE` | `10` | Max messages per dequeue |
    /// | `QUEUE_MAX_READS` | `5` | Read-count ceiling before dead-lettering |
    /// | `WORKER_MESSAGE_TIMEOUT_SECS` | `300` | Per-message processing timeout |
    /// | `QUEUE_NACK_DELAY_SECS` | `30` | Redelivery delay of a retried message |
    /// | `WORKER_BUDGET_SECS` | unset | Wall-clock budget of one invocation |
    pub fn from_env() -> Self {
        fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|v| v.parse::<T>().ok())
        }

        let mut config = Self::default();
        if let Some(ms) = parsed("WORKER_POLL_INTERVAL_MS") {
            config.poll_interval_ms = ms;
        }
        if let Some(secs) = parsed("QUEUE_VISIBILITY_TIMEOUT_SECS") {
            config.visibility_timeout = Duration::from_secs(secs);
        }
        if let Some(size) = parsed::<usize>("QUEUE_BATCH_SIZE") {
            config.batch_size = size.max(1);
        }
        if let Some(reads) = parsed("QUEUE_MAX_READS") {
            config.max_reads = reads;
        }
        if let Some(secs) = parsed("WORKER_MESSAGE_TIMEOUT_SECS") {
            config.message_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parsed("QUEUE_NACK_DELAY_SECS") {
            config.retry_delay = Duration::from_secs(secs);
        }
        config.budget = parsed("WORKER_BUDGET_SECS").map(Duration::from_secs);
        config
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_max_reads(mut self, max_reads: i32) -> Self {
        self.max_reads = max_reads;
        self
    }

    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_budget(mut self, budget: Option<Duration>) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_stop_when_idle(mut self, stop: bool) -> Self {
        self.stop_when_idle = stop;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.message_timeout >= self.visibility_timeout {
            return Err(Error::Config(format!(
                "message timeout {:?} must be shorter than visibility timeout {:?}",
                self.message_timeout, self.visibility_timeout
            )));
        }
        Ok(())
    }
}

/// Why a worker loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `WorkerHandle::shutdown` was called.
    Shutdown,
    /// The wall-clock budget elapsed.
    BudgetExhausted,
    /// The queue was empty and the worker runs until idle.
    Idle,
    /// A handler or the queue reported a fatal error.
    Fatal,
    Disabled,
}

/// Event emitted by a queue worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    WorkerStarted {
        queue: String,
    },
    MessageProcessed {
        queue: String,
        message_id: i64,
        duration_ms: u64,
    },
    MessageRetried {
        queue: String,
        message_id: i64,
        reason: String,
    },
    MessageDeadLettered {
        queue: String,
        message_id: i64,
        reason: String,
    },
    /// A fatal error; the message stays unacked and the worker stops.
    WorkerFatal {
        queue: String,
        message_id: Option<i64>,
        error: String,
    },
    WorkerStopped {
        queue: String,
        reason: StopReason,
    },
}

/// Counts for one leased batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub leased: usize,
    pub acked: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub fatal: bool,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    task: JoinHandle<StopReason>,
}

impl WorkerHandle {
    /// Signal the worker to stop before its next dequeue.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    /// Whether the worker loop has already ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the worker loop to end.
    pub async fn join(self) -> Result<StopReason> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("worker task failed: {}", e)))
    }
}

/// Drains one queue with one handler.
///
/// Every leased message runs in its own task under a timeout. A failure of
/// one message never touches its siblings in the batch; only the outcome of
/// that message decides whether it is acked, retried, or dead-lettered.
pub struct QueueWorker {
    stores: Stores,
    handler: Arc<dyn MessageHandler>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl QueueWorker {
    /// Fails with a configuration error when the message timeout does not
    /// fit inside the visibility timeout.
    pub fn new(
        stores: Stores,
        handler: Arc<dyn MessageHandler>,
        config: WorkerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Ok(Self {
            stores,
            handler,
            config,
            event_tx,
        })
    }

    pub fn queue(&self) -> &str {
        self.handler.queue()
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let task = tokio::spawn(async move { self.run(&mut shutdown_rx).await });

        WorkerHandle {
            shutdown_tx,
            event_rx,
            task,
        }
    }

    /// Run in the current task until the budget, idleness, or a fatal error ends the loop.
    pub async fn run_to_completion(&self) -> StopReason {
        let (_shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        self.run(&mut shutdown_rx).await
    }

    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", queue = %self.queue()))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) -> StopReason {
        let queue = self.queue().to_string();
        if !self.config.enabled {
            info!("Queue worker is disabled, not starting");
            return StopReason::Disabled;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            max_reads = self.config.max_reads,
            budget_secs = self.config.budget.map(|b| b.as_secs()),
            "Queue worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted {
            queue: queue.clone(),
        });

        let deadline = self.config.budget.map(|b| Instant::now() + b);
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        let reason = loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Queue worker received shutdown signal");
                break StopReason::Shutdown;
            }
            if deadline.map_or(false, |d| Instant::now() >= d) {
                info!("Queue worker budget exhausted");
                break StopReason::BudgetExhausted;
            }

            let idle_wait = match self.process_batch(deadline).await {
                Ok(report) if report.fatal => break StopReason::Fatal,
                Ok(report) if report.leased == 0 => {
                    if self.config.stop_when_idle {
                        break StopReason::Idle;
                    }
                    poll_interval
                }
                Ok(report) => {
                    debug!(?report, "Processed batch");
                    continue;
                }
                Err(e) if e.class() == ErrorClass::Fatal => {
                    error!(error = %e, "Fatal queue error, stopping worker");
                    let _ = self.event_tx.send(WorkerEvent::WorkerFatal {
                        queue: queue.clone(),
                        message_id: None,
                        error: e.to_string(),
                    });
                    break StopReason::Fatal;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to lease messages");
                    poll_interval
                }
            };

            let wait = match deadline {
                Some(d) => idle_wait.min(d.saturating_duration_since(Instant::now())),
                None => idle_wait,
            };
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Queue worker received shutdown signal");
                    break StopReason::Shutdown;
                }
                _ = sleep(wait) => {}
            }
        };

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped {
            queue,
            reason,
        });
        info!(?reason, "Queue worker stopped");
        reason
    }

    /// Lease one batch and process it to completion.
    ///
    /// Processing of each message is cut off at the per-message timeout or
    /// at `deadline`, whichever comes first; cut-off messages are retried.
    pub async fn process_batch(&self, deadline: Option<Instant>) -> Result<BatchReport> {
        let queue = self.queue().to_string();
        let messages = self
            .stores
            .queues
            .dequeue(&queue, self.config.visibility_timeout, self.config.batch_size)
            .await?;

        let mut report = BatchReport {
            leased: messages.len(),
            ..Default::default()
        };
        if messages.is_empty() {
            return Ok(report);
        }
        debug!(subsystem = "jobs", queue = %queue, leased = messages.len(), "Leased batch");

        let mut tasks = JoinSet::new();
        for message in messages {
            if message.read_count > self.config.max_reads {
                let reason = format!(
                    "read count {} exceeded limit {}",
                    message.read_count, self.config.max_reads
                );
                if self.dead_letter(&queue, &message, &reason).await {
                    report.dead_lettered += 1;
                }
                continue;
            }

            let limit = match deadline {
                Some(d) => self
                    .config
                    .message_timeout
                    .min(d.saturating_duration_since(Instant::now())),
                None => self.config.message_timeout,
            };
            let ctx = MessageContext::new(queue.clone(), message);
            tasks.spawn(run_handler(self.handler.clone(), ctx, limit));
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((message, outcome, elapsed)) => {
                    self.apply(&queue, &message, outcome, elapsed, &mut report)
                        .await;
                }
                Err(e) => error!(subsystem = "jobs", error = ?e, "Message task failed"),
            }
        }
        Ok(report)
    }

    async fn apply(
        &self,
        queue: &str,
        message: &QueueMessage,
        outcome: HandlerOutcome,
        elapsed: Duration,
        report: &mut BatchReport,
    ) {
        let message_id = message.message_id;
        let duration_ms = elapsed.as_millis() as u64;
        match outcome {
            HandlerOutcome::Ack(result) => match self.stores.queues.ack(queue, message_id).await {
                Ok(()) => {
                    report.acked += 1;
                    info!(
                        subsystem = "jobs",
                        queue,
                        message_id,
                        read_count = message.read_count,
                        duration_ms,
                        result = ?result,
                        "Message processed"
                    );
                    let _ = self.event_tx.send(WorkerEvent::MessageProcessed {
                        queue: queue.to_string(),
                        message_id,
                        duration_ms,
                    });
                }
                Err(e) => {
                    error!(subsystem = "jobs", queue, message_id, error = %e, "Failed to ack message");
                }
            },
            HandlerOutcome::Retry(reason) => {
                report.retried += 1;
                warn!(
                    subsystem = "jobs",
                    queue,
                    message_id,
                    read_count = message.read_count,
                    duration_ms,
                    %reason,
                    "Message left for redelivery"
                );
                if let Err(e) = self
                    .stores
                    .queues
                    .nack(queue, message_id, self.config.retry_delay)
                    .await
                {
                    warn!(
                        subsystem = "jobs",
                        queue,
                        message_id,
                        error = %e,
                        "Failed to nack message, it reappears after its visibility timeout"
                    );
                }
                let _ = self.event_tx.send(WorkerEvent::MessageRetried {
                    queue: queue.to_string(),
                    message_id,
                    reason,
                });
            }
            HandlerOutcome::Reject(reason) => {
                if self.dead_letter(queue, message, &reason).await {
                    report.dead_lettered += 1;
                }
            }
            HandlerOutcome::Fatal(error) => {
                report.fatal = true;
                error!(
                    subsystem = "jobs",
                    queue,
                    message_id,
                    %error,
                    "Fatal error, message left unacked"
                );
                self.stores
                    .record_audit(AuditRecord::new(
                        LogLevel::Error,
                        format!("Fatal error on {} message {}", queue, message_id),
                        LogEvent::Error {
                            message: error.clone(),
                            error_stack: None,
                        },
                    ))
                    .await;
                let _ = self.event_tx.send(WorkerEvent::WorkerFatal {
                    queue: queue.to_string(),
                    message_id: Some(message_id),
                    error,
                });
            }
        }
    }

    /// Move a message to the dead-letter queue. Returns whether it moved.
    async fn dead_letter(&self, queue: &str, message: &QueueMessage, reason: &str) -> bool {
        let message_id = message.message_id;
        if let Err(e) = self
            .stores
            .queues
            .dead_letter(queue, message_id, reason)
            .await
        {
            error!(subsystem = "jobs", queue, message_id, error = %e, "Failed to dead-letter message");
            return false;
        }

        warn!(
            subsystem = "jobs",
            queue,
            message_id,
            read_count = message.read_count,
            reason,
            "Message dead-lettered"
        );
        self.stores
            .record_audit(AuditRecord::new(
                LogLevel::Warn,
                format!("Dead-lettered {} message {}", queue, message_id),
                LogEvent::MessageDeadLettered {
                    queue: queue.to_string(),
                    message_id,
                    read_count: message.read_count,
                    reason: reason.to_string(),
                },
            ))
            .await;
        let _ = self.event_tx.send(WorkerEvent::MessageDeadLettered {
            queue: queue.to_string(),
            message_id,
            reason: reason.to_string(),
        });
        true
    }
}

/// Run a handler in its own task so a panic or a timeout stays contained.
async fn run_handler(
    handler: Arc<dyn MessageHandler>,
    ctx: MessageContext,
    limit: Duration,
) -> (QueueMessage, HandlerOutcome, Duration) {
    let start = Instant::now();
    let message = ctx.message.clone();

    let task = tokio::spawn(async move { handler.handle(ctx).await });
    let abort = task.abort_handle();
    let outcome = match timeout(limit, task).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) if e.is_panic() => HandlerOutcome::Retry("handler panicked".to_string()),
        Ok(Err(_)) => HandlerOutcome::Retry("handler task cancelled".to_string()),
        Err(_) => {
            abort.abort();
            HandlerOutcome::Retry(format!(
                "processing exceeded {}ms",
                limit.as_millis()
            ))
        }
    };
    (message, outcome, start.elapsed())
}

/// Builder for creating a queue worker.
pub struct WorkerBuilder {
    stores: Stores,
    config: WorkerConfig,
    handler: Option<Arc<dyn MessageHandler>>,
}

impl WorkerBuilder {
    pub fn new(stores: Stores) -> Self {
        Self {
            stores,
            config: WorkerConfig::default(),
            handler: None,
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_handler<H: MessageHandler + 'static>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn with_shared_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Build the worker. A missing handler is a configuration error.
    pub fn build(self) -> Result<QueueWorker> {
        let handler = self
            .handler
            .ok_or_else(|| Error::Config("queue worker built without a handler".into()))?;
        QueueWorker::new(self.stores, handler, self.config)
    }
}
