//! Return-reminder job
//!
//! A [`ReminderScheduler`] polls an [`OverdueQuery`] on a fixed interval and
//! posts every non-empty result as a [`DispatchBatch`] onto a bounded channel.
//! A single [`DispatchWorker`] drains that channel and hands each recipient to
//! a [`Notifier`]. [`ReminderRuntime`] wires both together for the process.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ReminderConfig,
    error::{AppError, AppResult},
    models::{
        enums::{BackpressurePolicy, DeliveryMode, SchedulerState},
        reminder::{BatchReport, DispatchBatch},
    },
};

/// Source of the addresses that currently have an overdue loan
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OverdueQuery: Send + Sync {
    async fn overdue_recipients(&self, now: DateTime<Utc>) -> AppResult<Vec<String>>;
}

/// Sends the return reminder
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &str) -> AppResult<()>;

    /// Deliver one reminder addressed to several recipients.
    ///
    /// Returns the addresses that could not be reached; fails only when none
    /// of them could. Falls back to one `send` per address.
    async fn send_many(&self, recipients: &[String]) -> AppResult<Vec<String>> {
        let mut rejected = Vec::new();
        let mut errors = Vec::new();
        for recipient in recipients {
            if let Err(e) = self.send(recipient).await {
                errors.push(format!("{}: {}", recipient, e));
                rejected.push(recipient.clone());
            }
        }

        if !recipients.is_empty() && rejected.len() == recipients.len() {
            return Err(AppError::Email(format!(
                "No recipient reached: {}",
                errors.join("; ")
            )));
        }
        Ok(rejected)
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// One poll step, shared by the timer loop and `ReminderScheduler::poll_once`
#[derive(Clone)]
struct OverduePoller {
    query: Arc<dyn OverdueQuery>,
    backpressure: BackpressurePolicy,
}

impl OverduePoller {
    async fn poll(&self, now: DateTime<Utc>) -> AppResult<Option<DispatchBatch>> {
        let recipients = self.query.overdue_recipients(now).await?;
        Ok(DispatchBatch::from_recipients(recipients, now))
    }

    async fn run_cycle(&self, out: &mpsc::Sender<DispatchBatch>, cancel: &CancellationToken) {
        let now = Utc::now();

        let batch = match self.poll(now).await {
            Ok(Some(batch)) => batch,
            Ok(None) => {
                tracing::debug!(polled_at = %now, "No overdue loans");
                return;
            }
            Err(e) => {
                tracing::error!(
                    polled_at = %now,
                    kind = e.kind(),
                    error = %e,
                    "Can not check return dates for issued loans"
                );
                return;
            }
        };

        self.post(batch, out, cancel).await;
    }

    async fn post(
        &self,
        batch: DispatchBatch,
        out: &mpsc::Sender<DispatchBatch>,
        cancel: &CancellationToken,
    ) {
        let batch_id = batch.id;
        let recipients = batch.len();

        match self.backpressure {
            BackpressurePolicy::Wait => {
                tokio::select! {
                    biased;
                    sent = out.send(batch) => match sent {
                        Ok(()) => tracing::info!(%batch_id, recipients, "Queued reminder batch"),
                        Err(_) => tracing::error!(
                            %batch_id,
                            recipients,
                            "Dispatch channel closed, reminder batch dropped"
                        ),
                    },
                    _ = cancel.cancelled() => tracing::warn!(
                        %batch_id,
                        recipients,
                        "Stop requested while waiting for the dispatch worker, batch abandoned"
                    ),
                }
            }
            BackpressurePolicy::Skip => match out.try_send(batch) {
                Ok(()) => tracing::info!(%batch_id, recipients, "Queued reminder batch"),
                Err(TrySendError::Full(_)) => tracing::warn!(
                    %batch_id,
                    recipients,
                    "Dispatch worker busy, reminder batch skipped"
                ),
                Err(TrySendError::Closed(_)) => tracing::error!(
                    %batch_id,
                    recipients,
                    "Dispatch channel closed, reminder batch dropped"
                ),
            },
        }
    }
}

/// Timer-driven overdue poll.
///
/// Starts `Stopped`; `start` moves it to `Running` and `stop` back to
/// `Stopped`. A stopped scheduler cannot be started again.
pub struct ReminderScheduler {
    poller: OverduePoller,
    interval: Duration,
    run_on_start: bool,
    state: SchedulerState,
    stopped_once: bool,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ReminderScheduler {
    pub fn new(config: &ReminderConfig, query: Arc<dyn OverdueQuery>) -> Self {
        Self {
            poller: OverduePoller {
                query,
                backpressure: config.backpressure,
            },
            interval: config.interval(),
            run_on_start: config.run_on_start,
            state: SchedulerState::Stopped,
            stopped_once: false,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Query once at `now` without touching the channel
    pub async fn poll_once(&self, now: DateTime<Utc>) -> AppResult<Option<DispatchBatch>> {
        self.poller.poll(now).await
    }

    /// Spawn the periodic loop posting batches to `out`
    pub fn start(&mut self, out: mpsc::Sender<DispatchBatch>) -> AppResult<()> {
        if self.state == SchedulerState::Running {
            return Err(AppError::Lifecycle("Reminder scheduler is already running".to_string()));
        }
        if self.stopped_once {
            return Err(AppError::Lifecycle(
                "Reminder scheduler was stopped and cannot be restarted".to_string(),
            ));
        }
        if self.interval.is_zero() {
            return Err(AppError::Validation(
                "Reminder interval must be greater than zero".to_string(),
            ));
        }

        let poller = self.poller.clone();
        let cancel = self.cancel.clone();
        let period = self.interval;
        let first_tick = if self.run_on_start {
            Instant::now()
        } else {
            Instant::now() + period
        };

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                // A tick that has started runs to completion
                poller.run_cycle(&out, &cancel).await;
            }

            tracing::info!("Reminder scheduler stopped");
        }));

        self.state = SchedulerState::Running;
        tracing::info!(
            interval_secs = period.as_secs(),
            run_on_start = self.run_on_start,
            "Reminder scheduler started"
        );
        Ok(())
    }

    /// Halt future ticks and wait for the tick in flight, if any
    pub async fn stop(&mut self) {
        if self.state != SchedulerState::Running {
            return;
        }

        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Reminder scheduler task failed");
            }
        }

        self.state = SchedulerState::Stopped;
        self.stopped_once = true;
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Drains dispatch batches and calls the notifier for every recipient
pub struct DispatchWorker {
    notifier: Arc<dyn Notifier>,
    delivery: DeliveryMode,
    send_timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
}

impl DispatchWorker {
    pub fn new(notifier: Arc<dyn Notifier>, config: &ReminderConfig) -> Self {
        Self {
            notifier,
            delivery: config.delivery,
            send_timeout: config.send_timeout(),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
        }
    }

    /// Consume batches until every sender is gone and the channel is empty
    pub async fn run(self, mut batches: mpsc::Receiver<DispatchBatch>) {
        tracing::info!(delivery = %self.delivery, "Dispatch worker started");

        while let Some(batch) = batches.recv().await {
            self.process_batch(&batch).await;
        }

        tracing::info!("Dispatch worker stopped");
    }

    pub async fn process_batch(&self, batch: &DispatchBatch) -> BatchReport {
        let mut report = BatchReport::default();

        match self.delivery {
            DeliveryMode::PerRecipient => {
                for recipient in &batch.recipients {
                    let sent = self
                        .with_retries(recipient, || self.notifier.send(recipient))
                        .await;
                    match sent {
                        Ok(()) => report.delivered += 1,
                        Err(e) => {
                            report.failed += 1;
                            tracing::warn!(
                                batch_id = %batch.id,
                                recipient = %recipient,
                                error = %e,
                                "Failed to send return reminder"
                            );
                        }
                    }
                }
            }
            DeliveryMode::Combined => {
                let label = format!("{} recipients", batch.len());
                let sent = self
                    .with_retries(&label, || self.notifier.send_many(&batch.recipients))
                    .await;
                match sent {
                    Ok(rejected) => {
                        report.failed = rejected.len();
                        report.delivered = batch.len().saturating_sub(rejected.len());
                        for recipient in &rejected {
                            tracing::warn!(
                                batch_id = %batch.id,
                                recipient = %recipient,
                                "Recipient left out of combined return reminder"
                            );
                        }
                    }
                    Err(e) => {
                        report.failed = batch.len();
                        tracing::warn!(
                            batch_id = %batch.id,
                            recipients = batch.len(),
                            error = %e,
                            "Failed to send combined return reminder"
                        );
                    }
                }
            }
        }

        tracing::info!(
            batch_id = %batch.id,
            delivered = report.delivered,
            failed = report.failed,
            "Reminder batch processed"
        );
        report
    }

    /// Run `call` under the send timeout, retrying up to `max_retries` times
    async fn with_retries<T, F, Fut>(&self, label: &str, call: F) -> AppResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 0;
        loop {
            let result = match time::timeout(self.send_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(AppError::Timeout(format!(
                    "Notifier did not answer within {}s for {}",
                    self.send_timeout.as_secs(),
                    label
                ))),
            };

            match result {
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::debug!(recipient = label, attempt, error = %e, "Retrying reminder");
                    time::sleep(self.retry_backoff).await;
                }
                result => return result,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Scheduler and worker running for the lifetime of the process
pub struct ReminderRuntime {
    scheduler: ReminderScheduler,
    worker: JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl ReminderRuntime {
    pub fn start(
        config: &ReminderConfig,
        query: Arc<dyn OverdueQuery>,
        notifier: Arc<dyn Notifier>,
    ) -> AppResult<Self> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let worker = tokio::spawn(DispatchWorker::new(notifier, config).run(rx));

        let mut scheduler = ReminderScheduler::new(config, query);
        if let Err(e) = scheduler.start(tx) {
            worker.abort();
            return Err(e);
        }

        Ok(Self {
            scheduler,
            worker,
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Stop polling, then let the worker finish the batches already queued
    pub async fn shutdown(mut self) {
        self.scheduler.stop().await;

        match time::timeout(self.shutdown_timeout, &mut self.worker).await {
            Ok(Ok(())) => tracing::info!("Reminder job shut down"),
            Ok(Err(e)) => tracing::error!(error = %e, "Dispatch worker task failed"),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "Dispatch worker still busy at shutdown, aborting"
                );
                self.worker.abort();
            }
        }
    }
}
