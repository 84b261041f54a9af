//! Audit pipeline
//!
//! Producers push events into a bounded queue. One batcher task collects
//! them and flushes a batch when it reaches the size threshold or when the
//! flush interval elapses. Flushed batches are persisted by a fixed pool of
//! writer tasks.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use super::audit::{AuditError, AuditEvent, AuditSink};
use crate::engine::config::AuditConfig;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub queue_capacity: usize,
    pub workers: usize,
    pub batch_size: usize,
    /// `None` flushes on size and shutdown only.
    pub flush_interval: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        (&AuditConfig::default()).into()
    }
}

impl From<&AuditConfig> for PipelineOptions {
    fn from(config: &AuditConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity.max(1),
            workers: config.workers.max(1),
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    flushed_batches: AtomicU64,
    written_events: AtomicU64,
    failed_batches: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub flushed_batches: u64,
    pub written_events: u64,
    pub failed_batches: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            flushed_batches: self.flushed_batches.load(Ordering::Relaxed),
            written_events: self.written_events.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
        }
    }
}

/// Sending half handed to request handlers.
#[derive(Clone)]
pub struct AuditProducer {
    tx: mpsc::Sender<AuditEvent>,
}

impl AuditProducer {
    /// Waits while the queue is full.
    pub async fn send(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.tx.send(event).await.map_err(|_| AuditError::Closed)
    }
}

pub struct AuditPipeline {
    producer: AuditProducer,
    stats: Arc<PipelineStats>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    batcher: Mutex<Option<JoinHandle<()>>>,
}

impl AuditPipeline {
    /// Spawns the batcher and writer tasks. Must run inside a tokio runtime.
    pub fn start(sink: Arc<dyn AuditSink>, options: PipelineOptions) -> Self {
        let (tx, rx) = mpsc::channel(options.queue_capacity);
        let (batch_tx, batch_rx) = mpsc::channel::<Vec<AuditEvent>>(options.workers);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let stats = Arc::new(PipelineStats::default());

        let batch_rx = Arc::new(tokio::sync::Mutex::new(batch_rx));
        let writers = (0..options.workers)
            .map(|id| tokio::spawn(run_writer(id, batch_rx.clone(), sink.clone(), stats.clone())))
            .collect();

        let batcher = tokio::spawn(run_batcher(
            rx,
            batch_tx,
            writers,
            options.clone(),
            stats.clone(),
            shutdown_rx,
        ));

        info!(
            capacity = options.queue_capacity,
            workers = options.workers,
            batch_size = options.batch_size,
            "Audit pipeline started"
        );

        Self {
            producer: AuditProducer { tx },
            stats,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            batcher: Mutex::new(Some(batcher)),
        }
    }

    pub fn producer(&self) -> AuditProducer {
        self.producer.clone()
    }

    pub async fn send(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.producer.send(event).await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Closes the queue, persists every buffered event and waits for the
    /// writers. Later calls return immediately.
    pub async fn shutdown(&self) {
        let signal = self.shutdown_tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(signal) = signal {
            let _ = signal.send(());
        }
        let batcher = self.batcher.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(batcher) = batcher {
            if let Err(e) = batcher.await {
                error!(error = %e, "Audit batcher task failed");
            }
            info!(stats = ?self.stats.snapshot(), "Audit pipeline stopped");
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn flush(batch_tx: &mpsc::Sender<Vec<AuditEvent>>, batch: &mut Vec<AuditEvent>, stats: &PipelineStats) {
    if batch.is_empty() {
        return;
    }
    let full = std::mem::take(batch);
    let size = full.len();
    if batch_tx.send(full).await.is_err() {
        error!(size, "Audit writers are gone, dropping batch");
        stats.failed_batches.fetch_add(1, Ordering::Relaxed);
        return;
    }
    stats.flushed_batches.fetch_add(1, Ordering::Relaxed);
    debug!(size, "Audit batch flushed");
}

async fn run_batcher(
    mut rx: mpsc::Receiver<AuditEvent>,
    batch_tx: mpsc::Sender<Vec<AuditEvent>>,
    writers: Vec<JoinHandle<()>>,
    options: PipelineOptions,
    stats: Arc<PipelineStats>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut batch = Vec::with_capacity(options.batch_size);
    let mut ticker = options.flush_interval.map(|every| {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(event) => {
                    batch.push(event);
                    if batch.len() >= options.batch_size {
                        flush(&batch_tx, &mut batch, &stats).await;
                    }
                }
                None => break,
            },
            _ = tick(&mut ticker) => flush(&batch_tx, &mut batch, &stats).await,
            _ = &mut shutdown => {
                rx.close();
                while let Some(event) = rx.recv().await {
                    batch.push(event);
                    if batch.len() >= options.batch_size {
                        flush(&batch_tx, &mut batch, &stats).await;
                    }
                }
                break;
            }
        }
    }

    flush(&batch_tx, &mut batch, &stats).await;
    drop(batch_tx);
    for writer in writers {
        if let Err(e) = writer.await {
            error!(error = %e, "Audit writer task failed");
        }
    }
}

async fn run_writer(
    id: usize,
    batches: Arc<tokio::sync::Mutex<mpsc::Receiver<Vec<AuditEvent>>>>,
    sink: Arc<dyn AuditSink>,
    stats: Arc<PipelineStats>,
) {
    loop {
        let batch = batches.lock().await.recv().await;
        let Some(batch) = batch else { break };
        let size = batch.len() as u64;
        let sink = sink.clone();
        match tokio::task::spawn_blocking(move || sink.write_batch(&batch)).await {
            Ok(Ok(())) => {
                stats.written_events.fetch_add(size, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                stats.failed_batches.fetch_add(1, Ordering::Relaxed);
                error!(writer = id, size, error = %e, "Failed to write audit batch");
            }
            Err(e) => {
                stats.failed_batches.fetch_add(1, Ordering::Relaxed);
                error!(writer = id, size, error = %e, "Audit write task panicked");
            }
        }
    }
    debug!(writer = id, "Audit writer stopped");
}
