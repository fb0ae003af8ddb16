//! Tokio driver for aggregators.
//!
//! Each aggregator runs on its own task that owns it outright: ingestion and
//! flushes are interleaved on that single task, so a flush never observes an
//! event from after its boundary and no event reaches a window that was
//! already flushed. Independent metricsets share nothing but the (immutable)
//! events handed out by [`Fanout`].

use crate::core::config::PipelineConfig;
use crate::core::{ClockMode, Config, Event, Result, TxMetricsError};
use crate::metrics::aggregator::{Aggregate, FlushBatch};
use crate::metricsets;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Driver settings for one aggregator task
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// How often the wall clock is checked
    pub tick_period: Duration,
    /// Which clock closes windows
    pub clock: ClockMode,
    /// Capacity of the event channel
    pub channel_capacity: usize,
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            tick_period: config.tick_period,
            clock: config.clock,
            channel_capacity: config.channel_capacity,
        }
    }
}

/// Totals reported by a finished pipeline task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    /// Events received
    pub events: u64,
    /// Non-empty batches sent downstream
    pub batches: u64,
    /// Documents sent downstream
    pub documents: u64,
}

/// Runs `aggregator` until the event channel closes, then flushes what is left.
pub fn spawn<A>(
    mut aggregator: A,
    mut events: mpsc::Receiver<Arc<Event>>,
    batches: mpsc::Sender<FlushBatch>,
    settings: PipelineSettings,
) -> JoinHandle<Result<PipelineSummary>>
where
    A: Aggregate + 'static,
{
    tokio::spawn(async move {
        let name = aggregator.name();
        let result = run(&mut aggregator, &mut events, &batches, settings).await;
        if let Err(e) = &result {
            tracing::error!(
                metricset = name,
                category = e.category(),
                error = %e,
                "aggregation pipeline failed"
            );
        }
        result
    })
}

async fn run<A: Aggregate>(
    aggregator: &mut A,
    events: &mut mpsc::Receiver<Arc<Event>>,
    batches: &mpsc::Sender<FlushBatch>,
    settings: PipelineSettings,
) -> Result<PipelineSummary> {
    let name = aggregator.name();
    let mut summary = PipelineSummary::default();
    let mut ticker = tokio::time::interval(settings.tick_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    if settings.clock == ClockMode::Wall {
        aggregator.tick(Utc::now());
    }
    tracing::info!(metricset = name, clock = ?settings.clock, "aggregation pipeline started");

    loop {
        tokio::select! {
            received = events.recv() => {
                let Some(event) = received else { break };
                summary.events += 1;
                if settings.clock == ClockMode::Event {
                    if let Some(at) = event.timestamp() {
                        if let Some(batch) = aggregator.tick(at) {
                            emit(batches, batch, &mut summary).await?;
                        }
                    }
                }
                aggregator.ingest(&event);
            },
            _ = ticker.tick(), if settings.clock == ClockMode::Wall => {
                if let Some(batch) = aggregator.tick(Utc::now()) {
                    emit(batches, batch, &mut summary).await?;
                }
            },
        }
    }

    emit(batches, aggregator.flush(), &mut summary).await?;
    tracing::info!(
        metricset = name,
        events = summary.events,
        documents = summary.documents,
        "aggregation pipeline stopped"
    );
    Ok(summary)
}

async fn emit(
    batches: &mpsc::Sender<FlushBatch>,
    batch: FlushBatch,
    summary: &mut PipelineSummary,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    if !batch.failures.is_empty() || batch.tainted > 0 {
        tracing::warn!(
            metricset = batch.metricset,
            failed = batch.failures.len(),
            tainted = batch.tainted,
            "flush emitted a partial batch"
        );
    }
    summary.batches += 1;
    summary.documents += batch.documents.len() as u64;
    batches
        .send(batch)
        .await
        .map_err(|_| TxMetricsError::ChannelClosed("flush batches"))
}

/// Hands every event to each pipeline
#[derive(Debug, Clone)]
pub struct Fanout {
    senders: Vec<mpsc::Sender<Arc<Event>>>,
}

impl Fanout {
    /// Sends `event` to every pipeline, waiting for channel capacity
    pub async fn send(&self, event: Event) -> Result<()> {
        let event = Arc::new(event);
        for sender in &self.senders {
            sender
                .send(Arc::clone(&event))
                .await
                .map_err(|_| TxMetricsError::ChannelClosed("events"))?;
        }
        Ok(())
    }

    /// Number of pipelines fed
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// Returns true if no pipelines are fed
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

/// One running pipeline per enabled metricset
pub struct MetricsPipelines {
    /// Event input shared by all pipelines
    pub events: Fanout,
    /// Flushed batches of every pipeline
    pub batches: mpsc::Receiver<FlushBatch>,
    handles: Vec<JoinHandle<Result<PipelineSummary>>>,
}

impl MetricsPipelines {
    /// Spawns a pipeline for every metricset enabled in `config`
    pub fn spawn(config: &Config) -> Result<Self> {
        let settings = PipelineSettings::from(&config.pipeline);
        let aggregators = metricsets::build_all(config)?;
        let (batch_tx, batch_rx) = mpsc::channel(aggregators.len().max(1) * 4);

        let mut senders = Vec::with_capacity(aggregators.len());
        let mut handles = Vec::with_capacity(aggregators.len());
        for aggregator in aggregators {
            let (event_tx, event_rx) = mpsc::channel(settings.channel_capacity);
            senders.push(event_tx);
            handles.push(spawn(aggregator, event_rx, batch_tx.clone(), settings));
        }

        Ok(Self {
            events: Fanout { senders },
            batches: batch_rx,
            handles,
        })
    }

    /// Closes the inputs, collects the remaining batches and waits for every task
    pub async fn shutdown(self) -> Result<(Vec<FlushBatch>, Vec<PipelineSummary>)> {
        let MetricsPipelines {
            events,
            mut batches,
            handles,
        } = self;
        drop(events);

        let mut remaining = Vec::new();
        while let Some(batch) = batches.recv().await {
            remaining.push(batch);
        }

        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            summaries.push(handle.await??);
        }
        Ok((remaining, summaries))
    }
}
