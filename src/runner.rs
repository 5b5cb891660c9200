use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use bos_retest_engine::config::SharedConfig;
use bos_retest_engine::engine::{EngineEvent, SignalEngine};
use bos_retest_engine::execution::{spawn_dispatcher, AckBatch, Dispatch, FileHandoff};
use bos_retest_engine::feed::CandleFeed;

const STATUS_INTERVAL: f64 = 300.0;

pub struct Runner {
    engine: SignalEngine,
    feed: Box<dyn CandleFeed>,
    dispatch_tx: Option<mpsc::UnboundedSender<Dispatch>>,
    ack_rx: mpsc::UnboundedReceiver<AckBatch>,
    dispatcher: Option<JoinHandle<FileHandoff>>,
    /// Close time of the newest candle seen; the engine's notion of now.
    clock: Option<DateTime<Utc>>,
    last_status: Instant,
}

impl Runner {
    pub async fn new(config: SharedConfig, feed: Box<dyn CandleFeed>) -> Result<Self> {
        let engine = SignalEngine::new(config.clone())?;
        let handoff = FileHandoff::open(&config.handoff_dir, config.instruction_max_age()).await?;

        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let dispatcher = spawn_dispatcher(
            handoff,
            dispatch_rx,
            ack_tx,
            Duration::from_millis(config.poll_interval_ms),
        );

        Ok(Self {
            engine,
            feed,
            dispatch_tx: Some(dispatch_tx),
            ack_rx,
            dispatcher: Some(dispatcher),
            clock: None,
            last_status: Instant::now(),
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        info!("Engine is now running. Press Ctrl+C to stop.");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    self.shutdown().await;
                    return Ok(());
                }
                more = self.tick() => {
                    if !more {
                        info!("Candle feed exhausted");
                        self.shutdown().await;
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One candle through the engine, then instructions out and acks in.
    /// Returns false once the feed has nothing left.
    async fn tick(&mut self) -> bool {
        match self.feed.next_candle().await {
            Ok(Some(ev)) => {
                let close = ev.close_time();
                self.clock = Some(self.clock.map_or(close, |c| c.max(close)));
                let events = self.engine.on_candle(&ev.symbol, ev.timeframe, ev.candle);
                self.log_events(&events);
            }
            Ok(None) => return false,
            Err(e) => {
                error!("Feed error: {:#}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
                return true;
            }
        }

        let Some(now) = self.clock else {
            return true;
        };
        self.forward_instructions(now);
        self.drain_acks(now);
        let expired = self.engine.expire_pending(now);
        self.log_events(&expired);

        if self.last_status.elapsed().as_secs_f64() > STATUS_INTERVAL {
            self.engine.log_status();
            self.last_status = Instant::now();
        }
        true
    }

    fn forward_instructions(&mut self, now: DateTime<Utc>) {
        let Some(tx) = &self.dispatch_tx else {
            return;
        };
        for instruction in self.engine.take_instructions() {
            if tx.send(Dispatch { instruction, now }).is_err() {
                warn!("Dispatcher is gone; instruction not handed off");
            }
        }
    }

    fn drain_acks(&mut self, now: DateTime<Utc>) {
        while let Ok(batch) = self.ack_rx.try_recv() {
            self.engine.note_handoff(batch.dropped, batch.duplicates, batch.stale);
            for ack in batch.acks {
                let events = self.engine.on_ack(ack, now);
                self.log_events(&events);
            }
        }
    }

    fn log_events(&self, events: &[EngineEvent]) {
        for event in events {
            if let EngineEvent::PositionOpened(p) = event {
                info!(
                    "Position {} {} {} @ {} | stop {} | target {}",
                    p.request_id, p.symbol, p.direction, p.entry_price, p.stop_price, p.target_price
                );
            }
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down...");
        if let Some(now) = self.clock {
            self.forward_instructions(now);
        }
        self.dispatch_tx.take();
        if let Some(handle) = self.dispatcher.take() {
            if let Err(e) = handle.await {
                error!("Dispatcher task failed: {}", e);
            }
        }
        self.engine.log_status();
        info!("Engine stopped.");
    }
}
