use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{info, warn};

use crate::feed::{CandleEvent, CandleFeed};

/// Replays closed candles from a JSON-lines file, one `CandleEvent` per line,
/// in close-time order. Lines that do not parse are skipped with a warning.
pub struct ReplayFeed {
    events: Vec<CandleEvent>,
    cursor: usize,
}

impl ReplayFeed {
    pub fn new(mut events: Vec<CandleEvent>) -> Self {
        // Stable: candles closing together keep file order.
        events.sort_by_key(CandleEvent::close_time);
        Self { events, cursor: 0 }
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read candle file {}", path.display()))?;
        let feed = Self::parse(&raw);
        info!("Loaded {} candles from {}", feed.len(), path.display());
        Ok(feed)
    }

    pub fn parse(raw: &str) -> Self {
        let mut events = Vec::new();
        for (n, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<CandleEvent>(line) {
                Ok(ev) => events.push(ev),
                Err(e) => warn!("Skipping line {}: {}", n + 1, e),
            }
        }
        Self::new(events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.events.len() - self.cursor
    }

    /// Skip ahead to the first candle that closes after `t`.
    pub fn seek_past(&mut self, t: DateTime<Utc>) {
        self.cursor = self.events.partition_point(|e| e.close_time() <= t);
    }

    pub fn earliest_time(&self) -> Option<DateTime<Utc>> {
        self.events.first().map(CandleEvent::close_time)
    }

    pub fn latest_time(&self) -> Option<DateTime<Utc>> {
        self.events.last().map(CandleEvent::close_time)
    }
}

#[async_trait]
impl CandleFeed for ReplayFeed {
    async fn next_candle(&mut self) -> Result<Option<CandleEvent>> {
        let ev = self.events.get(self.cursor).cloned();
        if ev.is_some() {
            self.cursor += 1;
        }
        Ok(ev)
    }
}
