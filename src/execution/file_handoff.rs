use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::execution::instruction::{ExecutionAck, ExecutionInstruction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Written,
    /// The id was already handed off (or acknowledged); nothing written.
    AlreadyPresent,
    /// Older than the maximum instruction age; nothing written.
    Stale,
}

/// What one poll turned up, plus handoffs skipped since the last batch.
#[derive(Debug, Default)]
pub struct AckBatch {
    pub acks: Vec<ExecutionAck>,
    /// Malformed ack files discarded.
    pub dropped: usize,
    /// Instructions not written because their id was already handed off.
    pub duplicates: usize,
    /// Instructions refused or reaped for age.
    pub stale: usize,
}

impl AckBatch {
    pub fn is_empty(&self) -> bool {
        self.acks.is_empty() && self.dropped == 0 && self.duplicates == 0 && self.stale == 0
    }
}

/// Where approved instructions go.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    /// `now` is the caller's clock; replayed runs pass replay time.
    async fn submit(
        &mut self,
        instruction: &ExecutionInstruction,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome>;
    async fn poll_acks(&mut self) -> Result<AckBatch>;
    async fn reap_stale(&mut self, now: DateTime<Utc>) -> Result<Vec<Uuid>>;
}

/// Instruction handoff over a shared directory.
///
/// `outbox/<id>.json` is written via a temp file and rename so the executor
/// never reads a partial document. The executor answers in `acks/<id>.json`;
/// read acks move to `acks/done/`.
pub struct FileHandoff {
    outbox: PathBuf,
    acks: PathBuf,
    done: PathBuf,
    max_age: Duration,
    /// Ids written by this process, with their creation time.
    written: HashMap<Uuid, DateTime<Utc>>,
}

impl FileHandoff {
    pub async fn open(dir: impl AsRef<Path>, max_age: Duration) -> Result<Self> {
        let dir = dir.as_ref();
        let outbox = dir.join("outbox");
        let acks = dir.join("acks");
        let done = acks.join("done");
        for d in [&outbox, &acks, &done] {
            fs::create_dir_all(d)
                .await
                .with_context(|| format!("Failed to create {}", d.display()))?;
        }
        info!("File handoff at {}", dir.display());
        Ok(Self {
            outbox,
            acks,
            done,
            max_age,
            written: HashMap::new(),
        })
    }

    fn outbox_path(&self, id: &Uuid) -> PathBuf {
        self.outbox.join(format!("{id}.json"))
    }

    async fn seen(&self, id: &Uuid) -> bool {
        if self.written.contains_key(id) {
            return true;
        }
        let ack_name = format!("{id}.json");
        let candidates = [
            self.outbox_path(id),
            self.acks.join(&ack_name),
            self.done.join(&ack_name),
        ];
        for path in candidates {
            if fs::try_exists(&path).await.unwrap_or(false) {
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl ExecutionSink for FileHandoff {
    async fn submit(
        &mut self,
        instruction: &ExecutionInstruction,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome> {
        let id = instruction.request_id;
        if instruction.is_stale(now, self.max_age) {
            warn!("Not handing off {} for {}: older than max age", id, instruction.symbol);
            return Ok(SubmitOutcome::Stale);
        }
        if self.seen(&id).await {
            debug!("Instruction {} already handed off", id);
            return Ok(SubmitOutcome::AlreadyPresent);
        }

        let body = serde_json::to_vec_pretty(instruction).context("Failed to encode instruction")?;
        let tmp = self.outbox.join(format!(".{id}.tmp"));
        let target = self.outbox_path(&id);
        fs::write(&tmp, &body)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &target)
            .await
            .with_context(|| format!("Failed to publish {}", target.display()))?;
        self.written.insert(id, instruction.created_at);

        info!(
            "Handed off {} {} {} @ {} size {}",
            id, instruction.symbol, instruction.direction, instruction.entry_price, instruction.size
        );
        Ok(SubmitOutcome::Written)
    }

    async fn poll_acks(&mut self) -> Result<AckBatch> {
        let mut batch = AckBatch::default();
        let mut entries = fs::read_dir(&self.acks)
            .await
            .with_context(|| format!("Failed to list {}", self.acks.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // Possibly still being written; retried on the next poll.
            let raw = match fs::read_to_string(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    debug!("Ack {} not readable yet: {}", path.display(), e);
                    continue;
                }
            };
            match ExecutionAck::parse(&raw) {
                Some(ack) => {
                    let dest = self.done.join(entry.file_name());
                    fs::rename(&path, &dest)
                        .await
                        .with_context(|| format!("Failed to archive {}", path.display()))?;
                    batch.acks.push(ack);
                }
                None => {
                    warn!("Dropping malformed ack {}", path.display());
                    fs::remove_file(&path).await.ok();
                    batch.dropped += 1;
                }
            }
        }

        Ok(batch)
    }

    async fn reap_stale(&mut self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        // Anything this old is refused by `submit` before the lookup.
        let max_age = self.max_age;
        self.written.retain(|_, created| now - *created <= max_age);

        let mut reaped = Vec::new();
        let mut entries = fs::read_dir(&self.outbox)
            .await
            .with_context(|| format!("Failed to list {}", self.outbox.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read_to_string(&path).await.unwrap_or_default();
            let Ok(instr) = serde_json::from_str::<ExecutionInstruction>(&raw) else {
                continue;
            };
            if instr.is_stale(now, self.max_age) {
                fs::remove_file(&path)
                    .await
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                warn!("Reaped stale instruction {} for {}", instr.request_id, instr.symbol);
                reaped.push(instr.request_id);
            }
        }

        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;

    fn instr(created_at: DateTime<Utc>) -> ExecutionInstruction {
        ExecutionInstruction {
            request_id: Uuid::new_v4(),
            symbol: "USDJPY".into(),
            direction: Direction::Long,
            entry_price: 147.04,
            stop_price: 146.96,
            target_price: 147.12,
            size: 1.0,
            created_at,
        }
    }

    #[tokio::test]
    async fn submit_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = FileHandoff::open(dir.path(), Duration::seconds(180)).await.unwrap();
        let i = instr(Utc::now());

        assert_eq!(h.submit(&i, Utc::now()).await.unwrap(), SubmitOutcome::Written);
        assert_eq!(h.submit(&i, Utc::now()).await.unwrap(), SubmitOutcome::AlreadyPresent);

        let path = dir.path().join("outbox").join(format!("{}.json", i.request_id));
        let raw = std::fs::read_to_string(path).unwrap();
        let back: ExecutionInstruction = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, i);
    }

    #[tokio::test]
    async fn consumed_ids_are_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let i = instr(Utc::now());
        {
            let mut h = FileHandoff::open(dir.path(), Duration::seconds(180)).await.unwrap();
            h.submit(&i, Utc::now()).await.unwrap();
        }
        // Executor consumed the instruction and acknowledged it.
        let published = dir.path().join("outbox").join(format!("{}.json", i.request_id));
        std::fs::remove_file(published).unwrap();
        std::fs::write(
            dir.path().join("acks").join(format!("{}.json", i.request_id)),
            format!(r#"{{"request_id":"{}","status":"filled","fill_price":147.04}}"#, i.request_id),
        )
        .unwrap();

        let mut fresh = FileHandoff::open(dir.path(), Duration::seconds(180)).await.unwrap();
        assert_eq!(fresh.submit(&i, Utc::now()).await.unwrap(), SubmitOutcome::AlreadyPresent);
    }

    #[tokio::test]
    async fn stale_instructions_are_refused_and_reaped() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = FileHandoff::open(dir.path(), Duration::seconds(180)).await.unwrap();
        let old = instr(Utc::now() - Duration::seconds(600));
        assert_eq!(h.submit(&old, Utc::now()).await.unwrap(), SubmitOutcome::Stale);

        let live = instr(Utc::now());
        h.submit(&live, Utc::now()).await.unwrap();
        let reaped = h.reap_stale(Utc::now() + Duration::seconds(181)).await.unwrap();
        assert_eq!(reaped, vec![live.request_id]);
        assert!(h.written.is_empty());
        assert!(h.reap_stale(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn written_ids_are_kept_until_they_age_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = FileHandoff::open(dir.path(), Duration::seconds(180)).await.unwrap();
        let i = instr(Utc::now());
        h.submit(&i, i.created_at).await.unwrap();

        h.reap_stale(i.created_at + Duration::seconds(60)).await.unwrap();
        assert!(h.written.contains_key(&i.request_id));
        h.reap_stale(i.created_at + Duration::seconds(181)).await.unwrap();
        assert!(h.written.is_empty());
        assert_eq!(
            h.submit(&i, i.created_at + Duration::seconds(181)).await.unwrap(),
            SubmitOutcome::Stale
        );
    }

    #[tokio::test]
    async fn acks_are_read_once_and_garbage_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = FileHandoff::open(dir.path(), Duration::seconds(180)).await.unwrap();
        let id = Uuid::new_v4();
        let acks = dir.path().join("acks");
        std::fs::write(
            acks.join(format!("{id}.json")),
            format!(r#"{{"request_id":"{id}","status":"rejected","reason":"no liquidity"}}"#),
        )
        .unwrap();
        std::fs::write(acks.join("junk.json"), "{").unwrap();

        let batch = h.poll_acks().await.unwrap();
        assert_eq!(batch.acks.len(), 1);
        assert_eq!(batch.acks[0].request_id, id);
        assert_eq!(batch.dropped, 1);

        let again = h.poll_acks().await.unwrap();
        assert!(again.acks.is_empty());
        assert_eq!(again.dropped, 0);
    }

    #[tokio::test]
    async fn unreadable_acks_are_left_for_the_next_poll() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = FileHandoff::open(dir.path(), Duration::seconds(180)).await.unwrap();
        // A directory with an ack name: listed, but read_to_string fails.
        let blocked = dir.path().join("acks").join(format!("{}.json", Uuid::new_v4()));
        std::fs::create_dir(&blocked).unwrap();

        let batch = h.poll_acks().await.unwrap();
        assert!(batch.acks.is_empty());
        assert_eq!(batch.dropped, 0);
        assert!(blocked.exists());
    }
}
