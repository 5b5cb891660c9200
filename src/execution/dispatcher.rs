use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::execution::file_handoff::{AckBatch, ExecutionSink, SubmitOutcome};
use crate::execution::instruction::ExecutionInstruction;

/// An instruction plus the clock it was approved under.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub instruction: ExecutionInstruction,
    pub now: DateTime<Utc>,
}

/// Run the sink on its own task. Instructions arrive on `rx`; acks are polled
/// every `poll_every` and forwarded on `acks`. The task ends when `rx` closes
/// and hands the sink back.
pub fn spawn_dispatcher<S>(
    mut sink: S,
    mut rx: mpsc::UnboundedReceiver<Dispatch>,
    acks: mpsc::UnboundedSender<AckBatch>,
    poll_every: Duration,
) -> JoinHandle<S>
where
    S: ExecutionSink + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_every);
        let mut clock: Option<DateTime<Utc>> = None;
        let (mut duplicates, mut stale) = (0, 0);
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(Dispatch { instruction, now }) = msg else {
                        info!("Dispatcher stopping");
                        break;
                    };
                    clock = Some(clock.map_or(now, |c| c.max(now)));
                    match sink.submit(&instruction, now).await {
                        Ok(SubmitOutcome::Written) => {}
                        Ok(SubmitOutcome::AlreadyPresent) => {
                            debug!("Instruction {} already handed off", instruction.request_id);
                            duplicates += 1;
                        }
                        Ok(SubmitOutcome::Stale) => stale += 1,
                        Err(e) => error!("Handoff of {} failed: {:#}", instruction.request_id, e),
                    }
                }
                _ = ticker.tick() => {
                    if let Some(now) = clock {
                        match sink.reap_stale(now).await {
                            Ok(reaped) => stale += reaped.len(),
                            Err(e) => error!("Outbox reap failed: {:#}", e),
                        }
                    }
                    let mut batch = match sink.poll_acks().await {
                        Ok(batch) => batch,
                        Err(e) => {
                            error!("Ack poll failed: {:#}", e);
                            AckBatch::default()
                        }
                    };
                    batch.duplicates = std::mem::take(&mut duplicates);
                    batch.stale = std::mem::take(&mut stale);
                    if !batch.is_empty() && acks.send(batch).is_err() {
                        break;
                    }
                }
            }
        }
        sink
    })
}
