//! Ingestion pipeline
//!
//! Inbound batches land on a bounded channel and a small worker pool drains
//! it. The transport gets an explicit ack per batch: `true` once every
//! transfer in the batch has been recorded and processed (or failed
//! terminally), `false` when a retriable store failure aborted the batch —
//! that is the transport's cue to redeliver. Malformed JSON is dropped with
//! an error log and acked, since redelivering it cannot help.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{error, info, warn};

use crossflow_matcher::{MatchStore, MatchingEngine};
use crossflow_types::TransferRecord;

/// One delivered batch plus its ack handle
pub struct InboundBatch {
    pub payload: String,
    pub ack: oneshot::Sender<bool>,
}

/// Producer side of the bounded batch channel
#[derive(Clone)]
pub struct IngestQueue {
    tx: mpsc::Sender<InboundBatch>,
}

impl IngestQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<InboundBatch>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue a batch; resolves to the ack once a worker finished it.
    /// Returns `None` when the queue is shut down.
    pub async fn deliver(&self, payload: String) -> Option<oneshot::Receiver<bool>> {
        let (ack, ack_rx) = oneshot::channel();
        self.tx.send(InboundBatch { payload, ack }).await.ok()?;
        Some(ack_rx)
    }
}

/// Shard rule applied at ingestion
#[derive(Debug, Clone, Copy)]
pub struct Shard {
    pub instance_id: u32,
    pub instance_count: u32,
}

impl Shard {
    pub fn owns(&self, chain_id: u32) -> bool {
        chain_id % self.instance_count == self.instance_id
    }
}

/// Spawn `workers` tasks draining the batch channel until shutdown.
pub fn spawn_workers<S>(
    engine: Arc<MatchingEngine<S>>,
    rx: mpsc::Receiver<InboundBatch>,
    shard: Shard,
    workers: usize,
    shutdown: watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>>
where
    S: MatchStore + 'static,
{
    let rx = Arc::new(Mutex::new(rx));
    (0..workers.max(1))
        .map(|worker| {
            let engine = engine.clone();
            let rx = rx.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let batch = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            batch = rx.recv() => batch,
                            _ = shutdown.changed() => None,
                        }
                    };
                    let Some(batch) = batch else {
                        break;
                    };
                    let ok = process_batch(&engine, shard, &batch.payload).await;
                    // the transport may have gone away; nothing to do then
                    let _ = batch.ack.send(ok);
                }
                info!(worker, "ingest worker stopped");
            })
        })
        .collect()
}

/// Process one batch. Per-transfer failures never abort the batch; only a
/// retriable infrastructure failure does.
async fn process_batch<S>(engine: &MatchingEngine<S>, shard: Shard, payload: &str) -> bool
where
    S: MatchStore,
{
    let records: Vec<TransferRecord> = match serde_json::from_str(payload) {
        Ok(records) => records,
        Err(err) => {
            error!(%err, "malformed batch dropped");
            return true;
        }
    };

    for record in &records {
        if !shard.owns(record.chain_id) {
            continue;
        }
        match engine.ingest(record).await {
            Ok(_) => {}
            Err(err) if err.is_retriable() => {
                error!(
                    chain = record.chain_id,
                    hash = %record.hash,
                    %err,
                    "store failure; batch will be redelivered"
                );
                return false;
            }
            Err(err) => {
                warn!(
                    chain = record.chain_id,
                    hash = %record.hash,
                    %err,
                    "transfer failed terminally"
                );
            }
        }
    }
    true
}
