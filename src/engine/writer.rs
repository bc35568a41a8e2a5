use std::io;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};

use crate::wal::Wal;

use super::EngineError;

enum WalCommand<E> {
    Append {
        record: E,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        records: Vec<E>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Handle to the background task that owns a WAL file. Every fsync happens
/// on that task, never on the caller's.
pub struct WalWriter<E> {
    tx: mpsc::Sender<WalCommand<E>>,
}

impl<E> WalWriter<E>
where
    E: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn spawn(wal: Wal<E>) -> Self {
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, rx));
        Self { tx }
    }

    /// Durably append one record. Resolves once its batch is fsynced.
    pub async fn append(&self, record: E) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(WalCommand::Append {
            record,
            response: tx,
        })
        .await?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Replace the whole log with `records`.
    pub async fn compact(&self, records: Vec<E>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(WalCommand::Compact {
            records,
            response: tx,
        })
        .await?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    async fn send(&self, cmd: WalCommand<E>) -> Result<(), EngineError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))
    }
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop<E>(mut wal: Wal<E>, mut rx: mpsc::Receiver<WalCommand<E>>)
where
    E: Serialize + DeserializeOwned,
{
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { record, response } => {
                let mut batch = vec![(record, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { record, response }) => {
                            batch.push((record, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

type Pending<E> = (E, oneshot::Sender<io::Result<()>>);

fn flush_batch<E>(wal: &mut Wal<E>, batch: &[Pending<E>]) -> io::Result<()>
where
    E: Serialize + DeserializeOwned,
{
    let mut append_err: Option<io::Error> = None;
    for (record, _) in batch {
        if let Err(e) = wal.append_buffered(record) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch<E>(batch: Vec<Pending<E>>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append<E>(wal: &mut Wal<E>, cmd: WalCommand<E>)
where
    E: Serialize + DeserializeOwned,
{
    match cmd {
        WalCommand::Compact { records, response } => {
            let result = Wal::write_compact_file(wal.path(), &records)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}
