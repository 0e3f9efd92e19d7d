//! WorkerPool - relay ループを N 本回す
//!
//! - 各ループは独立（コーディネータなし）。排他は DB の行ロックに任せる
//! - イテレーションの失敗はログに残してループを続ける
//! - shutdown はイテレーションの境界でだけ見る。開いたトランザクションは必ず commit / rollback まで進む
//! - sleep 中の shutdown は即座に拾う

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, trace};

use super::relay_worker::RelayWorker;
use crate::ports::{DeliverySink, RecordStore};

/// How the pool's loops ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolExit {
    /// Loops that returned normally.
    pub stopped: usize,
    /// Worker ids whose loop panicked.
    pub panicked: Vec<usize>,
}

impl PoolExit {
    pub fn is_clean(&self) -> bool {
        self.panicked.is_empty()
    }
}

/// Worker pool handle.
/// - `request_shutdown()` で全ループに停止を伝える
/// - `shutdown_and_join()` で全ループの終了を待ち、panic したループを報告する
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<(usize, JoinHandle<()>)>,
}

impl WorkerPool {
    /// Spawn `worker_count` loops sharing one worker.
    pub fn spawn<S, D>(
        worker: Arc<RelayWorker<S, D>>,
        worker_count: usize,
        polling_interval: Duration,
    ) -> Self
    where
        S: RecordStore + ?Sized + 'static,
        D: DeliverySink + ?Sized + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let worker = Arc::clone(&worker);
            let rx = shutdown_rx.clone();
            let span = info_span!("relay_worker", worker_id);

            let join = tokio::spawn(
                relay_loop(worker, polling_interval, rx).instrument(span),
            );
            joins.push((worker_id, join));
        }

        info!(worker_count, ?polling_interval, "worker pool started");
        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Ask every loop to stop after its current iteration.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all loops.
    pub async fn shutdown_and_join(self) -> PoolExit {
        self.request_shutdown();

        let mut exit = PoolExit::default();
        for (worker_id, join) in self.joins {
            match join.await {
                Ok(()) => exit.stopped += 1,
                Err(err) => {
                    error!(worker_id, panicked = err.is_panic(), error = %err, "relay worker died");
                    exit.panicked.push(worker_id);
                }
            }
        }

        info!(stopped = exit.stopped, panicked = exit.panicked.len(), "worker pool stopped");
        exit
    }
}

async fn relay_loop<S, D>(
    worker: Arc<RelayWorker<S, D>>,
    polling_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    S: RecordStore + ?Sized + 'static,
    D: DeliverySink + ?Sized + 'static,
{
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match worker.run_once().await {
            Ok(report) if report.is_idle() => trace!("nothing to relay"),
            Ok(report) => debug!(
                claimed = report.claimed,
                published = report.outcome.published.len(),
                failed = report.outcome.failed.len(),
                "iteration committed"
            ),
            Err(err) => error!(
                error.kind = err.kind().as_str(),
                error = %err,
                "relay iteration failed"
            ),
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                // sender が drop されたら停止扱い
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(polling_interval) => {}
        }
    }
}
