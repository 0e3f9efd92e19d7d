//! App - アプリケーション層
//!
//! ports を組み合わせて relay を動かす。
//!
//! # 主要コンポーネント
//! - **RelayWorker**: 1 イテレーション（claim → deliver → reconcile → commit）
//! - **WorkerPool**: RelayWorker のループを N 本回し、shutdown で join する
//! - **requeue_failed**: 運用コマンド。failed を pending に戻す

pub mod relay_worker;
pub mod requeue;
pub mod worker_pool;

pub use self::relay_worker::RelayWorker;
pub use self::requeue::requeue_failed;
pub use self::worker_pool::{PoolExit, WorkerPool};
