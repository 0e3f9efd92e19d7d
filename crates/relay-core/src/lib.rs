//! relay-core
//!
//! Transactional outbox relay: moves records written to an outbox table into
//! a NATS JetStream stream, at least once.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（record, subject, envelope, outcome, errors）
//! - **ports**: 抽象化レイヤー（RecordStore, DeliverySink, Clock）
//! - **impls**: 実装（PostgreSQL / JetStream と、テスト用の in-memory 版）
//! - **app**: relay ロジック（RelayWorker, WorkerPool, requeue）
//! - **config**: 設定
//! - **observability**: ログ初期化とステータス集計

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{PoolExit, RelayWorker, WorkerPool, requeue_failed};
pub use config::{RelayConfig, ServiceEnvironment};
pub use domain::{ClaimPolicy, OutboxRecord, RecordId, RecordStatus, RelayError};
pub use observability::{StatusCounts, init_tracing};
