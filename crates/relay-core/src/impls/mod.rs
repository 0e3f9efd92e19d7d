//! Impls - ports の実装
//!
//! # 本番用
//! - **PostgresRecordStore**: sqlx + PostgreSQL の outbox テーブル
//! - **JetStreamSink**: NATS JetStream への配送
//!
//! # テスト用
//! - **InMemoryRecordStore**: 行ロックとトランザクションを再現した outbox
//! - **InMemorySink**: 配送内容を記録するブローカー

pub mod inmem_sink;
pub mod inmem_store;
pub mod jetstream_sink;
pub mod pg_store;

pub use self::inmem_sink::InMemorySink;
pub use self::inmem_store::{InMemoryRecordStore, InMemoryTx, StoreFault};
pub use self::jetstream_sink::JetStreamSink;
pub use self::pg_store::{PostgresRecordStore, validate_table_name};
