//! Ports - 抽象化レイヤー
//!
//! 外部システム（PostgreSQL, NATS JetStream）へのインターフェース。
//! relay のロジック（app）はこの trait 越しにしか外部に触れない。
//!
//! # 設計原則
//! - PostgreSQL の outbox テーブルが source of truth（正本）
//! - ブローカーへの配送は at-least-once（ack 後に commit が失敗すれば再配送される）

pub mod clock;
pub mod delivery_sink;
pub mod record_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::delivery_sink::DeliverySink;
pub use self::record_store::{RecordStore, TxFuture, with_transaction};
