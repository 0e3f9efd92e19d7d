//! Errors - エラー型と分類
//!
//! # 分類
//! - レコード単位の失敗（配送エラー）はイテレーションの外に出ない。`failed` ステータスになる
//! - イテレーション単位の失敗（claim / write-back / トランザクション）は rollback して Worker Pool でログに残す
//! - 「claim 対象が 0 件」はエラーではない（空の Vec）

use thiserror::Error;

use super::record::RecordStatus;

/// Boxed backend error (sqlx, async-nats, ...).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// ErrorKind は運用上の分類（ログの `error.kind` に出す）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// begin / commit / rollback の失敗
    Transaction,
    /// claim クエリの失敗
    Claim,
    /// markPublished / markFailed の失敗
    WriteBack,
    /// 1 レコードの配送失敗
    Delivery,
    /// stream のプロビジョニング失敗
    Provision,
    /// 設定エラー
    Config,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transaction => "transaction",
            ErrorKind::Claim => "claim",
            ErrorKind::WriteBack => "write_back",
            ErrorKind::Delivery => "delivery",
            ErrorKind::Provision => "provision",
            ErrorKind::Config => "config",
        }
    }
}

/// Record Store の失敗
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database connection failed: {0}")]
    Connect(#[source] BoxError),

    #[error("begin transaction failed: {0}")]
    Begin(#[source] BoxError),

    #[error("commit failed: {0}")]
    Commit(#[source] BoxError),

    #[error("rollback failed: {0}")]
    Rollback(#[source] BoxError),

    #[error("claim query failed: {0}")]
    Claim(#[source] BoxError),

    #[error("marking records {status} failed: {source}")]
    WriteBack {
        status: RecordStatus,
        #[source]
        source: BoxError,
    },

    #[error("status query failed: {0}")]
    Query(#[source] BoxError),

    #[error("decode error: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Connect(_)
            | StoreError::Begin(_)
            | StoreError::Commit(_)
            | StoreError::Rollback(_) => ErrorKind::Transaction,
            StoreError::Claim(_) | StoreError::Decode(_) | StoreError::Query(_) => ErrorKind::Claim,
            StoreError::WriteBack { .. } => ErrorKind::WriteBack,
        }
    }
}

/// Delivery Sink の失敗
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("broker connection to {url} failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("invalid subject token '{token}': {reason}")]
    Subject { token: String, reason: &'static str },

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("publish to {subject} failed: {source}")]
    Publish {
        subject: String,
        #[source]
        source: BoxError,
    },

    #[error("broker did not acknowledge {subject}: {source}")]
    Ack {
        subject: String,
        #[source]
        source: BoxError,
    },

    #[error("stream provisioning for {stream} failed: {source}")]
    Provision {
        stream: String,
        #[source]
        source: BoxError,
    },
}

impl SinkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SinkError::Connect { .. } | SinkError::Provision { .. } => ErrorKind::Provision,
            _ => ErrorKind::Delivery,
        }
    }
}

/// RelayError はイテレーション・起動レベルのエラー
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    /// work が失敗し、その後の rollback も失敗した（両方を保持する）
    #[error("{source}; rollback also failed: {rollback}")]
    RollbackFailed {
        #[source]
        source: Box<RelayError>,
        rollback: StoreError,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::Store(e) => e.kind(),
            RelayError::Sink(e) => e.kind(),
            RelayError::RollbackFailed { source, .. } => source.kind(),
            RelayError::Config(_) => ErrorKind::Config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(msg: &str) -> BoxError {
        msg.to_string().into()
    }

    #[test]
    fn write_back_errors_are_classified() {
        let err = RelayError::from(StoreError::WriteBack {
            status: RecordStatus::Published,
            source: boxed("connection reset"),
        });
        assert_eq!(err.kind(), ErrorKind::WriteBack);
        assert!(err.to_string().contains("published"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn rollback_failure_keeps_both_errors() {
        let original = RelayError::from(StoreError::Claim(boxed("syntax error")));
        let err = RelayError::RollbackFailed {
            source: Box::new(original),
            rollback: StoreError::Rollback(boxed("broken pipe")),
        };

        // 分類は元のエラーに従う
        assert_eq!(err.kind(), ErrorKind::Claim);
        let msg = err.to_string();
        assert!(msg.contains("syntax error"));
        assert!(msg.contains("broken pipe"));
    }

    #[test]
    fn sink_errors_are_delivery_failures_except_provisioning() {
        let err = SinkError::Publish {
            subject: "orders.invoice.created".into(),
            source: boxed("no responders"),
        };
        assert_eq!(err.kind(), ErrorKind::Delivery);

        let err = SinkError::Provision {
            stream: "orders".into(),
            source: boxed("insufficient resources"),
        };
        assert_eq!(err.kind(), ErrorKind::Provision);
    }
}
