//! Observability - ログ初期化とステータス集計
//!
//! - `init_tracing()` はプロセスの入口（CLI）から 1 回だけ呼ぶ
//! - `RUST_LOG` があればそれを優先

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::config::ServiceEnvironment;
use crate::domain::RecordStatus;

/// Install the global subscriber.
///
/// `dev` / `test` → human-readable at `debug`, `prod` → JSON lines at `info`.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_tracing(env: ServiceEnvironment) {
    let default_level = match env {
        ServiceEnvironment::Prod => "info",
        ServiceEnvironment::Dev | ServiceEnvironment::Test => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = match env {
        ServiceEnvironment::Prod => builder
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(false)
            .try_init(),
        ServiceEnvironment::Dev | ServiceEnvironment::Test => builder.with_target(true).try_init(),
    };
}

/// Committed records per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub published: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: RecordStatus, n: u64) {
        match status {
            RecordStatus::Pending => self.pending += n,
            RecordStatus::Published => self.published += n,
            RecordStatus::Failed => self.failed += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.published + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate_per_status() {
        let mut counts = StatusCounts::default();
        counts.add(RecordStatus::Pending, 3);
        counts.add(RecordStatus::Published, 10);
        counts.add(RecordStatus::Failed, 1);
        counts.add(RecordStatus::Pending, 1);

        assert_eq!(
            counts,
            StatusCounts {
                pending: 4,
                published: 10,
                failed: 1
            }
        );
        assert_eq!(counts.total(), 15);
    }

    #[test]
    fn serializes_as_flat_object() {
        let counts = StatusCounts {
            pending: 1,
            published: 2,
            failed: 0,
        };
        assert_eq!(
            serde_json::to_value(counts).unwrap(),
            serde_json::json!({"pending": 1, "published": 2, "failed": 0})
        );
    }
}
