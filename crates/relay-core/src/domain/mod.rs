//! Domain model (records, subjects, wire format, outcomes, errors).
//!
//! ストレージやブローカーには依存しない。ports / impls / app から使われる。

pub mod envelope;
pub mod errors;
pub mod outcome;
pub mod record;
pub mod subject;

pub use self::envelope::{DecodedMessage, WireMessage};
pub use self::errors::{BoxError, ErrorKind, RelayError, SinkError, StoreError};
pub use self::outcome::{BatchOutcome, DeliveryResult, IterationReport};
pub use self::record::{ClaimPolicy, OutboxRecord, RecordId, RecordStatus};
pub use self::subject::{Subject, derive_subject, stream_wildcard};
