//! Subject - ブローカー上の宛先
//!
//! # 命名規約
//! - `{service}.{aggregate_type}.{event_type}`
//! - 例: `orders.invoice.created`
//! - stream は `{service}.>` で service 配下の全 subject を受ける
//!
//! 各トークンに `.` `*` `>` や空白を許さないので、(aggregate_type, event_type)
//! が異なれば subject も必ず異なる。

use std::fmt;

use super::errors::SinkError;

/// Validated broker subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject(String);

impl Subject {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Builds `service.aggregate_type.event_type`.
pub fn derive_subject(
    service_name: &str,
    aggregate_type: &str,
    event_type: &str,
) -> Result<Subject, SinkError> {
    validate_token(service_name)?;
    validate_token(aggregate_type)?;
    validate_token(event_type)?;
    Ok(Subject(format!("{service_name}.{aggregate_type}.{event_type}")))
}

/// Wildcard bound to the service's stream.
pub fn stream_wildcard(service_name: &str) -> String {
    format!("{service_name}.>")
}

/// Checks one dot-separated subject token.
pub fn validate_token(token: &str) -> Result<(), SinkError> {
    let reason = if token.is_empty() {
        Some("token is empty")
    } else if token.contains('.') {
        Some("token contains '.'")
    } else if token.contains(['*', '>']) {
        Some("token contains a wildcard")
    } else if token.chars().any(char::is_whitespace) {
        Some("token contains whitespace")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(SinkError::Subject {
            token: token.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
