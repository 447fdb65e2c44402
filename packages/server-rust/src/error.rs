//! Error taxonomy returned by every public tenancy operation.

use tenantry_core::{EntityKind, SubscriptionIssue, TenantId};

/// Coarse error class, used by presentation layers to choose a response and
/// by callers to decide whether a retry makes sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The named tenant or entity does not exist. Never retried.
    NotFound,
    /// A business rule rejects the request (inactive tenant, bad subscription).
    StateInvalid,
    /// Infrastructure failure or interruption; the caller may retry.
    Transient,
    /// The request itself is malformed (validation, misuse of a session).
    Invalid,
    /// Unexpected driver failure.
    Internal,
}

/// Outcome of a failed connection attempt.
///
/// Cloneable so the single result of a shared attempt can be handed to every
/// caller that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("driver error: {message}")]
    Driver { message: String },
    #[error("connect timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },
    #[error("connect task aborted: {message}")]
    Aborted { message: String },
}

/// Errors returned by the directory, registries, transactions and the
/// resolver facade.
#[derive(Debug, thiserror::Error)]
pub enum TenancyError {
    #[error("no tenant for domain {domain}")]
    TenantNotFound { domain: String },
    #[error("tenant {tenant_id} is inactive")]
    TenantInactive { tenant_id: TenantId },
    #[error("subscription of tenant {tenant_id} is {issue}")]
    SubscriptionInvalid {
        tenant_id: TenantId,
        issue: SubscriptionIssue,
    },
    #[error("unknown entity: {name}")]
    UnknownEntity { name: String },
    #[error("connection to tenant {tenant_id} failed: {source}")]
    ConnectionFailed {
        tenant_id: TenantId,
        #[source]
        source: ConnectError,
    },
    #[error("tenant directory unavailable: {0}")]
    DirectoryUnavailable(#[source] anyhow::Error),
    #[error("transaction aborted: {reason}")]
    TransactionAborted { reason: String },
    #[error("transaction commit failed: {0}")]
    CommitFailed(#[source] anyhow::Error),
    #[error("operation cancelled")]
    Cancelled,
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("invalid {entity} document: {}", errors.join("; "))]
    Validation {
        entity: EntityKind,
        errors: Vec<String>,
    },
    #[error("session belongs to connection {session_connection}, binding to {binding_connection}")]
    SessionMismatch {
        session_connection: u64,
        binding_connection: u64,
    },
    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl TenancyError {
    /// Classifies the error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::TenantNotFound { .. } | Self::UnknownEntity { .. } => ErrorClass::NotFound,
            Self::TenantInactive { .. } | Self::SubscriptionInvalid { .. } => {
                ErrorClass::StateInvalid
            }
            Self::ConnectionFailed { .. }
            | Self::DirectoryUnavailable(_)
            | Self::TransactionAborted { .. }
            | Self::CommitFailed(_)
            | Self::Cancelled
            | Self::Timeout { .. } => ErrorClass::Transient,
            Self::Validation { .. } | Self::SessionMismatch { .. } => ErrorClass::Invalid,
            Self::Storage(_) => ErrorClass::Internal,
        }
    }

    /// Whether retrying the same call can succeed without any state change.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Stable, machine-readable name of the variant.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TenantNotFound { .. } => "TenantNotFound",
            Self::TenantInactive { .. } => "TenantInactive",
            Self::SubscriptionInvalid { .. } => "SubscriptionInvalid",
            Self::UnknownEntity { .. } => "UnknownEntity",
            Self::ConnectionFailed { .. } => "ConnectionFailed",
            Self::DirectoryUnavailable(_) => "DirectoryUnavailable",
            Self::TransactionAborted { .. } => "TransactionAborted",
            Self::CommitFailed(_) => "CommitFailed",
            Self::Cancelled => "Cancelled",
            Self::Timeout { .. } => "Timeout",
            Self::Validation { .. } => "Validation",
            Self::SessionMismatch { .. } => "SessionMismatch",
            Self::Storage(_) => "Storage",
        }
    }
}

impl From<tenantry_core::UnknownEntityName> for TenancyError {
    fn from(err: tenantry_core::UnknownEntityName) -> Self {
        Self::UnknownEntity { name: err.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_and_state_errors_are_distinguishable() {
        let missing = TenancyError::TenantNotFound {
            domain: "x.example.com".to_string(),
        };
        let inactive = TenancyError::TenantInactive {
            tenant_id: TenantId::new("t1"),
        };
        assert_eq!(missing.class(), ErrorClass::NotFound);
        assert_eq!(inactive.class(), ErrorClass::StateInvalid);
        assert!(!missing.is_retryable());
        assert!(!inactive.is_retryable());
    }

    #[test]
    fn connection_failures_are_retryable() {
        let err = TenancyError::ConnectionFailed {
            tenant_id: TenantId::new("t1"),
            source: ConnectError::TimedOut { timeout_ms: 50 },
        };
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "ConnectionFailed");
        assert_eq!(
            err.to_string(),
            "connection to tenant t1 failed: connect timed out after 50ms"
        );
    }

    #[test]
    fn validation_message_lists_every_error() {
        let err = TenancyError::Validation {
            entity: EntityKind::Customer,
            errors: vec!["missing required field `name`".to_string(), "x".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "invalid Customer document: missing required field `name`; x"
        );
    }

    #[test]
    fn unknown_entity_name_converts() {
        let err: TenancyError = tenantry_core::UnknownEntityName("Rocket".to_string()).into();
        assert!(matches!(err, TenancyError::UnknownEntity { ref name } if name == "Rocket"));
        assert_eq!(err.class(), ErrorClass::NotFound);
    }
}
