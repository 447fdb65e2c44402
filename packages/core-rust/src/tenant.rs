//! Tenant identity and control-plane metadata.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Internal identifier of a tenant in the control-plane store.
///
/// Used as the key of the connection registry, so two distinct tenants can
/// never share a connection handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    /// Creates a tenant id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Billing state of a tenant as last written by onboarding or renewal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSnapshot {
    /// Plan name (e.g. `"basic"`, `"premium"`).
    pub plan: String,
    /// Whether the current period has been paid for.
    pub paid: bool,
    /// Whether the subscription is switched on.
    pub active: bool,
    /// End of the paid period in millis since epoch. `None` means open-ended.
    #[serde(default)]
    pub expires_at_millis: Option<i64>,
}

/// Why a subscription snapshot does not allow new work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionIssue {
    Unpaid,
    Inactive,
    Expired,
}

impl fmt::Display for SubscriptionIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unpaid => "unpaid",
            Self::Inactive => "inactive",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

impl SubscriptionSnapshot {
    /// Checks the snapshot against the given wall-clock time.
    ///
    /// Payment is checked first, then the active flag, then expiry (only when
    /// `check_expiry` is set). Expiry is inclusive: a subscription expiring at
    /// exactly `now_millis` is already expired.
    ///
    /// # Errors
    ///
    /// Returns the first [`SubscriptionIssue`] found.
    pub fn check(&self, now_millis: i64, check_expiry: bool) -> Result<(), SubscriptionIssue> {
        if !self.paid {
            return Err(SubscriptionIssue::Unpaid);
        }
        if !self.active {
            return Err(SubscriptionIssue::Inactive);
        }
        if check_expiry {
            if let Some(expires_at) = self.expires_at_millis {
                if expires_at <= now_millis {
                    return Err(SubscriptionIssue::Expired);
                }
            }
        }
        Ok(())
    }
}

/// A tenant as stored in the control-plane directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    /// Internal identifier; key of the connection registry.
    pub id: TenantId,
    /// Public domain, unique across tenants and compared case-insensitively.
    pub domain: String,
    /// Location of the tenant's isolated database.
    pub connection_uri: String,
    /// Administrative on/off switch.
    pub active: bool,
    pub subscription: SubscriptionSnapshot,
}

impl TenantRecord {
    /// The domain in the form used for directory lookups.
    #[must_use]
    pub fn normalized_domain(&self) -> String {
        normalize_domain(&self.domain)
    }
}

/// Normalizes a domain for case-insensitive exact matching.
///
/// Only ASCII case is folded; whitespace and trailing dots are significant.
#[must_use]
pub fn normalize_domain(domain: &str) -> String {
    domain.to_ascii_lowercase()
}

/// Current wall-clock time in millis since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
