use std::time::Duration;

/// Timeouts and policy switches for the tenancy layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenancyConfig {
    /// Upper bound on one connection establishment attempt, in milliseconds.
    /// Applies to the attempt itself, independently of any caller deadline.
    pub connect_timeout_ms: u64,
    /// Deadline applied by `get_tenant_model` when the caller supplies no
    /// context, in milliseconds.
    pub request_timeout_ms: u64,
    /// Default deadline for transactions opened through the resolver, in
    /// milliseconds.
    pub transaction_timeout_ms: u64,
    /// Whether a subscription past its expiry is rejected. Off by default:
    /// only the paid and active flags gate resolution unless enabled.
    pub enforce_subscription_expiry: bool,
}

impl TenancyConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            transaction_timeout_ms: 30_000,
            enforce_subscription_expiry: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = TenancyConfig::default();
        assert_eq!(config.connect_timeout_ms, 10_000);
        assert_eq!(config.request_timeout_ms, 30_000);
        assert_eq!(config.transaction_timeout_ms, 30_000);
        assert!(!config.enforce_subscription_expiry);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }
}
