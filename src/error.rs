use thiserror::Error;

const RATE_LIMIT_MARKERS: [&str; 5] = [
    "429",
    "rate limit",
    "too many requests",
    "exceeded its compute units",
    "request limit",
];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited by RPC provider, please wait and retry: {0}")]
    RateLimited(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("local storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("a scan is already in progress for this wallet")]
    ScanInProgress,
}

impl ScanError {
    /// Classify an RPC failure by looking for throttling indicators in its text.
    pub fn from_rpc(error: &anyhow::Error) -> Self {
        let text = format!("{error:#}");
        let lowered = text.to_lowercase();
        let over_capacity = lowered.contains("exceeded") && lowered.contains("capacity");
        if over_capacity || RATE_LIMIT_MARKERS.iter().any(|m| lowered.contains(m)) {
            ScanError::RateLimited(text)
        } else {
            ScanError::Network(text)
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ScanError::Network(_) | ScanError::RateLimited(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifies_rate_limit_by_status() {
        let err = anyhow::anyhow!("HTTP error 429 with body: slow down");
        assert!(matches!(ScanError::from_rpc(&err), ScanError::RateLimited(_)));
    }

    #[test]
    fn test_classifies_rate_limit_by_message() {
        let err = anyhow::anyhow!("Too Many Requests");
        assert!(matches!(ScanError::from_rpc(&err), ScanError::RateLimited(_)));
    }

    #[test]
    fn test_classifies_capacity_errors_as_rate_limit() {
        let err = anyhow::anyhow!("You have exceeded the daily capacity of your plan");
        assert!(matches!(ScanError::from_rpc(&err), ScanError::RateLimited(_)));

        let err = anyhow::anyhow!("Your app has exceeded its compute units per second capacity");
        assert!(matches!(ScanError::from_rpc(&err), ScanError::RateLimited(_)));

        let err = anyhow::anyhow!("storage capacity reached");
        assert!(matches!(ScanError::from_rpc(&err), ScanError::Network(_)));
    }

    #[test]
    fn test_classifies_other_failures_as_network() {
        let err = anyhow::anyhow!("connection reset by peer");
        let classified = ScanError::from_rpc(&err);
        assert!(matches!(classified, ScanError::Network(_)));
        assert!(classified.is_retryable());
    }

    #[test]
    fn test_configuration_is_not_retryable() {
        assert!(!ScanError::Configuration("missing contract".into()).is_retryable());
        assert!(!ScanError::ScanInProgress.is_retryable());
    }
}
