use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration of the publisher-side workflows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrantConfig {
    /// Network the holders are sampled from.
    pub domain: String,
    /// Sampling rounds before a grant gives up.
    pub max_rounds: usize,
    /// Timeout for a single proposal.
    pub negotiation_timeout: Duration,
    /// Timeout for a single enactment attempt.
    pub enactment_timeout: Duration,
    /// Attempts to enact one share with one holder before the share is burned.
    pub max_enactment_attempts: u32,
    /// Timeout for a single revocation order.
    pub revocation_timeout: Duration,
    /// Maximum number of holders contacted at once.
    pub max_concurrency: usize,
}

impl Default for GrantConfig {
    fn default() -> Self {
        Self {
            domain: "mainnet".into(),
            max_rounds: 3,
            negotiation_timeout: Duration::from_secs(10),
            enactment_timeout: Duration::from_secs(10),
            max_enactment_attempts: 2,
            revocation_timeout: Duration::from_secs(10),
            max_concurrency: 16,
        }
    }
}

/// Configuration of the recipient-side workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Timeout for a single re-encryption request.
    pub request_timeout: Duration,
    /// Maximum number of holders contacted at once.
    pub max_concurrency: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_concurrency: 16,
        }
    }
}
