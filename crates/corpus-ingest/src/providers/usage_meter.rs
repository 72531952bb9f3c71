//! Usage metering contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::Metadata;

/// Metering service response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageReport {
    pub remaining_credits: f64,
    pub usage_id: Option<String>,
    pub success: bool,
}

/// Records consumption against a caller's quota
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UsageMeter: Send + Sync {
    /// Record usage of a service by a caller
    async fn consume(
        &self,
        caller_id: &str,
        service_type: &str,
        tokens_used: u64,
        duration_seconds: f64,
        metadata: &Metadata,
    ) -> Result<UsageReport>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
