//! Shared AWS SDK configuration.

use std::time::Duration;

use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_smithy_types::timeout::TimeoutConfig;

/// Connect and read timeout applied to every store call.
const STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Total attempts per call (1 initial + 1 retry). Kept small because
/// crop/metadata appends are not idempotent; a longer budget risks
/// duplicate records.
const MAX_ATTEMPTS: u32 = 2;

/// Load the SDK configuration used by every AWS client in the agent.
///
/// Region and credentials resolve from the standard environment /
/// profile chain; only timeouts and the retry budget are pinned here.
pub async fn load_sdk_config() -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .timeout_config(
            TimeoutConfig::builder()
                .connect_timeout(STORE_TIMEOUT)
                .read_timeout(STORE_TIMEOUT)
                .build(),
        )
        .retry_config(RetryConfig::standard().with_max_attempts(MAX_ATTEMPTS))
        .load()
        .await
}
