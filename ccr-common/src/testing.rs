//! Test logging helpers.
//!
//! ```ignore
//! use ccr_common::testing::init_test_logging;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     init_test_logging(); // safe to call from every test
//!     tracing::info!("captured by the test writer");
//! }
//! ```

use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Install a compact subscriber writing through the libtest capture.
///
/// `CCR_TEST_LOG_LEVEL` overrides the default `debug` level.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let level = std::env::var("CCR_TEST_LOG_LEVEL").unwrap_or_else(|_| "debug".to_string());
        let filter = EnvFilter::try_new(format!("ccr={level},ccr_common={level},test=info"))
            .unwrap_or_else(|_| EnvFilter::new("debug"));

        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_line_number(true)
                    .compact(),
            )
            .with(filter)
            .try_init();
    });
}

/// Log a test marker under the `test` target.
#[macro_export]
macro_rules! test_log {
    ($($arg:tt)*) => {
        tracing::info!(target: "test", $($arg)*);
    };
}
