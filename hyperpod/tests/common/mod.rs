//! Shared helpers for the integration suites.

use std::time::Duration;

/// Poll `condition` until it holds or a second passes.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
