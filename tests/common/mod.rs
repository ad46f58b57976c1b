//! Shared test helpers for integration tests.

#![allow(dead_code)]

/// Returns the test database URL from the `TEST_DATABASE_URL` environment
/// variable, or `None` when it isn't set (tests gated on this skip cleanly
/// instead of failing in environments without a Postgres instance).
pub fn test_db_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL").ok()
}

/// Skips the calling test (returns early) when `TEST_DATABASE_URL` is unset.
#[macro_export]
macro_rules! require_db {
    () => {
        match $crate::common::test_db_url() {
            Some(url) => url,
            None => {
                eprintln!("skipping: TEST_DATABASE_URL not set");
                return;
            }
        }
    };
}
