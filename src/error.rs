//! Error taxonomy for the harvest engine.
//!
//! Mirrors the kinds the engine must distinguish for propagation policy, not a
//! type hierarchy: `ConfigError` and `CatalogError` are fatal before/at run
//! start, `DriverError`/`NormalizationError`/`SinkError` are scoped to one job
//! or record and never abort the run, `DuplicateKey` is not an error at all
//! for run purposes (tallied, not logged as a failure).

use std::fmt;

#[derive(Debug, Clone)]
pub enum EngineError {
    Config(String),
    Catalog(String),
    Driver(String),
    Normalization(String),
    DuplicateKey(String),
    Sink(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Config(msg) => write!(f, "configuration error: {msg}"),
            EngineError::Catalog(msg) => write!(f, "catalog error: {msg}"),
            EngineError::Driver(msg) => write!(f, "page driver error: {msg}"),
            EngineError::Normalization(msg) => write!(f, "malformed row: {msg}"),
            EngineError::DuplicateKey(key) => write!(f, "duplicate primary key: {key}"),
            EngineError::Sink(msg) => write!(f, "sink error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let e = EngineError::Config("unknown region bogus-1".into());
        assert!(e.to_string().contains("configuration error"));
        assert!(e.to_string().contains("bogus-1"));
    }

    #[test]
    fn duplicate_key_message_carries_the_key() {
        let e = EngineError::DuplicateKey("2026-07-26-us-east-1-Linux-t3.nano".into());
        assert!(e.to_string().contains("2026-07-26-us-east-1-Linux-t3.nano"));
    }
}
