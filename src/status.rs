//! Status collaborator — the process-wide lifecycle string, behind a narrow
//! two-operation contract so an in-process store or a remote table can
//! satisfy it interchangeably (Design Notes, "Global mutable state").

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

pub const EXITED: &str = "exited";
pub const IDLE: &str = "idle";
pub const STARTING: &str = "starting";
pub const COLLECTING_CATALOGS: &str = "collecting available regions and operating systems";
pub const RUNNING: &str = "running";
pub const CLEANING_UP: &str = "cleaning up";

/// Reads and writes must be individually atomic; the Run Controller writes
/// at the phase boundaries enumerated in §4.6, and refuses to start a new
/// run when the current value is not `idle` (§3).
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn read(&self) -> String;
    async fn write(&self, state: &str);
}

pub struct InProcessStatus {
    state: RwLock<String>,
}

impl Default for InProcessStatus {
    fn default() -> Self {
        InProcessStatus { state: RwLock::new(IDLE.to_string()) }
    }
}

#[async_trait]
impl StatusStore for InProcessStatus {
    async fn read(&self) -> String {
        self.state.read().await.clone()
    }

    async fn write(&self, state: &str) {
        *self.state.write().await = state.to_string();
    }
}

/// Attempts to transition from `idle` to `starting`, refusing the start if a
/// run is already in progress. Returns the previous value on refusal so the
/// caller can report it.
pub async fn try_start(status: &Arc<dyn StatusStore>) -> Result<(), String> {
    let current = status.read().await;
    if current != IDLE {
        return Err(current);
    }
    status.write(STARTING).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_idle() {
        let status = InProcessStatus::default();
        assert_eq!(status.read().await, IDLE);
    }

    #[tokio::test]
    async fn write_then_read_observes_the_new_value() {
        let status = InProcessStatus::default();
        status.write(RUNNING).await;
        assert_eq!(status.read().await, RUNNING);
    }

    #[tokio::test]
    async fn try_start_succeeds_from_idle() {
        let status: Arc<dyn StatusStore> = Arc::new(InProcessStatus::default());
        assert!(try_start(&status).await.is_ok());
        assert_eq!(status.read().await, STARTING);
    }

    #[tokio::test]
    async fn try_start_refuses_when_already_running() {
        let status: Arc<dyn StatusStore> = Arc::new(InProcessStatus::default());
        status.write(RUNNING).await;
        let err = try_start(&status).await.unwrap_err();
        assert_eq!(err, RUNNING);
        assert_eq!(status.read().await, RUNNING);
    }
}
