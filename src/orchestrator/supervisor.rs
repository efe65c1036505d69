//! Crash-recovery guard around a long-running loop.

use std::future::Future;
use std::time::Duration;

use crate::orchestrator::OrchestratorError;

/// Restarts a task whenever it returns an error or panics.
///
/// The guarded loop runs in its own spawned task so a panic surfaces as a
/// `JoinError` here instead of unwinding through the caller.
#[derive(Debug, Clone)]
pub struct Supervisor {
    name: String,
    restart_delay: Duration,
}

impl Supervisor {
    pub fn new(name: impl Into<String>, restart_delay: Duration) -> Self {
        Self {
            name: name.into(),
            restart_delay,
        }
    }

    /// Run `make()` until it returns `Ok(())`, restarting after every
    /// failure. Returns the number of restarts.
    ///
    /// A loop that never finishes keeps this future pending forever.
    pub async fn run<F, Fut>(&self, mut make: F) -> u32
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), OrchestratorError>> + Send + 'static,
    {
        let mut restarts = 0u32;
        loop {
            let failure = match tokio::spawn(make()).await {
                Ok(Ok(())) => {
                    tracing::info!(task = %self.name, restarts, "Supervised task finished");
                    return restarts;
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) if e.is_panic() => format!("panicked: {}", panic_message(e.into_panic())),
                Err(e) => e.to_string(),
            };

            restarts += 1;
            tracing::error!(
                task = %self.name,
                severity = "critical",
                error = %failure,
                restarts,
                restart_in = ?self.restart_delay,
                "Supervised task crashed, restarting"
            );
            tokio::time::sleep(self.restart_delay).await;
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
