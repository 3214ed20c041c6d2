//! Ctrl-C and SIGTERM as one shutdown request

use anyhow::{Context, Result};
#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};

pub struct Shutdown {
    #[cfg(unix)]
    term: Signal,
}

impl Shutdown {
    /// Install the handlers now, so a signal arriving before `recv` is kept
    pub fn listen() -> Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            term: signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?,
        })
    }

    /// Name of the signal that asked us to stop
    pub async fn recv(&mut self) -> Result<&'static str> {
        #[cfg(unix)]
        {
            tokio::select! {
                r = tokio::signal::ctrl_c() => r.context("Failed to listen for Ctrl-C").map(|()| "Ctrl-C"),
                _ = self.term.recv() => Ok("SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")
                .map(|()| "Ctrl-C")
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sigterm_requests_shutdown() {
        let mut shutdown = Shutdown::listen().unwrap();
        let kill = Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(kill.success());

        let which = tokio::time::timeout(Duration::from_secs(5), shutdown.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(which, "SIGTERM");
    }
}
