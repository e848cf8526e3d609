//! Long-running background services and their host.
//!
//! The outbox relay and inbound event workers implement [`Service`]. A
//! [`ServiceHost`] spawns them, hands each a child of one shutdown token and
//! waits for them to drain.

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[async_trait]
pub trait Service: Send {
    fn name(&self) -> &'static str;

    /// Run until `shutdown` is cancelled or a fatal error occurs.
    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

pub struct ServiceHost {
    services: Vec<Box<dyn Service>>,
    shutdown: CancellationToken,
}

impl Default for ServiceHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceHost {
    pub fn new() -> Self {
        Self {
            services: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_service(mut self, service: impl Service + 'static) -> Self {
        self.services.push(Box::new(service));
        self
    }

    /// Token whose cancellation stops every hosted service.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn every service and return once all have stopped.
    ///
    /// A service that fails does not stop the others; the error is logged
    /// and surfaced after the rest drain.
    pub async fn run(self) -> Result<()> {
        let mut tasks = JoinSet::new();
        for service in self.services {
            let name = service.name();
            let token = self.shutdown.child_token();
            info!(service = name, "service starting");
            tasks.spawn(async move { (name, service.run(token).await) });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(()))) => info!(service = name, "service stopped"),
                Ok((name, Err(e))) => {
                    error!(service = name, error = %e, "service exited with error");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    error!(error = %e, "service task panicked");
                    first_error.get_or_insert(anyhow::Error::new(e));
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Run until Ctrl-C, then cancel every service and wait for them.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let shutdown = self.shutdown_token();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
            shutdown.cancel();
        });
        self.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct UntilCancelled {
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Service for UntilCancelled {
        fn name(&self) -> &'static str {
            "until-cancelled"
        }

        async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
            shutdown.cancelled().await;
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Service for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn run(self: Box<Self>, _shutdown: CancellationToken) -> Result<()> {
            anyhow::bail!("transport closed")
        }
    }

    #[tokio::test]
    async fn test_host_cancels_services() {
        let stopped = Arc::new(AtomicBool::new(false));
        let host = ServiceHost::new().with_service(UntilCancelled {
            stopped: stopped.clone(),
        });
        let token = host.shutdown_token();

        let handle = tokio::spawn(host.run());
        token.cancel();
        handle.await.unwrap().unwrap();

        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_host_surfaces_failures_after_drain() {
        let stopped = Arc::new(AtomicBool::new(false));
        let host = ServiceHost::new()
            .with_service(Failing)
            .with_service(UntilCancelled {
                stopped: stopped.clone(),
            });
        let token = host.shutdown_token();

        let handle = tokio::spawn(host.run());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        token.cancel();

        let result = handle.await.unwrap();
        assert!(result.unwrap_err().to_string().contains("transport closed"));
        assert!(stopped.load(Ordering::SeqCst));
    }
}
