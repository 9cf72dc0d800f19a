//! Acceptor - TCP listener and bounded session pool
//!
//! One accepted connection = one session task. Concurrency is bounded by
//! a semaphore sized from config; when all permits are taken, further
//! connections sit in the OS accept backlog until a session ends.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use crate::pipeline::Cafe;
use crate::session;

pub struct CafeServer {
    cafe: Arc<Cafe>,
    listener: TcpListener,
    permits: Arc<Semaphore>,
}

impl CafeServer {
    /// Bind the configured listen address. Port 0 binds an ephemeral
    /// port, which the integration tests rely on.
    pub async fn bind(cafe: Arc<Cafe>) -> std::io::Result<Self> {
        let addr = format!("{}:{}", cafe.config.server.host, cafe.config.server.port);
        let listener = TcpListener::bind(&addr).await?;
        let permits = Arc::new(Semaphore::new(cafe.config.server.max_sessions));
        Ok(Self {
            cafe,
            listener,
            permits,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept sessions until shutdown is requested.
    pub async fn run(self) {
        tracing::info!(
            max_sessions = self.cafe.config.server.max_sessions,
            "acceptor started"
        );

        loop {
            let permit = tokio::select! {
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = self.cafe.shutdown.wait() => break,
            };

            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                },
                _ = self.cafe.shutdown.wait() => break,
            };

            tracing::debug!(%peer, "connection accepted");
            let cafe = self.cafe.clone();
            tokio::spawn(async move {
                let _permit = permit;
                session::run_session(cafe, stream, peer).await;
            });
        }

        tracing::info!("acceptor stopped");
    }
}
