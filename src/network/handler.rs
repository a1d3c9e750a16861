//! Listener loop

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::proxy::ProxyService;
use crate::Result;

use super::connection_pool::ConnectionPool;
use super::{Upstream, SHUTDOWN_TIMEOUT_MS};

/// Accepts client connections and serves them with the proxy service
pub struct NetworkHandler<U> {
    service: Arc<ProxyService<U>>,
    connection_pool: ConnectionPool,
    shutdown_tx: broadcast::Sender<()>,
}

impl<U: Upstream> NetworkHandler<U> {
    /// Create a new network handler
    #[must_use]
    pub fn new(service: ProxyService<U>, max_connections: usize) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            service: Arc::new(service),
            connection_pool: ConnectionPool::new(max_connections),
            shutdown_tx,
        }
    }

    /// Sender that stops [`NetworkHandler::serve`] when signalled
    #[must_use]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Bind `addr` and serve until Ctrl-C or a shutdown signal
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    ///
    /// On shutdown, live sessions are dropped without saving and in-flight
    /// connections get a grace period to finish.
    ///
    /// # Errors
    ///
    /// Returns error if the listener address cannot be read
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!("Listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let Some(guard) = self.connection_pool.try_acquire() else {
                                warn!("Connection limit reached, rejecting {}", peer_addr);
                                drop(stream);
                                continue;
                            };

                            let service = Arc::clone(&self.service);
                            tokio::spawn(async move {
                                let _guard = guard;
                                let handler = service_fn(move |request| {
                                    let service = Arc::clone(&service);
                                    async move { Ok::<_, Infallible>(service.handle(request).await) }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(TokioIo::new(stream), handler)
                                    .await
                                {
                                    debug!("Connection from {} ended with error: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            warn!("Accept error: {}", e);
                        }
                    }
                }
                _ = &mut ctrl_c => {
                    info!("Received SIGINT, shutting down");
                    break;
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        drop(listener);

        let dropped = self.service.sessions().shutdown();
        if dropped > 0 {
            info!("Dropped {} live sessions", dropped);
        }

        let drain = async {
            while self.connection_pool.active_connections() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        if tokio::time::timeout(Duration::from_millis(SHUTDOWN_TIMEOUT_MS), drain)
            .await
            .is_err()
        {
            warn!(
                "{} connections still open after shutdown timeout",
                self.connection_pool.active_connections()
            );
        }

        info!("Shutdown complete");
        Ok(())
    }
}
