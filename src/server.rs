use std::{future::Future, io, net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpSocket},
    select,
    task::JoinHandle,
};
use tracing::{error, info};

use crate::config::GatewaySettings;
use crate::frontend::{FrontendConnection, FrontendError, WorkerPool};
use crate::gateway::{
    HealthMonitor, InMemoryServiceRegistry, RouteService, ServiceRegistry, load_balancer_for,
};
use crate::push::PushService;
use crate::session::{InMemorySessionManager, SessionManager};
use crate::upstream::UpstreamPool;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const LISTEN_BACKLOG: u32 = 1024;

// -----------------------------------------------------------------------------
// ----- GatewayState ----------------------------------------------------------

/// Everything a downstream connection needs, shared by all of them.
pub struct GatewayState {
    pub settings: GatewaySettings,
    pub sessions: Arc<dyn SessionManager>,
    pub registry: Arc<dyn ServiceRegistry>,
    pub pool: Arc<UpstreamPool>,
    pub route: RouteService,
    pub push: Arc<PushService>,
    pub(crate) workers: WorkerPool,
}

impl GatewayState {
    /// In-process registry and session store, seeded with the static services.
    pub async fn build(settings: GatewaySettings) -> Arc<Self> {
        let pool = Arc::new(UpstreamPool::new(settings.upstream.clone()));
        let registry: Arc<dyn ServiceRegistry> =
            Arc::new(InMemoryServiceRegistry::new(pool.clone()));
        let sessions: Arc<dyn SessionManager> = Arc::new(InMemorySessionManager::new());

        for service in &settings.services {
            registry
                .register_service(&service.biz_type, service.instance.clone())
                .await;
        }

        let route = RouteService::new(
            registry.clone(),
            load_balancer_for(settings.registry.load_balancer),
            pool.clone(),
        );
        let push = Arc::new(PushService::new(sessions.clone(), &settings.push));
        let workers = WorkerPool::new(settings.workers.threads, settings.workers.queue_capacity);

        Arc::new(Self {
            settings,
            sessions,
            registry,
            pool,
            route,
            push,
            workers,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- GatewayServer ---------------------------------------------------------

pub struct GatewayServer {
    state: Arc<GatewayState>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

// -----------------------------------------------------------------------------
// ----- GatewayServer: Static -------------------------------------------------

impl GatewayServer {
    pub async fn bind(listen_addr: SocketAddr, settings: GatewaySettings) -> io::Result<Self> {
        let socket = if listen_addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(listen_addr)?;

        let listener = socket.listen(LISTEN_BACKLOG)?;
        let local_addr = listener.local_addr()?;
        let state = GatewayState::build(settings).await;

        Ok(Self {
            state,
            listener,
            local_addr,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- GatewayServer: Public -------------------------------------------------

impl GatewayServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> Arc<GatewayState> {
        self.state.clone()
    }

    /// Serve until ctrl-c.
    pub async fn serve(self) -> io::Result<()> {
        self.serve_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    pub async fn serve_with_shutdown(self, shutdown: impl Future<Output = ()>) -> io::Result<()> {
        let health = self.spawn_health_monitor();
        tokio::pin!(shutdown);

        info!("listening on {}", self.local_addr);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("shutting down");
                    break;
                }

                accept_res = self.listener.accept() => {
                    let (stream, peer) = match accept_res {
                        Ok(v) => v,
                        Err(e) => { error!("accept error: {e}"); continue; }
                    };

                    let _ = stream.set_nodelay(true);
                    let state = self.state.clone();

                    tokio::spawn(async move {
                        let conn = FrontendConnection::new(stream, peer, state);

                        match conn.run().await {
                            Ok(()) => {}
                            Err(FrontendError::Protocol(e)) => {
                                error!("client {peer} protocol violation: {e}")
                            }
                            Err(e) => error!("client {peer} error: {e}"),
                        }
                    });
                }
            }
        }

        if let Some(health) = health {
            health.abort();
        }
        for stats in self.state.pool.snapshot() {
            info!(
                instance = %stats.instance,
                active = stats.active,
                pending = stats.pending,
                total_retries = stats.total_retries,
                "closing upstream connection"
            );
        }
        self.state.registry.close().await;

        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- GatewayServer: Private ------------------------------------------------

impl GatewayServer {
    fn spawn_health_monitor(&self) -> Option<JoinHandle<()>> {
        let settings = &self.state.settings.registry;
        if !settings.health_check_enabled {
            return None;
        }

        let monitor = HealthMonitor::new(self.state.registry.clone(), settings);
        Some(monitor.spawn())
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
