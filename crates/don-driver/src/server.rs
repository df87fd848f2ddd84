//! Plugin socket server
//!
//! Docker discovers the driver through a unix socket in its plugin
//! directory and speaks HTTP/1.1 over it.

use anyhow::{Context, Result};
use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::net::UnixListener;
use tracing::{debug, info, warn};

/// Socket server configuration
#[derive(Clone, Debug)]
pub struct SocketServerConfig {
    pub socket_path: PathBuf,
    /// Group given access to the socket; root-only when unset
    pub gid: Option<u32>,
}

/// HTTP server on a unix socket
pub struct SocketServer {
    config: SocketServerConfig,
    router: Router,
}

impl SocketServer {
    pub fn new(config: SocketServerConfig, router: Router) -> Self {
        Self { config, router }
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    fn bind(&self) -> Result<UnixListener> {
        let path = &self.config.socket_path;

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create plugin directory {}", dir.display()))?;
        }
        if path.exists() {
            warn!("Removing stale socket {}", path.display());
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove stale socket {}", path.display()))?;
        }

        let listener = UnixListener::bind(path)
            .with_context(|| format!("Failed to bind {}", path.display()))?;

        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o660))
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
        if let Some(gid) = self.config.gid {
            std::os::unix::fs::chown(path, None, Some(gid))
                .with_context(|| format!("Failed to chown {} to gid {}", path.display(), gid))?;
        }

        Ok(listener)
    }

    /// Serve until `shutdown` resolves, then remove the socket
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = self.bind()?;
        info!("Plugin listening on {}", self.config.socket_path.display());

        tokio::pin!(shutdown);
        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down plugin server");
                    break Ok(());
                }
                accepted = listener.accept() => {
                    let stream = match accepted {
                        Ok((stream, _)) => stream,
                        Err(e) => break Err(anyhow::Error::new(e).context("Failed to accept connection")),
                    };
                    let router = self.router.clone();

                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let service = TowerToHyperService::new(router);

                        if let Err(e) = http1::Builder::new()
                            .serve_connection(io, service)
                            .await
                        {
                            debug!("Connection error: {}", e);
                        }
                    });
                }
            }
        };

        if let Err(e) = std::fs::remove_file(&self.config.socket_path) {
            warn!(
                "Failed to remove socket {}: {}",
                self.config.socket_path.display(),
                e
            );
        }
        result
    }
}
