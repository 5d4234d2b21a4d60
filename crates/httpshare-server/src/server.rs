use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tempfile::TempDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    certs::{self, CertificateMaterial, ReusePolicy},
    consent::ConsentDesk,
    endpoint::Visibility,
    registry::{AccessPolicy, EndpointRegistry, UPLOAD_PATH},
    resolve::{self, PublicIpResolver},
};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Files to share, one endpoint each.
    pub files: Vec<PathBuf>,
    /// Share stdin under this display name.
    pub stdin_name: Option<String>,
    pub inline: bool,
    /// Per-endpoint request quota; negative means unlimited.
    pub request_limit: i64,
    /// Number of clients trusted on first connect; negative disables the gate.
    pub max_clients: i64,
    /// Serve over TLS with a self-signed certificate.
    pub encrypt: bool,
    /// Issue the certificate into a temp dir removed on exit.
    pub ephemeral_cert: bool,
    pub cert_reuse: ReusePolicy,
    /// Comma-separated hosts to announce and put in the certificate. When
    /// unset the local (or public) IP is used.
    pub announce_host: Option<String>,
    pub public_ip: bool,
    /// Enable receive mode, storing uploads here.
    pub upload_dir: Option<PathBuf>,
    pub config_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HTTPSHARE_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("HTTPSHARE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            files: Vec::new(),
            stdin_name: None,
            inline: false,
            request_limit: -1,
            max_clients: -1,
            encrypt: false,
            ephemeral_cert: false,
            cert_reuse: ReusePolicy::Always,
            announce_host: None,
            public_ip: false,
            upload_dir: None,
            config_dir: std::env::var("HTTPSHARE_CONFIG_DIR").ok().map(PathBuf::from),
        }
    }
}

impl ServerConfig {
    pub fn policy(&self) -> AccessPolicy {
        AccessPolicy {
            visibility: Visibility::from_inline(self.inline),
            request_limit: self.request_limit,
            max_clients: self.max_clients,
        }
    }

    fn scheme(&self) -> &'static str {
        if self.encrypt {
            "https"
        } else {
            "http"
        }
    }
}

/// Build the share router from the config. Every share is validated here, so
/// a missing input file fails before anything is bound.
pub fn build_registry(cfg: &ServerConfig, desk: Option<ConsentDesk>) -> Result<EndpointRegistry> {
    if cfg.stdin_name.is_some() && cfg.upload_dir.is_some() {
        anyhow::bail!(
            "cannot share stdin while receiving uploads: both would read from the console"
        );
    }

    let mut registry = EndpointRegistry::new(cfg.policy());

    for file in &cfg.files {
        registry
            .share_file(file.clone())
            .with_context(|| format!("share {}", file.display()))?;
    }
    if let Some(name) = &cfg.stdin_name {
        registry
            .share_stream(name.clone(), Box::new(tokio::io::stdin()))
            .context("share stdin")?;
    }
    if let Some(dir) = &cfg.upload_dir {
        let desk = match desk {
            Some(d) => d,
            None => ConsentDesk::console().context("start consent console")?,
        };
        registry
            .receive_uploads(dir, desk)
            .context("enable receive mode")?;
    }

    if registry.endpoints().is_empty() && !registry.is_receiving() {
        anyhow::bail!("nothing to share: give at least one file, stdin or an upload directory");
    }
    Ok(registry)
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let registry = build_registry(&cfg, None)?;

    let hosts = match &cfg.announce_host {
        Some(h) => h.clone(),
        None if cfg.public_ip => PublicIpResolver::new(resolve::PUBLIC_IP_SERVICE)?
            .resolve()
            .await
            .to_string(),
        None => resolve::local_ip().to_string(),
    };
    let url_host = resolve::host_for_url(hosts.split(',').next().unwrap_or_default().trim());

    // Held until the server stops; dropping removes ephemeral material.
    let ephemeral: Option<TempDir> = if cfg.encrypt && cfg.ephemeral_cert {
        let tmp = tempfile::Builder::new()
            .prefix("httpshare_")
            .tempdir()
            .context("create temporary certificate dir")?;
        Some(tmp)
    } else {
        None
    };
    let tls = if cfg.encrypt {
        let dir = match &ephemeral {
            Some(tmp) => tmp.path().to_path_buf(),
            None => crate::dirs::resolve_config_dir(cfg.config_dir.as_deref())?,
        };
        info!(dir = %dir.display(), "using certificate directory");
        let material = certs::issue_with_policy(&dir, &hosts, cfg.cert_reuse)
            .context("unable to create certificate")?;
        Some(material)
    } else {
        None
    };

    for endpoint in registry.endpoints() {
        info!(
            "{} available at {}://{}:{}{}",
            endpoint.target.label(),
            cfg.scheme(),
            url_host,
            cfg.port,
            endpoint.path()
        );
    }
    if registry.is_receiving() {
        info!(
            "upload form available at {}://{}:{}{}",
            cfg.scheme(),
            url_host,
            cfg.port,
            UPLOAD_PATH
        );
    }
    if let Some(gate) = registry.trust_gate() {
        info!(max_clients = gate.max_clients(), "trust on first connect enabled");
    }

    let app = registry.into_router().layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    let served = match tls {
        Some(material) => serve_tls(addr, app, &material).await,
        None => serve_plain(addr, app).await,
    };
    drop(ephemeral);
    served
}

async fn serve_plain(addr: SocketAddr, app: Router) -> Result<()> {
    info!(%addr, "httpshare listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")
}

async fn serve_tls(addr: SocketAddr, app: Router, material: &CertificateMaterial) -> Result<()> {
    // Already installed on a second call; either way ring is the provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config =
        axum_server::tls_rustls::RustlsConfig::from_pem_file(&material.cert_path, &material.key_path)
            .await
            .context("load TLS certificate")?;

    let handle = axum_server::Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.graceful_shutdown(Some(Duration::from_secs(5)));
    });

    info!(%addr, "httpshare listening (tls)");
    axum_server::bind_rustls(addr, config)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("received ctrl-c, shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            config_dir: None,
            ..Default::default()
        }
    }

    #[test]
    fn nothing_to_share_is_fatal() {
        let err = build_registry(&config(), None).err().unwrap();
        assert!(err.to_string().contains("nothing to share"));
    }

    #[test]
    fn stdin_share_conflicts_with_receive_mode() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ServerConfig {
            stdin_name: Some("stdin".into()),
            upload_dir: Some(dir.path().to_path_buf()),
            ..config()
        };
        let desk = ConsentDesk::spawn(std::io::Cursor::new("y\n"), std::io::sink()).unwrap();
        let err = build_registry(&cfg, Some(desk)).err().unwrap();
        assert!(err.to_string().contains("cannot share stdin"));
    }

    #[test]
    fn missing_file_is_fatal() {
        let cfg = ServerConfig {
            files: vec![PathBuf::from("/no/such/file")],
            ..config()
        };
        let err = build_registry(&cfg, None).err().unwrap();
        assert!(format!("{err:#}").contains("does not exist"));
    }

    #[test]
    fn every_file_gets_an_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();
        let cfg = ServerConfig {
            files: vec![a, b],
            max_clients: 1,
            ..config()
        };
        let registry = build_registry(&cfg, None).unwrap();
        assert_eq!(registry.endpoints().len(), 2);
        assert_eq!(registry.trust_gate().unwrap().max_clients(), 1);
    }

    #[test]
    fn policy_reflects_flags() {
        let cfg = ServerConfig {
            inline: true,
            request_limit: 3,
            ..config()
        };
        let policy = cfg.policy();
        assert_eq!(policy.visibility, Visibility::Inline);
        assert_eq!(policy.request_limit, 3);
        assert_eq!(policy.max_clients, -1);
    }
}
