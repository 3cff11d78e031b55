//! Local HTTP forward proxy for guest workloads.
//!
//! Plain requests are forwarded, `CONNECT` is tunnelled byte for byte or, in
//! re-encrypt mode, terminated with a leaf minted from the built-in CA. With
//! an upstream configured, everything leaves through it. Client proxy headers
//! are passed on untouched except `Proxy-Authorization`, which the upstream's
//! credentials replace.

mod forward;
mod mitm;
mod upstream;

pub use forward::ProxyBody;
pub use mitm::{CA_CERT_PEM, CertAuthority, ca_cert_der};
pub use upstream::Upstream;

use std::convert::Infallible;
use std::sync::Arc;

use hostlink_shared::errors::{HostlinkError, HostlinkResult};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use forward::status_response;

pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// Any connection the proxy forwards over.
pub type BoxStream = Box<dyn AsyncStream>;

#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    pub port: u16,
    pub upstream: Option<String>,
    pub reencrypt: bool,
}

/// TLS client settings trusting `roots`.
pub fn client_config(roots: RootCertStore) -> HostlinkResult<Arc<ClientConfig>> {
    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| HostlinkError::Daemon(format!("TLS client config: {}", e)))?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Shared by every connection the proxy serves.
pub struct Proxy {
    upstream: Option<Upstream>,
    ca: Option<CertAuthority>,
    client_tls: Arc<ClientConfig>,
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("upstream", &self.upstream)
            .field("reencrypt", &self.ca.is_some())
            .finish()
    }
}

impl Proxy {
    pub fn new(upstream: Option<Upstream>, reencrypt: bool) -> HostlinkResult<Self> {
        let ca = if reencrypt {
            Some(CertAuthority::builtin()?)
        } else {
            None
        };
        let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Ok(Self {
            upstream,
            ca,
            client_tls: client_config(roots)?,
        })
    }

    pub fn from_config(config: &ProxyConfig) -> HostlinkResult<Self> {
        let upstream = match config.upstream.as_deref() {
            Some(raw) if !raw.is_empty() => Some(Upstream::parse(raw)?),
            _ => None,
        };
        Self::new(upstream, config.reencrypt)
    }

    /// Replace the roots used to verify origins and TLS upstreams.
    pub fn with_client_tls(mut self, client_tls: Arc<ClientConfig>) -> Self {
        self.client_tls = client_tls;
        self
    }

    pub fn upstream(&self) -> Option<&Upstream> {
        self.upstream.as_ref()
    }

    pub fn client_tls(&self) -> &Arc<ClientConfig> {
        &self.client_tls
    }

    /// Accept connections forever. Per-connection failures are logged and dropped.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> HostlinkResult<()> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::debug!(error = %e, "accept failed");
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);

            let proxy = self.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| proxy.clone().handle(req));
                if let Err(e) = http1::Builder::new()
                    .preserve_header_case(true)
                    .title_case_headers(true)
                    .serve_connection(TokioIo::new(stream), service)
                    .with_upgrades()
                    .await
                {
                    tracing::debug!(%peer, error = %e, "proxy connection failed");
                }
            });
        }
    }

    async fn handle(
        self: Arc<Self>,
        req: Request<Incoming>,
    ) -> Result<Response<ProxyBody>, Infallible> {
        tracing::debug!(method = %req.method(), uri = %req.uri(), "proxy request");
        if req.method() == Method::CONNECT {
            return Ok(self.connect(req).await);
        }
        match forward::forward_http(&self, req).await {
            Ok(res) => Ok(res),
            Err(e) => {
                tracing::debug!(error = ?e, "forward failed");
                Ok(status_response(StatusCode::BAD_GATEWAY, format!("{:#}\n", e)))
            }
        }
    }

    async fn connect(self: Arc<Self>, req: Request<Incoming>) -> Response<ProxyBody> {
        let Some(authority) = req.uri().authority().map(|a| a.to_string()) else {
            return status_response(StatusCode::BAD_REQUEST, "CONNECT needs host:port\n");
        };

        if let Some(ca) = &self.ca {
            let config = match ca.server_config(forward::host_of(&authority)) {
                Ok(config) => config,
                Err(e) => {
                    tracing::debug!(%authority, error = %e, "cannot mint certificate");
                    return status_response(StatusCode::BAD_GATEWAY, format!("{}\n", e));
                }
            };
            let proxy = self.clone();
            tokio::spawn(async move {
                match hyper::upgrade::on(req).await {
                    Ok(upgraded) => {
                        if let Err(e) = mitm::intercept(proxy, upgraded, authority.clone(), config).await {
                            tracing::debug!(%authority, error = ?e, "interception ended");
                        }
                    }
                    Err(e) => tracing::debug!(%authority, error = %e, "CONNECT upgrade failed"),
                }
            });
            return Response::new(forward::empty());
        }

        let mut target = match forward::dial(&self, &authority).await {
            Ok(target) => target,
            Err(e) => {
                tracing::debug!(%authority, error = ?e, "tunnel dial failed");
                return status_response(StatusCode::BAD_GATEWAY, format!("{:#}\n", e));
            }
        };
        tokio::spawn(async move {
            match hyper::upgrade::on(req).await {
                Ok(upgraded) => {
                    let mut client = TokioIo::new(upgraded);
                    if let Err(e) = tokio::io::copy_bidirectional(&mut client, &mut target).await {
                        tracing::debug!(%authority, error = %e, "tunnel closed");
                    }
                }
                Err(e) => tracing::debug!(%authority, error = %e, "CONNECT upgrade failed"),
            }
        });
        Response::new(forward::empty())
    }
}

/// Bind `0.0.0.0:<port>` and proxy until killed.
pub async fn run(config: ProxyConfig) -> HostlinkResult<()> {
    let proxy = Arc::new(Proxy::from_config(&config)?);
    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .map_err(|e| {
            HostlinkError::Daemon(format!("failed to listen on port {}: {}", config.port, e))
        })?;

    match proxy.upstream() {
        Some(upstream) => tracing::info!(
            port = config.port,
            upstream = %upstream.url(),
            reencrypt = config.reencrypt,
            "serving as HTTP proxy"
        ),
        None => tracing::info!(port = config.port, reencrypt = config.reencrypt, "serving as HTTP proxy"),
    }
    proxy.serve(listener).await
}
