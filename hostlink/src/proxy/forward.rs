//! Plain HTTP forwarding and CONNECT tunnels, direct or through the upstream.

use anyhow::{Context, anyhow, bail};
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::header::{HOST, HeaderValue, PROXY_AUTHORIZATION};
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use super::{BoxStream, Proxy};

pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

pub fn full(chunk: impl Into<Bytes>) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn status_response(status: StatusCode, message: impl Into<String>) -> Response<ProxyBody> {
    let mut res = Response::new(full(message.into()));
    *res.status_mut() = status;
    res
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// `host:port` of an absolute URI, defaulting the port from the scheme.
pub fn authority_of(uri: &Uri) -> Option<String> {
    let authority = uri.authority()?;
    let default_port = if uri.scheme_str() == Some("https") { 443 } else { 80 };
    Some(join_host_port(
        authority.host(),
        authority.port_u16().unwrap_or(default_port),
    ))
}

/// Host part of `host:port`, without IPv6 brackets.
pub fn host_of(authority: &str) -> &str {
    let host = match authority.rsplit_once(':') {
        Some((host, port)) if port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => authority,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

/// Open a byte stream to `authority`. With an upstream configured this is a
/// CONNECT tunnel through it, carrying the upstream credentials.
pub async fn dial(proxy: &Proxy, authority: &str) -> anyhow::Result<BoxStream> {
    let Some(upstream) = proxy.upstream() else {
        let tcp = TcpStream::connect(authority)
            .await
            .with_context(|| format!("connect to {}", authority))?;
        let _ = tcp.set_nodelay(true);
        return Ok(Box::new(tcp));
    };

    let stream = upstream
        .connect(proxy.client_tls())
        .await
        .with_context(|| format!("connect to upstream {}", upstream.url()))?;
    let (mut sender, conn) = http1::Builder::new()
        .handshake::<_, Empty<Bytes>>(TokioIo::new(stream))
        .await
        .context("upstream handshake")?;
    tokio::spawn(async move {
        if let Err(e) = conn.with_upgrades().await {
            tracing::debug!(error = %e, "upstream tunnel connection ended");
        }
    });

    let mut req = Request::connect(authority)
        .header(HOST, authority)
        .body(Empty::<Bytes>::new())
        .context("build CONNECT request")?;
    if let Some(auth) = upstream.authorization() {
        req.headers_mut().insert(PROXY_AUTHORIZATION, auth.clone());
    }

    let res = sender.send_request(req).await.context("upstream CONNECT")?;
    if !res.status().is_success() {
        bail!("upstream refused CONNECT {}: {}", authority, res.status());
    }
    let upgraded = hyper::upgrade::on(res)
        .await
        .context("upstream CONNECT upgrade")?;
    Ok(Box::new(TokioIo::new(upgraded)))
}

/// Send one request over a fresh HTTP/1.1 connection on `stream`.
pub async fn send<B>(stream: BoxStream, req: Request<B>) -> anyhow::Result<Response<ProxyBody>>
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (mut sender, conn) = http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .handshake(TokioIo::new(stream))
        .await
        .context("handshake")?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!(error = %e, "outbound connection ended");
        }
    });

    let res = sender.send_request(req).await.context("send request")?;
    Ok(res.map(|body| body.boxed()))
}

/// Rewrite an absolute-form URI to origin form (`/path?query`).
pub fn origin_form(uri: &Uri) -> anyhow::Result<Uri> {
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    path.parse().context("origin-form URI")
}

fn ensure_host(req: &mut Request<Incoming>, authority: &str) -> anyhow::Result<()> {
    if req.headers().contains_key(HOST) {
        return Ok(());
    }
    let host = match req.uri().authority() {
        Some(a) => match a.port_u16() {
            Some(port) => join_host_port(a.host(), port),
            None => a.host().to_string(),
        },
        None => authority.to_string(),
    };
    req.headers_mut().insert(HOST, HeaderValue::from_str(&host)?);
    Ok(())
}

/// Forward a plain-HTTP proxy request.
///
/// Directly, the request goes to the origin in origin form. Through an
/// upstream it keeps its absolute-form URI and gets the upstream's
/// `Proxy-Authorization`, replacing any the client sent.
pub async fn forward_http(
    proxy: &Proxy,
    mut req: Request<Incoming>,
) -> anyhow::Result<Response<ProxyBody>> {
    let authority = authority_of(req.uri())
        .ok_or_else(|| anyhow!("request URI {} is not absolute", req.uri()))?;
    ensure_host(&mut req, &authority)?;

    match proxy.upstream() {
        Some(upstream) => {
            if let Some(auth) = upstream.authorization() {
                req.headers_mut().insert(PROXY_AUTHORIZATION, auth.clone());
            }
            let stream = upstream
                .connect(proxy.client_tls())
                .await
                .with_context(|| format!("connect to upstream {}", upstream.url()))?;
            send(stream, req).await
        }
        None => {
            *req.uri_mut() = origin_form(req.uri())?;
            let tcp = TcpStream::connect(&authority)
                .await
                .with_context(|| format!("connect to {}", authority))?;
            let _ = tcp.set_nodelay(true);
            send(Box::new(tcp), req).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority_of() {
        let uri: Uri = "http://example.com/a?b=1".parse().unwrap();
        assert_eq!(authority_of(&uri).unwrap(), "example.com:80");
        let uri: Uri = "https://example.com/".parse().unwrap();
        assert_eq!(authority_of(&uri).unwrap(), "example.com:443");
        let uri: Uri = "http://example.com:8080/".parse().unwrap();
        assert_eq!(authority_of(&uri).unwrap(), "example.com:8080");
        let uri: Uri = "/relative".parse().unwrap();
        assert!(authority_of(&uri).is_none());
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("example.com:443"), "example.com");
        assert_eq!(host_of("[::1]:443"), "::1");
        assert_eq!(host_of("example.com"), "example.com");
    }

    #[test]
    fn test_origin_form() {
        let uri: Uri = "http://example.com/a/b?c=d".parse().unwrap();
        assert_eq!(origin_form(&uri).unwrap(), "/a/b?c=d");
        let uri: Uri = "http://example.com".parse().unwrap();
        assert_eq!(origin_form(&uri).unwrap(), "/");
    }
}
