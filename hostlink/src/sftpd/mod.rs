//! SFTP daemon the guest reverse-mounts host directories through.
//!
//! Every accepted TCP connection gets its own [`SshSession`] with the
//! authorized keys freshly read from disk. The daemon exits with status 0 when
//! the last SFTP session ends; see [`ConnectionCounter`].

mod counter;
mod fs;
mod session;

pub use counter::ConnectionCounter;
pub use fs::HostFs;
pub use session::SshSession;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hostlink_shared::errors::{HostlinkError, HostlinkResult};
use russh::MethodSet;
use russh::server::{Config, run_stream};
use russh_keys::key::KeyPair;
use tokio::net::TcpListener;

use crate::keys::AuthorizedKeys;
use crate::layout::ProfileLayout;

#[derive(Debug, Clone)]
pub struct SftpdConfig {
    pub port: u16,
    /// PEM private key presented as the SSH host key.
    pub host_key_path: PathBuf,
    pub authorized_keys_path: PathBuf,
}

impl SftpdConfig {
    pub fn for_profile(profile: &ProfileLayout, port: u16) -> Self {
        Self {
            port,
            host_key_path: profile.private_key_path(),
            authorized_keys_path: profile.authorized_keys_path(),
        }
    }
}

/// Load the host key. A missing file is not an error: the daemon runs but
/// refuses every connection.
pub fn load_host_key(path: &Path) -> HostlinkResult<Option<KeyPair>> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "no host key; all connections will be refused");
        return Ok(None);
    }
    russh_keys::load_secret_key(path, None)
        .map(Some)
        .map_err(|e| {
            HostlinkError::Daemon(format!(
                "Unable to parse private key {}: {}",
                path.display(),
                e
            ))
        })
}

fn ssh_config(host_key: KeyPair) -> Config {
    Config {
        methods: MethodSet::PUBLICKEY,
        keys: vec![host_key],
        auth_rejection_time: Duration::from_secs(1),
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        ..Default::default()
    }
}

/// Accept connections on `listener` until the process exits.
pub async fn serve(
    listener: TcpListener,
    config: SftpdConfig,
    counter: Arc<ConnectionCounter>,
) -> HostlinkResult<()> {
    let ssh = load_host_key(&config.host_key_path)?.map(|key| Arc::new(ssh_config(key)));

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::debug!(error = %e, "accept failed");
                continue;
            }
        };

        let Some(ssh) = ssh.clone() else {
            tracing::debug!(%peer, "refusing connection without a host key");
            continue;
        };

        let authorized = match AuthorizedKeys::load(&config.authorized_keys_path) {
            Ok(keys) => keys,
            Err(e) => {
                tracing::debug!(%peer, error = %e, "cannot load authorized keys");
                continue;
            }
        };

        let _ = stream.set_nodelay(true);
        tracing::debug!(%peer, "ssh connection");
        let handler = SshSession::new(Some(peer), authorized, counter.clone());
        tokio::spawn(async move {
            let result = match run_stream(ssh, stream, handler).await {
                Ok(session) => session.await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::debug!(%peer, error = %e, "ssh session failed");
            }
        });
    }
}

/// Bind `0.0.0.0:<port>` and serve; exits the process when the last SFTP
/// session ends.
pub async fn run(config: SftpdConfig) -> HostlinkResult<()> {
    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .map_err(|e| {
            HostlinkError::Daemon(format!("failed to listen on port {}: {}", config.port, e))
        })?;
    tracing::info!(port = config.port, "sftpd listening");

    let counter = Arc::new(ConnectionCounter::new(|| std::process::exit(0)));
    serve(listener, config, counter).await
}
