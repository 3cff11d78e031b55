//! One SSH connection: public-key auth, `session` channels, `subsystem sftp`.
//!
//! Other channel types and session requests are refused.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, Pty};
use russh_keys::key::PublicKey;

use super::counter::ConnectionCounter;
use super::fs::HostFs;
use crate::keys::AuthorizedKeys;

const SFTP_SUBSYSTEM: &str = "sftp";

pub struct SshSession {
    peer: Option<SocketAddr>,
    authorized: AuthorizedKeys,
    counter: Arc<ConnectionCounter>,
    /// Opened `session` channels not yet bound to a subsystem.
    pending: HashMap<ChannelId, Channel<Msg>>,
    /// Channels with an SFTP server attached; each holds one count.
    serving: HashSet<ChannelId>,
}

impl SshSession {
    pub fn new(
        peer: Option<SocketAddr>,
        authorized: AuthorizedKeys,
        counter: Arc<ConnectionCounter>,
    ) -> Self {
        Self {
            peer,
            authorized,
            counter,
            pending: HashMap::new(),
            serving: HashSet::new(),
        }
    }

    fn finish(&mut self, channel: ChannelId) {
        self.pending.remove(&channel);
        if self.serving.remove(&channel) {
            self.counter.release();
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        for _ in self.serving.drain() {
            self.counter.release();
        }
    }
}

#[async_trait]
impl Handler for SshSession {
    type Error = russh::Error;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        if self.authorized.contains(public_key) {
            tracing::debug!(peer = ?self.peer, user, "public key accepted");
            return Ok(Auth::Accept);
        }
        tracing::debug!(peer = ?self.peer, user, "unknown public key");
        Ok(Auth::Reject {
            proceed_with_methods: None,
        })
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.pending.insert(channel.id(), channel);
        Ok(true)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(
            peer = ?self.peer,
            host = host_to_connect,
            port = port_to_connect,
            "refusing direct-tcpip channel"
        );
        Ok(false)
    }

    async fn channel_open_forwarded_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(peer = ?self.peer, "refusing forwarded-tcpip channel");
        Ok(false)
    }

    async fn channel_open_x11(
        &mut self,
        _channel: Channel<Msg>,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(peer = ?self.peer, "refusing x11 channel");
        Ok(false)
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(peer = ?self.peer, address, port = *port, "refusing tcpip-forward");
        Ok(false)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_failure(channel);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(peer = ?self.peer, subsystem = name, "subsystem request");
        if name != SFTP_SUBSYSTEM {
            session.channel_failure(channel_id);
            return Ok(());
        }
        let Some(channel) = self.pending.remove(&channel_id) else {
            session.channel_failure(channel_id);
            return Ok(());
        };

        session.channel_success(channel_id);
        let sessions = self.counter.acquire();
        self.serving.insert(channel_id);
        tracing::info!(peer = ?self.peer, sessions, "sftp session started");

        russh_sftp::server::run(channel.into_stream(), HostFs::new()).await;
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        _data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(peer = ?self.peer, "refusing exec request");
        session.channel_failure(channel);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_failure(channel);
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        _variable_name: &str,
        _variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_failure(channel);
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.finish(channel);
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.finish(channel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE_PUB: &str = include_str!("../keys/testdata/alice_ed25519.pub");
    const GUEST_PUB: &str = include_str!("../keys/testdata/guest_rsa.pub");

    fn public_key(line: &str) -> PublicKey {
        let encoded = line.split_whitespace().nth(1).unwrap();
        russh_keys::parse_public_key_base64(encoded).unwrap()
    }

    fn session(authorized: &str) -> SshSession {
        let counter = Arc::new(ConnectionCounter::new(|| {}));
        SshSession::new(None, AuthorizedKeys::parse(authorized).unwrap(), counter)
    }

    #[tokio::test]
    async fn test_auth_accepts_only_authorized_keys() {
        let mut ssh = session(ALICE_PUB);

        assert!(matches!(
            ssh.auth_publickey("docker", &public_key(ALICE_PUB)).await.unwrap(),
            Auth::Accept
        ));
        assert!(matches!(
            ssh.auth_publickey("docker", &public_key(GUEST_PUB)).await.unwrap(),
            Auth::Reject { .. }
        ));
    }

    #[tokio::test]
    async fn test_empty_authorized_keys_rejects_everything() {
        let mut ssh = session("");
        assert!(matches!(
            ssh.auth_publickey("docker", &public_key(ALICE_PUB)).await.unwrap(),
            Auth::Reject { .. }
        ));
    }
}
