//! SSH client side of the remote shell capability.

use std::sync::Arc;

use async_trait::async_trait;
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg};
use russh::{Disconnect, client};
use tokio::net::TcpStream;
use webssh_core::{Credential, RemoteError, RemoteShell};

use crate::session::SshSession;

/// Client handler that trusts every server host key.
pub struct AcceptAnyHostKey;

impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(
            algorithm = ?server_public_key.algorithm(),
            "accepting host key without verification"
        );
        Ok(true)
    }
}

/// Remote shell backed by an SSH connection.
#[derive(Clone)]
pub struct SshShell {
    config: Arc<client::Config>,
}

impl Default for SshShell {
    fn default() -> Self {
        Self::new()
    }
}

impl SshShell {
    /// Create a backend with the default `russh` client settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(client::Config::default())
    }

    #[must_use]
    pub fn with_config(config: client::Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    type Connection = TcpStream;
    type Key = PrivateKey;
    type Session = SshSession;

    async fn connect(&self, addr: &str) -> Result<TcpStream, RemoteError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| RemoteError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY: {e}");
        }
        Ok(stream)
    }

    fn parse_private_key(&self, pem: &str) -> Result<PrivateKey, RemoteError> {
        russh::keys::decode_secret_key(pem, None)
            .map_err(|e| RemoteError::InvalidKey(e.to_string()))
    }

    async fn authenticate(
        &self,
        conn: TcpStream,
        username: &str,
        credential: Credential<PrivateKey>,
    ) -> Result<SshSession, RemoteError> {
        let mut handle = client::connect_stream(Arc::clone(&self.config), conn, AcceptAnyHostKey)
            .await
            .map_err(handshake)?;

        let auth = match credential {
            Credential::Password(password) => {
                handle.authenticate_password(username, password).await
            }
            Credential::PrivateKey(key) => {
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(handshake)?
                    .flatten();
                handle
                    .authenticate_publickey(
                        username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
            }
        }
        .map_err(handshake)?;

        if !auth.success() {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(RemoteError::Rejected(username.to_string()));
        }

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| RemoteError::Channel(e.to_string()))?;
        Ok(SshSession::new(handle, channel))
    }
}

fn handshake(e: russh::Error) -> RemoteError {
    RemoteError::Handshake(e.to_string())
}
