//! Pre-shared-key TLS transport.
//!
//! Both sides authenticate with the shared token under TLS 1.2 PSK cipher
//! suites; no certificates are involved. The server accepts a single client
//! identity and fails the handshake for any other. Handshakes run on their
//! own tasks and only completed streams reach the HTTP server, so a client
//! that stalls mid-handshake cannot hold up others.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;

use openssl::error::ErrorStack;
use openssl::ssl::{Ssl, SslContext, SslContextBuilder, SslMethod, SslVersion};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_openssl::SslStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// Identity the client presents during the handshake.
pub const PSK_CLIENT_IDENTITY: &str = "remote-run-client";

/// PSK-only ECDHE cipher suites offered by both sides.
pub const PSK_CIPHERS: &str = "ECDHE-PSK-CHACHA20-POLY1305:ECDHE-PSK-AES256-CBC-SHA384:\
                               ECDHE-PSK-AES256-CBC-SHA:ECDHE-PSK-AES128-CBC-SHA";

/// Deadline for a single server-side handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Completed handshakes buffered for the HTTP server.
const ACCEPT_BACKLOG: usize = 64;

fn psk_context_builder(method: SslMethod) -> Result<SslContextBuilder> {
    let mut builder = SslContext::builder(method)?;
    builder.set_min_proto_version(Some(SslVersion::TLS1_2))?;
    builder.set_max_proto_version(Some(SslVersion::TLS1_2))?;
    builder.set_cipher_list(PSK_CIPHERS)?;
    Ok(builder)
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(AppError::Config("pre-shared key must not be empty".into()));
    }
    Ok(())
}

/// Server side of the PSK handshake.
#[derive(Clone)]
pub struct PskAcceptor {
    context: SslContext,
}

impl PskAcceptor {
    /// Build an acceptor that admits [`PSK_CLIENT_IDENTITY`] with `key`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an empty key and `AppError::Transport`
    /// if the TLS context cannot be configured.
    pub fn new(key: &[u8]) -> Result<Self> {
        check_key(key)?;
        let key = key.to_vec();
        let mut builder = psk_context_builder(SslMethod::tls_server())?;
        builder.set_psk_server_callback(move |_ssl, identity, psk| {
            match identity {
                Some(identity) if identity == PSK_CLIENT_IDENTITY.as_bytes() => {}
                other => {
                    warn!(
                        identity = %String::from_utf8_lossy(other.unwrap_or_default()),
                        "rejecting unknown psk identity"
                    );
                    return Ok(0);
                }
            }
            if key.len() > psk.len() {
                warn!(len = key.len(), "pre-shared key longer than tls allows");
                return Ok(0);
            }
            psk[..key.len()].copy_from_slice(&key);
            Ok(key.len())
        });
        Ok(Self {
            context: builder.build(),
        })
    }

    /// Run the server handshake on `tcp`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the handshake fails.
    pub async fn accept(&self, tcp: TcpStream) -> Result<SslStream<TcpStream>> {
        let ssl = Ssl::new(&self.context)?;
        let mut stream = SslStream::new(ssl, tcp)?;
        Pin::new(&mut stream)
            .accept()
            .await
            .map_err(|err| AppError::Transport(format!("psk handshake failed: {err}")))?;
        Ok(stream)
    }
}

/// Client side of the PSK handshake.
#[derive(Clone)]
pub struct PskConnector {
    context: SslContext,
}

impl PskConnector {
    /// Build a connector presenting [`PSK_CLIENT_IDENTITY`] with `key`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an empty key and `AppError::Transport`
    /// if the TLS context cannot be configured.
    pub fn new(key: &[u8]) -> Result<Self> {
        check_key(key)?;
        let key = key.to_vec();
        let mut builder = psk_context_builder(SslMethod::tls_client())?;
        builder.set_psk_client_callback(move |_ssl, _hint, identity, psk| {
            let name = PSK_CLIENT_IDENTITY.as_bytes();
            // The identity buffer receives a NUL-terminated string.
            if name.len() >= identity.len() || key.len() > psk.len() {
                return Err(ErrorStack::get());
            }
            identity[..name.len()].copy_from_slice(name);
            identity[name.len()] = 0;
            psk[..key.len()].copy_from_slice(&key);
            Ok(key.len())
        });
        Ok(Self {
            context: builder.build(),
        })
    }

    /// Run the client handshake on `tcp`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the server rejects the key or
    /// identity.
    pub async fn connect(&self, tcp: TcpStream) -> Result<SslStream<TcpStream>> {
        let ssl = Ssl::new(&self.context)?;
        let mut stream = SslStream::new(ssl, tcp)?;
        Pin::new(&mut stream)
            .connect()
            .await
            .map_err(|err| AppError::Transport(format!("psk handshake failed: {err}")))?;
        Ok(stream)
    }
}

/// TCP listener that yields only PSK-authenticated streams.
pub struct PskListener {
    incoming: mpsc::Receiver<(SslStream<TcpStream>, SocketAddr)>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl PskListener {
    /// Bind `addr` and start accepting handshakes until `ct` fires.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the address cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        acceptor: PskAcceptor,
        ct: CancellationToken,
    ) -> Result<Self> {
        let tcp = TcpListener::bind(addr)
            .await
            .map_err(|err| AppError::Config(format!("failed to bind {addr}: {err}")))?;
        let local_addr = tcp
            .local_addr()
            .map_err(|err| AppError::Io(format!("cannot read bound address: {err}")))?;

        let (tx, incoming) = mpsc::channel(ACCEPT_BACKLOG);
        let accept_task = tokio::spawn(accept_loop(tcp, acceptor, tx, ct));

        Ok(Self {
            incoming,
            local_addr,
            accept_task,
        })
    }

    /// Address the listener is bound to.
    #[must_use]
    pub fn bound_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for PskListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl axum::serve::Listener for PskListener {
    type Io = SslStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        if let Some(connection) = self.incoming.recv().await {
            return connection;
        }
        // The accept loop only stops on shutdown; graceful shutdown drops us.
        std::future::pending().await
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

async fn accept_loop(
    tcp: TcpListener,
    acceptor: PskAcceptor,
    tx: mpsc::Sender<(SslStream<TcpStream>, SocketAddr)>,
    ct: CancellationToken,
) {
    loop {
        let (stream, peer) = tokio::select! {
            () = ct.cancelled() => {
                info!("psk listener shutting down");
                break;
            }
            accepted = tcp.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(%err, "tcp accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                Ok(Ok(tls)) => {
                    debug!(%peer, "psk handshake complete");
                    let _ = tx.send((tls, peer)).await;
                }
                Ok(Err(err)) => warn!(%peer, %err, "psk handshake rejected"),
                Err(_) => warn!(%peer, "psk handshake timed out"),
            }
        });
    }
}
