/// IRC server core: listeners and the per-connection loop.
///
/// Every connection runs in its own task with an unbounded outbound queue.
/// The handler only ever pushes onto that queue, so nothing waits on the
/// network while the registry slot is held; the loop below drains the queue
/// into the socket.
use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_rustls::TlsAcceptor;
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;
use tracing::{info, info_span, warn, Instrument};

use super::codec::{CodecError, IrcCodec};
use super::config::Config;
use super::handler::{Connection, Handler};
use super::message::Message;
use super::state::{Registry, SharedRegistry, Sink};
use super::tls;

/// The transport half the handler sees: an outbound queue and a kill flag.
#[derive(Debug)]
pub struct ClientConnection {
    tx: Sink,
    killed: bool,
}

impl ClientConnection {
    pub fn new(tx: Sink) -> Self {
        Self { tx, killed: false }
    }

    pub fn is_killed(&self) -> bool {
        self.killed
    }
}

impl Connection for ClientConnection {
    fn send(&self, msg: Message) {
        let _ = self.tx.send(msg);
    }

    fn sink(&self) -> Sink {
        self.tx.clone()
    }

    fn kill(&mut self) {
        self.killed = true;
    }
}

/// Run the IRC server until a listener fails.
///
/// Binds the plaintext port and, when a certificate is configured, the TLS
/// port. `COVE_BIND` picks the bind host (default all interfaces).
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let host = std::env::var("COVE_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let registry = SharedRegistry::new(Registry::new(config, info_span!("registry")));
    let config = registry.config();

    // Bind all listeners first, so we fail fast on port conflicts.
    let plain = TcpListener::bind((host.as_str(), config.port)).await?;
    info!("listening on {host}:{}", config.port);

    let secure = match config.tls_paths() {
        Some((cert, key)) => {
            let acceptor = tls::build_acceptor(cert, key)?;
            let listener = TcpListener::bind((host.as_str(), config.ssl_port)).await?;
            info!("listening for TLS on {host}:{}", config.ssl_port);
            Some((listener, acceptor))
        }
        None => {
            info!("TLS listener disabled");
            None
        }
    };

    let mut handles = vec![tokio::spawn(accept_loop(plain, None, registry.clone()))];
    if let Some((listener, acceptor)) = secure {
        handles.push(tokio::spawn(accept_loop(listener, Some(acceptor), registry.clone())));
    }

    // Wait for any listener to exit (they shouldn't).
    for handle in handles {
        handle.await??;
    }

    Ok(())
}

/// Accept loop for a single listener.
async fn accept_loop(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    registry: SharedRegistry,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        let (socket, addr) = listener.accept().await?;
        info!(%addr, tls = tls.is_some(), "new connection");
        let registry = registry.clone();
        let tls = tls.clone();

        tokio::spawn(
            async move {
                let result = match tls {
                    Some(acceptor) => match acceptor.accept(socket).await {
                        Ok(stream) => handle_client(stream, &registry).await,
                        Err(e) => {
                            warn!("TLS handshake failed: {e}");
                            return;
                        }
                    },
                    None => handle_client(socket, &registry).await,
                };
                if let Err(e) = result {
                    warn!("client error: {e}");
                }
                info!("disconnected");
            }
            .instrument(info_span!("conn", %addr)),
        );
    }
}

/// Drive one connection from first byte to teardown.
///
/// However the loop ends (QUIT, EOF, transport error, ping timeout), the
/// handler's cleanup runs before the transport is dropped.
pub async fn handle_client<S>(stream: S, registry: &SharedRegistry) -> Result<(), CodecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let config = registry.config();
    let mut framed = Framed::new(stream, IrcCodec);
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let mut conn = ClientConnection::new(tx);
    let mut handler = Handler::default();

    let ping_every = config.ping_interval();
    let mut ping = time::interval_at(Instant::now() + ping_every, ping_every);
    let mut pong_deadline: Option<Instant> = None;

    let outcome = loop {
        if conn.is_killed() {
            break Ok(());
        }
        let deadline = pong_deadline;

        tokio::select! {
            // Incoming line from the client.
            frame = framed.next() => match frame {
                Some(Ok(msg)) => {
                    pong_deadline = None;
                    handler = handler.handle(registry, &mut conn, &msg).await;
                }
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            },

            // Outgoing message queued by the handler or another connection.
            Some(msg) = rx.recv() => {
                if let Err(e) = send(&mut framed, msg).await {
                    break Err(e);
                }
            }

            _ = ping.tick() => {
                if pong_deadline.is_none() {
                    conn.send(Message::new("PING").with_trailing(config.name.as_str()));
                    pong_deadline = Some(Instant::now() + config.pong_timeout());
                }
            }

            _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                info!("ping timeout");
                break Ok(());
            }
        }
    };

    if !handler.is_closed() {
        handler.closed(registry, &mut conn).await;
    }

    // Flush whatever was queued before teardown (PART notices, errors).
    if outcome.is_ok() {
        while let Ok(msg) = rx.try_recv() {
            if send(&mut framed, msg).await.is_err() {
                break;
            }
        }
    }

    outcome
}

/// Send one message; unencodable messages are dropped, not fatal.
async fn send<S>(framed: &mut Framed<S, IrcCodec>, msg: Message) -> Result<(), CodecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match framed.send(msg).await {
        Err(CodecError::Encode(e)) => {
            warn!("dropping unencodable message: {e}");
            Ok(())
        }
        other => other,
    }
}
