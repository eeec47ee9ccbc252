use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, ClientId, Delivery};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::protocol::{parse_request, Response};

/// Broker state plus the outbound channel of every live connection, under
/// one lock so each request is handled to completion (deliveries enqueued
/// included) before the next is admitted.
#[derive(Default)]
struct Shared {
    broker: Broker,
    connections: HashMap<ClientId, mpsc::UnboundedSender<Response>>,
}

impl Shared {
    fn dispatch(&self, deliveries: Vec<Delivery>) {
        for (client_id, response) in deliveries {
            if let Some(outbound) = self.connections.get(&client_id) {
                // A dropped receiver means the connection is tearing down;
                // its jobs get released by the disconnect path.
                let _ = outbound.send(response);
            }
        }
    }
}

/// Line-delimited TCP front end for the broker.
pub struct BrokerServer {
    config: BrokerConfig,
    shared: Arc<Mutex<Shared>>,
}

impl BrokerServer {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    /// Bind the listening socket. Split from [`serve`](Self::serve) so tests
    /// can bind port 0 and read back the assigned address.
    pub fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.listen_addr;
        let bound: std::io::Result<TcpListener> = (|| {
            let socket = match addr {
                SocketAddr::V4(_) => TcpSocket::new_v4()?,
                SocketAddr::V6(_) => TcpSocket::new_v6()?,
            };
            socket.set_reuseaddr(true)?;
            socket.bind(addr)?;
            socket.listen(self.config.backlog)
        })();
        bound.map_err(|source| BrokerError::Bind { addr, source })
    }

    /// Bind and serve until the shutdown token fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener, shutdown).await
    }

    /// Accept connections on an already-bound listener.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(addr = %self.config.listen_addr, "Listening for connections");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let shared = self.shared.clone();
                    tokio::spawn(async move {
                        handle_connection(shared, stream, peer).await;
                    });
                }
            }
        }
    }
}

/// Serve one connection: frame request lines, feed them to the broker, and
/// run the disconnect path when the peer goes away. Responses (the client's
/// own and deferred wake-ups from other clients' requests) arrive through
/// the connection's channel and are written by a separate task so a request
/// handler never awaits a slow socket.
async fn handle_connection(shared: Arc<Mutex<Shared>>, stream: TcpStream, peer: SocketAddr) {
    let (read_half, write_half) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let client_id = {
        let mut shared = shared.lock().await;
        let client_id = shared.broker.connect();
        shared.connections.insert(client_id, outbound_tx);
        client_id
    };
    tracing::info!(client_id, peer = %peer, "Client connected");

    // A write failure marks the connection for close.
    let closed = CancellationToken::new();
    let writer = tokio::spawn(write_responses(
        write_half,
        outbound_rx,
        closed.clone(),
        client_id,
    ));

    let mut lines = BufReader::new(read_half).lines();
    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let shared = shared.lock().await;
                    handle_line(shared, client_id, &line);
                }
                Ok(None) => {
                    tracing::info!(client_id, "Client reached EOF");
                    break;
                }
                Err(err) => {
                    tracing::debug!(client_id, error = %err, "Read failed");
                    break;
                }
            }
        }
    }

    {
        let mut shared = shared.lock().await;
        shared.connections.remove(&client_id);
        let deliveries = shared.broker.disconnect(client_id);
        shared.dispatch(deliveries);
    }
    // The sender was just dropped; let the writer flush what is queued.
    let _ = writer.await;
    tracing::info!(client_id, "Client disconnected");
}

/// Handle one framed request line under the shared lock.
fn handle_line(mut shared: tokio::sync::MutexGuard<'_, Shared>, client_id: ClientId, line: &str) {
    if shared.broker.is_waiting(client_id) {
        tracing::debug!(client_id, "Ignoring request from waiting client");
        return;
    }
    let deliveries = match parse_request(line) {
        Ok(request) => shared.broker.handle(client_id, request),
        Err(err) => {
            tracing::debug!(client_id, error = %err, "Malformed request");
            vec![(client_id, Response::Error)]
        }
    };
    shared.dispatch(deliveries);
}

async fn write_responses(
    mut write_half: OwnedWriteHalf,
    mut outbound_rx: mpsc::UnboundedReceiver<Response>,
    closed: CancellationToken,
    client_id: ClientId,
) {
    while let Some(response) = outbound_rx.recv().await {
        if let Err(err) = write_half.write_all(response.to_line().as_bytes()).await {
            tracing::debug!(client_id, error = %err, "Write failed, closing connection");
            closed.cancel();
            return;
        }
    }
}
