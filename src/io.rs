// Copyright 2024 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Network I/O for running a [`Server`] over UDP and TCP.
//!
//! A [`Server`](crate::server::Server) implements message processing
//! abstracted from the network; this module moves the buffers. An
//! [`Endpoint`] binds a UDP socket and a TCP listener on the same port
//! and, once started, spawns one Tokio task per inbound datagram or
//! connection, all sharing the one read-only server snapshot.
//!
//! Every query is answered within [`QUERY_TIMEOUT`]; if handling
//! somehow exceeds the budget, the client receives SERVFAIL rather
//! than a hang, so a stalled evaluation run fails fast. Graceful
//! shutdown drains in-flight tasks and then releases the sockets, so
//! back-to-back test runs never collide on the port.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use log::error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use crate::server::{ReceivedInfo, Server, Transport};

/// The default port: unprivileged, and what harness tooling expects
/// (`dig @127.0.0.1 -p 5053 ...`).
pub const DEFAULT_PORT: u16 = 5053;

/// The wall-clock budget for answering a single query. Exceeding it
/// yields SERVFAIL, never an indefinite hang.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// The maximum amount of time a TCP client is allowed to take to send
/// one full DNS message before the connection is closed.
const READ_MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// The size of UDP receive and response buffers. Without EDNS, 512
/// octets is the UDP message limit.
const UDP_BUF_SIZE: usize = 512;

////////////////////////////////////////////////////////////////////////
// ENDPOINT                                                           //
////////////////////////////////////////////////////////////////////////

/// A bound-but-not-yet-serving pair of sockets: UDP and TCP on the same
/// port.
///
/// Binding is separate from serving so that a scenario is fully loaded
/// before the first query can arrive, and so that bind failures surface
/// as startup errors with a nonzero exit rather than mid-run
/// surprises.
pub struct Endpoint {
    udp: Arc<UdpSocket>,
    tcp: TcpListener,
    local_addr: SocketAddr,
}

impl Endpoint {
    /// Binds UDP and TCP sockets on `addr`. If `addr` has port 0, an
    /// ephemeral port is chosen (and shared by both sockets); use
    /// [`Endpoint::local_addr`] to discover it.
    pub async fn bind(addr: SocketAddr) -> io::Result<Endpoint> {
        let udp = UdpSocket::bind(addr).await?;
        let local_addr = udp.local_addr()?;
        let tcp = TcpListener::bind(local_addr).await?;
        Ok(Endpoint {
            udp: Arc::new(udp),
            tcp,
            local_addr,
        })
    }

    /// Returns the address the endpoint is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts serving on the active Tokio runtime.
    ///
    /// This spawns the receive loops and returns a
    /// [`ShutdownController`] that must be held as long as the server
    /// should run; dropping it triggers shutdown.
    pub fn start(self, server: &Arc<Server>) -> ShutdownController {
        let (controller, handle) = make_shutdown_channels();

        {
            let handle = handle.clone();
            let server = server.clone();
            let socket = self.udp.clone();
            tokio::spawn(async move {
                if let Err(e) = run_udp_receiver(handle, server, socket).await {
                    error!("UDP receiver failed: {e}");
                }
            });
        }
        {
            let server = server.clone();
            tokio::spawn(async move {
                if let Err(e) = run_tcp_listener(handle, server, self.tcp).await {
                    error!("TCP listener failed: {e}");
                }
            });
        }

        controller
    }
}

////////////////////////////////////////////////////////////////////////
// UDP                                                                //
////////////////////////////////////////////////////////////////////////

/// The UDP receive loop: one task per datagram.
async fn run_udp_receiver(
    mut shutdown: ShutdownHandle,
    server: Arc<Server>,
    socket: Arc<UdpSocket>,
) -> io::Result<()> {
    loop {
        let mut received = vec![0; UDP_BUF_SIZE];
        let (received_len, peer) = tokio::select! {
            _ = shutdown.request_receiver.recv() => return Ok(()),
            result = socket.recv_from(&mut received) => result?,
        };

        let guard = shutdown.wait_sender.clone();
        let server = server.clone();
        let socket = socket.clone();
        tokio::spawn(async move {
            received.truncate(received_len);
            let result = answer_udp(&server, &socket, &received, peer).await;
            if let Err(e) = result {
                error!("failed to send a UDP response to {peer}: {e}");
            }
            drop(guard);
        });
    }
}

/// Handles one datagram, enforcing the per-query budget.
async fn answer_udp(
    server: &Server,
    socket: &UdpSocket,
    received: &[u8],
    peer: SocketAddr,
) -> io::Result<()> {
    let handle_and_send = async {
        let mut response = vec![0; UDP_BUF_SIZE];
        let len = server.handle_message(
            received,
            ReceivedInfo::new(peer.ip(), Transport::Udp),
            &mut response,
        );
        socket.send_to(&response[..len], peer).await.map(|_| ())
    };
    match timeout(QUERY_TIMEOUT, handle_and_send).await {
        Ok(result) => result,
        Err(_) => {
            let fallback = minimal_servfail(received);
            socket.send_to(&fallback, peer).await.map(|_| ())
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TCP                                                                //
////////////////////////////////////////////////////////////////////////

/// The TCP listener/accept loop: one task per connection.
async fn run_tcp_listener(
    mut shutdown: ShutdownHandle,
    server: Arc<Server>,
    listener: TcpListener,
) -> io::Result<()> {
    loop {
        let (client, client_addr) = tokio::select! {
            _ = shutdown.request_receiver.recv() => return Ok(()),
            result = listener.accept() => result?,
        };
        let shutdown = shutdown.clone();
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_tcp_connection(shutdown, &server, client, client_addr.ip()).await
            {
                error!("TCP connection from {client_addr} failed: {e}");
            }
        });
    }
}

/// Handles a TCP connection: length-prefixed DNS messages, one response
/// per message, until the client closes, a read times out, or shutdown
/// is requested.
async fn handle_tcp_connection(
    mut shutdown: ShutdownHandle,
    server: &Server,
    mut socket: TcpStream,
    client_ip: IpAddr,
) -> io::Result<()> {
    let mut received_buf = vec![0; 2 + u16::MAX as usize];
    let mut response_buf = vec![0; 2 + u16::MAX as usize];
    let mut n_read = 0;

    loop {
        // Wait for the next message, but give up promptly if shutdown
        // is requested while the connection is idle — a lingering
        // client must not stall the drain.
        let read_result = tokio::select! {
            _ = shutdown.request_receiver.recv() => return Ok(()),
            result = timeout(
                READ_MESSAGE_TIMEOUT,
                read_message_over_tcp(&mut socket, &mut received_buf, &mut n_read),
            ) => result,
        };
        let received_len = match read_result {
            Ok(Ok(Some(len))) => len,
            Ok(Ok(None)) => return Ok(()), // The connection was closed.
            Ok(Err(e)) => return Err(e),   // There was an I/O error.
            Err(_) => return Ok(()),       // The read timed out.
        };

        // Process the message and write the response, within the
        // per-query budget.
        let received = &received_buf[2..received_len + 2];
        let write_result = match timeout(QUERY_TIMEOUT, async {
            let response_len = server.handle_message(
                received,
                ReceivedInfo::new(client_ip, Transport::Tcp),
                &mut response_buf[2..],
            );
            response_buf[0..2].copy_from_slice(&u16::to_be_bytes(response_len as u16));
            socket.write_all(&response_buf[0..2 + response_len]).await
        })
        .await
        {
            Ok(result) => result,
            Err(_) => {
                let fallback = minimal_servfail(received);
                let mut framed = Vec::with_capacity(2 + fallback.len());
                framed.extend_from_slice(&u16::to_be_bytes(fallback.len() as u16));
                framed.extend_from_slice(&fallback);
                socket.write_all(&framed).await
            }
        };
        write_result?;

        // We won't continue to service this connection if we are
        // shutting down.
        if matches!(
            shutdown.request_receiver.try_recv(),
            Err(broadcast::error::TryRecvError::Closed)
        ) {
            return Ok(());
        }

        // Any leftover data is the start of the next message.
        if n_read > received_len + 2 {
            received_buf.copy_within(received_len + 2..n_read, 0);
            n_read -= received_len + 2;
        } else {
            n_read = 0;
        }
    }
}

/// Reads a single DNS message (including the initial two-octet length
/// field) from a [`TcpStream`].
///
/// This function assumes that `*n_read` octets have already been read
/// into the buffer, and may read past the end of the message (pipelined
/// clients). The returned length, if any, is the size of the message
/// itself, not including the length field. `Ok(None)` means the
/// connection was closed before a whole message arrived.
async fn read_message_over_tcp(
    socket: &mut TcpStream,
    buf: &mut [u8],
    n_read: &mut usize,
) -> io::Result<Option<usize>> {
    let mut received_len_opt = None;
    loop {
        // There may already be a whole message in the buffer.
        if let Some(received_len) = received_len_opt {
            if *n_read >= received_len + 2 {
                return Ok(Some(received_len));
            }
        } else if *n_read >= 2 {
            let received_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
            if *n_read >= received_len + 2 {
                return Ok(Some(received_len));
            } else {
                received_len_opt = Some(received_len);
            }
        }

        let n_read_this_time = socket.read(&mut buf[*n_read..]).await?;
        if n_read_this_time == 0 {
            return Ok(None);
        }
        *n_read += n_read_this_time;
    }
}

////////////////////////////////////////////////////////////////////////
// SERVFAIL FALLBACK                                                  //
////////////////////////////////////////////////////////////////////////

/// Builds a bare SERVFAIL header echoing the query's ID, for when the
/// per-query budget runs out and the real response never materialized.
fn minimal_servfail(received: &[u8]) -> [u8; 12] {
    let mut header = [0; 12];
    if received.len() >= 2 {
        header[0..2].copy_from_slice(&received[0..2]);
    }
    header[2] = 0x80; // QR
    if received.len() >= 3 {
        header[2] |= received[2] & 0x79; // opcode and RD
    }
    header[3] = 0x02; // SERVFAIL
    header
}

////////////////////////////////////////////////////////////////////////
// GRACEFUL SHUTDOWN                                                  //
////////////////////////////////////////////////////////////////////////

/// Controls the shutdown of an [`Endpoint`]'s Tokio tasks.
///
/// Use [`ShutdownController::shut_down`] to request shutdown and wait
/// for in-flight queries to drain. Dropping the controller also
/// triggers shutdown (but does not wait for it to complete).
#[must_use]
pub struct ShutdownController {
    request_sender: broadcast::Sender<()>,
    wait_receiver: mpsc::Receiver<()>,
}

impl ShutdownController {
    /// Requests that running server tasks shut down, and then waits for
    /// them to terminate. When this returns, the listening sockets have
    /// been released and the port can be rebound immediately.
    pub async fn shut_down(mut self) {
        drop(self.request_sender);
        let _ = self.wait_receiver.recv().await;
    }
}

/// A handle held by tasks to interact with the graceful shutdown
/// mechanism.
///
/// Tasks listen for shutdown by waiting for all senders attached to
/// `request_receiver` to close, and prevent shutdown from completing
/// (by holding `wait_sender`) until they are dropped.
struct ShutdownHandle {
    request_receiver: broadcast::Receiver<()>,
    wait_sender: mpsc::Sender<()>,
}

impl Clone for ShutdownHandle {
    fn clone(&self) -> Self {
        // A resubscribed receiver misses values already queued, but the
        // shutdown signal is not a value being sent; it is all senders
        // being dropped.
        ShutdownHandle {
            request_receiver: self.request_receiver.resubscribe(),
            wait_sender: self.wait_sender.clone(),
        }
    }
}

/// Produces a [`ShutdownController`] and an initial [`ShutdownHandle`]
/// connected to it.
fn make_shutdown_channels() -> (ShutdownController, ShutdownHandle) {
    let (request_sender, request_receiver) = broadcast::channel(1);
    let (wait_sender, wait_receiver) = mpsc::channel(1);
    let controller = ShutdownController {
        request_sender,
        wait_receiver,
    };
    let handle = ShutdownHandle {
        request_receiver,
        wait_sender,
    };
    (controller, handle)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
