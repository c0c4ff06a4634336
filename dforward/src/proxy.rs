// Copyright 2024 LEXUGE
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! The listener lifecycle around a [`Resolver`]: binding the UDP and TCP
//! listeners, fanning requests out to worker tasks, and draining them again
//! on shutdown.

use crate::{
    context::{RequestContext, Transport},
    error::{ForwardError, Result},
    resolver::Resolver,
    MAX_LEN,
};
use bytes::BytesMut;
use domain::base::Message;
use log::{info, warn};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, UdpSocket},
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
    time::timeout,
};

// Grace period for in-flight requests on shutdown.
const DRAIN_GRACE: Duration = Duration::from_secs(3);

struct Running {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    listeners: Vec<JoinHandle<()>>,
    drain: mpsc::Receiver<()>,
}

/// The proxy lifecycle: quiescent on creation, listening between [`start`]
/// and [`stop`].
///
/// [`start`]: Proxy::start
/// [`stop`]: Proxy::stop
pub struct Proxy {
    resolver: Arc<Resolver>,
    addr: SocketAddr,
    state: Mutex<Option<Running>>,
}

impl Proxy {
    /// Wrap a resolver. Nothing is bound until [`Proxy::start`].
    pub fn new(resolver: Resolver, addr: SocketAddr) -> Self {
        Self {
            resolver: Arc::new(resolver),
            addr,
            state: Mutex::new(None),
        }
    }

    /// The address the listeners are currently bound on.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.as_ref().map(|r| r.addr)
    }

    /// Bind the UDP and TCP listeners and start serving. Errors if the proxy
    /// is already running.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(ForwardError::AlreadyRunning);
        }

        let udp = Arc::new(UdpSocket::bind(self.addr).await?);
        // Port 0 resolves to the same ephemeral port for both listeners.
        let addr = udp.local_addr()?;
        let tcp = TcpListener::bind(addr).await?;

        let (shutdown, _) = watch::channel(false);
        let (drain_tx, drain) = mpsc::channel::<()>(1);

        let listeners = vec![
            tokio::spawn(serve_udp(
                udp,
                self.resolver.clone(),
                shutdown.subscribe(),
                drain_tx.clone(),
            )),
            tokio::spawn(serve_tcp(
                tcp,
                self.resolver.clone(),
                shutdown.subscribe(),
                drain_tx,
            )),
        ];

        info!("proxy listening on {}", addr);
        *state = Some(Running {
            addr,
            shutdown,
            listeners,
            drain,
        });
        Ok(())
    }

    /// Shut the listeners, broadcast cancellation to in-flight requests and
    /// wait for them to drain within a grace period. Errors if the proxy is
    /// not running.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let Running {
            shutdown,
            listeners,
            mut drain,
            ..
        } = state.take().ok_or(ForwardError::NotRunning)?;

        let _ = shutdown.send(true);
        for listener in listeners {
            let _ = listener.await;
        }
        // Every worker holds a drain sender clone; `recv` resolves once the
        // last one is gone.
        if timeout(DRAIN_GRACE, drain.recv()).await.is_err() {
            warn!("grace period elapsed with requests still in flight");
        }
        info!("proxy stopped");
        Ok(())
    }
}

async fn serve_udp(
    socket: Arc<UdpSocket>,
    resolver: Arc<Resolver>,
    mut shutdown: watch::Receiver<bool>,
    drain: mpsc::Sender<()>,
) {
    loop {
        let mut buf = BytesMut::with_capacity(MAX_LEN);
        buf.resize(MAX_LEN, 0);
        let (len, src) = tokio::select! {
            r = socket.recv_from(&mut buf) => match r {
                Ok(v) => v,
                Err(e) => {
                    warn!("UDP receive failed: {}", e);
                    continue;
                }
            },
            _ = shutdown.changed() => return,
        };
        buf.truncate(len);

        let socket = socket.clone();
        let resolver = resolver.clone();
        let mut shutdown = shutdown.clone();
        let drain = drain.clone();
        tokio::spawn(async move {
            let _drain = drain;
            let query = match Message::from_octets(buf.freeze()) {
                Ok(q) => q,
                Err(e) => {
                    warn!("dropping undecodable datagram from {}: {}", src, e);
                    return;
                }
            };
            let ctx = RequestContext::new(query, src, Transport::Udp);
            tokio::select! {
                r = resolver.resolve(&ctx) => match r {
                    Ok(resp) => {
                        if let Err(e) = socket.send_to(resp.as_slice(), src).await {
                            warn!("failed to send response to {}: {}", src, e);
                        }
                    }
                    Err(e) => warn!("query #{} dropped: {}", ctx.id(), e),
                },
                _ = shutdown.changed() => {}
            }
        });
    }
}

async fn serve_tcp(
    listener: TcpListener,
    resolver: Arc<Resolver>,
    mut shutdown: watch::Receiver<bool>,
    drain: mpsc::Sender<()>,
) {
    loop {
        let (stream, src) = tokio::select! {
            r = listener.accept() => match r {
                Ok(v) => v,
                Err(e) => {
                    warn!("TCP accept failed: {}", e);
                    continue;
                }
            },
            _ = shutdown.changed() => return,
        };

        let resolver = resolver.clone();
        let mut shutdown = shutdown.clone();
        let drain = drain.clone();
        tokio::spawn(async move {
            let _drain = drain;
            tokio::select! {
                r = serve_stream(stream, src, resolver) => {
                    if let Err(e) = r {
                        warn!("TCP session with {} ended: {}", src, e);
                    }
                }
                _ = shutdown.changed() => {}
            }
        });
    }
}

// Serve framed queries on one connection until the peer closes it.
async fn serve_stream(
    mut stream: TcpStream,
    src: SocketAddr,
    resolver: Arc<Resolver>,
) -> std::io::Result<()> {
    loop {
        let len = match stream.read_u16().await {
            Ok(len) => usize::from(len),
            // The peer hanging up between queries is the normal end of a
            // session.
            Err(_) => return Ok(()),
        };
        let mut buf = BytesMut::with_capacity(len);
        buf.resize(len, 0);
        stream.read_exact(&mut buf).await?;

        let query = match Message::from_octets(buf.freeze()) {
            Ok(q) => q,
            Err(_) => return Ok(()),
        };
        let ctx = RequestContext::new(query, src, Transport::Tcp);
        if let Ok(resp) = resolver.resolve(&ctx).await {
            stream.write_u16(resp.as_slice().len() as u16).await?;
            stream.write_all(resp.as_slice()).await?;
            stream.flush().await?;
        }
    }
}
