//! TCP acceptor for the sensor connection.
//!
//! Serves exactly one sensor at a time. Each cycle opens a fresh listening
//! socket, accepts a single connection, closes the listener so further
//! attempts are refused, and runs the session to completion before listening
//! again. Address reuse is enabled so the port can be rebound immediately
//! after a session even while the previous connection sits in TIME_WAIT.

use crate::config::Config;
use crate::operator::OperatorInput;
use crate::session::{self, ReceiveSettings, SessionReport};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Pending connections allowed on the listening socket
const LISTEN_BACKLOG: i32 = 1;

/// Server instance
pub struct Server {
    config: Config,
    addr: SocketAddr,
    input: Arc<OperatorInput>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config, input: OperatorInput) -> io::Result<Self> {
        let addr = resolve(&config.listen)?;
        Ok(Server {
            config,
            addr,
            input: Arc::new(input),
        })
    }

    /// Accept and serve sensors one after another.
    ///
    /// Only returns on a bind, listen or accept failure; session failures are
    /// logged and followed by the next accept.
    pub async fn run(&self) -> io::Result<()> {
        loop {
            let listener = bind_listener(self.addr)?;
            self.serve_next(listener).await?;
            info!("Connection finished, waiting for a new connection");
        }
    }

    /// Accept one connection on `listener`, drop the listener, and serve the
    /// connection until both duties have returned.
    pub async fn serve_next(&self, listener: TcpListener) -> io::Result<SessionReport> {
        info!(address = %listener.local_addr()?, "Server listening");

        let (stream, peer) = listener.accept().await?;
        drop(listener);
        info!(peer = %peer, "Sensor connected");

        let settings = ReceiveSettings::from(&self.config);
        Ok(session::run(stream, Arc::clone(&self.input), settings).await)
    }
}

/// Create a listening socket with SO_REUSEADDR set.
pub fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    TcpListener::from_std(socket.into())
}

fn resolve(listen: &str) -> io::Result<SocketAddr> {
    listen.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("listen address '{}' did not resolve", listen),
        )
    })
}
