use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use jobstream_transport::{NetStream, TcpTransport};
use tracing::{debug, info, warn};

use crate::config::EndpointConfig;
use crate::endpoint::{Endpoint, TeardownHook};
use crate::error::{PeerError, Result};
use crate::handler::{LogHandler, MessageHandler};
use crate::registry::Registry;

const ACCEPT_BACKOFF_INITIAL: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause after the `failures`-th consecutive accept error: doubles from
/// [`ACCEPT_BACKOFF_INITIAL`] up to [`ACCEPT_BACKOFF_MAX`].
fn accept_backoff(failures: u32) -> Duration {
    let factor = 1u32.checked_shl(failures.saturating_sub(1)).unwrap_or(u32::MAX);
    ACCEPT_BACKOFF_INITIAL
        .saturating_mul(factor)
        .min(ACCEPT_BACKOFF_MAX)
}

/// Accepts connections and tracks them in a [`Registry`].
pub struct Server {
    transport: TcpTransport,
    registry: Arc<Registry>,
    handler: Arc<dyn MessageHandler>,
    config: EndpointConfig,
    running: AtomicBool,
}

impl Server {
    /// Bind the listen address.
    ///
    /// Fails with a transport `Bind` error if the address is unavailable.
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        let transport = TcpTransport::bind(addr)?;
        Ok(Self {
            transport,
            registry: Arc::new(Registry::new()),
            handler: Arc::new(LogHandler),
            config: EndpointConfig::default(),
            running: AtomicBool::new(true),
        })
    }

    /// Override the inbound message handler (default: [`LogHandler`]).
    pub fn with_handler(mut self, handler: impl MessageHandler) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Override per-connection configuration.
    pub fn with_config(mut self, config: EndpointConfig) -> Self {
        self.config = config;
        self
    }

    /// Bound listen address.
    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Live-connection directory.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Enqueue a payload for the connection registered under `id`.
    pub fn send_to(&self, id: &str, payload: impl Into<Bytes>) -> Result<()> {
        let endpoint = self
            .registry
            .lookup(id)
            .ok_or_else(|| PeerError::UnknownEndpoint(id.to_string()))?;
        endpoint.send(payload)
    }

    /// Accept the next connection, register it and start its loops.
    pub fn accept_one(&self) -> Result<Arc<Endpoint>> {
        let (stream, peer) = self.transport.accept()?;
        self.register(stream, peer)
    }

    fn register(&self, stream: NetStream, peer: SocketAddr) -> Result<Arc<Endpoint>> {
        let id = peer.to_string();
        let endpoint = Endpoint::new(id.clone(), stream, &self.config)?;
        self.registry.insert(Arc::clone(&endpoint));

        if let Err(err) = endpoint.start(Arc::clone(&self.handler), self.teardown_hook()) {
            self.registry.remove_endpoint(&endpoint);
            return Err(err);
        }

        info!(endpoint = %id, "client connected");
        Ok(endpoint)
    }

    fn teardown_hook(&self) -> TeardownHook {
        let registry = Arc::clone(&self.registry);
        Arc::new(move |endpoint: &Endpoint| {
            registry.remove_endpoint(endpoint);
        })
    }

    /// Run the accept loop on the calling thread until [`Server::stop`].
    ///
    /// Accept failures are logged and do not stop the loop; repeated
    /// failures (e.g. descriptor exhaustion) back off before retrying.
    pub fn run(&self) {
        info!(addr = %self.local_addr(), "server started");
        let mut failures = 0u32;
        while self.running.load(Ordering::SeqCst) {
            let (stream, peer) = match self.transport.accept() {
                Ok(accepted) => {
                    failures = 0;
                    accepted
                }
                Err(err) => {
                    failures = failures.saturating_add(1);
                    let pause = accept_backoff(failures);
                    warn!(error = %err, failures, ?pause, "accept failed");
                    std::thread::sleep(pause);
                    continue;
                }
            };

            if !self.running.load(Ordering::SeqCst) {
                debug!(%peer, "dropping connection accepted during shutdown");
                break;
            }

            if let Err(err) = self.register(stream, peer) {
                warn!(%peer, error = %err, "failed to set up connection");
            }
        }
        info!(addr = %self.local_addr(), "server stopped");
    }

    /// Ask the accept loop to exit and close every live connection.
    ///
    /// A loop blocked in `accept` notices on the next incoming connection;
    /// [`ServerHandle::shutdown`] supplies one.
    pub fn stop(&self) -> Vec<Arc<Endpoint>> {
        self.running.store(false, Ordering::SeqCst);
        self.registry.close_all()
    }

    /// Run the accept loop on its own thread.
    pub fn spawn(self) -> Result<ServerHandle> {
        let server = Arc::new(self);
        let accept = {
            let server = Arc::clone(&server);
            std::thread::Builder::new()
                .name("jobstream-accept".to_string())
                .spawn(move || server.run())
                .map_err(PeerError::Spawn)?
        };
        Ok(ServerHandle {
            server,
            accept: Some(accept),
        })
    }
}

/// Handle to a server whose accept loop runs on a background thread.
///
/// Dropping the handle shuts the server down.
pub struct ServerHandle {
    server: Arc<Server>,
    accept: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Bound listen address.
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Live-connection directory.
    pub fn registry(&self) -> &Arc<Registry> {
        self.server.registry()
    }

    /// Enqueue a payload for the connection registered under `id`.
    pub fn send_to(&self, id: &str, payload: impl Into<Bytes>) -> Result<()> {
        self.server.send_to(id, payload)
    }

    /// Stop accepting, close every connection and wait for their loops.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(accept) = self.accept.take() else {
            return;
        };

        let endpoints = self.server.stop();
        // Unblock the accept call with a throwaway connection.
        if let Err(err) = TcpTransport::connect(wake_addr(self.server.local_addr())) {
            debug!(error = %err, "wake-up connection failed");
        }
        if accept.join().is_err() {
            warn!("accept loop panicked");
        }

        // Connections accepted before the flag flipped are closed here too.
        let endpoints = endpoints.into_iter().chain(self.server.registry.close_all());
        for endpoint in endpoints {
            if let Err(err) = endpoint.join() {
                debug!(endpoint = %endpoint.id(), error = %err, "connection loop ended with error");
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn wake_addr(mut addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        let loopback = match addr.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
        };
        addr.set_ip(loopback);
    }
    addr
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{channel, Receiver};
    use std::thread;
    use std::time::{Duration, Instant};

    use jobstream_frame::{encode, FrameReader};
    use jobstream_transport::TransportError;

    use super::*;

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    fn recording_server() -> (ServerHandle, Receiver<(String, Bytes)>) {
        let (tx, rx) = channel();
        let server = Server::bind("127.0.0.1:0")
            .unwrap()
            .with_handler(move |id: &str, payload: Bytes| {
                let _ = tx.send((id.to_string(), payload));
            });
        (server.spawn().unwrap(), rx)
    }

    #[test]
    fn bind_in_use_address_fails() {
        let first = Server::bind("127.0.0.1:0").unwrap();
        let err = Server::bind(first.local_addr()).err().unwrap();
        assert!(matches!(err, PeerError::Transport(TransportError::Bind { .. })));
    }

    #[test]
    fn server_decodes_client_frame() {
        let (handle, rx) = recording_server();

        let mut raw = TcpTransport::connect(handle.local_addr()).unwrap();
        let client_addr = raw.local_addr().unwrap();
        std::io::Write::write_all(&mut raw, &encode(b"Hello from client!").unwrap()).unwrap();

        let (id, payload) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(id, client_addr.to_string());
        assert_eq!(payload.len(), 18);
        assert_eq!(payload.as_ref(), b"Hello from client!");

        handle.shutdown();
    }

    #[test]
    fn send_to_reaches_registered_client() {
        let (handle, _rx) = recording_server();
        let raw = TcpTransport::connect(handle.local_addr()).unwrap();
        let id = raw.local_addr().unwrap().to_string();

        assert!(wait_until(Duration::from_secs(5), || handle
            .registry()
            .lookup(&id)
            .is_some()));
        handle.send_to(&id, &b"welcome"[..]).unwrap();

        let mut reader = FrameReader::new(raw);
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"welcome");

        let err = handle.send_to("192.0.2.1:1", &b"nobody"[..]).unwrap_err();
        assert!(matches!(err, PeerError::UnknownEndpoint(_)));

        handle.shutdown();
    }

    #[test]
    fn disconnect_removes_entry_and_write_loop_exits_cleanly() {
        let (handle, _rx) = recording_server();
        let raw = TcpTransport::connect(handle.local_addr()).unwrap();
        let id = raw.local_addr().unwrap().to_string();

        assert!(wait_until(Duration::from_secs(5), || handle
            .registry()
            .lookup(&id)
            .is_some()));
        let endpoint = handle.registry().lookup(&id).unwrap();

        drop(raw);

        assert!(wait_until(Duration::from_secs(5), || handle
            .registry()
            .is_empty()));
        assert!(endpoint.join().is_ok());
        assert!(endpoint.is_closed());
        assert!(handle.registry().remove(&id).is_none());

        handle.shutdown();
    }

    #[test]
    fn shutdown_closes_live_connections() {
        let (handle, _rx) = recording_server();
        let raw = TcpTransport::connect(handle.local_addr()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || handle.registry().len() == 1));

        let registry = Arc::clone(handle.registry());
        handle.shutdown();

        assert!(registry.is_empty());
        let mut reader = FrameReader::new(raw);
        assert!(reader.read_frame().unwrap_err().is_clean_close());
    }

    #[test]
    fn accept_backoff_grows_and_caps() {
        assert_eq!(accept_backoff(1), Duration::from_millis(10));
        assert_eq!(accept_backoff(2), Duration::from_millis(20));
        assert_eq!(accept_backoff(4), Duration::from_millis(80));
        assert_eq!(accept_backoff(8), ACCEPT_BACKOFF_MAX);
        assert_eq!(accept_backoff(40), ACCEPT_BACKOFF_MAX);
        assert_eq!(accept_backoff(u32::MAX), ACCEPT_BACKOFF_MAX);
    }

    #[test]
    fn wake_addr_maps_unspecified_to_loopback() {
        let addr: SocketAddr = "0.0.0.0:9000".parse().unwrap();
        assert_eq!(wake_addr(addr), "127.0.0.1:9000".parse().unwrap());
        let addr: SocketAddr = "[::]:9000".parse().unwrap();
        assert_eq!(wake_addr(addr), "[::1]:9000".parse().unwrap());
        let addr: SocketAddr = "10.1.2.3:9000".parse().unwrap();
        assert_eq!(wake_addr(addr), addr);
    }
}
