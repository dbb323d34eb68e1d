use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use bytes::Bytes;
use jobstream_transport::TcpTransport;
use tracing::info;

use crate::config::EndpointConfig;
use crate::endpoint::{Endpoint, TeardownHook};
use crate::error::Result;
use crate::handler::{LogHandler, MessageHandler};

/// A single outbound connection.
///
/// Runs the same read/write loop pair as a server-side connection, without a
/// registry. Dropping the client closes the connection.
pub struct Client {
    endpoint: Arc<Endpoint>,
}

impl Client {
    /// Dial `addr` and log every frame the server sends back.
    pub fn connect(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        Self::connect_with(addr, EndpointConfig::default(), LogHandler)
    }

    /// Dial `addr` with explicit configuration and inbound handler.
    ///
    /// A failed dial is returned as-is; there is no retry.
    pub fn connect_with(
        addr: impl ToSocketAddrs + std::fmt::Display,
        config: EndpointConfig,
        handler: impl MessageHandler,
    ) -> Result<Self> {
        let id = addr.to_string();
        let stream = TcpTransport::connect(addr)?;
        let endpoint = Endpoint::new(id, stream, &config)?;

        let on_teardown: TeardownHook = Arc::new(|endpoint: &Endpoint| {
            endpoint.close();
        });
        endpoint.start(Arc::new(handler), on_teardown)?;

        info!(server = %endpoint.id(), "connected to server");
        Ok(Self { endpoint })
    }

    /// Enqueue a payload; blocks while the outbound queue is full.
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.endpoint.send(payload)
    }

    /// Enqueue a payload without blocking.
    pub fn try_send(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.endpoint.try_send(payload)
    }

    /// Close the connection immediately. Queued frames may be dropped.
    pub fn close(&self) -> bool {
        self.endpoint.close()
    }

    /// Whether the connection has been closed (locally or by teardown).
    pub fn is_closed(&self) -> bool {
        self.endpoint.is_closed()
    }

    /// Write every queued frame, then close and wait for both loops.
    pub fn shutdown(self) -> Result<()> {
        let written = self.endpoint.finish();
        self.endpoint.join()?;
        written
    }

    /// Wait until both loops exit (e.g. after the server disconnects).
    pub fn join(&self) -> Result<()> {
        self.endpoint.join()
    }

    /// Local address of this connection.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.endpoint.local_addr()
    }

    /// Address of the server.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.endpoint.peer_addr()
    }

    /// The underlying endpoint.
    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.endpoint.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::channel;
    use std::time::{Duration, Instant};

    use jobstream_transport::TransportError;

    use super::*;
    use crate::error::PeerError;
    use crate::server::Server;

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    #[test]
    fn connect_to_missing_server_fails() {
        let addr = TcpTransport::bind("127.0.0.1:0").unwrap().local_addr();
        let err = Client::connect(addr).err().unwrap();
        assert!(matches!(err, PeerError::Transport(TransportError::Connect { .. })));
    }

    #[test]
    fn hello_from_client() {
        let (tx, rx) = channel();
        let handle = Server::bind("127.0.0.1:0")
            .unwrap()
            .with_handler(move |id: &str, payload: Bytes| {
                let _ = tx.send((id.to_string(), payload));
            })
            .spawn()
            .unwrap();

        let client = Client::connect(handle.local_addr()).unwrap();
        client.send(&b"Hello from client!"[..]).unwrap();

        let (id, payload) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(id, client.local_addr().unwrap().to_string());
        assert_eq!(payload.len(), 18);
        assert_eq!(payload.as_ref(), b"Hello from client!");

        client.shutdown().unwrap();
        handle.shutdown();
    }

    #[test]
    fn two_clients_are_tracked_separately() {
        let (tx, rx) = channel();
        let handle = Server::bind("127.0.0.1:0")
            .unwrap()
            .with_handler(move |id: &str, payload: Bytes| {
                let _ = tx.send((id.to_string(), payload));
            })
            .spawn()
            .unwrap();
        let addr = handle.local_addr();

        let first = std::thread::spawn(move || Client::connect(addr).unwrap());
        let second = std::thread::spawn(move || Client::connect(addr).unwrap());
        let first = first.join().unwrap();
        let second = second.join().unwrap();

        first.send(&b"from first"[..]).unwrap();
        second.send(&b"from second"[..]).unwrap();

        let mut received: Vec<(String, Bytes)> = (0..2)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        received.sort_by(|a, b| a.1.cmp(&b.1));

        let first_id = first.local_addr().unwrap().to_string();
        let second_id = second.local_addr().unwrap().to_string();
        assert_ne!(first_id, second_id);
        assert_eq!(received[0], (first_id.clone(), Bytes::from_static(b"from first")));
        assert_eq!(received[1], (second_id.clone(), Bytes::from_static(b"from second")));

        let mut expected = vec![first_id.clone(), second_id.clone()];
        expected.sort();
        assert_eq!(handle.registry().ids(), expected);

        first.close();
        assert!(wait_until(Duration::from_secs(5), || handle.registry().len() == 1));
        assert!(handle.registry().lookup(&first_id).is_none());
        assert!(handle.registry().lookup(&second_id).is_some());

        drop(second);
        assert!(wait_until(Duration::from_secs(5), || handle
            .registry()
            .is_empty()));
        handle.shutdown();
    }

    #[test]
    fn server_replies_reach_client_handler() {
        let handle = Server::bind("127.0.0.1:0").unwrap().spawn().unwrap();
        let (tx, rx) = channel();
        let client = Client::connect_with(
            handle.local_addr(),
            EndpointConfig::default(),
            move |_: &str, payload: Bytes| {
                let _ = tx.send(payload);
            },
        )
        .unwrap();
        let id = client.local_addr().unwrap().to_string();

        assert!(wait_until(Duration::from_secs(5), || handle
            .registry()
            .lookup(&id)
            .is_some()));
        handle.send_to(&id, &b"pong"[..]).unwrap();

        let payload = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(payload.as_ref(), b"pong");

        client.shutdown().unwrap();
        handle.shutdown();
    }

    #[test]
    fn server_shutdown_closes_client() {
        let handle = Server::bind("127.0.0.1:0").unwrap().spawn().unwrap();
        let client = Client::connect(handle.local_addr()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || handle.registry().len() == 1));

        handle.shutdown();

        client.join().unwrap();
        assert!(client.is_closed());
        let err = client.send(&b"too late"[..]).unwrap_err();
        assert!(matches!(err, PeerError::SendOnClosedConnection(_)));
    }
}
