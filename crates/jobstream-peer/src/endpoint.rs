//! One live connection: its stream, read loop, write loop and outbound queue.
//!
//! ```text
//! send() ─┐
//! send() ─┼─► bounded queue ─► write thread ─► FrameWriter ─► wire
//! send() ─┘
//!
//! wire ─► FrameReader ─► read thread ─► MessageHandler
//! ```
//!
//! Whichever loop fails first invokes the teardown hook. Teardown converges
//! on [`Endpoint::close`], which is gated so the stream and queue are closed
//! exactly once.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use bytes::Bytes;
use jobstream_frame::{FrameError, FrameReader, FrameWriter};
use jobstream_transport::NetStream;
use tracing::{debug, info, warn};

use crate::config::EndpointConfig;
use crate::error::{PeerError, Result};
use crate::handler::MessageHandler;

/// Callback run by a failing loop to tear its endpoint down.
pub type TeardownHook = Arc<dyn Fn(&Endpoint) + Send + Sync>;

/// Stream halves and queue receiver waiting for [`Endpoint::start`].
struct Pending {
    reader: FrameReader<NetStream>,
    writer: FrameWriter<NetStream>,
    queue: Receiver<Bytes>,
}

/// Owner of one stream connection.
pub struct Endpoint {
    id: String,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    control: NetStream,
    max_payload_size: usize,
    outbound: Mutex<Option<SyncSender<Bytes>>>,
    closed: AtomicBool,
    pending: Mutex<Option<Pending>>,
    read_loop: Mutex<Option<JoinHandle<()>>>,
    write_loop: Mutex<Option<JoinHandle<Result<()>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Endpoint {
    /// Wrap a connected stream. No thread runs until [`Endpoint::start`].
    pub fn new(
        id: impl Into<String>,
        stream: NetStream,
        config: &EndpointConfig,
    ) -> Result<Arc<Self>> {
        let id = id.into();
        if let Err(err) = stream.set_nodelay(true) {
            debug!(endpoint = %id, error = %err, "failed to set TCP_NODELAY");
        }
        let peer_addr = stream.peer_addr().ok();
        let local_addr = stream.local_addr().ok();

        let control = stream.try_clone()?;
        let reader = FrameReader::with_config_tcp(stream.try_clone()?, config.frame.clone())?;
        let writer = FrameWriter::with_config_tcp(stream, config.frame.clone())?;
        let (sender, queue) = mpsc::sync_channel(config.effective_capacity());

        Ok(Arc::new(Self {
            id,
            peer_addr,
            local_addr,
            control,
            max_payload_size: config.frame.max_payload_size,
            outbound: Mutex::new(Some(sender)),
            closed: AtomicBool::new(false),
            pending: Mutex::new(Some(Pending {
                reader,
                writer,
                queue,
            })),
            read_loop: Mutex::new(None),
            write_loop: Mutex::new(None),
        }))
    }

    /// Start the read and write threads.
    ///
    /// `handler` receives every inbound payload; `on_teardown` runs on the
    /// thread of whichever loop terminates with an error. Calling `start`
    /// again is a no-op.
    pub fn start(
        self: &Arc<Self>,
        handler: Arc<dyn MessageHandler>,
        on_teardown: TeardownHook,
    ) -> Result<()> {
        let Some(pending) = lock(&self.pending).take() else {
            debug!(endpoint = %self.id, "endpoint already started");
            return Ok(());
        };
        let Pending {
            reader,
            writer,
            queue,
        } = pending;

        let read_handle = {
            let endpoint = Arc::clone(self);
            let on_teardown = Arc::clone(&on_teardown);
            std::thread::Builder::new()
                .name(format!("jobstream-read-{}", self.id))
                .spawn(move || read_loop(endpoint, reader, handler, on_teardown))
                .map_err(PeerError::Spawn)?
        };
        *lock(&self.read_loop) = Some(read_handle);

        let write_handle = {
            let endpoint = Arc::clone(self);
            std::thread::Builder::new()
                .name(format!("jobstream-write-{}", self.id))
                .spawn(move || write_loop(endpoint, writer, queue, on_teardown))
        };
        match write_handle {
            Ok(handle) => {
                *lock(&self.write_loop) = Some(handle);
                debug!(endpoint = %self.id, "connection loops started");
                Ok(())
            }
            Err(err) => {
                self.close();
                Err(PeerError::Spawn(err))
            }
        }
    }

    /// Endpoint identity.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remote address, if the socket reported one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Local address, if the socket reported one.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Enqueue a payload for the write loop.
    ///
    /// Blocks while the queue is full. Success means the payload was queued,
    /// not that it reached the peer. A payload over the frame limit is
    /// rejected here and the connection stays open.
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        let payload = self.check_size(payload.into())?;
        let sender = self.sender()?;
        sender
            .send(payload)
            .map_err(|_| PeerError::SendOnClosedConnection(self.id.clone()))
    }

    /// Enqueue a payload without blocking.
    pub fn try_send(&self, payload: impl Into<Bytes>) -> Result<()> {
        let payload = self.check_size(payload.into())?;
        let sender = self.sender()?;
        sender.try_send(payload).map_err(|err| match err {
            TrySendError::Full(_) => PeerError::QueueFull(self.id.clone()),
            TrySendError::Disconnected(_) => PeerError::SendOnClosedConnection(self.id.clone()),
        })
    }

    fn check_size(&self, payload: Bytes) -> Result<Bytes> {
        if payload.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            }
            .into());
        }
        Ok(payload)
    }

    fn sender(&self) -> Result<SyncSender<Bytes>> {
        lock(&self.outbound)
            .clone()
            .ok_or_else(|| PeerError::SendOnClosedConnection(self.id.clone()))
    }

    /// Close the stream and the outbound queue.
    ///
    /// Returns `true` for the call that performed the close; every later call
    /// is a no-op returning `false`.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Err(err) = self.control.shutdown() {
            debug!(endpoint = %self.id, error = %err, "stream shutdown failed");
        }
        lock(&self.outbound).take();
        debug!(endpoint = %self.id, "endpoint closed");
        true
    }

    /// Whether [`Endpoint::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the outbound queue, let the write loop drain it, then close.
    ///
    /// Must not be called from the endpoint's own loops or handler.
    pub fn finish(&self) -> Result<()> {
        lock(&self.outbound).take();
        let written = self.join_write_loop();
        self.close();
        written
    }

    /// Wait for both loops to exit and return the write loop's outcome.
    ///
    /// Must not be called from the endpoint's own loops or handler.
    pub fn join(&self) -> Result<()> {
        let read_handle = lock(&self.read_loop).take();
        if let Some(handle) = read_handle {
            if handle.join().is_err() {
                return Err(PeerError::LoopPanicked(self.id.clone()));
            }
        }
        self.join_write_loop()
    }

    fn join_write_loop(&self) -> Result<()> {
        let write_handle = lock(&self.write_loop).take();
        match write_handle {
            Some(handle) => handle
                .join()
                .map_err(|_| PeerError::LoopPanicked(self.id.clone()))?,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn read_loop(
    endpoint: Arc<Endpoint>,
    mut reader: FrameReader<NetStream>,
    handler: Arc<dyn MessageHandler>,
    on_teardown: TeardownHook,
) {
    loop {
        match reader.read_frame() {
            Ok(payload) => handler.on_message(&endpoint.id, payload),
            Err(err) if err.is_clean_close() || endpoint.is_closed() => {
                info!(endpoint = %endpoint.id, "connection closed");
                break;
            }
            Err(err) => {
                warn!(endpoint = %endpoint.id, error = %err, "read loop terminated");
                break;
            }
        }
    }
    on_teardown(&endpoint);
}

fn write_loop(
    endpoint: Arc<Endpoint>,
    mut writer: FrameWriter<NetStream>,
    queue: Receiver<Bytes>,
    on_teardown: TeardownHook,
) -> Result<()> {
    for payload in queue.iter() {
        if let Err(err) = writer.send(&payload) {
            if endpoint.is_closed() {
                debug!(endpoint = %endpoint.id, error = %err, "write after close");
            } else {
                warn!(endpoint = %endpoint.id, error = %err, "write loop terminated");
            }
            on_teardown(&endpoint);
            return Err(err.into());
        }
    }
    debug!(endpoint = %endpoint.id, "outbound queue closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::sync::mpsc::channel;
    use std::time::Duration;

    use jobstream_frame::{encode, FrameConfig};
    use jobstream_transport::TcpTransport;

    use super::*;

    fn tcp_pair() -> (NetStream, NetStream) {
        let listener = TcpTransport::bind("127.0.0.1:0").unwrap();
        let client = TcpTransport::connect(listener.local_addr()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn close_on_teardown() -> TeardownHook {
        Arc::new(|endpoint: &Endpoint| {
            endpoint.close();
        })
    }

    fn ignore(_: &str, _: Bytes) {}

    #[test]
    fn sent_payloads_reach_wire_in_fifo_order() {
        let (local, mut remote) = tcp_pair();
        let endpoint = Endpoint::new("test", local, &EndpointConfig::default()).unwrap();
        endpoint.start(Arc::new(ignore), close_on_teardown()).unwrap();

        let payloads: Vec<Vec<u8>> = (0..50)
            .map(|i| format!("frame-{i}").into_bytes())
            .collect();
        for payload in &payloads {
            endpoint.send(payload.clone()).unwrap();
        }
        endpoint.send(Bytes::new()).unwrap();

        let mut expected: Vec<u8> = payloads
            .iter()
            .flat_map(|p| encode(p).unwrap().to_vec())
            .collect();
        expected.extend_from_slice(&[0, 0, 0, 0]);

        let mut wire = vec![0u8; expected.len()];
        remote.read_exact(&mut wire).unwrap();
        assert_eq!(wire, expected);

        endpoint.finish().unwrap();
    }

    #[test]
    fn inbound_frames_reach_handler_in_wire_order() {
        let (local, mut remote) = tcp_pair();
        let (tx, rx) = channel();
        let handler = move |id: &str, payload: Bytes| {
            let _ = tx.send((id.to_string(), payload));
        };
        let endpoint = Endpoint::new("peer-a", local, &EndpointConfig::default()).unwrap();
        endpoint.start(Arc::new(handler), close_on_teardown()).unwrap();

        for text in ["one", "two", "three"] {
            remote.write_all(&encode(text.as_bytes()).unwrap()).unwrap();
        }

        for text in ["one", "two", "three"] {
            let (id, payload) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(id, "peer-a");
            assert_eq!(payload.as_ref(), text.as_bytes());
        }

        endpoint.close();
        endpoint.join().unwrap();
    }

    #[test]
    fn send_after_close_fails() {
        let (local, _remote) = tcp_pair();
        let endpoint = Endpoint::new("closed", local, &EndpointConfig::default()).unwrap();
        endpoint.start(Arc::new(ignore), close_on_teardown()).unwrap();

        assert!(endpoint.close());
        let err = endpoint.send(&b"late"[..]).unwrap_err();
        assert!(matches!(err, PeerError::SendOnClosedConnection(id) if id == "closed"));
        let err = endpoint.try_send(&b"late"[..]).unwrap_err();
        assert!(matches!(err, PeerError::SendOnClosedConnection(_)));
    }

    #[test]
    fn close_is_idempotent() {
        let (local, _remote) = tcp_pair();
        let endpoint = Endpoint::new("twice", local, &EndpointConfig::default()).unwrap();
        endpoint.start(Arc::new(ignore), close_on_teardown()).unwrap();

        assert!(endpoint.close());
        assert!(!endpoint.close());
        assert!(endpoint.is_closed());
        endpoint.join().unwrap();
    }

    #[test]
    fn try_send_reports_full_queue() {
        let (local, _remote) = tcp_pair();
        let config = EndpointConfig::default().with_queue_capacity(2);
        // Not started: nothing drains the queue.
        let endpoint = Endpoint::new("full", local, &config).unwrap();

        endpoint.try_send(&b"a"[..]).unwrap();
        endpoint.try_send(&b"b"[..]).unwrap();
        let err = endpoint.try_send(&b"c"[..]).unwrap_err();
        assert!(matches!(err, PeerError::QueueFull(_)));
    }

    #[test]
    fn send_blocks_until_queue_has_room() {
        let (local, mut remote) = tcp_pair();
        let config = EndpointConfig::default().with_queue_capacity(1);
        let endpoint = Endpoint::new("bounded", local, &config).unwrap();
        endpoint.send(&b"first"[..]).unwrap();

        let (done_tx, done_rx) = channel();
        let producer = {
            let endpoint = Arc::clone(&endpoint);
            std::thread::spawn(move || {
                endpoint.send(&b"second"[..]).unwrap();
                done_tx.send(()).unwrap();
            })
        };

        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

        endpoint.start(Arc::new(ignore), close_on_teardown()).unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        producer.join().unwrap();

        let mut expected = encode(b"first").unwrap().to_vec();
        expected.extend_from_slice(&encode(b"second").unwrap());
        let mut wire = vec![0u8; expected.len()];
        remote.read_exact(&mut wire).unwrap();
        assert_eq!(wire, expected);

        endpoint.finish().unwrap();
    }

    #[test]
    fn peer_close_tears_down_once_and_write_loop_exits_cleanly() {
        let (local, remote) = tcp_pair();
        let teardowns = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let hook: TeardownHook = {
            let teardowns = Arc::clone(&teardowns);
            Arc::new(move |endpoint: &Endpoint| {
                if endpoint.close() {
                    teardowns.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        let endpoint = Endpoint::new("dropped", local, &EndpointConfig::default()).unwrap();
        endpoint.start(Arc::new(ignore), hook).unwrap();

        drop(remote);

        endpoint.join().unwrap();
        assert!(endpoint.is_closed());
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn truncated_frame_terminates_read_loop() {
        let (local, mut remote) = tcp_pair();
        let (tx, rx) = channel();
        let handler = move |_: &str, payload: Bytes| {
            let _ = tx.send(payload);
        };
        let endpoint = Endpoint::new("truncated", local, &EndpointConfig::default()).unwrap();
        endpoint.start(Arc::new(handler), close_on_teardown()).unwrap();

        // Length prefix promises 64 bytes; only 3 arrive before close.
        remote.write_all(&[0, 0, 0, 64, 1, 2, 3]).unwrap();
        drop(remote);

        endpoint.join().unwrap();
        assert!(endpoint.is_closed());
        assert!(rx.try_recv().is_err(), "no partial payload may be delivered");
    }

    fn counting_teardown() -> (TeardownHook, Arc<std::sync::atomic::AtomicUsize>) {
        let teardowns = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let hook: TeardownHook = {
            let teardowns = Arc::clone(&teardowns);
            Arc::new(move |endpoint: &Endpoint| {
                if endpoint.close() {
                    teardowns.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        (hook, teardowns)
    }

    #[test]
    fn oversized_send_is_rejected_and_connection_survives() {
        let (local, remote) = tcp_pair();
        let config = EndpointConfig::default().with_frame_config(FrameConfig {
            max_payload_size: 8,
            ..FrameConfig::default()
        });
        let (hook, teardowns) = counting_teardown();
        let endpoint = Endpoint::new("limited", local, &config).unwrap();
        endpoint.start(Arc::new(ignore), hook).unwrap();

        let err = endpoint.send(&b"twenty-one bytes long"[..]).unwrap_err();
        assert!(matches!(
            err,
            PeerError::Frame(FrameError::PayloadTooLarge { size: 21, max: 8 })
        ));
        let err = endpoint.try_send(vec![0u8; 9]).unwrap_err();
        assert!(matches!(
            err,
            PeerError::Frame(FrameError::PayloadTooLarge { size: 9, max: 8 })
        ));
        assert!(!endpoint.is_closed());

        endpoint.send(&b"fits"[..]).unwrap();
        endpoint.try_send(&b"exactly8"[..]).unwrap();
        endpoint.finish().unwrap();

        let mut reader = FrameReader::new(remote);
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"fits");
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"exactly8");
        assert!(reader.read_frame().unwrap_err().is_clean_close());
        endpoint.join().unwrap();
        assert_eq!(teardowns.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stalled_peer_write_error_tears_down_once() {
        // The remote end is kept open but never read.
        let (local, _remote) = tcp_pair();
        let config = EndpointConfig::default().with_frame_config(FrameConfig {
            write_timeout: Some(Duration::from_millis(50)),
            ..FrameConfig::default()
        });
        let (hook, teardowns) = counting_teardown();
        let endpoint = Endpoint::new("stalled", local, &config).unwrap();
        endpoint.start(Arc::new(ignore), hook).unwrap();

        let big = Bytes::from(vec![0xEE; 16 * 1024 * 1024]);
        for _ in 0..4 {
            if endpoint.send(big.clone()).is_err() {
                break;
            }
        }

        let err = endpoint.join().unwrap_err();
        assert!(matches!(err, PeerError::Frame(FrameError::Write(_))));
        assert!(endpoint.is_closed());
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn finish_drains_queue_before_closing() {
        let (local, remote) = tcp_pair();
        let endpoint = Endpoint::new("drain", local, &EndpointConfig::default()).unwrap();
        endpoint.start(Arc::new(ignore), close_on_teardown()).unwrap();

        for i in 0..10u8 {
            endpoint.send(vec![i; 32]).unwrap();
        }
        endpoint.finish().unwrap();
        assert!(endpoint.is_closed());

        let mut reader = FrameReader::new(remote);
        for i in 0..10u8 {
            assert_eq!(reader.read_frame().unwrap().as_ref(), &[i; 32][..]);
        }
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::TruncatedFrame { received: 0, .. })
        ));
    }
}
