//! Network event loop
//!
//! One thread per protocol engine owns that engine's listener and every
//! accepted socket. The same thread reads bytes, feeds the protocol
//! driver (decode, session checks, dispatch), polls session timers, and
//! drains the driver's outbound ring back to the socket. Sockets are
//! non-blocking throughout; nothing in this loop ever parks on a peer.
//!
//! Protocol engines implement [`SessionDriver`]; the loop is generic over
//! the driver and knows nothing about any wire format.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::buffer::ByteBuffer;
use crate::time::now_millis;

/// Read-buffer size per connection. Large enough for any message burst a
/// single read can produce on the supported protocols.
const READ_BUFFER_CAPACITY: usize = 64 * 1024;

/// Idle sleep between loop iterations when no connection made progress
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// One protocol connection as the event loop sees it
pub trait SessionDriver: Send {
    /// Consume inbound bytes. Returns how many bytes were used; the rest
    /// stay buffered and come back (with more appended) next time.
    /// An error closes the connection after a final drain.
    fn on_bytes(&mut self, bytes: &[u8], now_ms: u64) -> Result<usize>;

    /// Drive heartbeats and other timers
    fn poll(&mut self, now_ms: u64) -> Result<()>;

    /// Drain committed outbound frames to the socket. WouldBlock is not
    /// an error; the driver's drainer resumes mid-frame next call.
    fn drain_to(&mut self, w: &mut dyn io::Write) -> io::Result<usize>;

    /// True once the session has decided to close (logout completed,
    /// fatal reject sent, timer gave up)
    fn is_closed(&self) -> bool;

    /// Socket vanished underneath us
    fn on_io_error(&mut self, error: &io::Error);
}

struct Conn<D> {
    stream: TcpStream,
    peer: SocketAddr,
    read_buf: ByteBuffer,
    driver: D,
}

/// Accept loop + per-connection read/dispatch/drain, until `shutdown`.
///
/// `factory` builds one driver per accepted connection.
pub fn run_engine<D, F>(
    name: &str,
    listener: TcpListener,
    mut factory: F,
    shutdown: Arc<AtomicBool>,
) -> Result<()>
where
    D: SessionDriver,
    F: FnMut(SocketAddr) -> Result<D>,
{
    listener
        .set_nonblocking(true)
        .context("listener nonblocking")?;
    let local = listener.local_addr()?;
    tracing::info!(engine = name, addr = %local, "engine listening");

    let mut conns: Vec<Conn<D>> = Vec::new();

    while !shutdown.load(Ordering::Relaxed) {
        let mut progressed = false;

        // Accept
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        tracing::warn!(engine = name, %peer, error = %e, "nonblocking failed");
                        continue;
                    }
                    stream.set_nodelay(true).ok();
                    match factory(peer) {
                        Ok(driver) => {
                            tracing::info!(engine = name, %peer, "connection accepted");
                            conns.push(Conn {
                                stream,
                                peer,
                                read_buf: ByteBuffer::new(READ_BUFFER_CAPACITY),
                                driver,
                            });
                            progressed = true;
                        }
                        Err(e) => {
                            tracing::error!(engine = name, %peer, error = %e, "driver setup failed");
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::error!(engine = name, error = %e, "accept failed");
                    break;
                }
            }
        }

        let now = now_millis();
        let mut closed: Vec<usize> = Vec::new();

        for (idx, conn) in conns.iter_mut().enumerate() {
            match service_conn(conn, now) {
                Ok(active) => {
                    progressed |= active;
                    if conn.driver.is_closed() {
                        // Let the final frames (logout, reject) out first
                        match conn.driver.drain_to(&mut conn.stream) {
                            Ok(_) => closed.push(idx),
                            Err(_) => closed.push(idx),
                        }
                    }
                }
                Err(reason) => {
                    tracing::info!(engine = name, peer = %conn.peer, %reason, "closing connection");
                    closed.push(idx);
                }
            }
        }

        for idx in closed.into_iter().rev() {
            let conn = conns.swap_remove(idx);
            conn.stream.shutdown(std::net::Shutdown::Both).ok();
            tracing::info!(engine = name, peer = %conn.peer, "connection closed");
        }

        if !progressed {
            std::thread::sleep(IDLE_SLEEP);
        }
    }

    tracing::info!(engine = name, "engine shutting down");
    Ok(())
}

/// One service pass over a connection. `Err(reason)` closes it.
fn service_conn<D: SessionDriver>(conn: &mut Conn<D>, now: u64) -> Result<bool, String> {
    let mut progressed = false;

    // Read what the socket has
    loop {
        match conn.read_buf.read_from(&mut conn.stream) {
            Ok(0) => {
                if !conn.read_buf.has_remaining() {
                    // Buffer full: stop reading, let the decoder catch up
                    break;
                }
                // Orderly close from the peer
                let e = io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed");
                conn.driver.on_io_error(&e);
                return Err("peer closed".to_string());
            }
            Ok(_) => progressed = true,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                conn.driver.on_io_error(&e);
                return Err(format!("read error: {e}"));
            }
        }
    }

    // Hand buffered bytes to the decoder
    if conn.read_buf.position() > 0 {
        conn.read_buf.flip();
        let consumed = conn
            .driver
            .on_bytes(conn.read_buf.readable(), now)
            .map_err(|e| format!("protocol error: {e}"))?;
        let at = conn.read_buf.position();
        conn.read_buf.set_position(at + consumed);
        conn.read_buf.compact();
        progressed |= consumed > 0;
    }

    conn.driver
        .poll(now)
        .map_err(|e| format!("timer error: {e}"))?;

    // Push outbound frames
    match conn.driver.drain_to(&mut conn.stream) {
        Ok(n) => progressed |= n > 0,
        Err(e) => {
            conn.driver.on_io_error(&e);
            return Err(format!("write error: {e}"));
        }
    }

    Ok(progressed)
}

/// Spawn `run_engine` on its own named thread
pub fn spawn_engine<D, F>(
    name: String,
    listener: TcpListener,
    factory: F,
    shutdown: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()>
where
    D: SessionDriver + 'static,
    F: FnMut(SocketAddr) -> Result<D> + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            if let Err(e) = run_engine(&name, listener, factory, shutdown) {
                tracing::error!(engine = %name, error = %e, "engine loop failed");
            }
        })
        .expect("spawning engine thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::{Drainer, FrameRing};
    use std::io::{Read, Write};

    /// Echoes every byte back through the outbound ring
    struct EchoDriver {
        ring: Arc<FrameRing>,
        drainer: Drainer,
        closed: bool,
    }

    impl EchoDriver {
        fn new() -> Self {
            let ring = FrameRing::new(1 << 16, 64);
            let drainer = Drainer::new(Arc::clone(&ring));
            Self {
                ring,
                drainer,
                closed: false,
            }
        }
    }

    impl SessionDriver for EchoDriver {
        fn on_bytes(&mut self, bytes: &[u8], _now_ms: u64) -> Result<usize> {
            if bytes.is_empty() {
                return Ok(0);
            }
            let mut claim = self.ring.try_claim(bytes.len())?;
            claim.payload_mut().copy_from_slice(bytes);
            claim.commit();
            Ok(bytes.len())
        }

        fn poll(&mut self, _now_ms: u64) -> Result<()> {
            Ok(())
        }

        fn drain_to(&mut self, w: &mut dyn io::Write) -> io::Result<usize> {
            self.drainer.drain_into(w)
        }

        fn is_closed(&self) -> bool {
            self.closed
        }

        fn on_io_error(&mut self, _error: &io::Error) {
            self.closed = true;
        }
    }

    #[test]
    fn test_engine_echoes_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = spawn_engine(
            "echo-test".to_string(),
            listener,
            |_peer| Ok(EchoDriver::new()),
            Arc::clone(&shutdown),
        );

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client.write_all(b"ping-1").unwrap();

        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping-1");

        client.write_all(b"second").unwrap();
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"second");

        shutdown.store(true, Ordering::Relaxed);
        drop(client);
        handle.join().unwrap();
    }

    #[test]
    fn test_engine_survives_client_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = spawn_engine(
            "drop-test".to_string(),
            listener,
            |_peer| Ok(EchoDriver::new()),
            Arc::clone(&shutdown),
        );

        // Connect and immediately drop
        {
            let _client = TcpStream::connect(addr).unwrap();
        }
        std::thread::sleep(Duration::from_millis(50));

        // Engine still accepts new connections
        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client.write_all(b"alive").unwrap();
        let mut buf = [0u8; 8];
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"alive");

        shutdown.store(true, Ordering::Relaxed);
        handle.join().unwrap();
    }
}
