//! Byte endpoint: owns a single OS TCP connection, with connect
//! timeout, buffered read/write, and an idempotent `close` that unblocks
//! a read in progress.

use crate::error::{CoreError, CoreResult};
use crate::uri::TcpEndpointParams;
use socket2::SockRef;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};

/// Applies the socket-level options parsed from the connection URI;
/// `tcp_no_delay` goes through `TcpStream` directly, the rest need
/// `SO_LINGER`/`SO_KEEPALIVE`/buffer-size access `socket2` exposes.
fn apply_socket_options(stream: &TcpStream, params: &TcpEndpointParams) -> CoreResult<()> {
    stream.set_nodelay(params.tcp_no_delay)?;
    let sock = SockRef::from(stream);
    if let Some(secs) = params.so_linger {
        let linger = if secs > 0 { Some(Duration::from_secs(secs as u64)) } else { None };
        sock.set_linger(linger)?;
    }
    if let Some(keep_alive) = params.so_keep_alive {
        sock.set_keepalive(keep_alive)?;
    }
    if let Some(size) = params.so_receive_buffer_size {
        sock.set_recv_buffer_size(size as usize)?;
    }
    if let Some(size) = params.so_send_buffer_size {
        sock.set_send_buffer_size(size as usize)?;
    }
    Ok(())
}

/// The write side plus the shared close signal; cheap to clone via
/// `Arc` and shared between the caller threads doing `oneway`/`request`.
pub struct ByteEndpoint {
    write_half: Mutex<BufWriter<OwnedWriteHalf>>,
    closed: Arc<AtomicBool>,
    close_notify: Arc<Notify>,
    trace: bool,
}

/// The read side, owned exclusively by the I/O pump's single reader
/// task.
pub struct ByteEndpointReader {
    read_half: BufReader<OwnedReadHalf>,
    closed: Arc<AtomicBool>,
    close_notify: Arc<Notify>,
    trace: bool,
}

impl ByteEndpoint {
    pub async fn connect(params: &TcpEndpointParams) -> CoreResult<(Self, ByteEndpointReader)> {
        let connect_fut = TcpStream::connect((params.host.as_str(), params.port));
        let stream = match params.connect_timeout {
            Some(d) => tokio::time::timeout(d, connect_fut)
                .await
                .map_err(|_| CoreError::Timeout)??,
            None => connect_fut.await?,
        };
        apply_socket_options(&stream, params)?;
        let (r, w) = stream.into_split();
        let closed = Arc::new(AtomicBool::new(false));
        let close_notify = Arc::new(Notify::new());
        Ok((
            ByteEndpoint {
                write_half: Mutex::new(BufWriter::with_capacity(
                    params.output_buffer_size as usize,
                    w,
                )),
                closed: closed.clone(),
                close_notify: close_notify.clone(),
                trace: params.trace,
            },
            ByteEndpointReader {
                read_half: BufReader::with_capacity(params.input_buffer_size as usize, r),
                closed,
                close_notify,
                trace: params.trace,
            },
        ))
    }

    /// Serialises a single frame write behind the exclusive writer lock;
    /// the writer never blocks the reader.
    pub async fn write_frame(&self, frame: &[u8]) -> CoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoreError::State("transport closed"));
        }
        if self.trace {
            trace!(
                "TO THE WIRE: {} bytes |{}|",
                frame.len(),
                frame
                    .iter()
                    .take(16)
                    .map(|b| format!("{b:02x} "))
                    .collect::<String>()
            );
        }
        let mut w = self.write_half.lock().await;
        w.write_all(frame).await?;
        w.flush().await?;
        Ok(())
    }

    /// Idempotent; releases any read currently blocked in
    /// [`ByteEndpointReader::read_more`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.close_notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl ByteEndpointReader {
    /// Reads at least one more byte into `buf`, or returns `Ok(0)` if the
    /// endpoint was closed or the peer shut down its write side. Racing
    /// the read against the close signal is what makes `close` unblock a
    /// read in progress — dropping the read future is sufficient because
    /// nothing else depends on in-flight socket bytes.
    pub async fn read_more(&mut self, buf: &mut Vec<u8>) -> CoreResult<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(0);
        }
        let mut chunk = [0_u8; 8192];
        tokio::select! {
            biased;
            _ = self.close_notify.notified() => Ok(0),
            result = self.read_half.read(&mut chunk) => {
                let n = result?;
                if n > 0 {
                    if self.trace {
                        trace!(
                            "FROM THE WIRE: {n} bytes |{}|",
                            chunk[..n.min(16)]
                                .iter()
                                .map(|b| format!("{b:02x} "))
                                .collect::<String>()
                        );
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                Ok(n)
            }
        }
    }
}
