//! I/O pump: the single reader task that decodes frames via the codec
//! and dispatches them to `onCommand`/`onException`; writes go straight
//! to the byte endpoint, which serialises them.

use crate::codec::Codec;
use crate::command::Command;
use crate::error::CoreError;
use crate::transport::byte_endpoint::{ByteEndpoint, ByteEndpointReader};
use crate::transport::TransportListener;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Bounds how large the pump's reassembly buffer grows before a frame
/// completes; guards against a peer that never finishes a declared
/// frame from exhausting memory.
const MAX_REASSEMBLY_BYTES: usize = 64 * 1024 * 1024;

pub struct IoPump {
    pub endpoint: Arc<ByteEndpoint>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl IoPump {
    /// Spawns the reader task. `on_command`/`on_exception` are invoked
    /// from that task; `on_exception` fires at most once, after which
    /// the task exits.
    pub fn spawn(
        endpoint: Arc<ByteEndpoint>,
        mut reader: ByteEndpointReader,
        codec: Codec,
        listener: Arc<dyn TransportListener>,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut buf: Vec<u8> = Vec::new();
            let mut offset = 0_usize;
            loop {
                match codec.try_decode_from_buffer(&buf[offset..]) {
                    Ok(Some((cmd, consumed))) => {
                        offset += consumed;
                        if offset == buf.len() {
                            buf.clear();
                            offset = 0;
                        } else if offset > MAX_REASSEMBLY_BYTES {
                            buf.drain(0..offset);
                            offset = 0;
                        }
                        dispatch_command(cmd, &listener);
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        listener.on_exception(e);
                        return;
                    }
                }

                if buf.len() - offset > MAX_REASSEMBLY_BYTES {
                    listener.on_exception(CoreError::protocol(
                        "frame exceeded the maximum reassembly buffer size",
                    ));
                    return;
                }

                match reader.read_more(&mut buf).await {
                    Ok(0) => {
                        listener.on_exception(CoreError::Io {
                            source: std::io::Error::new(
                                std::io::ErrorKind::UnexpectedEof,
                                "connection closed by peer",
                            ),
                        });
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        listener.on_exception(e);
                        return;
                    }
                }
            }
        });
        IoPump {
            endpoint,
            reader_task: Mutex::new(Some(task)),
        }
    }

    pub async fn write(&self, codec: &Codec, command: &Command) -> crate::error::CoreResult<()> {
        let frame = codec.encode(command)?;
        self.endpoint.write_frame(&frame).await
    }

    /// Idempotent: closes the endpoint (unblocking the reader) and waits
    /// for the reader task to exit.
    pub async fn close(&self) {
        self.endpoint.close();
        if let Some(task) = self.reader_task.lock().await.take() {
            let _ = task.await;
        }
    }
}

fn dispatch_command(command: Command, listener: &Arc<dyn TransportListener>) {
    listener.on_command(command);
}
