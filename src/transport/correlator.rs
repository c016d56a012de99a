//! Response correlator: assigns monotonically increasing command ids,
//! holds a `FutureResponse` per outstanding request, completes it by
//! `correlationId` when a response arrives, and fails every outstanding
//! future exactly once on transport loss (the prior-error latch).

use crate::codec::Codec;
use crate::command::{Command, CommandBody, ExceptionResponse};
use crate::error::{CoreError, CoreResult};
use crate::transport::byte_endpoint::{ByteEndpoint, ByteEndpointReader};
use crate::transport::io_pump::IoPump;
use crate::transport::{Transport, TransportListener};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::time::Duration;

type FutureResponse = oneshot::Sender<CoreResult<Command>>;

struct CorrelatorInner {
    next_id: AtomicU32,
    requests: Mutex<HashMap<u32, FutureResponse>>,
    prior_error: Mutex<Option<CoreError>>,
    closed: AtomicBool,
    upward: Mutex<Option<Arc<dyn TransportListener>>>,
}

/// Wraps [`CorrelatorInner`] so it can be handed to [`IoPump::spawn`] as
/// the reader task's listener before the [`Correlator`] itself exists.
struct CorrelatorReaderListener {
    inner: Arc<CorrelatorInner>,
}

impl TransportListener for CorrelatorReaderListener {
    fn on_command(&self, command: Command) {
        if command.is_response() {
            let correlation_id = command.correlation_id().expect("is_response implies an id");
            let sender = self.inner.requests.lock().unwrap().remove(&correlation_id);
            if let Some(sender) = sender {
                let result = match &command.body {
                    CommandBody::ExceptionResponse(ExceptionResponse {
                        exception_class,
                        message,
                        ..
                    }) => Err(CoreError::protocol(format!("{exception_class}: {message}"))),
                    _ => Ok(command),
                };
                let _ = sender.send(result);
            }
            // A late response with no matching entry is silently dropped
            // — the only intentional silent path (error handling design).
            return;
        }
        if let Some(up) = self.inner.upward.lock().unwrap().clone() {
            up.on_command(command);
        }
    }

    fn on_exception(&self, error: CoreError) {
        self.inner.fail_all(error.shallow_clone());
        if let Some(up) = self.inner.upward.lock().unwrap().clone() {
            up.on_exception(error);
        }
    }

    fn transport_interrupted(&self) {
        if let Some(up) = self.inner.upward.lock().unwrap().clone() {
            up.transport_interrupted();
        }
    }

    fn transport_resumed(&self) {
        if let Some(up) = self.inner.upward.lock().unwrap().clone() {
            up.transport_resumed();
        }
    }
}

impl CorrelatorInner {
    fn fail_all(&self, error: CoreError) {
        {
            let mut prior = self.prior_error.lock().unwrap();
            if prior.is_none() {
                *prior = Some(error.shallow_clone());
            }
        }
        let outstanding: Vec<_> = self.requests.lock().unwrap().drain().collect();
        for (_, sender) in outstanding {
            let _ = sender.send(Err(error.shallow_clone()));
        }
    }
}

/// Owns the I/O pump and byte endpoint beneath it; the inactivity
/// monitor and failover pool wrap a `Correlator` as their "next" link.
pub struct Correlator {
    inner: Arc<CorrelatorInner>,
    pump: IoPump,
    codec: Codec,
}

impl Correlator {
    pub fn new(endpoint: ByteEndpoint, reader: ByteEndpointReader, codec: Codec) -> Self {
        let inner = Arc::new(CorrelatorInner {
            next_id: AtomicU32::new(1),
            requests: Mutex::new(HashMap::new()),
            prior_error: Mutex::new(None),
            closed: AtomicBool::new(false),
            upward: Mutex::new(None),
        });
        let endpoint = Arc::new(endpoint);
        let listener = Arc::new(CorrelatorReaderListener {
            inner: inner.clone(),
        });
        let pump = IoPump::spawn(endpoint, reader, codec.clone(), listener);
        Correlator { inner, pump, codec }
    }

    fn check_live(&self) -> CoreResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(CoreError::State("transport closed"));
        }
        if let Some(err) = self.inner.prior_error.lock().unwrap().as_ref() {
            return Err(err.shallow_clone());
        }
        Ok(())
    }

    fn next_command_id(&self) -> u32 {
        self.inner.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for Correlator {
    async fn start(&self) -> CoreResult<()> {
        Ok(())
    }

    async fn stop(&self) -> CoreResult<()> {
        self.inner.closed.store(true, Ordering::Release);
        self.inner
            .fail_all(CoreError::Interrupted("transport stopped".into()));
        self.pump.close().await;
        Ok(())
    }

    async fn oneway(&self, mut command: Command) -> CoreResult<()> {
        self.check_live()?;
        command.command_id = self.next_command_id();
        command.response_required = false;
        self.pump.write(&self.codec, &command).await
    }

    async fn request(&self, mut command: Command, timeout: Option<Duration>) -> CoreResult<Command> {
        self.check_live()?;
        let id = self.next_command_id();
        command.command_id = id;
        command.response_required = true;

        let (tx, rx) = oneshot::channel();
        self.inner.requests.lock().unwrap().insert(id, tx);

        if let Err(e) = self.pump.write(&self.codec, &command).await {
            self.inner.requests.lock().unwrap().remove(&id);
            return Err(e);
        }

        match timeout {
            Some(d) => match tokio::time::timeout(d, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(CoreError::Interrupted("correlator shut down".into())),
                Err(_) => {
                    self.inner.requests.lock().unwrap().remove(&id);
                    Err(CoreError::Timeout)
                }
            },
            None => rx
                .await
                .map_err(|_| CoreError::Interrupted("correlator shut down".into()))?,
        }
    }

    fn set_listener(&self, listener: Arc<dyn TransportListener>) {
        *self.inner.upward.lock().unwrap() = Some(listener);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::command::{ControlCommand, Response};
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    struct RecordingListener {
        commands: Mutex<Vec<Command>>,
        exceptions: AtomicUsize,
    }

    impl TransportListener for RecordingListener {
        fn on_command(&self, command: Command) {
            self.commands.lock().unwrap().push(command);
        }
        fn on_exception(&self, _error: CoreError) {
            self.exceptions.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn loopback_pair() -> (Correlator, TcpStream) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let params = crate::uri::TcpEndpointParams {
            host: addr.ip().to_string(),
            port: addr.port(),
            connect_timeout: None,
            so_linger: None,
            so_keep_alive: None,
            so_receive_buffer_size: None,
            so_send_buffer_size: None,
            tcp_no_delay: true,
            input_buffer_size: 8192,
            output_buffer_size: 8192,
            trace: false,
        };
        let (client_result, server_result) =
            tokio::join!(ByteEndpoint::connect(&params), async {
                listener.accept().await.unwrap().0
            });
        let (endpoint, reader) = client_result.unwrap();
        let codec = Codec::new(crate::command::WireFormatInfo::default());
        let correlator = Correlator::new(endpoint, reader, codec);
        (correlator, server_result)
    }

    #[tokio::test]
    async fn oneway_assigns_strictly_increasing_ids() {
        let (correlator, mut server) = loopback_pair().await;
        correlator
            .oneway(Command::new(CommandBody::ControlCommand(ControlCommand {
                command: "a".into(),
            })))
            .await
            .unwrap();
        correlator
            .oneway(Command::new(CommandBody::ControlCommand(ControlCommand {
                command: "b".into(),
            })))
            .await
            .unwrap();

        let codec = Codec::new(crate::command::WireFormatInfo::default());
        let mut buf = Vec::new();
        let mut chunk = [0_u8; 512];
        // Read two frames worth off the server side.
        while codec.try_decode_from_buffer(&buf).unwrap().is_none() {
            let n = server.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
        }
        let (first, consumed) = codec.try_decode_from_buffer(&buf).unwrap().unwrap();
        buf.drain(0..consumed);
        while codec.try_decode_from_buffer(&buf).unwrap().is_none() {
            let n = server.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
        }
        let (second, _) = codec.try_decode_from_buffer(&buf).unwrap().unwrap();

        assert_eq!(first.command_id, 1);
        assert_eq!(second.command_id, 2);
    }

    #[tokio::test]
    async fn request_completes_from_a_matching_response() {
        let (correlator, mut server) = loopback_pair().await;
        let codec = Codec::new(crate::command::WireFormatInfo::default());

        let request_fut = correlator.request(
            Command::new(CommandBody::ControlCommand(ControlCommand {
                command: "ping".into(),
            })),
            Some(Duration::from_secs(2)),
        );

        let server_task = async {
            let mut buf = Vec::new();
            let mut chunk = [0_u8; 512];
            loop {
                if let Some((cmd, _)) = codec.try_decode_from_buffer(&buf).unwrap() {
                    let reply = codec
                        .encode(&Command::new(CommandBody::Response(Response {
                            correlation_id: cmd.command_id,
                        })))
                        .unwrap();
                    server.write_all(&reply).await.unwrap();
                    return;
                }
                let n = server.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
            }
        };

        let (response, _) = tokio::join!(request_fut, server_task);
        let response = response.unwrap();
        assert_eq!(response.correlation_id(), Some(1));
        assert!(correlator.inner.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn timeout_leaves_no_entry_in_the_request_map() {
        let (correlator, _server) = loopback_pair().await;
        let result = correlator
            .request(
                Command::new(CommandBody::ControlCommand(ControlCommand {
                    command: "ping".into(),
                })),
                Some(Duration::from_millis(30)),
            )
            .await;
        assert!(matches!(result, Err(CoreError::Timeout)));
        assert!(correlator.inner.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn on_exception_fails_every_outstanding_future_and_empties_the_map() {
        let (correlator, _server) = loopback_pair().await;
        let listener = Arc::new(RecordingListener {
            commands: Mutex::new(Vec::new()),
            exceptions: AtomicUsize::new(0),
        });
        correlator.set_listener(listener.clone());

        let request_fut = correlator.request(
            Command::new(CommandBody::ControlCommand(ControlCommand {
                command: "ping".into(),
            })),
            Some(Duration::from_secs(5)),
        );

        // Give the write a moment to register the request before failing it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        correlator
            .inner
            .fail_all(CoreError::Interrupted("simulated loss".into()));

        let result = request_fut.await;
        assert!(result.is_err());
        assert!(correlator.inner.requests.lock().unwrap().is_empty());
    }
}
