//! End-to-end scenarios driving the transport chain over real loopback
//! TCP sockets, each playing the broker side by hand with the codec.

use openwire_core::codec::Codec;
use openwire_core::command::{
    Command, CommandBody, ConnectionId, ControlCommand, Response, WireFormatInfo,
};
use openwire_core::transport::byte_endpoint::ByteEndpoint;
use openwire_core::transport::correlator::Correlator;
use openwire_core::transport::dispatch::StateReplayLog;
use openwire_core::transport::failover::FailoverTransport;
use openwire_core::transport::inactivity_monitor::InactivityMonitor;
use openwire_core::transport::{Transport, TransportListener};
use openwire_core::uri::TcpEndpointParams;
use openwire_core::CoreError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

struct RecordingListener {
    commands: Mutex<Vec<Command>>,
    exceptions: AtomicUsize,
    interrupted: AtomicUsize,
    resumed: AtomicUsize,
}

impl RecordingListener {
    fn new() -> Arc<Self> {
        Arc::new(RecordingListener {
            commands: Mutex::new(Vec::new()),
            exceptions: AtomicUsize::new(0),
            interrupted: AtomicUsize::new(0),
            resumed: AtomicUsize::new(0),
        })
    }
}

impl TransportListener for RecordingListener {
    fn on_command(&self, command: Command) {
        self.commands.lock().unwrap().push(command);
    }
    fn on_exception(&self, _error: CoreError) {
        self.exceptions.fetch_add(1, Ordering::SeqCst);
    }
    fn transport_interrupted(&self) {
        self.interrupted.fetch_add(1, Ordering::SeqCst);
    }
    fn transport_resumed(&self) {
        self.resumed.fetch_add(1, Ordering::SeqCst);
    }
}

async fn bind_loopback() -> (TcpListener, TcpEndpointParams) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let params = TcpEndpointParams {
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
    (listener, params)
}

/// Reads and decodes exactly one frame off `stream`.
async fn read_one(codec: &Codec, stream: &mut TcpStream) -> Command {
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 512];
    loop {
        if let Some((cmd, consumed)) = codec.try_decode_from_buffer(&buf).unwrap() {
            buf.drain(..consumed);
            return cmd;
        }
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "peer closed before a full frame arrived");
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn reply_to(codec: &Codec, stream: &mut TcpStream, correlation_id: u32) {
    let reply = codec
        .encode(&Command::new(CommandBody::Response(Response { correlation_id })))
        .unwrap();
    stream.write_all(&reply).await.unwrap();
}

#[tokio::test]
async fn request_gets_matched_to_its_response() {
    let (listener, params) = bind_loopback().await;
    let codec = Codec::new(WireFormatInfo::default());

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let codec = Codec::new(WireFormatInfo::default());
        let request = read_one(&codec, &mut stream).await;
        reply_to(&codec, &mut stream, request.command_id).await;
    });

    let (endpoint, reader) = ByteEndpoint::connect(&params).await.unwrap();
    let correlator = Correlator::new(endpoint, reader, codec);

    let response = correlator
        .request(
            Command::new(CommandBody::ControlCommand(ControlCommand { command: "hello".into() })),
            Some(Duration::from_secs(2)),
        )
        .await
        .unwrap();

    assert_eq!(response.correlation_id(), Some(1));
    server.await.unwrap();
}

#[tokio::test]
async fn concurrent_requests_are_matched_even_when_replies_arrive_reversed() {
    let (listener, params) = bind_loopback().await;
    let codec = Codec::new(WireFormatInfo::default());

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let codec = Codec::new(WireFormatInfo::default());
        let mut ids = Vec::new();
        for _ in 0..3 {
            let request = read_one(&codec, &mut stream).await;
            ids.push(request.command_id);
        }
        // Reply in reverse order: last request issued gets answered first.
        for id in ids.into_iter().rev() {
            reply_to(&codec, &mut stream, id).await;
        }
    });

    let (endpoint, reader) = ByteEndpoint::connect(&params).await.unwrap();
    let correlator = Arc::new(Correlator::new(endpoint, reader, codec));

    let mut joins = Vec::new();
    for label in ["a", "b", "c"] {
        let correlator = correlator.clone();
        joins.push(tokio::spawn(async move {
            correlator
                .request(
                    Command::new(CommandBody::ControlCommand(ControlCommand { command: label.into() })),
                    Some(Duration::from_secs(2)),
                )
                .await
                .unwrap()
        }));
    }

    let mut correlation_ids: Vec<u32> = Vec::new();
    for join in joins {
        correlation_ids.push(join.await.unwrap().correlation_id().unwrap());
    }
    correlation_ids.sort_unstable();
    assert_eq!(correlation_ids, vec![1, 2, 3]);
    server.await.unwrap();
}

#[tokio::test]
async fn timed_out_request_leaves_no_entry_behind_for_a_late_reply() {
    let (listener, params) = bind_loopback().await;
    let codec = Codec::new(WireFormatInfo::default());

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let codec = Codec::new(WireFormatInfo::default());
        let request = read_one(&codec, &mut stream).await;
        // Reply long after the caller's timeout has already fired.
        tokio::time::sleep(Duration::from_millis(200)).await;
        reply_to(&codec, &mut stream, request.command_id).await;
    });

    let (endpoint, reader) = ByteEndpoint::connect(&params).await.unwrap();
    let correlator = Correlator::new(endpoint, reader, codec);

    let outcome = correlator
        .request(
            Command::new(CommandBody::ControlCommand(ControlCommand { command: "slow".into() })),
            Some(Duration::from_millis(50)),
        )
        .await;
    assert!(outcome.is_err());

    // The late reply must not panic or resurrect a completed future; give
    // it time to arrive and be (silently) dropped.
    tokio::time::sleep(Duration::from_millis(250)).await;
    server.await.unwrap();
}

#[tokio::test]
async fn write_watchdog_emits_keep_alive_when_otherwise_idle() {
    let (listener, params) = bind_loopback().await;
    let codec = Codec::new(WireFormatInfo::default());

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let codec = Codec::new(WireFormatInfo::default());
        read_one(&codec, &mut stream).await
    });

    let (endpoint, reader) = ByteEndpoint::connect(&params).await.unwrap();
    let correlator = Correlator::new(endpoint, reader, codec);
    let monitor = InactivityMonitor::new(correlator, Duration::from_millis(150), Duration::ZERO);
    monitor.start().await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .expect("keep-alive never arrived")
        .unwrap();
    assert!(matches!(received.body, CommandBody::KeepAliveInfo(_)));
    monitor.stop().await.unwrap();
}

#[tokio::test]
async fn read_watchdog_reports_a_silent_peer_as_an_exception() {
    let (listener, params) = bind_loopback().await;
    let codec = Codec::new(WireFormatInfo::default());

    // Accept and then go silent: never reply, never disconnect.
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    let (endpoint, reader) = ByteEndpoint::connect(&params).await.unwrap();
    let correlator = Correlator::new(endpoint, reader, codec);
    let monitor = InactivityMonitor::new(correlator, Duration::from_millis(150), Duration::ZERO);
    let listener_handle = RecordingListener::new();
    monitor.set_listener(listener_handle.clone());
    monitor.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(listener_handle.exceptions.load(Ordering::SeqCst) >= 1);
    monitor.stop().await.unwrap();
    server.abort();
}

#[tokio::test]
async fn failover_replays_session_state_in_order_after_severing_the_first_link() {
    let (listener_a, params_a) = bind_loopback().await;
    let (listener_b, params_b) = bind_loopback().await;

    // Endpoint A answers the initial handshake request, then the test
    // drops its socket to simulate the broker going away; endpoint B
    // stays up, accepts the replayed state, and answers a follow-up
    // request so we can confirm the new link is live end-to-end.
    let server_a = tokio::spawn(async move {
        let (mut stream, _) = listener_a.accept().await.unwrap();
        let codec = Codec::new(WireFormatInfo::default());
        let request = read_one(&codec, &mut stream).await;
        reply_to(&codec, &mut stream, request.command_id).await;
        drop(stream);
    });

    let server_b = tokio::spawn(async move {
        let (mut stream, _) = listener_b.accept().await.unwrap();
        let codec = Codec::new(WireFormatInfo::default());
        let mut replayed = Vec::new();
        // Drain whatever the reconnect replays (connection/session info)
        // before the follow-up request lands.
        loop {
            let command = read_one(&codec, &mut stream).await;
            let is_request = command.response_required;
            replayed.push(command.clone());
            if is_request {
                reply_to(&codec, &mut stream, command.command_id).await;
                break;
            }
        }
        replayed
    });

    let params = openwire_core::FailoverParams {
        endpoints: vec![params_a, params_b],
        initial_reconnect_delay: Duration::from_millis(20),
        max_reconnect_delay: Duration::from_millis(100),
        back_off_multiplier: 2.0,
        use_exponential_back_off: false,
        max_reconnect_attempts: Some(30),
        startup_max_reconnect_attempts: None,
        randomize: false,
        backup: false,
        backup_pool_size: 1,
        track_messages: false,
        max_cache_size: 256,
        timeout: None,
        priority_backup: false,
        wire_format: WireFormatInfo::default(),
    };

    let failover = FailoverTransport::new(params);
    let listener_handle = RecordingListener::new();
    failover.set_listener(listener_handle.clone());
    failover.start().await.unwrap();

    // Record one connection's worth of state so the reconnect has
    // something to replay onto the surviving endpoint.
    failover
        .request(
            Command::new(CommandBody::ConnectionInfo(openwire_core::command::ConnectionInfo {
                connection_id: ConnectionId("C:1".into()),
                client_id: Some("client-a".into()),
            })),
            Some(Duration::from_secs(2)),
        )
        .await
        .unwrap();

    server_a.await.unwrap();

    // Give the watcher task time to notice the severed link, reconnect to
    // B, and replay recorded state onto it.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let response = failover
        .request(
            Command::new(CommandBody::ControlCommand(ControlCommand { command: "post-failover".into() })),
            Some(Duration::from_secs(2)),
        )
        .await
        .unwrap();
    assert!(response.correlation_id().is_some());

    let replayed = tokio::time::timeout(Duration::from_secs(2), server_b)
        .await
        .unwrap()
        .unwrap();
    assert!(replayed
        .iter()
        .any(|c| matches!(&c.body, CommandBody::ConnectionInfo(info) if info.connection_id.0 == "C:1")));

    assert!(listener_handle.interrupted.load(Ordering::SeqCst) >= 1);
    assert!(listener_handle.resumed.load(Ordering::SeqCst) >= 1);

    failover.stop().await.unwrap();
}

#[tokio::test]
async fn state_replay_log_drops_entries_removed_before_a_reconnect() {
    let mut log = StateReplayLog::new();
    log.record(&Command::new(CommandBody::ConnectionInfo(
        openwire_core::command::ConnectionInfo {
            connection_id: ConnectionId("C:1".into()),
            client_id: Some("client-a".into()),
        },
    )));
    log.record(&Command::new(CommandBody::ConnectionInfo(
        openwire_core::command::ConnectionInfo {
            connection_id: ConnectionId("C:2".into()),
            client_id: None,
        },
    )));
    log.record(&Command::new(CommandBody::RemoveInfo(openwire_core::command::RemoveInfo {
        target: openwire_core::command::RemovableId::Connection(ConnectionId("C:1".into())),
    })));

    let replayed = log.replay_commands();
    assert_eq!(replayed.len(), 1);
    assert!(matches!(
        &replayed[0].body,
        CommandBody::ConnectionInfo(info) if info.connection_id.0 == "C:2"
    ));
}
