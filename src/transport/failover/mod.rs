//! Failover/backup transport pool: reconnects through the configured
//! endpoint list on transport loss, replays recorded connection/
//! session/producer/consumer state onto the new link, and (when
//! `backup=true`) keeps a small pool of pre-connected spares ready to
//! swap in instead of dialing cold.

use crate::command::{Command, WireFormatInfo};
use crate::error::{CoreError, CoreResult};
use crate::transport::byte_endpoint::ByteEndpoint;
use crate::transport::correlator::Correlator;
use crate::transport::dispatch::StateReplayLog;
use crate::transport::inactivity_monitor::InactivityMonitor;
use crate::transport::{Transport, TransportListener};
use crate::uri::{FailoverParams, TcpEndpointParams};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;

type DynTransport = Arc<dyn Transport>;

async fn connect_endpoint(ep: &TcpEndpointParams, wire_format: WireFormatInfo) -> CoreResult<DynTransport> {
    let (endpoint, reader) = ByteEndpoint::connect(ep).await?;
    let codec = crate::codec::Codec::new(wire_format);
    let correlator = Correlator::new(endpoint, reader, codec);
    let monitor = InactivityMonitor::new(
        correlator,
        Duration::from_millis(wire_format.max_inactivity_duration_ms),
        Duration::from_millis(wire_format.max_inactivity_duration_initial_delay_ms),
    );
    let transport: DynTransport = Arc::new(monitor);
    transport.start().await?;
    Ok(transport)
}

/// Sits between each reconnected transport and the real upward
/// listener: records every command for state replay and signals
/// `lost` the moment the link reports an exception.
struct FailoverListener {
    replay_log: Arc<SyncMutex<StateReplayLog>>,
    upward: Arc<SyncMutex<Option<Arc<dyn TransportListener>>>>,
    lost: Arc<Notify>,
}

impl TransportListener for FailoverListener {
    fn on_command(&self, command: Command) {
        self.replay_log.lock().unwrap().record(&command);
        if let Some(up) = self.upward.lock().unwrap().clone() {
            up.on_command(command);
        }
    }

    fn on_exception(&self, error: CoreError) {
        warn!("failover: underlying transport reported {error}");
        self.lost.notify_one();
    }
}

/// Reconnect backoff, computed the same way whether linear or
/// exponential: `initial * multiplier^sweep`, capped at `max`.
fn backoff_delay(params: &FailoverParams, sweep: u32) -> Duration {
    if !params.use_exponential_back_off {
        return params.initial_reconnect_delay.min(params.max_reconnect_delay);
    }
    let factor = params.back_off_multiplier.powi(sweep as i32);
    let millis = (params.initial_reconnect_delay.as_millis() as f64 * factor) as u64;
    Duration::from_millis(millis).min(params.max_reconnect_delay)
}

/// Every `Arc`-backed piece of failover state, cheap to clone and hand
/// to a spawned `'static` task without borrowing the owning
/// [`FailoverTransport`] across an `.await`.
#[derive(Clone)]
struct FailoverHandles {
    params: Arc<FailoverParams>,
    upward: Arc<SyncMutex<Option<Arc<dyn TransportListener>>>>,
    replay_log: Arc<SyncMutex<StateReplayLog>>,
    current: Arc<AsyncMutex<Option<(usize, DynTransport)>>>,
    backup_pool: Arc<AsyncMutex<Vec<(usize, DynTransport)>>>,
    closed: Arc<AtomicBool>,
    interrupted: Arc<AtomicBool>,
    lost: Arc<Notify>,
    sweep_count: Arc<AtomicU32>,
    close_tx: mpsc::UnboundedSender<DynTransport>,
}

impl FailoverHandles {
    fn dial_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.params.endpoints.len()).collect();
        if self.params.randomize {
            order.shuffle(&mut rand::thread_rng());
        }
        order
    }

    fn new_listener(&self) -> Arc<dyn TransportListener> {
        Arc::new(FailoverListener {
            replay_log: self.replay_log.clone(),
            upward: self.upward.clone(),
            lost: self.lost.clone(),
        })
    }

    /// One pass over every endpoint in `order`, skipping `exclude`.
    /// Returns the first endpoint that accepted a connection.
    async fn dial_sweep(&self, order: &[usize], exclude: Option<usize>) -> Option<(usize, DynTransport)> {
        for &idx in order {
            if Some(idx) == exclude {
                continue;
            }
            match connect_endpoint(&self.params.endpoints[idx], self.params.wire_format).await {
                Ok(transport) => return Some((idx, transport)),
                Err(e) => debug!("failover: endpoint {idx} dial failed: {e}"),
            }
        }
        None
    }

    /// The five-step reconnect protocol: tear down, announce the
    /// interruption once, dial (backup pool first, then a fresh sweep
    /// with backoff between sweeps), replay recorded state, announce
    /// resumption.
    async fn reconnect(&self) -> CoreResult<()> {
        if let Some((_, old)) = self.current.lock().await.take() {
            let _ = self.close_tx.send(old);
        }

        if !self.interrupted.swap(true, Ordering::SeqCst) {
            if let Some(up) = self.upward.lock().unwrap().clone() {
                up.transport_interrupted();
            }
        }

        let max_attempts = self.params.max_reconnect_attempts;
        let order = self.dial_order();
        let mut sweep = 0_u32;
        let connected = loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(CoreError::State("transport closed"));
            }

            if let Some((idx, transport)) = self.backup_pool.lock().await.pop() {
                break (idx, transport);
            }
            if let Some(found) = self.dial_sweep(&order, None).await {
                break found;
            }

            sweep += 1;
            self.sweep_count.store(sweep, Ordering::SeqCst);
            if let Some(max) = max_attempts {
                if sweep >= max {
                    return Err(CoreError::FailoverExhausted(format!(
                        "no endpoint reachable after {sweep} attempts"
                    )));
                }
            }
            tokio::time::sleep(backoff_delay(&self.params, sweep.saturating_sub(1))).await;
        };

        connected.1.set_listener(self.new_listener());
        *self.current.lock().await = Some(connected.clone());

        let replay = self.replay_log.lock().unwrap().replay_commands();
        for command in replay {
            if let Err(e) = connected.1.oneway(command).await {
                warn!("failover: state replay command failed: {e}");
                break;
            }
        }

        self.interrupted.store(false, Ordering::SeqCst);
        self.sweep_count.store(0, Ordering::SeqCst);
        if let Some(up) = self.upward.lock().unwrap().clone() {
            up.transport_resumed();
        }
        Ok(())
    }
}

/// Runs until a fatal reconnect failure or `stop()`; each firing of
/// `lost` is one dropped link to recover from.
fn spawn_watcher(handles: FailoverHandles) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            handles.lost.notified().await;
            if handles.closed.load(Ordering::Acquire) {
                return;
            }
            if let Err(e) = handles.reconnect().await {
                warn!("failover: reconnect gave up: {e}");
                if let Some(up) = handles.upward.lock().unwrap().clone() {
                    up.on_exception(e);
                }
                return;
            }
        }
    })
}

/// Keeps up to `backup_pool_size` spare connections warm on non-current
/// endpoints; when `priority_backup` is set, also tries to dial
/// endpoint 0 and voluntarily forces a reconnect sweep once it's
/// reachable again.
fn spawn_backup_filler(handles: FailoverHandles) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !handles.params.backup && !handles.params.priority_backup {
            return;
        }
        loop {
            if handles.closed.load(Ordering::Acquire) {
                return;
            }
            tokio::time::sleep(Duration::from_secs(5)).await;

            let current_idx = handles.current.lock().await.as_ref().map(|(idx, _)| *idx);

            if handles.params.priority_backup {
                if let Some(idx) = current_idx {
                    if idx != 0 {
                        if let Ok(transport) =
                            connect_endpoint(&handles.params.endpoints[0], handles.params.wire_format).await
                        {
                            let _ = transport.stop().await;
                            handles.lost.notify_one();
                            continue;
                        }
                    }
                }
            }

            if handles.params.backup {
                let mut pool = handles.backup_pool.lock().await;
                if pool.len() >= handles.params.backup_pool_size {
                    continue;
                }
                let order = handles.dial_order();
                for idx in order {
                    if Some(idx) == current_idx || pool.iter().any(|(i, _)| *i == idx) {
                        continue;
                    }
                    if pool.len() >= handles.params.backup_pool_size {
                        break;
                    }
                    if let Ok(transport) =
                        connect_endpoint(&handles.params.endpoints[idx], handles.params.wire_format).await
                    {
                        pool.push((idx, transport));
                    }
                }
            }
        }
    })
}

pub struct FailoverTransport {
    handles: FailoverHandles,
    close_task: AsyncMutex<Option<JoinHandle<()>>>,
    watcher_task: AsyncMutex<Option<JoinHandle<()>>>,
    backup_filler_task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl FailoverTransport {
    pub fn new(params: FailoverParams) -> Self {
        let (close_tx, mut close_rx) = mpsc::unbounded_channel::<DynTransport>();
        let close_task = tokio::spawn(async move {
            while let Some(transport) = close_rx.recv().await {
                let _ = transport.stop().await;
            }
        });
        let handles = FailoverHandles {
            params: Arc::new(params),
            upward: Arc::new(SyncMutex::new(None)),
            replay_log: Arc::new(SyncMutex::new(StateReplayLog::new())),
            current: Arc::new(AsyncMutex::new(None)),
            backup_pool: Arc::new(AsyncMutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            interrupted: Arc::new(AtomicBool::new(false)),
            lost: Arc::new(Notify::new()),
            sweep_count: Arc::new(AtomicU32::new(0)),
            close_tx,
        };
        FailoverTransport {
            handles,
            close_task: AsyncMutex::new(Some(close_task)),
            watcher_task: AsyncMutex::new(None),
            backup_filler_task: AsyncMutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for FailoverTransport {
    async fn start(&self) -> CoreResult<()> {
        let order = self.handles.dial_order();
        let connected = self
            .handles
            .dial_sweep(&order, None)
            .await
            .ok_or_else(|| CoreError::FailoverExhausted("no endpoint reachable on startup".into()))?;
        connected.1.set_listener(self.handles.new_listener());
        *self.handles.current.lock().await = Some(connected);

        *self.watcher_task.lock().await = Some(spawn_watcher(self.handles.clone()));
        *self.backup_filler_task.lock().await = Some(spawn_backup_filler(self.handles.clone()));
        Ok(())
    }

    async fn stop(&self) -> CoreResult<()> {
        self.handles.closed.store(true, Ordering::Release);
        self.handles.lost.notify_waiters();

        if let Some(task) = self.watcher_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.backup_filler_task.lock().await.take() {
            task.abort();
        }
        if let Some((_, transport)) = self.handles.current.lock().await.take() {
            transport.stop().await?;
        }
        for (_, transport) in self.handles.backup_pool.lock().await.drain(..) {
            let _ = transport.stop().await;
        }
        if let Some(task) = self.close_task.lock().await.take() {
            task.abort();
        }
        Ok(())
    }

    async fn oneway(&self, command: Command) -> CoreResult<()> {
        self.handles.replay_log.lock().unwrap().record(&command);
        let guard = self.handles.current.lock().await;
        match guard.as_ref() {
            Some((_, transport)) => transport.oneway(command).await,
            None => Err(CoreError::State("no connected transport")),
        }
    }

    async fn request(&self, command: Command, timeout: Option<std::time::Duration>) -> CoreResult<Command> {
        self.handles.replay_log.lock().unwrap().record(&command);
        let transport = {
            let guard = self.handles.current.lock().await;
            match guard.as_ref() {
                Some((_, transport)) => transport.clone(),
                None => return Err(CoreError::State("no connected transport")),
            }
        };
        transport.request(command, timeout).await
    }

    fn set_listener(&self, listener: Arc<dyn TransportListener>) {
        *self.handles.upward.lock().unwrap() = Some(listener);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn base_params() -> FailoverParams {
        FailoverParams {
            endpoints: vec![],
            initial_reconnect_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_millis(100),
            back_off_multiplier: 2.0,
            use_exponential_back_off: true,
            max_reconnect_attempts: None,
            startup_max_reconnect_attempts: None,
            randomize: false,
            backup: false,
            backup_pool_size: 1,
            track_messages: false,
            max_cache_size: 256,
            timeout: None,
            priority_backup: false,
            wire_format: WireFormatInfo::default(),
        }
    }

    #[test]
    fn exponential_backoff_grows_and_caps() {
        let params = base_params();
        assert_eq!(backoff_delay(&params, 0), Duration::from_millis(10));
        assert_eq!(backoff_delay(&params, 1), Duration::from_millis(20));
        assert_eq!(backoff_delay(&params, 10), Duration::from_millis(100));
    }

    #[test]
    fn linear_backoff_holds_steady() {
        let mut params = base_params();
        params.use_exponential_back_off = false;
        params.initial_reconnect_delay = Duration::from_millis(25);
        assert_eq!(backoff_delay(&params, 0), Duration::from_millis(25));
        assert_eq!(backoff_delay(&params, 5), Duration::from_millis(25));
    }
}
