//! Inactivity monitor: a write watchdog that sends `KeepAliveInfo` when
//! nothing has been written for half the configured duration, and a
//! read watchdog that fails the link when nothing has been read for
//! the full duration. Both watchdogs stay quiet until the negotiated
//! initial delay has elapsed. A duration of zero disables both
//! watchdogs.

use crate::command::{Command, CommandBody, KeepAliveInfo};
use crate::error::{CoreError, CoreResult};
use crate::transport::{Transport, TransportListener};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

fn now_millis(epoch: Instant) -> u64 {
    Instant::now().duration_since(epoch).as_millis() as u64
}

struct Clock {
    epoch: Instant,
    last_write_ms: AtomicU64,
    last_read_ms: AtomicU64,
}

impl Clock {
    fn new() -> Self {
        let epoch = Instant::now();
        Clock {
            epoch,
            last_write_ms: AtomicU64::new(0),
            last_read_ms: AtomicU64::new(0),
        }
    }

    fn mark_write(&self) {
        self.last_write_ms.store(now_millis(self.epoch), Ordering::Relaxed);
    }

    fn mark_read(&self) {
        self.last_read_ms.store(now_millis(self.epoch), Ordering::Relaxed);
    }

    fn millis_since_write(&self) -> u64 {
        now_millis(self.epoch).saturating_sub(self.last_write_ms.load(Ordering::Relaxed))
    }

    fn millis_since_read(&self) -> u64 {
        now_millis(self.epoch).saturating_sub(self.last_read_ms.load(Ordering::Relaxed))
    }
}

/// Intercepts inbound commands to swallow `KeepAliveInfo` frames (they
/// exist solely to reset the read watchdog) and to fail the link, via
/// `on_exception`, once the read watchdog expires.
struct MonitorListener {
    clock: Arc<Clock>,
    upward: Arc<std::sync::Mutex<Option<Arc<dyn TransportListener>>>>,
}

impl TransportListener for MonitorListener {
    fn on_command(&self, command: Command) {
        self.clock.mark_read();
        if matches!(command.body, CommandBody::KeepAliveInfo(_)) {
            return;
        }
        if let Some(up) = self.upward.lock().unwrap().clone() {
            up.on_command(command);
        }
    }

    fn on_exception(&self, error: CoreError) {
        if let Some(up) = self.upward.lock().unwrap().clone() {
            up.on_exception(error);
        }
    }

    fn transport_interrupted(&self) {
        if let Some(up) = self.upward.lock().unwrap().clone() {
            up.transport_interrupted();
        }
    }

    fn transport_resumed(&self) {
        if let Some(up) = self.upward.lock().unwrap().clone() {
            up.transport_resumed();
        }
    }
}

/// Wraps an inner [`Transport`] with a keep-alive timer task. `duration`
/// of `Duration::ZERO` disables both watchdogs entirely (no timer task
/// is spawned). `initial_delay` is the negotiated grace period before
/// either watchdog's first tick, covering the time a slow peer may take
/// to finish its own startup work right after connect.
pub struct InactivityMonitor<T: Transport + 'static> {
    inner: Arc<T>,
    clock: Arc<Clock>,
    upward: Arc<std::sync::Mutex<Option<Arc<dyn TransportListener>>>>,
    listener: Arc<MonitorListener>,
    timer_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    duration: Duration,
    initial_delay: Duration,
}

impl<T: Transport + 'static> InactivityMonitor<T> {
    pub fn new(inner: T, duration: Duration, initial_delay: Duration) -> Self {
        let clock = Arc::new(Clock::new());
        let upward: Arc<std::sync::Mutex<Option<Arc<dyn TransportListener>>>> =
            Arc::new(std::sync::Mutex::new(None));
        let listener = Arc::new(MonitorListener {
            clock: clock.clone(),
            upward: upward.clone(),
        });
        InactivityMonitor {
            inner: Arc::new(inner),
            clock,
            upward,
            listener,
            timer_task: std::sync::Mutex::new(None),
            duration,
            initial_delay,
        }
    }
}

#[async_trait]
impl<T: Transport + 'static> Transport for InactivityMonitor<T> {
    async fn start(&self) -> CoreResult<()> {
        self.inner.set_listener(self.listener.clone());
        self.inner.start().await?;

        if self.duration.is_zero() {
            return Ok(());
        }

        let inner = self.inner.clone();
        let clock = self.clock.clone();
        let upward = self.upward.clone();
        let write_check_every = self.duration / 2;
        let duration = self.duration;
        let initial_delay = self.initial_delay;
        let task = tokio::spawn(async move {
            if !initial_delay.is_zero() {
                tokio::time::sleep(initial_delay).await;
            }
            clock.mark_write();
            clock.mark_read();
            loop {
                tokio::time::sleep(write_check_every.max(Duration::from_millis(50))).await;
                if clock.millis_since_write() >= write_check_every.as_millis() as u64 {
                    if inner
                        .oneway(Command::new(CommandBody::KeepAliveInfo(KeepAliveInfo)))
                        .await
                        .is_err()
                    {
                        return;
                    }
                    clock.mark_write();
                }
                if clock.millis_since_read() >= duration.as_millis() as u64 {
                    let err = CoreError::Io {
                        source: std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "no data received within the inactivity duration",
                        ),
                    };
                    if let Some(up) = upward.lock().unwrap().clone() {
                        up.on_exception(err);
                    }
                    return;
                }
            }
        });
        *self.timer_task.lock().unwrap() = Some(task);
        Ok(())
    }

    async fn stop(&self) -> CoreResult<()> {
        if let Some(task) = self.timer_task.lock().unwrap().take() {
            task.abort();
        }
        self.inner.stop().await
    }

    async fn oneway(&self, command: Command) -> CoreResult<()> {
        let result = self.inner.oneway(command).await;
        if result.is_ok() {
            self.clock.mark_write();
        }
        result
    }

    async fn request(&self, command: Command, timeout: Option<Duration>) -> CoreResult<Command> {
        let result = self.inner.request(command, timeout).await;
        if result.is_ok() {
            self.clock.mark_write();
        }
        result
    }

    fn set_listener(&self, listener: Arc<dyn TransportListener>) {
        *self.upward.lock().unwrap() = Some(listener);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::command::ControlCommand;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex as AsyncMutex;

    struct FakeTransport {
        sent: AsyncMutex<Vec<Command>>,
        listener: std::sync::Mutex<Option<Arc<dyn TransportListener>>>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn start(&self) -> CoreResult<()> {
            Ok(())
        }
        async fn stop(&self) -> CoreResult<()> {
            Ok(())
        }
        async fn oneway(&self, command: Command) -> CoreResult<()> {
            self.sent.lock().await.push(command);
            Ok(())
        }
        async fn request(&self, _command: Command, _timeout: Option<Duration>) -> CoreResult<Command> {
            unimplemented!()
        }
        fn set_listener(&self, listener: Arc<dyn TransportListener>) {
            *self.listener.lock().unwrap() = Some(listener);
        }
    }

    struct CountingListener {
        exceptions: AtomicUsize,
    }

    impl TransportListener for CountingListener {
        fn on_command(&self, _command: Command) {}
        fn on_exception(&self, _error: CoreError) {
            self.exceptions.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn write_watchdog_sends_keep_alive_after_half_the_duration() {
        let fake = FakeTransport {
            sent: AsyncMutex::new(Vec::new()),
            listener: std::sync::Mutex::new(None),
        };
        let monitor = InactivityMonitor::new(fake, Duration::from_millis(200), Duration::ZERO);
        monitor.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        monitor.stop().await.unwrap();

        let sent = monitor.inner.sent.lock().await;
        assert!(sent
            .iter()
            .any(|c| matches!(c.body, CommandBody::KeepAliveInfo(_))));
    }

    #[tokio::test]
    async fn watchdogs_stay_quiet_until_the_initial_delay_elapses() {
        let fake = FakeTransport {
            sent: AsyncMutex::new(Vec::new()),
            listener: std::sync::Mutex::new(None),
        };
        let monitor =
            InactivityMonitor::new(fake, Duration::from_millis(100), Duration::from_millis(250));
        monitor.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(monitor.inner.sent.lock().await.is_empty());
        monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn keep_alive_frames_are_swallowed_and_never_forwarded() {
        let fake = FakeTransport {
            sent: AsyncMutex::new(Vec::new()),
            listener: std::sync::Mutex::new(None),
        };
        let monitor = InactivityMonitor::new(fake, Duration::ZERO, Duration::ZERO);
        let listener = Arc::new(CountingListener {
            exceptions: AtomicUsize::new(0),
        });
        monitor.set_listener(listener.clone());
        monitor.start().await.unwrap();

        monitor
            .listener
            .on_command(Command::new(CommandBody::KeepAliveInfo(KeepAliveInfo)));
        monitor
            .listener
            .on_command(Command::new(CommandBody::ControlCommand(ControlCommand {
                command: "hi".into(),
            })));

        assert_eq!(listener.exceptions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn zero_duration_disables_both_watchdogs() {
        let fake = FakeTransport {
            sent: AsyncMutex::new(Vec::new()),
            listener: std::sync::Mutex::new(None),
        };
        let monitor = InactivityMonitor::new(fake, Duration::ZERO, Duration::ZERO);
        monitor.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(monitor.timer_task.lock().unwrap().is_none());
        monitor.stop().await.unwrap();
    }
}
