//! Exclusive background ambience loop
//!
//! [`AmbiencePlayer`] is a cheap, cloneable handle to a controller task. The
//! controller owns at most one loop session at a time and processes
//! commands strictly in order, so a `start` always runs after the previous
//! session's drain has finished.
//!
//! ```text
//!  Idle ──start(urls)──► Looping ──stop()/start(..)──► drain ──► Idle
//! ```
//!
//! A session loop picks a URL at random, plays it through the
//! [`ClipPlayer`], waits a short cancellable gap and repeats until its
//! cancellation token fires. A failing URL is logged and skipped after a
//! back-off.

use crate::error::AmbienceError;
use crate::player::ClipPlayer;
use melo_common::config::AmbienceConfig;
use melo_common::events::{EventBus, MeloEvent};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Controller timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmbienceSettings {
    /// Minimum time `stop()` waits after cancelling
    pub grace: Duration,
    /// Maximum time `stop()` waits before aborting the loop task
    pub drain_timeout: Duration,
    pub inter_clip_gap: Duration,
    pub failure_backoff: Duration,
}

impl Default for AmbienceSettings {
    fn default() -> Self {
        Self::from(&AmbienceConfig::default())
    }
}

impl From<&AmbienceConfig> for AmbienceSettings {
    fn from(config: &AmbienceConfig) -> Self {
        Self {
            grace: Duration::from_millis(config.grace_ms),
            drain_timeout: Duration::from_millis(config.drain_timeout_ms),
            inter_clip_gap: Duration::from_millis(config.inter_clip_gap_ms),
            failure_backoff: Duration::from_millis(config.failure_backoff_ms),
        }
    }
}

/// Published controller state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AmbienceState {
    #[default]
    Idle,
    Looping { session_id: Uuid, urls: Vec<String> },
}

impl AmbienceState {
    pub fn is_looping(&self) -> bool {
        matches!(self, AmbienceState::Looping { .. })
    }

    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            AmbienceState::Looping { session_id, .. } => Some(*session_id),
            AmbienceState::Idle => None,
        }
    }
}

/// Commands for the controller task
enum AmbienceCommand {
    Start {
        urls: Vec<String>,
        ack: oneshot::Sender<Option<Uuid>>,
    },
    Stop {
        ack: oneshot::Sender<()>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Handle to the ambience controller task
#[derive(Clone)]
pub struct AmbiencePlayer {
    command_tx: mpsc::Sender<AmbienceCommand>,
    state_rx: watch::Receiver<AmbienceState>,
    live_sessions: Arc<AtomicUsize>,
}

impl AmbiencePlayer {
    /// Spawn the controller task on the current tokio runtime
    pub fn spawn(player: Arc<dyn ClipPlayer>, settings: AmbienceSettings, event_bus: EventBus) -> Self {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (state_tx, state_rx) = watch::channel(AmbienceState::Idle);
        let live_sessions = Arc::new(AtomicUsize::new(0));

        let controller = Controller {
            player,
            settings,
            event_bus,
            state_tx,
            live_sessions: Arc::clone(&live_sessions),
            active: None,
        };
        tokio::spawn(controller.run(command_rx));

        Self {
            command_tx,
            state_rx,
            live_sessions,
        }
    }

    /// Replace the current session with one looping over `urls`
    ///
    /// Any running session is drained first. An empty `urls` only stops
    /// and returns `None`.
    pub async fn start(&self, urls: Vec<String>) -> Result<Option<Uuid>, AmbienceError> {
        let (ack, rx) = oneshot::channel();
        self.send(AmbienceCommand::Start { urls, ack }).await?;
        rx.await.map_err(|_| AmbienceError::ControllerGone)
    }

    /// Drain the current session, if any; returns once it has ended
    pub async fn stop(&self) -> Result<(), AmbienceError> {
        let (ack, rx) = oneshot::channel();
        self.send(AmbienceCommand::Stop { ack }).await?;
        rx.await.map_err(|_| AmbienceError::ControllerGone)
    }

    /// Drain and terminate the controller task
    pub async fn shutdown(&self) -> Result<(), AmbienceError> {
        let (ack, rx) = oneshot::channel();
        self.send(AmbienceCommand::Shutdown { ack }).await?;
        rx.await.map_err(|_| AmbienceError::ControllerGone)
    }

    pub fn state(&self) -> AmbienceState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<AmbienceState> {
        self.state_rx.clone()
    }

    /// Number of loop tasks currently alive (never more than 1)
    pub fn live_sessions(&self) -> usize {
        self.live_sessions.load(Ordering::SeqCst)
    }

    async fn send(&self, command: AmbienceCommand) -> Result<(), AmbienceError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| AmbienceError::ControllerGone)
    }
}

struct ActiveSession {
    id: Uuid,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Controller {
    player: Arc<dyn ClipPlayer>,
    settings: AmbienceSettings,
    event_bus: EventBus,
    state_tx: watch::Sender<AmbienceState>,
    live_sessions: Arc<AtomicUsize>,
    active: Option<ActiveSession>,
}

impl Controller {
    async fn run(mut self, mut command_rx: mpsc::Receiver<AmbienceCommand>) {
        debug!("Ambience controller started");

        while let Some(command) = command_rx.recv().await {
            match command {
                AmbienceCommand::Start { urls, ack } => {
                    self.drain().await;
                    let session_id = if urls.is_empty() {
                        debug!("Ambience start with no URLs; staying idle");
                        None
                    } else {
                        Some(self.launch(urls))
                    };
                    let _ = ack.send(session_id);
                }
                AmbienceCommand::Stop { ack } => {
                    self.drain().await;
                    let _ = ack.send(());
                }
                AmbienceCommand::Shutdown { ack } => {
                    self.drain().await;
                    let _ = ack.send(());
                    debug!("Ambience controller shut down");
                    return;
                }
            }
        }

        // Every handle dropped
        self.drain().await;
    }

    fn launch(&mut self, urls: Vec<String>) -> Uuid {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let guard = LiveGuard::new(Arc::clone(&self.live_sessions));

        info!(session_id = %id, url_count = urls.len(), "Ambience session starting");

        self.state_tx.send_replace(AmbienceState::Looping {
            session_id: id,
            urls: urls.clone(),
        });

        let handle = tokio::spawn(run_session(
            id,
            urls,
            Arc::clone(&self.player),
            cancel.clone(),
            self.settings,
            guard,
        ));

        self.active = Some(ActiveSession { id, cancel, handle });
        id
    }

    /// Cancel the active session and wait for its loop task to end
    async fn drain(&mut self) {
        let Some(mut session) = self.active.take() else {
            return;
        };

        let started = Instant::now();
        session.cancel.cancel();

        if tokio::time::timeout(self.settings.drain_timeout, &mut session.handle)
            .await
            .is_err()
        {
            warn!(
                session_id = %session.id,
                timeout_ms = self.settings.drain_timeout.as_millis() as u64,
                "Ambience loop ignored cancellation; aborting"
            );
            session.handle.abort();
            let _ = session.handle.await;
        }

        let elapsed = started.elapsed();
        if elapsed < self.settings.grace {
            tokio::time::sleep(self.settings.grace - elapsed).await;
        }

        self.state_tx.send_replace(AmbienceState::Idle);
        info!(session_id = %session.id, "Ambience session stopped");
        self.event_bus.emit_lossy(MeloEvent::AmbienceStopped {
            session_id: session.id,
            timestamp: chrono::Utc::now(),
        });
    }
}

/// Counts a loop task as live until it is dropped (completion or abort)
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn run_session(
    session_id: Uuid,
    urls: Vec<String>,
    player: Arc<dyn ClipPlayer>,
    cancel: CancellationToken,
    settings: AmbienceSettings,
    _guard: LiveGuard,
) {
    let mut rng = StdRng::from_entropy();

    while !cancel.is_cancelled() {
        let Some(url) = urls.choose(&mut rng) else {
            break;
        };

        debug!(session_id = %session_id, url = %url, "Playing ambience clip");

        let pause = match player.play(url, &cancel).await {
            Ok(()) => settings.inter_clip_gap,
            Err(e) => {
                warn!(session_id = %session_id, url = %url, error = %e, "Ambience clip failed");
                settings.failure_backoff
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }

    debug!(session_id = %session_id, "Ambience loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClipError;
    use async_trait::async_trait;

    /// Plays every clip for one second, honouring cancellation
    struct SilentPlayer;

    #[async_trait]
    impl ClipPlayer for SilentPlayer {
        async fn play(&self, _url: &str, cancel: &CancellationToken) -> Result<(), ClipError> {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
            Ok(())
        }
    }

    /// Ignores cancellation entirely
    struct StubbornPlayer;

    #[async_trait]
    impl ClipPlayer for StubbornPlayer {
        async fn play(&self, _url: &str, _cancel: &CancellationToken) -> Result<(), ClipError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[test]
    fn test_settings_from_config() {
        let settings = AmbienceSettings::default();
        assert_eq!(settings.grace, Duration::from_millis(200));
        assert_eq!(settings.drain_timeout, Duration::from_secs(2));
        assert_eq!(settings.inter_clip_gap, Duration::from_millis(100));
        assert_eq!(settings.failure_backoff, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_then_stop() {
        let ambience = AmbiencePlayer::spawn(Arc::new(SilentPlayer), AmbienceSettings::default(), EventBus::default());

        let id = ambience.start(vec!["a".to_string()]).await.unwrap().unwrap();
        assert_eq!(ambience.state().session_id(), Some(id));
        assert_eq!(ambience.live_sessions(), 1);

        ambience.stop().await.unwrap();
        assert_eq!(ambience.state(), AmbienceState::Idle);
        assert_eq!(ambience.live_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_at_least_grace() {
        let ambience = AmbiencePlayer::spawn(Arc::new(SilentPlayer), AmbienceSettings::default(), EventBus::default());
        ambience.start(vec!["a".to_string()]).await.unwrap();

        let before = Instant::now();
        ambience.stop().await.unwrap();
        assert!(before.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_loop_is_aborted() {
        let ambience = AmbiencePlayer::spawn(Arc::new(StubbornPlayer), AmbienceSettings::default(), EventBus::default());
        ambience.start(vec!["a".to_string()]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let before = Instant::now();
        ambience.stop().await.unwrap();

        let waited = before.elapsed();
        assert!(waited >= Duration::from_secs(2));
        assert!(waited < Duration::from_secs(3));
        assert_eq!(ambience.live_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_when_idle_is_noop() {
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let ambience = AmbiencePlayer::spawn(Arc::new(SilentPlayer), AmbienceSettings::default(), bus);

        ambience.stop().await.unwrap();

        assert_eq!(ambience.state(), AmbienceState::Idle);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_emits_event() {
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let ambience = AmbiencePlayer::spawn(Arc::new(SilentPlayer), AmbienceSettings::default(), bus);

        let id = ambience.start(vec!["a".to_string()]).await.unwrap().unwrap();
        ambience.stop().await.unwrap();

        match events.recv().await.unwrap() {
            MeloEvent::AmbienceStopped { session_id, .. } => assert_eq!(session_id, id),
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_handle() {
        let ambience = AmbiencePlayer::spawn(Arc::new(SilentPlayer), AmbienceSettings::default(), EventBus::default());
        ambience.start(vec!["a".to_string()]).await.unwrap();

        ambience.shutdown().await.unwrap();

        assert_eq!(ambience.live_sessions(), 0);
        assert!(matches!(
            ambience.start(vec!["b".to_string()]).await,
            Err(AmbienceError::ControllerGone)
        ));
    }
}
