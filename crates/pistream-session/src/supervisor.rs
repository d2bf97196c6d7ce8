//! The session supervisor.
//!
//! # Lifecycle
//! ```text
//! Configured ──start()──► Connecting ──last stage──► Running
//!      │                      │                         │
//!      │ preflight/input/sink │ stage failure, peer     │
//!      │ failure              │ termination, stop()     │
//!      ▼                      ▼                         ▼
//!  Terminated ◄──teardown── Terminating ◄───────────────┘
//! ```
//!
//! Everything that can fail locally (preflight, input devices, sink setup)
//! is done before the connection is spawned, so a bad device never costs a
//! round trip to the host.
//!
//! Connection events arrive on an unbounded channel drained by a single
//! notification task. That task forwards them to the listener, decides when
//! to tear down, and runs the teardown itself:
//!
//! 1. stop the connection and join its task
//! 2. shut down the input readers (devices are ungrabbed here)
//! 3. drop the connection
//! 4. close the media channels and join the sink threads
//! 5. `Terminated`, then `connection_terminated(cause)`

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pistream_av::{flags, AudioRenderer, SinkSelection, VideoRenderer};
use pistream_core::{
    AudioUnit, DecodeUnit, InputQueue, SessionError, SessionState, SinkError, Stage,
    StreamConfiguration, TerminationCause,
};
use pistream_input::{GamepadMapping, InputPipeline, DEV_INPUT};
use pistream_transport::{Connection, ConnectionContext, ConnectionEvent};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::listener::ConnectionListener;
use crate::preflight::Preflight;

/// Decode units buffered between the network and the video sink.
pub const VIDEO_QUEUE_DEPTH: usize = 8;
/// Opus packets buffered between the network and the audio sink (~160 ms).
pub const AUDIO_QUEUE_DEPTH: usize = 32;

// MARK: - SessionSpec

/// Where input comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// The listed device nodes, or every usable `event*` node under
    /// `dev_dir` when `devices` is empty.
    Evdev { devices: Vec<PathBuf>, dev_dir: PathBuf },
    /// No local input is captured.
    Disabled,
}

impl InputSource {
    pub fn evdev(devices: Vec<PathBuf>) -> Self {
        Self::Evdev { devices, dev_dir: PathBuf::from(DEV_INPUT) }
    }
}

/// Everything a session needs besides its connection and listener.
#[derive(Debug)]
pub struct SessionSpec {
    pub config: StreamConfiguration,
    pub input: InputSource,
    pub mapping: GamepadMapping,
    pub sinks: SinkSelection,
    pub video_flags: u32,
    pub preflight: Preflight,
    /// A failed strict preflight check aborts the session instead of warning.
    pub strict_tests: bool,
}

impl SessionSpec {
    /// All input devices, standard preflight checks (strict), quality-first video.
    pub fn new(config: StreamConfiguration, sinks: SinkSelection) -> Self {
        Self {
            config,
            input: InputSource::evdev(Vec::new()),
            mapping: GamepadMapping::default(),
            sinks,
            video_flags: flags::PREFER_QUALITY,
            preflight: Preflight::standard(),
            strict_tests: true,
        }
    }
}

// MARK: - Shared state

struct Shared {
    state: AtomicU8,
    /// Set once; whoever sets it owns the termination cause.
    terminating: AtomicBool,
    cause: Mutex<Option<TerminationCause>>,
    connection: Mutex<Option<Arc<dyn Connection>>>,
    listener: Arc<dyn ConnectionListener>,
    done: watch::Sender<bool>,
}

impl Shared {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// States only move forward.
    fn advance(&self, to: SessionState) {
        self.state.fetch_max(to.as_u8(), Ordering::AcqRel);
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    /// Connecting → Running, unless a termination was already accepted.
    /// The flag is read after the state CAS.
    fn mark_running(&self) -> bool {
        self.transition(SessionState::Connecting, SessionState::Running) && !self.is_terminating()
    }

    /// First caller wins and records `cause`; later calls return false.
    fn begin_termination(&self, cause: TerminationCause) -> bool {
        let mut slot = lock(&self.cause);
        if self
            .terminating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Already terminating, '{}' suppressed", cause);
            return false;
        }
        *slot = Some(cause);
        drop(slot);
        self.advance(SessionState::Terminating);
        true
    }

    fn connection(&self) -> Option<Arc<dyn Connection>> {
        lock(&self.connection).clone()
    }

    fn finish(&self) {
        self.done.send_replace(true);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// MARK: - Supervisor

/// Owns one session. Cheap to share behind an `Arc` so `stop()` can be
/// called from anywhere while another task awaits [`wait`](Self::wait).
pub struct Supervisor {
    shared: Arc<Shared>,
    spec: Mutex<Option<SessionSpec>>,
}

impl Supervisor {
    pub fn new(
        spec: SessionSpec,
        connection: Arc<dyn Connection>,
        listener: Arc<dyn ConnectionListener>,
    ) -> Self {
        let (done, _) = watch::channel(false);
        let shared = Shared {
            state: AtomicU8::new(SessionState::Configured.as_u8()),
            terminating: AtomicBool::new(false),
            cause: Mutex::new(None),
            connection: Mutex::new(Some(connection)),
            listener,
            done,
        };
        Self { shared: Arc::new(shared), spec: Mutex::new(Some(spec)) }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_terminating(&self) -> bool {
        self.shared.is_terminating()
    }

    /// Why the session ended, once it has.
    pub fn cause(&self) -> Option<TerminationCause> {
        lock(&self.shared.cause).clone()
    }

    /// Brings the session up to `Connecting` and returns; progress is
    /// reported to the listener.
    ///
    /// A preflight, input or sink failure moves straight to `Terminated`:
    /// the error is returned and shown with `display_error`, nothing is sent
    /// to the host and `connection_terminated` does not fire.
    pub async fn start(&self) -> Result<(), SessionError> {
        if !self.shared.transition(SessionState::Configured, SessionState::Connecting) {
            return Err(SessionError::InvalidState { state: self.state() });
        }
        let Some(spec) = lock(&self.spec).take() else {
            return Err(SessionError::InvalidState { state: self.state() });
        };

        match self.bring_up(spec).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.abort(&e);
                Err(e)
            }
        }
    }

    async fn bring_up(&self, spec: SessionSpec) -> Result<(), SessionError> {
        let SessionSpec { config, input, mapping, sinks, video_flags, preflight, strict_tests } = spec;

        preflight.run(strict_tests)?;

        let queue = Arc::new(InputQueue::default());
        let mut pipeline = match &input {
            InputSource::Evdev { devices, dev_dir } => {
                let pipeline = InputPipeline::open_in(dev_dir, devices, mapping, queue.clone())?;
                info!("Capturing input from {}", pipeline.device_names().join(", "));
                Some(pipeline)
            }
            InputSource::Disabled => None,
        };

        let (mut video, mut audio) = sinks.build();
        if let Err(e) = setup_sinks(video.as_mut(), audio.as_mut(), &config, video_flags) {
            video.release();
            audio.release();
            return Err(e.into());
        }

        if let Some(pipeline) = pipeline.as_mut() {
            if let Err(e) = pipeline.start() {
                pipeline.shutdown().await;
                video.release();
                audio.release();
                return Err(e.into());
            }
        }

        let (video_tx, video_rx) = mpsc::channel(VIDEO_QUEUE_DEPTH);
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_QUEUE_DEPTH);
        let sink_threads = [
            tokio::task::spawn_blocking(move || pump_video(video, video_rx)),
            tokio::task::spawn_blocking(move || pump_audio(audio, audio_rx)),
        ];

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let ctx = ConnectionContext {
            events: events_tx,
            video: video_tx,
            audio: audio_tx,
            input: queue.clone(),
        };
        // present until teardown, and teardown has not been scheduled yet
        let run = match self.shared.connection() {
            Some(connection) => tokio::spawn(async move { connection.run(ctx).await }),
            None => tokio::spawn(async move { drop(ctx) }),
        };

        info!("Session starting ({})", config);
        tokio::spawn(supervise(self.shared.clone(), events_rx, run, pipeline, queue, sink_threads));
        Ok(())
    }

    fn abort(&self, err: &SessionError) {
        error!("Session start failed: {}", err);
        self.shared.terminating.store(true, Ordering::Release);
        self.shared.advance(SessionState::Terminated);
        lock(&self.shared.connection).take();
        self.shared.listener.display_error(error_title(err), &err.to_string());
        self.shared.finish();
    }

    /// Requests termination. Non-blocking and idempotent; the listener's
    /// `connection_terminated` follows once teardown completes.
    pub fn stop(&self) {
        if self.shared.transition(SessionState::Configured, SessionState::Terminated) {
            debug!("Session stopped before start");
            self.shared.terminating.store(true, Ordering::Release);
            lock(&self.shared.connection).take();
            self.shared.finish();
            return;
        }
        if self.shared.begin_termination(TerminationCause::LocalStop) {
            info!("Stopping session");
        }
        if let Some(connection) = self.shared.connection() {
            connection.stop();
        }
    }

    /// Resolves once the session is `Terminated`.
    pub async fn wait(&self) {
        let mut done = self.shared.done.subscribe();
        let _ = done.wait_for(|finished| *finished).await;
    }
}

fn error_title(err: &SessionError) -> &'static str {
    match err {
        SessionError::EnvironmentUnsuitable { .. } => "Preflight",
        SessionError::Input(_) => "Input",
        SessionError::Sink(_) => "Decoder",
        SessionError::InvalidState { .. } => "Session",
    }
}

fn setup_sinks(
    video: &mut dyn VideoRenderer,
    audio: &mut dyn AudioRenderer,
    config: &StreamConfiguration,
    video_flags: u32,
) -> Result<(), SinkError> {
    video.setup(config, video_flags)?;
    audio.setup()?;
    video.start()?;
    audio.start()?;
    info!("Sinks ready: video '{}', audio '{}'", video.name(), audio.name());
    Ok(())
}

// MARK: - Sink threads

fn pump_video(mut sink: Box<dyn VideoRenderer>, mut units: mpsc::Receiver<DecodeUnit>) {
    let mut failures = 0u64;
    while let Some(unit) = units.blocking_recv() {
        if let Err(e) = sink.submit_decode_unit(unit) {
            failures += 1;
            if failures.is_power_of_two() {
                warn!("Video sink '{}': {} ({} failures)", sink.name(), e, failures);
            }
        }
    }
    sink.stop();
    sink.release();
    debug!("Video sink '{}' released", sink.name());
}

fn pump_audio(mut sink: Box<dyn AudioRenderer>, mut units: mpsc::Receiver<AudioUnit>) {
    let mut failures = 0u64;
    while let Some(unit) = units.blocking_recv() {
        if let Err(e) = sink.play_decoded_samples(unit) {
            failures += 1;
            if failures.is_power_of_two() {
                warn!("Audio sink '{}': {} ({} failures)", sink.name(), e, failures);
            }
        }
    }
    sink.stop();
    sink.release();
    debug!("Audio sink '{}' released", sink.name());
}

// MARK: - Notification task

/// Accepts stage events only in strictly increasing stage order, each
/// stage completing before the next starts.
#[derive(Debug, Default)]
struct StageTracker {
    current: Option<(Stage, bool)>,
}

impl StageTracker {
    fn starting(&mut self, stage: Stage) -> bool {
        let in_order = match self.current {
            None => true,
            Some((prev, complete)) => complete && stage > prev,
        };
        if in_order {
            self.current = Some((stage, false));
        } else {
            warn!("Out-of-order start of stage '{}' dropped", stage);
        }
        in_order
    }

    fn complete(&mut self, stage: Stage) -> bool {
        if self.current == Some((stage, false)) {
            self.current = Some((stage, true));
            true
        } else {
            warn!("Out-of-order completion of stage '{}' dropped", stage);
            false
        }
    }

    fn all_complete(&self) -> bool {
        matches!(self.current, Some((stage, true)) if stage.is_last())
    }
}

async fn supervise(
    shared: Arc<Shared>,
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    run: JoinHandle<()>,
    input: Option<InputPipeline>,
    queue: Arc<InputQueue>,
    sink_threads: [JoinHandle<()>; 2],
) {
    let listener = shared.listener.clone();
    let mut stages = StageTracker::default();

    loop {
        let Some(event) = events.recv().await else {
            // the connection ended without saying why
            shared.begin_termination(TerminationCause::PeerDisconnect(
                "connection ended without reporting a cause".into(),
            ));
            break;
        };
        match event {
            ConnectionEvent::StageStarting(stage) => {
                if stages.starting(stage) && !shared.is_terminating() {
                    listener.stage_starting(stage);
                }
            }
            ConnectionEvent::StageComplete(stage) => {
                if stages.complete(stage) && !shared.is_terminating() {
                    listener.stage_complete(stage);
                }
            }
            ConnectionEvent::StageFailed { stage, error } => {
                warn!("Starting {} failed: {}", stage, error);
                if shared.begin_termination(TerminationCause::StageFailed { stage, reason: error }) {
                    listener.stage_failed(stage);
                }
                break;
            }
            ConnectionEvent::Started => {
                if !stages.all_complete() {
                    warn!("Connection reported started before every stage completed");
                    continue;
                }
                if shared.mark_running() {
                    info!("Session running");
                    listener.connection_started();
                }
            }
            ConnectionEvent::Terminated(cause) => {
                if cause.is_unexpected() {
                    warn!("Connection terminated: {}", cause);
                } else {
                    debug!("Connection terminated: {}", cause);
                }
                shared.begin_termination(cause);
                break;
            }
        }
    }

    teardown(&shared, events, run, input, queue, sink_threads).await;
}

async fn teardown(
    shared: &Shared,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    run: JoinHandle<()>,
    input: Option<InputPipeline>,
    queue: Arc<InputQueue>,
    sink_threads: [JoinHandle<()>; 2],
) {
    shared.advance(SessionState::Terminating);

    if let Some(connection) = shared.connection() {
        connection.stop();
    }
    if let Err(e) = run.await {
        warn!("Connection task failed: {}", e);
    }
    drop(events);

    match input {
        Some(mut pipeline) => pipeline.shutdown().await,
        None => queue.close(),
    }

    let connection = lock(&shared.connection).take();
    drop(connection);

    // the connection task owned the only senders; the sinks drain and exit
    for thread in sink_threads {
        if let Err(e) = thread.await {
            warn!("Sink thread failed: {}", e);
        }
    }

    let cause = lock(&shared.cause).clone().unwrap_or(TerminationCause::Interrupted);
    shared.advance(SessionState::Terminated);
    info!("Session terminated: {}", cause);
    shared.listener.connection_terminated(&cause);
    shared.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_in_order_are_accepted() {
        let mut t = StageTracker::default();
        for stage in Stage::ALL {
            assert!(t.starting(stage));
            assert!(t.complete(stage));
        }
        assert!(t.all_complete());
    }

    #[test]
    fn repeated_or_backwards_stages_are_dropped() {
        let mut t = StageTracker::default();
        assert!(t.starting(Stage::LaunchApp));
        assert!(!t.starting(Stage::RtspHandshake), "previous stage not complete");
        assert!(t.complete(Stage::LaunchApp));
        assert!(!t.complete(Stage::LaunchApp));
        assert!(!t.starting(Stage::LaunchApp));
        assert!(t.starting(Stage::RtspHandshake));
        assert!(!t.complete(Stage::VideoStreamInit));
        assert!(!t.all_complete());
    }

    #[test]
    fn default_spec_is_strict_and_quality_first() {
        let spec = SessionSpec::new(StreamConfiguration::default(), SinkSelection::fake(None));
        assert!(spec.strict_tests);
        assert_eq!(spec.video_flags, flags::PREFER_QUALITY);
        assert_eq!(spec.input, InputSource::evdev(Vec::new()));
    }

    fn shared_in(state: SessionState) -> Shared {
        let (done, _) = watch::channel(false);
        Shared {
            state: AtomicU8::new(state.as_u8()),
            terminating: AtomicBool::new(false),
            cause: Mutex::new(None),
            connection: Mutex::new(None),
            listener: Arc::new(crate::listener::RecordingListener::new()),
            done,
        }
    }

    #[test]
    fn started_after_accepted_stop_is_not_running() {
        let shared = shared_in(SessionState::Connecting);
        // stop() has won the flag but not yet advanced the state
        shared.terminating.store(true, Ordering::Release);
        assert_eq!(shared.state(), SessionState::Connecting);
        assert!(!shared.mark_running());

        shared.advance(SessionState::Terminating);
        assert_eq!(shared.state(), SessionState::Terminating);
    }

    #[test]
    fn started_while_connecting_runs_once() {
        let shared = shared_in(SessionState::Connecting);
        assert!(shared.mark_running());
        assert!(!shared.mark_running());
        assert_eq!(shared.state(), SessionState::Running);

        assert!(shared.begin_termination(TerminationCause::LocalStop));
        assert!(!shared.begin_termination(TerminationCause::Interrupted));
        assert_eq!(shared.state(), SessionState::Terminating);
    }

    #[test]
    fn error_titles() {
        let err = SessionError::EnvironmentUnsuitable { failures: vec!["x".into()] };
        assert_eq!(error_title(&err), "Preflight");
        assert_eq!(error_title(&SessionError::Sink(SinkError::NotInitialized)), "Decoder");
    }
}
