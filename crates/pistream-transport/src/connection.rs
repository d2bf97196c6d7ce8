//! [`HostConnection`]: launch, RTSP, then the four media streams.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use pistream_control::HostClient;
use pistream_core::{
    ControlError, SessionParams, Stage, StreamConfiguration, TerminationCause, TransportError,
};
use pistream_identity::IdentityProvider;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::input::InputCipher;
use crate::rtsp::RtspClient;
use crate::{
    audio, control, input, resolve, unspecified_for, video, Connection, ConnectionContext,
    ConnectionEvent, HostPorts,
};

pub const DEFAULT_APP: &str = "Steam";

enum Outcome {
    Stopped,
    StageFailed,
    PeerGone(String),
    /// Every stream ended without the host reporting anything.
    Drained,
}

struct StageAborted;

pub struct HostConnection {
    host: String,
    client: HostClient,
    config: StreamConfiguration,
    app_name: String,
    ports: HostPorts,
    shutdown: watch::Sender<bool>,
}

impl HostConnection {
    pub fn new(
        host: &str,
        identity: Arc<dyn IdentityProvider>,
        config: StreamConfiguration,
        app_name: impl Into<String>,
    ) -> Result<Self, ControlError> {
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            host: host.to_owned(),
            client: HostClient::new(host, identity)?,
            config,
            app_name: app_name.into(),
            ports: HostPorts::default(),
            shutdown,
        })
    }

    pub fn with_ports(mut self, ports: HostPorts) -> Self {
        self.ports = ports;
        self
    }

    /// Resumes the running app, or launches `app_name`.
    async fn launch(&self) -> Result<SessionParams, TransportError> {
        let info = self.client.server_info().await?;
        if !info.paired {
            return Err(ControlError::Unauthorized.into());
        }
        if info.current_game != 0 {
            info!("{} is already running app {}, resuming", info.hostname, info.current_game);
            return Ok(self.client.resume().await?);
        }
        let app = self
            .client
            .find_app(&self.app_name)
            .await?
            .ok_or_else(|| ControlError::protocol(format!("no app named '{}' on host", self.app_name)))?;
        Ok(self.client.launch(app.id, &self.config).await?)
    }

    async fn session(
        &self,
        ctx: &ConnectionContext,
        tasks: &mut JoinSet<Option<String>>,
    ) -> Result<Outcome, StageAborted> {
        let params = stage(ctx, Stage::LaunchApp, self.launch()).await?;

        stage(ctx, Stage::RtspHandshake, async {
            let addr = resolve(&self.host, self.ports.rtsp).await?;
            RtspClient::new(addr).handshake(&self.config).await
        })
        .await?;

        let control_stream = stage(ctx, Stage::ControlStreamInit, async {
            let mut stream = TcpStream::connect(resolve(&self.host, self.ports.control).await?).await?;
            stream.set_nodelay(true)?;
            control::start(&mut stream).await?;
            Ok::<_, TransportError>(stream)
        })
        .await?;
        tasks.spawn(control::run(control_stream, self.shutdown.subscribe()));

        let video_socket = stage(ctx, Stage::VideoStreamInit, self.media_socket(self.ports.video)).await?;
        let (sink, shutdown) = (ctx.video.clone(), self.shutdown.subscribe());
        tasks.spawn(async move {
            video::run(video_socket, sink, shutdown).await;
            None
        });

        let audio_socket = stage(ctx, Stage::AudioStreamInit, self.media_socket(self.ports.audio)).await?;
        let (sink, shutdown) = (ctx.audio.clone(), self.shutdown.subscribe());
        tasks.spawn(async move {
            audio::run(audio_socket, sink, shutdown).await;
            None
        });

        let input_stream = stage(ctx, Stage::InputStreamInit, async {
            let stream = TcpStream::connect(resolve(&self.host, self.ports.input).await?).await?;
            stream.set_nodelay(true)?;
            Ok::<_, TransportError>(stream)
        })
        .await?;
        let (queue, shutdown) = (ctx.input.clone(), self.shutdown.subscribe());
        let cipher = InputCipher::new(&params);
        tasks.spawn(async move {
            input::run(input_stream, cipher, queue, shutdown)
                .await
                .err()
                .map(|e| format!("input stream: {e}"))
        });

        info!("Session with {} is live ({})", self.host, self.config);
        ctx.emit(ConnectionEvent::Started);

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(reason)) => return Ok(Outcome::PeerGone(reason)),
                Ok(None) => {}
                Err(e) => warn!("Stream task failed: {}", e),
            }
        }
        Ok(Outcome::Drained)
    }

    /// UDP socket connected to the host's `port`.
    async fn media_socket(&self, port: u16) -> Result<UdpSocket, TransportError> {
        let addr = resolve(&self.host, port).await?;
        let socket = UdpSocket::bind(unspecified_for(&addr)).await?;
        socket.connect(addr).await?;
        Ok(socket)
    }
}

#[async_trait]
impl Connection for HostConnection {
    async fn run(&self, ctx: ConnectionContext) {
        let mut stopped = self.shutdown.subscribe();
        let mut tasks = JoinSet::new();

        let outcome = tokio::select! {
            biased;
            _ = wait_stopped(&mut stopped) => Outcome::Stopped,
            result = self.session(&ctx, &mut tasks) => result.unwrap_or(Outcome::StageFailed),
        };

        // every stream watches this; a connection never runs twice
        self.shutdown.send_replace(true);
        tasks.shutdown().await;

        match outcome {
            Outcome::StageFailed => {}
            Outcome::PeerGone(reason) => {
                warn!("Connection to {} lost: {}", self.host, reason);
                ctx.emit(ConnectionEvent::Terminated(TerminationCause::PeerDisconnect(reason)));
            }
            Outcome::Stopped | Outcome::Drained => {
                debug!("Connection to {} stopped", self.host);
                ctx.emit(ConnectionEvent::Terminated(TerminationCause::Interrupted));
            }
        }
    }

    fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

async fn wait_stopped(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Runs one stage, reporting its start and its outcome.
async fn stage<T, F>(ctx: &ConnectionContext, stage: Stage, work: F) -> Result<T, StageAborted>
where
    F: Future<Output = Result<T, TransportError>>,
{
    ctx.emit(ConnectionEvent::StageStarting(stage));
    match work.await {
        Ok(value) => {
            debug!("Stage '{}' complete", stage);
            ctx.emit(ConnectionEvent::StageComplete(stage));
            Ok(value)
        }
        Err(e) => {
            warn!("Stage '{}' failed: {}", stage, e);
            ctx.emit(ConnectionEvent::StageFailed { stage, error: e.to_string() });
            Err(StageAborted)
        }
    }
}
