use crate::{
    capture::StreamCapture,
    channel::OutputChannel,
    config::{Configuration, SettingsPatch},
    engine::{EventSink, Interpreter, RuntimeEvent},
    errors::{Result, WorkerError},
    plot::PlotCapture,
    protocol::InboundMessage,
    rewrite::rewrite,
};
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Loading,
    Ready,
    Running,
    Failed,
}

/// Routes interpreter events into the capture buffers during a run
struct RunSink<'a> {
    streams: &'a mut StreamCapture,
    plots: &'a PlotCapture,
}

impl EventSink for RunSink<'_> {
    fn handle(&mut self, event: RuntimeEvent) -> Result<()> {
        match event {
            RuntimeEvent::Write { stream, text } => self.streams.write(&text, stream),
            RuntimeEvent::Drain => self.streams.drain_all(),
            RuntimeEvent::Figure { data } => self.plots.emit(&data)?,
        }
        Ok(())
    }
}

/// One interpreter, its configuration, and the capture state of its runs
pub struct Session {
    state: SessionState,
    config: Configuration,
    interpreter: Box<dyn Interpreter>,
    channel: OutputChannel,
    streams: StreamCapture,
    plots: PlotCapture,
}

impl Session {
    pub fn new(interpreter: Box<dyn Interpreter>, channel: OutputChannel) -> Self {
        Self {
            state: SessionState::Uninitialized,
            config: Configuration::default(),
            interpreter,
            streams: StreamCapture::new(channel.clone()),
            plots: PlotCapture::new(channel.clone()),
            channel,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub async fn handle(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::Init { settings } => self.initialize(settings).await,
            InboundMessage::Run { code } => self.run(&code).await,
        }
    }

    /// Merge settings, load the interpreter, and signal `ready` or `error`.
    pub async fn initialize(&mut self, settings: Option<SettingsPatch>) {
        match self.state {
            SessionState::Uninitialized | SessionState::Failed => {}
            _ => {
                self.channel.error(WorkerError::AlreadyLoaded.to_string());
                return;
            }
        }

        if let Some(patch) = settings {
            self.config.merge(patch);
        }
        self.state = SessionState::Loading;
        info!("loading interpreter with {:?}", self.config);

        match self.load().await {
            Ok(()) => {
                self.state = SessionState::Ready;
                info!("interpreter ready");
                self.channel.ready();
            }
            Err(e) => {
                self.state = SessionState::Failed;
                warn!("interpreter failed to load: {}", e);
                self.channel.error(format!("Failed to load Python: {}", e));
            }
        }
    }

    async fn load(&mut self) -> Result<()> {
        self.interpreter.load().await?;
        if self.config.install_package_manager {
            self.interpreter.install_package_manager().await?;
            let packages = self.config.packages_to_install().to_vec();
            self.interpreter.install_packages(&packages).await?;
        }
        self.interpreter.install_glue().await
    }

    /// Execute `source`, streaming its output, then signal `done` or `error`.
    pub async fn run(&mut self, source: &str) {
        if self.state != SessionState::Ready {
            self.channel.error(WorkerError::NotLoaded.to_string());
            return;
        }

        self.state = SessionState::Running;
        let run_id = uuid::Uuid::new_v4();
        let span = info_span!("run", %run_id);

        let outcome = self.execute_captured(source).instrument(span.clone()).await;
        match outcome {
            Ok(()) => {
                self.state = SessionState::Ready;
                self.channel.done();
            }
            Err(e) => {
                self.recover().instrument(span).await;
                self.state = if e.is_fatal() {
                    SessionState::Failed
                } else {
                    SessionState::Ready
                };
                self.channel.error(e.to_string());
            }
        }
    }

    async fn execute_captured(&mut self, source: &str) -> Result<()> {
        // pyplot may have been imported by an earlier run
        self.interpreter.install_show_hook().await?;
        self.interpreter.start_capture().await?;
        self.streams.start();

        let source = rewrite(source);
        let mut sink = RunSink {
            streams: &mut self.streams,
            plots: &self.plots,
        };
        self.interpreter.execute(&source, &mut sink).await?;
        sink.streams.drain_all();
        // figures that were created but never shown
        self.interpreter.capture_figures(&mut sink).await?;

        self.interpreter.stop_capture().await?;
        self.streams.stop();
        Ok(())
    }

    /// Best-effort teardown after a failed run; its figures are dropped unseen
    async fn recover(&mut self) {
        if let Err(e) = self.interpreter.discard_figures().await {
            warn!("could not discard figures after failed run: {}", e);
        }
        if let Err(e) = self.interpreter.stop_capture().await {
            warn!("could not stop capture after failed run: {}", e);
        }
        self.streams.stop();
    }

    pub async fn shutdown(&mut self) {
        if let Err(e) = self.interpreter.shutdown().await {
            warn!("interpreter shutdown failed: {}", e);
        }
        self.state = SessionState::Uninitialized;
    }
}
