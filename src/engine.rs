use crate::capture::StdStream;
use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Something the interpreter reports while serving a request.
///
/// Events flow one way, from the interpreter to the controller; the
/// interpreter never waits for an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "ev", rename_all = "lowercase")]
pub enum RuntimeEvent {
    /// A write on `sys.stdout` or `sys.stderr` while capture is active
    Write { stream: StdStream, text: String },
    /// The show hook fired; pending text must be flushed before its figures
    Drain,
    /// One rendered figure, base64-encoded PNG
    Figure { data: String },
}

/// Receiver of runtime events during a request
pub trait EventSink: Send {
    fn handle(&mut self, event: RuntimeEvent) -> Result<()>;
}

/// Sink for requests that are not expected to produce events
#[derive(Debug, Default)]
pub struct DiscardSink;

impl EventSink for DiscardSink {
    fn handle(&mut self, event: RuntimeEvent) -> Result<()> {
        tracing::debug!("discarding runtime event {:?}", event);
        Ok(())
    }
}

/// A Python interpreter the session controller can drive
#[async_trait]
pub trait Interpreter: Send {
    /// Start (or restart) the runtime
    async fn load(&mut self) -> Result<()>;

    /// Make the package manager available, bootstrapping it if needed
    async fn install_package_manager(&mut self) -> Result<()>;

    /// Install package specifiers, in order, through the package manager
    async fn install_packages(&mut self, packages: &[String]) -> Result<()>;

    /// Install the capture and display glue
    async fn install_glue(&mut self) -> Result<()>;

    /// Replace `pyplot.show` with the capturing hook when pyplot is loaded
    async fn install_show_hook(&mut self) -> Result<()>;

    /// Point `sys.stdout` / `sys.stderr` at the capture streams
    async fn start_capture(&mut self) -> Result<()>;

    /// Restore the original `sys.stdout` / `sys.stderr`
    async fn stop_capture(&mut self) -> Result<()>;

    /// Execute user code; a Python exception becomes `WorkerError::Execution`
    async fn execute(&mut self, code: &str, sink: &mut dyn EventSink) -> Result<()>;

    /// Render every populated open figure as a `Figure` event, then close all figures
    async fn capture_figures(&mut self, sink: &mut dyn EventSink) -> Result<()>;

    /// Close every open figure without rendering it
    async fn discard_figures(&mut self) -> Result<()>;

    /// Stop the runtime
    async fn shutdown(&mut self) -> Result<()>;
}
