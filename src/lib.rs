//! Python execution worker.
//!
//! A host drives the worker with `init` and `run` messages. The worker keeps
//! one Python interpreter alive, runs submitted code in it, and streams back
//! what the code prints and the figures it draws, followed by `done` or
//! `error`.

pub mod capture;
pub mod channel;
pub mod config;
pub mod engine;
pub mod errors;
pub mod glue;
pub mod native;
pub mod plot;
pub mod protocol;
pub mod rewrite;
pub mod session;
pub mod worker;

#[cfg(test)]
mod scripted;

pub use capture::{StdStream, StreamCapture};
pub use channel::OutputChannel;
pub use config::{Configuration, SettingsPatch, WorkerConfig, FIGURE_DPI};
pub use engine::{EventSink, Interpreter, RuntimeEvent};
pub use errors::{Result, WorkerError};
pub use native::NativeInterpreter;
pub use plot::PlotCapture;
pub use protocol::{InboundMessage, OutboundMessage, OutputEvent, OutputKind};
pub use rewrite::rewrite;
pub use session::{Session, SessionState};
pub use worker::serve;
