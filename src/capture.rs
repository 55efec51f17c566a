//! Buffering of the interpreter's standard streams.
//!
//! The interpreter reports every `write` on `sys.stdout` / `sys.stderr` while
//! capture is active. Text accumulates per stream and is emitted as one
//! output event whenever a write carries a line break, or when the buffer is
//! drained explicitly (before a plot is shown, and when capture stops).

use crate::channel::OutputChannel;
use crate::protocol::OutputEvent;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdStream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
pub struct StreamCapture {
    channel: OutputChannel,
    stdout: String,
    stderr: String,
    active: bool,
}

impl StreamCapture {
    pub fn new(channel: OutputChannel) -> Self {
        Self {
            channel,
            stdout: String::new(),
            stderr: String::new(),
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Reset both buffers and accept writes.
    pub fn start(&mut self) {
        self.stdout.clear();
        self.stderr.clear();
        self.active = true;
    }

    /// Flush trailing partial lines and stop accepting writes.
    pub fn stop(&mut self) {
        self.drain_all();
        self.active = false;
    }

    pub fn write(&mut self, text: &str, stream: StdStream) {
        if !self.active {
            debug!("write on {:?} outside capture: {:?}", stream, text);
            return;
        }
        self.buffer_mut(stream).push_str(text);
        if text.contains('\n') {
            self.drain(stream);
        }
    }

    pub fn drain(&mut self, stream: StdStream) {
        let content = std::mem::take(self.buffer_mut(stream));
        if content.is_empty() {
            return;
        }
        let event = match stream {
            StdStream::Stdout => OutputEvent::text(content),
            StdStream::Stderr => OutputEvent::error(content),
        };
        self.channel.output(event);
    }

    pub fn drain_all(&mut self) {
        self.drain(StdStream::Stdout);
        self.drain(StdStream::Stderr);
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }

    fn buffer_mut(&mut self, stream: StdStream) -> &mut String {
        match stream {
            StdStream::Stdout => &mut self.stdout,
            StdStream::Stderr => &mut self.stderr,
        }
    }
}
