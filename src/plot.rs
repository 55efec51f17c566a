use crate::channel::OutputChannel;
use crate::errors::{Result, WorkerError};
use crate::protocol::OutputEvent;
use base64::Engine as _;
use tracing::debug;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Forwards figures rendered by the interpreter to the host as `image` events.
///
/// Rendering happens inside the interpreter (the glue's `capture_figures`);
/// this side checks that each payload really is a base64 PNG before it
/// reaches the host.
#[derive(Debug, Clone)]
pub struct PlotCapture {
    channel: OutputChannel,
}

impl PlotCapture {
    pub fn new(channel: OutputChannel) -> Self {
        Self { channel }
    }

    pub fn emit(&self, data: &str) -> Result<()> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| WorkerError::InvalidImage(e.to_string()))?;
        if !bytes.starts_with(PNG_SIGNATURE) {
            return Err(WorkerError::InvalidImage(
                "payload is not a PNG image".to_string(),
            ));
        }
        debug!("emitting figure ({} bytes)", bytes.len());
        self.channel.output(OutputEvent::image(data));
        Ok(())
    }
}
