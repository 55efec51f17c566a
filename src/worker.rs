//! Line-delimited JSON message loop between a host and one [`Session`].

use crate::{
    channel::OutputChannel,
    engine::Interpreter,
    errors::Result,
    protocol::{InboundMessage, OutboundMessage},
    session::Session,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Serve host messages read from `reader` until it reaches end of input.
///
/// Inbound lines are read and queued by a separate task, and the session
/// handles them strictly one after another, so a `run` that arrives while
/// another is executing waits for it. Outbound messages are written to
/// `writer` by a third task in emission order. The writer is handed back
/// once everything has been flushed.
pub async fn serve<R, W>(interpreter: Box<dyn Interpreter>, reader: R, writer: W) -> Result<W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (channel, outbound) = OutputChannel::new();
    let writer_task = tokio::spawn(write_messages(outbound, writer));

    let (inbound_tx, mut inbound) = mpsc::unbounded_channel();
    let reader_task = tokio::spawn(read_messages(reader, inbound_tx));

    let mut session = Session::new(interpreter, channel);
    while let Some(message) = inbound.recv().await {
        debug!("handling {:?}", message);
        session.handle(message).await;
    }

    info!("host input closed, shutting down");
    session.shutdown().await;
    drop(session);

    let read_result = reader_task
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    if let Err(e) = read_result {
        warn!("reading host input failed: {}", e);
    }
    writer_task
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?
}

async fn read_messages<R>(
    reader: R,
    inbound: mpsc::UnboundedSender<InboundMessage>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<InboundMessage>(line) {
            Ok(message) => {
                if inbound.send(message).is_err() {
                    break;
                }
            }
            Err(e) => warn!("ignoring invalid message: {} | err={}", line, e),
        }
    }
    Ok(())
}

async fn write_messages<W>(
    mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    mut writer: W,
) -> Result<W>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let s = serde_json::to_string(&message)?;
        writer.write_all(s.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(writer)
}
