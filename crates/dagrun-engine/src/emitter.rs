//! Push-style consumers of a run's event stream.

use futures::stream::{BoxStream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use dagrun_core::error::Result;
use dagrun_core::event::{EndEvent, RunEvent};

/// Drive a run on its own task and forward events into a bounded channel.
///
/// The run applies backpressure through the channel: the next node starts
/// only once there is room for its event. Dropping the receiver stops the
/// run after the node in flight.
pub fn spawn_run(
    mut events: BoxStream<'static, RunEvent>,
    capacity: usize,
) -> (mpsc::Receiver<RunEvent>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if tx.send(event).await.is_err() {
                debug!("Event receiver dropped, abandoning run");
                break;
            }
        }
    });
    (rx, handle)
}

/// Write events as line-delimited JSON, flushing after each line.
/// Returns the terminal event if the stream produced one.
pub async fn write_ndjson<W>(
    mut events: BoxStream<'static, RunEvent>,
    writer: &mut W,
) -> Result<Option<EndEvent>>
where
    W: AsyncWrite + Unpin,
{
    let mut end = None;
    while let Some(event) = events.next().await {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
        if let RunEvent::End(e) = event {
            end = Some(e);
        }
    }
    Ok(end)
}
