//! The line loop between the transport and the dispatcher.

use std::future::Future;

use actors::{DispatchOutcome, Dispatcher};
use queue_core::MessageTemplate;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Dispatch input lines until EOF or until `shutdown` resolves.
///
/// Outbound messages are written to `output` one per line. A line that is
/// not valid UTF-8 is logged and skipped like any other unparseable line.
pub async fn serve<R, W, S>(
    mut input: R,
    mut output: W,
    dispatcher: &Dispatcher,
    template: Option<&MessageTemplate>,
    shutdown: S,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Interrupted, shutting down");
                return Ok(());
            }
            read = input.read_until(b'\n', &mut buf) => {
                if read? == 0 {
                    tracing::info!("Input closed, shutting down");
                    return Ok(());
                }

                let raw = strip_line_ending(&buf);
                let line = match std::str::from_utf8(raw) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::error!(
                            line = %String::from_utf8_lossy(raw),
                            error = %e,
                            "payload is not valid UTF-8"
                        );
                        continue;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let DispatchOutcome::Outbound(message) = dispatcher.dispatch_line(line).await else {
                    continue;
                };
                match message.render(template) {
                    Ok(rendered) => {
                        output.write_all(rendered.as_bytes()).await?;
                        output.write_all(b"\n").await?;
                        output.flush().await?;
                    }
                    Err(e) => {
                        tracing::error!(topic = %message.topic, error = %e, "Failed to render outbound message");
                    }
                }
            }
        }
    }
}

fn strip_line_ending(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}
