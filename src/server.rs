use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, warn};

use crate::commands::dispatch;
use crate::resp::{DecodeError, RespLimits, read_frame};
use crate::store::Store;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Default)]
pub struct ServerLimits {
    pub resp: RespLimits,
}

/// Serve one client until it disconnects, sends QUIT, or breaks framing.
///
/// The connection first waits for a permit from `admission` and holds it for
/// its whole life, so at most `max_clients` connections are served at once.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    store: Store,
    limits: ServerLimits,
    admission: Arc<Semaphore>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    let span = tracing::info_span!("conn", client_id, %peer);
    async move {
        if admission.available_permits() == 0 {
            warn!("max clients reached, waiting for a free slot");
        }
        let Ok(_permit) = admission.acquire_owned().await else {
            debug!("admission closed, dropping connection");
            return;
        };
        metrics::counter!("kvq_connections_total").increment(1);
        serve(stream, store, limits).await;
        debug!("connection closed");
    }
    .instrument(span)
    .await
}

async fn serve<S>(stream: S, store: Store, limits: ServerLimits)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = BufReader::with_capacity(64 * 1024, read_half);
    // Replies accumulate here and are flushed once the pipelined input is drained.
    let mut writer = BufWriter::with_capacity(64 * 1024, write_half);
    let mut out = Vec::with_capacity(512);
    loop {
        let args = match read_frame(&mut reader, limits.resp).await.and_then(|f| f.into_args()) {
            Ok(args) if args.is_empty() => continue,
            Ok(args) => args,
            Err(DecodeError::StreamClosed) => {
                debug!("client closed stream");
                break;
            }
            Err(DecodeError::Frame(msg)) => {
                debug!(error = %msg, "protocol error, closing connection");
                let reply = format!("-ERR Protocol error: {msg}\r\n");
                if writer.write_all(reply.as_bytes()).await.is_ok() {
                    let _ = writer.flush().await;
                }
                break;
            }
            Err(DecodeError::Io(e)) => {
                debug!(error = %e, "read failed, closing connection");
                break;
            }
        };

        let (reply, quit) = dispatch(&args, &store).await;
        out.clear();
        reply.encode(&mut out);
        if writer.write_all(&out).await.is_err() {
            break;
        }
        if quit {
            let _ = writer.flush().await;
            break;
        }
        if reader.buffer().is_empty() && writer.flush().await.is_err() {
            break;
        }
    }
}
