use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::ipc::handler::{handle_message, HandlerContext};

/// Compile-time name of the IPC endpoint, shared with the monitor library.
pub const PIPE_NAME: &str = r"\\.\pipe\analyzer";

/// Number of concurrent listener instances, so simultaneous monitor
/// connections don't head-of-line block behind each other.
pub const LISTENER_COUNT: usize = 4;

/// Cooperative stop flag observed at the top of each listener's loop.
#[derive(Default)]
pub struct StopFlag(AtomicBool);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Starts `LISTENER_COUNT` independent listener tasks against `PIPE_NAME`.
/// Returns their join handles so the supervisor can await them at shutdown.
pub fn spawn_listeners(
    ctx: HandlerContext,
    stop: Arc<StopFlag>,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..LISTENER_COUNT)
        .map(|instance| {
            let ctx = ctx.clone();
            let stop = stop.clone();
            tokio::spawn(async move { run_listener(instance, ctx, stop).await })
        })
        .collect()
}

#[cfg(windows)]
async fn run_listener(instance: usize, ctx: HandlerContext, stop: Arc<StopFlag>) {
    use interprocess::os::windows::named_pipe::{
        pipe_mode,
        tokio::{DuplexPipeStream, PipeListenerOptionsExt},
        PipeListenerOptions,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    while !stop.is_stopped() {
        let listener = match PipeListenerOptions::new()
            .path(PIPE_NAME)
            .mode(pipe_mode::Messages)
            .create_tokio_duplex::<pipe_mode::Messages>()
        {
            Ok(listener) => listener,
            Err(e) => {
                warn!(instance, error = %e, "failed to create pipe instance");
                return;
            }
        };

        let conn: DuplexPipeStream<pipe_mode::Messages> = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(instance, error = %e, "failed to accept pipe connection");
                continue;
            }
        };

        let ctx = ctx.clone();
        tokio::spawn(async move {
            let mut conn = conn;
            let mut buf = Vec::with_capacity(4096);
            let mut chunk = [0u8; 4096];
            loop {
                match conn.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        buf.extend_from_slice(&chunk[..n]);
                        if n < chunk.len() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "pipe read failed");
                        return;
                    }
                }
            }

            let line = String::from_utf8_lossy(&buf).into_owned();
            let reply = handle_message(&ctx, &line).await;
            if let Err(e) = conn.write_all(&reply).await {
                warn!(error = %e, "pipe write failed");
            }
        });
    }

    debug!(instance, "listener stopped");
}

/// Non-Windows builds have nothing to bind to; the loop just respects the
/// stop flag so supervisor tests exercise the same shutdown path.
#[cfg(not(windows))]
async fn run_listener(instance: usize, _ctx: HandlerContext, stop: Arc<StopFlag>) {
    while !stop.is_stopped() {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    debug!(instance, "listener stopped");
}
