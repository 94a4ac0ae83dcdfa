// Ingest endpoints.
//
// Two pull-style Unix sockets receive producer messages: screencast stills
// on one, subscriber audio notifications on the other. Every accepted
// connection gets its own reader task; decoded messages funnel into the
// session's command channel. Image decoding runs on the blocking pool so
// socket reads never stall behind pixel work.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::message::{parse_message, read_message, EndpointKind, IngestMessage};
use crate::session::Command;
use crate::video::decode_screencast;

/// Endpoint paths derived from the configured prefix.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub screencast: PathBuf,
    pub blobsink: PathBuf,
}

impl Endpoints {
    pub fn from_prefix(prefix: &str) -> Self {
        Self {
            screencast: PathBuf::from(format!("/tmp/{prefix}-screencast")),
            blobsink: PathBuf::from(format!("/tmp/{prefix}-blobsink")),
        }
    }
}

/// Bind both ingest sockets and serve until shutdown flips.
///
/// Socket files left over from a crashed run are removed before binding.
pub async fn serve(
    endpoints: Endpoints,
    commands: mpsc::Sender<Command>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let screencast = bind(&endpoints.screencast)?;
    let blobsink = bind(&endpoints.blobsink)?;
    info!(
        "ingest listening on {} and {}",
        endpoints.screencast.display(),
        endpoints.blobsink.display()
    );

    let screencast_task = tokio::spawn(accept_loop(
        screencast,
        EndpointKind::Screencast,
        commands.clone(),
        shutdown.clone(),
    ));
    let blobsink_task = tokio::spawn(accept_loop(
        blobsink,
        EndpointKind::Blobsink,
        commands,
        shutdown,
    ));

    let _ = screencast_task.await;
    let _ = blobsink_task.await;

    let _ = std::fs::remove_file(&endpoints.screencast);
    let _ = std::fs::remove_file(&endpoints.blobsink);
    info!("ingest sockets closed");
    Ok(())
}

fn bind(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("cannot remove stale socket {}", path.display()))?;
    }
    UnixListener::bind(path).with_context(|| format!("cannot bind {}", path.display()))
}

async fn accept_loop(
    listener: UnixListener,
    kind: EndpointKind,
    commands: mpsc::Sender<Command>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    debug!("{:?}: producer connected", kind);
                    tokio::spawn(connection_loop(
                        stream,
                        kind,
                        commands.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    error!("{:?}: accept failed: {}", kind, e);
                    break;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn connection_loop(
    mut stream: UnixStream,
    kind: EndpointKind,
    commands: mpsc::Sender<Command>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let parts = tokio::select! {
            read = read_message(&mut stream) => match read {
                Ok(Some(parts)) => parts,
                Ok(None) => {
                    debug!("{:?}: producer disconnected", kind);
                    return;
                }
                Err(e) => {
                    warn!("{:?}: dropping connection: {}", kind, e);
                    return;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
                continue;
            }
        };

        let message = match parse_message(kind, parts) {
            Ok(message) => message,
            Err(e) => {
                warn!("{:?}: discarding malformed message: {}", kind, e);
                continue;
            }
        };

        let command = match message {
            IngestMessage::Screencast { payload, timestamp } => {
                // Pixel work off the reactor threads.
                let decoded =
                    tokio::task::spawn_blocking(move || decode_screencast(&payload, 0)).await;
                match decoded {
                    Ok(Ok(frame)) => Command::Video { frame, timestamp },
                    Ok(Err(e)) => {
                        warn!("failed to decode screencast at t={:.3}: {}", timestamp, e);
                        continue;
                    }
                    Err(e) => {
                        error!("screencast decode task panicked: {}", e);
                        continue;
                    }
                }
            }
            IngestMessage::Blobsink {
                path,
                timestamp,
                subscriber_id,
            } => Command::Audio {
                path,
                timestamp,
                subscriber_id,
            },
        };

        if commands.send(command).await.is_err() {
            // Session gone; nothing left to feed.
            return;
        }
    }
}
