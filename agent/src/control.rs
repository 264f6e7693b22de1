//! Control of the running agent through a Unix socket.
//!
//! Each line received on the socket is a message:
//! - `shutdown` stops the agent after the current measurement cycle;
//! - anything else is a [`Notification`] for the sampler, for instance
//!   `disable`, `enable` or `PUTNOTIF plugin=hpm message=rstCtrs`.

use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::mpsc::Sender,
    time::Duration,
};

use anyhow::Context;
use hpm::control::Notification;
use tokio::{
    io::{AsyncBufReadExt, BufStream},
    net::{UnixListener, UnixStream},
    runtime::Runtime,
};
use tokio_util::sync::CancellationToken;

/// A message received by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Notify(Notification),
    Shutdown,
}

impl FromStr for ControlMessage {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        if line.trim() == "shutdown" {
            return Ok(ControlMessage::Shutdown);
        }
        line.parse().map(ControlMessage::Notify)
    }
}

/// Listens on a Unix socket and forwards the messages to a channel.
pub struct SocketControl {
    rt: Runtime,
    cancel_token: CancellationToken,
    socket_path: PathBuf,
}

impl SocketControl {
    pub fn start_new<P: AsRef<Path>>(socket_path: P, tx: Sender<ControlMessage>) -> anyhow::Result<SocketControl> {
        let socket_path = socket_path.as_ref().to_owned();

        // delete existing socket
        let _ = std::fs::remove_file(&socket_path);

        // one worker thread is enough: the messages are tiny and rare
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_io()
            .build()?;

        // bind now, to report the errors to the caller
        let listener = {
            let _guard = rt.enter();
            UnixListener::bind(&socket_path).with_context(|| format!("could not bind to {}", socket_path.display()))?
        };
        log::info!("listening for notifications on {}", socket_path.display());

        let cancel_token = CancellationToken::new();
        let cloned_token = cancel_token.clone();
        rt.spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = cloned_token.cancelled() => break,
                    new_connection = listener.accept() => match new_connection {
                        Ok((stream, _addr)) => {
                            let tx = tx.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, tx).await {
                                    log::error!("Error in unix socket processing: {e:#}");
                                }
                            });
                        }
                        Err(e) => log::error!("Failed to accept new connection on unix socket: {e:#}"),
                    }
                }
            }
        });

        Ok(SocketControl {
            rt,
            cancel_token,
            socket_path,
        })
    }

    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    pub fn join(self) {
        self.rt.shutdown_timeout(Duration::from_secs(1));
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

async fn handle_connection(stream: UnixStream, tx: Sender<ControlMessage>) -> anyhow::Result<()> {
    let mut lines = BufStream::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let msg: ControlMessage = line.parse().with_context(|| format!("invalid message: {line}"))?;
        log::debug!("received {msg:?}");
        tx.send(msg).context("the agent is not running anymore")?;
    }
    Ok(())
}
