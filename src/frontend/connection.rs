use bytes::{Bytes, BytesMut};
use std::{net::SocketAddr, sync::Arc};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::{mpsc, watch},
    time::timeout,
};
use tracing::{debug, info, warn};

use super::{
    context::ConnectionContext,
    handlers::{self, Flow},
};
use crate::server::GatewayState;
use crate::session::ConnectionHandle;
use crate::shared_types::AuthStage;
use crate::wire_protocol::{CodecError, GatewayMessage, decode, peek_frame};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const SCRATCH_CAPACITY_HINT: usize = 4096;

// -----------------------------------------------------------------------------
// ----- FrontendError ---------------------------------------------------------

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol violation: {0}")]
    Protocol(#[from] CodecError),
}

// -----------------------------------------------------------------------------
// ----- FrontendConnection ----------------------------------------------------

/// One downstream client connection: frame reader, auth state machine and
/// dispatch. Writes go through a separate writer task.
pub struct FrontendConnection {
    state: Arc<GatewayState>,
    context: ConnectionContext,

    inbox: BytesMut,
    reader: OwnedReadHalf,
    close_rx: watch::Receiver<bool>,
}

// -----------------------------------------------------------------------------
// ----- FrontendConnection: Static --------------------------------------------

impl FrontendConnection {
    pub fn new(stream: TcpStream, peer: SocketAddr, state: Arc<GatewayState>) -> Self {
        let (reader, writer) = stream.into_split();

        let (writer_tx, writer_rx) = mpsc::unbounded_channel::<Bytes>();
        let handle = ConnectionHandle::new(peer, writer_tx);
        spawn_writer_task(writer, writer_rx, handle.subscribe_close());

        Self {
            state,
            close_rx: handle.subscribe_close(),
            context: ConnectionContext::new(handle),
            inbox: BytesMut::with_capacity(SCRATCH_CAPACITY_HINT),
            reader,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- FrontendConnection: Public --------------------------------------------

impl FrontendConnection {
    /// Serve until the peer leaves, the idle timer fires, the session is
    /// evicted or a frame is bad. The session is destroyed on every exit; a
    /// bad frame gets no reply.
    pub async fn run(mut self) -> Result<(), FrontendError> {
        let result = self.serve().await;
        self.teardown().await;
        result
    }
}

// -----------------------------------------------------------------------------
// ----- FrontendConnection: Private -------------------------------------------

impl FrontendConnection {
    async fn serve(&mut self) -> Result<(), FrontendError> {
        let idle_timeout = self.state.settings.server.idle_timeout;
        let max_frame_size = self.state.settings.server.max_frame_size;

        loop {
            // 1) handle every complete frame already buffered
            while let Some(len) = peek_frame(&self.inbox, max_frame_size)? {
                let frame = self.inbox.split_to(len);
                let message = decode(&frame)?;

                if self.dispatch(message).await == Flow::Close {
                    return Ok(());
                }
            }

            // 2) wait for more bytes, an eviction, or the idle deadline
            self.inbox.reserve(SCRATCH_CAPACITY_HINT);
            select! {
                read_res = timeout(idle_timeout, self.reader.read_buf(&mut self.inbox)) => {
                    let Ok(read_res) = read_res else {
                        info!(peer = %self.context.peer, "idle timeout; closing");
                        return Ok(());
                    };
                    if read_res? == 0 {
                        debug!(peer = %self.context.peer, "client closed the connection");
                        return Ok(());
                    }
                }

                _ = closed(&mut self.close_rx) => {
                    debug!(peer = %self.context.peer, "connection closed by the gateway");
                    return Ok(());
                }
            }
        }
    }

    async fn dispatch(&mut self, message: GatewayMessage) -> Flow {
        debug!(
            peer = %self.context.peer,
            message_type = ?message.message_type,
            request_id = message.request_id,
            "frame"
        );

        match self.context.stage {
            AuthStage::AwaitingAuth => {
                handlers::handle_awaiting_auth(&self.state, &mut self.context, message).await
            }
            AuthStage::Authenticated => {
                handlers::handle_authenticated(&self.state, &mut self.context, message).await
            }
            AuthStage::Closed => Flow::Close,
        }
    }

    async fn teardown(&mut self) {
        if let Some(session) = self.context.close() {
            self.state.sessions.remove_session(session.id()).await;
            info!(
                peer = %self.context.peer,
                client_id = %session.client_id(),
                "session destroyed"
            );
        }
        self.context.handle.close();
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

/// Resolves once the handle is closed. The borrow guard from `wait_for` is
/// dropped here so callers stay `Send` across `select!`.
async fn closed(close_rx: &mut watch::Receiver<bool>) {
    let _ = close_rx.wait_for(|closed| *closed).await;
}

/// Drains queued frames to the socket. On close, whatever is already queued is
/// still written before the socket shuts.
fn spawn_writer_task(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    mut close_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        loop {
            select! {
                biased;

                next = rx.recv() => {
                    let Some(mut buf) = next else { break };
                    if writer.write_all_buf(&mut buf).await.is_err() {
                        return;
                    }

                    // coalesce bursts to cut syscalls
                    while let Ok(mut more) = rx.try_recv() {
                        if writer.write_all_buf(&mut more).await.is_err() {
                            return;
                        }
                    }
                }

                _ = closed(&mut close_rx) => {
                    while let Ok(mut more) = rx.try_recv() {
                        if writer.write_all_buf(&mut more).await.is_err() {
                            return;
                        }
                    }
                    break;
                }
            }
        }

        if let Err(e) = writer.shutdown().await {
            warn!("downstream shutdown failed: {e}");
        }
    });
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
