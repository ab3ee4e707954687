use bytes::Bytes;
use std::{net::SocketAddr, sync::Arc};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::wire_protocol::{CodecError, GatewayMessage, encode};

// -----------------------------------------------------------------------------
// ----- ConnectionHandle ------------------------------------------------------

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("downstream connection {0} is closed")]
    Closed(SocketAddr),

    #[error(transparent)]
    Encode(#[from] CodecError),
}

/// Cheap, cloneable reference to one downstream connection.
///
/// Frames go through the connection's writer task; `close()` asks the
/// connection loop to tear down.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<Bytes>,
    close_tx: Arc<watch::Sender<bool>>,
}

impl ConnectionHandle {
    pub fn new(peer: SocketAddr, outbound: mpsc::UnboundedSender<Bytes>) -> Self {
        let (close_tx, _) = watch::channel(false);
        Self {
            peer,
            outbound,
            close_tx: Arc::new(close_tx),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn send(&self, message: &GatewayMessage) -> Result<(), HandleError> {
        let frame = encode(message)?;
        self.send_raw(frame)
    }

    pub fn send_raw(&self, frame: Bytes) -> Result<(), HandleError> {
        if self.is_closed() {
            return Err(HandleError::Closed(self.peer));
        }
        self.outbound
            .send(frame)
            .map_err(|_| HandleError::Closed(self.peer))
    }

    pub fn close(&self) {
        self.close_tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.close_tx.borrow() || self.outbound.is_closed()
    }

    pub fn subscribe_close(&self) -> watch::Receiver<bool> {
        self.close_tx.subscribe()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire_protocol::{MessageType, decode};

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new("127.0.0.1:5000".parse().unwrap(), tx), rx)
    }

    #[test]
    fn send_encodes_a_frame() {
        let (handle, mut rx) = handle();
        let message = GatewayMessage::new(MessageType::Heartbeat, 3).with_client_id("c");
        handle.send(&message).unwrap();

        let frame = rx.try_recv().unwrap();
        assert_eq!(decode(&frame).unwrap(), message);
    }

    #[tokio::test]
    async fn close_is_observed_and_blocks_sends() {
        let (handle, _rx) = handle();
        let mut closed = handle.subscribe_close();

        handle.clone().close();
        closed.wait_for(|c| *c).await.unwrap();

        assert!(handle.is_closed());
        assert!(matches!(
            handle.send(&GatewayMessage::new(MessageType::Heartbeat, 1)),
            Err(HandleError::Closed(_))
        ));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
