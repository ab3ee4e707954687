use bytes::BytesMut;
use dashmap::DashMap;
use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::{Mutex, mpsc, oneshot},
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};

use super::{error::UpstreamError, http_codec, translator::ProtocolTranslator};
use crate::config::UpstreamSettings;
use crate::shared_types::ServiceInstance;
use crate::wire_protocol::GatewayMessage;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const READ_CAPACITY_HINT: usize = 8192;

const STATE_IDLE: u8 = 0;
const STATE_RECONNECTING: u8 = 1;

// -----------------------------------------------------------------------------
// ----- UpstreamConnection ----------------------------------------------------

type Reply = Result<GatewayMessage, UpstreamError>;

/// One persistent, non-multiplexed HTTP/1.1 link to a backend instance.
///
/// The object outlives its transport: on an unplanned close it reconnects in
/// place, bounded by a per-incident and a lifetime retry cap. Responses are
/// paired with requests by order; a per-transport FIFO holds the requests
/// written on it and the reader pops one per response.
///
/// Waiters are keyed by a connection-local sequence number, never by the
/// caller's requestId: many downstream clients share one connection and
/// their requestIds may collide.
pub struct UpstreamConnection {
    instance: ServiceInstance,
    label: String,
    settings: UpstreamSettings,

    link: Mutex<Option<Link>>,
    active: AtomicBool,
    generation: AtomicU64,

    pending: DashMap<u64, oneshot::Sender<Reply>>,
    next_seq: AtomicU64,

    state: AtomicU8,
    incident_retries: AtomicU32,
    total_retries: AtomicU64,
    shutting_down: AtomicBool,
    closed: AtomicBool,
}

/// The live transport. Dropping it stops the reader for this generation.
struct Link {
    writer: OwnedWriteHalf,
    fifo: mpsc::UnboundedSender<Outstanding>,
    generation: u64,
    _stop: oneshot::Sender<()>,
}

struct Outstanding {
    seq: u64,
    template: GatewayMessage,
}

struct ReaderParts {
    reader: OwnedReadHalf,
    fifo: mpsc::UnboundedReceiver<Outstanding>,
    stop: oneshot::Receiver<()>,
    generation: u64,
}

// -----------------------------------------------------------------------------
// ----- UpstreamConnection: Static --------------------------------------------

impl UpstreamConnection {
    /// Open the first transport. A failure here is returned to the caller
    /// rather than retried; retries only follow an established link.
    pub async fn connect(
        instance: ServiceInstance,
        settings: UpstreamSettings,
    ) -> Result<Arc<Self>, UpstreamError> {
        let conn = Arc::new(Self {
            label: instance.to_string(),
            instance,
            settings,
            link: Mutex::new(None),
            active: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            pending: DashMap::new(),
            next_seq: AtomicU64::new(0),
            state: AtomicU8::new(STATE_IDLE),
            incident_retries: AtomicU32::new(0),
            total_retries: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        let parts = conn.open_link().await?;
        conn.spawn_reader(parts);
        info!(instance = %conn.label, "upstream connection established");

        Ok(conn)
    }
}

// -----------------------------------------------------------------------------
// ----- UpstreamConnection: Public --------------------------------------------

impl UpstreamConnection {
    /// Write `message` as an HTTP request and wait for its correlated reply.
    ///
    /// Fails fast when no transport is up. The waiter is registered only
    /// after the write succeeded.
    pub async fn send(&self, message: &GatewayMessage) -> Result<GatewayMessage, UpstreamError> {
        let request_id = message.request_id;

        let (seq, rx) = {
            let mut guard = self.link.lock().await;
            let Some(link) = guard.as_mut() else {
                return Err(UpstreamError::NotActive(self.label.clone()));
            };

            let payload = ProtocolTranslator::to_http_request(message, &self.instance)?;

            if let Err(e) = link.writer.write_all(&payload).await {
                // the reader sees the link go away and starts the reconnect
                guard.take();
                self.active.store(false, Ordering::Release);
                warn!(instance = %self.label, request_id, "upstream write failed: {e}");
                return Err(UpstreamError::Write {
                    instance: self.label.clone(),
                    reason: e.to_string(),
                });
            }

            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = oneshot::channel();
            self.pending.insert(seq, tx);

            let outstanding = Outstanding {
                seq,
                template: message.clone(),
            };
            if link.fifo.send(outstanding).is_err() {
                self.pending.remove(&seq);
                return Err(UpstreamError::ConnectionClosed(self.label.clone()));
            }

            (seq, rx)
        };

        let outcome = match self.settings.request_timeout() {
            Some(limit) => match timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.pending.remove(&seq);
                    return Err(UpstreamError::RequestTimeout {
                        request_id,
                        timeout: limit,
                    });
                }
            },
            None => rx.await,
        };

        match outcome {
            Ok(reply) => reply,
            Err(_) => Err(UpstreamError::ConnectionClosed(self.label.clone())),
        }
    }

    /// Planned teardown: no reconnect follows, every waiter is failed.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.closed.store(true, Ordering::Release);

        self.link.lock().await.take();
        self.active.store(false, Ordering::Release);
        self.fail_all_pending();

        debug!(instance = %self.label, "upstream connection shut down");
    }

    pub fn instance(&self) -> &ServiceInstance {
        &self.instance
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Permanently dead: retry budget exhausted or shut down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_RECONNECTING
    }

    /// Attempts made in the current (or last) reconnect incident.
    pub fn retry_count(&self) -> u32 {
        self.incident_retries.load(Ordering::Acquire)
    }

    pub fn total_retry_count(&self) -> u64 {
        self.total_retries.load(Ordering::Acquire)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

// -----------------------------------------------------------------------------
// ----- UpstreamConnection: Transport -----------------------------------------

impl UpstreamConnection {
    async fn open_link(&self) -> Result<ReaderParts, UpstreamError> {
        let authority = self.instance.authority();
        let limit = self.settings.connect_timeout;

        let stream = match timeout(limit, TcpStream::connect(&authority)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(UpstreamError::Connect {
                    instance: self.label.clone(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(UpstreamError::ConnectTimeout {
                    instance: self.label.clone(),
                    timeout: limit,
                });
            }
        };
        stream.set_nodelay(true).map_err(|e| UpstreamError::Connect {
            instance: self.label.clone(),
            reason: e.to_string(),
        })?;

        let (reader, writer) = stream.into_split();
        let (fifo_tx, fifo_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();

        let mut guard = self.link.lock().await;
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(UpstreamError::ConnectionClosed(self.label.clone()));
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *guard = Some(Link {
            writer,
            fifo: fifo_tx,
            generation,
            _stop: stop_tx,
        });
        self.active.store(true, Ordering::Release);

        Ok(ReaderParts {
            reader,
            fifo: fifo_rx,
            stop: stop_rx,
            generation,
        })
    }

    fn spawn_reader(self: &Arc<Self>, parts: ReaderParts) {
        let weak = Arc::downgrade(self);
        let label = self.label.clone();
        tokio::spawn(read_loop(weak, label, parts));
    }

    /// Drop the link if it still belongs to `generation`.
    async fn detach(&self, generation: u64) {
        let mut guard = self.link.lock().await;
        if guard.as_ref().is_some_and(|l| l.generation == generation) {
            guard.take();
            self.active.store(false, Ordering::Release);
        }
    }

    fn complete(&self, seq: u64, reply: Reply) {
        match self.pending.remove(&seq) {
            Some((_, tx)) => {
                let _ = tx.send(reply);
            }
            None => debug!(instance = %self.label, seq, "dropping reply with no waiter"),
        }
    }

    fn fail_all_pending(&self) {
        let seqs: Vec<u64> = self.pending.iter().map(|e| *e.key()).collect();
        for seq in seqs {
            if let Some((_, tx)) = self.pending.remove(&seq) {
                let _ = tx.send(Err(UpstreamError::ConnectionClosed(self.label.clone())));
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- UpstreamConnection: Reconnect -----------------------------------------

impl UpstreamConnection {
    /// Called once per dead transport. Only the caller that wins the
    /// Idle -> Reconnecting swap starts a loop.
    fn on_transport_closed(self: &Arc<Self>, generation: u64) {
        if self.shutting_down.load(Ordering::Acquire) || self.is_closed() {
            return;
        }
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        if self
            .state
            .compare_exchange(
                STATE_IDLE,
                STATE_RECONNECTING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        warn!(instance = %self.label, "upstream transport closed; reconnecting");
        let this = self.clone();
        tokio::spawn(async move { this.reconnect_loop().await });
    }

    async fn reconnect_loop(self: Arc<Self>) {
        let max_incident = self.settings.max_retries_per_incident;
        let max_total = self.settings.max_retries_total;

        loop {
            if self.shutting_down.load(Ordering::Acquire) {
                break;
            }

            let incident = self.incident_retries.load(Ordering::Acquire);
            let total = self.total_retries.load(Ordering::Acquire);
            if incident >= max_incident || total >= max_total {
                warn!(
                    instance = %self.label,
                    incident, total, "upstream retry budget exhausted; giving up"
                );
                self.closed.store(true, Ordering::Release);
                self.fail_all_pending();
                break;
            }

            let attempt = self.incident_retries.fetch_add(1, Ordering::AcqRel) + 1;
            self.total_retries.fetch_add(1, Ordering::AcqRel);
            sleep(self.settings.backoff_for(attempt)).await;

            if self.shutting_down.load(Ordering::Acquire) {
                break;
            }

            match self.open_link().await {
                Ok(parts) => {
                    self.incident_retries.store(0, Ordering::Release);
                    self.state.store(STATE_IDLE, Ordering::Release);
                    info!(instance = %self.label, attempt, "upstream reconnected");
                    self.spawn_reader(parts);
                    return;
                }
                Err(e) => {
                    debug!(instance = %self.label, attempt, "reconnect attempt failed: {e}");
                }
            }
        }

        self.state.store(STATE_IDLE, Ordering::Release);
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Reader ------------------------------------------------------

async fn read_loop(weak: Weak<UpstreamConnection>, label: String, parts: ReaderParts) {
    let ReaderParts {
        mut reader,
        mut fifo,
        mut stop,
        generation,
    } = parts;

    let mut inbox = BytesMut::with_capacity(READ_CAPACITY_HINT);

    'io: loop {
        loop {
            let response = match http_codec::decode_response(&mut inbox) {
                Ok(Some(response)) => response,
                Ok(None) => break,
                Err(e) => {
                    warn!(instance = %label, "malformed upstream response: {e}");
                    break 'io;
                }
            };
            if response.is_interim() {
                continue;
            }

            let next = select! {
                next = fifo.recv() => next,
                _ = &mut stop => break 'io,
            };
            let Some(Outstanding { seq, template }) = next else {
                warn!(instance = %label, "upstream response with no outstanding request");
                break 'io;
            };

            let Some(conn) = weak.upgrade() else {
                break 'io;
            };
            let reply = ProtocolTranslator::from_http_response(&template, response);
            conn.complete(seq, Ok(reply));
        }

        inbox.reserve(READ_CAPACITY_HINT);
        select! {
            read = reader.read_buf(&mut inbox) => match read {
                Ok(0) => {
                    debug!(instance = %label, "upstream closed the transport");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(instance = %label, "upstream read failed: {e}");
                    break;
                }
            },
            _ = &mut stop => break,
        }
    }

    let conn = weak.upgrade();
    if let Some(conn) = conn.as_ref() {
        conn.detach(generation).await;
    }

    // Link is gone, so the FIFO has no more senders: drain it completely.
    fifo.close();
    while let Some(Outstanding { seq, .. }) = fifo.recv().await {
        if let Some(conn) = conn.as_ref() {
            conn.complete(seq, Err(UpstreamError::ConnectionClosed(label.clone())));
        }
    }

    if let Some(conn) = conn {
        conn.on_transport_closed(generation);
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
