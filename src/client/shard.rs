//! Single-shard event loop shared by all client implementations

use bytes::Bytes;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Interval, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument};

use super::{
    ClientKind, ClientOptions, Decode, EnvelopeDecoder, EventHandler, FrameHandler, GatewayClient,
    ReadyHandler,
};
use crate::gateway::{self, codec, opcode, GatewayEvent};
use crate::network::{self, FrameIngress, Transport};
use crate::Result;

#[cfg(feature = "zlib")]
use crate::gateway::zlib::ZlibStream as Inflater;

/// Stand-in that can never be constructed without zlib support
#[cfg(not(feature = "zlib"))]
enum Inflater {}

#[cfg(not(feature = "zlib"))]
impl Inflater {
    fn push(&mut self, _frame: &[u8]) -> Result<Option<&[u8]>> {
        match *self {}
    }
}

#[cfg(feature = "zlib")]
#[allow(clippy::unnecessary_wraps)]
fn inflater(compression: bool) -> Result<Option<Inflater>> {
    Ok(compression.then(Inflater::new))
}

#[cfg(not(feature = "zlib"))]
fn inflater(compression: bool) -> Result<Option<Inflater>> {
    if compression {
        return Err(crate::BenchError::Environment(
            "This build has no zlib-stream support; rebuild with the `zlib` feature".to_string(),
        ));
    }
    Ok(None)
}

/// Handshake events among the first `target` events `frames` decode to
///
/// Frames and messages that fail to inflate or decode are skipped, as the
/// event loop skips them.
pub(super) fn handshake_events_within(
    options: &ClientOptions,
    frames: &[Bytes],
    target: u64,
) -> Result<u64> {
    let mut inflater = inflater(options.compression)?;
    let mut decoder = EnvelopeDecoder::new(options.encoding);
    let mut seen = 0u64;
    let mut handshakes = 0u64;

    for frame in frames {
        if seen >= target {
            break;
        }

        let message: &[u8] = match inflater.as_mut() {
            None => &frame[..],
            Some(inflater) => match inflater.push(frame) {
                Ok(Some(message)) => message,
                Ok(None) | Err(_) => continue,
            },
        };

        let result = decoder.decode(message, &mut |event| {
            if seen < target {
                seen += 1;
                handshakes += u64::from(event.is_handshake());
            }
        });
        if let Err(e) = result {
            debug!("Not counting undecodable message: {e}");
        }
    }

    Ok(handshakes)
}

/// What the event loop learned from inbound payloads
#[derive(Debug, Default)]
struct SessionState {
    seq: Option<u64>,
    heartbeat_interval: Option<u64>,
    outbound: Vec<Value>,
    closing: bool,
}

impl SessionState {
    /// Track sequence numbers and, on a live connection, react to control
    /// opcodes
    fn observe(&mut self, event: &GatewayEvent<'_>, options: &ClientOptions, live: bool) {
        if event.seq.is_some() {
            self.seq = event.seq;
        }

        if !live {
            return;
        }

        match event.op {
            opcode::HELLO => {
                match event.data.to_value() {
                    Ok(hello) => self.heartbeat_interval = gateway::heartbeat_interval(&hello),
                    Err(e) => warn!("Unreadable HELLO payload: {e}"),
                }
                self.outbound.push(gateway::identify_payload(
                    options.token.as_deref().unwrap_or_default(),
                    options.intents,
                    options.shard_id,
                    options.shard_count,
                ));
            }
            opcode::HEARTBEAT => self.outbound.push(gateway::heartbeat_payload(self.seq)),
            opcode::RECONNECT | opcode::INVALID_SESSION => {
                info!(op = event.op, "Gateway ended the session");
                self.closing = true;
            }
            _ => {}
        }
    }
}

/// A client for one shard, parameterized by how it decodes messages
pub struct ShardClient<D> {
    kind: ClientKind,
    options: ClientOptions,
    decoder: D,
    frame_handler: Option<FrameHandler>,
    event_handler: Option<EventHandler>,
    ready_handler: Option<ReadyHandler>,
    transport: Option<Transport>,
}

impl<D: Decode> ShardClient<D> {
    /// Create a client that has not connected yet
    pub fn new(kind: ClientKind, options: ClientOptions, decoder: D) -> Self {
        Self {
            kind,
            options,
            decoder,
            frame_handler: None,
            event_handler: None,
            ready_handler: None,
            transport: None,
        }
    }

    async fn event_loop(mut self) -> Result<()> {
        let mut transport = match self.transport.take() {
            Some(transport) => transport,
            None => {
                let url = gateway::gateway_url(
                    &self.options.gateway_url,
                    self.options.encoding,
                    self.options.compression,
                );
                Transport::connect(&url).await?
            }
        };
        let live = transport.is_live();
        let mut inflater = inflater(self.options.compression)?;
        let mut session = SessionState::default();
        let mut heartbeat: Option<Interval> = None;

        debug!(live, compression = self.options.compression, encoding = %self.options.encoding, "Client started");

        if let Some(ready) = self.ready_handler.take() {
            ready();
        }

        loop {
            tokio::select! {
                frame = transport.next_frame() => {
                    let Some(frame) = frame else {
                        debug!("Transport closed");
                        break;
                    };

                    self.handle_frame(&frame?, inflater.as_mut(), &mut session, live);

                    for payload in session.outbound.drain(..) {
                        transport.send(codec::encode_message(self.options.encoding, &payload)?).await?;
                    }

                    if heartbeat.is_none() {
                        if let Some(ms) = session.heartbeat_interval {
                            debug!(interval_ms = ms, "Heartbeating");
                            let mut interval = time::interval(Duration::from_millis(ms));
                            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                            interval.reset();
                            heartbeat = Some(interval);
                        }
                    }

                    if session.closing {
                        transport.close().await;
                        break;
                    }
                }
                () = next_tick(heartbeat.as_mut()) => {
                    let payload = gateway::heartbeat_payload(session.seq);
                    transport.send(codec::encode_message(self.options.encoding, &payload)?).await?;
                }
            }
        }

        Ok(())
    }

    /// Tap, inflate and decode one frame; undecodable input is logged and
    /// dropped
    fn handle_frame(
        &mut self,
        frame: &Bytes,
        inflater: Option<&mut Inflater>,
        session: &mut SessionState,
        live: bool,
    ) {
        if let Some(tap) = self.frame_handler.as_mut() {
            tap(frame);
        }

        let message: &[u8] = match inflater {
            None => &frame[..],
            Some(inflater) => match inflater.push(frame) {
                Ok(Some(message)) => message,
                Ok(None) => return,
                Err(e) => {
                    warn!("Dropping frame: {e}");
                    return;
                }
            },
        };

        let hide_handshake = self.kind.hides_handshake();
        let options = &self.options;
        let handler = &mut self.event_handler;

        let result = self.decoder.decode(message, &mut |event| {
            session.observe(event, options, live);

            if hide_handshake && event.is_handshake() {
                return;
            }
            if let Some(handler) = handler.as_mut() {
                handler(event);
            }
        });

        if let Err(e) = result {
            warn!("Dropping message: {e}");
        }
    }
}

async fn next_tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl<D: Decode> GatewayClient for ShardClient<D> {
    fn kind(&self) -> ClientKind {
        self.kind
    }

    fn options(&self) -> &ClientOptions {
        &self.options
    }

    fn on_frame(&mut self, handler: FrameHandler) {
        self.frame_handler = Some(handler);
    }

    fn on_event(&mut self, handler: EventHandler) {
        self.event_handler = Some(handler);
    }

    fn on_ready(&mut self, handler: ReadyHandler) {
        self.ready_handler = Some(handler);
    }

    fn test_transport(&mut self) -> FrameIngress {
        let (ingress, transport) = network::test_transport();
        self.transport = Some(transport);
        ingress
    }

    fn run(self: Box<Self>) -> JoinHandle<Result<()>> {
        let span = info_span!(
            "client",
            kind = %self.kind,
            shard = self.options.shard_id,
            shards = self.options.shard_count
        );
        tokio::spawn(self.event_loop().instrument(span))
    }
}
