//! # WebSocket Relay Handler
//!
//! Clients connect to `/ws` (or `/`) and send raw audio as binary messages.
//! Every message gets exactly one JSON reply on the same connection:
//!
//! - **Success**: `{"transcription": "<text>"}`
//! - **Failure**: `{"error": "<message>"}`
//!
//! ## Per-connection ordering:
//! Messages are queued and relayed one at a time, so replies come back in the
//! order the messages were sent. The relay runs as a spawned actor future, which
//! keeps ping/pong/close frames flowing while the remote call is pending.
//!
//! At most `relay.max_pending_messages` audio messages wait behind the one in
//! flight; extra audio is answered with an error instead of being buffered.
//!
//! ## Oversized frames:
//! A single frame over `relay.max_message_bytes` leaves the codec unable to read
//! further input. The oversized message gets an error reply, then the connection
//! is closed with code 1009 like any other close.
//!
//! ## Disconnects:
//! When the connection closes (or misses heartbeats), the actor stops and its
//! spawned futures are dropped. A relay dropped mid-flight removes its transient
//! file through the storage guard; queued messages never touched storage.

use crate::error::RelayError;
use crate::relay::{self, RelayResponse};
use crate::state::AppState;
use crate::transcription::AudioPayload;

use actix::prelude::*;
use actix_http::ws::Item;
use actix_web::web::Bytes;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const EXPECTED_BINARY: &str = "Expected a binary audio message";
pub const ORPHAN_CONTINUATION: &str = "Continuation frame without a starting fragment";
pub const INTERRUPTED_MESSAGE: &str = "Fragmented message interrupted by a new message";
pub const TOO_MANY_PENDING: &str = "Too many pending messages";

fn too_large(max_bytes: usize) -> String {
    format!("Message exceeds {} bytes", max_bytes)
}

/// A complete inbound message waiting for its turn.
#[derive(Debug, PartialEq)]
enum Inbound {
    Audio(AudioPayload),
    Rejected(String),
}

/// Reassembles fragmented (continuation-frame) messages.
///
/// Oversized messages are discarded fragment by fragment and reported once,
/// when their final fragment arrives.
#[derive(Debug)]
struct FragmentAssembler {
    max_bytes: usize,
    partial: Option<PartialMessage>,
}

#[derive(Debug)]
struct PartialMessage {
    binary: bool,
    data: Vec<u8>,
    overflowed: bool,
}

impl FragmentAssembler {
    fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            partial: None,
        }
    }

    /// Feed one continuation item; returns the messages it completed or rejected.
    fn push(&mut self, item: Item) -> Vec<Inbound> {
        let mut ready = Vec::new();

        match item {
            Item::FirstBinary(data) => self.start(true, data, &mut ready),
            Item::FirstText(data) => self.start(false, data, &mut ready),
            Item::Continue(data) => {
                if !self.append(&data) {
                    ready.push(Inbound::Rejected(ORPHAN_CONTINUATION.to_string()));
                }
            }
            Item::Last(data) => {
                if self.append(&data) {
                    if let Some(done) = self.partial.take() {
                        ready.push(self.finish(done));
                    }
                } else {
                    ready.push(Inbound::Rejected(ORPHAN_CONTINUATION.to_string()));
                }
            }
        }

        ready
    }

    fn start(&mut self, binary: bool, data: Bytes, ready: &mut Vec<Inbound>) {
        if self.partial.take().is_some() {
            ready.push(Inbound::Rejected(INTERRUPTED_MESSAGE.to_string()));
        }
        self.partial = Some(PartialMessage {
            binary,
            data: Vec::new(),
            overflowed: false,
        });
        self.append(&data);
    }

    /// Returns false when there is no message in progress.
    fn append(&mut self, data: &[u8]) -> bool {
        let max_bytes = self.max_bytes;
        match self.partial.as_mut() {
            Some(partial) => {
                if !partial.overflowed {
                    if partial.data.len() + data.len() > max_bytes {
                        partial.overflowed = true;
                        partial.data = Vec::new();
                    } else {
                        partial.data.extend_from_slice(data);
                    }
                }
                true
            }
            None => false,
        }
    }

    fn finish(&self, done: PartialMessage) -> Inbound {
        if done.overflowed {
            Inbound::Rejected(too_large(self.max_bytes))
        } else if done.binary {
            Inbound::Audio(AudioPayload::from(done.data))
        } else {
            Inbound::Rejected(EXPECTED_BINARY.to_string())
        }
    }
}

/// One actor per WebSocket connection.
pub struct RelayWebSocket {
    connection_id: Uuid,
    state: AppState,

    /// Complete messages not yet relayed, oldest first
    queue: VecDeque<Inbound>,

    /// Whether a relay for this connection is currently running
    in_flight: bool,

    fragments: FragmentAssembler,
    last_heartbeat: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl RelayWebSocket {
    pub fn new(state: AppState) -> Self {
        let relay_config = &state.config.relay;
        Self {
            connection_id: Uuid::new_v4(),
            fragments: FragmentAssembler::new(relay_config.max_message_bytes),
            heartbeat_interval: Duration::from_secs(relay_config.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(relay_config.client_timeout_secs),
            queue: VecDeque::new(),
            in_flight: false,

            last_heartbeat: Instant::now(),
            state,
        }
    }

    fn enqueue(&mut self, inbound: Inbound, ctx: &mut ws::WebsocketContext<Self>) {
        let max_pending = self.state.config.relay.max_pending_messages;
        let inbound = match inbound {
            Inbound::Audio(_) if self.pending_audio() >= max_pending => {
                Inbound::Rejected(TOO_MANY_PENDING.to_string())
            }
            other => other,
        };
        self.queue.push_back(inbound);
        self.drive(ctx);
    }

    fn pending_audio(&self) -> usize {
        self.queue
            .iter()
            .filter(|inbound| matches!(inbound, Inbound::Audio(_)))
            .count()
    }


    /// Start the next queued relay unless one is already running.
    fn drive(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        while !self.in_flight {
            match self.queue.pop_front() {
                None => return,
                Some(Inbound::Rejected(reason)) => {
                    let err = RelayError::Protocol(reason);
                    warn!(connection_id = %self.connection_id, error = %err, "Rejected inbound message");
                    self.state.record_rejected_message();
                    self.send_response(&RelayResponse::from_error(&err), ctx);
                }
                Some(Inbound::Audio(payload)) => self.start_relay(payload, ctx),
            }
        }
    }

    fn start_relay(&mut self, payload: AudioPayload, ctx: &mut ws::WebsocketContext<Self>) {
        self.in_flight = true;

        let bytes = payload.len();
        let storage = self.state.storage.clone();
        let transcriber = self.state.transcriber.clone();
        info!(connection_id = %self.connection_id, bytes, "Received audio data");

        let fut = async move { relay::relay_payload(payload, &storage, transcriber.as_ref()).await };

        ctx.spawn(fut.into_actor(self).map(move |outcome, act, ctx| {
            act.in_flight = false;
            act.state
                .record_relay(bytes, outcome.elapsed(), outcome.response().is_success());
            act.send_response(outcome.response(), ctx);

            // Response is out; remove the staged file without holding up the queue
            ctx.spawn(
                async move {
                    outcome.cleanup().await;
                }
                .into_actor(&*act),
            );

            act.drive(ctx);
        }));
    }

    fn send_response(&self, response: &RelayResponse, ctx: &mut ws::WebsocketContext<Self>) {
        debug!(
            connection_id = %self.connection_id,
            success = response.is_success(),
            "Sending relay response"
        );
        ctx.text(response.to_json());
    }
}

impl Actor for RelayWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection_id = %self.connection_id, "WebSocket connected");
        self.state.connection_opened();

        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(connection_id = %act.connection_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.state.connection_closed();

        let abandoned = self.queue.len() + usize::from(self.in_flight);
        if abandoned > 0 {
            warn!(
                connection_id = %self.connection_id,
                abandoned,
                "WebSocket closed with undelivered relay responses"
            );
        }
        info!(connection_id = %self.connection_id, "WebSocket disconnected");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelayWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        // A broken codec keeps yielding the same error until the actor is gone
        if !ctx.state().alive() {
            return;
        }

        let msg = match msg {
            Ok(msg) => msg,
            Err(ws::ProtocolError::Overflow) => {
                // The codec cannot read past an oversized frame: answer it, then close
                let max_bytes = self.state.config.relay.max_message_bytes;
                let err = RelayError::Protocol(too_large(max_bytes));
                warn!(connection_id = %self.connection_id, error = %err, "Inbound frame exceeds size limit");
                self.state.record_rejected_message();
                self.send_response(&RelayResponse::from_error(&err), ctx);
                ctx.close(Some(ws::CloseCode::Size.into()));
                ctx.stop();
                return;
            }
            Err(err) => {
                error!(connection_id = %self.connection_id, error = %err, "WebSocket protocol error");
                ctx.close(Some(ws::CloseCode::Protocol.into()));
                ctx.stop();
                return;
            }
        };

        self.last_heartbeat = Instant::now();

        match msg {
            ws::Message::Binary(data) => {
                self.enqueue(Inbound::Audio(AudioPayload::from(data)), ctx);
            }
            ws::Message::Text(_) => {
                self.enqueue(Inbound::Rejected(EXPECTED_BINARY.to_string()), ctx);
            }
            ws::Message::Continuation(item) => {
                for inbound in self.fragments.push(item) {
                    self.enqueue(inbound, ctx);
                }
            }
            ws::Message::Ping(data) => ctx.pong(&data),
            ws::Message::Pong(_) => {}
            ws::Message::Close(reason) => {
                info!(connection_id = %self.connection_id, reason = ?reason, "WebSocket close requested");
                ctx.close(reason);
                ctx.stop();
            }
            ws::Message::Nop => {}
        }
    }
}

/// WebSocket endpoint handler.
///
/// Upgrades the HTTP request and hands the connection to a [`RelayWebSocket`]
/// actor. Frames up to `relay.max_message_bytes` are accepted.
pub async fn relay_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let actor = RelayWebSocket::new(state.get_ref().clone());
    info!(
        connection_id = %actor.connection_id,
        peer = ?req.connection_info().peer_addr(),
        "WebSocket upgrade requested"
    );

    ws::WsResponseBuilder::new(actor, &req, stream)
        .frame_size(state.config.relay.max_message_bytes)
        .start()
}
