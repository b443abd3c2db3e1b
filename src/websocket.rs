//! # WebSocket Audio Endpoints
//!
//! Two long-lived bidirectional endpoints for telephony media:
//!
//! 1. **`/ws/audio`** - echo relay. Every inbound binary frame is sent
//!    straight back; a text frame gets one text rejection and the
//!    connection stays open.
//! 2. **`/ws/play/{resource}`** - timed file playback. The named resource is
//!    validated against the audio root, transcoded if compressed, and
//!    streamed as binary frames paced to wall-clock playback time.
//!
//! ## Wire Contract (playback path):
//! Binary frames or a close frame - nothing else. Failures close the
//! connection with a distinct non-1000 code (see `StreamError::close_code`);
//! no error text is ever written onto the stream.
//!
//! ## Actor Model:
//! Each connection is an independent Actix actor. The playback send loop
//! runs in a spawned Tokio task that owns the `StreamSession`; the actor
//! relays its chunks onto the socket and flips a shared disconnect flag the
//! task polls once per chunk.

use crate::audio::stream::{
    StreamError, StreamOutcome, StreamSession, StreamSettings, StreamSink,
};
use crate::state::AppState;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The single text response the echo path gives to a non-binary frame.
const ECHO_TEXT_REJECTION: &str = "Error: Only binary audio data is supported.";

/// Map a terminal session failure onto its close frame.
fn close_reason_for(err: &StreamError) -> ws::CloseReason {
    ws::CloseReason {
        code: ws::CloseCode::Other(err.close_code()),
        description: Some(err.reason().to_string()),
    }
}

// ---------------------------------------------------------------------------
// Echo relay
// ---------------------------------------------------------------------------

/// Stateless bidirectional relay: frames in, identical frames out.
pub struct EchoWebSocket;

impl Actor for EchoWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        info!("Echo session started");
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("Echo session ended");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for EchoWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                // Echoed back verbatim, byte for byte.
                ctx.binary(data);
            }
            Ok(ws::Message::Text(_)) => {
                // Non-terminal: reject the frame, keep the session alive.
                ctx.text(ECHO_TEXT_REJECTION);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
            }
            Ok(ws::Message::Close(reason)) => {
                debug!("Echo peer closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {
                // Pong/continuation/nop frames carry nothing to relay.
            }
            Err(err) => {
                // A receive error is a disconnect, not a reportable failure.
                debug!("Echo receive error, treating as disconnect: {}", err);
                ctx.stop();
            }
        }
    }
}

/// `/ws/audio` upgrade handler.
pub async fn echo_websocket(req: HttpRequest, stream: web::Payload) -> ActixResult<HttpResponse> {
    info!(
        peer = ?req.connection_info().peer_addr(),
        "New echo connection"
    );
    ws::start(EchoWebSocket, &req, stream)
}

// ---------------------------------------------------------------------------
// File playback
// ---------------------------------------------------------------------------

/// One paced binary chunk from the session task.
#[derive(Message)]
#[rtype(result = "()")]
struct Chunk(Vec<u8>);

/// The session task is done; close the connection accordingly.
/// `None` means the peer is already gone and no close frame is needed.
#[derive(Message)]
#[rtype(result = "()")]
struct SessionDone(Option<ws::CloseReason>);

/// Connection-side half of a playback session.
///
/// Owns the socket; the `StreamSession` itself runs in a spawned task and
/// talks back through the actor mailbox, which preserves chunk order.
pub struct PlaybackWebSocket {
    resource: String,
    app_state: web::Data<AppState>,
    disconnected: Arc<AtomicBool>,
}

impl PlaybackWebSocket {
    pub fn new(resource: String, app_state: web::Data<AppState>) -> Self {
        Self {
            resource,
            app_state,
            disconnected: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Sink handed to the session task: chunks go through the actor mailbox,
/// the disconnect flag is shared with the actor.
struct ActorSink {
    addr: Addr<PlaybackWebSocket>,
    disconnected: Arc<AtomicBool>,
}

impl StreamSink for ActorSink {
    fn send_chunk(&mut self, chunk: Vec<u8>) {
        self.addr.do_send(Chunk(chunk));
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Relaxed)
    }
}

impl Actor for PlaybackWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.app_state.increment_active_sessions();

        let settings = StreamSettings::from_config(&self.app_state.get_config());
        let resource = self.resource.clone();
        let app_state = self.app_state.clone();
        let mut sink = ActorSink {
            addr: ctx.address(),
            disconnected: self.disconnected.clone(),
        };
        let addr = ctx.address();

        tokio::spawn(async move {
            let mut session = StreamSession::new(&resource);
            info!(session_id = %session.id(), resource = %resource, "Playback session started");

            let result = session.run(&settings, &mut sink).await;
            debug!(
                session_id = %session.id(),
                final_state = ?session.state(),
                bytes_sent = session.bytes_sent(),
                "Session task finished"
            );
            app_state.record_stream_totals(session.bytes_sent(), session.chunks_sent());

            let close = match result {
                Ok(StreamOutcome::Completed) => {
                    Some(ws::CloseReason::from(ws::CloseCode::Normal))
                }
                // The peer is already gone; there is nobody to close to.
                Ok(StreamOutcome::Disconnected) => None,
                Err(err) => {
                    warn!(resource = %resource, error = %err, "Closing playback with error code");
                    Some(close_reason_for(&err))
                }
            };

            addr.do_send(SessionDone(close));
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Seen by the session task at its next disconnect poll.
        self.disconnected.store(true, Ordering::Relaxed);
        self.app_state.decrement_active_sessions();
        info!(resource = %self.resource, "Playback connection closed");
    }
}

impl Handler<Chunk> for PlaybackWebSocket {
    type Result = ();

    fn handle(&mut self, msg: Chunk, ctx: &mut Self::Context) {
        ctx.binary(msg.0);
    }
}

impl Handler<SessionDone> for PlaybackWebSocket {
    type Result = ();

    fn handle(&mut self, msg: SessionDone, ctx: &mut Self::Context) {
        if let Some(reason) = msg.0 {
            ctx.close(Some(reason));
        }
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for PlaybackWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Close(reason)) => {
                debug!(resource = %self.resource, "Playback peer closed: {:?}", reason);
                self.disconnected.store(true, Ordering::Relaxed);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
            }
            Ok(_) => {
                // Inbound audio or text during playback carries no meaning
                // for the pacer and is dropped.
            }
            Err(err) => {
                debug!(resource = %self.resource, "Playback receive error, treating as disconnect: {}", err);
                self.disconnected.store(true, Ordering::Relaxed);
                ctx.stop();
            }
        }
    }
}

/// `/ws/play/{resource}` upgrade handler.
///
/// Refuses the upgrade outright when the session limit is reached; resource
/// validation itself happens inside the session so its failure can use the
/// close-code contract.
pub async fn play_websocket(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let resource = path.into_inner();
    let config = app_state.get_config();

    let active = app_state.get_metrics_snapshot().active_stream_sessions;
    if active as usize >= config.performance.max_concurrent_sessions {
        warn!(
            active,
            limit = config.performance.max_concurrent_sessions,
            "Rejecting playback connection: session limit reached"
        );
        return Ok(HttpResponse::ServiceUnavailable().finish());
    }

    info!(
        peer = ?req.connection_info().peer_addr(),
        resource = %resource,
        "New playback connection"
    );

    ws::start(PlaybackWebSocket::new(resource, app_state), &req, stream)
}
