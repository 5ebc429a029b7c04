// SPDX-License-Identifier: MIT OR Apache-2.0
//! The socket bus: per-connection loop and the frame pipeline.
//!
//! Every inbound frame walks the same path: infra-protocol gate, decode,
//! validate, CASIL, then dispatch by envelope type. Within one connection
//! frames are processed strictly in order; across connections handlers
//! run concurrently. The bus never drops a connection over a recoverable
//! per-frame error — only transport failures close the socket.

use std::sync::Arc;

use arq_casil::{CasilDecision, CasilEngine, CasilOutcome, RequestContext, telemetry};
use arq_core::{
    Envelope, EnvelopeBuilder, EnvelopeType, ErrorCode, JsonMap, MonotonicSequenceGenerator,
    ResponseStatus, vector_clock_merge,
};
use arq_routing::{
    DirectRouter, OperatorAuthPolicy, OperatorRegistry, OutboundFrame, ResultCollector,
    RoutingCoordinator, TaskDispatcher, default_selection, encode_frame,
};
use arq_storage::MessageStorage;
use arq_wire::{WireFormat, detect_wire_format, validate_and_parse_wire};
use axum::{
    Router,
    extract::{
        State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::validate_jwt;
use crate::config::ArqonBusConfig;
use crate::omega::OmegaLane;
use crate::pack::{CronScheduler, KvStore, WebhookHub};

/// Shared bus state. One per process; connections and the command lane
/// hold `Arc`s into it.
pub struct BusCore {
    /// Server configuration.
    pub config: ArqonBusConfig,
    /// Clients, rooms, channels, router.
    pub routing: RoutingCoordinator,
    /// History persistence, absent when disabled.
    pub storage: Option<MessageStorage>,
    /// Policy engine.
    pub casil: Arc<CasilEngine>,
    /// Operator capability groups.
    pub operators: Arc<OperatorRegistry>,
    /// Task dispatch.
    pub dispatcher: TaskDispatcher,
    /// Per-tenant sequence counters.
    pub sequences: Mutex<MonotonicSequenceGenerator>,
    /// Key/value operator pack.
    pub store: KvStore,
    /// Webhook operator pack.
    pub webhooks: WebhookHub,
    /// Cron operator pack.
    pub cron: CronScheduler,
    /// Tier-Omega lane.
    pub omega: OmegaLane,
    /// Process start, for uptime reporting.
    pub started_at: DateTime<Utc>,
    /// This node's vector-clock component.
    pub node_id: String,
}

/// Cheap handle to the bus. Everything is behind one `Arc`.
#[derive(Clone)]
pub struct SocketBus {
    inner: Arc<BusCore>,
}

impl SocketBus {
    /// Build a bus from configuration and an optional storage facade.
    ///
    /// # Errors
    ///
    /// Returns the CASIL compile errors of the initial configuration.
    pub fn new(config: ArqonBusConfig, storage: Option<MessageStorage>) -> Result<Self, Vec<String>> {
        let wire_format = config.infra_protocol.wire_format();
        let routing = RoutingCoordinator::new(wire_format);
        let casil = Arc::new(CasilEngine::new(config.casil.clone())?);

        let operators = Arc::new(OperatorRegistry::with_auth(OperatorAuthPolicy {
            required: config.operator_auth.required,
            token: config.operator_auth.token.clone(),
        }));
        let collector = Arc::new(ResultCollector::new().with_selection(Arc::new(default_selection)));
        let dispatcher = TaskDispatcher::new(
            Arc::clone(&operators),
            Arc::clone(&routing.router) as Arc<dyn DirectRouter>,
            collector,
        );

        let omega = OmegaLane::new(config.tier_omega.max_events, config.tier_omega.max_substrates);
        let storage = if config.storage.enable_persistence {
            storage
        } else {
            None
        };

        Ok(Self {
            inner: Arc::new(BusCore {
                config,
                routing,
                storage,
                casil,
                operators,
                dispatcher,
                sequences: Mutex::new(MonotonicSequenceGenerator::default()),
                store: KvStore::new(),
                webhooks: WebhookHub::new(),
                cron: CronScheduler::new(),
                omega,
                started_at: Utc::now(),
                node_id: format!("arqonbus-{}", Uuid::new_v4().simple()),
            }),
        })
    }

    /// The shared core.
    #[must_use]
    pub fn core(&self) -> &Arc<BusCore> {
        &self.inner
    }

    /// Wire format this bus emits.
    #[must_use]
    pub fn wire_format(&self) -> WireFormat {
        self.inner.config.infra_protocol.wire_format()
    }

    fn json_infra_forbidden(&self) -> bool {
        self.wire_format() == WireFormat::Protobuf && !self.inner.config.allow_json_infra
    }

    /// Encode and queue one envelope to one client.
    pub async fn send_envelope(&self, client_id: &str, envelope: &Envelope) -> bool {
        let Ok(frame) = encode_frame(envelope, self.wire_format()) else {
            warn!(client_id, envelope_id = %envelope.id, "failed to encode outbound envelope");
            return false;
        };
        self.inner
            .routing
            .client_registry
            .send_to_client(client_id, frame)
            .await
    }

    pub(crate) async fn respond_success(
        &self,
        client_id: &str,
        request: &Envelope,
        data: serde_json::Value,
    ) {
        let response = Envelope::success_response(request, data);
        self.send_envelope(client_id, &response).await;
    }

    pub(crate) async fn respond_error_code(
        &self,
        client_id: &str,
        request_id: Option<&str>,
        code: &str,
        message: &str,
    ) {
        let mut builder = EnvelopeBuilder::new(EnvelopeType::Response)
            .status(ResponseStatus::Error)
            .error_code(code)
            .payload_entry("error", json!(message));
        if let Some(request_id) = request_id {
            builder = builder.request_id(request_id);
        }
        let response = builder.build();
        self.send_envelope(client_id, &response).await;
    }

    async fn send_welcome(&self, client_id: &str) {
        let welcome = EnvelopeBuilder::new(EnvelopeType::Message)
            .sender("server")
            .payload(JsonMap::from([
                ("welcome".to_string(), json!("Welcome to ArqonBus")),
                ("client_id".to_string(), json!(client_id)),
                ("server_version".to_string(), json!(env!("CARGO_PKG_VERSION"))),
            ]))
            .build();
        self.send_envelope(client_id, &welcome).await;
    }

    /// Process one raw inbound frame from a registered client.
    pub async fn handle_frame_from_client(&self, client_id: &str, raw: &[u8]) {
        self.inner
            .routing
            .client_registry
            .update_client_activity(client_id)
            .await;

        if detect_wire_format(raw) == WireFormat::Json && self.json_infra_forbidden() {
            // Decode only to correlate; the frame is not processed. The
            // refusal goes out in binary so the server never answers JSON
            // with JSON on a protobuf-only infra path.
            let request_id = serde_json::from_slice::<serde_json::Value>(raw)
                .ok()
                .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_string));
            self.respond_error_code(
                client_id,
                request_id.as_deref(),
                ErrorCode::InfraProtocol.as_str(),
                "JSON frames are not accepted on this infrastructure path",
            )
            .await;
            return;
        }

        let (parsed, errors, format) = validate_and_parse_wire(raw);
        let Some(mut envelope) = parsed else {
            self.respond_error_code(
                client_id,
                None,
                ErrorCode::Validation.as_str(),
                &errors.join("; "),
            )
            .await;
            return;
        };
        if !errors.is_empty() {
            self.respond_error_code(
                client_id,
                Some(&envelope.id),
                ErrorCode::Validation.as_str(),
                &errors.join("; "),
            )
            .await;
            return;
        }
        debug!(client_id, envelope_id = %envelope.id, wire = format.as_str(), "frame accepted");

        envelope.sender = Some(client_id.to_string());

        let ctx = RequestContext {
            client_id: client_id.to_string(),
        };
        let outcome = self.inner.casil.process(&mut envelope, &ctx);
        if outcome.decision != CasilDecision::Allow {
            self.emit_casil_telemetry(&outcome, &envelope).await;
        }
        if outcome.decision == CasilDecision::Block {
            self.respond_error_code(
                client_id,
                Some(&envelope.id),
                &outcome.reason_code,
                "envelope blocked by policy",
            )
            .await;
            return;
        }

        match envelope.kind {
            EnvelopeType::Message => self.handle_message(envelope, client_id).await,
            EnvelopeType::Telemetry => self.handle_telemetry(envelope, client_id).await,
            EnvelopeType::Command => self.handle_command(envelope, client_id).await,
            EnvelopeType::Response | EnvelopeType::OperatorResult => {
                self.handle_operator_result(envelope).await;
            }
        }
    }

    /// Stamp tenant, sequence, and vector-clock metadata prior to
    /// persistence.
    async fn stamp_time_metadata(&self, envelope: &mut Envelope, client_id: &str) {
        let tenant = match envelope.tenant_id() {
            Some(tenant) => tenant.to_string(),
            None => {
                let tenant = self.tenant_of(client_id).await;
                envelope.metadata.insert(
                    arq_core::metadata_keys::TENANT_ID.to_string(),
                    json!(tenant.clone()),
                );
                tenant
            }
        };

        let sequence = self.inner.sequences.lock().await.next(&tenant);
        envelope.set_sequence(sequence);

        let mut node_clock = std::collections::BTreeMap::new();
        node_clock.insert(self.inner.node_id.clone(), sequence);
        let merged = vector_clock_merge(&envelope.vector_clock().unwrap_or_default(), &node_clock);
        envelope.set_vector_clock(&merged);
    }

    pub(crate) async fn tenant_of(&self, client_id: &str) -> String {
        self.inner
            .routing
            .client_registry
            .get_client(client_id)
            .await
            .and_then(|c| c.metadata.get("tenant_id").and_then(|v| v.as_str()).map(str::to_string))
            .unwrap_or_else(|| "default".to_string())
    }

    /// Persist and fan out a routed `message`. The sender never receives
    /// its own message back.
    pub async fn handle_message(&self, mut envelope: Envelope, client_id: &str) {
        envelope.sender = Some(client_id.to_string());
        self.stamp_time_metadata(&mut envelope, client_id).await;

        if !self.persist_or_reject(&envelope, client_id).await {
            return;
        }

        let delivered = self.inner.routing.router.route_message(&envelope, client_id).await;
        debug!(envelope_id = %envelope.id, delivered, "message fanned out");

        self.inner.webhooks.dispatch(&envelope, client_id).await;
    }

    /// Persist `telemetry`; fan out only when both routing hints are set.
    pub async fn handle_telemetry(&self, mut envelope: Envelope, client_id: &str) {
        envelope.sender = Some(client_id.to_string());
        self.stamp_time_metadata(&mut envelope, client_id).await;

        if !self.persist_or_reject(&envelope, client_id).await {
            return;
        }

        if envelope.room.is_some() && envelope.channel.is_some() {
            self.inner.routing.router.route_message(&envelope, client_id).await;
        }
    }

    /// Correlate a `response`/`operator_result` back to its pending
    /// dispatch, if any.
    pub async fn handle_operator_result(&self, envelope: Envelope) {
        let Some(request_id) = envelope.request_id.clone() else {
            return;
        };
        let accepted = self
            .inner
            .dispatcher
            .collector()
            .add_result(&request_id, envelope)
            .await;
        if !accepted {
            debug!(request_id, "result arrived with no pending dispatch");
        }
    }

    /// Persist one envelope, honoring the storage failure posture.
    /// Returns false when the envelope must be rejected (strict mode).
    async fn persist_or_reject(&self, envelope: &Envelope, client_id: &str) -> bool {
        let Some(storage) = &self.inner.storage else {
            return true;
        };

        let failure = match storage.store_message(envelope).await {
            Ok(result) if result.success => None,
            Ok(result) => Some(result.error.unwrap_or_else(|| "append failed".to_string())),
            Err(err) => Some(err.to_string()),
        };

        let Some(failure) = failure else {
            return true;
        };

        if self.inner.config.storage.mode == arq_storage::StorageMode::Strict {
            self.respond_error_code(
                client_id,
                Some(&envelope.id),
                "STORAGE_ERROR",
                &format!("envelope rejected by strict storage: {failure}"),
            )
            .await;
            false
        } else {
            warn!(envelope_id = %envelope.id, error = %failure, "storage failed; broadcast proceeds");
            true
        }
    }

    /// Publish one non-ALLOW policy outcome: a structured log line plus a
    /// `telemetry` envelope routed into the configured telemetry
    /// room/channel and persisted when storage is on.
    async fn emit_casil_telemetry(&self, outcome: &CasilOutcome, envelope: &Envelope) {
        let event = telemetry::build_event(
            outcome,
            envelope.room.as_deref().unwrap_or(""),
            envelope.channel.as_deref().unwrap_or(""),
        );
        warn!(
            decision = %event.decision,
            reason_code = %event.reason_code,
            room = %event.room,
            channel = %event.channel,
            envelope_id = %envelope.id,
            "casil telemetry event"
        );

        let target = &self.inner.config.casil_telemetry;
        let telemetry_envelope = EnvelopeBuilder::new(EnvelopeType::Telemetry)
            .sender("casil")
            .room(target.room.clone())
            .channel(target.channel.clone())
            .payload(event.to_payload())
            .metadata_entry("causal_parent_id", json!(envelope.id))
            .build();

        self.inner
            .routing
            .router
            .route_message(&telemetry_envelope, "casil")
            .await;

        if let Some(storage) = &self.inner.storage
            && let Err(err) = storage.store_message(&telemetry_envelope).await
        {
            debug!(error = %err, "failed to persist casil telemetry");
        }
    }

    /// Cancel cron jobs and pending dispatcher futures. Always drains;
    /// never blocks shutdown on a failing task.
    pub async fn shutdown(&self) {
        info!("bus shutting down; draining cron and dispatcher futures");
        self.inner.cron.cancel_all().await;
        self.inner.dispatcher.collector().cancel_all().await;
        if let Some(storage) = &self.inner.storage {
            storage.close().await;
        }
    }

    /// Run one accepted WebSocket connection to completion.
    pub async fn run_connection(self, socket: WebSocket, metadata: JsonMap) {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundFrame>();
        let client_id = self
            .inner
            .routing
            .client_registry
            .register_client(outbound_tx, metadata)
            .await;
        info!(client_id = %client_id, "connection established");

        self.send_welcome(&client_id).await;

        let (mut sink, mut stream) = socket.split();
        loop {
            tokio::select! {
                outbound = outbound_rx.recv() => {
                    let frame = match outbound {
                        Some(frame) => frame,
                        None => break,
                    };
                    let message = match frame {
                        OutboundFrame::Text(text) => WsMessage::Text(text.into()),
                        OutboundFrame::Binary(bytes) => WsMessage::Binary(bytes.into()),
                    };
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                inbound = stream.next() => {
                    match inbound {
                        Some(Ok(WsMessage::Text(text))) => {
                            self.handle_frame_from_client(&client_id, text.as_bytes()).await;
                        }
                        Some(Ok(WsMessage::Binary(bytes))) => {
                            self.handle_frame_from_client(&client_id, &bytes).await;
                        }
                        Some(Ok(WsMessage::Ping(payload))) => {
                            if sink.send(WsMessage::Pong(payload)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(WsMessage::Pong(_))) => {}
                        Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    }
                }
            }
        }

        self.inner.routing.client_registry.unregister_client(&client_id).await;
        self.inner.operators.remove_client(&client_id).await;
        info!(client_id = %client_id, "connection closed");
    }
}

async fn ws_handler(
    State(bus): State<SocketBus>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    let mut metadata = JsonMap::new();

    if bus.core().config.security.enable_authentication {
        let secret = bus
            .core()
            .config
            .security
            .jwt_secret
            .clone()
            .unwrap_or_default();
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        let Some(token) = token else {
            return (StatusCode::UNAUTHORIZED, "missing bearer token").into_response();
        };
        match validate_jwt(token, &secret) {
            Ok(claims) => {
                if let Some(sub) = claims.sub {
                    metadata.insert("sub".to_string(), json!(sub));
                }
                if let Some(role) = claims.role {
                    metadata.insert("role".to_string(), json!(role));
                }
                if let Some(tenant_id) = claims.tenant_id {
                    metadata.insert("tenant_id".to_string(), json!(tenant_id));
                }
                if let Some(permissions) = claims.permissions {
                    metadata.insert("permissions".to_string(), json!(permissions));
                }
            }
            Err(err) => {
                warn!(error = %err, "rejecting connection with invalid token");
                return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
            }
        }
    }

    upgrade.on_upgrade(move |socket| bus.run_connection(socket, metadata))
}

/// The socket endpoint router (`GET /ws`).
pub fn build_ws_router(bus: SocketBus) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(bus)
}

/// Serve the socket endpoint on an already-bound listener.
///
/// # Errors
///
/// Propagates the listener's I/O error.
pub async fn serve(bus: SocketBus, listener: tokio::net::TcpListener) -> std::io::Result<()> {
    axum::serve(listener, build_ws_router(bus)).await
}
