//! Sync orchestration: driving sessions, bounded retry, durable
//! failure recording.
//!
//! The engine owns no transport; callers construct one (the
//! `api_endpoint` in [`EngineConfig`] tells the host where to point it)
//! and hand it in per sync. A transport error aborts the current
//! session and retries a fresh one — replays are safe because the
//! store's append is idempotent. After the retry budget is spent,
//! failure becomes *state*: a `given` event of category `sync_failure`
//! is appended to the local log, so "the sync failed N times for reason
//! X" survives restarts and is queryable like any other fact.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::SessionError;
use crate::event::types::Category;
use crate::event::{EventId, build};
use crate::store::EventStore;

use super::session::{SyncSession, SyncStats};
use super::wire::{Message, SyncScope, SyncTransport};

/// Upper bound on follow-up `WANT` rounds for parents of parked
/// arrivals.
const MAX_FILL_ROUNDS: usize = 8;

// ---------------------------------------------------------------------------
// Config and status
// ---------------------------------------------------------------------------

/// Engine configuration, constructed and persisted by the host.
///
/// There is no process-wide engine; build one per workspace and pass it
/// where it is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Stable device identity, generated once by the host.
    pub device_id: String,

    /// Where the transport should point. Absent means the engine is
    /// offline-only and [`SyncEngine::is_available`] returns `false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,

    /// Retries after the initial attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay; doubles per retry.
    #[serde(default = "default_base_backoff_secs")]
    pub base_backoff_secs: u64,
}

const fn default_max_retries() -> u32 {
    4
}

const fn default_base_backoff_secs() -> u64 {
    2
}

impl EngineConfig {
    /// Config with the default retry policy and no endpoint.
    #[must_use]
    pub const fn new(device_id: String) -> Self {
        Self {
            device_id,
            api_endpoint: None,
            max_retries: default_max_retries(),
            base_backoff_secs: default_base_backoff_secs(),
        }
    }

    /// Set the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.api_endpoint = Some(endpoint.into());
        self
    }
}

/// Engine lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// Ready; no unresolved failure.
    Idle,
    /// The last sync exhausted its retries (or was refused) and a
    /// durable failure record was written.
    Failed,
}

// ---------------------------------------------------------------------------
// SyncEngine
// ---------------------------------------------------------------------------

/// Orchestrates sync sessions against one local store.
#[derive(Debug)]
pub struct SyncEngine {
    config: EngineConfig,
    status: EngineStatus,
}

enum AttemptError {
    /// The wire broke; worth retrying.
    Transport { error: String, stats: SyncStats },
    /// The peer refused or misbehaved; retrying will not help.
    Protocol { stats: SyncStats },
}

impl SyncEngine {
    /// Create an engine.
    #[must_use]
    pub const fn new(config: EngineConfig) -> Self {
        Self {
            config,
            status: EngineStatus::Idle,
        }
    }

    /// The engine's configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> EngineStatus {
        self.status
    }

    /// Whether sync can be attempted at all.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.config.api_endpoint.is_some()
    }

    /// Backoff before the given retry (1-based): 2s, 4s, 8s, 16s with
    /// the default config.
    #[must_use]
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        Duration::from_secs(self.config.base_backoff_secs << exp)
    }

    /// Reconcile `workspace` with the peer behind `transport`,
    /// retrying per the backoff schedule. Blocks between attempts with
    /// `std::thread::sleep`.
    pub fn sync<T: SyncTransport>(
        &mut self,
        store: &mut EventStore,
        workspace: &str,
        transport: &mut T,
    ) -> SyncStats {
        self.sync_with_sleep(store, workspace, transport, std::thread::sleep)
    }

    /// [`Self::sync`] with the inter-attempt sleep injected, so tests
    /// can observe the schedule instead of waiting it out.
    pub fn sync_with_sleep<T: SyncTransport, S: FnMut(Duration)>(
        &mut self,
        store: &mut EventStore,
        workspace: &str,
        transport: &mut T,
        mut sleep: S,
    ) -> SyncStats {
        if !self.is_available() {
            let mut session = SyncSession::new(SyncScope::workspace(workspace));
            return session.fail("engine unavailable: no api endpoint configured");
        }

        let mut retries = 0_u32;
        loop {
            match run_initiator(store, SyncScope::workspace(workspace), transport) {
                Ok(stats) => {
                    self.status = EngineStatus::Idle;
                    tracing::info!(
                        workspace,
                        sent = stats.sent,
                        received = stats.received,
                        conflicts = stats.conflicts,
                        "sync complete"
                    );
                    return stats;
                }
                Err(AttemptError::Transport { error, stats }) => {
                    if retries >= self.config.max_retries {
                        self.record_sync_failure(store, workspace, &error, retries + 1);
                        return stats;
                    }
                    retries += 1;
                    let delay = self.backoff_delay(retries);
                    tracing::warn!(
                        workspace,
                        %error,
                        retry = retries,
                        delay_secs = delay.as_secs(),
                        "sync transport error, backing off"
                    );
                    sleep(delay);
                }
                Err(AttemptError::Protocol { stats }) => {
                    let error = stats
                        .error
                        .clone()
                        .unwrap_or_else(|| "protocol failure".to_string());
                    self.record_sync_failure(store, workspace, &error, retries + 1);
                    return stats;
                }
            }
        }
    }

    /// Serve one session from the responder side of `transport`.
    pub fn serve<T: SyncTransport>(
        &self,
        store: &mut EventStore,
        workspace: &str,
        transport: &mut T,
    ) -> SyncStats {
        match run_responder(store, SyncScope::workspace(workspace), transport) {
            Ok(stats) | Err(AttemptError::Transport { stats, .. } | AttemptError::Protocol { stats }) => {
                stats
            }
        }
    }

    /// Append the durable failure record and mark the engine failed.
    ///
    /// The record is itself a `given` event — raw fact about this
    /// device's history — so it replicates and audits like any other
    /// entry.
    fn record_sync_failure(
        &mut self,
        store: &mut EventStore,
        workspace: &str,
        error: &str,
        attempts: u32,
    ) {
        let payload = json!({
            "workspace": workspace,
            "device_id": self.config.device_id,
            "error": error,
            "attempts": attempts,
        });
        match build::given(&self.config.device_id, Category::SyncFailure, payload) {
            Ok(event) => match store.append(event) {
                Ok(outcome) => {
                    tracing::info!(
                        workspace,
                        device = %self.config.device_id,
                        id = %outcome.event_id,
                        attempts,
                        "recorded durable sync failure"
                    );
                }
                Err(append_error) => {
                    tracing::warn!(%append_error, "could not record sync failure");
                }
            },
            Err(build_error) => {
                tracing::warn!(%build_error, "could not build sync failure record");
            }
        }
        self.status = EngineStatus::Failed;
    }
}

// ---------------------------------------------------------------------------
// Driver loops
// ---------------------------------------------------------------------------

fn transport_failure<E: std::fmt::Display>(session: &mut SyncSession, error: &E) -> AttemptError {
    let message = error.to_string();
    AttemptError::Transport {
        stats: session.fail(message.clone()),
        error: message,
    }
}

fn protocol_failure(session: &mut SyncSession, error: impl std::fmt::Display) -> AttemptError {
    AttemptError::Protocol {
        stats: session.fail(error.to_string()),
    }
}

fn send_or_fail<T: SyncTransport>(
    transport: &mut T,
    session: &mut SyncSession,
    message: Message,
) -> Result<(), AttemptError> {
    transport
        .send(message)
        .map_err(|e| transport_failure(session, &e))
}

fn recv_or_fail<T: SyncTransport>(
    transport: &mut T,
    session: &mut SyncSession,
) -> Result<Message, AttemptError> {
    transport.recv().map_err(|e| transport_failure(session, &e))
}

/// Run a full exchange from the initiating side.
fn run_initiator<T: SyncTransport>(
    store: &mut EventStore,
    scope: SyncScope,
    transport: &mut T,
) -> Result<SyncStats, AttemptError> {
    let mut session = SyncSession::new(scope);

    // Negotiate scope.
    let opener = session
        .start()
        .map_err(|e| protocol_failure(&mut session, e))?;
    send_or_fail(transport, &mut session, opener)?;
    match recv_or_fail(transport, &mut session)? {
        Message::ScopeAck => {}
        Message::Refuse { reason } => {
            return Err(protocol_failure(&mut session, SessionError::Refused(reason)));
        }
        other => {
            return Err(protocol_failure(
                &mut session,
                SessionError::UnexpectedMessage {
                    phase: "negotiation",
                    got: other.tag(),
                },
            ));
        }
    }

    // Exchange inventories.
    let inventory = session
        .create_inventory(store)
        .map_err(|e| protocol_failure(&mut session, e))?;
    send_or_fail(transport, &mut session, inventory)?;
    let remote_inv = match recv_or_fail(transport, &mut session)? {
        Message::Inv(inv) => inv,
        other => {
            return Err(protocol_failure(
                &mut session,
                SessionError::UnexpectedMessage {
                    phase: "inventory",
                    got: other.tag(),
                },
            ));
        }
    };
    let diff = session
        .process_inventory(store, &remote_inv)
        .map_err(|e| protocol_failure(&mut session, e))?;

    // Pull the definite wants.
    send_or_fail(
        transport,
        &mut session,
        Message::Want {
            ids: diff.to_receive.clone(),
        },
    )?;
    let received = expect_send(transport, &mut session)?;
    session
        .process_received(store, received)
        .map_err(|e| protocol_failure(&mut session, e))?;

    // Push our candidates, trimmed through HAVE/WANT so bloom false
    // positives cost one id list instead of full events.
    send_or_fail(
        transport,
        &mut session,
        Message::Have {
            ids: diff.to_send.clone(),
        },
    )?;
    let wanted = match recv_or_fail(transport, &mut session)? {
        Message::Want { ids } => ids,
        other => {
            return Err(protocol_failure(
                &mut session,
                SessionError::UnexpectedMessage {
                    phase: "transfer",
                    got: other.tag(),
                },
            ));
        }
    };
    let batch = session.create_send(store, &wanted);
    send_or_fail(transport, &mut session, batch)?;

    // Chase parents of parked arrivals, bounded.
    for _ in 0..MAX_FILL_ROUNDS {
        let missing = store.missing_dependencies();
        if missing.is_empty() {
            break;
        }
        send_or_fail(
            transport,
            &mut session,
            Message::Want {
                ids: missing.clone(),
            },
        )?;
        let events = expect_send(transport, &mut session)?;
        if events.is_empty() {
            break;
        }
        session
            .process_received(store, events)
            .map_err(|e| protocol_failure(&mut session, e))?;
        if store.missing_dependencies() == missing {
            break;
        }
    }

    // Surface conflicts to the peer, then close.
    for conflict in session.conflicts().to_vec() {
        send_or_fail(transport, &mut session, Message::Conflict(conflict))?;
    }
    send_or_fail(transport, &mut session, Message::Ack)?;
    match recv_or_fail(transport, &mut session)? {
        Message::Ack => Ok(session.complete()),
        other => Err(protocol_failure(
            &mut session,
            SessionError::UnexpectedMessage {
                phase: "closing",
                got: other.tag(),
            },
        )),
    }
}

/// Serve a full exchange from the responding side.
fn run_responder<T: SyncTransport>(
    store: &mut EventStore,
    scope: SyncScope,
    transport: &mut T,
) -> Result<SyncStats, AttemptError> {
    let mut session = SyncSession::new(scope);

    let offered = match recv_or_fail(transport, &mut session)? {
        Message::Scope(offered) => offered,
        other => {
            return Err(protocol_failure(
                &mut session,
                SessionError::UnexpectedMessage {
                    phase: "negotiation",
                    got: other.tag(),
                },
            ));
        }
    };
    let reply = session
        .accept(&offered)
        .map_err(|e| protocol_failure(&mut session, e))?;
    let refused = matches!(reply, Message::Refuse { .. });
    send_or_fail(transport, &mut session, reply)?;
    if refused {
        return Err(AttemptError::Protocol {
            stats: session.fail("scope refused"),
        });
    }

    let remote_inv = match recv_or_fail(transport, &mut session)? {
        Message::Inv(inv) => inv,
        other => {
            return Err(protocol_failure(
                &mut session,
                SessionError::UnexpectedMessage {
                    phase: "inventory",
                    got: other.tag(),
                },
            ));
        }
    };
    let inventory = session
        .create_inventory(store)
        .map_err(|e| protocol_failure(&mut session, e))?;
    send_or_fail(transport, &mut session, inventory)?;
    session
        .process_inventory(store, &remote_inv)
        .map_err(|e| protocol_failure(&mut session, e))?;

    // The initiator's definite wants.
    let wanted = match recv_or_fail(transport, &mut session)? {
        Message::Want { ids } => ids,
        other => {
            return Err(protocol_failure(
                &mut session,
                SessionError::UnexpectedMessage {
                    phase: "transfer",
                    got: other.tag(),
                },
            ));
        }
    };
    let batch = session.create_send(store, &wanted);
    send_or_fail(transport, &mut session, batch)?;

    // The initiator's HAVE candidates: request only what is missing.
    let offered_ids = match recv_or_fail(transport, &mut session)? {
        Message::Have { ids } => ids,
        other => {
            return Err(protocol_failure(
                &mut session,
                SessionError::UnexpectedMessage {
                    phase: "transfer",
                    got: other.tag(),
                },
            ));
        }
    };
    let want_back: Vec<EventId> = offered_ids
        .into_iter()
        .filter(|id| !store.contains(id) && !store.is_parked(id))
        .collect();
    send_or_fail(transport, &mut session, Message::Want { ids: want_back })?;
    let events = expect_send(transport, &mut session)?;
    session
        .process_received(store, events)
        .map_err(|e| protocol_failure(&mut session, e))?;

    // Serve follow-up rounds until the initiator closes.
    loop {
        match recv_or_fail(transport, &mut session)? {
            Message::Want { ids } => {
                let batch = session.create_send(store, &ids);
                send_or_fail(transport, &mut session, batch)?;
            }
            Message::Conflict(conflict) => session.record_remote_conflict(conflict),
            Message::Ack => break,
            other => {
                return Err(protocol_failure(
                    &mut session,
                    SessionError::UnexpectedMessage {
                        phase: "transfer",
                        got: other.tag(),
                    },
                ));
            }
        }
    }
    send_or_fail(transport, &mut session, Message::Ack)?;
    Ok(session.complete())
}

fn expect_send<T: SyncTransport>(
    transport: &mut T,
    session: &mut SyncSession,
) -> Result<Vec<crate::event::Event>, AttemptError> {
    match recv_or_fail(transport, session)? {
        Message::Send { events } => Ok(events),
        other => Err(protocol_failure(
            session,
            SessionError::UnexpectedMessage {
                phase: "transfer",
                got: other.tag(),
            },
        )),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::wire::FailingTransport;

    fn engine_with_endpoint() -> SyncEngine {
        SyncEngine::new(
            EngineConfig::new("device-test".to_string()).with_endpoint("https://sync.example"),
        )
    }

    #[test]
    fn backoff_schedule_doubles_from_two_seconds() {
        let engine = engine_with_endpoint();
        let delays: Vec<u64> = (1..=4)
            .map(|retry| engine.backoff_delay(retry).as_secs())
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 16]);
    }

    #[test]
    fn unavailable_engine_fails_fast_without_record() {
        let mut engine = SyncEngine::new(EngineConfig::new("device-test".to_string()));
        assert!(!engine.is_available());

        let mut store = EventStore::new();
        let mut transport = FailingTransport::default();
        let stats = engine.sync(&mut store, "w", &mut transport);

        assert!(stats.error.is_some());
        assert_eq!(transport.calls, 0, "no wire traffic without an endpoint");
        assert_eq!(store.stats().committed, 0, "no durable record");
        assert_eq!(engine.status(), EngineStatus::Idle);
    }

    #[test]
    fn exhausted_retries_record_durable_failure() {
        let mut engine = engine_with_endpoint();
        let mut store = EventStore::new();
        let mut transport = FailingTransport::default();
        let mut slept: Vec<u64> = vec![];

        let stats = engine.sync_with_sleep(&mut store, "finance", &mut transport, |d| {
            slept.push(d.as_secs());
        });

        assert_eq!(slept, vec![2, 4, 8, 16], "full backoff schedule used");
        assert!(stats.error.is_some());
        assert_eq!(engine.status(), EngineStatus::Failed);

        // The failure is a queryable given event in the log itself.
        let failures = store.get_by_category(&Category::SyncFailure);
        assert_eq!(failures.len(), 1);
        let record = &failures[0];
        assert_eq!(record.actor, "device-test");
        assert_eq!(record.payload["device_id"], "device-test");
        assert_eq!(record.payload["workspace"], "finance");
        assert_eq!(record.payload["attempts"], 5);
        assert!(record.payload["error"].as_str().is_some());
    }

    #[test]
    fn config_serde_fills_retry_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"device_id":"d1"}"#).expect("deserialize");
        assert_eq!(config.max_retries, 4);
        assert_eq!(config.base_backoff_secs, 2);
        assert!(config.api_endpoint.is_none());

        let json = serde_json::to_string(&EngineConfig::new("d2".to_string()).with_endpoint("e"))
            .expect("serialize");
        assert!(json.contains("\"api_endpoint\":\"e\""));
    }
}
