//! Registry of live calls
//!
//! The [`CallMap`] receives new requests from the transport, starts a call
//! task for each accepted call-setup request and keeps a handle to it until
//! both of the call's legs are gone. It also serves the administrative
//! command set and runs periodic housekeeping, including the safe restart.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::B2buaConfig;
use crate::interfaces::lifecycle::ProcessLifecycle;
use crate::interfaces::transaction::{TransactionLayer, TransactionRole};
use crate::protocols::sip::{CallEvent, CallEventKind, Header, InboundRequest, Response};
use crate::services::call::{CallController, CallMessage, CallServices, CallStatus, LegSnapshot};

/// Handle the registry keeps for each live call
#[derive(Debug, Clone)]
pub struct CallHandle {
    pub id: u64,
    pub call_id: String,
    tx: mpsc::UnboundedSender<CallMessage>,
    status: watch::Receiver<CallStatus>,
}

impl CallHandle {
    fn send(&self, message: CallMessage) {
        if self.tx.send(message).is_err() {
            debug!("Call {} already finished", self.id);
        }
    }

    pub fn status(&self) -> CallStatus {
        self.status.borrow().clone()
    }
}

/// Point-in-time view of a call
#[derive(Debug, Clone)]
pub struct CallSummary {
    pub id: u64,
    pub call_id: String,
    pub status: CallStatus,
}

/// Registry state shared with the call tasks
#[derive(Debug, Default)]
pub(crate) struct CallTable {
    calls: DashMap<u64, CallHandle>,
    next_id: AtomicU64,
    debug_mode: AtomicBool,
    pending_safe_restart: AtomicBool,
}

impl CallTable {
    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn insert(&self, handle: CallHandle) {
        self.calls.insert(handle.id, handle);
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        self.calls.remove(&id).is_some()
    }

    pub(crate) fn debug_mode(&self) -> bool {
        self.debug_mode.load(Ordering::Relaxed)
    }

    fn handles(&self) -> Vec<CallHandle> {
        let mut handles: Vec<CallHandle> = self.calls.iter().map(|entry| entry.value().clone()).collect();
        handles.sort_by_key(|h| h.id);
        handles
    }
}

pub struct CallMap {
    config: Arc<B2buaConfig>,
    services: Arc<CallServices>,
    table: Arc<CallTable>,
    transactions: Arc<dyn TransactionLayer>,
    lifecycle: Arc<dyn ProcessLifecycle>,
}

impl CallMap {
    pub fn new(
        config: Arc<B2buaConfig>,
        services: Arc<CallServices>,
        transactions: Arc<dyn TransactionLayer>,
        lifecycle: Arc<dyn ProcessLifecycle>,
    ) -> Self {
        Self {
            config,
            services,
            table: Arc::new(CallTable::default()),
            transactions,
            lifecycle,
        }
    }

    pub fn len(&self) -> usize {
        self.table.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.calls.is_empty()
    }

    pub fn debug_mode(&self) -> bool {
        self.table.debug_mode()
    }

    pub fn safe_restart_pending(&self) -> bool {
        self.table.pending_safe_restart.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn services(&self) -> Arc<CallServices> {
        Arc::clone(&self.services)
    }

    #[cfg(test)]
    pub(crate) fn table(&self) -> Arc<CallTable> {
        Arc::clone(&self.table)
    }

    /// Handle a request the transport could not match to an existing dialog
    /// or transaction. Returns the response to send, if any.
    pub async fn recv_request(&self, request: InboundRequest) -> Option<Response> {
        if request.to_tag.is_some() {
            if request.is_method("NOTIFY") {
                return Some(Response::new(200, "OK"));
            }
            if request.is_method("ACK") {
                return None;
            }
            debug!("{} for unknown dialog {}", request.method, request.call_id);
            return Some(Response::new(481, "Call Leg/Transaction Does Not Exist"));
        }

        if request.is_method("INVITE") {
            if let Some(accept_ips) = &self.config.routing.accept_ips {
                if !accept_ips.contains(&request.source.ip()) {
                    warn!("Rejecting INVITE from unlisted source {}", request.source);
                    return Some(Response::new(403, "Forbidden"));
                }
            }

            let auth = &self.config.auth;
            let mut challenge = None;
            if auth.enabled && auth.digest_auth && request.authorization.is_none() {
                let header = Header::new(
                    "WWW-Authenticate",
                    format!(
                        "Digest realm=\"{}\", nonce=\"{}\", algorithm=MD5",
                        request.ruri_host,
                        Uuid::new_v4().simple()
                    ),
                );
                if auth.digest_auth_only {
                    return Some(Response::new(401, "Unauthorized").with_header(header));
                }
                challenge = Some(header);
            }

            let pass_headers: Vec<Header> = self
                .config
                .routing
                .pass_headers
                .iter()
                .flat_map(|name| request.header_values(name).cloned().collect::<Vec<_>>())
                .collect();

            return self.create(&request, challenge, pass_headers);
        }

        if request.is_method("NOTIFY") {
            return Some(Response::new(200, "OK"));
        }

        Some(Response::new(501, "Not Implemented"))
    }

    /// Start a call for a fresh call-setup request. Returns `100 Trying`
    /// when the call proceeds; a rejection travels through the new leg.
    /// The call is registered before any authorization or resolution work.
    pub fn create(
        &self,
        request: &InboundRequest,
        challenge: Option<Header>,
        pass_headers: Vec<Header>,
    ) -> Option<Response> {
        let id = self.table.allocate_id();
        let (mut controller, inbox, status) = CallController::new(
            id,
            Arc::clone(&self.services),
            Arc::clone(&self.table),
            request,
            challenge,
            pass_headers,
        );

        controller.start(CallEvent::new(CallEventKind::Try(request.try_event())));
        if !controller.is_admitted() {
            return None;
        }

        self.table.insert(CallHandle {
            id,
            call_id: request.call_id.clone(),
            tx: controller.sender(),
            status,
        });
        tokio::spawn(controller.run(inbox));
        Some(Response::new(100, "Trying"))
    }

    pub fn calls(&self) -> Vec<CallSummary> {
        self.table
            .handles()
            .into_iter()
            .map(|h| CallSummary {
                id: h.id,
                call_id: h.call_id.clone(),
                status: h.status(),
            })
            .collect()
    }

    pub fn disconnect_all(&self, reason: &str) {
        let handles = self.table.handles();
        info!("Disconnecting {} calls: {}", handles.len(), reason);
        for handle in handles {
            handle.send(CallMessage::Disconnect { rtime: None });
        }
    }

    /// Flip debug mode, returning the new value
    pub fn toggle_debug(&self) -> bool {
        let enabled = !self.table.debug_mode.fetch_xor(true, Ordering::SeqCst);
        info!("Debug mode {}", if enabled { "enabled" } else { "disabled" });
        enabled
    }

    /// Restart the process once the last call is gone
    pub fn schedule_safe_restart(&self) {
        self.table.pending_safe_restart.store(true, Ordering::SeqCst);
        info!("Safe restart scheduled, waiting for {} calls to finish", self.len());
    }

    /// Execute one admin command line. `None` means close the connection.
    pub fn handle_command(&self, line: &str) -> Option<String> {
        let mut args = line.split_whitespace();
        let Some(command) = args.next() else {
            return Some(String::new());
        };

        let reply = match command {
            "q" => return None,
            "l" => self.list_calls(),
            "lt" => match args.next() {
                None => self.list_transactions(0.0),
                Some(min) => match min.parse::<f64>() {
                    Ok(min) => self.list_transactions(min),
                    Err(_) => format!("ERROR: syntax error: {}\n", line.trim()),
                },
            },
            "llt" => self.list_transactions(60.0),
            "d" => match args.next() {
                None => format!("ERROR: syntax error: {}\n", line.trim()),
                Some("*") => {
                    self.disconnect_all("admin request");
                    "OK\n".to_string()
                }
                Some(call_id) => {
                    let matching: Vec<CallHandle> = self
                        .table
                        .handles()
                        .into_iter()
                        .filter(|h| h.call_id == call_id)
                        .collect();
                    if matching.is_empty() {
                        format!("ERROR: no call with id of {} has been found\n", call_id)
                    } else {
                        for handle in matching {
                            handle.send(CallMessage::Disconnect { rtime: None });
                        }
                        "OK\n".to_string()
                    }
                }
            },
            "r" => match args.next().map(|id| id.parse::<u64>()) {
                Some(Ok(id)) => match self.table.calls.get(&id).map(|entry| entry.value().clone()) {
                    Some(handle) => {
                        handle.send(CallMessage::ForceExpire);
                        "OK\n".to_string()
                    }
                    None => format!("ERROR: no call with id of {} has been found\n", id),
                },
                _ => format!("ERROR: syntax error: {}\n", line.trim()),
            },
            _ => "ERROR: unknown command\n".to_string(),
        };
        Some(reply)
    }

    fn list_calls(&self) -> String {
        let calls = self.calls();
        let mut out = String::from("In-memory calls:\n");
        for call in &calls {
            let _ = write!(out, "{} {}: {} (", call.id, call.call_id, call.status.state);
            out.push_str(&describe_leg(Some(&call.status.leg_a)));
            out.push_str(" -> ");
            out.push_str(&describe_leg(call.status.leg_o.as_ref()));
            out.push_str(")\n");
        }
        let _ = writeln!(out, "Total: {}", calls.len());
        out
    }

    fn list_transactions(&self, min_age: f64) -> String {
        let transactions = self.transactions.transactions();
        let mut out = String::new();
        for (role, title) in [
            (TransactionRole::Server, "In-memory server transactions:"),
            (TransactionRole::Client, "In-memory client transactions:"),
        ] {
            out.push_str(title);
            out.push('\n');
            for t in transactions.iter().filter(|t| t.role == role) {
                let age = t.age.as_secs_f64();
                if age < min_age {
                    continue;
                }
                let _ = writeln!(out, "{} {} {} {:.1}", t.id, t.method, t.state, age);
            }
        }
        out
    }

    /// One housekeeping pass. Returns the delay until the next one.
    pub fn housekeeping_tick(&self) -> Duration {
        let (server, client) = self.transactions.counts();
        info!(
            "{} calls in memory, {} server and {} client transactions",
            self.len(),
            server,
            client
        );

        if !self.safe_restart_pending() {
            return Duration::from_secs(self.config.admin.housekeeping_interval);
        }

        if self.is_empty() {
            info!("No calls left, performing safe restart");
            self.table.pending_safe_restart.store(false, Ordering::SeqCst);
            self.transactions.close_listener();
            if let Err(e) = self.lifecycle.drain_and_restart() {
                error!("Safe restart failed: {}", e);
            }
            return Duration::from_secs(self.config.admin.housekeeping_interval);
        }

        Duration::from_secs(1)
    }

    pub async fn run_housekeeping(self: Arc<Self>, shutdown: CancellationToken) {
        let mut delay = Duration::from_secs(self.config.admin.housekeeping_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {
                    delay = self.housekeeping_tick();
                }
            }
        }
        debug!("Housekeeping stopped");
    }
}

fn describe_leg(leg: Option<&LegSnapshot>) -> String {
    match leg {
        None => "N/A".to_string(),
        Some(leg) => format!(
            "{} {} {} {}",
            leg.state,
            leg.remote.map_or_else(|| "N/A".to_string(), |a| a.to_string()),
            leg.cli.as_deref().unwrap_or("N/A"),
            leg.cld.as_deref().unwrap_or("N/A"),
        ),
    }
}
