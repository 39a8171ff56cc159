//! Per-call controller
//!
//! Every call runs as one task owning a [`CallController`]. Legs, the
//! authorization task, group timers and the registry talk to it through
//! its inbox, so everything that happens to a call is handled in order.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::B2buaConfig;
use crate::interfaces::accounting::{
    AccountingClient, AccountingDirection, AccountingParams, AccountingSession, NoopAccounting,
};
use crate::interfaces::auth::{AuthClient, AuthRequest, AuthResult};
use crate::interfaces::leg::{InboundLeg, Leg, LegFactory, LegReport, LegState, OutboundLeg};
use crate::interfaces::media_relay::{MediaRelayClient, MediaRelaySession};
use crate::interfaces::resolver::Resolver;
use crate::protocols::sip::{CallEvent, CallEventKind, Header, InboundRequest, TryEvent};
use crate::services::registry::CallTable;
use crate::services::route::B2bRoute;
use crate::services::translation::TranslationRule;
use crate::Result;

/// Call states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    WaitRoute,
    ARComplete,
    Connected,
    Disconnecting,
    Dead,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Idle => "Idle",
            CallState::WaitRoute => "WaitRoute",
            CallState::ARComplete => "ARComplete",
            CallState::Connected => "Connected",
            CallState::Disconnecting => "Disconnecting",
            CallState::Dead => "Dead",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallLeg {
    A,
    O,
}

/// Everything a call task can be asked to handle
#[derive(Debug)]
pub enum CallMessage {
    Leg {
        side: CallLeg,
        generation: u64,
        report: LegReport,
    },
    AuthDone(Result<AuthResult>),
    GroupTimeout {
        skip_to: u32,
    },
    Disconnect {
        rtime: Option<DateTime<Utc>>,
    },
    ForceExpire,
}

/// Given to each leg so it can report back to its call
#[derive(Debug, Clone)]
pub struct LegReporter {
    side: CallLeg,
    generation: u64,
    tx: mpsc::UnboundedSender<CallMessage>,
}

impl LegReporter {
    pub(crate) fn new(side: CallLeg, generation: u64, tx: mpsc::UnboundedSender<CallMessage>) -> Self {
        Self { side, generation, tx }
    }

    pub fn side(&self) -> CallLeg {
        self.side
    }

    pub fn report(&self, report: LegReport) {
        // The call may already be gone
        let _ = self.tx.send(CallMessage::Leg {
            side: self.side,
            generation: self.generation,
            report,
        });
    }

    pub fn event(&self, event: CallEvent) {
        self.report(LegReport::Event(event));
    }
}

/// Per-call settings derived from the configuration
#[derive(Debug, Clone)]
pub struct CallSettings {
    pub listen_port: u16,
    pub user_agent: String,
    pub static_route: Option<B2bRoute>,
    pub max_credit_time: Option<u32>,
    pub hide_call_id: bool,
    pub translate_in: Option<TranslationRule>,
    pub translate_out: Option<TranslationRule>,
    pub allowed_payload_types: Option<Vec<u8>>,
    pub keepalive_answer: u32,
    pub keepalive_originate: u32,
}

impl CallSettings {
    pub fn from_config(config: &B2buaConfig) -> Result<Self> {
        let static_route = config
            .routing
            .static_route
            .as_deref()
            .map(|route| B2bRoute::parse(route, config.sip.listen_port))
            .transpose()?;

        Ok(Self {
            listen_port: config.sip.listen_port,
            user_agent: config.general.user_agent.clone(),
            static_route,
            max_credit_time: config.routing.max_credit_time,
            hide_call_id: config.routing.hide_call_id,
            translate_in: config.routing.inbound_translation()?,
            translate_out: config.routing.outbound_translation()?,
            allowed_payload_types: config.routing.allowed_payload_types.clone(),
            keepalive_answer: config.keepalive.answer,
            keepalive_originate: config.keepalive.originate,
        })
    }
}

/// Collaborators shared by every call
pub struct CallServices {
    pub settings: CallSettings,
    pub legs: Arc<dyn LegFactory>,
    pub resolver: Arc<dyn Resolver>,
    /// `None` when authorization is disabled
    pub auth: Option<Arc<dyn AuthClient>>,
    /// `None` when accounting is disabled
    pub accounting: Option<Arc<dyn AccountingClient>>,
    pub media_relay: Option<Arc<dyn MediaRelayClient>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegSnapshot {
    pub state: LegState,
    pub remote: Option<SocketAddr>,
    pub cli: Option<String>,
    pub cld: Option<String>,
}

/// Published after every message a call handles
#[derive(Debug, Clone, PartialEq)]
pub struct CallStatus {
    pub state: CallState,
    pub proxied: bool,
    pub leg_a: LegSnapshot,
    pub leg_o: Option<LegSnapshot>,
}

#[derive(Debug, Clone)]
struct Setup {
    event: TryEvent,
    rtime: DateTime<Utc>,
    origin: Option<String>,
}

pub struct CallController {
    id: u64,
    state: CallState,
    admitted: bool,
    finished: bool,
    services: Arc<CallServices>,
    table: Arc<CallTable>,
    tx: mpsc::UnboundedSender<CallMessage>,
    status_tx: watch::Sender<CallStatus>,
    leg_a: Arc<dyn Leg>,
    leg_o: Option<Arc<dyn Leg>>,
    leg_o_generation: u64,
    leg_o_ids: (Option<String>, Option<String>),
    leg_a_dead: bool,
    leg_o_dead: bool,
    routes: VecDeque<B2bRoute>,
    huntstop_codes: Vec<u16>,
    auth_handle: Option<CancellationToken>,
    /// Parent of every group timer the call has armed
    timers: CancellationToken,
    acct_a: Option<Box<dyn AccountingSession>>,
    /// Egress sessions by originating attempt
    acct_o: HashMap<u64, Box<dyn AccountingSession>>,
    relay: Option<Arc<dyn MediaRelaySession>>,
    proxied: bool,
    challenge: Option<Header>,
    pass_headers: Vec<Header>,
    source: SocketAddr,
    remote_ip: IpAddr,
    username: String,
    credit_time: Option<u32>,
    setup: Option<Setup>,
}

impl CallController {
    pub(crate) fn new(
        id: u64,
        services: Arc<CallServices>,
        table: Arc<CallTable>,
        request: &InboundRequest,
        challenge: Option<Header>,
        pass_headers: Vec<Header>,
    ) -> (Self, mpsc::UnboundedReceiver<CallMessage>, watch::Receiver<CallStatus>) {
        let (tx, inbox) = mpsc::unbounded_channel();

        let leg_a = services.legs.inbound(
            request,
            InboundLeg {
                keepalive_interval: services.settings.keepalive_answer,
                user_agent: services.settings.user_agent.clone(),
            },
            LegReporter::new(CallLeg::A, 0, tx.clone()),
        );

        let remote_ip = request.remote_ip();
        let (status_tx, status_rx) = watch::channel(CallStatus {
            state: CallState::Idle,
            proxied: false,
            leg_a: LegSnapshot {
                state: leg_a.state(),
                remote: leg_a.remote_addr(),
                cli: request.from_user.clone(),
                cld: request.ruri_user.clone(),
            },
            leg_o: None,
        });

        let controller = Self {
            id,
            state: CallState::Idle,
            admitted: false,
            finished: false,
            services,
            table,
            tx,
            status_tx,
            leg_a,
            leg_o: None,
            leg_o_generation: 0,
            leg_o_ids: (None, None),
            leg_a_dead: false,
            leg_o_dead: false,
            routes: VecDeque::new(),
            huntstop_codes: Vec::new(),
            auth_handle: None,
            timers: CancellationToken::new(),
            acct_a: None,
            acct_o: HashMap::new(),
            relay: None,
            proxied: false,
            challenge,
            pass_headers,
            source: request.source,
            remote_ip,
            username: remote_ip.to_string(),
            credit_time: None,
            setup: None,
        };

        (controller, inbox, status_rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// The first event was accepted and the call belongs in the registry
    pub fn is_admitted(&self) -> bool {
        self.admitted && self.state != CallState::Dead
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<CallMessage> {
        self.tx.clone()
    }

    pub async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<CallMessage>) {
        self.publish_status();
        while let Some(message) = inbox.recv().await {
            self.dispatch(message).await;
            self.publish_status();
            if self.finished {
                break;
            }
        }
        debug!("Call {} task finished", self.id);
    }

    async fn dispatch(&mut self, message: CallMessage) {
        match message {
            CallMessage::Leg {
                side: CallLeg::A,
                report,
                ..
            } => self.on_leg_a(report),
            CallMessage::Leg {
                side: CallLeg::O,
                generation,
                report,
            } => self.on_leg_o(generation, report),
            CallMessage::AuthDone(result) => self.on_auth_done(result).await,
            CallMessage::GroupTimeout { skip_to } => self.on_group_timeout(skip_to),
            CallMessage::Disconnect { rtime } => self.disconnect(rtime),
            CallMessage::ForceExpire => self.force_expire(),
        }
    }

    fn publish_status(&self) {
        let (cli, cld) = match &self.setup {
            Some(setup) => (setup.event.cli.clone(), setup.event.cld.clone()),
            None => (None, None),
        };
        let leg_o = self.leg_o.as_ref().map(|leg| LegSnapshot {
            state: leg.state(),
            remote: leg.remote_addr(),
            cli: self.leg_o_ids.0.clone(),
            cld: self.leg_o_ids.1.clone(),
        });
        self.status_tx.send_replace(CallStatus {
            state: self.state,
            proxied: self.proxied,
            leg_a: LegSnapshot {
                state: self.leg_a.state(),
                remote: self.leg_a.remote_addr(),
                cli,
                cld,
            },
            leg_o,
        });
    }

    fn fail_leg_a(&mut self, event: CallEvent) {
        if let Some(code) = event.failure_code() {
            info!("Call {} rejected with {}", self.id, code);
        }
        self.leg_a.recv_event(event);
        self.state = CallState::Dead;
    }

    /// Handle the first event of leg A. Never waits: routing is finished
    /// by the call task once the call is registered.
    pub fn start(&mut self, event: CallEvent) {
        let CallEvent { kind, rtime, origin } = event;
        let services = Arc::clone(&self.services);
        let mut setup = match kind {
            CallEventKind::Try(setup) => setup,
            other => {
                warn!("Call {}: unexpected first event {:?}, disconnecting", self.id, other);
                self.leg_a.recv_event(CallEvent::disconnect().with_rtime(rtime));
                self.state = CallState::Dead;
                return;
            }
        };

        let mut cld = match setup.cld.take() {
            Some(cld) => cld,
            None => {
                self.fail_leg_a(CallEvent::fail(500, "Internal Server Error (1)"));
                return;
            }
        };

        if let (Some(body), Some(allowed)) =
            (setup.body.as_mut(), services.settings.allowed_payload_types.as_ref())
        {
            if body.is_sdp() {
                match body.filter_payload_types(allowed) {
                    Err(e) => {
                        warn!("Call {}: {}", self.id, e);
                        self.fail_leg_a(CallEvent::fail(400, "Malformed SDP Body"));
                        return;
                    }
                    Ok(0) => {
                        self.fail_leg_a(CallEvent::fail(488, "Not Acceptable Here"));
                        return;
                    }
                    Ok(_) => {}
                }
            }
        }

        if let Some(stripped) = cld.strip_prefix("nat-") {
            cld = stripped.to_string();
            if let Some(body) = setup.body.as_mut() {
                body.mark_nated();
            }
        }

        if let Some(rule) = &services.settings.translate_in {
            cld = rule.apply(&cld);
        }
        setup.cld = Some(cld);

        if let Some(client) = &services.media_relay {
            match client.create_session(&setup.call_id) {
                Ok(session) => {
                    session.set_caller_address(SocketAddr::new(self.remote_ip, self.source.port()));
                    session.set_insert_nortpp(true);
                    self.relay = Some(session);
                }
                Err(e) => warn!("Call {}: media relay unavailable: {}", self.id, e),
            }
        }

        self.username = match &setup.auth {
            Some(credentials) if !credentials.username.is_empty() => credentials.username.clone(),
            _ => self.remote_ip.to_string(),
        };

        info!(
            "Call {} from {} ({:?} -> {:?}) waiting for route",
            self.id, self.remote_ip, setup.cli, setup.cld
        );

        let request = AuthRequest {
            identity: self.username.clone(),
            remote_ip: self.remote_ip,
            cli: setup.cli.clone(),
            cld: setup.cld.clone(),
            call_id: setup.call_id.clone(),
            correlation_id: setup.correlation_id.clone(),
            digest: setup.auth.clone(),
        };

        self.setup = Some(Setup {
            event: setup,
            rtime,
            origin,
        });
        self.state = CallState::WaitRoute;
        self.admitted = true;

        match services.auth.clone() {
            None => {
                let _ = self.tx.send(CallMessage::AuthDone(Ok(AuthResult::accepted(Vec::new()))));
            }
            Some(client) => {
                let token = CancellationToken::new();
                let cancelled = token.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancelled.cancelled() => {}
                        result = client.authorize(request) => {
                            if !cancelled.is_cancelled() {
                                let _ = tx.send(CallMessage::AuthDone(result));
                            }
                        }
                    }
                });
                self.auth_handle = Some(token);
            }
        }
    }

    async fn on_auth_done(&mut self, result: Result<AuthResult>) {
        self.auth_handle = None;
        let awaiting = self.state == CallState::WaitRoute && self.leg_a.state().is_setup_pending();

        let result = match result {
            Ok(result) if result.accepted => result,
            Ok(_) => {
                if awaiting {
                    let event = match self.challenge.clone() {
                        Some(challenge) => CallEvent::fail(401, "Unauthorized").with_header(challenge),
                        None => CallEvent::fail(403, "Auth Failed"),
                    };
                    self.fail_leg_a(event);
                }
                return;
            }
            Err(e) => {
                warn!("Call {}: authorization failed: {}", self.id, e);
                if awaiting {
                    self.fail_leg_a(CallEvent::fail(500, "Internal Server Error"));
                }
                return;
            }
        };

        let Some(setup) = self.setup.as_ref() else {
            return;
        };

        let params = AccountingParams {
            direction: AccountingDirection::Answer,
            username: self.username.clone(),
            cli: setup.event.cli.clone(),
            cld: setup.event.cld.clone(),
            call_id: setup.event.call_id.clone(),
            correlation_id: setup.event.correlation_id.clone(),
            remote_host: self.remote_ip.to_string(),
        };
        let services = Arc::clone(&self.services);
        let mut acct_a = match &services.accounting {
            Some(client) => client.open_session(params),
            None => NoopAccounting.open_session(params),
        };
        if !awaiting {
            acct_a.disconnect(Utc::now(), "caller", 0);
            self.acct_a = Some(acct_a);
            return;
        }
        self.acct_a = Some(acct_a);

        let (cld, cli) = match self.setup.as_mut() {
            Some(setup) => {
                if let Some(cli) = result.caller_id() {
                    setup.event.cli = if cli.is_empty() { None } else { Some(cli.to_string()) };
                }
                if let Some(name) = result.caller_name() {
                    setup.event.caller_name = if name.is_empty() { None } else { Some(name.to_string()) };
                }
                (setup.event.cld.clone(), setup.event.cli.clone())
            }
            None => return,
        };
        if let Some(credit_time) = result.credit_time() {
            self.credit_time = Some(credit_time);
        }

        let settings = &services.settings;
        let mut parsed = Vec::new();
        if let Some(route) = &settings.static_route {
            parsed.push(route.clone());
        } else {
            let specs: Vec<&str> = result.routes().collect();
            if specs.is_empty() {
                warn!("Call {}: authorization returned no routes", self.id);
                self.fail_leg_a(CallEvent::fail(500, "Internal Server Error (2)"));
                return;
            }
            for spec in specs {
                match B2bRoute::parse(spec, settings.listen_port) {
                    Ok(route) => parsed.push(route),
                    Err(e) => {
                        warn!("Call {}: bad route {:?}: {}", self.id, spec, e);
                        self.fail_leg_a(CallEvent::fail(500, "Internal Server Error (3)"));
                        return;
                    }
                }
            }
        }

        let mut routes = VecDeque::new();
        for (rnum, mut route) in (1u32..).zip(parsed) {
            route.customize(
                rnum,
                cld.as_deref(),
                cli.as_deref(),
                self.credit_time,
                &self.pass_headers,
                settings.max_credit_time,
            );
            if route.is_usable() {
                routes.push_back(route);
            } else {
                debug!("Call {}: dropping route {} with no credit or expiry", self.id, rnum);
            }
        }

        for route in routes.iter_mut() {
            if route.is_caller_host() || !route.addresses.is_empty() {
                continue;
            }
            if let Err(e) = route.resolve(services.resolver.as_ref()).await {
                warn!("Call {}: cannot resolve {}: {}", self.id, route.hostonly, e);
                self.fail_leg_a(CallEvent::fail(500, "Internal Server Error (4)"));
                return;
            }
        }

        if !self.leg_a.state().is_setup_pending() {
            // Caller went away during resolution; its report is queued
            return;
        }

        let Some(first) = routes.pop_front() else {
            self.fail_leg_a(CallEvent::fail(500, "Internal Server Error (3)"));
            return;
        };

        self.routes = routes;
        self.state = CallState::ARComplete;
        self.place_originate(first);
    }

    fn place_originate(&mut self, route: B2bRoute) {
        let Some(Setup { event: setup, rtime, origin }) = self.setup.clone() else {
            return;
        };

        let max_forwards = match setup.max_forwards {
            Some(hops) if hops <= 1 => {
                self.fail_leg_a(CallEvent::fail(483, "Too Many Hops"));
                return;
            }
            Some(hops) => Some(hops - 1),
            None => None,
        };

        let services = Arc::clone(&self.services);
        let settings = &services.settings;
        let mut cld = route.cld.clone();
        if let (Some(rule), Some(value)) = (&settings.translate_out, cld.as_deref()) {
            cld = Some(rule.apply(value));
        }
        self.huntstop_codes = route.huntstop_scodes.clone();

        let (remote_host, next_hop) = if route.is_caller_host() {
            (self.source.ip().to_string(), self.source)
        } else {
            match route.next_hop(&self.source) {
                Some(addr) => (route.hostonly.clone(), addr),
                None => {
                    self.fail_leg_a(CallEvent::fail(500, "Internal Server Error (4)"));
                    return;
                }
            }
        };

        self.leg_o_generation += 1;
        let generation = self.leg_o_generation;

        if !route.forward_on_fail {
            if let Some(client) = &services.accounting {
                let session = client.open_session(AccountingParams {
                    direction: AccountingDirection::Originate,
                    username: route.bill_to.clone().unwrap_or_else(|| self.username.clone()),
                    cli: route.bill_cli.clone().or_else(|| route.cli.clone()),
                    cld: route.bill_cld.clone().or_else(|| cld.clone()),
                    call_id: setup.call_id.clone(),
                    correlation_id: setup.correlation_id.clone(),
                    remote_host: remote_host.clone(),
                });
                self.acct_o.insert(generation, session);
            }
        }
        if let Some(acct) = self.acct_a.as_mut() {
            acct.set_credit_time(route.credit_time);
        }

        let source_proxy = (self.source.ip().to_string(), self.source.port());
        let outbound_proxy = route.outbound_proxy.clone().filter(|proxy| *proxy != source_proxy);

        let (local_sdp_hook, remote_sdp_hook) = match &self.relay {
            Some(relay) if route.rtpp => {
                relay.set_callee_target(next_hop);
                self.proxied = true;
                (Some(relay.caller_hook()), Some(relay.callee_hook()))
            }
            _ => (None, None),
        };

        if let Some((timeout, skip_to)) = route.group_timeout {
            let tx = self.tx.clone();
            let cancelled = self.timers.child_token();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancelled.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_secs(timeout)) => {
                        let _ = tx.send(CallMessage::GroupTimeout { skip_to });
                    }
                }
            });
        }

        let call_id = if settings.hide_call_id {
            format!("{:x}-b2b_{}", md5::compute(setup.call_id.as_bytes()), route.rnum)
        } else {
            format!("{}-b2b_{}", setup.call_id, route.rnum)
        };

        let leg = services.legs.outbound(
            OutboundLeg {
                credentials: route.auth.clone(),
                next_hop,
                outbound_proxy,
                credit_time: route.credit_time,
                expires: route.expires,
                no_progress_expires: route.no_progress_expires,
                extra_headers: route.extra_headers.clone(),
                keepalive_interval: settings.keepalive_originate,
                user_agent: settings.user_agent.clone(),
                local_sdp_hook,
                remote_sdp_hook,
            },
            LegReporter::new(CallLeg::O, generation, self.tx.clone()),
        );

        info!(
            "Call {}: originating route {} to {} ({})",
            self.id, route.rnum, route, next_hop
        );

        self.leg_o_ids = (route.cli.clone(), cld.clone());
        let event = TryEvent {
            call_id,
            correlation_id: setup.correlation_id.clone(),
            cli: route.cli.clone(),
            cld,
            caller_name: route.caller_name.clone().or_else(|| setup.caller_name.clone()),
            body: setup.body.clone(),
            auth: None,
            max_forwards,
            reason: setup.reason.clone(),
        };
        let mut event = CallEvent::new(CallEventKind::Try(event)).with_rtime(rtime);
        event.origin = origin;

        self.leg_o = Some(leg.clone());
        self.leg_o_dead = false;
        leg.recv_event(event);
    }

    fn on_leg_a(&mut self, report: LegReport) {
        match report {
            LegReport::Event(event) => {
                if self.state == CallState::Idle {
                    self.start(event);
                    return;
                }
                match (&self.leg_o, self.state) {
                    (Some(leg), CallState::ARComplete | CallState::Connected | CallState::Disconnecting) => {
                        leg.recv_event(event)
                    }
                    _ => debug!("Call {}: dropping {} from leg A in {}", self.id, event.name(), self.state),
                }
            }
            LegReport::Connected { rtime, origin } => {
                self.state = CallState::Connected;
                self.timers.cancel();
                info!("Call {} connected", self.id);
                if let Some(acct) = self.acct_a.as_mut() {
                    acct.connect(rtime, &origin);
                }
            }
            LegReport::Disconnected { rtime, origin, result } | LegReport::Failed { rtime, origin, result } => {
                self.a_disconnected(rtime, &origin, result)
            }
            LegReport::Dead => {
                self.leg_a_dead = true;
                if self.leg_o.is_none() || self.leg_o_dead {
                    self.collect();
                }
            }
        }
    }

    fn a_disconnected(&mut self, rtime: DateTime<Utc>, origin: &str, result: u16) {
        if self.state == CallState::WaitRoute {
            if let Some(token) = self.auth_handle.take() {
                token.cancel();
            }
        }
        self.state = if self.leg_o.is_some() && self.state != CallState::Dead {
            CallState::Disconnecting
        } else {
            CallState::Dead
        };
        info!("Call {}: leg A disconnected by {} ({})", self.id, origin, result);
        if let Some(acct) = self.acct_a.as_mut() {
            acct.disconnect(rtime, origin, result);
        }
        self.relay = None;
    }

    fn on_leg_o(&mut self, generation: u64, report: LegReport) {
        if generation != self.leg_o_generation {
            match report {
                LegReport::Disconnected { rtime, origin, result } | LegReport::Failed { rtime, origin, result } => {
                    if let Some(mut acct) = self.acct_o.remove(&generation) {
                        acct.disconnect(rtime, &origin, result);
                    }
                }
                LegReport::Dead => {
                    self.acct_o.remove(&generation);
                }
                _ => debug!("Call {}: ignoring report from superseded attempt {}", self.id, generation),
            }
            return;
        }

        match report {
            LegReport::Event(event) => self.o_event(event),
            LegReport::Connected { rtime, origin } => {
                if let Some(acct) = self.acct_o.get_mut(&generation) {
                    acct.connect(rtime, &origin);
                }
            }
            LegReport::Disconnected { rtime, origin, result } | LegReport::Failed { rtime, origin, result } => {
                if let Some(acct) = self.acct_o.get_mut(&generation) {
                    acct.disconnect(rtime, &origin, result);
                }
            }
            LegReport::Dead => {
                self.leg_o_dead = true;
                if self.leg_a_dead {
                    self.collect();
                }
            }
        }
    }

    fn o_event(&mut self, event: CallEvent) {
        if self.state == CallState::ARComplete
            && event.is_failure()
            && self.leg_a.state().is_setup_pending()
            && !self.routes.is_empty()
        {
            let stop = event
                .failure_code()
                .map_or(false, |code| self.huntstop_codes.contains(&code));
            if !stop {
                if let Some(route) = self.routes.pop_front() {
                    info!(
                        "Call {}: attempt failed with {:?}, trying route {}",
                        self.id,
                        event.failure_code(),
                        route.rnum
                    );
                    self.place_originate(route);
                    return;
                }
            }
        }
        self.leg_a.recv_event(event);
    }

    fn on_group_timeout(&mut self, skip_to: u32) {
        if self.state != CallState::ARComplete || !self.leg_a.state().is_setup_pending() {
            return;
        }
        let (Some(first), Some(last)) = (
            self.routes.front().map(|r| r.rnum),
            self.routes.back().map(|r| r.rnum),
        ) else {
            return;
        };
        if first > skip_to {
            return;
        }
        if skip_to == last + 1 {
            debug!("Call {}: group timeout, no further routes", self.id);
            self.routes.clear();
            return;
        }
        self.routes.retain(|route| route.rnum >= skip_to);
        debug!("Call {}: group timeout, skipping to route {}", self.id, skip_to);
        if let Some(leg) = &self.leg_o {
            leg.disconnect(None);
        }
    }

    pub fn disconnect(&mut self, rtime: Option<DateTime<Utc>>) {
        self.leg_a.disconnect(rtime);
    }

    /// Tear down a relayed call as if it had ended a minute ago
    pub fn force_expire(&mut self) {
        if !self.proxied {
            return;
        }
        let rtime = Utc::now() - chrono::Duration::seconds(60);
        match self.state {
            CallState::Connected => self.leg_a.disconnect(Some(rtime)),
            CallState::ARComplete => {
                if let Some(leg) = &self.leg_o {
                    leg.disconnect(Some(rtime));
                }
            }
            _ => {}
        }
    }

    fn collect(&mut self) {
        self.timers.cancel();
        self.acct_a = None;
        self.acct_o.clear();
        self.state = CallState::Dead;
        if self.table.debug_mode() {
            info!("Garbage collecting call {}", self.id);
        }
        self.table.remove(self.id);
        self.finished = true;
    }
}
