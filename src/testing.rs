//! Test doubles for the collaborators a call talks to

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::config::B2buaConfig;
use crate::interfaces::accounting::{
    AccountingClient, AccountingDirection, AccountingParams, AccountingSession,
};
use crate::interfaces::auth::{AuthAttribute, AuthClient, AuthRequest, AuthResult};
use crate::interfaces::leg::{InboundLeg, Leg, LegFactory, LegReport, LegState, OutboundLeg};
use crate::interfaces::lifecycle::ProcessLifecycle;
use crate::interfaces::media_relay::{MediaRelayClient, MediaRelaySession, SdpHook};
use crate::interfaces::resolver::Resolver;
use crate::interfaces::transaction::{TransactionInfo, TransactionLayer};
use crate::protocols::sdp::Body;
use crate::protocols::sip::{CallEvent, CallEventKind, InboundRequest, TryEvent};
use crate::services::call::{CallLeg, CallServices, CallSettings, LegReporter};
use crate::services::registry::CallMap;
use crate::{Error, Result};

pub fn test_config() -> B2buaConfig {
    let mut config = B2buaConfig::default_config();
    config.sip.listen_port = 5060;
    config.auth.enabled = true;
    config.accounting.enabled = true;
    config.accounting.cdr_directory = None;
    config.logging.file = None;
    config
}

pub fn invite(cld: &str) -> InboundRequest {
    InboundRequest {
        method: "INVITE".to_string(),
        call_id: "call-1@client".to_string(),
        to_tag: None,
        from_user: Some("1000".to_string()),
        from_name: None,
        ruri_user: Some(cld.to_string()),
        ruri_host: "b2b.example.net".to_string(),
        headers: Vec::new(),
        body: Some(Body::sdp(
            "v=0\r\no=- 1 1 IN IP4 192.0.2.10\r\ns=-\r\nc=IN IP4 192.0.2.10\r\nt=0 0\r\nm=audio 10000 RTP/AVP 0 18\r\n",
        )),
        authorization: None,
        max_forwards: Some(70),
        source: "192.0.2.10:5060".parse().unwrap(),
        via_addr: None,
    }
}

/// Let spawned call tasks drain their inboxes
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every lookup until the returned gate is notified
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn with_host(mut self, host: &str, addrs: &[&str]) -> Self {
        let addrs = addrs.iter().map(|a| a.parse().unwrap()).collect();
        self.hosts.insert(host.to_string(), addrs);
        self
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }
        self.hosts
            .get(host)
            .map(|addrs| addrs.iter().map(|ip| SocketAddr::new(*ip, port)).collect())
            .ok_or_else(|| Error::resolve(format!("{}: unknown host", host)))
    }
}

#[derive(Debug)]
struct MockLegInner {
    state: LegState,
    events: Vec<CallEvent>,
    try_event: Option<TryEvent>,
    disconnects: Vec<Option<DateTime<Utc>>>,
}

/// Leg that follows the usual state transitions and reports back at once
pub struct MockLeg {
    reporter: LegReporter,
    remote: Option<SocketAddr>,
    params: Option<OutboundLeg>,
    inner: Mutex<MockLegInner>,
}

impl MockLeg {
    fn new(reporter: LegReporter, remote: Option<SocketAddr>, params: Option<OutboundLeg>, state: LegState) -> Self {
        Self {
            reporter,
            remote,
            params,
            inner: Mutex::new(MockLegInner {
                state,
                events: Vec::new(),
                try_event: None,
                disconnects: Vec::new(),
            }),
        }
    }

    fn origin(&self) -> &'static str {
        match self.reporter.side() {
            CallLeg::A => "caller",
            CallLeg::O => "callee",
        }
    }

    fn set_state(&self, state: LegState) {
        self.inner.lock().unwrap().state = state;
    }

    fn is_alive(&self) -> bool {
        !matches!(self.state(), LegState::Disconnected | LegState::Failed | LegState::Dead)
    }

    fn die(&self, rtime: DateTime<Utc>, origin: &str, result: u16) {
        self.set_state(LegState::Disconnected);
        self.reporter.report(LegReport::Disconnected {
            rtime,
            origin: origin.to_string(),
            result,
        });
        self.set_state(LegState::Dead);
        self.reporter.report(LegReport::Dead);
    }

    pub fn events(&self) -> Vec<CallEvent> {
        self.inner.lock().unwrap().events.clone()
    }

    pub fn last_event(&self) -> Option<CallEvent> {
        self.inner.lock().unwrap().events.last().cloned()
    }

    /// Setup details of the first Try this leg received
    pub fn try_event(&self) -> Option<TryEvent> {
        self.inner.lock().unwrap().try_event.clone()
    }

    pub fn params(&self) -> Option<OutboundLeg> {
        self.params.clone()
    }

    pub fn disconnects(&self) -> Vec<Option<DateTime<Utc>>> {
        self.inner.lock().unwrap().disconnects.clone()
    }

    pub fn remote_ring(&self) {
        self.set_state(LegState::Ringing);
        self.reporter.event(CallEvent::new(CallEventKind::Ring {
            code: 180,
            reason: "Ringing".to_string(),
            body: None,
        }));
    }

    pub fn remote_answer(&self) {
        self.set_state(LegState::Connected);
        let event = CallEvent::new(CallEventKind::Connect {
            code: 200,
            reason: "OK".to_string(),
            body: None,
        });
        let rtime = event.rtime;
        self.reporter.event(event);
        self.reporter.report(LegReport::Connected {
            rtime,
            origin: "callee".to_string(),
        });
    }

    pub fn remote_fail(&self, code: u16) {
        self.set_state(LegState::Failed);
        let event = CallEvent::fail(code, "Remote Failure");
        let rtime = event.rtime;
        self.reporter.event(event);
        self.reporter.report(LegReport::Failed {
            rtime,
            origin: self.origin().to_string(),
            result: code,
        });
        self.set_state(LegState::Dead);
        self.reporter.report(LegReport::Dead);
    }

    pub fn remote_bye(&self) {
        let event = CallEvent::disconnect();
        let rtime = event.rtime;
        self.reporter.event(event);
        self.die(rtime, self.origin(), 0);
    }

    pub fn remote_event(&self, event: CallEvent) {
        self.reporter.event(event);
    }
}

impl Leg for MockLeg {
    fn state(&self) -> LegState {
        self.inner.lock().unwrap().state
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    fn recv_event(&self, event: CallEvent) {
        let rtime = event.rtime;
        let kind = event.kind.clone();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.events.push(event);
        }
        match kind {
            CallEventKind::Try(setup) => {
                let mut inner = self.inner.lock().unwrap();
                inner.try_event.get_or_insert(setup);
                inner.state = LegState::Trying;
            }
            CallEventKind::Ring { .. } => {
                if self.state().is_setup_pending() {
                    self.set_state(LegState::Ringing);
                }
            }
            CallEventKind::Connect { .. } => {
                self.set_state(LegState::Connected);
                self.reporter.report(LegReport::Connected {
                    rtime,
                    origin: "callee".to_string(),
                });
            }
            CallEventKind::Fail { code, .. } => {
                let state = self.state();
                if state.is_setup_pending() || state == LegState::Idle {
                    self.set_state(LegState::Failed);
                    self.reporter.report(LegReport::Failed {
                        rtime,
                        origin: "switch".to_string(),
                        result: code,
                    });
                    self.set_state(LegState::Dead);
                    self.reporter.report(LegReport::Dead);
                }
            }
            CallEventKind::Disconnect => {
                if self.is_alive() {
                    self.die(rtime, "switch", 0);
                }
            }
            _ => {}
        }
    }

    fn disconnect(&self, rtime: Option<DateTime<Utc>>) {
        self.inner.lock().unwrap().disconnects.push(rtime);
        if !self.is_alive() {
            return;
        }
        let mut event = CallEvent::disconnect();
        if let Some(rtime) = rtime {
            event = event.with_rtime(rtime);
        }
        let rtime = event.rtime;
        self.reporter.event(event);
        self.die(rtime, "switch", 0);
    }
}

#[derive(Default)]
pub struct MockLegFactory {
    inbound: Mutex<Vec<Arc<MockLeg>>>,
    outbound: Mutex<Vec<Arc<MockLeg>>>,
}

impl MockLegFactory {
    pub fn inbound(&self, index: usize) -> Arc<MockLeg> {
        Arc::clone(&self.inbound.lock().unwrap()[index])
    }

    pub fn outbound(&self, index: usize) -> Arc<MockLeg> {
        Arc::clone(&self.outbound.lock().unwrap()[index])
    }

    pub fn inbound_count(&self) -> usize {
        self.inbound.lock().unwrap().len()
    }

    pub fn outbound_count(&self) -> usize {
        self.outbound.lock().unwrap().len()
    }
}

impl LegFactory for MockLegFactory {
    fn inbound(&self, request: &InboundRequest, _params: InboundLeg, reporter: LegReporter) -> Arc<dyn Leg> {
        let leg = Arc::new(MockLeg::new(reporter, Some(request.source), None, LegState::Trying));
        self.inbound.lock().unwrap().push(Arc::clone(&leg));
        leg
    }

    fn outbound(&self, params: OutboundLeg, reporter: LegReporter) -> Arc<dyn Leg> {
        let remote = Some(params.next_hop);
        let leg = Arc::new(MockLeg::new(reporter, remote, Some(params), LegState::Idle));
        self.outbound.lock().unwrap().push(Arc::clone(&leg));
        leg
    }
}

#[derive(Debug, Clone)]
pub enum AuthReply {
    Accept(Vec<AuthAttribute>),
    Reject,
    Error,
}

pub struct MockAuth {
    reply: AuthReply,
    gate: Option<Arc<Notify>>,
    requests: Arc<Mutex<Vec<AuthRequest>>>,
}

impl MockAuth {
    pub fn new(reply: AuthReply) -> Self {
        Self {
            reply,
            gate: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Hold every reply until the gate is notified
    pub fn held(mut self) -> Self {
        self.gate = Some(Arc::new(Notify::new()));
        self
    }

    pub fn gate(&self) -> Arc<Notify> {
        self.gate.clone().unwrap()
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<AuthRequest>>> {
        Arc::clone(&self.requests)
    }
}

#[async_trait]
impl AuthClient for MockAuth {
    async fn authorize(&self, request: AuthRequest) -> Result<AuthResult> {
        self.requests.lock().unwrap().push(request);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match &self.reply {
            AuthReply::Accept(attributes) => Ok(AuthResult::accepted(attributes.clone())),
            AuthReply::Reject => Ok(AuthResult::rejected()),
            AuthReply::Error => Err(Error::auth("backend unavailable")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcctEvent {
    Open(AccountingParams),
    Credit(Option<u32>),
    Connect,
    Disconnect { origin: String, result: u16 },
}

impl AcctEvent {
    pub fn is_open(&self) -> bool {
        matches!(self, AcctEvent::Open(_))
    }

    pub fn is_connect(&self) -> bool {
        matches!(self, AcctEvent::Connect)
    }

    pub fn is_disconnect(&self) -> bool {
        matches!(self, AcctEvent::Disconnect { .. })
    }
}

type AcctLog = Arc<Mutex<Vec<(AccountingDirection, AcctEvent)>>>;

#[derive(Default)]
pub struct RecordingAccounting {
    log: AcctLog,
}

impl RecordingAccounting {
    pub fn count<F: Fn(&AcctEvent) -> bool>(&self, direction: AccountingDirection, filter: F) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, e)| *d == direction && filter(e))
            .count()
    }

    pub fn opened(&self, direction: AccountingDirection) -> Vec<AccountingParams> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(d, e)| match e {
                AcctEvent::Open(params) if *d == direction => Some(params.clone()),
                _ => None,
            })
            .collect()
    }
}

impl AccountingClient for RecordingAccounting {
    fn open_session(&self, params: AccountingParams) -> Box<dyn AccountingSession> {
        let direction = params.direction;
        self.log.lock().unwrap().push((direction, AcctEvent::Open(params)));
        Box::new(RecordingSession {
            direction,
            finished: false,
            log: Arc::clone(&self.log),
        })
    }
}

struct RecordingSession {
    direction: AccountingDirection,
    finished: bool,
    log: AcctLog,
}

impl RecordingSession {
    fn push(&self, event: AcctEvent) {
        self.log.lock().unwrap().push((self.direction, event));
    }
}

impl AccountingSession for RecordingSession {
    fn set_credit_time(&mut self, credit_time: Option<u32>) {
        self.push(AcctEvent::Credit(credit_time));
    }

    fn connect(&mut self, _rtime: DateTime<Utc>, _origin: &str) {
        self.push(AcctEvent::Connect);
    }

    fn disconnect(&mut self, _rtime: DateTime<Utc>, origin: &str, result: u16) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.push(AcctEvent::Disconnect {
            origin: origin.to_string(),
            result,
        });
    }
}

struct PassThrough;

#[async_trait]
impl SdpHook for PassThrough {
    async fn on_sdp_change(&self, body: Body) -> Result<Body> {
        Ok(body)
    }
}

#[derive(Default)]
pub struct MockRelaySession {
    pub caller_address: Mutex<Option<SocketAddr>>,
    pub callee_target: Mutex<Option<SocketAddr>>,
    pub insert_nortpp: AtomicBool,
}

impl MediaRelaySession for MockRelaySession {
    fn set_caller_address(&self, addr: SocketAddr) {
        *self.caller_address.lock().unwrap() = Some(addr);
    }

    fn set_callee_target(&self, addr: SocketAddr) {
        *self.callee_target.lock().unwrap() = Some(addr);
    }

    fn set_insert_nortpp(&self, enabled: bool) {
        self.insert_nortpp.store(enabled, Ordering::SeqCst);
    }

    fn caller_hook(&self) -> Arc<dyn SdpHook> {
        Arc::new(PassThrough)
    }

    fn callee_hook(&self) -> Arc<dyn SdpHook> {
        Arc::new(PassThrough)
    }
}

#[derive(Default)]
pub struct MockRelay {
    sessions: Mutex<Vec<Arc<MockRelaySession>>>,
}

impl MockRelay {
    pub fn session(&self, index: usize) -> Arc<MockRelaySession> {
        Arc::clone(&self.sessions.lock().unwrap()[index])
    }
}

impl MediaRelayClient for MockRelay {
    fn create_session(&self, _call_id: &str) -> Result<Arc<dyn MediaRelaySession>> {
        let session = Arc::new(MockRelaySession::default());
        self.sessions.lock().unwrap().push(Arc::clone(&session));
        Ok(session)
    }
}

#[derive(Default)]
pub struct MockTransactions {
    list: Mutex<Vec<TransactionInfo>>,
    closed: AtomicBool,
}

impl MockTransactions {
    pub fn set(&self, list: Vec<TransactionInfo>) {
        *self.list.lock().unwrap() = list;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl TransactionLayer for MockTransactions {
    fn transactions(&self) -> Vec<TransactionInfo> {
        self.list.lock().unwrap().clone()
    }

    fn close_listener(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockLifecycle {
    restarts: AtomicUsize,
}

impl MockLifecycle {
    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

impl ProcessLifecycle for MockLifecycle {
    fn drain_and_restart(&self) -> Result<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A registry wired to mocks
pub struct TestBed {
    pub legs: Arc<MockLegFactory>,
    pub accounting: Arc<RecordingAccounting>,
    pub relay: Arc<MockRelay>,
    pub transactions: Arc<MockTransactions>,
    pub lifecycle: Arc<MockLifecycle>,
    pub resolver: Arc<StaticResolver>,
    pub map: Arc<CallMap>,
}

impl TestBed {
    pub fn new(config: B2buaConfig, auth: Option<MockAuth>) -> Self {
        let legs = Arc::new(MockLegFactory::default());
        let accounting = Arc::new(RecordingAccounting::default());
        let relay = Arc::new(MockRelay::default());
        let transactions = Arc::new(MockTransactions::default());
        let lifecycle = Arc::new(MockLifecycle::default());

        let resolver = Arc::new(
            StaticResolver::new()
                .with_host("gw1.example.net", &["192.0.2.20"])
                .with_host("gw2.example.net", &["192.0.2.21"])
                .with_host("gw3.example.net", &["192.0.2.22"])
                .with_host("proxy.example.net", &["192.0.2.30"]),
        );

        let services = CallServices {
            settings: CallSettings::from_config(&config).unwrap(),
            legs: legs.clone(),
            resolver: resolver.clone(),
            auth: auth.map(|a| Arc::new(a) as Arc<dyn AuthClient>),
            accounting: config
                .accounting
                .enabled
                .then(|| accounting.clone() as Arc<dyn AccountingClient>),
            media_relay: config
                .media_relay
                .enabled
                .then(|| relay.clone() as Arc<dyn MediaRelayClient>),
        };

        let map = Arc::new(CallMap::new(
            Arc::new(config),
            Arc::new(services),
            transactions.clone(),
            lifecycle.clone(),
        ));

        Self {
            legs,
            accounting,
            relay,
            transactions,
            lifecycle,
            resolver,
            map,
        }
    }

    pub fn with_auth(auth: MockAuth) -> Self {
        Self::new(test_config(), Some(auth))
    }
}
