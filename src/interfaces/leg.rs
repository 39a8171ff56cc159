//! Call legs as provided by the signaling transport

use chrono::{DateTime, Utc};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::interfaces::media_relay::SdpHook;
use crate::protocols::sip::{CallEvent, Header, InboundRequest};
use crate::services::call::LegReporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegState {
    Idle,
    Trying,
    Ringing,
    Connected,
    Updating,
    Disconnected,
    Failed,
    Dead,
}

impl LegState {
    /// Call setup still in progress on this leg
    pub fn is_setup_pending(&self) -> bool {
        matches!(self, LegState::Trying | LegState::Ringing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LegState::Idle => "Idle",
            LegState::Trying => "Trying",
            LegState::Ringing => "Ringing",
            LegState::Connected => "Connected",
            LegState::Updating => "Updating",
            LegState::Disconnected => "Disconnected",
            LegState::Failed => "Failed",
            LegState::Dead => "Dead",
        }
    }
}

impl fmt::Display for LegState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a leg tells its call controller
#[derive(Debug, Clone)]
pub enum LegReport {
    /// Event received from the remote party, to be bridged to the peer leg
    Event(CallEvent),
    Connected {
        rtime: DateTime<Utc>,
        origin: String,
    },
    Disconnected {
        rtime: DateTime<Utc>,
        origin: String,
        result: u16,
    },
    Failed {
        rtime: DateTime<Utc>,
        origin: String,
        result: u16,
    },
    /// The leg released all of its resources
    Dead,
}

/// Handle to a live leg.
///
/// `disconnect` tears the leg down and reports a `Disconnect` event back
/// through the leg's reporter, so the peer leg follows through the normal
/// bridging path.
pub trait Leg: Send + Sync {
    fn state(&self) -> LegState;
    fn remote_addr(&self) -> Option<SocketAddr>;
    /// Deliver an event to be sent toward this leg's remote party
    fn recv_event(&self, event: CallEvent);
    fn disconnect(&self, rtime: Option<DateTime<Utc>>);
}

/// Parameters for the answering leg
#[derive(Debug, Clone)]
pub struct InboundLeg {
    pub keepalive_interval: u32,
    pub user_agent: String,
}

/// Parameters for an originating leg
#[derive(Clone)]
pub struct OutboundLeg {
    pub credentials: Option<(String, String)>,
    pub next_hop: SocketAddr,
    pub outbound_proxy: Option<(String, u16)>,
    pub credit_time: Option<u32>,
    pub expires: Option<u32>,
    pub no_progress_expires: Option<u32>,
    pub extra_headers: Vec<Header>,
    pub keepalive_interval: u32,
    pub user_agent: String,
    pub local_sdp_hook: Option<Arc<dyn SdpHook>>,
    pub remote_sdp_hook: Option<Arc<dyn SdpHook>>,
}

impl fmt::Debug for OutboundLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundLeg")
            .field("next_hop", &self.next_hop)
            .field("outbound_proxy", &self.outbound_proxy)
            .field("credit_time", &self.credit_time)
            .field("expires", &self.expires)
            .field("no_progress_expires", &self.no_progress_expires)
            .field("extra_headers", &self.extra_headers)
            .field("sdp_hooks", &self.local_sdp_hook.is_some())
            .finish()
    }
}

pub trait LegFactory: Send + Sync {
    /// Create the answering leg for a new call-setup request
    fn inbound(&self, request: &InboundRequest, params: InboundLeg, reporter: LegReporter) -> Arc<dyn Leg>;

    /// Create an originating leg; the call sends it a Try event right after
    fn outbound(&self, params: OutboundLeg, reporter: LegReporter) -> Arc<dyn Leg>;
}
