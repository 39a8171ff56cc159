//! SIP-facing value types exchanged between the transport and the call core
//!
//! The transport owns message parsing and transactions. What reaches the
//! core is an already decoded [`InboundRequest`] for new requests and
//! [`CallEvent`]s for everything that happens on an established leg.

use chrono::{DateTime, Utc};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use uuid::Uuid;

use crate::protocols::sdp::Body;
use crate::{Error, Result};

/// A single header line, kept verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Parse a `Name: value` line
    pub fn parse(line: &str) -> Result<Self> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::parse(format!("Header without colon: {}", line)))?;
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(Error::parse(format!("Invalid header name in: {}", line)));
        }
        Ok(Self::new(name, value.trim()))
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// Digest credentials carried in an Authorization header
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DigestCredentials {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub response: String,
}

/// Final or provisional response produced by the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub reason: String,
    pub headers: Vec<Header>,
}

impl Response {
    pub fn new<S: Into<String>>(code: u16, reason: S) -> Self {
        Self {
            code,
            reason: reason.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, header: Header) -> Self {
        self.headers.push(header);
        self
    }
}

/// A decoded request handed to the call registry by the transport
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: String,
    pub call_id: String,
    /// Tag of the To header, present for in-dialog requests
    pub to_tag: Option<String>,
    /// User part of the From URI
    pub from_user: Option<String>,
    /// Display name of the From header
    pub from_name: Option<String>,
    /// User part of the request URI
    pub ruri_user: Option<String>,
    /// Host part of the request URI
    pub ruri_host: String,
    pub headers: Vec<Header>,
    pub body: Option<Body>,
    pub authorization: Option<DigestCredentials>,
    pub max_forwards: Option<u32>,
    /// Address the request was received from
    pub source: SocketAddr,
    /// Address the sender claims in its topmost Via, if it differs
    pub via_addr: Option<IpAddr>,
}

impl InboundRequest {
    pub fn is_method(&self, method: &str) -> bool {
        self.method.eq_ignore_ascii_case(method)
    }

    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Header> + 'a {
        self.headers.iter().filter(move |h| h.is(name))
    }

    pub fn header(&self, name: &str) -> Option<&Header> {
        self.headers.iter().find(|h| h.is(name))
    }

    /// Address of the calling party
    pub fn remote_ip(&self) -> IpAddr {
        self.via_addr.unwrap_or_else(|| self.source.ip())
    }

    /// Correlation identifier shared by both legs, taken from an
    /// `h323-conf-id` header when the caller supplied one
    pub fn correlation_id(&self) -> String {
        self.header("h323-conf-id")
            .map(|h| h.value.clone())
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string().to_uppercase())
    }

    /// Build the setup event for this request
    pub fn try_event(&self) -> TryEvent {
        TryEvent {
            call_id: self.call_id.clone(),
            correlation_id: self.correlation_id(),
            cli: self.from_user.clone(),
            cld: self.ruri_user.clone(),
            caller_name: self.from_name.clone(),
            body: self.body.clone(),
            auth: self.authorization.clone(),
            max_forwards: self.max_forwards,
            reason: self.header("Reason").map(|h| h.value.clone()),
        }
    }
}

/// Call setup data carried by a Try event
#[derive(Debug, Clone, PartialEq)]
pub struct TryEvent {
    pub call_id: String,
    pub correlation_id: String,
    pub cli: Option<String>,
    pub cld: Option<String>,
    pub caller_name: Option<String>,
    pub body: Option<Body>,
    pub auth: Option<DigestCredentials>,
    pub max_forwards: Option<u32>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallEventKind {
    Try(TryEvent),
    Ring {
        code: u16,
        reason: String,
        body: Option<Body>,
    },
    Connect {
        code: u16,
        reason: String,
        body: Option<Body>,
    },
    Fail {
        code: u16,
        reason: String,
        extra_headers: Vec<Header>,
    },
    Disconnect,
    /// Session update (re-INVITE or UPDATE) carrying a new offer
    Update {
        body: Option<Body>,
    },
    Info {
        body: Option<Body>,
    },
}

/// Something that happened on a leg, or an instruction for a leg
#[derive(Debug, Clone, PartialEq)]
pub struct CallEvent {
    pub kind: CallEventKind,
    pub rtime: DateTime<Utc>,
    pub origin: Option<String>,
}

impl CallEvent {
    pub fn new(kind: CallEventKind) -> Self {
        Self {
            kind,
            rtime: Utc::now(),
            origin: None,
        }
    }

    pub fn fail<S: Into<String>>(code: u16, reason: S) -> Self {
        Self::new(CallEventKind::Fail {
            code,
            reason: reason.into(),
            extra_headers: Vec::new(),
        })
    }

    pub fn disconnect() -> Self {
        Self::new(CallEventKind::Disconnect)
    }

    pub fn with_rtime(mut self, rtime: DateTime<Utc>) -> Self {
        self.rtime = rtime;
        self
    }

    pub fn with_origin<S: Into<String>>(mut self, origin: S) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_header(mut self, header: Header) -> Self {
        if let CallEventKind::Fail { extra_headers, .. } = &mut self.kind {
            extra_headers.push(header);
        }
        self
    }

    /// Status code for failures, `None` for a plain disconnect
    pub fn failure_code(&self) -> Option<u16> {
        match &self.kind {
            CallEventKind::Fail { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.kind, CallEventKind::Fail { .. } | CallEventKind::Disconnect)
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            CallEventKind::Try(_) => "Try",
            CallEventKind::Ring { .. } => "Ring",
            CallEventKind::Connect { .. } => "Connect",
            CallEventKind::Fail { .. } => "Fail",
            CallEventKind::Disconnect => "Disconnect",
            CallEventKind::Update { .. } => "Update",
            CallEventKind::Info { .. } => "Info",
        }
    }
}
