//! Signaling message model

pub mod sdp;
pub mod sip;

pub use sdp::Body;
pub use sip::{CallEvent, CallEventKind, DigestCredentials, Header, InboundRequest, Response, TryEvent};
