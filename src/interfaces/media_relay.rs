//! Media relay control

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::protocols::sdp::Body;
use crate::Result;

/// Rewrites a session description on its way through a leg
#[async_trait]
pub trait SdpHook: Send + Sync {
    async fn on_sdp_change(&self, body: Body) -> Result<Body>;
}

pub trait MediaRelaySession: Send + Sync {
    fn set_caller_address(&self, addr: SocketAddr);
    fn set_callee_target(&self, addr: SocketAddr);
    /// Ask the relay to mark offers it did not rewrite
    fn set_insert_nortpp(&self, enabled: bool);
    fn caller_hook(&self) -> Arc<dyn SdpHook>;
    fn callee_hook(&self) -> Arc<dyn SdpHook>;
}

pub trait MediaRelayClient: Send + Sync {
    fn create_session(&self, call_id: &str) -> Result<Arc<dyn MediaRelaySession>>;
}
