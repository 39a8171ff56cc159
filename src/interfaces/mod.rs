//! Collaborator interfaces the B2BUA core is driven through

pub mod accounting;
pub mod auth;
pub mod leg;
pub mod lifecycle;
pub mod media_relay;
pub mod resolver;
pub mod transaction;

pub use accounting::{AccountingClient, AccountingDirection, AccountingParams, AccountingSession, NoopAccounting};
pub use auth::{AuthAttribute, AuthClient, AuthRequest, AuthResult};
pub use leg::{InboundLeg, Leg, LegFactory, LegReport, LegState, OutboundLeg};
pub use lifecycle::{ExecRestart, ProcessLifecycle};
pub use media_relay::{MediaRelayClient, MediaRelaySession, SdpHook};
pub use resolver::{Resolver, SystemResolver};
pub use transaction::{TransactionInfo, TransactionLayer, TransactionRole};
