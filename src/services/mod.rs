//! Services module for the Redfire B2BUA

pub mod admin;
pub mod call;
pub mod cdr;
pub mod registry;
pub mod route;
pub mod translation;

pub use admin::AdminServer;
pub use call::{CallController, CallLeg, CallServices, CallSettings, CallState, CallStatus, LegReporter, LegSnapshot};
pub use cdr::{CallDetailRecord, CdrAccounting, CdrStorage, FileCdrStorage, RecordType};
pub use registry::{CallHandle, CallMap, CallSummary};
pub use route::{B2bRoute, RouteParam};
pub use translation::TranslationRule;
