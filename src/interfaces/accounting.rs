//! Accounting backend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountingDirection {
    /// Session for the answering leg
    Answer,
    /// Session for one originating attempt
    Originate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountingParams {
    pub direction: AccountingDirection,
    pub username: String,
    pub cli: Option<String>,
    pub cld: Option<String>,
    pub call_id: String,
    pub correlation_id: String,
    pub remote_host: String,
}

/// One accounting session. Only the first `disconnect` is recorded.
pub trait AccountingSession: Send {
    fn set_credit_time(&mut self, credit_time: Option<u32>);
    fn connect(&mut self, rtime: DateTime<Utc>, origin: &str);
    fn disconnect(&mut self, rtime: DateTime<Utc>, origin: &str, result: u16);
}

pub trait AccountingClient: Send + Sync {
    fn open_session(&self, params: AccountingParams) -> Box<dyn AccountingSession>;
}

/// Used when accounting is disabled
#[derive(Debug, Default, Clone)]
pub struct NoopAccounting;

#[derive(Debug, Default)]
struct NoopSession;

impl AccountingSession for NoopSession {
    fn set_credit_time(&mut self, _credit_time: Option<u32>) {}
    fn connect(&mut self, _rtime: DateTime<Utc>, _origin: &str) {}
    fn disconnect(&mut self, _rtime: DateTime<Utc>, _origin: &str, _result: u16) {}
}

impl AccountingClient for NoopAccounting {
    fn open_session(&self, _params: AccountingParams) -> Box<dyn AccountingSession> {
        Box::new(NoopSession)
    }
}
