//! Transaction layer statistics and listener control

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionRole {
    Server,
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub id: String,
    pub method: String,
    pub state: String,
    pub role: TransactionRole,
    pub age: Duration,
}

pub trait TransactionLayer: Send + Sync {
    fn transactions(&self) -> Vec<TransactionInfo>;

    /// Stop accepting new requests
    fn close_listener(&self);

    fn counts(&self) -> (usize, usize) {
        self.transactions().iter().fold((0, 0), |(server, client), t| match t.role {
            TransactionRole::Server => (server + 1, client),
            TransactionRole::Client => (server, client + 1),
        })
    }
}
