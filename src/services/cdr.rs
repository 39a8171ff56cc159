//! CDR (Call Detail Record) accounting backend
//!
//! Each accounting session produces one stop record when it is
//! disconnected, and optionally a start record when it connects. Records
//! are handed to a writer task and stored as JSON lines in rotating files.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::interfaces::accounting::{
    AccountingClient, AccountingDirection, AccountingParams, AccountingSession,
};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Start,
    Stop,
}

/// Call Detail Record structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallDetailRecord {
    pub id: String,
    pub session_id: String,
    pub record_type: RecordType,
    pub direction: AccountingDirection,
    pub node_id: String,
    pub username: String,
    pub cli: Option<String>,
    pub cld: Option<String>,
    pub call_id: String,
    pub correlation_id: String,
    pub remote_host: String,
    pub setup_time: DateTime<Utc>,
    pub connect_time: Option<DateTime<Utc>>,
    pub disconnect_time: Option<DateTime<Utc>>,
    pub duration_seconds: u64,
    pub credit_time: Option<u32>,
    pub disconnect_origin: Option<String>,
    pub result_code: Option<u16>,
}

/// CDR storage backend
#[async_trait::async_trait]
pub trait CdrStorage: Send + Sync {
    async fn store_cdr(&self, cdr: &CallDetailRecord) -> Result<()>;
}

/// File-based CDR storage
pub struct FileCdrStorage {
    base_path: PathBuf,
    rotation_size_mb: u64,
    current_file: Arc<RwLock<Option<std::fs::File>>>,
    current_file_size: Arc<RwLock<u64>>,
}

impl FileCdrStorage {
    pub fn new(base_path: PathBuf, rotation_size_mb: u64) -> Self {
        Self {
            base_path,
            rotation_size_mb,
            current_file: Arc::new(RwLock::new(None)),
            current_file_size: Arc::new(RwLock::new(0)),
        }
    }

    async fn get_current_file(&self) -> Result<std::fs::File> {
        let mut file_guard = self.current_file.write().await;
        let mut size_guard = self.current_file_size.write().await;

        if file_guard.is_none() || *size_guard > (self.rotation_size_mb * 1024 * 1024) {
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
            let filename = format!("cdr_{}.jsonl", timestamp);
            let filepath = self.base_path.join(filename);

            std::fs::create_dir_all(&self.base_path)?;

            let new_file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&filepath)?;

            *file_guard = Some(new_file);
            *size_guard = 0;

            info!("Created new CDR file: {:?}", filepath);
        }

        match file_guard.as_ref() {
            Some(file) => Ok(file.try_clone()?),
            None => Err(Error::accounting("CDR file unavailable")),
        }
    }
}

#[async_trait::async_trait]
impl CdrStorage for FileCdrStorage {
    async fn store_cdr(&self, cdr: &CallDetailRecord) -> Result<()> {
        let mut file = self.get_current_file().await?;
        let line = format!("{}\n", serde_json::to_string(cdr)?);

        file.write_all(line.as_bytes())?;
        file.flush()?;

        let mut size_guard = self.current_file_size.write().await;
        *size_guard += line.len() as u64;

        Ok(())
    }
}

/// Accounting client writing CDRs through a [`CdrStorage`]
#[derive(Clone)]
pub struct CdrAccounting {
    node_id: String,
    send_start: bool,
    record_tx: mpsc::UnboundedSender<CallDetailRecord>,
}

impl CdrAccounting {
    /// Start the writer task. It runs until every session and every clone
    /// of the returned client has been dropped.
    pub fn spawn(
        storage: Arc<dyn CdrStorage>,
        node_id: String,
        send_start: bool,
    ) -> (Self, JoinHandle<()>) {
        let (record_tx, mut record_rx) = mpsc::unbounded_channel::<CallDetailRecord>();

        let writer = tokio::spawn(async move {
            while let Some(cdr) = record_rx.recv().await {
                if let Err(e) = storage.store_cdr(&cdr).await {
                    error!("Failed to store CDR {} for call {}: {}", cdr.id, cdr.call_id, e);
                }
            }
            debug!("CDR writer finished");
        });

        (
            Self {
                node_id,
                send_start,
                record_tx,
            },
            writer,
        )
    }
}

impl AccountingClient for CdrAccounting {
    fn open_session(&self, params: AccountingParams) -> Box<dyn AccountingSession> {
        Box::new(CdrSession {
            session_id: Uuid::new_v4().to_string(),
            node_id: self.node_id.clone(),
            send_start: self.send_start,
            params,
            setup_time: Utc::now(),
            connect_time: None,
            credit_time: None,
            finished: false,
            record_tx: self.record_tx.clone(),
        })
    }
}

struct CdrSession {
    session_id: String,
    node_id: String,
    send_start: bool,
    params: AccountingParams,
    setup_time: DateTime<Utc>,
    connect_time: Option<DateTime<Utc>>,
    credit_time: Option<u32>,
    finished: bool,
    record_tx: mpsc::UnboundedSender<CallDetailRecord>,
}

impl CdrSession {
    fn record(&self, record_type: RecordType) -> CallDetailRecord {
        CallDetailRecord {
            id: Uuid::new_v4().to_string(),
            session_id: self.session_id.clone(),
            record_type,
            direction: self.params.direction,
            node_id: self.node_id.clone(),
            username: self.params.username.clone(),
            cli: self.params.cli.clone(),
            cld: self.params.cld.clone(),
            call_id: self.params.call_id.clone(),
            correlation_id: self.params.correlation_id.clone(),
            remote_host: self.params.remote_host.clone(),
            setup_time: self.setup_time,
            connect_time: self.connect_time,
            disconnect_time: None,
            duration_seconds: 0,
            credit_time: self.credit_time,
            disconnect_origin: None,
            result_code: None,
        }
    }

    fn send(&self, cdr: CallDetailRecord) {
        if self.record_tx.send(cdr).is_err() {
            error!("CDR writer is gone, dropping record for call {}", self.params.call_id);
        }
    }
}

impl AccountingSession for CdrSession {
    fn set_credit_time(&mut self, credit_time: Option<u32>) {
        self.credit_time = credit_time;
    }

    fn connect(&mut self, rtime: DateTime<Utc>, _origin: &str) {
        if self.finished || self.connect_time.is_some() {
            return;
        }
        self.connect_time = Some(rtime);
        if self.send_start {
            self.send(self.record(RecordType::Start));
        }
    }

    fn disconnect(&mut self, rtime: DateTime<Utc>, origin: &str, result: u16) {
        if self.finished {
            return;
        }
        self.finished = true;

        let mut cdr = self.record(RecordType::Stop);
        cdr.disconnect_time = Some(rtime);
        cdr.duration_seconds = self
            .connect_time
            .map(|connected| rtime.signed_duration_since(connected).num_seconds().max(0) as u64)
            .unwrap_or(0);
        cdr.disconnect_origin = Some(origin.to_string());
        cdr.result_code = Some(result);
        self.send(cdr);
    }
}
