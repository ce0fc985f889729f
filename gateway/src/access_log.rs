//! CSV access log of generation requests.
//!
//! One row per request goes to `<dir>/requests.csv` and to
//! `<dir>/clients/<client>.csv`. Writes happen on a background task fed by a
//! bounded queue; a full queue or a failing disk never delays or fails the
//! request being logged.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, error::TrySendError};

const HEADER: &str = "client,handling_server,date_time,prompt\n";
const QUEUE_CAPACITY: usize = 1024;

/// One logged request.
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub client: String,
    /// Backend that handled the request, empty when none did.
    pub backend: String,
    pub timestamp: DateTime<Local>,
    pub prompt: String,
}

impl AccessRecord {
    pub fn new(client: impl Into<String>, backend: Option<&str>, prompt: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            backend: backend.unwrap_or_default().to_string(),
            timestamp: Local::now(),
            prompt: prompt.into(),
        }
    }

    fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{}\n",
            csv_field(&self.client),
            csv_field(&self.backend),
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            csv_field(&self.prompt)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AccessLogError {
    #[error("access log queue is full")]
    QueueFull,
    #[error("access log writer has stopped")]
    Closed,
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Handle for submitting records. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AccessLog {
    tx: Option<mpsc::Sender<AccessRecord>>,
}

impl AccessLog {
    /// An access log that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Start the writer task. Must be called from within a Tokio runtime.
    pub fn spawn(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        tracing::info!("Access log enabled, writing to {}", dir.display());
        tokio::spawn(writer_loop(dir, rx));
        Self { tx: Some(tx) }
    }

    /// Queue a record. Never blocks; dropped records are only logged.
    pub fn record(&self, record: AccessRecord) {
        if let Err(e) = self.try_record(record) {
            tracing::warn!("Dropping access log record: {}", e);
        }
    }

    fn try_record(&self, record: AccessRecord) -> Result<(), AccessLogError> {
        let Some(tx) = &self.tx else {
            return Ok(());
        };
        tx.try_send(record).map_err(|e| match e {
            TrySendError::Full(_) => AccessLogError::QueueFull,
            TrySendError::Closed(_) => AccessLogError::Closed,
        })
    }
}

async fn writer_loop(dir: PathBuf, mut rx: mpsc::Receiver<AccessRecord>) {
    while let Some(record) = rx.recv().await {
        if let Err(e) = write_record(&dir, &record).await {
            tracing::warn!("Failed to write access log: {}", e);
        }
    }
    tracing::debug!("Access log writer stopped");
}

async fn write_record(dir: &Path, record: &AccessRecord) -> Result<(), AccessLogError> {
    let row = record.to_csv_row();
    append_row(&dir.join("requests.csv"), &row).await?;

    let client_file = format!("{}.csv", sanitize_file_name(&record.client));
    append_row(&dir.join("clients").join(client_file), &row).await
}

async fn append_row(path: &Path, row: &str) -> Result<(), AccessLogError> {
    let io_err = |source: std::io::Error| AccessLogError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(io_err)?;

    let is_new = file.metadata().await.map_err(io_err)?.len() == 0;
    let mut data = String::with_capacity(HEADER.len() + row.len());
    if is_new {
        data.push_str(HEADER);
    }
    data.push_str(row);

    file.write_all(data.as_bytes()).await.map_err(io_err)?;
    file.flush().await.map_err(io_err)
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Client ids come from request headers; keep only characters safe in a file name.
fn sanitize_file_name(client: &str) -> String {
    let name: String = client
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() || name.chars().all(|c| c == '.') {
        "unknown".to_string()
    } else {
        name
    }
}
