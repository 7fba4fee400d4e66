//! JSONL sink for executed queries.
//!
//! Records are buffered per role and written as newline-delimited JSON files
//! that rotate by size. A writer thread owns the files; executors hand it
//! records over a bounded channel.

use crate::core::config::OutputConfig;
use crate::core::intent::{ClientProfile, Intent, ParamValue};
use crate::core::traits::{Connector, ExecError, Executor};
use chrono::{DateTime, SecondsFormat, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::thread;

/// One executed (or attempted) statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub timestamp: String,
    pub user: String,
    pub role: String,
    pub action: String,
    pub session_id: Option<String>,
    pub anomaly_flag: u8,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    pub profile: Option<ClientProfile>,
    pub sql: String,
    pub success: bool,
}

impl QueryRecord {
    pub fn new(
        intent: &Intent,
        sql: &str,
        timestamp: DateTime<Utc>,
        profile: Option<&ClientProfile>,
        success: bool,
    ) -> Self {
        Self {
            timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            user: intent.user.clone(),
            role: intent.role.to_string(),
            action: intent.action.clone(),
            session_id: intent.session_id.clone(),
            anomaly_flag: intent.anomaly_flag,
            params: intent.params.clone(),
            profile: profile.cloned(),
            sql: sql.to_string(),
            success,
        }
    }
}

/// JSONL writer buffering records per role.
pub struct JsonlWriter {
    dir: PathBuf,
    target_size_bytes: u64,
    compression: JsonlCompression,
    files: HashMap<String, RoleBuffer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonlCompression {
    None,
    Gzip,
}

impl JsonlWriter {
    /// Creates a JSONL writer with size-based rotation.
    pub fn new(
        dir: impl Into<PathBuf>,
        target_size_mb: u64,
        compression: Option<&str>,
    ) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let compression = parse_compression(compression)?;
        Ok(Self {
            dir,
            target_size_bytes: target_size_mb.max(1).saturating_mul(1024 * 1024),
            compression,
            files: HashMap::new(),
        })
    }

    pub fn write_record(&mut self, record: &QueryRecord) -> io::Result<u64> {
        let mut bytes = serde_json::to_vec(record).map_err(io::Error::other)?;
        bytes.push(b'\n');
        let size = bytes.len() as u64;

        let buffer = self.files.entry(record.role.clone()).or_default();
        buffer.data.extend_from_slice(&bytes);
        if buffer.data.len() as u64 >= self.target_size_bytes {
            flush_role(&self.dir, &record.role, buffer, self.compression)?;
        }
        Ok(size)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        for (role, buffer) in self.files.iter_mut() {
            flush_role(&self.dir, role, buffer, self.compression)?;
        }
        Ok(())
    }

    pub fn close(&mut self) -> io::Result<()> {
        self.flush()
    }
}

#[derive(Default)]
struct RoleBuffer {
    data: Vec<u8>,
}

fn flush_role(
    dir: &Path,
    role: &str,
    buffer: &mut RoleBuffer,
    compression: JsonlCompression,
) -> io::Result<()> {
    if buffer.data.is_empty() {
        return Ok(());
    }
    let ext = match compression {
        JsonlCompression::None => "jsonl",
        JsonlCompression::Gzip => "jsonl.gz",
    };
    let path = dir.join(format!(
        "{role}_queries_{}_{}.{ext}",
        Utc::now().format("%Y%m%dT%H%M%SZ"),
        unique_id()
    ));
    let file = File::create(path)?;
    match compression {
        JsonlCompression::None => {
            let mut file = file;
            file.write_all(&buffer.data)?;
        }
        JsonlCompression::Gzip => {
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(&buffer.data)?;
            encoder.finish()?;
        }
    }
    buffer.data.clear();
    Ok(())
}

fn unique_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

fn parse_compression(value: Option<&str>) -> io::Result<JsonlCompression> {
    let Some(value) = value else {
        return Ok(JsonlCompression::None);
    };
    match value.trim().to_lowercase().as_str() {
        "" | "none" => Ok(JsonlCompression::None),
        "gzip" | "gz" => Ok(JsonlCompression::Gzip),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported jsonl compression: {value}"),
        )),
    }
}

pub enum WriterCommand {
    Record(Box<QueryRecord>),
    Flush,
    Close,
}

/// Writer thread plus the sending half of its queue.
pub struct JsonlSink {
    tx: SyncSender<WriterCommand>,
    handle: Option<thread::JoinHandle<io::Result<()>>>,
    written: Arc<AtomicU64>,
}

impl JsonlSink {
    pub fn spawn(output: &OutputConfig, queue_depth: usize) -> io::Result<Self> {
        let mut writer = JsonlWriter::new(
            &output.dir,
            output.target_size_mb,
            output.compression.as_deref(),
        )?;
        let (tx, rx) = sync_channel(queue_depth.max(1));
        let written = Arc::new(AtomicU64::new(0));
        let written_counter = Arc::clone(&written);
        let handle = thread::spawn(move || -> io::Result<()> {
            while let Ok(command) = rx.recv() {
                match command {
                    WriterCommand::Record(record) => {
                        writer.write_record(&record)?;
                        written_counter.fetch_add(1, Ordering::Relaxed);
                    }
                    WriterCommand::Flush => writer.flush()?,
                    WriterCommand::Close => break,
                }
            }
            writer.close()
        });
        Ok(Self {
            tx,
            handle: Some(handle),
            written,
        })
    }

    pub fn sender(&self) -> SyncSender<WriterCommand> {
        self.tx.clone()
    }

    pub fn send(&self, record: QueryRecord) -> io::Result<()> {
        self.tx
            .send(WriterCommand::Record(Box::new(record)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "jsonl writer stopped"))
    }

    pub fn flush(&self) {
        let _ = self.tx.send(WriterCommand::Flush);
    }

    /// Flushes everything, waits for the writer thread and returns the
    /// number of records written.
    pub fn close(mut self) -> io::Result<u64> {
        let _ = self.tx.send(WriterCommand::Close);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| io::Error::other("jsonl writer thread panicked"))??;
        }
        Ok(self.written.load(Ordering::Relaxed))
    }
}

/// Connector whose sessions log statements to a [`JsonlSink`].
pub struct JsonlConnector {
    tx: SyncSender<WriterCommand>,
    error_rate: f64,
    seed: u64,
    connections: AtomicU64,
}

impl JsonlConnector {
    pub fn new(sink: &JsonlSink, error_rate: f64, seed: u64) -> Self {
        Self {
            tx: sink.sender(),
            error_rate: error_rate.clamp(0.0, 1.0),
            seed,
            connections: AtomicU64::new(0),
        }
    }
}

impl Connector for JsonlConnector {
    fn connect(&self, _user: &str, _profile: &ClientProfile) -> Result<Box<dyn Executor>, ExecError> {
        let n = self.connections.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(JsonlExecutor {
            tx: self.tx.clone(),
            error_rate: self.error_rate,
            rng: StdRng::seed_from_u64(self.seed.wrapping_add(n)),
        }))
    }
}

struct JsonlExecutor {
    tx: SyncSender<WriterCommand>,
    error_rate: f64,
    rng: StdRng,
}

impl Executor for JsonlExecutor {
    fn execute(
        &mut self,
        intent: &Intent,
        sql: &str,
        timestamp: Option<DateTime<Utc>>,
        profile: Option<&ClientProfile>,
    ) -> Result<bool, ExecError> {
        let success = !(self.error_rate > 0.0 && self.rng.gen_bool(self.error_rate));
        let record = QueryRecord::new(
            intent,
            sql,
            timestamp.unwrap_or_else(Utc::now),
            profile,
            success,
        );
        self.tx
            .send(WriterCommand::Record(Box::new(record)))
            .map_err(|_| ExecError::Connection("jsonl writer stopped".to_string()))?;
        Ok(success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::intent::Role;
    use std::io::Read;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dbsim-{name}-{}", unique_id()));
        fs::create_dir_all(&dir).expect("temp dir");
        dir
    }

    fn intent(user: &str, role: Role) -> Intent {
        Intent {
            user: user.to_string(),
            role,
            action: "CHECK_HEALTH".to_string(),
            params: BTreeMap::new(),
            session_id: Some("S1".to_string()),
            anomaly_flag: 0,
        }
    }

    fn read_all(dir: &Path) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for entry in fs::read_dir(dir).expect("read dir") {
            let path = entry.expect("entry").path();
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            let mut content = String::new();
            if name.ends_with(".gz") {
                flate2::read::GzDecoder::new(File::open(&path).expect("open"))
                    .read_to_string(&mut content)
                    .expect("gunzip");
            } else {
                File::open(&path)
                    .expect("open")
                    .read_to_string(&mut content)
                    .expect("read");
            }
            out.push((name, content));
        }
        out
    }

    #[test]
    fn writes_one_file_per_role() {
        let dir = temp_dir("roles");
        let mut writer = JsonlWriter::new(&dir, 16, None).expect("writer");
        let now = Utc::now();
        for (user, role) in [("hr_001", Role::Hr), ("sales_001", Role::Sales), ("hr_002", Role::Hr)] {
            let record = QueryRecord::new(&intent(user, role), "SELECT 1", now, None, true);
            writer.write_record(&record).expect("write");
        }
        writer.close().expect("close");

        let files = read_all(&dir);
        assert_eq!(files.len(), 2);
        let (_, hr) = files
            .iter()
            .find(|(name, _)| name.starts_with("hr_queries_"))
            .expect("hr file");
        let records: Vec<QueryRecord> = hr
            .lines()
            .map(|line| serde_json::from_str(line).expect("json"))
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].user, "hr_002");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn sink_gzips_and_counts() {
        let dir = temp_dir("gzip");
        let output = OutputConfig {
            dir: dir.to_string_lossy().to_string(),
            compression: Some("gzip".to_string()),
            ..OutputConfig::default()
        };
        let sink = JsonlSink::spawn(&output, 8).expect("sink");
        let connector = JsonlConnector::new(&sink, 0.0, 7);
        let profile = ClientProfile {
            os: "Windows 11".to_string(),
            program: "Excel".to_string(),
            connector: "ODBC Driver 18".to_string(),
            hostname: "WS-HR-0001".to_string(),
            source_ip: "10.0.0.1".to_string(),
        };
        let mut session = connector.connect("hr_001", &profile).expect("connect");
        for _ in 0..3 {
            let ok = session
                .execute(&intent("hr_001", Role::Hr), "SELECT 1", None, Some(&profile))
                .expect("execute");
            assert!(ok);
        }
        drop(session);
        assert_eq!(sink.close().expect("close"), 3);

        let files = read_all(&dir);
        let lines: usize = files.iter().map(|(_, content)| content.lines().count()).sum();
        assert_eq!(lines, 3);
        assert!(files.iter().all(|(name, _)| name.ends_with(".jsonl.gz")));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn error_rate_one_always_fails() {
        let dir = temp_dir("errors");
        let output = OutputConfig {
            dir: dir.to_string_lossy().to_string(),
            ..OutputConfig::default()
        };
        let sink = JsonlSink::spawn(&output, 8).expect("sink");
        let connector = JsonlConnector::new(&sink, 1.0, 1);
        let profile = crate::harness::profiles::sample_profile(Role::Sales, &mut StdRng::seed_from_u64(1));
        let mut session = connector.connect("sales_001", &profile).expect("connect");
        let ok = session
            .execute(&intent("sales_001", Role::Sales), "SELECT 1", None, None)
            .expect("execute");
        assert!(!ok);
        sink.close().expect("close");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rejects_unknown_compression() {
        let dir = temp_dir("bad");
        assert!(JsonlWriter::new(&dir, 1, Some("zstd")).is_err());
        fs::remove_dir_all(&dir).ok();
    }
}
