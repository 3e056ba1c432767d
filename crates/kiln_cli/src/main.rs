//! KILN CLI
//!
//! Inspect run logs and compute artifact upload keys.

#![warn(missing_docs)]
#![warn(clippy::all)]

use bytes::Bytes;
use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use futures::{StreamExt, stream};
use kiln_core::{Hash, Hasher, RunId, Timestamp};
use kiln_dispatch::{DispatchConfig, Dispatcher, EventService, UploadChunk};
use kiln_log::{LogContents, SCHEMA_VERSION, read_log};
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;

const UPLOAD_CHUNK: usize = 64 * 1024;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "KILN - run logs and artifacts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the messages of a log file as JSON lines
    Inspect {
        /// Path to log file
        log: PathBuf,
    },
    /// Print the upload key of a file
    Checksum {
        /// File to hash
        file: PathBuf,
    },
    /// Print the persisted messages of a run as JSON lines
    Logs {
        /// Data directory of the dispatch service
        #[arg(short, long, default_value = "kiln-data")]
        root: PathBuf,
        /// Run ID
        run: RunId,
    },
    /// Store a file as a checksummed artifact
    Upload {
        /// Data directory of the dispatch service
        #[arg(short, long, default_value = "kiln-data")]
        root: PathBuf,
        /// File to upload
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kiln=info")),
        )
        .with_writer(io::stderr)
        .init();

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    match cli.command {
        Commands::Inspect { log } => {
            inspect(&log, &mut out)?;
        }
        Commands::Checksum { file } => {
            writeln!(out, "{}", checksum(&file)?)?;
        }
        Commands::Logs { root, run } => {
            let service = Dispatcher::new(DispatchConfig::new(root));
            let mut chunks = service.logs(run).await?;
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                for message in &chunk.messages {
                    serde_json::to_writer(&mut out, message)?;
                    writeln!(out)?;
                }
                if chunk.truncated {
                    warn!(%run, "run log ends in a torn record");
                }
            }
        }
        Commands::Upload { root, file } => {
            let service = Dispatcher::new(DispatchConfig::new(root));
            let (key, id) = upload(&service, &file).await?;
            writeln!(out, "{key} {id}")?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Write every message of the log at `path` to `out`, one JSON object per
/// line, warning about a torn tail or a preamble outside its window.
fn inspect(path: &Path, out: &mut impl Write) -> Result<LogContents> {
    let log = std::fs::read(path).wrap_err_with(|| format!("reading {}", path.display()))?;
    let contents = read_log(&log, SCHEMA_VERSION)?;
    if !contents.preamble.is_valid_at(Timestamp::now()) {
        warn!(
            not_before = contents.preamble.not_before.as_millis(),
            not_after = contents.preamble.not_after.as_millis(),
            "log preamble is outside its validity window"
        );
    }
    for message in &contents.read.messages {
        serde_json::to_writer(&mut *out, message)?;
        writeln!(out)?;
    }
    if let Some(offset) = contents.read.truncated_at {
        warn!(offset, "log ends in a torn or corrupt record");
    }
    Ok(contents)
}

/// Hex BLAKE3 digest of the file at `path`
fn checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path).wrap_err_with(|| format!("opening {}", path.display()))?;
    let mut hasher = Hasher::new();
    let mut buf = vec![0u8; UPLOAD_CHUNK];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex())
}

async fn upload(service: &impl EventService, path: &Path) -> Result<(String, RunId)> {
    let data = tokio::fs::read(path)
        .await
        .wrap_err_with(|| format!("reading {}", path.display()))?;
    let key = Hash::compute(&data).to_hex();
    let data = Bytes::from(data);
    let mut chunks = vec![UploadChunk::Metadata {
        checksum: key.clone(),
    }];
    let mut start = 0;
    while start < data.len() {
        let end = (start + UPLOAD_CHUNK).min(data.len());
        chunks.push(UploadChunk::Data(data.slice(start..end)));
        start = end;
    }
    let id = service.upload(Box::pin(stream::iter(chunks))).await?;
    Ok((key, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_log::{LogWriter, Message, Preamble, encode_frame};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_inspect_prints_json_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.log");
        let preamble = Preamble::new(SCHEMA_VERSION, Duration::from_secs(60));
        let mut writer = LogWriter::create_file(&path, preamble).unwrap();
        writer.append(&Message::heartbeat()).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let mut out = Vec::new();
        let contents = inspect(&path, &mut out).unwrap();
        assert!(!contents.read.is_truncated());
        let lines: Vec<serde_json::Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["event"], serde_json::json!("Heartbeat"));
    }

    #[test]
    fn test_inspect_tolerates_torn_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.log");
        let mut log = Vec::new();
        encode_frame(&Message::preamble(SCHEMA_VERSION, Duration::from_secs(60)), &mut log).unwrap();
        let whole = log.len() as u64;
        encode_frame(&Message::heartbeat(), &mut log).unwrap();
        log.pop();
        std::fs::write(&path, log).unwrap();

        let mut out = Vec::new();
        let contents = inspect(&path, &mut out).unwrap();
        assert_eq!(contents.read.truncated_at, Some(whole));
        assert_eq!(contents.read.messages.len(), 1);
    }

    #[test]
    fn test_checksum_matches_hash() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("artifact");
        let body = vec![7u8; UPLOAD_CHUNK * 2 + 5];
        std::fs::write(&path, &body).unwrap();
        assert_eq!(checksum(&path).unwrap(), Hash::compute(&body).to_hex());
    }

    #[tokio::test]
    async fn test_upload_stores_file_under_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("artifact");
        let body = vec![3u8; UPLOAD_CHUNK + 1];
        std::fs::write(&path, &body).unwrap();

        let config = DispatchConfig::new(dir.path().join("data"));
        let uploads = config.uploads_dir();
        let service = Dispatcher::new(config);
        let (key, _) = upload(&service, &path).await.unwrap();
        assert_eq!(std::fs::read(uploads.join(key)).unwrap(), body);
    }
}
