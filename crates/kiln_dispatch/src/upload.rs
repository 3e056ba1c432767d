//! Artifact uploads keyed by their BLAKE3 digest.

use crate::error::{DispatchError, DispatchResult};
use crate::service::{UploadChunk, UploadStream};
use futures::StreamExt;
use kiln_core::{Hash, Hasher};
use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Receive an upload into `dir`, returning its verified digest.
///
/// Bytes are streamed to `<checksum>.part` and renamed to `<checksum>`
/// only once their digest matches.
pub(crate) async fn receive(dir: &Path, mut chunks: UploadStream) -> DispatchResult<Hash> {
    let expected = match chunks.next().await {
        Some(UploadChunk::Metadata { checksum }) => Hash::from_hex(&checksum)?,
        _ => return Err(DispatchError::MissingMetadata),
    };
    // Canonical lowercase form names the file
    let key = expected.to_hex();
    fs::create_dir_all(dir).await?;
    let part = dir.join(format!("{key}.part"));
    let target = dir.join(&key);

    let result = write_part(&part, &mut chunks).await;
    let actual = match result {
        Ok(actual) => actual,
        Err(e) => {
            discard(&part).await;
            return Err(e);
        }
    };
    if actual != expected {
        discard(&part).await;
        return Err(DispatchError::ChecksumMismatch {
            expected: key,
            actual: actual.to_hex(),
        });
    }

    fs::rename(&part, &target).await?;
    info!(checksum = %key, "upload stored");
    Ok(expected)
}

async fn write_part(part: &Path, chunks: &mut UploadStream) -> DispatchResult<Hash> {
    let mut file = File::create(part).await?;
    let mut hasher = Hasher::new();
    let mut received = 0u64;
    while let Some(chunk) = chunks.next().await {
        match chunk {
            UploadChunk::Data(bytes) => {
                hasher.update(&bytes);
                file.write_all(&bytes).await?;
                received += bytes.len() as u64;
            }
            UploadChunk::Metadata { .. } => return Err(DispatchError::DuplicateMetadata),
        }
    }
    file.flush().await?;
    file.sync_all().await?;
    debug!(part = %part.display(), received, "upload received");
    Ok(hasher.finalize())
}

async fn discard(part: &Path) {
    if let Err(e) = fs::remove_file(part).await {
        warn!(part = %part.display(), error = %e, "failed to remove partial upload");
    }
}
