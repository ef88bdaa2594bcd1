//! Result persistence: line-delimited JSON records and the count summary document.

use std::path::{Path, PathBuf};

use futures::{Stream, TryStreamExt};
use serde::Serialize;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{info, warn};

use crate::powertrack::PowerTrackError;
use crate::powertrack::types::CountBucket;

pub const DATA_FILE: &str = "data.json";
pub const COUNTS_FILE: &str = "counts.json";
pub const DEFAULT_LOG_EVERY: u64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode record: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Source(#[from] PowerTrackError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> OutputError + '_ {
    move |source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    }
}

async fn ensure_parent(path: &Path) -> Result<(), OutputError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await.map_err(io_error(parent))?;
    }
    Ok(())
}

/// `<term file name>_<from>_to_<to>` next to the term file, with `-` stripped from the dates.
pub fn default_output_dir(term_file: &Path, from_date: &str, to_date: &str) -> PathBuf {
    let name = term_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "terms".to_string());
    let dir = format!(
        "{name}_{}_to_{}",
        from_date.replace('-', ""),
        to_date.replace('-', "")
    );
    match term_file.parent() {
        Some(parent) => parent.join(dir),
        None => PathBuf::from(dir),
    }
}

/// Write records as they arrive, one compact JSON document per line. Returns the number written.
///
/// Progress is logged every `log_every` records. An error from the source stream stops the write
/// and is returned as-is; records already written stay on disk.
pub async fn write_records<T, S>(
    records: S,
    path: &Path,
    log_every: u64,
) -> Result<u64, OutputError>
where
    T: Serialize,
    S: Stream<Item = Result<T, PowerTrackError>>,
{
    ensure_parent(path).await?;
    let file = File::create(path).await.map_err(io_error(path))?;
    let mut out = BufWriter::new(file);
    let mut records = std::pin::pin!(records);
    let mut written: u64 = 0;

    let drained: Result<(), OutputError> = async {
        while let Some(record) = records.try_next().await? {
            let mut line = serde_json::to_vec(&record)?;
            line.push(b'\n');
            out.write_all(&line).await.map_err(io_error(path))?;

            written += 1;
            if log_every > 0 && written % log_every == 0 {
                info!(written, "writing records");
            }
        }
        Ok(())
    }
    .await;

    // Buffered records must reach disk even when the source fails partway.
    out.flush().await.map_err(io_error(path))?;
    if let Err(e) = drained {
        warn!(written, path = %path.display(), error = %e, "record stream stopped early");
        return Err(e);
    }

    info!(written, path = %path.display(), "finished writing records");
    Ok(written)
}

/// Write the count summary as a single pretty-printed JSON array.
pub async fn write_counts(path: &Path, buckets: &[CountBucket]) -> Result<(), OutputError> {
    ensure_parent(path).await?;
    let mut json = serde_json::to_vec_pretty(buckets)?;
    json.push(b'\n');
    fs::write(path, json).await.map_err(io_error(path))?;
    info!(buckets = buckets.len(), path = %path.display(), "counts written");
    Ok(())
}
