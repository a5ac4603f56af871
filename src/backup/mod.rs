use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::RelayError;
use crate::panel::{Backup, PanelClient};

/// A downloaded backup archive sitting in the work directory.
///
/// Acts as a scope guard: call [`LocalBackup::discard`] once the archive has been
/// delivered. With `remove_on_drop` set, a guard that is dropped without being
/// discarded (an upload or notify failed) also deletes its file.
#[derive(Debug)]
pub struct LocalBackup {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub size_human: String,
    remove_on_drop: bool,
}

impl LocalBackup {
    /// Delete the archive after it has been delivered
    pub fn discard(mut self) -> Result<(), RelayError> {
        // The file is gone either way once we get here; don't retry in Drop.
        self.remove_on_drop = false;
        std::fs::remove_file(&self.path)?;
        tracing::debug!("Removed local archive {}", self.path.display());
        Ok(())
    }
}

impl Drop for LocalBackup {
    fn drop(&mut self) {
        if self.remove_on_drop {
            match std::fs::remove_file(&self.path) {
                Ok(()) => tracing::info!("Cleaned up undelivered archive {}", self.filename),
                Err(e) => tracing::warn!("Could not clean up {}: {}", self.path.display(), e),
            }
        }
    }
}

/// Local file name for a backup: `{uuid}.tar.gz`
pub fn local_filename(uuid: &str) -> String {
    format!("{}.tar.gz", uuid)
}

/// Download one backup into `work_dir`.
///
/// The body is streamed into a `.part` file which is synced and then renamed, so
/// the final name only ever refers to a complete archive.
pub async fn fetch(
    panel: &PanelClient,
    backup: &Backup,
    work_dir: &Path,
    remove_on_drop: bool,
) -> Result<LocalBackup, RelayError> {
    let direct_url = panel.download_url(backup).await?;

    let filename = local_filename(&backup.uuid);
    let path = work_dir.join(&filename);
    let part = work_dir.join(format!("{}.part", filename));

    fs::create_dir_all(work_dir).await?;

    let size = match stream_to_file(panel, &direct_url, &part).await {
        Ok(size) => size,
        Err(e) => {
            let _ = fs::remove_file(&part).await;
            return Err(e);
        }
    };
    if let Err(e) = fs::rename(&part, &path).await {
        let _ = fs::remove_file(&part).await;
        return Err(e.into());
    }

    tracing::info!("Downloaded {} ({})", filename, human_size(size));

    Ok(LocalBackup {
        filename,
        path,
        size,
        size_human: human_size(size),
        remove_on_drop,
    })
}

async fn stream_to_file(panel: &PanelClient, url: &str, dest: &Path) -> Result<u64, RelayError> {
    let response = panel.get_raw(url).await?;
    let mut file = fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

pub fn human_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1}GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
