//! Writing downloaded bytes to disk

use super::error::DownloadError;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

/// A download directory that exists and is a directory
#[derive(Debug, Clone)]
pub struct StorageDirectory {
    path: PathBuf,
}

impl StorageDirectory {
    /// Create the directory if needed
    pub async fn resolve(path: &Path) -> Result<Self, DownloadError> {
        if path.as_os_str().is_empty() {
            return Err(DownloadError::Storage("no download directory configured".into()));
        }

        fs::create_dir_all(path).await.map_err(|e| {
            DownloadError::Storage(format!("cannot create {}: {}", path.display(), e))
        })?;

        let metadata = fs::metadata(path).await.map_err(|e| {
            DownloadError::Storage(format!("cannot access {}: {}", path.display(), e))
        })?;
        if !metadata.is_dir() {
            return Err(DownloadError::Storage(format!(
                "{} is not a directory",
                path.display()
            )));
        }
        if metadata.permissions().readonly() {
            return Err(DownloadError::Storage(format!(
                "{} is read-only",
                path.display()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Final location of `filename` inside this directory
    pub fn file_path(&self, filename: &str) -> Result<PathBuf, DownloadError> {
        let name = sanitize_filename(filename);
        if name.is_empty() || name == "." || name == ".." {
            return Err(DownloadError::Storage(format!(
                "invalid file name {:?}",
                filename
            )));
        }
        Ok(self.path.join(name))
    }
}

/// Replace characters that cannot appear in a single path component
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Buffered writer onto `<name>.part`, renamed onto `<name>` on commit
pub struct DiskSink {
    writer: BufWriter<File>,
    part_path: PathBuf,
    final_path: PathBuf,
    written: u64,
}

impl DiskSink {
    /// Create (or truncate) the partial file next to `final_path`
    pub async fn create(final_path: PathBuf) -> Result<Self, DownloadError> {
        let mut part_name = final_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        part_name.push(".part");
        let part_path = final_path.with_file_name(part_name);

        let file = File::create(&part_path).await?;
        debug!("Writing to {}", part_path.display());

        Ok(Self {
            writer: BufWriter::new(file),
            part_path,
            final_path,
            written: 0,
        })
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), DownloadError> {
        self.writer.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    #[cfg(test)]
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    /// Flush, sync and move the file into place
    pub async fn commit(mut self) -> Result<PathBuf, DownloadError> {
        self.writer.flush().await?;
        self.writer.get_ref().sync_all().await?;
        drop(self.writer);

        fs::rename(&self.part_path, &self.final_path).await?;
        debug!("Wrote {} bytes to {}", self.written, self.final_path.display());
        Ok(self.final_path)
    }

    /// Close the file, removing it unless `keep` is set
    pub async fn abandon(mut self, keep: bool) {
        if keep {
            if let Err(e) = self.writer.flush().await {
                warn!("Failed to flush {}: {}", self.part_path.display(), e);
            }
            drop(self.writer);
            return;
        }

        drop(self.writer);
        if let Err(e) = fs::remove_file(&self.part_path).await {
            warn!("Failed to remove {}: {}", self.part_path.display(), e);
        }
    }
}
