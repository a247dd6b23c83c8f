// Profile image storage on local disk
//
// Files are written under the configured directory with a random name and
// served back from `UPLOADS_PATH`.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::UploadConfig;

/// Public path prefix the upload directory is served under
pub const UPLOADS_PATH: &str = "/uploads";

/// Longest file extension kept from the uploaded name
const MAX_EXTENSION_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
    max_bytes: usize,
}

impl ImageStore {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            max_bytes: config.max_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Write an image and return its public URL path
    pub async fn save(&self, original_name: Option<&str>, bytes: &[u8]) -> io::Result<String> {
        fs::create_dir_all(&self.dir).await?;

        let file_name = match original_name.and_then(extension_of) {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
            None => Uuid::new_v4().to_string(),
        };
        fs::write(self.dir.join(&file_name), bytes).await?;

        info!("Stored image {} ({} bytes)", file_name, bytes.len());
        Ok(format!("{}/{}", UPLOADS_PATH, file_name))
    }

    /// Delete a stored image by its public URL path; failures are only logged
    pub async fn remove(&self, url: &str) {
        let Some(file_name) = url
            .strip_prefix(UPLOADS_PATH)
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            return;
        };
        if file_name.contains('/') || file_name.contains("..") {
            return;
        }
        if let Err(e) = fs::remove_file(self.dir.join(file_name)).await {
            warn!("Could not remove image {}: {}", file_name, e);
        }
    }
}

/// Lowercased extension of an uploaded name, if it is short and alphanumeric
fn extension_of(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?;
    if ext.is_empty() || ext.len() > MAX_EXTENSION_LEN || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
