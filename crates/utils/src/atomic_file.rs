//! Atomic file operations to prevent torn cache files

use std::io;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Write data to a file atomically by writing to a temporary file and renaming
///
/// Readers either observe the previous content or the new content, never a
/// partially written file.
pub async fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid file path '{}': no parent directory", path.display()),
        )
    })?;

    fs::create_dir_all(parent).await?;

    // Same directory as the target so the rename never crosses filesystems
    let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));

    let result = async {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .await?;
        file.write_all(content).await?;
        file.sync_all().await?;
        Ok::<(), io::Error>(())
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    Ok(())
}
