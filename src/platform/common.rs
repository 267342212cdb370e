use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Atomically write content to a file
///
/// Writes to a temporary file in the same directory, syncs it to disk, then
/// renames it over the target path. The rename is atomic on Unix and NTFS.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    write_via_temp(path, content, None)
}

/// Atomically write a file that only the owner may read (0600 on Unix)
///
/// Permissions are applied to the temporary file before the rename, so the
/// target never exists with wider permissions.
pub fn atomic_write_private(path: &Path, content: &[u8]) -> Result<()> {
    write_via_temp(path, content, Some(0o600))
}

fn write_via_temp(path: &Path, content: &[u8], mode: Option<u32>) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory_exists(parent)?;
    }

    let temp_path = path.with_extension("tmp");

    {
        let mut file = File::create(&temp_path).with_context(|| {
            format!("Failed to create temporary file: {}", temp_path.display())
        })?;

        if let Some(mode) = mode {
            set_file_permissions(&temp_path, mode)?;
        }

        file.write_all(content)
            .context("Failed to write to temporary file")?;

        file.sync_all().context("Failed to sync file to disk")?;
    }

    std::fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}

/// Ensure a directory exists, creating it and all parents if needed
pub fn ensure_directory_exists(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() || path.exists() {
        return Ok(());
    }

    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))
}

/// Set file permissions to a specific mode (Unix only, no-op elsewhere)
pub fn set_file_permissions(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let metadata = std::fs::metadata(path)
            .with_context(|| format!("Failed to get metadata for: {}", path.display()))?;

        let mut permissions = metadata.permissions();
        permissions.set_mode(mode);

        std::fs::set_permissions(path, permissions)
            .with_context(|| format!("Failed to set permissions for: {}", path.display()))?;
    }

    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }

    Ok(())
}
