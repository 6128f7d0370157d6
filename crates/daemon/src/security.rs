// Owner-only permissions for the daemon's state directory, socket and files.

use std::fs::{self, OpenOptions};
use std::path::Path;

use anyhow::{Context, Result};

const OWNER_ONLY_FILE_MODE: u32 = 0o600;
const OWNER_ONLY_DIR_MODE: u32 = 0o700;

pub fn ensure_owner_only_file(path: &Path) -> Result<()> {
    restrict_mode(path, OWNER_ONLY_FILE_MODE)
}

pub fn ensure_owner_only_dir(path: &Path) -> Result<()> {
    restrict_mode(path, OWNER_ONLY_DIR_MODE)
}

/// `create_dir_all` followed by tightening the leaf directory.
pub fn create_private_dir_all(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory `{}`", path.display()))?;
    ensure_owner_only_dir(path)
}

/// Create or truncate a file readable only by the owner.
pub fn open_private_truncate(path: &Path) -> std::io::Result<fs::File> {
    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(OWNER_ONLY_FILE_MODE);
    }
    options.open(path)
}

#[cfg(unix)]
fn restrict_mode(path: &Path, wanted: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if !path.exists() {
        return Ok(());
    }

    let metadata = fs::metadata(path)
        .with_context(|| format!("failed to read metadata for `{}`", path.display()))?;
    if metadata.permissions().mode() & 0o777 != wanted {
        fs::set_permissions(path, fs::Permissions::from_mode(wanted))
            .with_context(|| format!("failed to set owner-only mode on `{}`", path.display()))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn restrict_mode(_path: &Path, _wanted: u32) -> Result<()> {
    Ok(())
}
