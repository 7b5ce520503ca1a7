//! Battery save sync.
//!
//! Save RAM lives in `<save_dir>/<content stem>.sav`. On load a `.sav` is preferred, then the
//! libretro-conventional `.srm`; saves are always written back as `.sav`.

use crate::abi::MemoryRegion;
use crate::error::HostError;
use crate::host::CoreHost;
use anyhow::{Context, Result};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

pub const SAVE_EXTENSION: &str = "sav";
pub const LEGACY_SAVE_EXTENSION: &str = "srm";

pub fn save_path(save_dir: &Path, content: &Path, extension: &str) -> PathBuf {
    let mut name = content
        .file_stem()
        .map(OsStr::to_os_string)
        .unwrap_or_else(|| OsString::from("content"));
    name.push(".");
    name.push(extension);
    save_dir.join(name)
}

/// The save file to load for `content`, if one exists.
pub fn existing_save(save_dir: &Path, content: &Path) -> Option<PathBuf> {
    [SAVE_EXTENSION, LEGACY_SAVE_EXTENSION]
        .into_iter()
        .map(|ext| save_path(save_dir, content, ext))
        .find(|path| path.is_file())
}

fn lacks_save_ram(err: &HostError) -> bool {
    matches!(
        err,
        HostError::Unsupported(_) | HostError::NoMemoryRegion(MemoryRegion::SaveRam)
    )
}

/// Copy an existing save file into the core's save RAM. Returns the file used.
pub fn load_save_ram(host: &mut CoreHost, save_dir: &Path, content: &Path) -> Result<Option<PathBuf>> {
    let Some(path) = existing_save(save_dir, content) else {
        return Ok(None);
    };
    let region_size = match host.memory(MemoryRegion::SaveRam) {
        Ok(current) => current.len(),
        Err(err) if lacks_save_ram(&err) => {
            log::debug!("core has no save RAM; ignoring {}", path.display());
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };

    let data = std::fs::read(&path)
        .with_context(|| format!("failed to read save file {}", path.display()))?;
    if data.len() > region_size {
        log::warn!(
            "save file {} is {} bytes, larger than the core's {region_size}-byte save RAM; skipped",
            path.display(),
            data.len()
        );
        return Ok(None);
    }
    host.write_memory(MemoryRegion::SaveRam, &data)?;
    log::info!("save RAM loaded from {}", path.display());
    Ok(Some(path))
}

/// Write the core's save RAM to `<stem>.sav`. Returns the file written.
pub fn store_save_ram(host: &CoreHost, save_dir: &Path, content: &Path) -> Result<Option<PathBuf>> {
    let data = match host.memory(MemoryRegion::SaveRam) {
        Ok(data) => data,
        Err(err) if lacks_save_ram(&err) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    std::fs::create_dir_all(save_dir)
        .with_context(|| format!("failed to create save directory {}", save_dir.display()))?;
    let path = save_path(save_dir, content, SAVE_EXTENSION);
    std::fs::write(&path, &data)
        .with_context(|| format!("failed to write save file {}", path.display()))?;
    log::info!("save RAM written to {}", path.display());
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sav_is_preferred_over_srm() {
        let dir = tempfile::tempdir().unwrap();
        let content = Path::new("/roms/Super Game (USA).sfc");
        assert_eq!(existing_save(dir.path(), content), None);

        let srm = dir.path().join("Super Game (USA).srm");
        std::fs::write(&srm, [1]).unwrap();
        assert_eq!(existing_save(dir.path(), content), Some(srm));

        let sav = dir.path().join("Super Game (USA).sav");
        std::fs::write(&sav, [2]).unwrap();
        assert_eq!(existing_save(dir.path(), content), Some(sav));
    }

    #[test]
    fn save_names_keep_the_content_stem() {
        let dir = Path::new("/saves");
        assert_eq!(
            save_path(dir, Path::new("/roms/game.v1.rom"), SAVE_EXTENSION),
            Path::new("/saves/game.v1.sav")
        );

        #[cfg(unix)]
        {
            use std::os::unix::ffi::OsStrExt;
            let content = Path::new(OsStr::from_bytes(b"/roms/caf\xe9.sfc"));
            let save = save_path(dir, content, LEGACY_SAVE_EXTENSION);
            assert_eq!(save.as_os_str().as_bytes(), b"/saves/caf\xe9.srm");
        }
    }
}
