//! Write-then-rename helper shared by the payload file and detail store.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Path of the temporary sibling used while `path` is being written.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `bytes` to `path` so readers only ever see the complete file.
///
/// Parent directories are created as needed. The data goes to a `.tmp`
/// sibling first, is synced, and is then renamed over the target.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp = tmp_path(path);
    let result = (|| -> io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_creates_parents_and_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("packet.json");

        write_atomic(&target, b"{\"ok\":true}").unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "{\"ok\":true}");
        assert!(!tmp_path(&target).exists());
    }

    #[test]
    fn test_write_atomic_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("packet.json");

        write_atomic(&target, b"old").unwrap();
        write_atomic(&target, b"new").unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
    }

    #[test]
    fn test_tmp_path_is_sibling() {
        let p = Path::new("/data/run/a.json");
        assert_eq!(tmp_path(p), PathBuf::from("/data/run/a.json.tmp"));
    }
}
