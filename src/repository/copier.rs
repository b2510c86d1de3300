//! Recursive directory copy with exclusion filters.
//!
//! Used to materialize working-copy snapshots for external build consumers;
//! the version-control metadata directory is always excluded by the caller.

use std::fs;
use std::io;
use std::path::Path;

use crate::cancellation::CancellationToken;

/// External collaborator that copies a source tree to a destination,
/// skipping the given top-level relative paths.
pub trait DirectoryCopier: Send + Sync {
    fn copy(
        &self,
        src: &Path,
        dest: &Path,
        exclude: &[&str],
        ct: &CancellationToken,
    ) -> io::Result<()>;
}

/// Straightforward filesystem walker. Checks the token between entries so a
/// large snapshot can be abandoned promptly.
#[derive(Debug, Default)]
pub struct RecursiveCopier;

impl RecursiveCopier {
    fn copy_dir(&self, src: &Path, dest: &Path, ct: &CancellationToken) -> io::Result<()> {
        fs::create_dir_all(dest)?;
        for entry in fs::read_dir(src)? {
            if ct.is_cancelled() {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "copy cancelled"));
            }
            let entry = entry?;
            let target = dest.join(entry.file_name());
            if entry.file_type()?.is_dir() {
                self.copy_dir(&entry.path(), &target, ct)?;
            } else {
                fs::copy(entry.path(), target)?;
            }
        }
        Ok(())
    }
}

impl DirectoryCopier for RecursiveCopier {
    fn copy(
        &self,
        src: &Path,
        dest: &Path,
        exclude: &[&str],
        ct: &CancellationToken,
    ) -> io::Result<()> {
        fs::create_dir_all(dest)?;
        for entry in fs::read_dir(src)? {
            if ct.is_cancelled() {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "copy cancelled"));
            }
            let entry = entry?;
            let name = entry.file_name();
            if exclude.iter().any(|ex| name.as_os_str() == *ex) {
                continue;
            }
            let target = dest.join(&name);
            if entry.file_type()?.is_dir() {
                self.copy_dir(&entry.path(), &target, ct)?;
            } else {
                fs::copy(entry.path(), target)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_tree_and_skips_exclusions() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let ct = CancellationToken::new();

        fs::create_dir(src.path().join(".git")).unwrap();
        fs::write(src.path().join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        fs::create_dir(src.path().join("maps")).unwrap();
        fs::write(src.path().join("maps/station.dmm"), "map").unwrap();
        fs::write(src.path().join("code.dm"), "code").unwrap();

        RecursiveCopier
            .copy(src.path(), &dest.path().join("snap"), &[".git"], &ct)
            .unwrap();

        let snap = dest.path().join("snap");
        assert!(snap.join("code.dm").is_file());
        assert!(snap.join("maps/station.dmm").is_file());
        assert!(!snap.join(".git").exists());
    }

    #[test]
    fn cancelled_copy_stops_early() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        fs::write(src.path().join("a"), "a").unwrap();
        let ct = CancellationToken::new();
        ct.cancel();

        let err = RecursiveCopier
            .copy(src.path(), &dest.path().join("snap"), &[], &ct)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }
}
