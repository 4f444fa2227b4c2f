//! Run-scoped temporary workspace
//!
//! Holds the four intermediate artifacts of a comparison run. The directory
//! is unique per run and removed by [`Workspace::cleanup`].

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Raw extraction of the reference clip
pub const REFERENCE_RAW: &str = "r.yuv";
/// Output of the preset encode
pub const ENCODED: &str = "e.temp";
/// Raw decode of the encoded output
pub const DISTORTED_RAW: &str = "d.yuv";
/// Scorer result document
pub const SCORE_FILE: &str = "vmaf.json";

/// Artifacts that could not be removed during cleanup
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupWarning {
    pub failures: Vec<(PathBuf, String)>,
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to delete some temporary files")?;
        for (path, reason) in &self.failures {
            write!(f, "\n  {}: {}", path.display(), reason)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create a fresh, uniquely named directory under `base_dir`
    pub fn create(base_dir: &Path) -> io::Result<Self> {
        let root = base_dir.join(format!("encoder-comparer-{}", Uuid::new_v4().simple()));
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn reference_raw(&self) -> PathBuf {
        self.root.join(REFERENCE_RAW)
    }

    pub fn encoded(&self) -> PathBuf {
        self.root.join(ENCODED)
    }

    pub fn distorted_raw(&self) -> PathBuf {
        self.root.join(DISTORTED_RAW)
    }

    pub fn score_file(&self) -> PathBuf {
        self.root.join(SCORE_FILE)
    }

    pub fn artifacts(&self) -> [PathBuf; 4] {
        [
            self.encoded(),
            self.reference_raw(),
            self.distorted_raw(),
            self.score_file(),
        ]
    }

    /// Drop outputs of the previous preset so stale files are never read back
    pub fn clear_preset_artifacts(&self) -> io::Result<()> {
        for path in [self.encoded(), self.distorted_raw(), self.score_file()] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Remove every artifact and the directory itself.
    ///
    /// Never fails; anything left behind is reported as a single warning.
    pub fn cleanup(&self) -> Option<CleanupWarning> {
        let mut failures = Vec::new();

        for path in self.artifacts() {
            if path.exists() {
                if let Err(e) = fs::remove_file(&path) {
                    failures.push((path, e.to_string()));
                }
            }
        }

        if self.root.exists() {
            if let Err(e) = fs::remove_dir_all(&self.root) {
                failures.push((self.root.clone(), e.to_string()));
            }
        }

        if failures.is_empty() {
            None
        } else {
            Some(CleanupWarning { failures })
        }
    }
}
