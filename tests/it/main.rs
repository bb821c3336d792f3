use tempfile::TempDir;
use thrifty::path::AbsDirPath;

pub mod pipeline;

/// A fresh, empty temporary directory plus its typed path, matching the
/// teacher's own integration test helper shape.
pub fn temporary_directory() -> (TempDir, AbsDirPath) {
    let dir = TempDir::new().expect("create temporary directory");
    let path = AbsDirPath::try_from(dir.path()).expect("read temp dir as abs dir");
    (dir, path)
}
