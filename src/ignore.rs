//! Docker-style ignore file matching.
//!
//! Patterns follow the same grammar as `.gitignore`: literal segments, `*`
//! glob, `/` as path separator, a leading `/` anchors to the context root,
//! `**` crosses directories, and a `!` prefix re-includes a path that an
//! earlier pattern excluded. We lean on the `ignore` crate's `gitignore`
//! module for this rather than hand-rolling glob matching, since `.dockerignore`
//! and `.gitignore` share the same pattern language.

use color_eyre::{Result, eyre::eyre};
use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::path::{AbsDirPath, AbsFilePath, RelativeTo};

/// The conventional name of the ignore file, read from the context root.
pub const IGNORE_FILE_NAME: &str = ".dockerignore";

/// Classifies context files as ignored or not, relative to a context root.
pub struct IgnoreMatcher {
    inner: Gitignore,
}

impl IgnoreMatcher {
    /// Load the ignore file from `context_root`, if one exists.
    ///
    /// Absence of the ignore file yields an empty ignore set: nothing is
    /// ignored.
    pub fn load(context_root: &AbsDirPath) -> Result<Self> {
        let ignore_path = context_root.as_std_path().join(IGNORE_FILE_NAME);
        let inner = if ignore_path.is_file() {
            let (gitignore, err) = Gitignore::new(&ignore_path);
            if let Some(err) = err {
                return Err(eyre!("parse {}: {err}", ignore_path.display()));
            }
            gitignore
        } else {
            GitignoreBuilder::new(context_root.as_std_path())
                .build()
                .map_err(|err| eyre!("build empty ignore matcher: {err}"))?
        };
        Ok(Self { inner })
    }

    /// Build a matcher directly from pattern lines, without touching disk.
    /// Useful for tests and for seeding a matcher from an already-read file.
    pub fn from_lines(context_root: &AbsDirPath, lines: impl IntoIterator<Item = impl AsRef<str>>) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(context_root.as_std_path());
        for line in lines {
            builder
                .add_line(None, line.as_ref())
                .map_err(|err| eyre!("parse ignore pattern {:?}: {err}", line.as_ref()))?;
        }
        let inner = builder.build().map_err(|err| eyre!("build ignore matcher: {err}"))?;
        Ok(Self { inner })
    }

    /// Whether `path`, expressed relative to `context_root`, is ignored.
    pub fn is_ignored(&self, path: &AbsFilePath, context_root: &AbsDirPath) -> Result<bool> {
        let relative = path.relative_to(context_root)?;
        Ok(self.inner.matched(relative.as_std_path(), false).is_ignore())
    }

    /// Whether the directory `path`, expressed relative to `context_root`,
    /// is ignored. Distinct from [`IgnoreMatcher::is_ignored`] because some
    /// patterns (e.g. `foo/`) only match directories.
    pub fn is_ignored_dir(&self, path: &AbsDirPath, context_root: &AbsDirPath) -> Result<bool> {
        if path.as_std_path() == context_root.as_std_path() {
            return Ok(false);
        }
        let relative = path.relative_to(context_root)?;
        Ok(self.inner.matched(relative.as_std_path(), true).is_ignore())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> AbsDirPath {
        AbsDirPath::try_from("/srv/context").unwrap()
    }

    fn file(rel: &str) -> AbsFilePath {
        AbsFilePath::try_from(format!("/srv/context/{rel}")).unwrap()
    }

    #[test]
    fn no_file_ignores_nothing() {
        let matcher = IgnoreMatcher::from_lines(&root(), Vec::<&str>::new()).unwrap();
        assert!(!matcher.is_ignored(&file("src/main.rs"), &root()).unwrap());
    }

    #[test]
    fn glob_ignores_matching_files() {
        let matcher = IgnoreMatcher::from_lines(&root(), ["*.log"]).unwrap();
        assert!(matcher.is_ignored(&file("debug.log"), &root()).unwrap());
        assert!(!matcher.is_ignored(&file("main.rs"), &root()).unwrap());
    }

    #[test]
    fn anchored_pattern_only_matches_root() {
        let matcher = IgnoreMatcher::from_lines(&root(), ["/target"]).unwrap();
        assert!(matcher.is_ignored(&file("target/debug"), &root()).unwrap());
        assert!(!matcher.is_ignored(&file("vendor/target/debug"), &root()).unwrap());
    }

    #[test]
    fn negation_reincludes_path() {
        let matcher = IgnoreMatcher::from_lines(&root(), ["*.log", "!important.log"]).unwrap();
        assert!(matcher.is_ignored(&file("debug.log"), &root()).unwrap());
        assert!(!matcher.is_ignored(&file("important.log"), &root()).unwrap());
    }

    #[test]
    fn double_star_crosses_directories() {
        let matcher = IgnoreMatcher::from_lines(&root(), ["**/node_modules"]).unwrap();
        assert!(matcher.is_ignored(&file("node_modules/a"), &root()).unwrap());
        assert!(matcher.is_ignored(&file("pkg/sub/node_modules/a"), &root()).unwrap());
    }
}
