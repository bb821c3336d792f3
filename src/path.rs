//! Path types tailored to `thrifty`.
//!
//! ## Rationale
//!
//! Build configurations reference paths in several different ways: contexts
//! and Dockerfiles are always relative to the configuration's directory, but
//! once loaded we need to resolve them to absolute paths to actually read
//! files from disk. Mixing up a relative path and an absolute path (or a file
//! path and a directory path) is an easy way to silently build the wrong
//! image, so we encode the distinction in the type system instead of trusting
//! every call site to get it right.
//!
//! This module does not normalize paths: `some/path` and `some/path/` are not
//! considered equal, nor are `a/../b` and `b`. Callers that need normalized
//! paths should normalize before constructing a [`TypedPath`].

use std::{
    any::type_name,
    borrow::Cow,
    ffi::{OsStr, OsString},
    marker::PhantomData,
    path::{Path, PathBuf},
    str::FromStr,
};

use color_eyre::{
    Report, Result,
    eyre::{Context, bail},
};
use derive_more::Display;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tap::Pipe;

use crate::fs;

pub type RelFilePath = TypedPath<Rel, File>;
pub type RelDirPath = TypedPath<Rel, Dir>;
pub type AbsFilePath = TypedPath<Abs, File>;
pub type AbsDirPath = TypedPath<Abs, Dir>;
pub type AbsSomePath = TypedPath<Abs, SomeType>;
pub type SomeFilePath = TypedPath<SomeBase, File>;

/// Indicates an unknown value for this path base.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct SomeBase;

/// Indicates an unknown value for this type of path.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct SomeType;

/// An absolute path always begins from the root of the filesystem.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Abs;

/// A relative path describes a path starting from an undefined point.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Rel;

/// A directory contains other file system entities.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Dir;

/// A file contains data.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct File;

/// A location on the file system according to the type modifiers.
///
/// This type is about _intent_; it does not validate that the resource on
/// disk actually exists or is of the claimed type (see [`TypedPath::exists`]
/// if you need a best-effort check, keeping in mind TOCTOU caveats).
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display)]
#[display("{}", self.inner.display())]
pub struct TypedPath<Base, Type> {
    base: PhantomData<Base>,
    ty: PhantomData<Type>,
    inner: PathBuf,
}

impl<B, T> TypedPath<B, T> {
    /// View the path as a standard path.
    pub fn as_std_path(&self) -> &Path {
        &self.inner
    }

    /// View the path as a lossily-converted string.
    pub fn as_str_lossy(&self) -> Cow<'_, str> {
        self.inner.to_string_lossy()
    }

    /// Get the parent of the provided path, if one exists.
    pub fn parent(&self) -> Option<TypedPath<B, Dir>> {
        self.inner
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(ToOwned::to_owned)
            .map(TypedPath::new_unchecked)
    }

    /// Returns the final component of the path, if there is one.
    pub fn file_name(&self) -> Option<&OsStr> {
        self.inner.file_name()
    }

    /// Returns the final component of the path, if there is one, as a
    /// lossily-converted string.
    pub fn file_name_str_lossy(&self) -> Option<Cow<'_, str>> {
        self.inner.file_name().map(|s| s.to_string_lossy())
    }

    fn new_unchecked(inner: impl Into<PathBuf>) -> Self {
        Self {
            base: PhantomData,
            ty: PhantomData,
            inner: inner.into(),
        }
    }
}

macro_rules! impl_try_from {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl<B: Validator, T: Validator> TryFrom<$ty> for TypedPath<B, T> {
                type Error = Report;

                fn try_from(value: $ty) -> Result<Self, Self::Error> {
                    let value = PathBuf::from(value);
                    B::validate(&value)
                        .with_context(|| format!("validate base {:?}", B::type_name()))?;
                    T::validate(&value)
                        .with_context(|| format!("validate type {:?}", T::type_name()))?;
                    Ok(Self::new_unchecked(value))
                }
            }
        )+
    };
}

impl_try_from!(PathBuf, &PathBuf, &Path, String, &String, &str, OsString, &OsString, &OsStr);

impl<B: Validator, T: Validator> FromStr for TypedPath<B, T> {
    type Err = Report;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::try_from(s)
    }
}

impl<B, T> AsRef<TypedPath<B, T>> for TypedPath<B, T> {
    fn as_ref(&self) -> &TypedPath<B, T> {
        self
    }
}

impl<B, T> From<TypedPath<B, T>> for PathBuf {
    fn from(value: TypedPath<B, T>) -> Self {
        value.inner
    }
}

impl<B, T> From<&TypedPath<B, T>> for PathBuf {
    fn from(value: &TypedPath<B, T>) -> Self {
        value.inner.clone()
    }
}

impl TypedPath<Abs, Dir> {
    /// Get the current working directory for the process.
    pub fn current() -> Result<TypedPath<Abs, Dir>> {
        let cwd = std::env::current_dir().context("get current dir")?;
        Self::try_from(cwd).context("convert")
    }

    /// Join a relative directory, producing an absolute directory.
    pub fn join_dir(&self, other: &TypedPath<Rel, Dir>) -> TypedPath<Abs, Dir> {
        self.inner.join(&other.inner).pipe(TypedPath::new_unchecked)
    }

    /// Join a relative file, producing an absolute file.
    pub fn join_file(&self, other: &TypedPath<Rel, File>) -> TypedPath<Abs, File> {
        self.inner.join(&other.inner).pipe(TypedPath::new_unchecked)
    }

    /// Join a bare path segment as a directory.
    pub fn try_join_dir(&self, other: impl AsRef<str>) -> Result<TypedPath<Abs, Dir>> {
        self.inner.join(other.as_ref()).pipe(TypedPath::try_from)
    }

    /// Join a bare path segment as a file.
    pub fn try_join_file(&self, other: impl AsRef<str>) -> Result<TypedPath<Abs, File>> {
        self.inner.join(other.as_ref()).pipe(TypedPath::try_from)
    }
}

impl<'de, B: Validator, T: Validator> Deserialize<'de> for TypedPath<B, T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let p = PathBuf::deserialize(deserializer)?;
        Self::try_from(p).map_err(serde::de::Error::custom)
    }
}

impl<B, T> Serialize for TypedPath<B, T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.inner.serialize(serializer)
    }
}

impl<B, T> std::fmt::Debug for TypedPath<B, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TypedPath::<{}, {}>({:?})",
            type_name::<B>(),
            type_name::<T>(),
            self.inner
        )
    }
}

impl<B> TypedPath<B, File> {
    /// Whether the path exists on disk and is a regular file.
    pub async fn exists(&self) -> bool {
        fs::is_file(self.as_std_path()).await
    }
}

impl<B> TypedPath<B, Dir> {
    /// Whether the path exists on disk and is a directory.
    pub async fn exists(&self) -> bool {
        fs::is_dir(self.as_std_path()).await
    }
}

/// Functionality for making a path relative to a base path.
pub trait RelativeTo<Other> {
    type Output;

    /// Make `self` relative to `other` if possible.
    fn relative_to(&self, other: Other) -> Self::Output;
}

impl<T> RelativeTo<&TypedPath<Abs, Dir>> for TypedPath<Abs, T> {
    type Output = Result<TypedPath<Rel, T>>;

    fn relative_to(&self, other: &TypedPath<Abs, Dir>) -> Self::Output {
        self.inner
            .strip_prefix(&other.inner)
            .with_context(|| format!("make {:?} relative to {:?}", self.inner, other.inner))
            .and_then(TypedPath::try_from)
    }
}

/// Fallible methods on [`TypedPath`] variants are powered by instances of the
/// `Validator` trait on the `Base` and `Type` generics.
pub trait Validator {
    /// Validate that the inner path matches the constraints of the
    /// validator, or return an error.
    fn validate(path: &Path) -> Result<()>;

    /// The name of the validator, for use in error messages.
    fn type_name() -> &'static str {
        core::any::type_name::<Self>()
    }
}

impl Validator for Rel {
    fn validate(path: &Path) -> Result<()> {
        if !path.is_relative() {
            bail!("path is not relative: {path:?}");
        }
        Ok(())
    }
}

impl Validator for Abs {
    fn validate(path: &Path) -> Result<()> {
        if !path.is_absolute() {
            bail!("path is not absolute: {path:?}");
        }
        Ok(())
    }
}

impl Validator for Dir {
    fn validate(_: &Path) -> Result<()> {
        Ok(())
    }
}

impl Validator for File {
    fn validate(_: &Path) -> Result<()> {
        Ok(())
    }
}

impl Validator for SomeType {
    fn validate(_: &Path) -> Result<()> {
        Ok(())
    }
}

impl Validator for SomeBase {
    fn validate(_: &Path) -> Result<()> {
        Ok(())
    }
}
