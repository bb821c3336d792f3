//! Pluggable, streaming content hashing.
//!
//! Mirrors the accumulate-then-finalize shape of a hashing primitive: callers
//! get a fresh [`Accumulator`] from a [`Hasher`] factory, feed it bytes or
//! strings in whatever order they like, then consume it once to produce a
//! [`Digest`]. The accumulator is single-use (finalizing consumes it) so
//! there's no way to accidentally reuse a half-finalized hash state.
//!
//! The default algorithm is `blake3`, chosen for being fast, stable across
//! platforms, and already part of the dependency stack. Swapping it out only
//! requires a new [`Hasher`] impl; nothing downstream cares which algorithm
//! produced a [`Digest`].

use std::fmt;

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// A hex-encoded digest produced by a [`Hasher`].
///
/// Treated as an opaque, comparable string by every consumer; nothing outside
/// this module should need to know how many bytes it encodes.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display, Serialize, Deserialize)]
#[display("{_0}")]
pub struct Digest(String);

impl Digest {
    /// View the digest as its hex string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The empty digest, used as the "no parent" sentinel.
    pub fn empty() -> Self {
        Digest(String::new())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.0)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// A streaming hash accumulator.
///
/// `update` may be called any number of times in sequence; `finalize`
/// consumes the accumulator and can only be called once.
pub trait Accumulator: Send {
    /// Accumulate the given bytes into the hash state.
    fn update(&mut self, input: &[u8]);

    /// Finalize the accumulated input into a digest.
    fn finalize(self: Box<Self>) -> Digest;
}

/// Factory for fresh [`Accumulator`] instances.
///
/// Implementations must be stable across runs and platforms: the same
/// sequence of `update` calls must always produce the same [`Digest`].
pub trait Hasher: Send + Sync {
    /// Create a new, empty accumulator.
    fn accumulator(&self) -> Box<dyn Accumulator>;

    /// Convenience: hash a single buffer in one call.
    fn hash(&self, input: &[u8]) -> Digest {
        let mut acc = self.accumulator();
        acc.update(input);
        acc.finalize()
    }
}

/// The default [`Hasher`], backed by `blake3`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Blake3Hasher;

struct Blake3Accumulator(blake3::Hasher);

impl Accumulator for Blake3Accumulator {
    fn update(&mut self, input: &[u8]) {
        self.0.update(input);
    }

    fn finalize(self: Box<Self>) -> Digest {
        Digest(self.0.finalize().to_hex().to_string())
    }
}

impl Hasher for Blake3Hasher {
    fn accumulator(&self) -> Box<dyn Accumulator> {
        Box::new(Blake3Accumulator(blake3::Hasher::new()))
    }
}
