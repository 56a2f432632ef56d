//! Shared types used across the Quasar library.

use core::fmt;
use std::error;

// =============================================================================
// DIGEST
// =============================================================================

/// Size of a Quasar digest in bytes.
pub const DIGEST_SIZE: usize = 32;

/// A finished hash value.
pub type Digest = [u8; DIGEST_SIZE];

// =============================================================================
// FLAGS
// =============================================================================

/// Feature flags controlling allocation and execution behaviour.
///
/// Flags are ordered so that a higher numeric value selects a faster but less
/// portable configuration. `Flags::default()` works everywhere.
///
/// The numeric values are part of the C ABI and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u32);

impl Flags {
    /// Back large buffers with huge pages (2 MiB) where the OS allows it.
    pub const LARGE_PAGES: Self = Self(1);
    /// Prefer hardware-accelerated AES. Acceleration is auto-detected; this
    /// flag is an advisory hint and never changes the computed digest.
    pub const HARD_AES: Self = Self(2);
    /// Hash against the expanded dataset instead of the cache.
    pub const FULL_MEM: Self = Self(4);
    /// Pre-decode each generated program once and reuse the decoded form for
    /// all iterations, instead of interpreting the raw program buffer.
    pub const PRECOMPILED: Self = Self(8);
    /// Request 1 GiB pages for the dataset (Linux hugetlb). Degrades to
    /// `LARGE_PAGES` behaviour and then to normal pages on failure.
    pub const ONE_GB_PAGES: Self = Self(16);
    /// Scheduling hint for AMD microarchitectures. Never changes the digest.
    pub const VENDOR_AMD: Self = Self(64);

    /// Empty flag set (maximum portability).
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build a flag set from its raw ABI bits. Unknown bits are kept as-is.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw ABI bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two flag sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Remove the bits of `other` from `self`.
    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl core::ops::BitOr for Flags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl core::ops::BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors reported by cache/dataset/VM construction and the engine facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A large memory region could not be allocated. Recoverable: retry with
    /// fewer flags (drop huge pages, drop full-memory mode).
    Allocation(&'static str),
    /// The requested flag combination is not supported on this target.
    UnsupportedFlags(&'static str),
    /// The configuration violates a structural invariant.
    Config(&'static str),
    /// A light-mode operation was attempted without a cache binding.
    MissingCache,
    /// A full-memory operation was attempted without a dataset binding.
    MissingDataset,
    /// The VM has a pipelined hash in flight; rebinding is only allowed
    /// between hash computations.
    VmBusy,
    /// A pipelined completion was requested but no hash was started.
    VmIdle,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation(what) => write!(f, "memory allocation failed: {what}"),
            Self::UnsupportedFlags(what) => write!(f, "unsupported flags: {what}"),
            Self::Config(what) => write!(f, "invalid configuration: {what}"),
            Self::MissingCache => write!(f, "light mode requires a cache binding"),
            Self::MissingDataset => write!(f, "full-memory mode requires a dataset binding"),
            Self::VmBusy => write!(f, "a pipelined hash is in flight on this VM"),
            Self::VmIdle => write!(f, "no pipelined hash has been started on this VM"),
        }
    }
}

impl error::Error for Error {}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
