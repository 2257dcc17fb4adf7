//! Error types surfaced by handles, codecs and the native boundary
//!
//! Every failure reaches the caller synchronously. Nothing here retries.

use std::fmt;

use crate::native::{BodyId, WorldId};

/// Result alias used across the crate
pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Which native allocation ran out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    World,
    Body,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::World => "physics world",
            Resource::Body => "rigid body",
        }
    }
}

/// The object a stale handle pointed at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleTarget {
    World(WorldId),
    Body(BodyId),
}

/// Why a buffer could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Ran out of input while reading `field`
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },
    /// Control word selected a variant tag that does not exist
    UnknownVariantTag(u32),
    /// Control word has bits set that the variant does not define
    ReservedControlBits { control: i32 },
    /// Packed sparse position uses bits above the 12-bit coordinate field
    ReservedPositionBits(u16),
    /// A count field was negative
    NegativeCount { field: &'static str, value: i32 },
    /// Input continued after the last record
    TrailingBytes(usize),
    /// Fixed-size payload had the wrong length
    LengthMismatch { expected: usize, actual: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated {
                field,
                needed,
                remaining,
            } => write!(
                f,
                "truncated input reading {field}: needed {needed} bytes, {remaining} remaining"
            ),
            Self::UnknownVariantTag(tag) => write!(f, "unknown voxel update variant tag {tag}"),
            Self::ReservedControlBits { control } => {
                write!(f, "reserved bits set in control word {control:#010x}")
            }
            Self::ReservedPositionBits(packed) => {
                write!(f, "reserved bits set in packed sparse position {packed:#06x}")
            }
            Self::NegativeCount { field, value } => write!(f, "negative {field}: {value}"),
            Self::TrailingBytes(count) => write!(f, "{count} trailing bytes after last batch"),
            Self::LengthMismatch { expected, actual } => {
                write!(f, "payload length mismatch: expected {expected}, got {actual}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors returned by world/body handles and the native boundary
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// Native world or body construction failed
    ResourceExhausted { resource: Resource },
    /// The handle (or the world that owns it) has been deleted
    StaleReference { target: StaleTarget },
    /// A buffer crossing the boundary could not be decoded
    MalformedEncoding(DecodeError),
    /// An argument was rejected before reaching the solver
    InvalidArgument(String),
}

impl BridgeError {
    pub fn stale_world(world: WorldId) -> Self {
        Self::StaleReference {
            target: StaleTarget::World(world),
        }
    }

    pub fn stale_body(body: BodyId) -> Self {
        Self::StaleReference {
            target: StaleTarget::Body(body),
        }
    }

    /// True for errors caused by using a deleted handle
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleReference { .. })
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceExhausted { resource } => {
                write!(f, "native core could not allocate a {}", resource.as_str())
            }
            Self::StaleReference { target } => match target {
                StaleTarget::World(world) => {
                    write!(f, "physics world {world} has already been deleted")
                }
                StaleTarget::Body(body) => write!(f, "rigid body {body} has been deleted"),
            },
            Self::MalformedEncoding(err) => write!(f, "malformed encoding: {err}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::MalformedEncoding(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DecodeError> for BridgeError {
    fn from(err: DecodeError) -> Self {
        Self::MalformedEncoding(err)
    }
}
