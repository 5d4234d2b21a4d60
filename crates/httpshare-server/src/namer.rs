use std::fmt;

use rand::{rngs::OsRng, RngCore};

/// Number of distinct endpoint ids (24 bits).
pub const ID_SPACE: u32 = 1 << 24;

#[derive(Debug, thiserror::Error)]
#[error("random source unavailable: {0}")]
pub struct NamerError(#[from] rand::Error);

/// Opaque, unguessable endpoint identifier rendered as 6 lowercase hex chars.
///
/// Ids are drawn uniformly from a 24-bit space. That is enough to defeat
/// casual enumeration of a short-lived share, not enough to rule out birthday
/// collisions across many endpoints; callers that register several endpoints
/// must check for duplicates themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(u32);

impl EndpointId {
    /// Draw a fresh id from the OS random source.
    pub fn generate() -> Result<Self, NamerError> {
        Self::generate_with(&mut OsRng)
    }

    pub fn generate_with<R: RngCore + ?Sized>(rng: &mut R) -> Result<Self, NamerError> {
        let mut bytes = [0u8; 4];
        rng.try_fill_bytes(&mut bytes[1..])?;
        Ok(Self(u32::from_be_bytes(bytes)))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// URL path for this id, e.g. `/0a1b2c`.
    pub fn path(self) -> String {
        format!("/{self}")
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}
