//! Error types for spawning and registry lookups.

use std::fmt;

/// Fatal spawn failures. Anything less than these is recorded in the
/// [`SpawnReport`](crate::spawn::SpawnReport) and the actor is still produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnError {
    /// The definition contains no usable nodes.
    NoValidNodes,
    /// A duplicate actor id was requested.
    DuplicateActor(u32),
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::NoValidNodes => write!(f, "actor definition has no valid nodes"),
            SpawnError::DuplicateActor(id) => write!(f, "actor id {} already exists", id),
        }
    }
}

impl std::error::Error for SpawnError {}

/// A ground-model name did not resolve. Callers fall back to the registry's
/// default entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroundLookupMiss {
    pub name: String,
}

impl fmt::Display for GroundLookupMiss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ground model \"{}\" not found", self.name)
    }
}

impl std::error::Error for GroundLookupMiss {}

/// An API call referenced an actor that is not alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorNotFound(pub u32);

impl fmt::Display for ActorNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor {} not found", self.0)
    }
}

impl std::error::Error for ActorNotFound {}
