//! Collision detection and response.
//!
//! Broadphase: per-actor AABBs ([`aabb`]) plus a spatial hash of contacter
//! points ([`point_col`]). Narrowphase: triangle-local coordinates
//! ([`triangle`]), the shared surface response ([`primitive`]) and the
//! actor-vs-actor / self-collision drivers ([`dynamic`]).

pub mod aabb;
pub mod dynamic;
pub mod point_col;
pub mod primitive;
pub mod triangle;

pub use aabb::Aabb;
pub use point_col::{ActorPoints, PointColDetector};
pub use triangle::{CartesianToTriangleTransform, Triangle, TriangleCoord};
