//! Point-collision detector: a sparse spatial hash over every contacter
//! node of the active actors, queried per collision triangle.
//!
//! Rebuilt once per sub-step from cached node positions. With the
//! `parallel` feature the per-actor gather runs on rayon; the merge is
//! always sequential in actor-id order so cell contents stay deterministic.

use bevy_ecs::prelude::*;
use glam::Vec3;
use std::collections::HashMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::collision::aabb::Aabb;
use crate::rig::node::NodeIndex;

/// One contacter point in the pool.
#[derive(Debug, Clone, Copy)]
pub struct ColPoint {
    pub actor: u32,
    pub node: NodeIndex,
    pub pos: Vec3,
}

/// Per-actor input to the rebuild: which nodes to offer as points.
pub struct ActorPoints {
    pub actor: u32,
    pub points: Vec<(NodeIndex, Vec3)>,
}

/// Sparse spatial hash of contacter points.
#[derive(Resource, Debug)]
pub struct PointColDetector {
    cell_size: f32,
    cells: HashMap<(i32, i32, i32), Vec<u32>>,
    points: Vec<ColPoint>,
}

impl Default for PointColDetector {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl PointColDetector {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size: cell_size.max(0.01),
            cells: HashMap::new(),
            points: Vec::new(),
        }
    }

    /// Cell size is derived from collision geometry at spawn time; changing
    /// it empties the structure.
    pub fn set_cell_size(&mut self, cell_size: f32) {
        self.cell_size = cell_size.max(0.01);
        self.cells.clear();
        self.points.clear();
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    #[inline]
    fn cell_of(&self, p: Vec3) -> (i32, i32, i32) {
        (
            (p.x / self.cell_size).floor() as i32,
            (p.y / self.cell_size).floor() as i32,
            (p.z / self.cell_size).floor() as i32,
        )
    }

    /// Rebuild the pool. `sources` must already be sorted by actor id; the
    /// per-actor gather may be parallel but insertion order is sequential.
    pub fn rebuild(&mut self, sources: Vec<ActorPoints>) {
        self.cells.clear();
        self.points.clear();

        #[cfg(feature = "parallel")]
        let gathered: Vec<ActorPoints> = {
            // The gather is already done by the caller; rayon is used to
            // pre-sort each actor's points by cell for better locality.
            let cs = self.cell_size;
            sources
                .into_par_iter()
                .map(move |mut s| {
                    s.points.sort_by_key(|&(_, p)| {
                        (
                            (p.x / cs).floor() as i32,
                            (p.y / cs).floor() as i32,
                            (p.z / cs).floor() as i32,
                        )
                    });
                    s
                })
                .collect()
        };
        #[cfg(not(feature = "parallel"))]
        let gathered = sources;

        for source in gathered {
            for (node, pos) in source.points {
                let idx = self.points.len() as u32;
                self.points.push(ColPoint {
                    actor: source.actor,
                    node,
                    pos,
                });
                self.cells.entry(self.cell_of(pos)).or_default().push(idx);
            }
        }
    }

    pub fn point(&self, idx: u32) -> &ColPoint {
        &self.points[idx as usize]
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Collect every point whose position lies inside `aabb` (a triangle's
    /// box inflated by the collision range). Results are in insertion order,
    /// i.e. actor-id then node-index ascending.
    pub fn query(&self, aabb: &Aabb, hits: &mut Vec<u32>) {
        hits.clear();
        if aabb.is_empty() {
            return;
        }
        let lo = self.cell_of(aabb.min);
        let hi = self.cell_of(aabb.max);
        for cx in lo.0..=hi.0 {
            for cy in lo.1..=hi.1 {
                for cz in lo.2..=hi.2 {
                    if let Some(indices) = self.cells.get(&(cx, cy, cz)) {
                        for &idx in indices {
                            if aabb.contains_point(self.points[idx as usize].pos) {
                                hits.push(idx);
                            }
                        }
                    }
                }
            }
        }
        hits.sort_unstable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_detector() -> PointColDetector {
        let mut det = PointColDetector::new(1.0);
        det.rebuild(vec![
            ActorPoints {
                actor: 0,
                points: vec![(0, Vec3::new(0.1, 0.1, 0.1)), (1, Vec3::new(5.0, 0.0, 0.0))],
            },
            ActorPoints {
                actor: 1,
                points: vec![(0, Vec3::new(0.4, 0.2, 0.0))],
            },
        ]);
        det
    }

    #[test]
    fn test_query_finds_nearby_points() {
        let det = build_detector();
        let mut aabb = Aabb::from_point(Vec3::ZERO);
        aabb.merge_point(Vec3::splat(0.5));
        let mut hits = Vec::new();
        det.query(&aabb.inflated(0.02), &mut hits);
        assert_eq!(hits.len(), 2);
        let actors: Vec<u32> = hits.iter().map(|&h| det.point(h).actor).collect();
        assert_eq!(actors, vec![0, 1]);
    }

    #[test]
    fn test_query_misses_far_points() {
        let det = build_detector();
        let mut aabb = Aabb::from_point(Vec3::new(100.0, 0.0, 0.0));
        aabb.merge_point(Vec3::new(101.0, 1.0, 1.0));
        let mut hits = Vec::new();
        det.query(&aabb, &mut hits);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_rebuild_clears_previous_state() {
        let mut det = build_detector();
        det.rebuild(vec![]);
        assert!(det.is_empty());
        let mut hits = Vec::new();
        let mut aabb = Aabb::from_point(Vec3::ZERO);
        aabb.merge_point(Vec3::splat(10.0));
        det.query(&aabb, &mut hits);
        assert!(hits.is_empty());
    }
}
