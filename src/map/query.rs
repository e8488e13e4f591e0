//! Area and ray queries over loaded nodes

use crate::core::types::{block_to_node_pos, node_to_block_pos, IVec3, Vec3, MAP_BLOCKSIZE};
use crate::math::aabb::Aabb;
use crate::math::ray::{Ray, VoxelLineIterator};
use crate::voxel::node::{MapNode, CONTENT_AIR, CONTENT_IGNORE};

use super::{Map, MapAccess};

/// A node hit by `Map::raycast_nodes`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointedNode {
    /// The node that was hit
    pub under: IVec3,
    /// The node the ray passed through just before, where a placed node
    /// would go
    pub above: IVec3,
    pub node: MapNode,
    /// Distance from the ray start to the hit node's surface
    pub distance: f32,
}

impl Map {
    /// Positions of loaded nodes in `p1..=p2` whose content is in `filter`,
    /// ordered by block then by node index
    pub fn find_nodes_in_area(&self, p1: IVec3, p2: IVec3, filter: &[u16]) -> Vec<IVec3> {
        let min = p1.min(p2);
        let max = p1.max(p2);
        let bmin = node_to_block_pos(min);
        let bmax = node_to_block_pos(max);

        let mut found = Vec::new();
        for z in bmin.z..=bmax.z {
            for y in bmin.y..=bmax.y {
                for x in bmin.x..=bmax.x {
                    let bp = IVec3::new(x, y, z);
                    let Some(block) = self.get_block_no_create(bp) else { continue };
                    let origin = block_to_node_pos(bp);
                    let lo = (min - origin).max(IVec3::ZERO);
                    let hi = (max - origin).min(IVec3::splat(MAP_BLOCKSIZE - 1));
                    for rz in lo.z..=hi.z {
                        for ry in lo.y..=hi.y {
                            for rx in lo.x..=hi.x {
                                let rel = IVec3::new(rx, ry, rz);
                                if filter.contains(&block.get_node_no_check(rel).content()) {
                                    found.push(origin + rel);
                                }
                            }
                        }
                    }
                }
            }
        }
        found
    }

    /// Pointable nodes along the segment `from..to`, nearest first. The
    /// walk stops at the first unloaded node.
    pub fn raycast_nodes(&self, from: Vec3, to: Vec3) -> Vec<PointedNode> {
        let ray = Ray::segment(from, to);
        let defs = self.node_defs();

        let mut hits = Vec::new();
        let mut previous: Option<IVec3> = None;
        for p in VoxelLineIterator::new(from, to) {
            let n = self.get_node_or_ignore(p);
            if n.content() == CONTENT_IGNORE {
                break;
            }
            let f = defs.get_node(n);
            if n.content() != CONTENT_AIR && f.pointable {
                let bounds = Aabb::full_node().translated(p.as_vec3());
                let distance = ray.intersects_aabb(&bounds).unwrap_or(0.0);
                hits.push(PointedNode { under: p, above: previous.unwrap_or(p), node: n, distance });
            }
            previous = Some(p);
        }
        hits
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::map::tests::filled_map;
    use crate::voxel::nodedef::NodeDefManager;

    #[test]
    fn test_find_nodes_in_area_spans_blocks() {
        let defs = Arc::new(NodeDefManager::with_default_content());
        let stone = defs.get_id("default:stone").unwrap();
        let lamp = defs.get_id("default:mese_lamp").unwrap();
        let mut map = filled_map(defs, 1, "air", false);
        for p in [IVec3::new(-1, 0, 0), IVec3::new(15, 3, 3), IVec3::new(16, 3, 3)] {
            map.set_node_raw(p, MapNode::new(stone)).unwrap();
        }
        map.set_node_raw(IVec3::new(2, 2, 2), MapNode::new(lamp)).unwrap();

        let mut found = map.find_nodes_in_area(IVec3::new(20, 5, 5), IVec3::new(-2, -2, -2), &[stone]);
        found.sort_by_key(|p| (p.x, p.y, p.z));
        assert_eq!(found, vec![IVec3::new(-1, 0, 0), IVec3::new(15, 3, 3), IVec3::new(16, 3, 3)]);

        let both = map.find_nodes_in_area(IVec3::splat(-16), IVec3::splat(31), &[stone, lamp]);
        assert_eq!(both.len(), 4);
    }

    #[test]
    fn test_raycast_hits_in_order() {
        let defs = Arc::new(NodeDefManager::with_default_content());
        let stone = defs.get_id("default:stone").unwrap();
        let mut map = filled_map(defs, 1, "air", false);
        map.set_node_raw(IVec3::new(5, 0, 0), MapNode::new(stone)).unwrap();
        map.set_node_raw(IVec3::new(9, 0, 0), MapNode::new(stone)).unwrap();

        let hits = map.raycast_nodes(Vec3::ZERO, Vec3::new(12.0, 0.0, 0.0));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].under, IVec3::new(5, 0, 0));
        assert_eq!(hits[0].above, IVec3::new(4, 0, 0));
        assert!((hits[0].distance - 4.5).abs() < 1e-4);
        assert_eq!(hits[1].under, IVec3::new(9, 0, 0));
    }

    #[test]
    fn test_raycast_stops_at_unloaded() {
        let defs = Arc::new(NodeDefManager::with_default_content());
        let stone = defs.get_id("default:stone").unwrap();
        let mut map = filled_map(defs, 0, "air", false);
        map.set_node_raw(IVec3::new(3, 3, 3), MapNode::new(stone)).unwrap();
        assert!(map.raycast_nodes(Vec3::new(3.0, 3.0, -40.0), Vec3::new(3.0, 3.0, 1.0)).is_empty());
        assert_eq!(map.raycast_nodes(Vec3::new(3.0, 3.0, 0.0), Vec3::new(3.0, 3.0, 40.0)).len(), 1);
    }
}
