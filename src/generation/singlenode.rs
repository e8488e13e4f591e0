//! Generator that fills the world with a single node

use glam::{IVec2, IVec3};

use crate::core::settings::{WorldSettings, MG_LIGHT};
use crate::voxel::node::{MapNode, CONTENT_AIR, CONTENT_IGNORE, LIGHT_SUN};

use super::mapgen::MapgenBase;
use super::{BlockMakeData, MapGenerator};

#[derive(Clone, Debug)]
pub struct MapgenSinglenode {
    base: MapgenBase,
    /// Node name resolved on every chunk, `air` when unset
    node_name: String,
}

impl MapgenSinglenode {
    pub fn new(settings: &WorldSettings, node_name: impl Into<String>) -> Self {
        Self { base: MapgenBase::new(settings), node_name: node_name.into() }
    }
}

impl MapGenerator for MapgenSinglenode {
    fn base(&self) -> &MapgenBase {
        &self.base
    }

    fn make_chunk(&mut self, data: &mut BlockMakeData) {
        let defs = data.nodedef.clone();
        let content = defs.get_id(&self.node_name).unwrap_or_else(|| {
            log::warn!("singlenode generator: unknown node {:?}, using air", self.node_name);
            CONTENT_AIR
        });
        let node = MapNode::new(content);
        let node_min = data.node_min();
        let node_max = data.node_max();

        let vm = &mut data.vmanip;
        for z in node_min.z..=node_max.z {
            for y in node_min.y..=node_max.y {
                for x in node_min.x..=node_max.x {
                    let p = IVec3::new(x, y, z);
                    if vm.get_node_no_ex(p).content() == CONTENT_IGNORE {
                        vm.set_node(p, node);
                    }
                }
            }
        }

        let f = defs.get(content);
        if f.is_liquid() {
            MapgenBase::update_liquid(vm, &defs, &mut data.transforming_liquid, node_min, node_max);
        }
        if self.base.flags & MG_LIGHT != 0 && f.sunlight_propagates {
            MapgenBase::set_lighting(vm, &defs, LIGHT_SUN, node_min, node_max);
        }
    }

    fn get_spawn_level_at_point(&mut self, _p: IVec2) -> Option<i32> {
        Some(0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::voxel::area::VoxelArea;
    use crate::voxel::node::LightBank;
    use crate::voxel::nodedef::NodeDefManager;

    fn job(defs: Arc<NodeDefManager>) -> BlockMakeData {
        let mut data = BlockMakeData::new(defs, 1);
        data.blockpos_min = IVec3::ZERO;
        data.blockpos_max = IVec3::ZERO;
        data.vmanip.add_area(&VoxelArea::new(IVec3::ZERO, IVec3::splat(15)));
        data
    }

    #[test]
    fn test_fills_only_ignore() {
        let defs = Arc::new(NodeDefManager::with_default_content());
        let stone = defs.get_id("default:stone").unwrap();
        let mut data = job(defs.clone());
        data.vmanip.set_node(IVec3::new(1, 1, 1), MapNode::new(CONTENT_AIR));

        let mut mg = MapgenSinglenode::new(&WorldSettings::default(), "default:stone");
        mg.make_chunk(&mut data);
        assert_eq!(data.vmanip.get_node_no_ex(IVec3::new(1, 1, 1)).content(), CONTENT_AIR);
        assert_eq!(data.vmanip.get_node_no_ex(IVec3::new(15, 0, 7)).content(), stone);
        assert!(data.transforming_liquid.is_empty());
    }

    #[test]
    fn test_air_gets_sunlight() {
        let defs = Arc::new(NodeDefManager::with_default_content());
        let mut data = job(defs.clone());
        let mut mg = MapgenSinglenode::new(&WorldSettings::default(), "air");
        mg.make_chunk(&mut data);
        let n = data.vmanip.get_node_no_ex(IVec3::new(4, 0, 4));
        assert_eq!(n.get_light(LightBank::Day, defs.get_node(n)), LIGHT_SUN);
        assert_eq!(n.get_light(LightBank::Night, defs.get_node(n)), 0);
    }

    #[test]
    fn test_water_feeds_liquid_queue() {
        let defs = Arc::new(NodeDefManager::with_default_content());
        let mut data = job(defs.clone());
        data.vmanip.set_node(IVec3::new(3, 15, 3), MapNode::new(CONTENT_AIR));
        let mut mg = MapgenSinglenode::new(&WorldSettings::default(), "default:water_source");
        mg.make_chunk(&mut data);
        assert!(data.transforming_liquid.contains(&IVec3::new(3, 14, 3)));
    }
}
