//! Map edit events

use std::collections::HashSet;

use crate::core::types::{block_to_node_pos, IVec3, MAP_BLOCKSIZE};
use crate::voxel::area::VoxelArea;
use crate::voxel::node::MapNode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapEditEventType {
    /// Node added (also used for plain node changes)
    AddNode,
    RemoveNode,
    /// Node replaced without running callbacks or metadata removal
    SwapNode,
    /// Metadata of some node in block `p` changed
    BlockNodeMetadataChanged,
    /// Bulk change affecting `modified_blocks`
    Other,
}

/// One authoritative change to the map
#[derive(Clone, Debug, PartialEq)]
pub struct MapEditEvent {
    pub kind: MapEditEventType,
    /// Node position, or block position for metadata events
    pub p: IVec3,
    pub node: MapNode,
    pub modified_blocks: HashSet<IVec3>,
    pub is_private_change: bool,
}

impl MapEditEvent {
    pub fn new(kind: MapEditEventType, p: IVec3, node: MapNode) -> Self {
        Self {
            kind,
            p,
            node,
            modified_blocks: HashSet::new(),
            is_private_change: false,
        }
    }

    /// Bulk event covering a set of blocks
    pub fn other(modified_blocks: HashSet<IVec3>) -> Self {
        Self {
            kind: MapEditEventType::Other,
            p: IVec3::ZERO,
            node: MapNode::ignore(),
            modified_blocks,
            is_private_change: false,
        }
    }

    /// Node area touched by the event
    pub fn area(&self) -> VoxelArea {
        match self.kind {
            MapEditEventType::AddNode | MapEditEventType::RemoveNode | MapEditEventType::SwapNode => {
                VoxelArea::point(self.p)
            }
            MapEditEventType::BlockNodeMetadataChanged => {
                let min = block_to_node_pos(self.p);
                VoxelArea::new(min, min + IVec3::splat(MAP_BLOCKSIZE - 1))
            }
            MapEditEventType::Other => {
                let mut a = VoxelArea::default();
                for bp in &self.modified_blocks {
                    let min = block_to_node_pos(*bp);
                    a.add_area(&VoxelArea::new(min, min + IVec3::splat(MAP_BLOCKSIZE - 1)));
                }
                a
            }
        }
    }
}

/// Consumer of map edit events
pub trait MapEventReceiver {
    fn on_map_edit_event(&mut self, event: &MapEditEvent);
}
