//! Voxel data structures: nodes, definitions, manipulators and blocks

pub mod node;
pub mod nodedef;
pub mod area;
pub mod manip;
pub mod mmvmanip;
pub mod name_id;
pub mod block;

pub use node::{MapNode, LightBank, NodeContainer, CONTENT_AIR, CONTENT_IGNORE, CONTENT_UNKNOWN, LIGHT_MAX, LIGHT_SUN};
pub use nodedef::{ContentFeatures, NodeDefManager};
pub use area::VoxelArea;
pub use manip::VoxelManipulator;
pub use mmvmanip::MMVManip;
pub use block::MapBlock;
