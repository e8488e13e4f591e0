//! The set of blocks where simulation runs

use std::collections::HashSet;

use crate::core::types::{node_to_block_pos, IVec3, Vec3, MAP_BLOCKSIZE};
use crate::math::float_to_node;

/// What the active block computation needs to know about a player
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActivePlayer {
    /// Position in nodes
    pub pos: Vec3,
    /// Unit look direction
    pub look_dir: Vec3,
    /// Horizontal field of view in radians
    pub fov: f32,
    /// Object range the player asks for, in blocks
    pub wanted_range: i16,
}

impl ActivePlayer {
    pub fn new(pos: Vec3) -> Self {
        Self { pos, look_dir: Vec3::Z, fov: 72f32.to_radians(), wanted_range: 0 }
    }
}

/// Radius of the sphere enclosing a block, in nodes
const BLOCK_MAX_RADIUS: f32 = 0.5 * MAP_BLOCKSIZE as f32 * 1.732_050_8;

/// Insert every block within `r` blocks of `p0` (truncated euclidean distance)
fn fill_radius_block(p0: IVec3, r: i16, list: &mut HashSet<IVec3>) {
    let r = r as i32;
    for x in p0.x - r..=p0.x + r {
        for y in p0.y - r..=p0.y + r {
            for z in p0.z - r..=p0.z + r {
                let p = IVec3::new(x, y, z);
                let d = ((p - p0).length_squared() as f64).sqrt() as i32;
                if d <= r {
                    list.insert(p);
                }
            }
        }
    }
}

/// Whether block `blockpos` is within `range` nodes of the camera and inside
/// its view cone
pub fn is_block_in_sight(blockpos: IVec3, camera_pos: Vec3, camera_dir: Vec3, camera_fov: f32, range: f32) -> bool {
    let center = (blockpos * MAP_BLOCKSIZE).as_vec3() + Vec3::splat(MAP_BLOCKSIZE as f32 / 2.0);
    let relative = center - camera_pos;
    let d = (relative.length() - BLOCK_MAX_RADIUS).max(0.0);
    if d > range {
        return false;
    }
    // Touching the camera
    if d == 0.0 {
        return true;
    }
    // Move the camera back so that any visible part of the block puts its
    // center inside the cone
    let adjdist = BLOCK_MAX_RADIUS / ((std::f32::consts::PI - camera_fov) / 2.0).cos();
    let adjusted = center - (camera_pos - camera_dir * adjdist);
    let cosangle = adjusted.dot(camera_dir) / adjusted.length();
    cosangle >= (camera_fov * 0.55).cos()
}

fn fill_view_cone_block(p0: IVec3, r: i16, player: &ActivePlayer, list: &mut HashSet<IVec3>) {
    let r_nodes = r as f32 * MAP_BLOCKSIZE as f32;
    let r = r as i32;
    for x in p0.x - r..=p0.x + r {
        for y in p0.y - r..=p0.y + r {
            for z in p0.z - r..=p0.z + r {
                let p = IVec3::new(x, y, z);
                if is_block_in_sight(p, player.pos, player.look_dir, player.fov, r_nodes) {
                    list.insert(p);
                }
            }
        }
    }
}

/// Outcome of one `ActiveBlockList::update`
#[derive(Debug, Default)]
pub struct ActiveBlockChanges {
    pub added: HashSet<IVec3>,
    pub removed: HashSet<IVec3>,
    /// Blocks that only entered through a view cone; objects run there but
    /// ABMs and LBMs do not
    pub extra_added: HashSet<IVec3>,
}

#[derive(Debug, Default)]
pub struct ActiveBlockList {
    /// Every active block
    pub list: HashSet<IVec3>,
    /// Blocks where ABMs run
    pub abm_list: HashSet<IVec3>,
    /// Blocks kept active regardless of players
    pub forceloaded: HashSet<IVec3>,
}

impl ActiveBlockList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute the active set from player positions plus the forceloaded
    /// blocks and report the difference to the previous set
    pub fn update(&mut self, players: &[ActivePlayer], active_block_range: i16, active_object_range: i16) -> ActiveBlockChanges {
        let mut newlist = self.forceloaded.clone();
        let mut extralist = HashSet::new();
        self.abm_list = self.forceloaded.clone();

        for player in players {
            let pos = node_to_block_pos(float_to_node(player.pos));
            fill_radius_block(pos, active_block_range, &mut self.abm_list);
            fill_radius_block(pos, active_block_range, &mut newlist);

            let player_ao_range = if player.wanted_range > 0 {
                active_object_range.min(player.wanted_range)
            } else {
                active_object_range
            };
            if player_ao_range > active_block_range {
                fill_view_cone_block(pos, player_ao_range, player, &mut extralist);
            }
        }

        let mut changes = ActiveBlockChanges::default();
        for p in &self.list {
            if !newlist.contains(p) && !extralist.contains(p) {
                changes.removed.insert(*p);
            }
        }
        for p in &newlist {
            extralist.remove(p);
            if !self.list.contains(p) {
                changes.added.insert(*p);
            }
        }
        for p in extralist {
            newlist.insert(p);
            if !self.list.contains(&p) {
                changes.extra_added.insert(p);
            }
        }
        self.list = newlist;
        changes
    }

    pub fn contains(&self, p: IVec3) -> bool {
        self.list.contains(&p)
    }

    /// Forget a block that could not be loaded
    pub fn remove(&mut self, p: IVec3) {
        self.list.remove(&p);
        self.abm_list.remove(&p);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radius_is_a_sphere() {
        let mut list = HashSet::new();
        fill_radius_block(IVec3::ZERO, 2, &mut list);
        assert!(list.contains(&IVec3::new(2, 0, 0)));
        assert!(list.contains(&IVec3::new(1, 1, 1)));
        // sqrt(8) truncates to 2
        assert!(list.contains(&IVec3::new(2, 2, 0)));
        assert!(!list.contains(&IVec3::new(2, 2, 2)));
    }

    #[test]
    fn test_update_reports_differences() {
        let mut abl = ActiveBlockList::new();
        let first = abl.update(&[ActivePlayer::new(Vec3::new(8.0, 8.0, 8.0))], 1, 0);
        // Truncated distances make radius 1 the full 3x3x3 cube
        assert_eq!(first.added.len(), 27);
        assert!(first.removed.is_empty());

        let second = abl.update(&[ActivePlayer::new(Vec3::new(24.0, 8.0, 8.0))], 1, 0);
        assert!(second.added.is_disjoint(&second.removed));
        assert_eq!(second.added.len(), 9);
        assert!(second.added.iter().all(|p| p.x == 2));
        assert_eq!(second.removed.len(), 9);
        assert!(second.removed.iter().all(|p| p.x == -1));
        assert!(abl.contains(IVec3::new(2, 0, 0)));
        assert!(!abl.contains(IVec3::new(-1, 0, 0)));
    }

    #[test]
    fn test_forceloaded_blocks_stay_active() {
        let mut abl = ActiveBlockList::new();
        abl.forceloaded.insert(IVec3::new(100, 0, 0));
        let changes = abl.update(&[], 2, 0);
        assert_eq!(changes.added.len(), 1);
        assert!(abl.abm_list.contains(&IVec3::new(100, 0, 0)));
        assert!(abl.update(&[], 2, 0).added.is_empty());
    }

    #[test]
    fn test_view_cone_adds_extra_blocks() {
        let mut abl = ActiveBlockList::new();
        let mut player = ActivePlayer::new(Vec3::new(8.0, 8.0, 8.0));
        player.look_dir = Vec3::X;
        let changes = abl.update(&[player], 1, 4);
        assert!(changes.extra_added.contains(&IVec3::new(4, 0, 0)));
        assert!(!changes.extra_added.contains(&IVec3::new(-4, 0, 0)));
        assert!(changes.extra_added.is_disjoint(&changes.added));
        // Not an ABM block
        assert!(!abl.abm_list.contains(&IVec3::new(4, 0, 0)));
    }
}
