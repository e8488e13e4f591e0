//! Active objects and their registry
//!
//! An active object lives in an active block and is stepped every server
//! tick. When its block leaves the active set it is turned back into a
//! `StaticObject` record stored in the block, and recreated from that record
//! on the next activation.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use crate::core::error::Error;
use crate::core::types::{IVec3, Result, Vec3, MAX_MAP_GENERATION_LIMIT};
use crate::math::Aabb;
use crate::util::serialize::{
    serialize_string16, serialize_string32, write_u16, write_u8, write_v3f32, Reader,
};

use super::messages::{ActiveObjectCommand, ActiveObjectMessage, ObjectProperties};

pub const ACTIVEOBJECT_TYPE_INVALID: u8 = 0;
pub const ACTIVEOBJECT_TYPE_LUAENTITY: u8 = 7;
pub const ACTIVEOBJECT_TYPE_PLAYER: u8 = 100;

/// Where an object hangs on its parent
#[derive(Clone, Debug, PartialEq)]
pub struct Attachment {
    pub parent: u16,
    pub bone: String,
    pub position: Vec3,
    pub rotation: Vec3,
    pub force_visible: bool,
}

/// State every active object carries
#[derive(Clone, Debug, Default)]
pub struct ObjectBase {
    /// 0 until registered
    pub id: u16,
    pub pos: Vec3,
    pub pending_removal: bool,
    pub pending_deactivation: bool,
    /// A static copy exists in `static_block`
    pub static_exists: bool,
    pub static_block: IVec3,
    /// Number of observers that currently know the object
    pub known_by_count: u32,
    pub attachment: Option<Attachment>,
    pub children: BTreeSet<u16>,
    pub armor_groups: BTreeMap<String, i16>,
    /// Bone overrides, bone name to (position, rotation)
    pub bone_positions: BTreeMap<String, (Vec3, Vec3)>,
    pub messages: VecDeque<ActiveObjectMessage>,
}

impl ObjectBase {
    pub fn new(pos: Vec3) -> Self {
        Self { pos, ..Default::default() }
    }

    pub fn push_command(&mut self, reliable: bool, command: &ActiveObjectCommand) {
        self.messages.push_back(ActiveObjectMessage::new(self.id, reliable, command));
    }
}

/// Behaviour the environment drives. Most operations have defaults built
/// on `ObjectBase`.
pub trait ActiveObject: Send + std::fmt::Debug {
    fn base(&self) -> &ObjectBase;
    fn base_mut(&mut self) -> &mut ObjectBase;

    /// One of the `ACTIVEOBJECT_TYPE_*` tags
    fn kind(&self) -> u8;

    fn id(&self) -> u16 {
        self.base().id
    }

    fn base_position(&self) -> Vec3 {
        self.base().pos
    }

    fn set_base_position(&mut self, pos: Vec3) {
        self.base_mut().pos = pos;
    }

    /// Removed or deactivated; the environment drops it at the end of the tick
    fn is_gone(&self) -> bool {
        let b = self.base();
        b.pending_removal || b.pending_deactivation
    }

    fn mark_for_removal(&mut self) {
        if !self.base().pending_removal {
            self.on_marked_for_removal();
            self.base_mut().pending_removal = true;
        }
    }

    fn mark_for_deactivation(&mut self) {
        if !self.base().pending_deactivation {
            self.on_marked_for_deactivation();
            self.base_mut().pending_deactivation = true;
        }
    }

    fn on_marked_for_removal(&mut self) {}

    fn on_marked_for_deactivation(&mut self) {}

    /// Called once registered; `dtime_s` is the time spent stored
    fn added_to_environment(&mut self, _dtime_s: u32) {}

    fn step(&mut self, dtime: f32, send_recommended: bool);

    /// Opaque state stored in the static record
    fn get_static_data(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Whether the object may be written to its block at all
    fn is_static_allowed(&self) -> bool {
        true
    }

    /// Distance below which a move alone does not dirty the static block
    fn minimum_saved_movement(&self) -> f32 {
        2.0
    }

    /// Everything a new observer needs to display the object
    fn get_visual_initialization_data(&self) -> Vec<u8> {
        let b = self.base();
        let mut out = Vec::new();
        write_u8(&mut out, 1);
        serialize_string16(&mut out, b"");
        write_u8(&mut out, (self.kind() == ACTIVEOBJECT_TYPE_PLAYER) as u8);
        write_u16(&mut out, b.id);
        write_v3f32(&mut out, b.pos);
        write_v3f32(&mut out, Vec3::ZERO);
        write_u16(&mut out, 0);
        write_u8(&mut out, 0);
        out
    }

    /// Apply a hit and return the hp left
    fn punch(&mut self, _dir: Vec3, _damage: u16, _puncher: Option<u16>) -> u16 {
        0
    }

    fn right_click(&mut self, _clicker: Option<u16>) {}

    fn collision_box(&self) -> Option<Aabb> {
        None
    }

    fn selection_box(&self) -> Option<Aabb> {
        None
    }

    fn set_attachment(&mut self, parent: u16, bone: &str, position: Vec3, rotation: Vec3, force_visible: bool) {
        let command = ActiveObjectCommand::AttachTo {
            parent_id: parent,
            bone: bone.to_string(),
            position,
            rotation,
            force_visible,
        };
        let base = self.base_mut();
        base.attachment = Some(Attachment { parent, bone: bone.to_string(), position, rotation, force_visible });
        base.push_command(true, &command);
    }

    fn attachment(&self) -> Option<&Attachment> {
        self.base().attachment.as_ref()
    }

    /// Drop the parent link and return the former parent id. The parent's
    /// child set is the caller's business.
    fn clear_parent_attachment(&mut self) -> Option<u16> {
        let old = self.base_mut().attachment.take()?;
        let command = ActiveObjectCommand::AttachTo {
            parent_id: 0,
            bone: String::new(),
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            force_visible: false,
        };
        self.base_mut().push_command(true, &command);
        Some(old.parent)
    }

    fn add_attachment_child(&mut self, child: u16) -> bool {
        self.base_mut().children.insert(child)
    }

    fn remove_attachment_child(&mut self, child: u16) -> bool {
        self.base_mut().children.remove(&child)
    }

    fn attachment_children(&self) -> &BTreeSet<u16> {
        &self.base().children
    }

    fn set_bone_position(&mut self, bone: &str, position: Vec3, rotation: Vec3) {
        let command = ActiveObjectCommand::SetBonePosition { bone: bone.to_string(), position, rotation };
        let base = self.base_mut();
        base.bone_positions.insert(bone.to_string(), (position, rotation));
        base.push_command(true, &command);
    }

    fn set_armor_groups(&mut self, groups: BTreeMap<String, i16>) {
        let command = ActiveObjectCommand::UpdateArmorGroups(groups.clone());
        let base = self.base_mut();
        base.armor_groups = groups;
        base.push_command(true, &command);
    }

    fn take_messages(&mut self) -> Vec<ActiveObjectMessage> {
        self.base_mut().messages.drain(..).collect()
    }
}

/// Whether `p` lies outside the map on any axis
fn objectpos_over_limit(p: Vec3) -> bool {
    let limit = MAX_MAP_GENERATION_LIMIT as f32;
    p.abs().max_element() > limit
}

/// A scripted entity with a name and an opaque state string
#[derive(Clone, Debug)]
pub struct EntityObject {
    base: ObjectBase,
    pub name: String,
    pub state: String,
    pub hp: u16,
    pub properties: ObjectProperties,
    pub velocity: Vec3,
    pub acceleration: Vec3,
    pub rotation: Vec3,
    properties_sent: bool,
    last_sent_position: Vec3,
    last_sent_velocity: Vec3,
    last_sent_rotation: Vec3,
    last_sent_position_timer: f32,
    last_sent_move_precision: f32,
}

const ENTITY_STATIC_VERSION: u8 = 1;

impl EntityObject {
    pub fn new(pos: Vec3, name: impl Into<String>, state: impl Into<String>) -> Self {
        let properties = ObjectProperties::default();
        Self {
            base: ObjectBase::new(pos),
            name: name.into(),
            state: state.into(),
            hp: properties.hp_max,
            properties,
            velocity: Vec3::ZERO,
            acceleration: Vec3::ZERO,
            rotation: Vec3::ZERO,
            properties_sent: false,
            last_sent_position: pos,
            last_sent_velocity: Vec3::ZERO,
            last_sent_rotation: Vec3::ZERO,
            last_sent_position_timer: 0.0,
            last_sent_move_precision: 0.0,
        }
    }

    /// Rebuild an entity from its static record
    pub fn from_static_data(pos: Vec3, data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let version = r.read_u8()?;
        if version != ENTITY_STATIC_VERSION {
            return Err(Error::Serialization(format!("unsupported entity data version {}", version)));
        }
        let name = String::from_utf8_lossy(r.read_string16()?).into_owned();
        let state = String::from_utf8_lossy(r.read_string32()?).into_owned();
        let mut obj = Self::new(pos, name, state);
        obj.hp = r.read_u16()?;
        obj.velocity = r.read_v3f32()?;
        obj.rotation = r.read_v3f32()?;
        obj.last_sent_velocity = obj.velocity;
        obj.last_sent_rotation = obj.rotation;
        Ok(obj)
    }

    pub fn set_texture_mod(&mut self, m: &str) {
        self.base.push_command(true, &ActiveObjectCommand::SetTextureMod(m.to_string()));
    }

    pub fn set_sprite(&mut self, start_frame: glam::IVec2, num_frames: u16, framelength: f32, select_horiz_by_yawpitch: bool) {
        let command = ActiveObjectCommand::SetSprite { start_frame, num_frames, framelength, select_horiz_by_yawpitch };
        self.base.push_command(true, &command);
    }

    pub fn set_animation(&mut self, frames: glam::Vec2, frame_speed: f32, frame_blend: f32, frame_loop: bool) {
        let command = ActiveObjectCommand::SetAnimation { frames, frame_speed, frame_blend, frame_loop };
        self.base.push_command(true, &command);
    }

    pub fn set_animation_speed(&mut self, speed: f32) {
        self.base.push_command(true, &ActiveObjectCommand::SetAnimationSpeed(speed));
    }

    pub fn set_properties(&mut self, properties: ObjectProperties) {
        self.properties = properties;
        self.hp = self.hp.min(self.properties.hp_max);
        self.properties_sent = false;
    }

    fn send_position(&mut self, do_interpolate: bool, is_movement_end: bool, update_interval: f32) {
        self.last_sent_move_precision = self.base.pos.distance(self.last_sent_position);
        self.last_sent_position_timer = 0.0;
        self.last_sent_position = self.base.pos;
        self.last_sent_velocity = self.velocity;
        self.last_sent_rotation = self.rotation;
        let command = ActiveObjectCommand::UpdatePosition {
            position: self.base.pos,
            velocity: self.velocity,
            acceleration: self.acceleration,
            rotation: self.rotation,
            do_interpolate,
            is_movement_end,
            update_interval,
        };
        self.base.push_command(false, &command);
    }
}

impl ActiveObject for EntityObject {
    fn base(&self) -> &ObjectBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ObjectBase {
        &mut self.base
    }

    fn kind(&self) -> u8 {
        ACTIVEOBJECT_TYPE_LUAENTITY
    }

    fn step(&mut self, dtime: f32, send_recommended: bool) {
        if !self.properties_sent {
            self.properties_sent = true;
            let command = ActiveObjectCommand::SetProperties(self.properties.clone());
            self.base.push_command(true, &command);
        }

        self.last_sent_position_timer += dtime;

        // Attached objects follow their parent on the observer side
        if self.base.attachment.is_none() {
            let p = self.base.pos + self.velocity * dtime + 0.5 * self.acceleration * dtime * dtime;
            self.velocity += self.acceleration * dtime;
            if !objectpos_over_limit(p) {
                self.base.pos = p;
            }
        }

        if !send_recommended {
            return;
        }
        if self.base.attachment.is_some() {
            return;
        }

        let min_change = if self.last_sent_position_timer > 1.0 {
            0.01
        } else if self.last_sent_position_timer > 0.2 {
            0.05
        } else {
            0.2
        };
        let move_d = self.base.pos.distance(self.last_sent_position) + self.last_sent_move_precision;
        if move_d > min_change
            || self.velocity.distance(self.last_sent_velocity) > 0.1
            || self.rotation.distance(self.last_sent_rotation) > 1.0
        {
            self.send_position(true, false, 0.2);
        }
    }

    fn get_static_data(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u8(&mut out, ENTITY_STATIC_VERSION);
        serialize_string16(&mut out, self.name.as_bytes());
        serialize_string32(&mut out, self.state.as_bytes());
        write_u16(&mut out, self.hp);
        write_v3f32(&mut out, self.velocity);
        write_v3f32(&mut out, self.rotation);
        out
    }

    fn is_static_allowed(&self) -> bool {
        self.properties.static_save
    }

    fn minimum_saved_movement(&self) -> f32 {
        0.1
    }

    fn get_visual_initialization_data(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u8(&mut out, 1);
        serialize_string16(&mut out, self.name.as_bytes());
        write_u8(&mut out, 0);
        write_u16(&mut out, self.base.id);
        write_v3f32(&mut out, self.base.pos);
        write_v3f32(&mut out, self.rotation);
        write_u16(&mut out, self.hp);

        let mut commands = vec![
            ActiveObjectCommand::SetProperties(self.properties.clone()),
            ActiveObjectCommand::UpdateArmorGroups(self.base.armor_groups.clone()),
        ];
        for (bone, (position, rotation)) in &self.base.bone_positions {
            commands.push(ActiveObjectCommand::SetBonePosition {
                bone: bone.clone(),
                position: *position,
                rotation: *rotation,
            });
        }
        if let Some(a) = &self.base.attachment {
            commands.push(ActiveObjectCommand::AttachTo {
                parent_id: a.parent,
                bone: a.bone.clone(),
                position: a.position,
                rotation: a.rotation,
                force_visible: a.force_visible,
            });
        }
        write_u8(&mut out, commands.len() as u8);
        for command in &commands {
            serialize_string32(&mut out, &command.serialize());
        }
        out
    }

    fn punch(&mut self, _dir: Vec3, damage: u16, _puncher: Option<u16>) -> u16 {
        if self.base.armor_groups.get("immortal").copied().unwrap_or(0) != 0 {
            return self.hp;
        }
        self.hp = self.hp.saturating_sub(damage);
        self.base.push_command(true, &ActiveObjectCommand::Punched { hp: self.hp });
        if self.hp == 0 {
            log::debug!("Entity {} ({}) killed", self.base.id, self.name);
            self.mark_for_removal();
        }
        self.hp
    }

    fn collision_box(&self) -> Option<Aabb> {
        self.properties.physical.then(|| self.properties.collision_box.translated(self.base.pos))
    }

    fn selection_box(&self) -> Option<Aabb> {
        self.properties.pointable.then(|| self.properties.selection_box.translated(self.base.pos))
    }
}

/// Recreate an active object from a static record
pub fn create_object(kind: u8, pos: Vec3, data: &[u8]) -> Result<Box<dyn ActiveObject>> {
    match kind {
        ACTIVEOBJECT_TYPE_LUAENTITY => Ok(Box::new(EntityObject::from_static_data(pos, data)?)),
        other => Err(Error::Serialization(format!("unknown active object type {}", other))),
    }
}

/// Every active object, keyed by id
#[derive(Debug, Default)]
pub struct ActiveObjectManager {
    objects: BTreeMap<u16, Box<dyn ActiveObject>>,
    last_used_id: u16,
}

impl ActiveObjectManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_free_id(&self, id: u16) -> bool {
        id != 0 && !self.objects.contains_key(&id)
    }

    /// Next unused id after the last one handed out, wrapping and skipping 0
    pub fn get_free_id(&mut self) -> Option<u16> {
        let start = self.last_used_id;
        let mut id = start;
        loop {
            id = id.wrapping_add(1);
            if self.is_free_id(id) {
                self.last_used_id = id;
                return Some(id);
            }
            if id == start {
                return None;
            }
        }
    }

    /// Take ownership of `obj`, assigning an id when it has none. Returns
    /// the id, or `None` when the object was rejected.
    pub fn register(&mut self, mut obj: Box<dyn ActiveObject>) -> Option<u16> {
        if obj.id() == 0 {
            let Some(id) = self.get_free_id() else {
                log::error!("ActiveObjectManager: no free id available");
                return None;
            };
            obj.base_mut().id = id;
        } else if !self.is_free_id(obj.id()) {
            log::error!("ActiveObjectManager: id {} is not free", obj.id());
            return None;
        }
        if objectpos_over_limit(obj.base_position()) {
            log::warn!("ActiveObjectManager: object position {} outside the map, not adding", obj.base_position());
            return None;
        }
        let id = obj.id();
        self.objects.insert(id, obj);
        Some(id)
    }

    pub fn remove(&mut self, id: u16) -> Option<Box<dyn ActiveObject>> {
        self.objects.remove(&id)
    }

    pub fn get(&self, id: u16) -> Option<&dyn ActiveObject> {
        self.objects.get(&id).map(|o| o.as_ref())
    }

    pub fn get_mut(&mut self, id: u16) -> Option<&mut (dyn ActiveObject + 'static)> {
        self.objects.get_mut(&id).map(|o| o.as_mut())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Ids in ascending order
    pub fn ids(&self) -> Vec<u16> {
        self.objects.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn ActiveObject> {
        self.objects.values().map(|o| o.as_ref())
    }

    /// Ids of objects within `radius` nodes of `pos` accepted by `include`
    pub fn get_objects_inside_radius(
        &self,
        pos: Vec3,
        radius: f32,
        include: impl Fn(&dyn ActiveObject) -> bool,
    ) -> Vec<u16> {
        let r2 = radius * radius;
        self.iter()
            .filter(|o| o.base_position().distance_squared(pos) <= r2 && include(*o))
            .map(|o| o.id())
            .collect()
    }

    /// Objects an observer at `pos` should start knowing about: in range,
    /// not gone and not in `current`. Players use `player_radius` when it is
    /// nonzero.
    pub fn get_added_active_objects_around_pos(
        &self,
        pos: Vec3,
        radius: f32,
        player_radius: f32,
        current: &HashSet<u16>,
    ) -> Vec<u16> {
        self.iter()
            .filter(|o| !current.contains(&o.id()) && !o.is_gone())
            .filter(|o| {
                let d = o.base_position().distance(pos);
                if o.kind() == ACTIVEOBJECT_TYPE_PLAYER {
                    player_radius == 0.0 || d <= player_radius
                } else {
                    d <= radius
                }
            })
            .map(|o| o.id())
            .collect()
    }

    /// Objects of `current` an observer at `pos` should forget: gone,
    /// unknown or out of range
    pub fn get_removed_active_objects_around_pos(
        &self,
        pos: Vec3,
        radius: f32,
        player_radius: f32,
        current: &HashSet<u16>,
    ) -> Vec<u16> {
        let mut removed: Vec<u16> = current
            .iter()
            .copied()
            .filter(|id| match self.get(*id) {
                None => true,
                Some(o) if o.is_gone() => true,
                Some(o) => {
                    let d = o.base_position().distance(pos);
                    if o.kind() == ACTIVEOBJECT_TYPE_PLAYER {
                        player_radius != 0.0 && d > player_radius
                    } else {
                        d > radius
                    }
                }
            })
            .collect();
        removed.sort_unstable();
        removed
    }

    /// Link `child` under `parent`, updating both sides
    pub fn attach(&mut self, child: u16, parent: u16, bone: &str, position: Vec3, rotation: Vec3, force_visible: bool) -> bool {
        if child == parent || !self.objects.contains_key(&parent) {
            return false;
        }
        self.detach(child);
        let Some(c) = self.get_mut(child) else { return false };
        c.set_attachment(parent, bone, position, rotation, force_visible);
        if let Some(p) = self.get_mut(parent) {
            p.add_attachment_child(child);
        }
        true
    }

    /// Undo `attach`. Returns false when `child` was not attached.
    pub fn detach(&mut self, child: u16) -> bool {
        let Some(parent) = self.get_mut(child).and_then(|c| c.clear_parent_attachment()) else {
            return false;
        };
        if let Some(p) = self.get_mut(parent) {
            p.remove_attachment_child(child);
        }
        true
    }

    /// Step every object in id order
    pub fn step(&mut self, mut f: impl FnMut(&mut dyn ActiveObject)) {
        for obj in self.objects.values_mut() {
            f(obj.as_mut());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::messages::{AO_CMD_ATTACH_TO, AO_CMD_PUNCHED, AO_CMD_SET_PROPERTIES, AO_CMD_UPDATE_POSITION};

    fn entity(pos: Vec3) -> Box<dyn ActiveObject> {
        Box::new(EntityObject::new(pos, "test:ball", "{}"))
    }

    #[test]
    fn test_static_data_restores_entity() {
        let mut e = EntityObject::new(Vec3::new(1.0, 2.0, 3.0), "test:ball", "state");
        e.hp = 7;
        e.velocity = Vec3::new(0.5, 0.0, -1.0);
        let data = e.get_static_data();
        let obj = create_object(ACTIVEOBJECT_TYPE_LUAENTITY, Vec3::new(1.0, 2.0, 3.0), &data).unwrap();
        assert_eq!(obj.kind(), ACTIVEOBJECT_TYPE_LUAENTITY);
        assert_eq!(obj.get_static_data(), data);
        assert!(create_object(42, Vec3::ZERO, &data).is_err());
        assert!(EntityObject::from_static_data(Vec3::ZERO, &[9]).is_err());
    }

    #[test]
    fn test_ids_skip_zero_and_wrap() {
        let mut m = ActiveObjectManager::new();
        m.last_used_id = u16::MAX - 1;
        let a = m.register(entity(Vec3::ZERO)).unwrap();
        let b = m.register(entity(Vec3::ZERO)).unwrap();
        assert_eq!(a, u16::MAX);
        assert_eq!(b, 1);

        let mut taken = EntityObject::new(Vec3::ZERO, "x", "");
        taken.base_mut().id = 1;
        assert!(m.register(Box::new(taken)).is_none());
        assert!(m.register(entity(Vec3::new(40000.0, 0.0, 0.0))).is_none());
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn test_step_moves_and_reports_position() {
        let mut e = EntityObject::new(Vec3::ZERO, "test:ball", "");
        e.base_mut().id = 3;
        e.velocity = Vec3::new(2.0, 0.0, 0.0);
        e.step(0.5, true);
        assert_eq!(e.base_position(), Vec3::new(1.0, 0.0, 0.0));
        let msgs = e.take_messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].datastring[0], AO_CMD_SET_PROPERTIES);
        assert!(msgs[0].reliable);
        assert_eq!(msgs[1].datastring[0], AO_CMD_UPDATE_POSITION);
        assert!(!msgs[1].reliable);
        assert_eq!(msgs[1].id, 3);

        // No movement, nothing to say
        e.velocity = Vec3::ZERO;
        e.last_sent_velocity = Vec3::ZERO;
        e.last_sent_move_precision = 0.0;
        e.step(0.1, true);
        assert!(e.take_messages().is_empty());
    }

    #[test]
    fn test_punch_kills() {
        let mut e = EntityObject::new(Vec3::ZERO, "test:ball", "");
        e.hp = 5;
        assert_eq!(e.punch(Vec3::X, 3, None), 2);
        assert!(!e.is_gone());
        assert_eq!(e.punch(Vec3::X, 3, None), 0);
        assert!(e.is_gone());
        let msgs = e.take_messages();
        assert!(msgs.iter().all(|m| m.datastring[0] == AO_CMD_PUNCHED));
    }

    #[test]
    fn test_attach_and_detach_link_both_sides() {
        let mut m = ActiveObjectManager::new();
        let parent = m.register(entity(Vec3::ZERO)).unwrap();
        let child = m.register(entity(Vec3::ONE)).unwrap();
        assert!(!m.attach(child, child, "", Vec3::ZERO, Vec3::ZERO, false));
        assert!(m.attach(child, parent, "Head", Vec3::ZERO, Vec3::ZERO, false));
        assert!(m.get(parent).unwrap().attachment_children().contains(&child));
        assert_eq!(m.get(child).unwrap().attachment().unwrap().parent, parent);

        assert!(m.detach(child));
        assert!(!m.detach(child));
        assert!(m.get(parent).unwrap().attachment_children().is_empty());
        let msgs = m.get_mut(child).unwrap().take_messages();
        assert_eq!(msgs.len(), 2);
        assert!(msgs.iter().all(|msg| msg.datastring[0] == AO_CMD_ATTACH_TO));
    }

    #[test]
    fn test_added_and_removed_around_pos() {
        let mut m = ActiveObjectManager::new();
        let near = m.register(entity(Vec3::new(5.0, 0.0, 0.0))).unwrap();
        let far = m.register(entity(Vec3::new(50.0, 0.0, 0.0))).unwrap();
        let mut known = HashSet::new();
        assert_eq!(m.get_added_active_objects_around_pos(Vec3::ZERO, 10.0, 0.0, &known), vec![near]);
        assert_eq!(m.get_objects_inside_radius(Vec3::ZERO, 100.0, |_| true).len(), 2);

        known.insert(near);
        known.insert(far);
        known.insert(999);
        assert_eq!(m.get_removed_active_objects_around_pos(Vec3::ZERO, 10.0, 0.0, &known), vec![far, 999]);
        m.get_mut(near).unwrap().mark_for_removal();
        assert!(m.get_removed_active_objects_around_pos(Vec3::ZERO, 10.0, 0.0, &known).contains(&near));
    }
}
