//! Wire commands projecting active object state to observers
//!
//! Every command is a byte string: the opcode, then its fields in
//! big-endian order. Transport is somebody else's problem; the environment
//! only queues `ActiveObjectMessage`s.

use std::collections::BTreeMap;

use crate::core::types::{IVec2, Vec3};
use crate::math::Aabb;
use crate::util::serialize::{
    serialize_string16, write_f32, write_i16, write_u16, write_u8, write_v3f32,
};

pub const AO_CMD_SET_PROPERTIES: u8 = 0;
pub const AO_CMD_UPDATE_POSITION: u8 = 1;
pub const AO_CMD_SET_TEXTURE_MOD: u8 = 2;
pub const AO_CMD_SET_SPRITE: u8 = 3;
pub const AO_CMD_PUNCHED: u8 = 4;
pub const AO_CMD_UPDATE_ARMOR_GROUPS: u8 = 5;
pub const AO_CMD_SET_ANIMATION: u8 = 6;
pub const AO_CMD_SET_BONE_POSITION: u8 = 7;
pub const AO_CMD_ATTACH_TO: u8 = 8;
pub const AO_CMD_SET_ANIMATION_SPEED: u8 = 12;

/// Visual and physical properties sent with `SET_PROPERTIES`
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectProperties {
    pub hp_max: u16,
    pub physical: bool,
    pub collide_with_objects: bool,
    pub collision_box: Aabb,
    pub selection_box: Aabb,
    pub pointable: bool,
    pub visual: String,
    pub visual_size: Vec3,
    pub textures: Vec<String>,
    pub is_visible: bool,
    pub makes_footstep_sound: bool,
    pub automatic_rotate: f32,
    pub stepheight: f32,
    pub nametag: String,
    pub static_save: bool,
}

impl Default for ObjectProperties {
    fn default() -> Self {
        let b = Aabb::full_node();
        Self {
            hp_max: 1,
            physical: false,
            collide_with_objects: true,
            collision_box: b,
            selection_box: b,
            pointable: true,
            visual: "sprite".to_string(),
            visual_size: Vec3::ONE,
            textures: Vec::new(),
            is_visible: true,
            makes_footstep_sound: false,
            automatic_rotate: 0.0,
            stepheight: 0.0,
            nametag: String::new(),
            static_save: true,
        }
    }
}

fn write_aabb(out: &mut Vec<u8>, b: &Aabb) {
    write_v3f32(out, b.min);
    write_v3f32(out, b.max);
}

impl ObjectProperties {
    pub fn serialize(&self, out: &mut Vec<u8>) {
        write_u8(out, 4);
        write_u16(out, self.hp_max);
        write_u8(out, self.physical as u8);
        write_u8(out, self.collide_with_objects as u8);
        write_aabb(out, &self.collision_box);
        write_aabb(out, &self.selection_box);
        write_u8(out, self.pointable as u8);
        serialize_string16(out, self.visual.as_bytes());
        write_v3f32(out, self.visual_size);
        write_u16(out, self.textures.len().min(u16::MAX as usize) as u16);
        for t in self.textures.iter().take(u16::MAX as usize) {
            serialize_string16(out, t.as_bytes());
        }
        write_u8(out, self.is_visible as u8);
        write_u8(out, self.makes_footstep_sound as u8);
        write_f32(out, self.automatic_rotate);
        write_f32(out, self.stepheight);
        serialize_string16(out, self.nametag.as_bytes());
        write_u8(out, self.static_save as u8);
    }
}

/// One state change of an active object
#[derive(Clone, Debug, PartialEq)]
pub enum ActiveObjectCommand {
    SetProperties(ObjectProperties),
    UpdatePosition {
        position: Vec3,
        velocity: Vec3,
        acceleration: Vec3,
        rotation: Vec3,
        do_interpolate: bool,
        is_movement_end: bool,
        update_interval: f32,
    },
    SetTextureMod(String),
    SetSprite {
        start_frame: IVec2,
        num_frames: u16,
        framelength: f32,
        select_horiz_by_yawpitch: bool,
    },
    Punched {
        hp: u16,
    },
    UpdateArmorGroups(BTreeMap<String, i16>),
    SetAnimation {
        frames: glam::Vec2,
        frame_speed: f32,
        frame_blend: f32,
        frame_loop: bool,
    },
    SetAnimationSpeed(f32),
    SetBonePosition {
        bone: String,
        position: Vec3,
        rotation: Vec3,
    },
    AttachTo {
        parent_id: u16,
        bone: String,
        position: Vec3,
        rotation: Vec3,
        force_visible: bool,
    },
}

impl ActiveObjectCommand {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::SetProperties(_) => AO_CMD_SET_PROPERTIES,
            Self::UpdatePosition { .. } => AO_CMD_UPDATE_POSITION,
            Self::SetTextureMod(_) => AO_CMD_SET_TEXTURE_MOD,
            Self::SetSprite { .. } => AO_CMD_SET_SPRITE,
            Self::Punched { .. } => AO_CMD_PUNCHED,
            Self::UpdateArmorGroups(_) => AO_CMD_UPDATE_ARMOR_GROUPS,
            Self::SetAnimation { .. } => AO_CMD_SET_ANIMATION,
            Self::SetAnimationSpeed(_) => AO_CMD_SET_ANIMATION_SPEED,
            Self::SetBonePosition { .. } => AO_CMD_SET_BONE_POSITION,
            Self::AttachTo { .. } => AO_CMD_ATTACH_TO,
        }
    }

    /// Opcode followed by the command fields
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u8(&mut out, self.opcode());
        match self {
            Self::SetProperties(props) => props.serialize(&mut out),
            Self::UpdatePosition {
                position,
                velocity,
                acceleration,
                rotation,
                do_interpolate,
                is_movement_end,
                update_interval,
            } => {
                write_v3f32(&mut out, *position);
                write_v3f32(&mut out, *velocity);
                write_v3f32(&mut out, *acceleration);
                write_v3f32(&mut out, *rotation);
                write_u8(&mut out, *do_interpolate as u8);
                write_u8(&mut out, *is_movement_end as u8);
                write_f32(&mut out, *update_interval);
            }
            Self::SetTextureMod(m) => serialize_string16(&mut out, m.as_bytes()),
            Self::SetSprite { start_frame, num_frames, framelength, select_horiz_by_yawpitch } => {
                write_i16(&mut out, start_frame.x as i16);
                write_i16(&mut out, start_frame.y as i16);
                write_u16(&mut out, *num_frames);
                write_f32(&mut out, *framelength);
                write_u8(&mut out, *select_horiz_by_yawpitch as u8);
            }
            Self::Punched { hp } => write_u16(&mut out, *hp),
            Self::UpdateArmorGroups(groups) => {
                write_u16(&mut out, groups.len() as u16);
                for (name, rating) in groups {
                    serialize_string16(&mut out, name.as_bytes());
                    write_i16(&mut out, *rating);
                }
            }
            Self::SetAnimation { frames, frame_speed, frame_blend, frame_loop } => {
                write_f32(&mut out, frames.x);
                write_f32(&mut out, frames.y);
                write_f32(&mut out, *frame_speed);
                write_f32(&mut out, *frame_blend);
                // Stored inverted: 0 means looping
                write_u8(&mut out, !*frame_loop as u8);
            }
            Self::SetAnimationSpeed(speed) => write_f32(&mut out, *speed),
            Self::SetBonePosition { bone, position, rotation } => {
                serialize_string16(&mut out, bone.as_bytes());
                write_v3f32(&mut out, *position);
                write_v3f32(&mut out, *rotation);
            }
            Self::AttachTo { parent_id, bone, position, rotation, force_visible } => {
                write_i16(&mut out, *parent_id as i16);
                serialize_string16(&mut out, bone.as_bytes());
                write_v3f32(&mut out, *position);
                write_v3f32(&mut out, *rotation);
                write_u8(&mut out, *force_visible as u8);
            }
        }
        out
    }
}

/// Serialized command addressed to the observers of object `id`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveObjectMessage {
    pub id: u16,
    /// Must be delivered, as opposed to position updates that may be dropped
    pub reliable: bool,
    pub datastring: Vec<u8>,
}

impl ActiveObjectMessage {
    pub fn new(id: u16, reliable: bool, command: &ActiveObjectCommand) -> Self {
        Self { id, reliable, datastring: command.serialize() }
    }
}
