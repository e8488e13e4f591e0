//! Node definition table
//!
//! `NodeDefManager` maps content ids to `ContentFeatures` and names to ids.
//! Ids 125..=127 are reserved for the built-in unknown/air/ignore nodes.

use std::collections::HashMap;

use crate::math::Aabb;
use crate::core::types::Vec3;
use super::node::{CONTENT_AIR, CONTENT_IGNORE, CONTENT_UNKNOWN, MapNode};

/// Highest id the table will hand out
pub const MAX_REGISTERED_CONTENT: u16 = 0x7fff;

/// How `param1` is interpreted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ParamType {
    #[default]
    None,
    /// param1 holds day (low nibble) and night (high nibble) light
    Light,
}

/// How `param2` is interpreted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ParamType2 {
    #[default]
    None,
    Full,
    FlowingLiquid,
    FaceDir,
    WallMounted,
    Leveled,
    DegRotate,
    MeshOptions,
    Color,
    ColorFaceDir,
    ColorWallMounted,
    GlassLikeLiquidLevel,
    ColorDegRotate,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LiquidType {
    #[default]
    None,
    Flowing,
    Source,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DrawType {
    #[default]
    Normal,
    AirLike,
    Liquid,
    FlowingLiquid,
    GlassLike,
    AllFaces,
    TorchLike,
    PlantLike,
    NodeBox,
}

/// Shape description used for node, collision and selection boxes
#[derive(Clone, Debug, Default, PartialEq)]
pub enum NodeBox {
    /// Full cube
    #[default]
    Regular,
    /// Fixed list of boxes, rotated by facedir
    Fixed(Vec<Aabb>),
    /// Different boxes depending on the mounted side
    WallMounted { top: Aabb, bottom: Aabb, side: Aabb },
    /// First box height follows the node level
    Leveled(Vec<Aabb>),
    /// Fixed part plus one optional part per connected face
    /// (order +y, -y, -z, -x, +z, +x)
    Connected { fixed: Vec<Aabb>, connect: [Vec<Aabb>; 6] },
}

/// Properties of one content id
#[derive(Clone, Debug)]
pub struct ContentFeatures {
    pub name: String,
    pub groups: HashMap<String, i32>,
    pub param_type: ParamType,
    pub param_type2: ParamType2,
    pub drawtype: DrawType,
    /// Mapgen may replace this node (caves, dungeons)
    pub is_ground_content: bool,
    pub walkable: bool,
    pub pointable: bool,
    pub buildable_to: bool,
    /// Liquids may flow into this node
    pub floodable: bool,
    pub light_propagates: bool,
    pub sunlight_propagates: bool,
    /// Emitted light level, 0..=LIGHT_MAX
    pub light_source: u8,
    pub liquid_type: LiquidType,
    pub liquid_alternative_flowing: String,
    pub liquid_alternative_source: String,
    pub liquid_alternative_flowing_id: u16,
    pub liquid_alternative_source_id: u16,
    pub liquid_viscosity: u8,
    pub liquid_range: u8,
    pub liquid_renewable: bool,
    /// Initial level for leveled nodes
    pub leveled: u8,
    pub leveled_max: u8,
    pub node_box: NodeBox,
    pub collision_box: Option<NodeBox>,
    pub selection_box: Option<NodeBox>,
    /// Names or `group:` entries this node's connected box links to
    pub connects_to: Vec<String>,
    /// Bitmask of sides allowed to connect (+y,-y,-z,-x,+z,+x)
    pub connect_sides: u8,
    /// Blocks older than format 22 kept the facing in param1
    pub legacy_facedir_simple: bool,
    /// Blocks older than format 22 kept the wall as a one-hot bit in param2
    pub legacy_wallmounted: bool,
}

impl Default for ContentFeatures {
    fn default() -> Self {
        Self {
            name: String::new(),
            groups: HashMap::new(),
            param_type: ParamType::None,
            param_type2: ParamType2::None,
            drawtype: DrawType::Normal,
            is_ground_content: false,
            walkable: true,
            pointable: true,
            buildable_to: false,
            floodable: false,
            light_propagates: false,
            sunlight_propagates: false,
            light_source: 0,
            liquid_type: LiquidType::None,
            liquid_alternative_flowing: String::new(),
            liquid_alternative_source: String::new(),
            liquid_alternative_flowing_id: CONTENT_IGNORE,
            liquid_alternative_source_id: CONTENT_IGNORE,
            liquid_viscosity: 0,
            liquid_range: 8,
            liquid_renewable: true,
            leveled: 0,
            leveled_max: 127,
            node_box: NodeBox::Regular,
            collision_box: None,
            selection_box: None,
            connects_to: Vec::new(),
            connect_sides: 0x3f,
            legacy_facedir_simple: false,
            legacy_wallmounted: false,
        }
    }
}

impl ContentFeatures {
    /// Plain opaque cube with the given name
    pub fn solid(name: &str) -> Self {
        Self { name: name.to_string(), ..Default::default() }
    }

    /// Air-like node that lets all light through
    pub fn airlike(name: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: ParamType::Light,
            drawtype: DrawType::AirLike,
            walkable: false,
            pointable: false,
            buildable_to: true,
            floodable: true,
            light_propagates: true,
            sunlight_propagates: true,
            ..Default::default()
        }
    }

    pub fn with_group(mut self, group: &str, rating: i32) -> Self {
        self.groups.insert(group.to_string(), rating);
        self
    }

    pub fn group(&self, group: &str) -> i32 {
        self.groups.get(group).copied().unwrap_or(0)
    }

    pub fn is_liquid(&self) -> bool {
        self.liquid_type != LiquidType::None
    }

    /// Light can pass through in some form
    pub fn light_passes(&self) -> bool {
        self.light_propagates || self.sunlight_propagates
    }

    pub fn lighting_flags(&self) -> LightingFlags {
        LightingFlags {
            has_light: self.param_type == ParamType::Light,
            light_propagates: self.light_propagates,
            sunlight_propagates: self.sunlight_propagates,
            light_source: self.light_source,
        }
    }
}

/// The subset of features the lighting engine looks at. Swapping a node for
/// one with equal flags needs no light update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LightingFlags {
    pub has_light: bool,
    pub light_propagates: bool,
    pub sunlight_propagates: bool,
    pub light_source: u8,
}

/// Content id table with name resolution and dummy allocation
#[derive(Clone, Debug)]
pub struct NodeDefManager {
    features: Vec<ContentFeatures>,
    name_to_id: HashMap<String, u16>,
    aliases: HashMap<String, String>,
    next_id: u16,
}

impl NodeDefManager {
    /// Table containing only the built-in nodes
    pub fn new() -> Self {
        let mut mgr = Self {
            features: Vec::new(),
            name_to_id: HashMap::new(),
            aliases: HashMap::new(),
            next_id: 0,
        };
        mgr.set_at(CONTENT_UNKNOWN, ContentFeatures::solid("unknown"));
        mgr.set_at(CONTENT_AIR, ContentFeatures::airlike("air"));
        let mut ignore = ContentFeatures::airlike("ignore");
        ignore.param_type = ParamType::None;
        ignore.floodable = false;
        ignore.buildable_to = false;
        ignore.light_propagates = false;
        ignore.sunlight_propagates = false;
        mgr.set_at(CONTENT_IGNORE, ignore);
        mgr
    }

    fn set_at(&mut self, id: u16, f: ContentFeatures) {
        let idx = id as usize;
        if self.features.len() <= idx {
            self.features.resize_with(idx + 1, ContentFeatures::default);
        }
        self.name_to_id.insert(f.name.clone(), id);
        self.features[idx] = f;
    }

    fn allocate_id(&mut self) -> Option<u16> {
        while self.next_id <= MAX_REGISTERED_CONTENT {
            let id = self.next_id;
            self.next_id += 1;
            if id == CONTENT_UNKNOWN || id == CONTENT_AIR || id == CONTENT_IGNORE {
                continue;
            }
            return Some(id);
        }
        None
    }

    /// Register a node; re-registering an existing name overrides it in place
    pub fn register(&mut self, f: ContentFeatures) -> u16 {
        if let Some(&id) = self.name_to_id.get(&f.name) {
            self.set_at(id, f);
            self.resolve_liquid_alternatives();
            return id;
        }
        let Some(id) = self.allocate_id() else {
            log::error!("Node table full, cannot register '{}'", f.name);
            return CONTENT_UNKNOWN;
        };
        self.set_at(id, f);
        self.resolve_liquid_alternatives();
        id
    }

    /// Register a placeholder for a name referenced by stored data but not
    /// defined here. Returns `None` when the id space is exhausted.
    pub fn allocate_dummy(&mut self, name: &str) -> Option<u16> {
        if let Some(&id) = self.name_to_id.get(name) {
            return Some(id);
        }
        let id = self.allocate_id()?;
        log::debug!("Allocated dummy id {} for unknown node '{}'", id, name);
        self.set_at(id, ContentFeatures::solid(name));
        Some(id)
    }

    pub fn set_alias(&mut self, alias: &str, name: &str) {
        self.aliases.insert(alias.to_string(), name.to_string());
    }

    /// Features for an id; unregistered ids resolve to the unknown node
    pub fn get(&self, c: u16) -> &ContentFeatures {
        self.features
            .get(c as usize)
            .filter(|f| !f.name.is_empty())
            .unwrap_or(&self.features[CONTENT_UNKNOWN as usize])
    }

    pub fn get_node(&self, n: MapNode) -> &ContentFeatures {
        self.get(n.content())
    }

    /// Resolve a name (following one alias hop)
    pub fn get_id(&self, name: &str) -> Option<u16> {
        if let Some(&id) = self.name_to_id.get(name) {
            return Some(id);
        }
        let target = self.aliases.get(name)?;
        self.name_to_id.get(target).copied()
    }

    /// Resolve a name or `group:<name>` to every matching id
    pub fn get_ids(&self, name: &str) -> Vec<u16> {
        if let Some(group) = name.strip_prefix("group:") {
            let mut ids: Vec<u16> = self
                .features
                .iter()
                .enumerate()
                .filter(|(_, f)| !f.name.is_empty() && f.group(group) != 0)
                .map(|(i, _)| i as u16)
                .collect();
            ids.sort_unstable();
            ids
        } else {
            self.get_id(name).into_iter().collect()
        }
    }

    pub fn name_of(&self, c: u16) -> &str {
        &self.get(c).name
    }

    /// Highest id slot in use plus one
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    fn resolve_liquid_alternatives(&mut self) {
        for i in 0..self.features.len() {
            let (fl, src) = {
                let f = &self.features[i];
                (
                    self.name_to_id.get(&f.liquid_alternative_flowing).copied(),
                    self.name_to_id.get(&f.liquid_alternative_source).copied(),
                )
            };
            let f = &mut self.features[i];
            f.liquid_alternative_flowing_id = fl.unwrap_or(CONTENT_IGNORE);
            f.liquid_alternative_source_id = src.unwrap_or(CONTENT_IGNORE);
        }
    }

    /// Whether a connected node box on `from` links to `to` across `face`
    /// (bit in +y,-y,-z,-x,+z,+x order)
    pub fn nodebox_connects(&self, from: MapNode, to: MapNode, face: u8) -> bool {
        let f = self.get_node(from);
        if !matches!(f.node_box, NodeBox::Connected { .. }) || f.connect_sides & face == 0 {
            return false;
        }
        let t = self.get_node(to);
        f.connects_to.iter().any(|entry| match entry.strip_prefix("group:") {
            Some(group) => t.group(group) != 0,
            None => *entry == t.name,
        })
    }

    /// Table with a representative content set and the `mapgen_*` aliases
    pub fn with_default_content() -> Self {
        let mut m = Self::new();

        let ground = |name: &str| {
            let mut f = ContentFeatures::solid(name);
            f.is_ground_content = true;
            f
        };
        m.register(ground("default:stone").with_group("cracky", 3).with_group("stone", 1));
        m.register(ground("default:desert_stone").with_group("cracky", 3).with_group("stone", 1));
        m.register(ground("default:dirt").with_group("crumbly", 3).with_group("soil", 1));
        m.register(ground("default:dirt_with_grass").with_group("crumbly", 3).with_group("soil", 1));
        m.register(ground("default:dirt_with_snow").with_group("crumbly", 3));
        m.register(ground("default:sand").with_group("crumbly", 3).with_group("falling_node", 1));
        m.register(ground("default:desert_sand").with_group("crumbly", 3).with_group("falling_node", 1));
        m.register(ground("default:gravel").with_group("crumbly", 2).with_group("falling_node", 1));
        m.register(ground("default:snowblock").with_group("crumbly", 3));
        m.register(ground("default:ice").with_group("cracky", 3));
        m.register(ContentFeatures::solid("default:cobble").with_group("cracky", 3));
        m.register(ContentFeatures::solid("default:mossycobble").with_group("cracky", 3));
        m.register(ContentFeatures::solid("default:tree").with_group("tree", 1));
        m.register(ContentFeatures::solid("default:jungletree").with_group("tree", 1));
        m.register(ContentFeatures::solid("default:pine_tree").with_group("tree", 1));

        let leaves = |name: &str| ContentFeatures {
            name: name.to_string(),
            param_type: ParamType::Light,
            drawtype: DrawType::AllFaces,
            light_propagates: true,
            ..Default::default()
        }
        .with_group("leaves", 1);
        m.register(leaves("default:leaves"));
        m.register(leaves("default:jungleleaves"));
        m.register(leaves("default:pine_needles"));

        let plant = |name: &str| ContentFeatures {
            name: name.to_string(),
            param_type: ParamType::Light,
            drawtype: DrawType::PlantLike,
            walkable: false,
            buildable_to: true,
            floodable: true,
            light_propagates: true,
            sunlight_propagates: true,
            ..Default::default()
        };
        m.register(plant("default:apple"));
        m.register(plant("default:junglegrass").with_group("flora", 1));
        m.register(plant("default:grass").with_group("flora", 1));

        m.register(ContentFeatures {
            name: "default:snow".to_string(),
            param_type: ParamType::Light,
            param_type2: ParamType2::Leveled,
            drawtype: DrawType::NodeBox,
            buildable_to: true,
            floodable: true,
            light_propagates: true,
            sunlight_propagates: true,
            leveled: 8,
            leveled_max: 64,
            node_box: NodeBox::Leveled(vec![Aabb::new(Vec3::splat(-0.5), Vec3::new(0.5, -0.25, 0.5))]),
            ..Default::default()
        });

        let stair = |name: &str| ContentFeatures {
            name: name.to_string(),
            param_type: ParamType::Light,
            param_type2: ParamType2::FaceDir,
            drawtype: DrawType::NodeBox,
            node_box: NodeBox::Fixed(vec![
                Aabb::new(Vec3::splat(-0.5), Vec3::new(0.5, 0.0, 0.5)),
                Aabb::new(Vec3::new(-0.5, 0.0, 0.0), Vec3::splat(0.5)),
            ]),
            ..Default::default()
        }
        .with_group("stair", 1);
        m.register(stair("stairs:stair_cobble"));
        m.register(stair("stairs:stair_desert_stone"));

        let liquid = |name: &str, source: bool, base: &str, light: u8, visc: u8, renewable: bool| ContentFeatures {
            name: name.to_string(),
            param_type: ParamType::Light,
            param_type2: if source { ParamType2::None } else { ParamType2::FlowingLiquid },
            drawtype: if source { DrawType::Liquid } else { DrawType::FlowingLiquid },
            walkable: false,
            pointable: false,
            buildable_to: true,
            light_propagates: true,
            light_source: light,
            liquid_type: if source { LiquidType::Source } else { LiquidType::Flowing },
            liquid_alternative_flowing: format!("{}_flowing", base),
            liquid_alternative_source: format!("{}_source", base),
            liquid_viscosity: visc,
            liquid_renewable: renewable,
            ..Default::default()
        }
        .with_group("liquid", 3);
        m.register(liquid("default:water_source", true, "default:water", 0, 1, true).with_group("water", 3));
        m.register(liquid("default:water_flowing", false, "default:water", 0, 1, true).with_group("water", 3));
        m.register(liquid("default:lava_source", true, "default:lava", 13, 7, false).with_group("lava", 3));
        m.register(liquid("default:lava_flowing", false, "default:lava", 13, 7, false).with_group("lava", 3));

        m.register(ContentFeatures {
            name: "default:torch".to_string(),
            param_type: ParamType::Light,
            param_type2: ParamType2::WallMounted,
            drawtype: DrawType::TorchLike,
            walkable: false,
            floodable: true,
            light_propagates: true,
            sunlight_propagates: true,
            light_source: 13,
            legacy_wallmounted: true,
            node_box: NodeBox::WallMounted {
                top: Aabb::new(Vec3::new(-0.1, 0.0, -0.1), Vec3::new(0.1, 0.5, 0.1)),
                bottom: Aabb::new(Vec3::new(-0.1, -0.5, -0.1), Vec3::new(0.1, 0.0, 0.1)),
                side: Aabb::new(Vec3::new(-0.5, -0.3, -0.1), Vec3::new(-0.3, 0.3, 0.1)),
            },
            ..Default::default()
        });
        m.register(ContentFeatures {
            param_type: ParamType::Light,
            light_source: 14,
            ..ContentFeatures::solid("default:mese_lamp")
        });
        m.register(ContentFeatures {
            name: "default:glass".to_string(),
            param_type: ParamType::Light,
            drawtype: DrawType::GlassLike,
            light_propagates: true,
            sunlight_propagates: true,
            ..Default::default()
        });

        let post = Aabb::new(Vec3::new(-0.125, -0.5, -0.125), Vec3::new(0.125, 0.5, 0.125));
        m.register(ContentFeatures {
            name: "default:fence_wood".to_string(),
            param_type: ParamType::Light,
            drawtype: DrawType::NodeBox,
            light_propagates: true,
            sunlight_propagates: true,
            node_box: NodeBox::Connected {
                fixed: vec![post],
                connect: [
                    vec![],
                    vec![],
                    vec![Aabb::new(Vec3::new(-0.06, 0.25, -0.5), Vec3::new(0.06, 0.4, -0.125))],
                    vec![Aabb::new(Vec3::new(-0.5, 0.25, -0.06), Vec3::new(-0.125, 0.4, 0.06))],
                    vec![Aabb::new(Vec3::new(-0.06, 0.25, 0.125), Vec3::new(0.06, 0.4, 0.5))],
                    vec![Aabb::new(Vec3::new(0.125, 0.25, -0.06), Vec3::new(0.5, 0.4, 0.06))],
                ],
            },
            connects_to: vec!["group:fence".to_string(), "group:tree".to_string()],
            ..Default::default()
        }
        .with_group("fence", 1));

        m.register(ground("default:stone_with_coal").with_group("cracky", 3));
        m.register(ground("default:stone_with_iron").with_group("cracky", 2));

        for (alias, name) in [
            ("mapgen_stone", "default:stone"),
            ("mapgen_dirt", "default:dirt"),
            ("mapgen_dirt_with_grass", "default:dirt_with_grass"),
            ("mapgen_sand", "default:sand"),
            ("mapgen_water_source", "default:water_source"),
            ("mapgen_lava_source", "default:lava_source"),
            ("mapgen_gravel", "default:gravel"),
            ("mapgen_desert_stone", "default:desert_stone"),
            ("mapgen_desert_sand", "default:desert_sand"),
            ("mapgen_dirt_with_snow", "default:dirt_with_snow"),
            ("mapgen_snow", "default:snow"),
            ("mapgen_snowblock", "default:snowblock"),
            ("mapgen_ice", "default:ice"),
            ("mapgen_cobble", "default:cobble"),
            ("mapgen_mossycobble", "default:mossycobble"),
            ("mapgen_stair_cobble", "stairs:stair_cobble"),
            ("mapgen_stair_desert_stone", "stairs:stair_desert_stone"),
            ("mapgen_tree", "default:tree"),
            ("mapgen_jungletree", "default:jungletree"),
            ("mapgen_pine_tree", "default:pine_tree"),
            ("mapgen_leaves", "default:leaves"),
            ("mapgen_jungleleaves", "default:jungleleaves"),
            ("mapgen_pine_needles", "default:pine_needles"),
            ("mapgen_apple", "default:apple"),
            ("mapgen_junglegrass", "default:junglegrass"),
        ] {
            m.set_alias(alias, name);
        }
        m
    }
}

impl Default for NodeDefManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_ids() {
        let m = NodeDefManager::new();
        assert_eq!(m.get_id("air"), Some(CONTENT_AIR));
        assert_eq!(m.get_id("ignore"), Some(CONTENT_IGNORE));
        assert_eq!(m.get_id("unknown"), Some(CONTENT_UNKNOWN));
        assert!(m.get(CONTENT_AIR).sunlight_propagates);
        // Unregistered ids resolve to unknown
        assert_eq!(m.get(5000).name, "unknown");
    }

    #[test]
    fn test_register_skips_reserved() {
        let mut m = NodeDefManager::new();
        let mut ids = Vec::new();
        for i in 0..130 {
            ids.push(m.register(ContentFeatures::solid(&format!("test:n{}", i))));
        }
        assert!(!ids.contains(&CONTENT_AIR));
        assert!(!ids.contains(&CONTENT_IGNORE));
        assert!(!ids.contains(&CONTENT_UNKNOWN));
        assert_eq!(m.get_id("test:n129"), Some(ids[129]));
    }

    #[test]
    fn test_aliases_and_groups() {
        let m = NodeDefManager::with_default_content();
        assert_eq!(m.get_id("mapgen_stone"), m.get_id("default:stone"));
        assert_eq!(m.get_id("mapgen_nonexistent"), None);
        let trees = m.get_ids("group:tree");
        assert_eq!(trees.len(), 3);
        assert!(trees.contains(&m.get_id("default:jungletree").unwrap()));
    }

    #[test]
    fn test_liquid_alternatives_resolved() {
        let m = NodeDefManager::with_default_content();
        let src = m.get_id("default:water_source").unwrap();
        let flowing = m.get_id("default:water_flowing").unwrap();
        assert_eq!(m.get(src).liquid_alternative_flowing_id, flowing);
        assert_eq!(m.get(flowing).liquid_alternative_source_id, src);
    }

    #[test]
    fn test_dummy_allocation() {
        let mut m = NodeDefManager::new();
        let id = m.allocate_dummy("mod:missing").unwrap();
        assert_eq!(m.get_id("mod:missing"), Some(id));
        assert_eq!(m.allocate_dummy("mod:missing"), Some(id));
    }

    #[test]
    fn test_nodebox_connects() {
        let m = NodeDefManager::with_default_content();
        let fence = MapNode::new(m.get_id("default:fence_wood").unwrap());
        let tree = MapNode::new(m.get_id("default:tree").unwrap());
        let stone = MapNode::new(m.get_id("default:stone").unwrap());
        assert!(m.nodebox_connects(fence, tree, 1 << 5));
        assert!(m.nodebox_connects(fence, fence, 1 << 2));
        assert!(!m.nodebox_connects(fence, stone, 1 << 2));
        assert!(!m.nodebox_connects(stone, fence, 1 << 2));
    }
}
