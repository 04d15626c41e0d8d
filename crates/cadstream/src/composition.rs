//! Scene composition for styled rendering.
//!
//! Loaded sector geometry lives here once, behind an `Arc`. Styling a node
//! only moves its sector between membership sets; buffers are never copied.
//! The provider can present one combined scene, or split it into the four
//! sub-scenes the renderer draws in separate passes:
//!
//! - **Normal**: default and highlighted geometry
//! - **In front**: highlighted geometry drawn on top of everything
//! - **Ghost**: ghosted geometry drawn translucent
//! - **Custom**: user-added objects

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use cadstream_decode::SectorGeometry;

use crate::coords::Aabb;
use crate::metadata::{LevelOfDetail, ModelId, SectorKey};

/// How a model node (tree index) is drawn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RenderStyle {
    #[default]
    Default,
    Highlighted {
        color: [u8; 4],
        in_front: bool,
    },
    Ghosted,
    Hidden,
}

/// One of the split sub-scenes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Normal,
    InFront,
    Ghost,
    Custom,
}

impl Layer {
    fn of(style: RenderStyle) -> Option<Self> {
        match style {
            RenderStyle::Default | RenderStyle::Highlighted { in_front: false, .. } => {
                Some(Self::Normal)
            }
            RenderStyle::Highlighted { in_front: true, .. } => Some(Self::InFront),
            RenderStyle::Ghosted => Some(Self::Ghost),
            RenderStyle::Hidden => None,
        }
    }
}

/// A user-added object that only lives in the custom sub-scene.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomObject {
    pub bounds: Aabb,
    pub color: [u8; 4],
}

#[derive(Debug)]
struct SceneSector {
    lod: LevelOfDetail,
    geometry: Arc<SectorGeometry>,
    nodes: BTreeSet<u32>,
}

type NodeKey = (ModelId, u32);

/// Owns the renderable set of sectors and their sub-scene membership.
#[derive(Debug, Default)]
pub struct SceneComponentsProvider {
    sectors: HashMap<SectorKey, SceneSector>,
    styles: HashMap<NodeKey, RenderStyle>,
    node_sectors: HashMap<NodeKey, HashSet<SectorKey>>,
    members: HashMap<Layer, HashSet<SectorKey>>,
    custom: BTreeMap<String, CustomObject>,
    split: bool,
}

impl SceneComponentsProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a sector renderable, replacing any previous geometry for it.
    pub fn add_sector(&mut self, key: SectorKey, lod: LevelOfDetail, geometry: Arc<SectorGeometry>) {
        self.remove_sector(key);
        let nodes = geometry.tree_indices();
        for &node in &nodes {
            self.node_sectors
                .entry((key.model, node))
                .or_default()
                .insert(key);
        }
        self.sectors.insert(
            key,
            SceneSector {
                lod,
                geometry,
                nodes,
            },
        );
        self.refresh_membership(key);
    }

    /// Drop a sector from every sub-scene. Returns whether it was present.
    pub fn remove_sector(&mut self, key: SectorKey) -> bool {
        let Some(sector) = self.sectors.remove(&key) else {
            return false;
        };
        for node in sector.nodes {
            let node_key = (key.model, node);
            if let Some(keys) = self.node_sectors.get_mut(&node_key) {
                keys.remove(&key);
                if keys.is_empty() {
                    self.node_sectors.remove(&node_key);
                }
            }
        }
        for members in self.members.values_mut() {
            members.remove(&key);
        }
        true
    }

    /// Drop all sectors and styles of a model.
    pub fn remove_model(&mut self, model: ModelId) {
        let keys: Vec<SectorKey> = self
            .sectors
            .keys()
            .filter(|key| key.model == model)
            .copied()
            .collect();
        for key in keys {
            self.remove_sector(key);
        }
        self.styles.retain(|(m, _), _| *m != model);
    }

    #[must_use]
    pub fn style(&self, model: ModelId, tree_index: u32) -> RenderStyle {
        self.styles
            .get(&(model, tree_index))
            .copied()
            .unwrap_or_default()
    }

    /// Style a node. Only the sectors containing it change membership.
    pub fn set_style(&mut self, model: ModelId, tree_index: u32, style: RenderStyle) {
        let node = (model, tree_index);
        if style == RenderStyle::Default {
            self.styles.remove(&node);
        } else {
            self.styles.insert(node, style);
        }
        let affected: Vec<SectorKey> = self
            .node_sectors
            .get(&node)
            .map(|keys| keys.iter().copied().collect())
            .unwrap_or_default();
        for key in affected {
            self.refresh_membership(key);
        }
    }

    /// Reset every node of `model` to the default style.
    pub fn clear_styles(&mut self, model: ModelId) {
        let nodes: Vec<u32> = self
            .styles
            .keys()
            .filter(|(m, _)| *m == model)
            .map(|(_, node)| *node)
            .collect();
        for node in nodes {
            self.set_style(model, node, RenderStyle::Default);
        }
    }

    fn refresh_membership(&mut self, key: SectorKey) {
        let Some(sector) = self.sectors.get(&key) else {
            return;
        };
        let mut layers = HashSet::new();
        if sector.nodes.is_empty() {
            layers.insert(Layer::Normal);
        }
        for &node in &sector.nodes {
            if let Some(layer) = Layer::of(self.style(key.model, node)) {
                layers.insert(layer);
            }
        }
        for layer in [Layer::Normal, Layer::InFront, Layer::Ghost] {
            let members = self.members.entry(layer).or_default();
            if layers.contains(&layer) {
                members.insert(key);
            } else {
                members.remove(&key);
            }
        }
    }

    /// Present the four sub-scenes separately.
    pub fn split_scene(&mut self) {
        self.split = true;
    }

    /// Present one combined scene again.
    pub fn restore_scene(&mut self) {
        self.split = false;
    }

    #[must_use]
    pub fn is_split(&self) -> bool {
        self.split
    }

    /// Sectors drawn in `layer`, sorted by key.
    ///
    /// With the scene combined, [`Layer::Normal`] holds every visible sector
    /// and the other layers are empty.
    #[must_use]
    pub fn sectors_in(&self, layer: Layer) -> Vec<SectorKey> {
        let mut keys: Vec<SectorKey> = if self.split {
            self.members
                .get(&layer)
                .map(|m| m.iter().copied().collect())
                .unwrap_or_default()
        } else if layer == Layer::Normal {
            let mut visible: HashSet<SectorKey> = HashSet::new();
            for members in self.members.values() {
                visible.extend(members.iter().copied());
            }
            visible.into_iter().collect()
        } else {
            Vec::new()
        };
        keys.sort_unstable();
        keys
    }

    #[must_use]
    pub fn geometry(&self, key: SectorKey) -> Option<&Arc<SectorGeometry>> {
        self.sectors.get(&key).map(|s| &s.geometry)
    }

    #[must_use]
    pub fn lod(&self, key: SectorKey) -> Option<LevelOfDetail> {
        self.sectors.get(&key).map(|s| s.lod)
    }

    #[must_use]
    pub fn contains(&self, key: SectorKey) -> bool {
        self.sectors.contains_key(&key)
    }

    #[must_use]
    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    pub fn add_custom_object(&mut self, name: impl Into<String>, object: CustomObject) {
        self.custom.insert(name.into(), object);
    }

    pub fn remove_custom_object(&mut self, name: &str) -> Option<CustomObject> {
        self.custom.remove(name)
    }

    /// Custom objects by name. Only drawn when the scene is split.
    pub fn custom_objects(&self) -> impl Iterator<Item = (&str, &CustomObject)> {
        self.custom.iter().map(|(name, object)| (name.as_str(), object))
    }
}
