use std::hash::{Hash, Hasher};

use bevy::utils::HashMap;
use kunlun_scene::{Mbr, TileKey};

/// Sentinel importance meaning "always keep". Tiles carrying it are
/// never the eviction candidate while any finite-importance leaf exists.
pub const MAX_IMPORTANCE: f64 = f64::MAX;

/// Everything the tree tracks about one resident tile.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub ident: TileKey,
    /// Always the rectangle derived from `ident` and the tree extents,
    /// never an independently stored value.
    pub mbr: Mbr,
    pub importance: f64,
    /// Counted as loaded but has no real content.
    pub phantom: bool,
    /// Queued for evaluation as a load candidate.
    pub eval: bool,
    /// A load attempt for this tile failed. Sticky until `clear_fails`.
    pub failed: bool,
    /// Per animation-frame loaded bits, for time-animated tile sets.
    pub frame_flags: u64,
    /// Per animation-frame in-flight bits.
    pub frame_loading_flags: u64,
    pub children_loading: i32,
    pub children_eval: i32,
    /// All four children resident and non-phantom, so the renderer may
    /// treat this tile as logically replaced by them.
    pub child_coverage: bool,
    /// Caller-defined per-tile scratch data.
    pub attrs: HashMap<String, serde_json::Value>,
}
impl NodeInfo {
    pub fn new(ident: TileKey, mbr: Mbr) -> Self {
        Self {
            ident,
            mbr,
            importance: 0.0,
            phantom: false,
            eval: false,
            failed: false,
            frame_flags: 0,
            frame_loading_flags: 0,
            children_loading: 0,
            children_eval: 0,
            child_coverage: false,
            attrs: HashMap::new(),
        }
    }
    /// Loaded state for one animation frame; a negative frame means
    /// the single-frame case.
    pub fn is_frame_loaded(&self, frame: i32) -> bool {
        if frame < 0 {
            self.frame_flags != 0
        } else {
            self.frame_flags & (1u64 << (frame as u64 & 63)) != 0
        }
    }
    pub fn is_frame_loading(&self, frame: i32) -> bool {
        if frame < 0 {
            self.frame_loading_flags != 0
        } else {
            self.frame_loading_flags & (1u64 << (frame as u64 & 63)) != 0
        }
    }
}

/// Coverage set element: an identifier plus the importance it was
/// admitted with. Equality and hashing are identifier-only so that
/// importance churn alone never shows up as a set difference.
#[derive(Debug, Clone, Copy)]
pub struct ImportantNode {
    pub ident: TileKey,
    pub importance: f64,
}
impl ImportantNode {
    pub fn new(ident: TileKey, importance: f64) -> Self {
        Self { ident, importance }
    }
}
impl PartialEq for ImportantNode {
    fn eq(&self, other: &Self) -> bool {
        self.ident == other.ident
    }
}
impl Eq for ImportantNode {}
impl Hash for ImportantNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ident.hash(state);
    }
}
