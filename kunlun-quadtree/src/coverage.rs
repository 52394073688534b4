use bevy::utils::{HashMap, HashSet};
use kunlun_scene::{Mbr, TileKey, ViewState};

use crate::node::ImportantNode;

/// Importance source for the coverage calculator: the external data
/// structure that knows the tile pyramid's extents and zoom range.
pub trait QuadDataStructure {
    fn importance_for_tile(
        &self,
        ident: &TileKey,
        mbr: &Mbr,
        view: &ViewState,
        attrs: &mut HashMap<String, serde_json::Value>,
    ) -> f64;
    fn min_zoom(&self) -> u32;
    fn max_zoom(&self) -> u32;
    fn total_extents(&self) -> Mbr;
    fn valid_extents(&self) -> Mbr {
        self.total_extents()
    }
    /// Cache-priming hook, called once per view update before any
    /// importance queries.
    fn new_view_state(&mut self, view: &ViewState) {
        let _ = view;
    }
}

/// Result of one single-level coverage pass.
#[derive(Debug, Clone, Default)]
pub struct VisibleCoverage {
    pub target_level: u32,
    pub nodes: Vec<ImportantNode>,
    /// Per level, the importance of the most important tile rejected
    /// there. A continuous zoom signal, not a selection input.
    pub max_rejected_importance: Vec<f64>,
}
impl VisibleCoverage {
    /// Fractional part of the zoom scalar, interpolated between the
    /// target level and the next. The 0.25/0.75 constants are specific
    /// to quad subdivision: a child starts at a quarter of its parent's
    /// screen share and flips the level when it reaches the threshold.
    pub fn zoom_fraction(&self, min_importance_per_level: &[f64], max_zoom: u32) -> f64 {
        let next = self.target_level + 1;
        if next > max_zoom {
            return 0.0;
        }
        let threshold = threshold_for(min_importance_per_level, next);
        if threshold <= 0.0 {
            return 0.0;
        }
        let rejected = self
            .max_rejected_importance
            .get(next as usize)
            .copied()
            .unwrap_or(0.0);
        ((rejected / threshold - 0.25) / 0.75).clamp(0.0, 1.0)
    }
}

fn threshold_for(min_importance_per_level: &[f64], level: u32) -> f64 {
    min_importance_per_level
        .get(level as usize)
        .or_else(|| min_importance_per_level.last())
        .copied()
        .unwrap_or(0.0)
}

/// Importance-ranked coverage over a sparse node set. No persistent
/// tree: parent/child relationships come from identifier arithmetic and
/// the whole visible set is recomputed per call.
pub struct CoverageTree {
    /// Scale-out fudge applied to every tile rectangle before the
    /// importance query. 1.0 is the identity.
    pub mbr_scaling: f64,
    data: Box<dyn QuadDataStructure>,
    attrs: HashMap<TileKey, HashMap<String, serde_json::Value>>,
}

impl CoverageTree {
    pub fn new(data: Box<dyn QuadDataStructure>) -> Self {
        Self {
            mbr_scaling: 1.0,
            data,
            attrs: HashMap::new(),
        }
    }

    pub fn min_zoom(&self) -> u32 {
        self.data.min_zoom()
    }
    pub fn max_zoom(&self) -> u32 {
        self.data.max_zoom()
    }
    pub fn new_view_state(&mut self, view: &ViewState) {
        self.data.new_view_state(view);
    }
    /// Drop memoized per-tile scratch data.
    pub fn clear_attrs(&mut self) {
        self.attrs.clear();
    }

    /// Importance of one tile under the current view. A scaled
    /// rectangle that cannot contain its own midpoint is malformed and
    /// scores zero rather than reaching the delegate.
    pub fn importance(&mut self, ident: &TileKey, view: &ViewState) -> f64 {
        let mbr = self
            .data
            .total_extents()
            .tile_mbr(ident.x, ident.y, ident.level);
        let scaled = if self.mbr_scaling != 1.0 {
            mbr.expand_by_fraction(self.mbr_scaling)
        } else {
            mbr
        };
        if !scaled.contains_own_mid() {
            return 0.0;
        }
        let attrs = self.attrs.entry(*ident).or_default();
        self.data.importance_for_tile(ident, &scaled, view, attrs)
    }

    pub fn visible(&mut self, ident: &TileKey, view: &ViewState) -> bool {
        self.importance(ident, view) > 0.0
    }

    /// Multi-level coverage: every tile, at any level, whose importance
    /// clears its level's threshold, descending only through clearing
    /// tiles and globally capped at `max_tiles` keeping the most
    /// important.
    pub fn calc_coverage_importance(
        &mut self,
        min_importance_per_level: &[f64],
        max_tiles: usize,
        view: &ViewState,
    ) -> Vec<ImportantNode> {
        let min_zoom = self.data.min_zoom();
        let max_zoom = self.data.max_zoom();
        let mut result: Vec<ImportantNode> = Vec::new();
        let mut stack: Vec<TileKey> = level_grid(min_zoom);
        while let Some(ident) = stack.pop() {
            let importance = self.importance(&ident, view);
            if importance <= 0.0 {
                continue;
            }
            if importance < threshold_for(min_importance_per_level, ident.level) {
                continue;
            }
            result.push(ImportantNode::new(ident, importance));
            if ident.level < max_zoom {
                stack.extend(ident.children());
            }
        }
        if result.len() > max_tiles {
            result.sort_by(|a, b| {
                b.importance
                    .total_cmp(&a.importance)
                    .then_with(|| a.ident.cmp(&b.ident))
            });
            result.truncate(max_tiles);
        }
        result
    }

    /// Single-level coverage: one target zoom for the whole view. A
    /// level is committed only when every visible candidate tile clears
    /// its threshold and the level fits the tile budget; the walk stops
    /// at the first level that cannot commit and the previous one wins.
    /// `keep_min_level` pins the base level underneath the target, but
    /// only while the eye sits at or above `keep_min_level_height`
    /// (zero keeps it unconditionally).
    pub fn calc_coverage_visible(
        &mut self,
        min_importance_per_level: &[f64],
        max_tiles: usize,
        level_loads: &[i32],
        keep_min_level: bool,
        keep_min_level_height: f64,
        view: &ViewState,
    ) -> VisibleCoverage {
        let min_zoom = self.data.min_zoom();
        let max_zoom = self.data.max_zoom();
        let mut max_rejected = vec![0.0f64; (max_zoom + 2) as usize];
        let mut level_sets: HashMap<u32, Vec<ImportantNode>> = HashMap::new();
        let mut target = min_zoom;

        for level in min_zoom..=max_zoom {
            let candidates: Vec<TileKey> = if level == min_zoom {
                level_grid(min_zoom)
            } else {
                match level_sets.get(&(level - 1)) {
                    Some(prev) => prev.iter().flat_map(|n| n.ident.children()).collect(),
                    None => break,
                }
            };
            let threshold = threshold_for(min_importance_per_level, level);
            let mut accepted: Vec<ImportantNode> = Vec::new();
            let mut any_rejected = false;
            for ident in candidates {
                let importance = self.importance(&ident, view);
                if importance <= 0.0 {
                    continue;
                }
                if importance < threshold {
                    any_rejected = true;
                    let slot = &mut max_rejected[level as usize];
                    if importance > *slot {
                        *slot = importance;
                    }
                } else {
                    accepted.push(ImportantNode::new(ident, importance));
                }
            }
            if accepted.is_empty() {
                break;
            }
            // The base level is always committed; deeper levels must be
            // whole (no rejected tile) and within budget.
            if level > min_zoom && (any_rejected || accepted.len() > max_tiles) {
                level_sets.insert(level, accepted);
                break;
            }
            target = level;
            level_sets.insert(level, accepted);
        }

        let mut wanted_levels: Vec<u32> = vec![target];
        if keep_min_level && view.eye_pos.z >= keep_min_level_height {
            wanted_levels.push(min_zoom);
        }
        for &load in level_loads {
            let level = if load < 0 {
                target as i64 + load as i64
            } else {
                load as i64
            };
            if level >= min_zoom as i64 && level <= target as i64 {
                wanted_levels.push(level as u32);
            }
        }
        let mut seen: HashSet<TileKey> = HashSet::new();
        let mut nodes: Vec<ImportantNode> = Vec::new();
        for level in wanted_levels {
            if let Some(set) = level_sets.get(&level) {
                for node in set {
                    if seen.insert(node.ident) {
                        nodes.push(*node);
                    }
                }
            }
        }
        VisibleCoverage {
            target_level: target,
            nodes,
            max_rejected_importance: max_rejected,
        }
    }
}

fn level_grid(level: u32) -> Vec<TileKey> {
    let per_side = 1u32 << level;
    let mut grid = Vec::with_capacity((per_side * per_side) as usize);
    for x in 0..per_side {
        for y in 0..per_side {
            grid.push(TileKey::new(x, y, level));
        }
    }
    grid
}
