use bevy::log::debug;
use bevy::utils::HashMap;
use kunlun_scene::{Change, ChangeSet, TileKey, ViewState};

use crate::coverage::CoverageTree;
use crate::loader::{LoaderUpdate, QuadLoaderNew};
use crate::node::ImportantNode;

/// Coverage-driven display controller. Each view update recomputes the
/// whole wanted set from scratch and hands the loader a diff against
/// the previous set; there is no incremental eviction machinery.
pub struct QuadDisplayControllerNew {
    pub tree: CoverageTree,
    /// One target zoom for the whole view instead of mixed levels.
    pub single_level: bool,
    /// Keep the base level resident underneath the target level.
    pub keep_min_level: bool,
    /// Eye height under which `keep_min_level` stops applying. Zero
    /// pins the base level at any height.
    pub keep_min_level_height: f64,
    pub max_tiles: usize,
    pub min_importance_per_level: Vec<f64>,
    /// Extra levels to load alongside the target. Non-negative entries
    /// are absolute levels, negative ones offsets below the target.
    pub level_loads: Vec<i32>,
    /// Shared scalar slot the continuous zoom value is published to.
    /// Negative means unassigned.
    pub zoom_slot: i32,
    pub target_level: u32,
    loader: Box<dyn QuadLoaderNew>,
    current_nodes: HashMap<TileKey, f64>,
    last_zoom_value: Option<f32>,
}

impl QuadDisplayControllerNew {
    pub fn new(tree: CoverageTree, loader: Box<dyn QuadLoaderNew>) -> Self {
        let target_level = tree.min_zoom();
        Self {
            tree,
            single_level: false,
            keep_min_level: false,
            keep_min_level_height: 0.0,
            max_tiles: 128,
            min_importance_per_level: Vec::new(),
            level_loads: Vec::new(),
            zoom_slot: -1,
            target_level,
            loader,
            current_nodes: HashMap::new(),
            last_zoom_value: None,
        }
    }

    pub fn view_update(&mut self, view: &ViewState, changes: &mut ChangeSet) {
        self.tree.new_view_state(view);

        let (target, new_nodes, zoom_fraction) = if self.single_level {
            let coverage = self.tree.calc_coverage_visible(
                &self.min_importance_per_level,
                self.max_tiles,
                &self.level_loads,
                self.keep_min_level,
                self.keep_min_level_height,
                view,
            );
            let fraction =
                coverage.zoom_fraction(&self.min_importance_per_level, self.tree.max_zoom());
            (coverage.target_level, coverage.nodes, fraction)
        } else {
            let nodes = self.tree.calc_coverage_importance(
                &self.min_importance_per_level,
                self.max_tiles,
                view,
            );
            let target = nodes
                .iter()
                .map(|n| n.ident.level)
                .max()
                .unwrap_or(self.tree.min_zoom());
            (target, nodes, 0.0)
        };

        // Identifier-only diff against the previous pass. Importance
        // churn on a surviving tile is an update, never a reload.
        let new_map: HashMap<TileKey, f64> =
            new_nodes.iter().map(|n| (n.ident, n.importance)).collect();
        let mut to_add: Vec<ImportantNode> = Vec::new();
        let mut to_update: Vec<ImportantNode> = Vec::new();
        for node in &new_nodes {
            if self.current_nodes.contains_key(&node.ident) {
                to_update.push(*node);
            } else {
                to_add.push(*node);
            }
        }
        let to_remove: Vec<ImportantNode> = self
            .current_nodes
            .iter()
            .filter(|(ident, _)| !new_map.contains_key(*ident))
            .map(|(ident, importance)| ImportantNode::new(*ident, *importance))
            .collect();

        debug!(
            "coverage update: target {} add {} remove {} update {}",
            target,
            to_add.len(),
            to_remove.len(),
            to_update.len()
        );
        self.target_level = target;
        let keep = self.loader.quad_loader_update(
            LoaderUpdate {
                to_add,
                to_remove: to_remove.clone(),
                to_update,
                target_level: target,
            },
            changes,
        );

        self.current_nodes = new_map;
        for node in &to_remove {
            // A vetoed removal stays in the working set at zero
            // importance so the next pass offers it again.
            if keep.contains(&node.ident) {
                self.current_nodes.insert(node.ident, 0.0);
            }
        }

        if self.zoom_slot >= 0 {
            let zoom = target as f32 + zoom_fraction as f32;
            if self
                .last_zoom_value
                .map_or(true, |last| (last - zoom).abs() > 0.01)
            {
                changes.push(Change::SetZoomSlot {
                    slot: self.zoom_slot,
                    value: zoom,
                });
                self.last_zoom_value = Some(zoom);
            }
        }
    }

    pub fn shutdown(&mut self, changes: &mut ChangeSet) {
        self.loader.quad_loader_shutdown(changes);
        self.current_nodes.clear();
        self.last_zoom_value = None;
    }
}
