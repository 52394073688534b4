use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use kunlun_scene::{Mbr, TileKey, ViewState};

use crate::loader::ImportanceCalculator;
use crate::node::NodeInfo;

/// Importance-ordered index entry. Ties break on the identifier so the
/// set never collapses two leaves with equal scores.
#[derive(Debug, Clone, Copy)]
struct SizeKey {
    importance: f64,
    ident: TileKey,
}
impl SizeKey {
    fn of(info: &NodeInfo) -> Self {
        Self {
            importance: info.importance,
            ident: info.ident,
        }
    }
}
impl Ord for SizeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.importance
            .total_cmp(&other.importance)
            .then_with(|| self.ident.cmp(&other.ident))
    }
}
impl PartialOrd for SizeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for SizeKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for SizeKey {}

/// Outcome of an `add_tile`. Over budget the insert still happens and
/// the least-important leaf is handed back for the caller to unload.
#[derive(Debug)]
pub struct AddResult {
    pub added: bool,
    pub evicted: Option<NodeInfo>,
}

/// Bounded, importance-ranked, parent-consistent set of resident tiles.
/// Pure data structure: no I/O, no threading. Two indexes cover the
/// same node set, an identifier-ordered map for exact lookup and an
/// importance-ordered set restricted to leaves for eviction selection;
/// both are touched only through `index_insert`/`index_erase`.
pub struct Quadtree {
    pub mbr: Mbr,
    pub min_level: u32,
    pub max_level: u32,
    pub max_nodes: usize,
    pub min_importance: f64,
    calc: Box<dyn ImportanceCalculator>,
    view: ViewState,
    nodes_by_ident: BTreeMap<TileKey, NodeInfo>,
    nodes_by_size: BTreeSet<SizeKey>,
    phantom_count: usize,
}

impl Quadtree {
    pub fn new(
        mbr: Mbr,
        min_level: u32,
        max_level: u32,
        max_nodes: usize,
        min_importance: f64,
        calc: Box<dyn ImportanceCalculator>,
    ) -> Self {
        Self {
            mbr,
            min_level,
            max_level,
            max_nodes,
            min_importance,
            calc,
            view: ViewState::default(),
            nodes_by_ident: BTreeMap::new(),
            nodes_by_size: BTreeSet::new(),
            phantom_count: 0,
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes_by_ident.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes_by_ident.is_empty()
    }
    pub fn phantom_count(&self) -> usize {
        self.phantom_count
    }
    pub fn node_info(&self, ident: &TileKey) -> Option<&NodeInfo> {
        self.nodes_by_ident.get(ident)
    }
    pub fn idents(&self) -> impl Iterator<Item = &TileKey> {
        self.nodes_by_ident.keys()
    }

    /// The rectangle for a tile is always this derivation, never a
    /// stored value.
    pub fn generate_node_info(&self, ident: &TileKey) -> NodeInfo {
        NodeInfo::new(*ident, self.mbr.tile_mbr(ident.x, ident.y, ident.level))
    }
    /// Importance of a (possibly non-resident) tile under the current
    /// view snapshot.
    pub fn importance_for(&self, ident: &TileKey) -> f64 {
        self.calc
            .importance(&self.generate_node_info(ident), &self.view)
    }

    /// Admission test. Tiles load strictly top-down: a tile above the
    /// minimum level is only admittable once its parent is resident.
    /// At capacity a candidate must strictly beat the least-important
    /// resident leaf; a tie never displaces anything.
    pub fn should_load_tile(&self, ident: &TileKey, frame: i32) -> bool {
        if ident.level < self.min_level || ident.level > self.max_level {
            return false;
        }
        if let Some(info) = self.nodes_by_ident.get(ident) {
            if info.failed {
                return false;
            }
            // Already resident: only a missing animation frame is left.
            return !info.is_frame_loaded(frame);
        }
        if ident.level > self.min_level {
            let parent_resident = ident
                .parent()
                .map_or(false, |p| self.nodes_by_ident.contains_key(&p));
            if !parent_resident {
                return false;
            }
        }
        let importance = self.importance_for(ident);
        if importance < self.min_importance {
            return false;
        }
        if self.nodes_by_ident.len() < self.max_nodes {
            return true;
        }
        match self.nodes_by_size.first() {
            Some(least) => importance > least.importance,
            None => false,
        }
    }

    /// Insert a tile, then if over budget evict the single globally
    /// least-important leaf. Insert-then-evict, so the resident count
    /// can touch `max_nodes + 1` only inside this call.
    pub fn add_tile(&mut self, ident: &TileKey, eval: bool, check_importance: bool) -> AddResult {
        if self.nodes_by_ident.contains_key(ident) {
            return AddResult {
                added: false,
                evicted: None,
            };
        }
        let mut info = self.generate_node_info(ident);
        info.importance = self.calc.importance(&info, &self.view);
        if check_importance && info.importance < self.min_importance {
            return AddResult {
                added: false,
                evicted: None,
            };
        }
        info.eval = eval;
        self.index_insert(info);
        let mut evicted = None;
        if self.nodes_by_ident.len() > self.max_nodes {
            if let Some((least, _)) = self.least_important_node(true) {
                evicted = self.index_erase(&least);
            }
        }
        debug_assert!(self.index_consistent());
        AddResult {
            added: true,
            evicted,
        }
    }

    pub fn remove_tile(&mut self, ident: &TileKey) -> Option<NodeInfo> {
        let info = self.index_erase(ident);
        debug_assert!(self.index_consistent());
        info
    }

    /// The sole eviction-selection primitive: the lowest-importance
    /// resident leaf, and only if it sits below the importance floor
    /// unless `force` (full drains ignore the floor).
    pub fn least_important_node(&self, force: bool) -> Option<(TileKey, f64)> {
        let least = self.nodes_by_size.first()?;
        if !force && least.importance >= self.min_importance {
            return None;
        }
        Some((least.ident, least.importance))
    }

    /// Recompute importance for every resident node under a new view
    /// snapshot, then rebuild the size index. Called once per view
    /// update so every decision in that update sees one snapshot.
    pub fn reevaluate_nodes(&mut self, view: &ViewState) {
        self.view = *view;
        let updates: Vec<(TileKey, f64)> = self
            .nodes_by_ident
            .values()
            .map(|info| (info.ident, self.calc.importance(info, view)))
            .collect();
        for (ident, importance) in updates {
            if let Some(node) = self.nodes_by_ident.get_mut(&ident) {
                node.importance = importance;
            }
        }
        self.rebuild_size_index();
        debug_assert!(self.index_consistent());
    }

    pub fn has_parent(&self, ident: &TileKey) -> bool {
        ident
            .parent()
            .map_or(false, |p| self.nodes_by_ident.contains_key(&p))
    }
    pub fn has_children(&self, ident: &TileKey) -> bool {
        ident
            .children()
            .iter()
            .any(|child| self.nodes_by_ident.contains_key(child))
    }
    /// Resident children only.
    pub fn children_for_node(&self, ident: &TileKey) -> Vec<TileKey> {
        ident
            .children()
            .into_iter()
            .filter(|child| self.nodes_by_ident.contains_key(child))
            .collect()
    }
    /// Any resident child carries a sticky failure, so recursing into
    /// this subtree is wasted work.
    pub fn child_failed(&self, ident: &TileKey) -> bool {
        ident.children().iter().any(|child| {
            self.nodes_by_ident
                .get(child)
                .map_or(false, |info| info.failed)
        })
    }
    /// Whole-tree failure reset, e.g. on network reconnect.
    pub fn clear_fails(&mut self) {
        for info in self.nodes_by_ident.values_mut() {
            info.failed = false;
        }
    }

    pub fn set_failed(&mut self, ident: &TileKey, failed: bool) {
        if let Some(info) = self.nodes_by_ident.get_mut(ident) {
            info.failed = failed;
        }
    }
    pub fn set_eval(&mut self, ident: &TileKey, eval: bool) {
        if let Some(info) = self.nodes_by_ident.get_mut(ident) {
            info.eval = eval;
        }
    }
    pub fn set_phantom(&mut self, ident: &TileKey, phantom: bool) {
        if let Some(info) = self.nodes_by_ident.get_mut(ident) {
            if info.phantom != phantom {
                info.phantom = phantom;
                if phantom {
                    self.phantom_count += 1;
                } else {
                    self.phantom_count -= 1;
                }
            }
        }
    }
    pub fn set_frame_loading(&mut self, ident: &TileKey, frame: i32, loading: bool) {
        if let Some(info) = self.nodes_by_ident.get_mut(ident) {
            if loading {
                info.frame_loading_flags |= frame_bit(frame);
            } else {
                info.frame_loading_flags &= !frame_bit(frame);
            }
        }
    }
    /// Mark one animation frame landed; clears the matching in-flight
    /// bit.
    pub fn set_frame_loaded(&mut self, ident: &TileKey, frame: i32) {
        if let Some(info) = self.nodes_by_ident.get_mut(ident) {
            info.frame_flags |= frame_bit(frame);
            info.frame_loading_flags &= !frame_bit(frame);
        }
    }

    /// Recompute a parent's aggregate child counters after a child
    /// changed state.
    pub fn update_child_counters(&mut self, parent: &TileKey) {
        let mut loading = 0;
        let mut eval = 0;
        for child in parent.children() {
            if let Some(info) = self.nodes_by_ident.get(&child) {
                if info.frame_loading_flags != 0 {
                    loading += 1;
                }
                if info.eval {
                    eval += 1;
                }
            }
        }
        if let Some(info) = self.nodes_by_ident.get_mut(parent) {
            info.children_loading = loading;
            info.children_eval = eval;
        }
    }

    /// Walk from the tile's parent toward the root recomputing whether
    /// each ancestor's four children are all resident and non-phantom.
    /// Returns the ancestors that flipped to covered and to uncovered.
    pub fn update_parent_coverage(&mut self, ident: &TileKey) -> (Vec<TileKey>, Vec<TileKey>) {
        let mut covered = Vec::new();
        let mut uncovered = Vec::new();
        let mut current = ident.parent();
        while let Some(parent) = current {
            if parent.level < self.min_level {
                break;
            }
            let cover = parent.children().iter().all(|child| {
                self.nodes_by_ident
                    .get(child)
                    .map_or(false, |info| !info.phantom)
            });
            match self.nodes_by_ident.get_mut(&parent) {
                Some(info) => {
                    if info.child_coverage != cover {
                        info.child_coverage = cover;
                        if cover {
                            covered.push(parent);
                        } else {
                            uncovered.push(parent);
                        }
                    }
                }
                None => break,
            }
            current = parent.parent();
        }
        (covered, uncovered)
    }

    /// Structural sanity: every resident node is either a leaf in the
    /// size index or has at least one resident child.
    pub fn index_consistent(&self) -> bool {
        let interior = self
            .nodes_by_ident
            .keys()
            .filter(|ident| self.has_children(ident))
            .count();
        self.nodes_by_ident.len() == self.nodes_by_size.len() + interior
    }

    fn rebuild_size_index(&mut self) {
        let leaves: Vec<SizeKey> = self
            .nodes_by_ident
            .values()
            .filter(|info| !self.has_children(&info.ident))
            .map(SizeKey::of)
            .collect();
        self.nodes_by_size = leaves.into_iter().collect();
    }

    fn index_insert(&mut self, info: NodeInfo) {
        debug_assert!(!self.nodes_by_ident.contains_key(&info.ident));
        if info.phantom {
            self.phantom_count += 1;
        }
        // The parent stops being a leaf the moment a child arrives.
        if let Some(parent) = info.ident.parent() {
            if let Some(parent_info) = self.nodes_by_ident.get(&parent) {
                self.nodes_by_size.remove(&SizeKey::of(parent_info));
            }
        }
        if !self.has_children(&info.ident) {
            self.nodes_by_size.insert(SizeKey::of(&info));
        }
        self.nodes_by_ident.insert(info.ident, info);
    }

    fn index_erase(&mut self, ident: &TileKey) -> Option<NodeInfo> {
        let info = self.nodes_by_ident.remove(ident)?;
        if info.phantom {
            self.phantom_count -= 1;
        }
        self.nodes_by_size.remove(&SizeKey::of(&info));
        // The parent may have just become a leaf again.
        if let Some(parent) = ident.parent() {
            if !self.has_children(&parent) {
                if let Some(parent_info) = self.nodes_by_ident.get(&parent) {
                    self.nodes_by_size.insert(SizeKey::of(parent_info));
                }
            }
        }
        Some(info)
    }
}

fn frame_bit(frame: i32) -> u64 {
    if frame < 0 {
        1
    } else {
        1u64 << (frame as u64 & 63)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bevy::math::DVec2;
    use bevy::utils::HashMap;

    use super::*;

    fn unit_mbr() -> Mbr {
        Mbr::new(DVec2::ZERO, DVec2::ONE)
    }

    /// Importance driven by a shared table so tests can move scores
    /// between re-evaluations. Unknown tiles score 0.
    fn table_tree(
        max_nodes: usize,
        min_importance: f64,
    ) -> (Quadtree, Arc<Mutex<HashMap<TileKey, f64>>>) {
        let table: Arc<Mutex<HashMap<TileKey, f64>>> = Arc::new(Mutex::new(HashMap::new()));
        let captured = table.clone();
        let calc = move |info: &NodeInfo, _view: &ViewState| {
            captured
                .lock()
                .unwrap()
                .get(&info.ident)
                .copied()
                .unwrap_or(0.0)
        };
        let tree = Quadtree::new(unit_mbr(), 0, 2, max_nodes, min_importance, Box::new(calc));
        (tree, table)
    }

    fn set_importance(table: &Arc<Mutex<HashMap<TileKey, f64>>>, ident: TileKey, value: f64) {
        table.lock().unwrap().insert(ident, value);
    }

    #[test]
    fn admission_requires_resident_parent() {
        let (mut tree, table) = table_tree(10, 0.1);
        let root = TileKey::new(0, 0, 0);
        let child = root.northwest();
        set_importance(&table, root, 1.0);
        set_importance(&table, child, 0.9);
        assert!(!tree.should_load_tile(&child, -1));
        assert!(tree.should_load_tile(&root, -1));
        tree.add_tile(&root, false, true);
        assert!(tree.should_load_tile(&child, -1));
    }

    #[test]
    fn capacity_scenario_rejects_below_floor_and_evicts_least_leaf() {
        // minLevel=0, maxLevel=2, maxNodes=5, minImportance=0.1.
        let (mut tree, table) = table_tree(5, 0.1);
        let root = TileKey::new(0, 0, 0);
        set_importance(&table, root, 1.0);
        assert!(tree.add_tile(&root, false, true).added);

        let children = root.children();
        for (child, importance) in children.iter().zip([0.5, 0.4, 0.3, 0.2]) {
            set_importance(&table, *child, importance);
            let result = tree.add_tile(child, false, true);
            assert!(result.added);
            assert!(result.evicted.is_none());
        }
        assert_eq!(tree.num_nodes(), 5);
        assert!(tree.index_consistent());

        // Too unimportant: rejected before any eviction happens.
        let reject = children[0].northwest();
        set_importance(&table, reject, 0.05);
        assert!(!tree.should_load_tile(&reject, -1));

        // Important enough: admitted, evicting the 0.2 child.
        let winner = children[0].northeast();
        set_importance(&table, winner, 0.6);
        assert!(tree.should_load_tile(&winner, -1));
        let result = tree.add_tile(&winner, false, true);
        assert!(result.added);
        let evicted = result.evicted.expect("expected an eviction");
        assert_eq!(evicted.ident, children[3]);
        assert!((evicted.importance - 0.2).abs() < 1e-12);
        assert_eq!(tree.num_nodes(), 5);
        assert!(tree.index_consistent());
    }

    #[test]
    fn capacity_admission_never_accepts_a_tie() {
        let (mut tree, table) = table_tree(2, 0.1);
        let root = TileKey::new(0, 0, 0);
        let a = root.northwest();
        let b = root.northeast();
        set_importance(&table, root, 1.0);
        set_importance(&table, a, 0.5);
        set_importance(&table, b, 0.5);
        tree.add_tile(&root, false, true);
        tree.add_tile(&a, false, true);
        assert_eq!(tree.num_nodes(), 2);
        // b ties the least-important leaf a, so it cannot displace it.
        assert!(!tree.should_load_tile(&b, -1));
        set_importance(&table, b, 0.5001);
        assert!(tree.should_load_tile(&b, -1));
    }

    #[test]
    fn budget_invariant_holds_across_add_remove_sequences() {
        let (mut tree, table) = table_tree(4, 0.1);
        let root = TileKey::new(0, 0, 0);
        set_importance(&table, root, crate::MAX_IMPORTANCE);
        tree.add_tile(&root, false, true);
        let mut next = 0.2;
        for child in root.children() {
            set_importance(&table, child, next);
            next += 0.1;
            tree.add_tile(&child, false, true);
            assert!(tree.num_nodes() <= 4);
            assert!(tree.index_consistent());
        }
        for grandchild in root.northwest().children() {
            set_importance(&table, grandchild, next);
            next += 0.1;
            if tree.node_info(&grandchild.parent().unwrap()).is_some() {
                tree.add_tile(&grandchild, false, true);
            }
            assert!(tree.num_nodes() <= 4);
            assert!(tree.index_consistent());
        }
        tree.remove_tile(&root.northeast());
        assert!(tree.index_consistent());
    }

    #[test]
    fn eviction_never_picks_an_interior_node() {
        let (mut tree, table) = table_tree(10, 0.1);
        let root = TileKey::new(0, 0, 0);
        // Root scores lowest of everything but has children, so it must
        // never be the eviction candidate.
        set_importance(&table, root, 0.01);
        tree.add_tile(&root, false, false);
        for (child, importance) in root.children().iter().zip([0.5, 0.4, 0.3, 0.2]) {
            set_importance(&table, *child, importance);
            tree.add_tile(child, false, true);
        }
        let (least, importance) = tree.least_important_node(true).unwrap();
        assert_eq!(least, root.southeast());
        assert!((importance - 0.2).abs() < 1e-12);
    }

    #[test]
    fn least_important_node_honors_the_floor_unless_forced() {
        let (mut tree, table) = table_tree(10, 0.1);
        let root = TileKey::new(0, 0, 0);
        set_importance(&table, root, 0.5);
        tree.add_tile(&root, false, true);
        assert!(tree.least_important_node(false).is_none());
        assert_eq!(tree.least_important_node(true).unwrap().0, root);
        // Dropping below the floor makes it evictable without force.
        set_importance(&table, root, 0.05);
        tree.reevaluate_nodes(&ViewState::default());
        assert_eq!(tree.least_important_node(false).unwrap().0, root);
    }

    #[test]
    fn reevaluation_is_idempotent() {
        let (mut tree, table) = table_tree(10, 0.1);
        let root = TileKey::new(0, 0, 0);
        set_importance(&table, root, 1.0);
        tree.add_tile(&root, false, true);
        for (child, importance) in root.children().iter().zip([0.5, 0.4, 0.3, 0.2]) {
            set_importance(&table, *child, importance);
            tree.add_tile(child, false, true);
        }
        let view = ViewState::default();
        tree.reevaluate_nodes(&view);
        let first: Vec<(TileKey, f64)> = tree
            .idents()
            .map(|k| (*k, tree.node_info(k).unwrap().importance))
            .collect();
        tree.reevaluate_nodes(&view);
        let second: Vec<(TileKey, f64)> = tree
            .idents()
            .map(|k| (*k, tree.node_info(k).unwrap().importance))
            .collect();
        assert_eq!(first, second);
        assert!(tree.index_consistent());
    }

    #[test]
    fn child_failed_reports_only_the_parent_of_the_failure() {
        let (mut tree, table) = table_tree(20, 0.0);
        let root = TileKey::new(0, 0, 0);
        let parent = TileKey::new(0, 0, 1);
        let failed = TileKey::new(1, 1, 2);
        set_importance(&table, root, 1.0);
        set_importance(&table, parent, 0.9);
        set_importance(&table, failed, 0.8);
        tree.add_tile(&root, false, true);
        tree.add_tile(&parent, false, true);
        tree.add_tile(&failed, false, true);
        tree.set_failed(&failed, true);
        assert!(tree.child_failed(&parent));
        // The failed tile's own children were never attempted.
        assert!(!tree.child_failed(&failed));
        tree.clear_fails();
        assert!(!tree.child_failed(&parent));
    }

    #[test]
    fn parent_coverage_flips_when_all_children_are_real() {
        let (mut tree, table) = table_tree(20, 0.0);
        let root = TileKey::new(0, 0, 0);
        set_importance(&table, root, 1.0);
        tree.add_tile(&root, false, true);
        for (i, child) in root.children().iter().enumerate() {
            set_importance(&table, *child, 0.5);
            tree.add_tile(child, false, true);
            if i == 0 {
                tree.set_phantom(child, true);
            }
        }
        // One child is a phantom, so the root is not covered.
        let (covered, _) = tree.update_parent_coverage(&root.northwest());
        assert!(covered.is_empty());
        assert!(!tree.node_info(&root).unwrap().child_coverage);

        tree.set_phantom(&root.northwest(), false);
        let (covered, _) = tree.update_parent_coverage(&root.northwest());
        assert_eq!(covered, vec![root]);
        assert!(tree.node_info(&root).unwrap().child_coverage);

        // Removing a child uncovers the parent again.
        tree.remove_tile(&root.southeast());
        let (_, uncovered) = tree.update_parent_coverage(&root.southwest());
        assert_eq!(uncovered, vec![root]);
    }

    #[test]
    fn phantom_count_follows_flag_changes_and_removal() {
        let (mut tree, table) = table_tree(10, 0.0);
        let root = TileKey::new(0, 0, 0);
        set_importance(&table, root, 1.0);
        tree.add_tile(&root, false, true);
        assert_eq!(tree.phantom_count(), 0);
        tree.set_phantom(&root, true);
        tree.set_phantom(&root, true);
        assert_eq!(tree.phantom_count(), 1);
        tree.remove_tile(&root);
        assert_eq!(tree.phantom_count(), 0);
    }

    #[test]
    fn frame_flags_gate_repeat_admission() {
        let (mut tree, table) = table_tree(10, 0.1);
        let root = TileKey::new(0, 0, 0);
        set_importance(&table, root, 1.0);
        tree.add_tile(&root, false, true);
        // Resident but frame 1 not loaded yet.
        assert!(tree.should_load_tile(&root, 1));
        tree.set_frame_loading(&root, 1, true);
        tree.set_frame_loaded(&root, 1);
        assert!(!tree.should_load_tile(&root, 1));
        assert!(tree.should_load_tile(&root, 2));
        assert!(!tree.node_info(&root).unwrap().is_frame_loading(1));
    }
}
