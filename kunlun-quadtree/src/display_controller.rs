use std::cmp::Ordering;
use std::collections::BTreeSet;

use bevy::log::{debug, warn};
use bevy::utils::HashSet;
use instant::Instant;
use kunlun_scene::{TileKey, ViewState};

use crate::loader::{QuadLoader, TileLoadError};
use crate::quadtree::Quadtree;

/// Working-set entry, ordered by importance so the eval queue drains
/// most-important-first from the high end.
#[derive(Debug, Clone, Copy)]
struct EvalNode {
    importance: f64,
    ident: TileKey,
}
impl Ord for EvalNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.importance
            .total_cmp(&other.importance)
            .then_with(|| self.ident.cmp(&other.ident))
    }
}
impl PartialOrd for EvalNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for EvalNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for EvalNode {}

/// Paging counters, in the spirit of the renderer's per-frame tile
/// debug output.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerStats {
    pub tiles_loaded: u32,
    pub tiles_unloaded: u32,
    pub tiles_rejected: u32,
    pub tiles_failed: u32,
    pub stale_callbacks: u32,
    pub eval_passes: u32,
}

/// Drives the [`Quadtree`] from camera updates against a pluggable
/// loader, under a per-frame time budget. The controller and its tree
/// live on one logical layer thread; loader callbacks must be
/// marshalled back onto it.
pub struct QuadDisplayController {
    pub quadtree: Quadtree,
    loader: Box<dyn QuadLoader>,
    /// Hold flushes until every outstanding fetch has landed, not only
    /// the fast local ones. Still bounded by `full_load_timeout`.
    pub full_load: bool,
    /// Seconds a flush may be held back while fast local loads land,
    /// so a refresh does not flash to blank.
    pub full_load_timeout: f64,
    /// Synchronize paging work to renderer frame boundaries.
    pub metered_mode: bool,
    /// Ignore the frame budget entirely and drain the queue.
    pub greedy_mode: bool,
    /// Per-animation-frame loading for time-animated tile sets.
    pub frame_loading: bool,
    /// Minimum seconds between accepted view updates. Zero disables.
    pub view_update_period: f64,
    /// Minimum eye movement for a view update to be worth it. Zero
    /// disables.
    pub min_update_dist: f64,
    pub stats: ControllerStats,
    nodes_for_eval: BTreeSet<EvalNode>,
    eval_idents: HashSet<TileKey>,
    last_view: Option<ViewState>,
    last_view_update: Option<Instant>,
    first_update: bool,
    generation: u64,
    wait_for_local_loads: bool,
    last_flush: Option<Instant>,
}

impl QuadDisplayController {
    pub fn new(quadtree: Quadtree, loader: Box<dyn QuadLoader>) -> Self {
        Self {
            quadtree,
            loader,
            full_load: false,
            full_load_timeout: 4.0,
            metered_mode: true,
            greedy_mode: false,
            frame_loading: false,
            view_update_period: 0.0,
            min_update_dist: 0.0,
            stats: ControllerStats::default(),
            nodes_for_eval: BTreeSet::new(),
            eval_idents: HashSet::new(),
            last_view: None,
            last_view_update: None,
            first_update: true,
            generation: 0,
            wait_for_local_loads: false,
            last_flush: None,
        }
    }

    /// Dispatch generation carried by in-flight loads. Bumped by
    /// `refresh`/`reset`; callbacks from before the bump are discarded.
    pub fn generation(&self) -> u64 {
        self.generation
    }
    pub fn num_eval_nodes(&self) -> usize {
        self.nodes_for_eval.len()
    }

    /// Snapshot the camera, re-rank every resident tile under it and
    /// reseed the eval queue with the whole minimum-level coverage.
    /// Min-level tiles are always re-considered regardless of current
    /// state.
    pub fn view_update(&mut self, view: &ViewState) {
        if !self.loader.should_update(view, self.first_update) {
            return;
        }
        if !self.first_update {
            if self.view_update_period > 0.0 {
                if let Some(last) = self.last_view_update {
                    if last.elapsed().as_secs_f64() < self.view_update_period {
                        return;
                    }
                }
            }
            if self.min_update_dist > 0.0 {
                if let Some(prev) = &self.last_view {
                    if (view.eye_pos - prev.eye_pos).length() < self.min_update_dist {
                        return;
                    }
                }
            }
        }
        self.first_update = false;
        self.last_view = Some(*view);
        self.last_view_update = Some(Instant::now());
        self.nodes_for_eval.clear();
        self.eval_idents.clear();
        self.quadtree.reevaluate_nodes(view);
        self.seed_min_level();
    }

    /// One cooperative slice of paging work. Evicts below-floor leaves
    /// first, then drains the eval queue most-important-first until the
    /// queue empties or the frame slice runs out. Returns whether any
    /// work happened.
    pub fn eval_step(
        &mut self,
        frame_start: Instant,
        frame_interval: f64,
        available_fraction: f64,
    ) -> bool {
        if !self.loader.is_ready() {
            return false;
        }
        self.stats.eval_passes += 1;
        let mut did_something = false;

        while let Some((ident, _)) = self.quadtree.least_important_node(false) {
            if let Some(info) = self.quadtree.remove_tile(&ident) {
                self.loader.unload_tile(&info);
                self.stats.tiles_unloaded += 1;
                did_something = true;
            }
        }

        let frame = if self.frame_loading {
            self.loader.current_frame()
        } else {
            -1
        };
        while let Some(eval) = self.pop_most_important() {
            let ident = eval.ident;
            if self.quadtree.node_info(&ident).is_some() {
                self.quadtree.set_eval(&ident, false);
                if self.refine_into_children(&ident, frame) {
                    did_something = true;
                }
            } else if self.quadtree.should_load_tile(&ident, frame) {
                let result = self.quadtree.add_tile(&ident, false, true);
                if result.added {
                    if let Some(evicted) = &result.evicted {
                        self.loader.unload_tile(evicted);
                        self.stats.tiles_unloaded += 1;
                    }
                    self.dispatch_load(&ident, frame);
                    did_something = true;
                }
            } else {
                // Dropped for this pass; a later view update may bring
                // it back.
                self.stats.tiles_rejected += 1;
            }
            if !self.greedy_mode && self.metered_mode {
                if frame_start.elapsed().as_secs_f64() >= available_fraction * frame_interval {
                    break;
                }
            }
        }
        did_something
    }

    /// Loader callback: a fetch landed. Late results for tiles evicted
    /// in the meantime, or dispatched before the last refresh, are
    /// silently discarded.
    pub fn tile_did_load(&mut self, ident: &TileKey, frame: i32, generation: u64) {
        if generation != self.generation || self.quadtree.node_info(ident).is_none() {
            debug!("discarding stale tile load {}", ident.get_id());
            self.stats.stale_callbacks += 1;
            return;
        }
        self.quadtree.set_frame_loaded(ident, frame);
        self.quadtree.set_phantom(ident, false);
        if let Some(parent) = ident.parent() {
            self.quadtree.update_child_counters(&parent);
        }
        self.quadtree.update_parent_coverage(ident);
        // Lazy refinement: children only become candidates once the
        // parent has fully landed, which keeps loading top-down.
        if ident.level < self.quadtree.max_level && self.fully_loaded(ident) {
            for child in ident.children() {
                self.enqueue_eval(child);
            }
        }
        self.wait_for_local_loads = self.loader.local_fetches() > 0;
    }

    /// Loader callback: a fetch failed. The failure is sticky on the
    /// node and blocks its children, nothing else.
    pub fn tile_did_not_load(
        &mut self,
        ident: &TileKey,
        frame: i32,
        generation: u64,
        error: &TileLoadError,
    ) {
        if generation != self.generation || self.quadtree.node_info(ident).is_none() {
            debug!("discarding stale tile failure {}", ident.get_id());
            self.stats.stale_callbacks += 1;
            return;
        }
        warn!("tile {} did not load: {}", ident.get_id(), error);
        self.quadtree.set_frame_loading(ident, frame, false);
        self.quadtree.set_failed(ident, true);
        self.stats.tiles_failed += 1;
        if let Some(parent) = ident.parent() {
            self.quadtree.update_child_counters(&parent);
        }
    }

    /// Drop everything and reload from the minimum level. Failure flags
    /// are cleared, so this is also the retry path. In-flight loads
    /// from before the refresh are invalidated by the generation bump.
    pub fn refresh(&mut self) {
        self.generation += 1;
        self.drain_all();
        self.quadtree.clear_fails();
        self.seed_min_level();
        self.wait_for_local_loads = true;
    }

    /// Like `refresh` but also forgets view history and counters.
    pub fn reset(&mut self) {
        self.refresh();
        self.last_view = None;
        self.last_view_update = None;
        self.first_update = true;
        self.stats = ControllerStats::default();
    }

    /// Called once per render frame. Flush boundaries are back to back:
    /// end of batch N immediately starts batch N+1. Mid-batch in
    /// metered mode the loader gets partial progress with no boundary.
    /// The flush is held, within the timeout, while loads worth waiting
    /// for are still landing: fast local fetches by default, every
    /// outstanding fetch under `full_load`.
    pub fn frame_end(&mut self) {
        if self.metered_mode && !self.nodes_for_eval.is_empty() {
            self.loader.update_without_flush();
            return;
        }
        let outstanding = if self.full_load {
            self.loader.network_fetches() + self.loader.local_fetches()
        } else if self.wait_for_local_loads {
            // Network fetches are slow enough that holding a flush for
            // them needs an explicit opt-in.
            self.loader.local_fetches()
        } else {
            0
        };
        if outstanding > 0 {
            if let Some(last) = self.last_flush {
                if last.elapsed().as_secs_f64() < self.full_load_timeout {
                    return;
                }
            }
        }
        self.loader.end_updates();
        self.loader.start_updates();
        self.last_flush = Some(Instant::now());
        self.wait_for_local_loads = false;
    }

    pub fn shutdown(&mut self) {
        self.generation += 1;
        self.drain_all();
        self.loader.end_updates();
    }

    fn seed_min_level(&mut self) {
        let per_side = 1u32 << self.quadtree.min_level;
        for x in 0..per_side {
            for y in 0..per_side {
                self.enqueue_eval(TileKey::new(x, y, self.quadtree.min_level));
            }
        }
    }

    fn enqueue_eval(&mut self, ident: TileKey) {
        if !self.eval_idents.insert(ident) {
            return;
        }
        let importance = self.quadtree.importance_for(&ident);
        self.nodes_for_eval.insert(EvalNode { importance, ident });
        self.quadtree.set_eval(&ident, true);
        if let Some(parent) = ident.parent() {
            self.quadtree.update_child_counters(&parent);
        }
    }

    fn pop_most_important(&mut self) -> Option<EvalNode> {
        let node = self.nodes_for_eval.pop_last()?;
        self.eval_idents.remove(&node.ident);
        Some(node)
    }

    /// Consider a loaded tile's children, if the loader grants it and
    /// none of them already failed.
    fn refine_into_children(&mut self, ident: &TileKey, frame: i32) -> bool {
        if ident.level >= self.quadtree.max_level {
            return false;
        }
        let Some(info) = self.quadtree.node_info(ident).cloned() else {
            return false;
        };
        if !info.is_frame_loaded(frame) || self.quadtree.child_failed(ident) {
            return false;
        }
        if !self.loader.can_load_children_of_tile(&info) {
            return false;
        }
        for child in ident.children() {
            self.enqueue_eval(child);
        }
        true
    }

    /// All the frames this tile needs are resident. Without frame
    /// loading that is just the single load bit.
    fn fully_loaded(&self, ident: &TileKey) -> bool {
        let Some(info) = self.quadtree.node_info(ident) else {
            return false;
        };
        if !self.frame_loading {
            return info.is_frame_loaded(-1);
        }
        let frames = self.loader.num_frames().max(1) as u64;
        let mask = if frames >= 64 {
            u64::MAX
        } else {
            (1u64 << frames) - 1
        };
        info.frame_flags & mask == mask
    }

    fn dispatch_load(&mut self, ident: &TileKey, frame: i32) {
        let Some(info) = self.quadtree.node_info(ident).cloned() else {
            return;
        };
        self.quadtree.set_frame_loading(ident, frame, true);
        if let Some(parent) = ident.parent() {
            self.quadtree.update_child_counters(&parent);
        }
        self.loader.load_tile(&info, frame, self.generation);
        self.stats.tiles_loaded += 1;
    }

    fn drain_all(&mut self) {
        // Interior nodes become leaves as their children go, so forced
        // least-first eviction reaches every resident node.
        while let Some((ident, _)) = self.quadtree.least_important_node(true) {
            if let Some(info) = self.quadtree.remove_tile(&ident) {
                self.loader.unload_tile(&info);
                self.stats.tiles_unloaded += 1;
            }
        }
        self.nodes_for_eval.clear();
        self.eval_idents.clear();
    }
}
