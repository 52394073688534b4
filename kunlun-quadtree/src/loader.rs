use bevy::utils::HashSet;
use kunlun_scene::{ChangeSet, TileKey, ViewState};
use thiserror::Error;

use crate::node::{ImportantNode, NodeInfo};

/// Why a tile fetch failed, as reported back through
/// `tile_did_not_load`. Expected conditions (rejection, staleness) are
/// not errors and never appear here.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TileLoadError {
    #[error("fetch failed with status {status}")]
    Fetch { status: u16 },
    #[error("tile decode failed: {0}")]
    Decode(String),
    #[error("fetch cancelled")]
    Cancelled,
}

/// Importance source injected into the tree. Scores are non-negative;
/// zero means off screen, [`MAX_IMPORTANCE`](crate::MAX_IMPORTANCE)
/// means always keep.
pub trait ImportanceCalculator: Send + Sync {
    fn importance(&self, info: &NodeInfo, view: &ViewState) -> f64;
}
impl<F> ImportanceCalculator for F
where
    F: Fn(&NodeInfo, &ViewState) -> f64 + Send + Sync,
{
    fn importance(&self, info: &NodeInfo, view: &ViewState) -> f64 {
        self(info, view)
    }
}

/// Contract the legacy display controller drives. The loader performs
/// the actual asynchronous fetch and re-enters the layer thread to call
/// `tile_did_load`/`tile_did_not_load` on the controller, echoing back
/// the generation it was dispatched with.
pub trait QuadLoader {
    fn is_ready(&self) -> bool {
        true
    }
    fn load_tile(&mut self, info: &NodeInfo, frame: i32, generation: u64);
    fn unload_tile(&mut self, info: &NodeInfo);
    /// Granting this lets the controller recurse into the tile's four
    /// children once the tile itself is loaded.
    fn can_load_children_of_tile(&self, info: &NodeInfo) -> bool;
    /// Returning false suspends paging for this view update entirely,
    /// e.g. during a drag gesture.
    fn should_update(&self, view: &ViewState, is_first_update: bool) -> bool {
        let _ = (view, is_first_update);
        true
    }
    fn start_updates(&mut self) {}
    fn end_updates(&mut self) {}
    fn update_without_flush(&mut self) {}
    /// Animation frame count for time-animated tile sets.
    fn num_frames(&self) -> i32 {
        1
    }
    fn current_frame(&self) -> i32 {
        0
    }
    /// Outstanding fetch counts, used as hints for the flush hold-off:
    /// local fetches by default, both when the controller runs with
    /// full load on.
    fn network_fetches(&self) -> i32 {
        0
    }
    fn local_fetches(&self) -> i32 {
        0
    }
}

/// One batch of instructions from the new controller.
#[derive(Debug, Clone, Default)]
pub struct LoaderUpdate {
    pub to_add: Vec<ImportantNode>,
    pub to_remove: Vec<ImportantNode>,
    pub to_update: Vec<ImportantNode>,
    pub target_level: u32,
}

/// Contract the new display controller drives. One call per view
/// update with the full add/remove/update diff.
pub trait QuadLoaderNew {
    /// Apply the diff. Idents returned are removals the loader wants to
    /// keep a little longer (e.g. a tile mid-fetch); the controller
    /// retains them with importance zero so the next update reconsiders
    /// them instead of keeping them forever.
    fn quad_loader_update(
        &mut self,
        update: LoaderUpdate,
        changes: &mut ChangeSet,
    ) -> HashSet<TileKey>;
    fn quad_loader_shutdown(&mut self, changes: &mut ChangeSet);
}
