//! Quadtree tile paging and level-of-detail core.
//!
//! The [`Quadtree`](quadtree::Quadtree) tracks the bounded, importance
//! ranked set of resident tiles; [`QuadDisplayController`]
//! (display_controller) drives it from camera updates against a
//! pluggable [`QuadLoader`](loader::QuadLoader). The newer
//! [`QuadDisplayControllerNew`](display_controller_new) recomputes the
//! whole desired tile set each update from the
//! [`CoverageTree`](coverage) instead of walking a persistent tree.
//!
//! All state here is owned by one logical layer thread. Loaders fetch
//! on their own threads and marshal results back before invoking the
//! controller callbacks.

pub mod coverage;
pub mod display_controller;
pub mod display_controller_new;
pub mod loader;
pub mod node;
pub mod quadtree;

pub use coverage::{CoverageTree, QuadDataStructure, VisibleCoverage};
pub use display_controller::QuadDisplayController;
pub use display_controller_new::QuadDisplayControllerNew;
pub use loader::{
    ImportanceCalculator, LoaderUpdate, QuadLoader, QuadLoaderNew, TileLoadError,
};
pub use node::{ImportantNode, NodeInfo, MAX_IMPORTANCE};
pub use quadtree::Quadtree;
