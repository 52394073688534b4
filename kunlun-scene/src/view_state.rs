use bevy::math::{DMat4, DVec2, DVec3};

/// Immutable camera snapshot handed into importance calculations. One
/// snapshot is held for the whole of a view update so every admission
/// and eviction decision in that pass sees the same camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    pub model_matrix: DMat4,
    pub view_matrix: DMat4,
    pub projection_matrix: DMat4,
    pub eye_pos: DVec3,
    pub frame_size: DVec2,
    /// Monotonically increasing per snapshot. Coverage data structures
    /// memoizing per-tile work in their attrs scratch key the cache off
    /// this.
    pub update_id: u64,
}
impl ViewState {
    pub fn new(eye_pos: DVec3, frame_size: DVec2, update_id: u64) -> Self {
        Self {
            model_matrix: DMat4::IDENTITY,
            view_matrix: DMat4::IDENTITY,
            projection_matrix: DMat4::IDENTITY,
            eye_pos,
            frame_size,
            update_id,
        }
    }
}
impl Default for ViewState {
    fn default() -> Self {
        Self::new(DVec3::ZERO, DVec2::new(1024.0, 768.0), 0)
    }
}
