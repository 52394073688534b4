/// Side effects destined for the renderer. The paging core only ever
/// appends; the embedding application flushes the batch into its scene.
pub type ChangeSet = Vec<Change>;

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Continuous zoom scalar (target level plus fractional part) for
    /// level-dependent shader effects.
    SetZoomSlot { slot: i32, value: f32 },
}
