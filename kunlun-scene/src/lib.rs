mod changes;
mod mbr;
mod tile_key;
mod view_state;

pub use changes::{Change, ChangeSet};
pub use mbr::Mbr;
pub use tile_key::TileKey;
pub use view_state::ViewState;
