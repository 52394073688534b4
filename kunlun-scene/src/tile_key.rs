use std::cmp::Ordering;

/// Identifies one quadtree cell. Keys are ordered by (level, x, y) so
/// shallow tiles sort before deep ones in identifier-ordered indexes.
#[derive(Default, Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct TileKey {
    pub x: u32,
    pub y: u32,
    pub level: u32,
}
impl TileKey {
    pub fn new(x: u32, y: u32, level: u32) -> Self {
        Self { x, y, level }
    }

    pub fn get_id(&self) -> String {
        format!("{}_{}_{}", self.x, self.y, self.level)
    }
    pub fn southwest(&self) -> TileKey {
        TileKey {
            x: self.x * 2,
            y: self.y * 2 + 1,
            level: self.level + 1,
        }
    }
    pub fn southeast(&self) -> TileKey {
        TileKey {
            x: self.x * 2 + 1,
            y: self.y * 2 + 1,
            level: self.level + 1,
        }
    }
    pub fn northwest(&self) -> TileKey {
        TileKey {
            x: self.x * 2,
            y: self.y * 2,
            level: self.level + 1,
        }
    }
    pub fn northeast(&self) -> TileKey {
        TileKey {
            x: self.x * 2 + 1,
            y: self.y * 2,
            level: self.level + 1,
        }
    }
    pub fn children(&self) -> [TileKey; 4] {
        [
            self.northwest(),
            self.northeast(),
            self.southwest(),
            self.southeast(),
        ]
    }
    pub fn parent(&self) -> Option<TileKey> {
        if self.level != 0 {
            Some(TileKey {
                x: self.x / 2,
                y: self.y / 2,
                level: self.level - 1,
            })
        } else {
            None
        }
    }
    /// True if `other` sits somewhere in this tile's subtree.
    pub fn contains(&self, other: &TileKey) -> bool {
        if other.level < self.level {
            return false;
        }
        let shift = other.level - self.level;
        other.x >> shift == self.x && other.y >> shift == self.y
    }
}

impl Ord for TileKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.level
            .cmp(&other.level)
            .then_with(|| self.x.cmp(&other.x))
            .then_with(|| self.y.cmp(&other.y))
    }
}
impl PartialOrd for TileKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_is_found_by_halving_coordinates() {
        let key = TileKey::new(5, 3, 3);
        assert_eq!(key.parent(), Some(TileKey::new(2, 1, 2)));
        assert_eq!(TileKey::new(0, 0, 0).parent(), None);
    }
    #[test]
    fn children_cover_the_doubled_coordinate_square() {
        let key = TileKey::new(1, 2, 4);
        let children = key.children();
        for child in children.iter() {
            assert_eq!(child.parent(), Some(key));
            assert!(key.contains(child));
        }
        assert_eq!(children[0], TileKey::new(2, 4, 5));
        assert_eq!(children[3], TileKey::new(3, 5, 5));
    }
    #[test]
    fn ordering_is_level_first() {
        let a = TileKey::new(9, 9, 1);
        let b = TileKey::new(0, 0, 2);
        assert!(a < b);
        assert!(TileKey::new(0, 1, 2) < TileKey::new(1, 0, 2));
    }
    #[test]
    fn contains_rejects_other_subtrees() {
        let key = TileKey::new(1, 1, 1);
        assert!(key.contains(&TileKey::new(2, 3, 2)));
        assert!(!key.contains(&TileKey::new(0, 0, 2)));
        assert!(!key.contains(&TileKey::new(0, 0, 0)));
    }
}
