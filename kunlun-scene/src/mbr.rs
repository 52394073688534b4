use bevy::math::DVec2;

/// Axis-aligned bounding rectangle in the tree's local coordinate space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mbr {
    pub ll: DVec2,
    pub ur: DVec2,
}
impl Mbr {
    pub fn new(ll: DVec2, ur: DVec2) -> Self {
        Self { ll, ur }
    }
    pub fn span(&self) -> DVec2 {
        self.ur - self.ll
    }
    pub fn mid(&self) -> DVec2 {
        (self.ll + self.ur) * 0.5
    }
    pub fn area(&self) -> f64 {
        let span = self.span();
        span.x * span.y
    }
    pub fn contains(&self, pt: DVec2) -> bool {
        self.ll.x <= pt.x && pt.x <= self.ur.x && self.ll.y <= pt.y && pt.y <= self.ur.y
    }
    /// Strictly positive extent on both axes.
    pub fn valid(&self) -> bool {
        self.ur.x > self.ll.x && self.ur.y > self.ll.y
    }
    /// A malformed rectangle can fail this even when `valid()` passes
    /// (NaN coordinates, inverted spans after scaling). Callers treat a
    /// failure as "not visible" rather than an error.
    pub fn contains_own_mid(&self) -> bool {
        self.contains(self.mid())
    }
    /// Scale out around the center. A fraction of 1.0 is the identity.
    pub fn expand_by_fraction(&self, fraction: f64) -> Mbr {
        let mid = self.mid();
        let half = self.span() * 0.5 * fraction;
        Mbr {
            ll: mid - half,
            ur: mid + half,
        }
    }
    /// Rectangle of the (x, y, level) cell inside this rectangle.
    /// `ll + (x,y)*cell .. ll + (x+1,y+1)*cell` with `cell = span / 2^level`.
    pub fn tile_mbr(&self, x: u32, y: u32, level: u32) -> Mbr {
        let cell = self.span() / (1u64 << level) as f64;
        let ll = self.ll + DVec2::new(x as f64 * cell.x, y as f64 * cell.y);
        Mbr {
            ll,
            ur: ll + cell,
        }
    }
}
