use std::collections::BTreeSet;

use auto_ops::impl_op_ex;

use crate::model::material::Material;

/// A point on the integer manufacturing grid.
#[derive(Debug, Default, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pt {
    pub x: i64,
    pub y: i64,
}

impl Pt {
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    pub const fn zero() -> Self {
        Self::new(0, 0)
    }

    pub fn manhattan(self, o: Pt) -> i64 {
        (self.x - o.x).abs() + (self.y - o.y).abs()
    }
}

impl_op_ex!(+ |a: &Pt, b: &Pt| -> Pt { Pt::new(a.x + b.x, a.y + b.y) });
impl_op_ex!(-|a: &Pt, b: &Pt| -> Pt { Pt::new(a.x - b.x, a.y - b.y) });

/// A grid point carrying a material: the bottom-left origin of a
/// `min_width × min_width` square of that material.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct MatPt {
    pub x: i64,
    pub y: i64,
    pub mat: Material,
}

impl MatPt {
    pub const fn new(x: i64, y: i64, mat: Material) -> Self {
        Self { x, y, mat }
    }

    pub const fn pt(self) -> Pt {
        Pt::new(self.x, self.y)
    }

    pub fn manhattan(self, o: MatPt) -> i64 {
        (self.x - o.x).abs() + (self.y - o.y).abs()
    }
}

/// Axis-aligned rectangle of a single material. `label` ties the rectangle to
/// a net; `block` points back at the cell instance it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
    pub mat: Material,
    pub label: Option<String>,
    pub block: Option<usize>,
}

impl Rect {
    pub fn new(x: i64, y: i64, w: i64, h: i64, mat: Material) -> Self {
        Self { x, y, w, h, mat, label: None, block: None }
    }

    pub fn labeled(x: i64, y: i64, w: i64, h: i64, mat: Material, label: impl Into<String>) -> Self {
        Self { label: Some(label.into()), ..Self::new(x, y, w, h, mat) }
    }

    /// Rightmost covered column (inclusive).
    pub fn x1(&self) -> i64 {
        self.x + self.w - 1
    }

    /// Topmost covered row (inclusive).
    pub fn y1(&self) -> i64 {
        self.y + self.h - 1
    }

    pub fn offset(&mut self, dx: i64, dy: i64) {
        self.x += dx;
        self.y += dy;
    }

    pub fn contains(&self, p: Pt) -> bool {
        p.x >= self.x && p.x < self.x + self.w && p.y >= self.y && p.y < self.y + self.h
    }

    pub fn overlaps(&self, o: &Rect) -> bool {
        !(self.x1() < o.x || self.x > o.x1() || self.y1() < o.y || self.y > o.y1())
    }

    pub fn bloated(&self, amount: i64) -> Rect {
        Rect {
            x: self.x - amount,
            y: self.y - amount,
            w: self.w + 2 * amount,
            h: self.h + 2 * amount,
            ..self.clone()
        }
    }

    /// Every grid cell the rectangle covers.
    pub fn cells(&self) -> impl Iterator<Item = Pt> + '_ {
        (self.x..self.x + self.w)
            .flat_map(move |x| (self.y..self.y + self.h).map(move |y| Pt::new(x, y)))
    }

    /// Bottom-left origins of every `width × width` square that fits inside.
    pub fn anchors(&self, width: i64) -> impl Iterator<Item = Pt> + '_ {
        (self.x..=self.x + self.w - width)
            .flat_map(move |x| (self.y..=self.y + self.h - width).map(move |y| Pt::new(x, y)))
    }

    /// Anchors of the rectangle in its own material.
    pub fn mat_anchors(&self) -> impl Iterator<Item = MatPt> + '_ {
        self.anchors_as(self.mat)
    }

    /// Anchors sized for `mat`'s minimum width, tagged with `mat`. Used for
    /// the routing layers a contact rectangle lands on.
    pub fn anchors_as(&self, mat: Material) -> impl Iterator<Item = MatPt> + '_ {
        self.anchors(mat.min_width()).map(move |p| MatPt::new(p.x, p.y, mat))
    }

    /// Re-covers a set of grid cells with maximal rectangles, extending runs
    /// horizontally and then growing them row by row.
    pub fn from_cells(mut cells: BTreeSet<Pt>, mat: Material, label: Option<String>) -> Vec<Rect> {
        let mut rects = Vec::new();
        while let Some(&p) = cells.iter().next() {
            cells.remove(&p);
            let (mut x0, mut x1, mut y0, mut y1) = (p.x, p.x, p.y, p.y);
            while cells.remove(&Pt::new(x1 + 1, y0)) {
                x1 += 1;
            }
            while cells.remove(&Pt::new(x0 - 1, y0)) {
                x0 -= 1;
            }
            while (x0..=x1).all(|x| cells.contains(&Pt::new(x, y1 + 1))) {
                (x0..=x1).for_each(|x| {
                    cells.remove(&Pt::new(x, y1 + 1));
                });
                y1 += 1;
            }
            while (x0..=x1).all(|x| cells.contains(&Pt::new(x, y0 - 1))) {
                (x0..=x1).for_each(|x| {
                    cells.remove(&Pt::new(x, y0 - 1));
                });
                y0 -= 1;
            }
            let mut r = Rect::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1, mat);
            r.label = label.clone();
            rects.push(r);
        }
        rects
    }
}

/// Inclusive bounding box over grid points.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Bounds {
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
}

impl Bounds {
    pub fn of(p: Pt) -> Self {
        Self { x0: p.x, y0: p.y, x1: p.x, y1: p.y }
    }

    pub fn expand(&mut self, p: Pt) {
        self.x0 = self.x0.min(p.x);
        self.y0 = self.y0.min(p.y);
        self.x1 = self.x1.max(p.x);
        self.y1 = self.y1.max(p.y);
    }

    pub fn union(self, o: Bounds) -> Bounds {
        Bounds {
            x0: self.x0.min(o.x0),
            y0: self.y0.min(o.y0),
            x1: self.x1.max(o.x1),
            y1: self.y1.max(o.y1),
        }
    }

    pub fn contains(&self, p: Pt) -> bool {
        p.x >= self.x0 && p.x <= self.x1 && p.y >= self.y0 && p.y <= self.y1
    }

    pub fn overlaps_rect(&self, r: &Rect) -> bool {
        !(self.x1 < r.x || self.x0 > r.x1() || self.y1 < r.y || self.y0 > r.y1())
    }
}
