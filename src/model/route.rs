use enumset::EnumSet;
use eyre::{bail, Result};

use crate::model::geom::{MatPt, Rect};
use crate::model::material::Material;

#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Axis {
    Horiz,
    Vert,
}

/// A route waypoint: a grid anchor with the width the wire is drawn at.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Waypoint {
    pub x: i64,
    pub y: i64,
    pub mat: Material,
    pub width: i64,
}

impl Waypoint {
    /// Waypoint at the material's minimum width.
    pub fn new(x: i64, y: i64, mat: Material) -> Self {
        Self { x, y, mat, width: mat.min_width() }
    }

    pub const fn with_width(x: i64, y: i64, mat: Material, width: i64) -> Self {
        Self { x, y, mat, width }
    }

    pub fn at(p: MatPt) -> Self {
        Self::new(p.x, p.y, p.mat)
    }

    pub const fn mat_pt(self) -> MatPt {
        MatPt::new(self.x, self.y, self.mat)
    }

    pub fn axis_coord(self, axis: Axis) -> i64 {
        match axis {
            Axis::Horiz => self.x,
            Axis::Vert => self.y,
        }
    }

    pub fn perp_coord(self, axis: Axis) -> i64 {
        match axis {
            Axis::Horiz => self.y,
            Axis::Vert => self.x,
        }
    }
}

/// An orthogonal segment between two waypoints. Mixed-material segments model
/// a run of the first material ending at a contact anchor.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Seg {
    pub a: Waypoint,
    pub b: Waypoint,
}

impl Seg {
    pub const fn new(a: Waypoint, b: Waypoint) -> Self {
        Self { a, b }
    }

    /// Orientation of the segment. Zero-length segments read as vertical.
    pub fn axis(&self) -> Axis {
        if self.a.y == self.b.y && self.a.x != self.b.x {
            Axis::Horiz
        } else {
            Axis::Vert
        }
    }

    pub fn len(&self) -> i64 {
        (self.a.x - self.b.x).abs() + (self.a.y - self.b.y).abs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grid anchors covered along the segment line, in the first waypoint's
    /// material.
    pub fn line_points(&self) -> Vec<MatPt> {
        let mat = self.a.mat;
        match self.axis() {
            Axis::Horiz => {
                let (lo, hi) = (self.a.x.min(self.b.x), self.a.x.max(self.b.x));
                (lo..=hi).map(|x| MatPt::new(x, self.a.y, mat)).collect()
            }
            Axis::Vert => {
                let (lo, hi) = (self.a.y.min(self.b.y), self.a.y.max(self.b.y));
                (lo..=hi).map(|y| MatPt::new(self.a.x, y, mat)).collect()
            }
        }
    }

    /// Rectangle representation of the segment. `contoured` inflates by the
    /// material's end-of-line distance on all sides.
    pub fn rect(&self, label: Option<&str>, contoured: bool) -> Rect {
        seg_rect(&self.a, &self.b, label, contoured)
    }
}

/// Deterministic segment-to-rectangle conversion: origin at the min corner,
/// extent `|Δ| + min_width` along the segment axis, the waypoint width
/// across. Symmetric in its arguments.
pub fn seg_rect(a: &Waypoint, b: &Waypoint, label: Option<&str>, contoured: bool) -> Rect {
    let mat = a.mat;
    let mat_width = mat.min_width();
    let seg_width = a.width.max(b.width);
    let (x, y) = (a.x.min(b.x), a.y.min(b.y));
    let (w, h) = if a.x != b.x {
        ((a.x - b.x).abs() + mat_width, seg_width)
    } else if a.y != b.y {
        (seg_width, (a.y - b.y).abs() + mat_width)
    } else {
        (seg_width, seg_width)
    };
    let mut r = Rect::new(x, y, w, h, mat);
    r.label = label.map(str::to_owned);
    if contoured {
        r = r.bloated(mat.end_of_line());
    }
    r
}

/// An ordered waypoint list with its cost, produced by the pattern or Lee
/// router.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct Route {
    pub waypoints: Vec<Waypoint>,
    pub cost: u64,
    pub materials: EnumSet<Material>,
}

impl Route {
    pub fn new(waypoints: Vec<Waypoint>) -> Self {
        let cost = cost_estimate(&waypoints);
        let materials = waypoints.iter().map(|w| w.mat).collect();
        Self { waypoints, cost, materials }
    }

    /// Zero-cost route of a single waypoint, for components that already
    /// share a routing point.
    pub fn single(p: MatPt) -> Self {
        Self::new(vec![Waypoint::at(p)])
    }

    pub fn segs(&self) -> impl Iterator<Item = Seg> + '_ {
        self.waypoints.windows(2).map(|w| Seg::new(w[0], w[1]))
    }

    /// Collapses a rasterized maze path into minimal waypoints: duplicate
    /// points dropped, straight runs merged, and a material change emitting
    /// the new material's point at the same position.
    pub fn from_points(points: &[MatPt]) -> Result<Route> {
        let mut wps: Vec<MatPt> = Vec::new();
        let mut cur_end: Option<MatPt> = None;
        let mut cur_dir: Option<(i64, i64)> = None;
        for &p in points {
            if Some(p) == cur_end {
                continue;
            }
            let e = match cur_end {
                None => {
                    wps.push(p);
                    cur_end = Some(p);
                    continue;
                }
                Some(e) => e,
            };
            if p.mat == e.mat {
                let dir = if p.x == e.x {
                    (0, (p.y - e.y).signum())
                } else if p.y == e.y {
                    ((p.x - e.x).signum(), 0)
                } else {
                    bail!("points {p:?} and {e:?} not on the same axis");
                };
                match cur_dir {
                    Some(d) if d != dir => {
                        // Commit the corner.
                        wps.push(e);
                        cur_dir = Some(dir);
                    }
                    _ => cur_dir = Some(dir),
                }
                cur_end = Some(p);
            } else {
                if p.pt() != e.pt() {
                    bail!("material change {p:?} away from {e:?}");
                }
                wps.push(p);
                cur_end = Some(p);
                cur_dir = None;
            }
        }
        let last = match cur_end {
            Some(e) => e,
            None => bail!("empty point list"),
        };
        if wps.last() != Some(&last) {
            wps.push(last);
        }
        Ok(Route::new(wps.into_iter().map(Waypoint::at).collect()))
    }
}

/// Route cost: each segment contributes its rectangle area scaled by the
/// material cost, plus an unscaled end cap of `w·(w−1)` at every material
/// change and at the terminal segment.
fn cost_estimate(wps: &[Waypoint]) -> u64 {
    let mut cost = 0;
    let mut caps = 0;
    let n = wps.len();
    for i in 0..n.saturating_sub(1) {
        let (a, b) = (&wps[i], &wps[i + 1]);
        let d = (a.x - b.x).abs() + (a.y - b.y).abs();
        cost += ((d + a.width) * a.width) as u64 * a.mat.cost();
        if a.mat != b.mat || i == n - 2 {
            caps += (a.width * (a.width - 1)) as u64;
        }
    }
    cost + caps
}
