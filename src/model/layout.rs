use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use eyre::{ensure, eyre, Result};
use tracing::{debug, warn};

use crate::config::InputMode;
use crate::mag::placement::{self, PlacementPaths};
use crate::model::cell::Cell;
use crate::model::component::{CompId, CompIdGen, Component, RectId};
use crate::model::geom::{Bounds, Pt, Rect};
use crate::model::material::{Material, Stackup};
use crate::model::route::{Route, Seg, Waypoint};
use crate::route::lee;

/// Headroom around the loaded geometry the routers may use.
const BOUNDS_SCALE: f64 = 1.1;

/// Pad scale factor used when elevating a pin to a higher layer.
const PLATFORM_SCALE: i64 = 5;

pub type SegKey = (Waypoint, Waypoint, String);

/// Memo maps owned by the layout, so separate layouts never share state.
#[derive(Debug, Default)]
pub struct Caches {
    /// Segment-vs-layout DRC verdicts.
    pub drc_layout: HashMap<SegKey, bool>,
    /// Segment-vs-route DRC verdicts, per conflicting component segment.
    pub drc_route: HashMap<SegKey, HashMap<(CompId, Seg), bool>>,
    /// Shortest Manhattan distance between two components.
    pub manhattan: HashMap<(CompId, CompId), i64>,
    /// Pair ordering scores.
    pub ordering: HashMap<(CompId, CompId), usize>,
}

impl Caches {
    /// Drops everything a ripped-up route contributed: entries keyed on its
    /// segments and route verdicts naming the ripped component.
    pub fn invalidate_ripped(&mut self, route: &Route, label: &str, comp: CompId) {
        for seg in route.segs() {
            let key = (seg.a, seg.b, label.to_owned());
            self.drc_layout.remove(&key);
            self.drc_route.remove(&key);
        }
        for verdicts in self.drc_route.values_mut() {
            verdicts.retain(|(c, _), _| *c != comp);
        }
        self.manhattan.retain(|(a, b), _| *a != comp && *b != comp);
        self.ordering.retain(|(a, b), _| *a != comp && *b != comp);
    }
}

/// Owns every cell, rectangle and component of the design, plus the per-layer
/// occupancy grid the DRC searches. Components refer to rectangles by index.
#[derive(Debug)]
pub struct Layout {
    pub stackup: Stackup,
    pub rects: Vec<Rect>,
    pub nodes: BTreeMap<String, Vec<RectId>>,
    pub grid: Vec<HashMap<Pt, Vec<RectId>>>,
    pub grid_points: Vec<HashSet<Pt>>,
    pub components: BTreeMap<String, Vec<Component>>,
    pub labels: BTreeSet<String>,
    pub blocks: Vec<Cell>,
    pub bounds: Bounds,
    pub caches: RefCell<Caches>,
    pub mode: InputMode,
    ids: CompIdGen,
}

impl Layout {
    fn empty(stackup: Stackup, mode: InputMode) -> Self {
        Self {
            stackup,
            rects: Vec::new(),
            nodes: BTreeMap::new(),
            grid: vec![HashMap::new(); stackup.depth()],
            grid_points: Vec::new(),
            components: BTreeMap::new(),
            labels: BTreeSet::new(),
            blocks: Vec::new(),
            bounds: Bounds::of(Pt::zero()),
            caches: RefCell::new(Caches::default()),
            mode,
            ids: CompIdGen::default(),
        }
    }

    /// Builds a layout from explicit rectangles.
    pub fn from_rects(stackup: Stackup, rects: Vec<Rect>) -> Result<Self> {
        let mut layout = Self::empty(stackup, InputMode::Explicit);
        for rect in rects {
            layout.add_rect(rect);
        }
        layout.finish()?;
        Ok(layout)
    }

    /// Builds a layout from a cell library plus a placement bundle.
    pub fn from_placement(stackup: Stackup, paths: &PlacementPaths) -> Result<Self> {
        let mut layout = Self::empty(stackup, InputMode::Placed);
        for (idx, (cell, rects)) in placement::read_blocks(paths)?.into_iter().enumerate() {
            for mut rect in rects {
                rect.block = Some(idx);
                layout.add_rect(rect);
            }
            layout.blocks.push(cell);
        }
        layout.finish()?;
        Ok(layout)
    }

    /// Adds a rectangle to the occupancy grid. A labeled rectangle is a pin:
    /// it also becomes a fresh single-node component of its net. Contacts
    /// occupy the layer above and below as well.
    pub fn add_rect(&mut self, rect: Rect) -> RectId {
        let rid = self.rects.len();
        if let Some(label) = rect.label.clone() {
            self.nodes.entry(label.clone()).or_default().push(rid);
            let mut comp = Component::new(self.ids.next(), label.clone());
            comp.add_node(rid, &rect);
            self.components.entry(label.clone()).or_default().push(comp);
            self.labels.insert(label);
        }
        let layer = rect.mat.layer();
        let layers: Vec<usize> =
            if layer % 2 == 1 { vec![layer - 1, layer, layer + 1] } else { vec![layer] };
        for cell in rect.cells() {
            for &l in &layers {
                if l < self.grid.len() {
                    self.grid[l].entry(cell).or_default().push(rid);
                }
            }
        }
        self.rects.push(rect);
        rid
    }

    /// Freezes the grid-point snapshots and the routing bounding box. The
    /// grid itself never changes after load; routes live in components.
    fn finish(&mut self) -> Result<()> {
        ensure!(!self.rects.is_empty(), "layout has no rectangles");
        self.grid_points = self.grid.iter().map(|g| g.keys().copied().collect()).collect();
        let mut b = Bounds::of(Pt::new(self.rects[0].x, self.rects[0].y));
        for r in &self.rects {
            b.expand(Pt::new(r.x, r.y));
            b.expand(Pt::new(r.x1(), r.y1()));
        }
        let w = ((b.x1 - b.x0) as f64 * BOUNDS_SCALE) as i64;
        let h = ((b.y1 - b.y0) as f64 * BOUNDS_SCALE) as i64;
        self.bounds = Bounds { x0: b.x0, y0: b.y0, x1: b.x0 + w, y1: b.y0 + h };
        debug!(rects = self.rects.len(), nets = self.labels.len(), "layout loaded");
        Ok(())
    }

    pub fn next_comp_id(&mut self) -> CompId {
        self.ids.next()
    }

    pub fn comp(&self, net: &str, id: CompId) -> Option<&Component> {
        self.components.get(net)?.iter().find(|c| c.id == id)
    }

    pub fn comp_pos(&self, net: &str, id: CompId) -> Option<usize> {
        self.components.get(net)?.iter().position(|c| c.id == id)
    }

    /// Pairs left to route: one fewer than the component count of each net.
    pub fn total_pairs(&self) -> usize {
        self.components.values().map(|v| v.len().saturating_sub(1)).sum()
    }

    /// Shortest Manhattan distance between two components' lines, memoized.
    pub fn manhattan_between(&self, c1: &Component, c2: &Component) -> i64 {
        let key = if c1.id <= c2.id { (c1.id, c2.id) } else { (c2.id, c1.id) };
        if let Some(&d) = self.caches.borrow().manhattan.get(&key) {
            return d;
        }
        let mut best = i64::MAX;
        for p1 in &c1.line {
            for p2 in &c2.line {
                best = best.min(p1.manhattan(*p2));
            }
        }
        self.caches.borrow_mut().manhattan.insert(key, best);
        best
    }

    /// Raises every component whose origin pin sits on `start` up to `end`.
    pub fn elevate(&mut self, start: Material, end: Material) -> Result<()> {
        let mut targets = Vec::new();
        for (net, comps) in &self.components {
            for (idx, comp) in comps.iter().enumerate() {
                if let Some(&rid) = comp.nodes.first() {
                    if self.rects[rid].mat == start {
                        targets.push((net.clone(), idx));
                    }
                }
            }
        }
        for (net, idx) in targets {
            self.elevate_component(&net, idx, end)?;
        }
        Ok(())
    }

    /// Elevates one component: a pad scaled [`PLATFORM_SCALE`]× at `dest`
    /// centered on the origin pin, connected by a vertical-mode Lee search.
    /// Already being at or above `dest` is a no-op. Returns whether the
    /// component now reaches `dest`.
    pub fn elevate_component(&mut self, net: &str, idx: usize, dest: Material) -> Result<bool> {
        let route = {
            let comp = self
                .components
                .get(net)
                .and_then(|v| v.get(idx))
                .ok_or_else(|| eyre!("no component {idx} for net {net}"))?;
            let Some(&origin_rid) = comp.nodes.first() else {
                return Ok(false);
            };
            let origin = &self.rects[origin_rid];
            if origin.mat.layer() >= dest.layer() {
                return Ok(true);
            }
            if comp.nodes.len() > 1 {
                debug!(comp = %comp.id, "multiple nodes; elevating from the first");
            }
            let (w, h) = (origin.w * PLATFORM_SCALE, origin.h * PLATFORM_SCALE);
            let x = origin.x - (PLATFORM_SCALE - 1) / 2 * origin.w;
            let y = origin.y - (PLATFORM_SCALE - 1) / 2 * origin.h;
            let mut platform = Rect::new(x, y, w, h, dest);
            platform.label = origin.label.clone();
            let mut pad = Component::new(CompId::EPHEMERAL, comp.label.clone());
            pad.add_node(usize::MAX, &platform);
            match lee::route_components(comp, &pad, self, true) {
                Some(route) => route,
                None => {
                    warn!(
                        net,
                        origin = ?(origin.x, origin.y, origin.mat),
                        ?dest,
                        "unable to elevate pin"
                    );
                    return Ok(false);
                }
            }
        };
        self.components
            .get_mut(net)
            .ok_or_else(|| eyre!("no components for net {net}"))?[idx]
            .add_route(&route)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::material::Material::*;

    fn stackup() -> Stackup {
        Stackup::new(11)
    }

    #[test]
    fn labeled_rect_becomes_component() {
        let layout = Layout::from_rects(
            stackup(),
            vec![Rect::labeled(0, 0, 3, 3, M1, "a"), Rect::new(10, 10, 3, 3, M1)],
        )
        .unwrap();
        assert_eq!(layout.components["a"].len(), 1);
        assert_eq!(layout.labels.len(), 1);
        assert_eq!(layout.nodes["a"], vec![0]);
        assert_eq!(layout.total_pairs(), 0);
    }

    #[test]
    fn contact_occupies_three_layers() {
        let layout =
            Layout::from_rects(stackup(), vec![Rect::labeled(0, 0, 4, 4, M2c, "a")]).unwrap();
        let p = Pt::new(0, 0);
        assert!(layout.grid[M1.layer()].contains_key(&p));
        assert!(layout.grid[M2c.layer()].contains_key(&p));
        assert!(layout.grid[M2.layer()].contains_key(&p));
        assert!(!layout.grid[M3c.layer()].contains_key(&p));
    }

    #[test]
    fn bounding_box_has_headroom() {
        let layout = Layout::from_rects(
            stackup(),
            vec![Rect::labeled(0, 0, 3, 3, M1, "a"), Rect::labeled(17, 7, 3, 3, M1, "a")],
        )
        .unwrap();
        assert_eq!(layout.bounds.x0, 0);
        assert!(layout.bounds.x1 > 19);
        assert!(layout.bounds.contains(Pt::new(21, 9)));
    }

    #[test]
    fn manhattan_between_is_memoized() {
        let layout = Layout::from_rects(
            stackup(),
            vec![Rect::labeled(0, 0, 3, 3, M1, "a"), Rect::labeled(10, 0, 3, 3, M1, "a")],
        )
        .unwrap();
        let comps = &layout.components["a"];
        assert_eq!(layout.manhattan_between(&comps[0], &comps[1]), 10);
        assert_eq!(layout.caches.borrow().manhattan.len(), 1);
        assert_eq!(layout.manhattan_between(&comps[1], &comps[0]), 10);
        assert_eq!(layout.caches.borrow().manhattan.len(), 1);
    }

    #[test]
    fn elevation_to_same_material_is_noop() {
        let mut layout =
            Layout::from_rects(stackup(), vec![Rect::labeled(0, 0, 3, 3, M1, "a")]).unwrap();
        assert!(layout.elevate_component("a", 0, M1).unwrap());
        assert!(layout.components["a"][0].segments.is_empty());
    }
}
