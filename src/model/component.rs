use std::collections::{BTreeSet, HashMap, HashSet};

use derive_more::Display;
use eyre::{bail, ensure, Result};
use petgraph::prelude::UnGraphMap;
use petgraph::visit::Bfs;

use crate::model::geom::{Bounds, MatPt, Pt, Rect};
use crate::model::route::{Axis, Route, Seg, Waypoint};

pub type RectId = usize;

/// Identity of a component within a layout. Merged components get fresh ids,
/// so caches keyed by id never see a component change under them.
#[derive(Debug, Display, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[display(fmt = "c{}", _0)]
pub struct CompId(pub u64);

impl CompId {
    /// Id for throwaway components that never enter a layout, such as the
    /// elevation platform.
    pub const EPHEMERAL: CompId = CompId(u64::MAX);
}

#[derive(Debug, Default)]
pub struct CompIdGen {
    next: u64,
}

impl CompIdGen {
    pub fn next(&mut self) -> CompId {
        self.next += 1;
        CompId(self.next)
    }
}

/// What meets the rest of the component at a junction point: a route segment
/// or a pin rectangle anchored there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incidence {
    Seg(Seg),
    Node(RectId),
}

/// A connected piece of a net: pin rectangles (by id into the layout), the
/// segments routed so far, and the set of grid anchors they cover.
#[derive(Debug, Clone)]
pub struct Component {
    pub id: CompId,
    pub label: String,
    pub nodes: Vec<RectId>,
    pub segments: Vec<Seg>,
    pub seg_rects: HashMap<Seg, Rect>,
    pub fillers: HashMap<(Seg, MatPt), Rect>,
    pub junctions: HashMap<MatPt, Vec<Incidence>>,
    pub line: BTreeSet<MatPt>,
    pub bounds: Option<Bounds>,
}

/// Junction anchors a pin rectangle contributes: one per routing material a
/// contact lands on, or the rectangle's own origin anchor.
fn node_junctions(rect: &Rect) -> Vec<MatPt> {
    if rect.mat.is_contact() {
        rect.mat.bridges().iter().map(|&m| MatPt::new(rect.x, rect.y, m)).collect()
    } else {
        vec![MatPt::new(rect.x, rect.y, rect.mat)]
    }
}

/// Line anchors a pin rectangle contributes.
fn node_line(rect: &Rect) -> Vec<MatPt> {
    if rect.mat.is_contact() {
        rect.mat.bridges().iter().flat_map(|&m| rect.anchors_as(m)).collect()
    } else {
        rect.mat_anchors().collect()
    }
}

impl Component {
    pub fn new(id: CompId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            nodes: Vec::new(),
            segments: Vec::new(),
            seg_rects: HashMap::new(),
            fillers: HashMap::new(),
            junctions: HashMap::new(),
            line: BTreeSet::new(),
            bounds: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.nodes.is_empty()
    }

    pub fn add_node(&mut self, rid: RectId, rect: &Rect) {
        self.nodes.push(rid);
        self.line.extend(node_line(rect));
        for j in node_junctions(rect) {
            self.junctions.entry(j).or_default().push(Incidence::Node(rid));
        }
        self.update_bounds();
    }

    pub fn add_segment(&mut self, seg: Seg) {
        self.line.extend(seg.line_points());
        for ep in [seg.a, seg.b] {
            self.junctions.entry(ep.mat_pt()).or_default().push(Incidence::Seg(seg));
        }
        self.seg_rects.insert(seg, seg.rect(Some(self.label.as_str()), false));
        self.segments.push(seg);
        self.update_bounds();
    }

    /// Finds `point` on an existing segment. An interior hit splits the
    /// segment in two at that point. Returns whether the point attaches to
    /// the component at all.
    pub fn connect_break(&mut self, point: MatPt) -> bool {
        if self
            .segments
            .iter()
            .any(|s| s.a.mat_pt() == point || s.b.mat_pt() == point)
        {
            return true;
        }
        let hit = self.segments.iter().copied().find(|s| {
            if s.a.mat != point.mat {
                return false;
            }
            let axis = s.axis();
            let p = Waypoint::at(point);
            p.perp_coord(axis) == s.a.perp_coord(axis)
                && p.axis_coord(axis) >= s.a.axis_coord(axis).min(s.b.axis_coord(axis))
                && p.axis_coord(axis) <= s.a.axis_coord(axis).max(s.b.axis_coord(axis))
        });
        if let Some(seg) = hit {
            self.delete_segment_record(&seg);
            self.add_segment(Seg::new(seg.a, Waypoint::at(point)));
            self.add_segment(Seg::new(seg.b, Waypoint::at(point)));
            return true;
        }
        self.line.contains(&point)
    }

    /// Adds a route's segments. The first route into an empty component
    /// defines its origin; every later route must touch the component.
    pub fn add_route(&mut self, route: &Route) -> Result<()> {
        let wps = &route.waypoints;
        let (Some(first), Some(last)) = (wps.first(), wps.last()) else {
            return Ok(());
        };
        let (first, last) = (first.mat_pt(), last.mat_pt());
        if !self.segments.is_empty() {
            let connected = self.connect_break(first)
                || self.connect_break(last)
                || self.line.contains(&first)
                || self.line.contains(&last);
            ensure!(connected, "route not connected to component {} ({})", self.id, self.label);
        }
        for w in wps.windows(2) {
            self.add_segment(Seg::new(w[0], w[1]));
        }
        Ok(())
    }

    /// Removes a segment. A dangling segment leaves the component intact
    /// (`None`); removing a bridge splits it into exactly two components.
    pub fn remove_segment(
        mut self,
        seg: &Seg,
        rects: &[Rect],
        ids: &mut CompIdGen,
    ) -> Result<Vec<Component>> {
        ensure!(self.segments.contains(seg), "segment {seg:?} not in component {}", self.id);
        if self.is_dangling(seg) {
            self.remove_dangling(seg, rects);
            return Ok(vec![self]);
        }
        let mut parts = Vec::new();
        let mut claimed: HashSet<Seg> = HashSet::new();
        for ep in [seg.a, seg.b] {
            let mut part = Component::new(ids.next(), self.label.clone());
            let mut nodes_added: HashSet<RectId> = HashSet::new();
            let mut visited: HashSet<MatPt> = HashSet::new();
            let mut queue = vec![ep.mat_pt()];
            while let Some(j) = queue.pop() {
                if !visited.insert(j) {
                    continue;
                }
                for inc in self.junctions.get(&j).into_iter().flatten() {
                    match inc {
                        Incidence::Node(rid) => {
                            if nodes_added.insert(*rid) {
                                part.add_node(*rid, &rects[*rid]);
                            }
                        }
                        Incidence::Seg(s) => {
                            if s != seg && claimed.insert(*s) {
                                part.add_segment(*s);
                                queue.push(s.a.mat_pt());
                                queue.push(s.b.mat_pt());
                            }
                        }
                    }
                }
            }
            parts.push(part);
        }
        // Removing a cycle edge leaves everything reachable from the first
        // endpoint; drop the empty remainder.
        parts.retain(|p| !p.is_empty());
        Ok(parts)
    }

    /// True when one endpoint of `seg` has no other incidence, so removal
    /// cannot split the component.
    fn is_dangling(&self, seg: &Seg) -> bool {
        [seg.a, seg.b]
            .iter()
            .any(|ep| self.junctions.get(&ep.mat_pt()).map_or(0, Vec::len) < 2)
    }

    fn remove_dangling(&mut self, seg: &Seg, rects: &[Rect]) {
        self.delete_segment_record(seg);
        self.rebuild_line(rects);
        self.update_bounds();
    }

    /// Removes the segment from the segment list, the junction table and the
    /// rectangle cache. The line is left to the caller.
    fn delete_segment_record(&mut self, seg: &Seg) {
        self.segments.retain(|s| s != seg);
        self.seg_rects.remove(seg);
        for ep in [seg.a, seg.b] {
            let p = ep.mat_pt();
            if let Some(incs) = self.junctions.get_mut(&p) {
                incs.retain(|i| !matches!(i, Incidence::Seg(s) if s == seg));
                if incs.is_empty() {
                    self.junctions.remove(&p);
                }
            }
        }
    }

    fn rebuild_line(&mut self, rects: &[Rect]) {
        self.line.clear();
        for &rid in &self.nodes {
            self.line.extend(node_line(&rects[rid]));
        }
        for seg in &self.segments {
            self.line.extend(seg.line_points());
        }
    }

    /// Prunes branch tips that reach no pin, until only node-connected wire
    /// remains. Returns false when the component has no nodes at all.
    pub fn trim(&mut self, rects: &[Rect]) -> bool {
        if self.nodes.is_empty() {
            return false;
        }
        loop {
            let dangling = self.segments.iter().copied().find(|s| {
                [s.a, s.b].iter().any(|ep| {
                    self.junctions
                        .get(&ep.mat_pt())
                        .map_or(true, |incs| incs.len() == 1 && matches!(incs[0], Incidence::Seg(_)))
                })
            });
            match dangling {
                Some(seg) => self.remove_dangling(&seg, rects),
                None => break,
            }
        }
        true
    }

    /// Connectivity over the junction graph: segments are edges, and every
    /// junction sitting on a pin's metal is tied to that pin.
    pub fn is_connected(&self, rects: &[Rect]) -> bool {
        let mut g: UnGraphMap<MatPt, ()> = UnGraphMap::new();
        for &p in self.junctions.keys() {
            g.add_node(p);
        }
        for s in &self.segments {
            let (a, b) = (s.a.mat_pt(), s.b.mat_pt());
            if a != b {
                g.add_edge(a, b, ());
            }
        }
        for &rid in &self.nodes {
            let rect = &rects[rid];
            let js = node_junctions(rect);
            for w in js.windows(2) {
                g.add_edge(w[0], w[1], ());
            }
            let covered: BTreeSet<MatPt> = node_line(rect).into_iter().collect();
            let anchor = js[0];
            for &p in self.junctions.keys() {
                if p != anchor && covered.contains(&p) {
                    g.add_edge(anchor, p, ());
                }
            }
        }
        let Some(start) = g.nodes().next() else {
            return true;
        };
        let mut bfs = Bfs::new(&g, start);
        let mut seen = 0;
        while bfs.next(&g).is_some() {
            seen += 1;
        }
        seen == g.node_count()
    }

    /// Joins two components of the same net through a connecting route.
    pub fn join(
        c1: &Component,
        c2: &Component,
        route: &Route,
        rects: &[Rect],
        id: CompId,
    ) -> Result<Component> {
        ensure!(c1.label == c2.label, "different labels {} {}", c1.label, c2.label);
        let mut comp = Component::new(id, c1.label.clone());
        for cp in [c1, c2] {
            for &rid in &cp.nodes {
                comp.add_node(rid, &rects[rid]);
            }
            for s in &cp.segments {
                comp.add_segment(*s);
            }
            for (k, f) in &cp.fillers {
                comp.fillers.insert(k.clone(), f.clone());
            }
        }
        comp.fill_notches(route, rects);
        comp.add_route(route)?;
        Ok(comp)
    }

    /// Repairs notches a route opens against nearby pins and contacts within
    /// one layer step: the gap between the segment rectangle and the
    /// neighbor, clipped to their shared extent.
    pub fn fill_notches(&mut self, route: &Route, rects: &[Rect]) {
        let route_contacts: Vec<Rect> = route
            .waypoints
            .iter()
            .filter(|wp| wp.mat.is_contact())
            .map(|wp| Rect::new(wp.x, wp.y, wp.width, wp.width, wp.mat))
            .collect();
        let contact_rects: Vec<Rect> =
            self.seg_rects.values().filter(|r| r.mat.is_contact()).cloned().collect();
        let node_rects: Vec<Rect> = self.nodes.iter().map(|&rid| rects[rid].clone()).collect();

        for seg in route.segs() {
            let mat = seg.a.mat;
            if mat.is_contact() {
                continue;
            }
            let layer = mat.layer() as i64;
            let sr = seg.rect(Some(self.label.as_str()), false);
            let cr = seg.rect(Some(self.label.as_str()), true);
            for n in node_rects.iter().chain(&contact_rects).chain(&route_contacts) {
                if (n.mat.layer() as i64 - layer).abs() >= 2 {
                    continue;
                }
                // Touching is connected, out of contour is irrelevant.
                if sr.overlaps(n) || !cr.overlaps(n) {
                    continue;
                }
                let (x, y, w, h) = match seg.axis() {
                    Axis::Vert => {
                        let x = sr.x1().min(n.x1()) + 1;
                        let w = (sr.x.max(n.x) - x).max(0);
                        let y = sr.y.max(n.y);
                        let h = (sr.y1().min(n.y1()) - y + 1).max(0);
                        (x, y, w, h)
                    }
                    Axis::Horiz => {
                        let y = sr.y1().min(n.y1()) + 1;
                        let h = (sr.y.max(n.y) - y + 1).max(0);
                        let x = sr.x.max(n.x);
                        let w = (sr.x1().min(n.x1()) - x + 1).max(0);
                        (x, y, w, h)
                    }
                };
                if w > 0 && h > 0 {
                    let mut filler = Rect::new(x, y, w, h, mat);
                    filler.label = Some(self.label.clone());
                    self.fillers.insert((seg, MatPt::new(n.x, n.y, n.mat)), filler);
                }
            }
        }
    }

    /// Layer indices the component occupies, low to high.
    pub fn line_layers(&self) -> Vec<usize> {
        let mut layers: Vec<usize> = self.line.iter().map(|p| p.mat.layer()).collect();
        layers.sort_unstable();
        layers.dedup();
        layers
    }

    /// Highest routing layer the component occupies.
    pub fn top_routing_layer(&self) -> Option<usize> {
        self.line.iter().filter(|p| p.mat.is_routing()).map(|p| p.mat.layer()).max()
    }

    pub fn centroid(&self) -> Result<(f64, f64)> {
        if self.line.is_empty() {
            bail!("component {} has no line points", self.id);
        }
        let n = self.line.len() as f64;
        let (sx, sy) = self
            .line
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x as f64, sy + p.y as f64));
        Ok((sx / n, sy / n))
    }

    fn update_bounds(&mut self) {
        let mut it = self.line.iter();
        let mut bounds = match it.next() {
            Some(p) => Bounds::of(Pt::new(p.x, p.y)),
            None => {
                self.bounds = None;
                return;
            }
        };
        for p in it {
            bounds.expand(Pt::new(p.x, p.y));
        }
        self.bounds = Some(bounds);
    }
}
