use std::cmp::Reverse;
use std::collections::VecDeque;

use ordered_float::OrderedFloat;
use priority_queue::PriorityQueue;
use tracing::trace;

use crate::drc;
use crate::model::component::Component;
use crate::model::geom::{MatPt, Pt};
use crate::model::layout::Layout;
use crate::model::material::{Material, Stackup};
use crate::model::route::{Route, Waypoint};

/// Candidate budget before a pair is declared pattern-unroutable.
const TERMINATE: usize = 50_000;
/// Past this many point pairs the generator yields single-material routes
/// eagerly instead of fully ordering everything through the queue.
const LAZY_THRESHOLD: usize = 100;

/// Cheapest DRC-clean pattern route between two components, if the candidate
/// budget allows one.
pub fn route_components(c1: &Component, c2: &Component, layout: &Layout) -> Option<Route> {
    let label = &c1.label;
    for (i, route) in RouteGen::new(c1, c2, layout.stackup).enumerate() {
        if i > TERMINATE {
            trace!(candidates = i, "pattern budget exhausted");
            break;
        }
        if drc::check_route(&route, label, layout).is_clean() {
            trace!(candidates = i, cost = route.cost, "pattern route found");
            return Some(route);
        }
    }
    None
}

/// Enumerates candidate routes between two components in non-decreasing cost:
/// point pairs sorted by distance-weighted material cost, patterns O, I, L, Z
/// per pair, and U detours of growing amount interleaved between pairs.
pub struct RouteGen {
    stackup: Stackup,
    pairs: Vec<(MatPt, MatPt, i64)>,
    idx: usize,
    lazy: bool,
    queue: PriorityQueue<Route, Reverse<(u64, u64)>>,
    seq: u64,
    detour_dist: i64,
    detouring: Vec<(MatPt, MatPt, i64)>,
    ready: VecDeque<Route>,
}

impl RouteGen {
    pub fn new(c1: &Component, c2: &Component, stackup: Stackup) -> Self {
        let mut pairs: Vec<(MatPt, MatPt, i64)> = Vec::new();
        for &p1 in c1.line.iter().filter(|p| p.mat.is_routing()) {
            for &p2 in c2.line.iter().filter(|p| p.mat.is_routing()) {
                pairs.push((p1, p2, p1.manhattan(p2)));
            }
        }
        pairs.sort_by_key(|&(s, d, dist)| OrderedFloat(dist as f64 * pair_mat_cost(s, d)));
        let lazy = pairs.len() > LAZY_THRESHOLD;
        Self {
            stackup,
            pairs,
            idx: 0,
            lazy,
            queue: PriorityQueue::new(),
            seq: 0,
            detour_dist: 0,
            detouring: Vec::new(),
            ready: VecDeque::new(),
        }
    }

    fn head_cost(&self) -> Option<u64> {
        self.queue.peek().map(|(_, &Reverse((cost, _)))| cost)
    }

    fn enqueue(&mut self, route: Route) {
        self.seq += 1;
        let priority = Reverse((route.cost, self.seq));
        self.queue.push_increase(route, priority);
    }

    /// Single-material routes jump the queue in lazy mode while they are the
    /// cheapest thing known.
    fn emit(&mut self, route: Route) {
        if self.lazy
            && route.materials.len() == 1
            && self.head_cost().map_or(true, |h| route.cost < h)
        {
            self.ready.push_back(route);
        } else {
            self.enqueue(route);
        }
    }

    /// Consumes one point pair: grows every pending detour up to this pair's
    /// distance, then enumerates the direct patterns.
    fn advance(&mut self) {
        let (s, d, dist) = self.pairs[self.idx];
        for _ in self.detour_dist..dist {
            for k in 0..self.detouring.len() {
                self.detouring[k].2 += 1;
                let (ds, de, amt) = self.detouring[k];
                let mut routes = route_points(ds, de, Pattern::U(amt), self.stackup);
                routes.sort_by_key(|r| r.cost);
                for r in routes {
                    self.emit(r);
                }
            }
        }
        self.detour_dist = dist;

        for pattern in [Pattern::O, Pattern::I, Pattern::L, Pattern::Z] {
            let mut routes = route_points(s, d, pattern, self.stackup);
            if routes.is_empty() {
                continue;
            }
            routes.sort_by_key(|r| r.cost);
            if self.lazy {
                while self.head_cost().map_or(false, |h| h < routes[0].cost) {
                    let (r, _) = self.queue.pop().unwrap();
                    self.ready.push_back(r);
                }
            }
            for r in routes {
                self.emit(r);
            }
        }
        self.detouring.push((s, d, 0));
        self.idx += 1;
    }
}

impl Iterator for RouteGen {
    type Item = Route;

    fn next(&mut self) -> Option<Route> {
        loop {
            if let Some(r) = self.ready.pop_front() {
                return Some(r);
            }
            if self.idx < self.pairs.len() {
                self.advance();
                continue;
            }
            return self.queue.pop().map(|(r, _)| r);
        }
    }
}

/// Distance weight of a point pair: average material cost, plus the contact
/// surcharge when the pair spans two bridgeable layers.
fn pair_mat_cost(a: MatPt, b: MatPt) -> f64 {
    let mut est = (a.mat.cost() + b.mat.cost()) as f64 / 2.0;
    if a.mat != b.mat {
        if let Some(c) = Material::contact_between(a.mat, b.mat) {
            est += (c.cost() * c.min_width() as u64) as f64;
        }
    }
    est
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Pattern {
    O,
    I,
    L,
    Z,
    U(i64),
}

fn route_points(s: MatPt, d: MatPt, pattern: Pattern, stackup: Stackup) -> Vec<Route> {
    let raw = match pattern {
        Pattern::O => incident(s, d),
        Pattern::I => i_pattern(s, d),
        Pattern::L => l_pattern(s, d),
        Pattern::Z => bent(s, d, projections(s, d), stackup),
        Pattern::U(amt) => bent(s, d, detours(s, d, amt), stackup),
    };
    raw.into_iter().filter(|wps| jog_ok(wps)).map(Route::new).collect()
}

fn is_incident(s: MatPt, d: MatPt) -> bool {
    s.pt() == d.pt()
}

fn is_i(s: MatPt, d: MatPt) -> bool {
    s.x == d.x || s.y == d.y
}

/// Three stacked waypoints through a contact, all at contact width except the
/// outgoing wire.
fn sandwich(
    x: i64,
    y: i64,
    m1: Material,
    m2: Material,
    contact: Material,
    out_width: Option<i64>,
) -> Vec<Waypoint> {
    let cw = contact.min_width();
    vec![
        Waypoint::with_width(x, y, m1, cw),
        Waypoint::with_width(x, y, contact, cw),
        Waypoint::with_width(x, y, m2, out_width.unwrap_or_else(|| m2.min_width())),
    ]
}

/// Coincident points: a zero-length placement, or a single contact when only
/// the material differs.
fn incident(s: MatPt, d: MatPt) -> Vec<Vec<Waypoint>> {
    if s == d {
        let w = s.mat.min_width();
        return vec![vec![
            Waypoint::with_width(s.x, s.y, s.mat, w),
            Waypoint::with_width(d.x, d.y, d.mat, w),
        ]];
    }
    if is_incident(s, d) {
        if let Some(c) = Material::contact_between(s.mat, d.mat) {
            let w = c.min_width();
            return vec![vec![
                Waypoint::with_width(s.x, s.y, s.mat, w),
                Waypoint::with_width(s.x, s.y, c, w),
                Waypoint::with_width(d.x, d.y, d.mat, w),
            ]];
        }
    }
    Vec::new()
}

/// Straight connection; across two layers the contact may land anywhere
/// along the run.
fn i_pattern(s: MatPt, d: MatPt) -> Vec<Vec<Waypoint>> {
    if is_incident(s, d) || !is_i(s, d) {
        return Vec::new();
    }
    if s.mat == d.mat {
        let w = s.mat.min_width();
        return vec![vec![
            Waypoint::with_width(s.x, s.y, s.mat, w),
            Waypoint::with_width(d.x, d.y, d.mat, w),
        ]];
    }
    let Some(contact) = Material::contact_between(s.mat, d.mat) else {
        return Vec::new();
    };
    let w = contact.min_width();
    let vertical = s.x == d.x;
    let steps = if vertical { (s.y - d.y).abs() } else { (s.x - d.x).abs() };
    let mut routes = Vec::new();
    for i in 0..=steps {
        let (x, y) =
            if vertical { (s.x, s.y.min(d.y) + i) } else { (s.x.min(d.x) + i, s.y) };
        let mut wps = vec![Waypoint::with_width(s.x, s.y, s.mat, w)];
        wps.extend(sandwich(x, y, s.mat, d.mat, contact, None));
        wps.push(Waypoint::with_width(d.x, d.y, d.mat, w));
        routes.push(wps);
    }
    routes
}

/// One bend through either corner, with a contact sandwich at the corner when
/// the materials differ.
fn l_pattern(s: MatPt, d: MatPt) -> Vec<Vec<Waypoint>> {
    if is_incident(s, d) || is_i(s, d) {
        return Vec::new();
    }
    let corners = [(s.x, d.y), (d.x, s.y)];
    if s.mat == d.mat {
        let w = s.mat.min_width();
        return corners
            .iter()
            .map(|&(cx, cy)| {
                vec![
                    Waypoint::with_width(s.x, s.y, s.mat, w),
                    Waypoint::with_width(cx, cy, s.mat, w),
                    Waypoint::with_width(d.x, d.y, d.mat, w),
                ]
            })
            .collect();
    }
    let Some(contact) = Material::contact_between(s.mat, d.mat) else {
        return Vec::new();
    };
    let p1 = Waypoint::new(s.x, s.y, s.mat);
    let p2 = Waypoint::new(d.x, d.y, d.mat);
    corners
        .iter()
        .map(|&(cx, cy)| {
            let mut wps = vec![p1];
            wps.extend(sandwich(cx, cy, s.mat, d.mat, contact, None));
            wps.push(p2);
            wps
        })
        .collect()
}

/// First-waypoint candidates on the straight projections from the source
/// toward the destination.
fn projections(s: MatPt, d: MatPt) -> Vec<Pt> {
    let (x_min, x_max) = (s.x.min(d.x), s.x.max(d.x));
    let (y_min, y_max) = (s.y.min(d.y), s.y.max(d.y));
    let mut points = Vec::new();
    for x in x_min..=x_max {
        points.push(Pt::new(x, s.y));
    }
    for y in y_min..=y_max {
        points.push(Pt::new(s.x, y));
    }
    points
}

/// First-waypoint candidates a positive detour outside the pair's bounding
/// box, one per cardinal direction.
fn detours(s: MatPt, d: MatPt, amount: i64) -> Vec<Pt> {
    let (x_min, x_max) = (s.x.min(d.x), s.x.max(d.x));
    let (y_min, y_max) = (s.y.min(d.y), s.y.max(d.y));
    vec![
        Pt::new(s.x, y_max + amount),
        Pt::new(s.x, y_min - amount),
        Pt::new(x_min - amount, s.y),
        Pt::new(x_max + amount, s.y),
    ]
}

fn collinear(a: Waypoint, b: Waypoint, c: Waypoint) -> bool {
    a.mat == b.mat
        && b.mat == c.mat
        && ((a.x == b.x && b.x == c.x) || (a.y == b.y && b.y == c.y))
}

/// Two-bend routes: a first waypoint (from projections or detours) on a
/// material within one routing step of both ends, then an L to the
/// destination. Collinear same-material triples are rejected.
fn bent(s: MatPt, d: MatPt, first_wps: Vec<Pt>, stackup: Stackup) -> Vec<Vec<Waypoint>> {
    let (s_layer, d_layer) = (s.mat.layer() as i64, d.mat.layer() as i64);
    if (s_layer - d_layer).abs() > 4 {
        return Vec::new();
    }
    let mut wp1_mats = Vec::new();
    for i in (s_layer / 2 - 1)..=(s_layer / 2 + 1) {
        if i < 0 {
            continue;
        }
        if (i - d_layer / 2).abs() <= 1 {
            if let Some(m) = stackup.mat_at(2 * i as usize) {
                wp1_mats.push(m);
            }
        }
    }
    let uses_poly =
        [s.mat, d.mat].iter().any(|&m| matches!(m, Material::Poly | Material::Pc));
    if !uses_poly {
        wp1_mats.retain(|&m| m != Material::Poly);
    }

    let mut routes = Vec::new();
    let p0 = Waypoint::new(s.x, s.y, s.mat);
    for wp1 in &first_wps {
        for &mat in &wp1_mats {
            let first_part: Vec<Waypoint> = if mat != s.mat {
                let Some(contact) = Material::contact_between(s.mat, mat) else {
                    continue;
                };
                let mut v = vec![p0];
                // The L below re-adds the outgoing waypoint.
                v.extend_from_slice(&sandwich(wp1.x, wp1.y, s.mat, mat, contact, None)[..2]);
                v
            } else {
                vec![p0]
            };
            for tail in l_pattern(MatPt::new(wp1.x, wp1.y, mat), d) {
                let mut route = first_part.clone();
                route.extend(tail);
                if route.windows(3).any(|w| collinear(w[0], w[1], w[2])) {
                    continue;
                }
                routes.push(route);
            }
        }
    }
    routes
}

/// Jog validation: first, last and contact-adjacent segments must each meet
/// `point_to_edge`; an interior segment may be shorter only when its
/// predecessor was long enough.
fn jog_ok(wps: &[Waypoint]) -> bool {
    let n = wps.len();
    let mut prev_len = 0;
    for i in 0..n.saturating_sub(1) {
        let (a, b) = (wps[i], wps[i + 1]);
        if a.mat != b.mat {
            continue;
        }
        let len = (a.x - b.x).abs() + (a.y - b.y).abs();
        let pte = a.mat.point_to_edge();
        let strict = i == 0
            || i == n - 2
            || wps[i - 1].mat != a.mat
            || (i + 2 < n && wps[i + 2].mat != a.mat)
            || prev_len < pte;
        if strict && len < pte {
            return false;
        }
        prev_len = len;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::component::{CompId, Component};
    use crate::model::geom::Rect;
    use crate::model::material::Material::*;

    fn comp(label: &str, rect: Rect) -> Component {
        let mut c = Component::new(CompId(0), label);
        c.add_node(0, &rect);
        c
    }

    #[test]
    fn collinear_same_material_yields_straight_route() {
        let c1 = comp("a", Rect::labeled(0, 0, 3, 3, M1, "a"));
        let c2 = comp("a", Rect::labeled(0, 10, 3, 3, M1, "a"));
        let mut gen = RouteGen::new(&c1, &c2, Stackup::new(11));
        let first = gen.next().unwrap();
        let wps: Vec<_> = first.waypoints.iter().map(|w| (w.x, w.y, w.mat, w.width)).collect();
        assert_eq!(wps, vec![(0, 0, M1, 3), (0, 10, M1, 3)]);
        assert_eq!(first.cost, 84);
    }

    #[test]
    fn corner_contact_ties_break_stably() {
        let c1 = comp("a", Rect::labeled(0, 0, 3, 3, M1, "a"));
        let c2 = comp("a", Rect::labeled(10, 10, 3, 3, M2, "a"));
        let mut gen = RouteGen::new(&c1, &c2, Stackup::new(11));
        let first = gen.next().unwrap();
        // Both L corners cost the same; FIFO picks the (s.x, d.y) corner.
        assert!(first.materials.contains(M2c));
        assert_eq!((first.waypoints[1].x, first.waypoints[1].y), (0, 10));
        let second = gen.next().unwrap();
        assert_eq!(second.cost, first.cost);
        assert_eq!((second.waypoints[1].x, second.waypoints[1].y), (10, 0));
    }

    #[test]
    fn contact_can_land_anywhere_on_straight_run() {
        let routes = route_points(
            MatPt::new(0, 0, M1),
            MatPt::new(0, 10, M2),
            Pattern::I,
            Stackup::new(11),
        );
        // One candidate per grid position along the run, minus the ones whose
        // jogs are too short near the ends.
        assert!(!routes.is_empty());
        assert!(routes.iter().all(|r| r.materials.contains(M2c)));
    }

    #[test]
    fn incident_same_point_same_material_fails_jog() {
        let p = MatPt::new(0, 0, M1);
        assert!(route_points(p, p, Pattern::O, Stackup::new(11)).is_empty());
    }

    #[test]
    fn incident_contact_stack_passes_jog() {
        let routes = route_points(
            MatPt::new(0, 0, M1),
            MatPt::new(0, 0, M2),
            Pattern::O,
            Stackup::new(11),
        );
        assert_eq!(routes.len(), 1);
        let mats: Vec<_> = routes[0].waypoints.iter().map(|w| w.mat).collect();
        assert_eq!(mats, vec![M1, M2c, M2]);
        assert!(routes[0].waypoints.iter().all(|w| w.width == 4));
    }

    #[test]
    fn z_rejects_collinear_triples() {
        for r in route_points(
            MatPt::new(0, 0, M1),
            MatPt::new(10, 10, M1),
            Pattern::Z,
            Stackup::new(11),
        ) {
            assert!(!r.waypoints.windows(3).any(|w| collinear(w[0], w[1], w[2])));
        }
    }

    #[test]
    fn short_interior_jog_needs_long_neighbor() {
        // 1-long middle jog flanked by long runs: allowed.
        let ok = vec![
            Waypoint::new(0, 0, M1),
            Waypoint::new(0, 10, M1),
            Waypoint::new(1, 10, M1),
            Waypoint::new(1, 20, M1),
        ];
        assert!(jog_ok(&ok));
        // 1-long first jog: rejected.
        let bad = vec![Waypoint::new(0, 0, M1), Waypoint::new(0, 1, M1)];
        assert!(!jog_ok(&bad));
        // Two short jogs back to back: rejected.
        let wiggle = vec![
            Waypoint::new(0, 0, M1),
            Waypoint::new(0, 10, M1),
            Waypoint::new(1, 10, M1),
            Waypoint::new(1, 12, M1),
            Waypoint::new(5, 12, M1),
        ];
        assert!(!jog_ok(&wiggle));
    }
}
