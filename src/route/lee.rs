use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::drc;
use crate::model::component::Component;
use crate::model::geom::MatPt;
use crate::model::layout::Layout;
use crate::model::material::Stackup;
use crate::model::route::{Axis, Route};
use crate::route::spq::Spq;

/// Wall-clock budget for a single search.
const TIMEOUT: Duration = Duration::from_secs(120);

/// Which component a search entry grew from.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
enum Side {
    Source,
    Target,
}

impl Side {
    fn other(self) -> Side {
        match self {
            Side::Source => Side::Target,
            Side::Target => Side::Source,
        }
    }
}

/// A unit move on the (x, y, layer) grid.
type Step = (i64, i64, i64);

#[derive(Debug, Clone)]
struct Entry {
    point: MatPt,
    cost: u64,
    parent: Option<usize>,
    step: Option<Step>,
    /// Straight run length since the last turn on this material.
    jog: i64,
    /// Length of the jog before that, consulted when turning and matching.
    prev_jog: i64,
    /// Path length on the current material.
    length: i64,
    side: Side,
}

impl Entry {
    fn area(&self) -> i64 {
        let w = self.point.mat.min_width();
        (self.length + w - 1) * w
    }
}

#[derive(Debug, Copy, Clone)]
enum Visit {
    Blocked,
    Open(usize),
}

/// Dijkstra over the 3-D grid seeded from both components' routing points.
/// `vertical` is the elevation mode: the source may only climb, the target
/// only descend, and layer changes cost nothing.
pub fn route_components(
    c1: &Component,
    c2: &Component,
    layout: &Layout,
    vertical: bool,
) -> Option<Route> {
    let label = &c1.label;
    // Components already sharing a routing point need no wire at all.
    if let Some(&p) = c1.line.iter().find(|p| p.mat.is_routing() && c2.line.contains(p)) {
        return Some(Route::single(p));
    }

    let mut arena: Vec<Entry> = Vec::new();
    let mut visited: HashMap<(MatPt, Side), Visit> = HashMap::new();
    let mut queue: Spq<(MatPt, Side)> = Spq::new();
    for (side, comp) in [(Side::Source, c1), (Side::Target, c2)] {
        for &p in comp.line.iter().filter(|p| p.mat.is_routing()) {
            let idx = arena.len();
            arena.push(Entry {
                point: p,
                cost: 0,
                parent: None,
                step: None,
                jog: 1,
                prev_jog: 0,
                length: 1,
                side,
            });
            visited.insert((p, side), Visit::Open(idx));
            queue.push(0, (p, side));
        }
    }

    let start = Instant::now();
    let mut pops = 0u64;
    while let Some((point, side)) = queue.pop() {
        if start.elapsed() > TIMEOUT {
            warn!(net = %label, "maze search timed out");
            break;
        }
        if !layout.bounds.contains(point.pt()) {
            continue;
        }
        let Some(&Visit::Open(cur_idx)) = visited.get(&(point, side)) else {
            continue;
        };
        pops += 1;
        if pops % 50_000 == 0 {
            trace!(pops, cost = arena[cur_idx].cost, "maze progress");
        }
        for step in allowed_steps(&arena[cur_idx], layout.stackup, vertical) {
            if vertical {
                if side == Side::Source && step.2 == -1 {
                    continue;
                }
                if side == Side::Target && step.2 == 1 {
                    continue;
                }
            }
            let cur = &arena[cur_idx];
            let layer = cur.point.mat.layer() as i64 + step.2;
            let Some(mat) = usize::try_from(layer).ok().and_then(|l| layout.stackup.mat_at(l))
            else {
                continue;
            };
            let next = MatPt::new(cur.point.x + step.0, cur.point.y + step.1, mat);
            let key = (next, side);
            if visited.contains_key(&key) {
                continue;
            }
            let cand = step_entry(cur, cur_idx, step, next, vertical);
            if let Some(midx) = find_match(next, &cand, &visited, &arena) {
                let mut pts = retrace(&arena, &cand);
                let mut other = retrace(&arena, &arena[midx]);
                other.reverse();
                pts.extend(other);
                match Route::from_points(&pts) {
                    Ok(route) => {
                        trace!(cost = route.cost, pops, "maze route found");
                        return Some(route);
                    }
                    Err(err) => {
                        warn!(%err, "degenerate maze path");
                        return None;
                    }
                }
            }
            if !drc::check_point(next, label, layout).is_clean() {
                visited.insert(key, Visit::Blocked);
                continue;
            }
            let cost = cand.cost;
            let idx = arena.len();
            arena.push(cand);
            visited.insert(key, Visit::Open(idx));
            queue.push(cost, (next, side));
        }
    }
    None
}

const DX: [Step; 2] = [(-1, 0, 0), (1, 0, 0)];
const DY: [Step; 2] = [(0, -1, 0), (0, 1, 0)];

/// Moves available from an entry. Contacts are traversed atomically; turns
/// need a long-enough jog; layer changes need the minimum area on the current
/// material unless the search runs in vertical mode.
fn allowed_steps(e: &Entry, stackup: Stackup, vertical: bool) -> Vec<Step> {
    let mat = e.point.mat;
    if mat.is_contact() {
        return e.step.into_iter().collect();
    }
    let mut steps = Vec::new();
    if matches!(e.step, Some((_, _, dz)) if dz != 0) {
        // Fresh on this layer: any planar direction.
        steps.extend(DX);
        steps.extend(DY);
        return steps;
    }
    let pte = mat.point_to_edge();
    let turnable = e.jog >= pte || e.prev_jog >= pte || e.step.is_none();
    if let Some(s) = e.step {
        steps.push(s);
    }
    let on_x = matches!(e.step, Some((dx, _, _)) if dx != 0);
    let on_y = matches!(e.step, Some((_, dy, _)) if dy != 0);
    if turnable {
        if !on_x {
            steps.extend(DX);
        }
        if !on_y {
            steps.extend(DY);
        }
    }
    if vertical || e.area() >= mat.min_area() {
        let layer = mat.layer();
        if layer > 0 {
            steps.push((0, 0, -1));
        }
        if layer + 1 < stackup.depth() {
            steps.push((0, 0, 1));
        }
    }
    steps
}

fn step_entry(prev: &Entry, prev_idx: usize, step: Step, point: MatPt, vertical: bool) -> Entry {
    let w = point.mat.min_width();
    let step_cost = if step.2 == 0 {
        point.mat.cost() * w as u64
    } else if vertical {
        0
    } else {
        point.mat.cost() * (w * w) as u64
    };
    let (jog, prev_jog) = if Some(step) == prev.step {
        (prev.jog + 1, prev.prev_jog)
    } else if step.2 == 0 {
        (1, prev.jog)
    } else {
        (1, 0)
    };
    Entry {
        point,
        cost: prev.cost + step_cost,
        parent: Some(prev_idx),
        step: Some(step),
        jog,
        prev_jog,
        length: if step.2 == 0 { prev.length + 1 } else { 1 },
        side: prev.side,
    }
}

fn step_axis(step: Option<Step>) -> Option<Axis> {
    match step {
        Some((dx, 0, 0)) if dx != 0 => Some(Axis::Horiz),
        Some((0, dy, 0)) if dy != 0 => Some(Axis::Vert),
        _ => None,
    }
}

/// Checks whether the candidate point closes the search against the other
/// side. Arrivals along the same axis pool their jogs; otherwise one of the
/// two jogs must meet `point_to_edge` on its own.
fn find_match(
    point: MatPt,
    cand: &Entry,
    visited: &HashMap<(MatPt, Side), Visit>,
    arena: &[Entry],
) -> Option<usize> {
    if !point.mat.is_routing() {
        return None;
    }
    let idx = match visited.get(&(point, cand.side.other()))? {
        Visit::Blocked => return None,
        Visit::Open(idx) => *idx,
    };
    let other = &arena[idx];
    let pte = point.mat.point_to_edge();
    let ok = match (step_axis(other.step), step_axis(cand.step)) {
        (Some(a1), Some(a2)) if a1 == a2 => other.jog + cand.jog >= pte,
        _ => other.jog >= pte || cand.jog >= pte,
    };
    ok.then_some(idx)
}

/// Path from the search root to this entry, root first.
fn retrace(arena: &[Entry], e: &Entry) -> Vec<MatPt> {
    let mut rev = vec![e.point];
    let mut cur = e.parent;
    while let Some(i) = cur {
        rev.push(arena[i].point);
        cur = arena[i].parent;
    }
    rev.reverse();
    rev
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::component::CompId;
    use crate::model::geom::Rect;
    use crate::model::layout::Layout;
    use crate::model::material::Material::*;

    fn layout(rects: Vec<Rect>) -> Layout {
        Layout::from_rects(Stackup::new(11), rects).unwrap()
    }

    #[test]
    fn shared_point_is_zero_cost() {
        let mut c1 = Component::new(CompId(1), "a");
        c1.add_node(0, &Rect::labeled(0, 0, 3, 3, M1, "a"));
        let mut c2 = Component::new(CompId(2), "a");
        c2.add_node(1, &Rect::labeled(0, 0, 3, 3, M1, "a"));
        let l = layout(vec![Rect::labeled(0, 0, 3, 3, M1, "a")]);
        let r = route_components(&c1, &c2, &l, false).unwrap();
        assert_eq!(r.cost, 0);
        assert_eq!(r.waypoints.len(), 1);
    }

    #[test]
    fn finds_straight_route() {
        let l = layout(vec![
            Rect::labeled(0, 0, 3, 3, M1, "a"),
            Rect::labeled(0, 20, 3, 3, M1, "a"),
        ]);
        let comps = &l.components["a"];
        let r = route_components(&comps[0], &comps[1], &l, false).unwrap();
        assert!(r.waypoints.len() >= 2);
        assert!(r.materials.contains(M1));
        let first = r.waypoints.first().unwrap().mat_pt();
        let last = r.waypoints.last().unwrap().mat_pt();
        assert!(comps[0].line.contains(&first) || comps[1].line.contains(&first));
        assert!(comps[0].line.contains(&last) || comps[1].line.contains(&last));
    }

    #[test]
    fn contacts_are_traversed_atomically() {
        let e = Entry {
            point: MatPt::new(0, 0, M2c),
            cost: 0,
            parent: None,
            step: Some((0, 0, 1)),
            jog: 1,
            prev_jog: 0,
            length: 1,
            side: Side::Source,
        };
        assert_eq!(allowed_steps(&e, Stackup::new(11), false), vec![(0, 0, 1)]);
    }

    #[test]
    fn turning_requires_point_to_edge() {
        let mut e = Entry {
            point: MatPt::new(0, 0, M1),
            cost: 0,
            parent: None,
            step: Some((1, 0, 0)),
            jog: 1,
            prev_jog: 0,
            length: 2,
            side: Side::Source,
        };
        // Short jog: straight ahead only (no area for a layer change yet).
        assert_eq!(allowed_steps(&e, Stackup::new(11), false), vec![(1, 0, 0)]);
        e.jog = 3;
        let steps = allowed_steps(&e, Stackup::new(11), false);
        assert!(steps.contains(&(0, 1, 0)));
        assert!(steps.contains(&(0, -1, 0)));
        // Still no reversal on the same axis.
        assert!(!steps.contains(&(-1, 0, 0)));
    }

    #[test]
    fn layer_change_needs_min_area_unless_vertical() {
        let e = Entry {
            point: MatPt::new(0, 0, M1),
            cost: 0,
            parent: None,
            step: None,
            jog: 1,
            prev_jog: 0,
            length: 1,
            side: Side::Source,
        };
        let normal = allowed_steps(&e, Stackup::new(11), false);
        assert!(!normal.iter().any(|s| s.2 != 0));
        let vertical = allowed_steps(&e, Stackup::new(11), true);
        assert!(vertical.contains(&(0, 0, 1)));
        assert!(vertical.contains(&(0, 0, -1)));
    }
}
