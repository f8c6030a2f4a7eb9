use std::collections::HashSet;

use crate::model::component::CompId;
use crate::model::geom::MatPt;
use crate::model::layout::Layout;
use crate::model::route::{seg_rect, Axis, Route, Seg, Waypoint};

/// A clash between a candidate segment and a segment some component has
/// already routed. Recoverable by ripping the component up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentConflict {
    pub segment: Seg,
    pub label: String,
    pub comp: CompId,
    pub conflict_seg: Seg,
}

/// Outcome of a design-rule check. Conflicts with loaded geometry are final;
/// conflicts with other in-progress routes carry who is in the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrcResult {
    Clean,
    LayoutConflict,
    RouteConflicts(Vec<ComponentConflict>),
}

impl DrcResult {
    pub fn is_clean(&self) -> bool {
        matches!(self, DrcResult::Clean)
    }
}

/// Checks one segment of net `label` against the loaded geometry and every
/// in-progress route. `point` relaxes the same-net parallel-spacing rule so
/// the maze router may approach its own net.
pub fn check_segment(
    a: &Waypoint,
    b: &Waypoint,
    label: &str,
    layout: &Layout,
    point: bool,
) -> DrcResult {
    let key = (*a, *b, label.to_owned());
    let contour = seg_rect(a, b, Some(label), true);
    let contact_search = seg_rect(a, b, Some(label), false);
    let mat = a.mat;
    let layer = mat.layer();

    let layout_ok = {
        let mut caches = layout.caches.borrow_mut();
        match caches.drc_layout.get(&key) {
            Some(&ok) => ok,
            None => {
                let ok = clear_of_layout(layout, &contour, mat.is_contact(), layer, label);
                caches.drc_layout.insert(key.clone(), ok);
                ok
            }
        }
    };
    if !layout_ok {
        return DrcResult::LayoutConflict;
    }

    let mut conflicts = Vec::new();
    let mut caches = layout.caches.borrow_mut();
    let verdicts = caches.drc_route.entry(key).or_default();
    for (net, comps) in &layout.components {
        for comp in comps {
            for (seg, rect) in &comp.seg_rects {
                let comp_key = (comp.id, *seg);
                let hit = match verdicts.get(&comp_key) {
                    Some(&hit) => hit,
                    None => {
                        let seg_layer = rect.mat.layer();
                        let hit = if net != label
                            && seg_layer == layer
                            && rect.overlaps(&contour)
                        {
                            true
                        } else if mat.is_contact()
                            && rect.mat.is_contact()
                            && (seg_layer as i64 - layer as i64).abs() < 3
                            && rect.overlaps(&contact_search)
                        {
                            true
                        } else {
                            !point && net == label && parallel_too_close(a, b, seg)
                        };
                        verdicts.insert(comp_key, hit);
                        hit
                    }
                };
                if hit {
                    conflicts.push(ComponentConflict {
                        segment: Seg::new(*a, *b),
                        label: label.to_owned(),
                        comp: comp.id,
                        conflict_seg: *seg,
                    });
                }
            }
        }
    }
    if conflicts.is_empty() {
        DrcResult::Clean
    } else {
        DrcResult::RouteConflicts(conflicts)
    }
}

/// Scans the occupancy grid under the contoured rectangle. Contacts probe the
/// next routing layer up and down as well, and conflict with anything there.
fn clear_of_layout(
    layout: &Layout,
    contour: &crate::model::geom::Rect,
    contact: bool,
    layer: usize,
    label: &str,
) -> bool {
    let mut layers = Vec::with_capacity(3);
    if contact {
        if layer > 2 {
            layers.push(layer - 2);
        }
        layers.push(layer);
        if layer + 3 < layout.stackup.depth() {
            layers.push(layer + 2);
        }
    } else {
        layers.push(layer);
    }
    let mut seen: HashSet<usize> = HashSet::new();
    for &l in &layers {
        if l >= layout.grid.len() {
            continue;
        }
        for cell in contour.cells() {
            if !layout.grid_points[l].contains(&cell) {
                continue;
            }
            for &rid in &layout.grid[l][&cell] {
                if !seen.insert(rid) {
                    continue;
                }
                if contact || layout.rects[rid].label.as_deref() != Some(label) {
                    return false;
                }
            }
        }
    }
    true
}

/// Same-net parallel runs must either touch or stay beyond the material's
/// minimum spacing; a positive gap inside the spacing with overlapping spans
/// is a conflict.
fn parallel_too_close(a: &Waypoint, b: &Waypoint, other: &Seg) -> bool {
    if a.mat != other.a.mat {
        return false;
    }
    let seg = Seg::new(*a, *b);
    let axis = seg.axis();
    if axis != other.axis() {
        return false;
    }
    let (lower, higher) = if a.perp_coord(axis) < other.a.perp_coord(axis) {
        (&seg, other)
    } else {
        (other, &seg)
    };
    let gap = higher.a.perp_coord(axis) - lower.a.perp_coord(axis) - lower.a.width;
    if gap <= 0 || gap > a.mat.spacing() {
        return false;
    }
    let (lo1, hi1) = span(&seg, axis);
    let (lo2, hi2) = span(other, axis);
    hi1 > lo2 && lo1 < hi2
}

fn span(seg: &Seg, axis: Axis) -> (i64, i64) {
    let (a, b) = (seg.a.axis_coord(axis), seg.b.axis_coord(axis));
    (a.min(b), a.max(b))
}

/// Checks every segment of a route. A layout conflict short-circuits; route
/// conflicts accumulate across segments.
pub fn check_route(route: &Route, label: &str, layout: &Layout) -> DrcResult {
    let mut conflicts = Vec::new();
    for seg in route.segs() {
        match check_segment(&seg.a, &seg.b, label, layout, false) {
            DrcResult::Clean => {}
            DrcResult::LayoutConflict => return DrcResult::LayoutConflict,
            DrcResult::RouteConflicts(mut c) => conflicts.append(&mut c),
        }
    }
    if conflicts.is_empty() {
        DrcResult::Clean
    } else {
        DrcResult::RouteConflicts(conflicts)
    }
}

/// Single-point check used by the maze router.
pub fn check_point(p: MatPt, label: &str, layout: &Layout) -> DrcResult {
    let wp = Waypoint::at(p);
    check_segment(&wp, &wp, label, layout, true)
}
