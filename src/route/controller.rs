use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use eyre::{bail, eyre, Result};
use tracing::{debug, info, warn};

use crate::model::component::{CompId, Component};
use crate::model::layout::Layout;
use crate::model::route::Route;
use crate::route::order::{self, OrderRule, Pair};
use crate::route::route_pair;

/// Cooperative cancellation flag, polled between pair attempts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RouteStats {
    pub success: usize,
    pub ripups: usize,
    pub total: usize,
    pub interrupted: bool,
}

/// Runs the controller matching the ordering rule: pair rules drive the
/// rip-up DFS, net rules the greedy net-at-a-time pass.
pub fn run(
    layout: &mut Layout,
    rule: OrderRule,
    modes: &str,
    cancel: &CancelToken,
) -> Result<RouteStats> {
    if rule.is_pair_rule() {
        lafrieda(layout, rule, modes, cancel)
    } else {
        naive(layout, modes, cancel)
    }
}

/// An accepted route on the undo stack: the merged component replacing the
/// two originals, and where in the queue it happened.
struct UndoRecord {
    net: String,
    merged: CompId,
    old1: Component,
    old2: Component,
    route: Route,
    index: usize,
}

/// Depth-first routing with backtracking: accept pairs in queue order,
/// regenerate the queue after every merge, and rip accepted routes back up
/// when a pair runs out of options.
pub fn lafrieda(
    layout: &mut Layout,
    rule: OrderRule,
    modes: &str,
    cancel: &CancelToken,
) -> Result<RouteStats> {
    info!(?rule, modes, "rip-up controller");
    let total = layout.total_pairs();
    let mut queue = order::order_pairs(rule, layout);
    let mut stack: Vec<UndoRecord> = Vec::new();
    let mut index = 0;
    let (mut success, mut ripups) = (0usize, 0usize);
    let start = Instant::now();

    while index < queue.len() {
        if cancel.is_cancelled() {
            info!("interrupted; emitting the current layout");
            return Ok(RouteStats { success, ripups, total, interrupted: true });
        }
        debug!("{success}/{total} routed | {ripups} ripups | {:.2?} elapsed", start.elapsed());
        let pair = queue[index].clone();
        match route_pair(layout, &pair.net, pair.a, pair.b, modes)? {
            Some(route) => {
                let (merged, old1, old2) = merge_pair(layout, &pair, &route)?;
                stack.push(UndoRecord { net: pair.net, merged, old1, old2, route, index });
                queue = order::order_pairs(rule, layout);
                index = 0;
                success += 1;
            }
            None => {
                // Hope remains while both components come up again later.
                let (mut a_later, mut b_later) = (false, false);
                for p in &queue[index + 1..] {
                    a_later |= p.contains(pair.a);
                    b_later |= p.contains(pair.b);
                    if a_later && b_later {
                        break;
                    }
                }
                if a_later && b_later {
                    info!(net = %pair.net, "pair failed, but both sides come up again");
                    index += 1;
                    continue;
                }
                if stack.is_empty() {
                    bail!("net {} is unroutable and there is nothing to rip up", pair.net);
                }
                let mut first = true;
                while !stack.is_empty() && (first || index + 1 >= queue.len()) {
                    first = false;
                    let rec = stack.pop().unwrap();
                    warn!(net = %rec.net, "ripping up");
                    ripups += 1;
                    success -= 1;
                    index = rec.index + 1;
                    rip_up(layout, rec)?;
                }
                queue = order::order_pairs(rule, layout);
            }
        }
    }
    info!("done: {success}/{total} routed | {ripups} ripups | {:.2?} elapsed", start.elapsed());
    Ok(RouteStats { success, ripups, total, interrupted: false })
}

/// Greedy pass: nets in contention order, closest pair first within each net,
/// no backtracking.
pub fn naive(layout: &mut Layout, modes: &str, cancel: &CancelToken) -> Result<RouteStats> {
    info!(modes, "greedy controller");
    let total = layout.total_pairs();
    let mut success = 0;
    let mut checked: HashSet<(CompId, CompId)> = HashSet::new();
    for net in order::net_rule3(layout) {
        while let Some((a, b)) = order::closest_first(layout, &net, &checked) {
            if cancel.is_cancelled() {
                info!("interrupted; emitting the current layout");
                return Ok(RouteStats { success, ripups: 0, total, interrupted: true });
            }
            checked.insert((a, b));
            if let Some(route) = route_pair(layout, &net, a, b, modes)? {
                let pair = Pair { net: net.clone(), a, b };
                merge_pair(layout, &pair, &route)?;
                success += 1;
            }
        }
    }
    info!("done: {success}/{total} routed");
    Ok(RouteStats { success, ripups: 0, total, interrupted: false })
}

/// Replaces the pair's two components with their merge. Returns the merged
/// id and the originals for the undo stack.
fn merge_pair(
    layout: &mut Layout,
    pair: &Pair,
    route: &Route,
) -> Result<(CompId, Component, Component)> {
    let id = layout.next_comp_id();
    let comps = layout
        .components
        .get_mut(&pair.net)
        .ok_or_else(|| eyre!("no components for net {}", pair.net))?;
    let i1 = comps
        .iter()
        .position(|c| c.id == pair.a)
        .ok_or_else(|| eyre!("component {} missing from net {}", pair.a, pair.net))?;
    let c1 = comps.remove(i1);
    let i2 = comps
        .iter()
        .position(|c| c.id == pair.b)
        .ok_or_else(|| eyre!("component {} missing from net {}", pair.b, pair.net))?;
    let c2 = comps.remove(i2);
    let merged = Component::join(&c1, &c2, route, &layout.rects, id)?;
    let mid = merged.id;
    layout.components.get_mut(&pair.net).expect("net vanished").push(merged);
    Ok((mid, c1, c2))
}

/// Undoes one accepted route: the merged component vanishes, its two
/// predecessors return, and the caches forget the ripped segments.
fn rip_up(layout: &mut Layout, rec: UndoRecord) -> Result<()> {
    {
        let comps = layout
            .components
            .get_mut(&rec.net)
            .ok_or_else(|| eyre!("no components for net {}", rec.net))?;
        let pos = comps
            .iter()
            .position(|c| c.id == rec.merged)
            .ok_or_else(|| eyre!("merged component {} missing", rec.merged))?;
        comps.remove(pos);
    }
    layout.caches.borrow_mut().invalidate_ripped(&rec.route, &rec.net, rec.merged);
    let comps = layout.components.get_mut(&rec.net).expect("net vanished");
    comps.push(rec.old1);
    comps.push(rec.old2);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::geom::Rect;
    use crate::model::material::Material::*;
    use crate::model::material::Stackup;

    fn layout(rects: Vec<Rect>) -> Layout {
        Layout::from_rects(Stackup::new(11), rects).unwrap()
    }

    #[test]
    fn merge_then_rip_up_restores_components() {
        let mut l = layout(vec![
            Rect::labeled(0, 0, 3, 3, M1, "a"),
            Rect::labeled(0, 10, 3, 3, M1, "a"),
        ]);
        let (a, b) = {
            let comps = &l.components["a"];
            (comps[0].id, comps[1].id)
        };
        let route = route_pair(&mut l, "a", a, b, "p").unwrap().unwrap();
        let pair = Pair { net: "a".into(), a, b };
        let (merged, old1, old2) = merge_pair(&mut l, &pair, &route).unwrap();
        assert_eq!(l.components["a"].len(), 1);
        assert_eq!(l.components["a"][0].id, merged);

        let rec = UndoRecord {
            net: "a".into(),
            merged,
            old1,
            old2,
            route,
            index: 0,
        };
        rip_up(&mut l, rec).unwrap();
        let ids: HashSet<CompId> = l.components["a"].iter().map(|c| c.id).collect();
        assert_eq!(ids, HashSet::from([a, b]));
        // The ripped segments' DRC entries are gone.
        assert!(l
            .caches
            .borrow()
            .drc_route
            .values()
            .all(|m| m.keys().all(|(c, _)| *c != merged)));
    }

    #[test]
    fn lafrieda_routes_everything_on_easy_input() {
        let mut l = layout(vec![
            Rect::labeled(0, 0, 3, 3, M1, "a"),
            Rect::labeled(0, 20, 3, 3, M1, "a"),
            Rect::labeled(30, 0, 3, 3, M1, "b"),
            Rect::labeled(30, 20, 3, 3, M1, "b"),
        ]);
        let stats =
            lafrieda(&mut l, OrderRule::PairRule3, "pl", &CancelToken::new()).unwrap();
        assert_eq!(stats.success, 2);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.ripups, 0);
        assert!(!stats.interrupted);
        assert_eq!(l.components["a"].len(), 1);
        assert_eq!(l.components["b"].len(), 1);
        assert!(l.components["a"][0].is_connected(&l.rects));
    }

    #[test]
    fn cancelled_run_reports_interrupted() {
        let mut l = layout(vec![
            Rect::labeled(0, 0, 3, 3, M1, "a"),
            Rect::labeled(0, 20, 3, 3, M1, "a"),
        ]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let stats = lafrieda(&mut l, OrderRule::PairRule3, "pl", &cancel).unwrap();
        assert!(stats.interrupted);
        assert_eq!(stats.success, 0);
        assert_eq!(l.components["a"].len(), 2);
    }

    #[test]
    fn invalid_mode_is_an_error() {
        let mut l = layout(vec![
            Rect::labeled(0, 0, 3, 3, M1, "a"),
            Rect::labeled(0, 20, 3, 3, M1, "a"),
        ]);
        let (a, b) = {
            let comps = &l.components["a"];
            (comps[0].id, comps[1].id)
        };
        assert!(route_pair(&mut l, "a", a, b, "x").is_err());
    }
}
