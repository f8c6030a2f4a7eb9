use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::model::component::CompId;
use crate::model::geom::Bounds;
use crate::model::layout::Layout;

/// Which ordering drives the controller. Pair rules feed the rip-up DFS;
/// net-at-a-time rules feed the simple greedy controller.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderRule {
    NetRule3,
    PairRule3,
    PairRule3Closest,
    ClosestFirst,
}

impl OrderRule {
    pub fn is_pair_rule(self) -> bool {
        matches!(self, OrderRule::PairRule3 | OrderRule::PairRule3Closest)
    }
}

/// An unordered same-net component pair scheduled for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    pub net: String,
    pub a: CompId,
    pub b: CompId,
}

impl Pair {
    pub fn members(&self) -> [CompId; 2] {
        [self.a, self.b]
    }

    pub fn contains(&self, id: CompId) -> bool {
        self.a == id || self.b == id
    }
}

/// Nets sorted by how many foreign pins fall inside their bounding box:
/// nets facing little contention route first.
pub fn net_rule3(layout: &Layout) -> Vec<String> {
    let mut scored: Vec<(usize, &String)> = layout
        .labels
        .iter()
        .map(|label| {
            let mbb = net_mbb(layout, label);
            let inside = layout
                .labels
                .iter()
                .filter(|other| *other != label)
                .flat_map(|other| &layout.nodes[other])
                .filter(|&&rid| mbb.overlaps_rect(&layout.rects[rid]))
                .count();
            (inside, label)
        })
        .collect();
    scored.sort_by_key(|(score, _)| *score);
    scored.into_iter().map(|(_, label)| label.clone()).collect()
}

fn net_mbb(layout: &Layout, label: &str) -> Bounds {
    let rids = &layout.nodes[label];
    let first = &layout.rects[rids[0]];
    let mut b = Bounds { x0: first.x, y0: first.y, x1: first.x1(), y1: first.y1() };
    for &rid in rids {
        let r = &layout.rects[rid];
        b.x0 = b.x0.min(r.x);
        b.y0 = b.y0.min(r.y);
        b.x1 = b.x1.max(r.x1());
        b.y1 = b.y1.max(r.y1());
    }
    b
}

/// All same-net component pairs across the layout, sorted by how many pins
/// fall inside the pair's joint bounding box. Scores memoized per id pair.
pub fn pair_rule3(layout: &Layout) -> Vec<Pair> {
    let mut scored: Vec<(usize, Pair)> =
        all_pairs(layout).into_iter().map(|p| (pins_inside(layout, &p), p)).collect();
    scored.sort_by_key(|(score, _)| *score);
    scored.into_iter().map(|(_, pair)| pair).collect()
}

/// Nets by `net_rule3`, then each net's pairs closest first.
pub fn pair_rule3_closest(layout: &Layout) -> Vec<Pair> {
    let mut order = Vec::new();
    for net in net_rule3(layout) {
        let comps = &layout.components[&net];
        let mut pairs = Vec::new();
        for (i, c1) in comps.iter().enumerate() {
            for c2 in comps.iter().skip(i + 1) {
                pairs.push((layout.manhattan_between(c1, c2), c1.id, c2.id));
            }
        }
        pairs.sort_by_key(|&(d, _, _)| d);
        order.extend(pairs.into_iter().map(|(_, a, b)| Pair { net: net.clone(), a, b }));
    }
    order
}

/// The regenerated pair queue for the rip-up controller.
pub fn order_pairs(rule: OrderRule, layout: &Layout) -> Vec<Pair> {
    match rule {
        OrderRule::PairRule3 => pair_rule3(layout),
        _ => pair_rule3_closest(layout),
    }
}

/// Unattempted pair of a net's components with the smallest inter-component
/// Manhattan distance.
pub fn closest_first(
    layout: &Layout,
    net: &str,
    checked: &HashSet<(CompId, CompId)>,
) -> Option<(CompId, CompId)> {
    let comps = layout.components.get(net)?;
    let mut best: Option<(i64, (CompId, CompId))> = None;
    for (i, c1) in comps.iter().enumerate() {
        for c2 in comps.iter().skip(i + 1) {
            if checked.contains(&(c1.id, c2.id)) {
                continue;
            }
            let dist = layout.manhattan_between(c1, c2);
            if best.map_or(true, |(d, _)| dist < d) {
                best = Some((dist, (c1.id, c2.id)));
            }
        }
    }
    best.map(|(_, pair)| pair)
}

fn all_pairs(layout: &Layout) -> Vec<Pair> {
    let mut pairs = Vec::new();
    for (net, comps) in &layout.components {
        for (i, c1) in comps.iter().enumerate() {
            for c2 in comps.iter().skip(i + 1) {
                pairs.push(Pair { net: net.clone(), a: c1.id, b: c2.id });
            }
        }
    }
    pairs
}

/// Pins of any net inside the joint bounding box of a pair.
fn pins_inside(layout: &Layout, pair: &Pair) -> usize {
    let key = (pair.a, pair.b);
    if let Some(&n) = layout.caches.borrow().ordering.get(&key) {
        return n;
    }
    let (Some(c1), Some(c2)) = (layout.comp(&pair.net, pair.a), layout.comp(&pair.net, pair.b))
    else {
        return usize::MAX;
    };
    let mbb = match (c1.bounds, c2.bounds) {
        (Some(b1), Some(b2)) => b1.union(b2),
        _ => return usize::MAX,
    };
    let n = layout
        .nodes
        .values()
        .flatten()
        .filter(|&&rid| mbb.overlaps_rect(&layout.rects[rid]))
        .count();
    layout.caches.borrow_mut().ordering.insert(key, n);
    n
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
    fn net_rule3_prefers_uncontested_nets() {
        // Net b's box surrounds one of a's pins; a's box is clean.
        let l = layout(vec![
            Rect::labeled(0, 0, 3, 3, M1, "b"),
            Rect::labeled(20, 20, 3, 3, M1, "b"),
            Rect::labeled(10, 10, 3, 3, M1, "a"),
            Rect::labeled(10, 16, 3, 3, M1, "a"),
        ]);
        assert_eq!(net_rule3(&l), vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn pair_rule3_scores_and_memoizes() {
        let l = layout(vec![
            Rect::labeled(0, 0, 3, 3, M1, "a"),
            Rect::labeled(0, 6, 3, 3, M1, "a"),
            Rect::labeled(30, 0, 3, 3, M1, "b"),
            Rect::labeled(30, 40, 3, 3, M1, "b"),
            Rect::labeled(31, 20, 3, 3, M1, "a"),
        ]);
        let pairs = pair_rule3(&l);
        // a has 3 components -> 3 pairs, b has 2 -> 1 pair.
        assert_eq!(pairs.len(), 4);
        // The tight a-pair containing only its own two pins comes first.
        assert_eq!(pairs[0].net, "a");
        assert!(!l.caches.borrow().ordering.is_empty());
    }

    #[test]
    fn closest_first_skips_checked() {
        let l = layout(vec![
            Rect::labeled(0, 0, 3, 3, M1, "a"),
            Rect::labeled(0, 6, 3, 3, M1, "a"),
            Rect::labeled(0, 40, 3, 3, M1, "a"),
        ]);
        let comps = &l.components["a"];
        let (i0, i1, i2) = (comps[0].id, comps[1].id, comps[2].id);
        let mut checked = HashSet::new();
        assert_eq!(closest_first(&l, "a", &checked), Some((i0, i1)));
        checked.insert((i0, i1));
        let next = closest_first(&l, "a", &checked).unwrap();
        assert_eq!(next, (i1, i2));
        checked.insert(next);
        checked.insert((i0, i2));
        assert_eq!(closest_first(&l, "a", &checked), None);
    }
}
