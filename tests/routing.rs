mod common;

use charmroute::config::{Config, InputMode, RectSpec};
use charmroute::model::geom::Rect;
use charmroute::model::layout::Layout;
use charmroute::model::material::Material::*;
use charmroute::model::material::Stackup;
use charmroute::pipeline;
use charmroute::route::controller::{self, CancelToken};
use charmroute::route::order::OrderRule;
use charmroute::route::route_pair;

fn layout(depth: usize, rects: Vec<Rect>) -> Layout {
    Layout::from_rects(Stackup::new(depth), rects).unwrap()
}

fn pair_of(l: &Layout, net: &str) -> (charmroute::model::component::CompId, charmroute::model::component::CompId) {
    let comps = &l.components[net];
    (comps[0].id, comps[1].id)
}

#[test]
fn collinear_same_material_routes_straight() {
    let mut l = layout(
        11,
        vec![Rect::labeled(0, 0, 3, 3, M1, "a"), Rect::labeled(0, 10, 3, 3, M1, "a")],
    );
    let (a, b) = pair_of(&l, "a");
    let route = route_pair(&mut l, "a", a, b, "pl").unwrap().unwrap();
    let wps: Vec<_> = route.waypoints.iter().map(|w| (w.x, w.y, w.mat, w.width)).collect();
    assert_eq!(wps, vec![(0, 0, M1, 3), (0, 10, M1, 3)]);
    assert_eq!(route.cost, 84);
}

#[test]
fn corner_pair_lands_contact_at_first_corner() {
    let mut l = layout(
        11,
        vec![Rect::labeled(0, 0, 3, 3, M1, "a"), Rect::labeled(10, 10, 3, 3, M2, "a")],
    );
    let (a, b) = pair_of(&l, "a");
    let route = route_pair(&mut l, "a", a, b, "p").unwrap().unwrap();
    let contacts: Vec<_> = route.waypoints.iter().filter(|w| w.mat == M2c).collect();
    assert_eq!(contacts.len(), 1);
    // The queue is stable: the (s.x, d.y) corner wins the cost tie.
    assert_eq!((contacts[0].x, contacts[0].y), (0, 10));
    assert_eq!(contacts[0].width, 4);
}

#[test]
fn maze_hops_over_obstacle_with_two_contacts() {
    // A foreign m1 bar walls off the two pads; the only sane crossing is up
    // on m2 and back down.
    let mut l = layout(
        5,
        vec![
            Rect::labeled(0, 0, 3, 3, M1, "a"),
            Rect::labeled(0, 30, 3, 3, M1, "a"),
            Rect::labeled(0, 8, 31, 3, M1, "b"),
        ],
    );
    let (a, b) = pair_of(&l, "a");
    let route = route_pair(&mut l, "a", a, b, "l").unwrap().unwrap();
    let contacts = route.waypoints.iter().filter(|w| w.mat == M2c).count();
    assert_eq!(contacts, 2);
    assert!(route.materials.contains(M2));
    // Endpoints land on the two pads.
    let comps = &l.components["a"];
    let first = route.waypoints.first().unwrap().mat_pt();
    let last = route.waypoints.last().unwrap().mat_pt();
    assert!(comps.iter().any(|c| c.line.contains(&first)));
    assert!(comps.iter().any(|c| c.line.contains(&last)));
}

#[test]
fn pattern_falls_through_to_lee_on_shared_anchor() {
    // Overlapping pins of one net: every pattern candidate is a sub-jog
    // stub, but the maze router sees the shared point immediately.
    let mut l = layout(
        11,
        vec![Rect::labeled(0, 0, 3, 3, M1, "a"), Rect::labeled(0, 0, 4, 4, M1, "a")],
    );
    let (a, b) = pair_of(&l, "a");
    let route = route_pair(&mut l, "a", a, b, "pl").unwrap().unwrap();
    assert_eq!(route.cost, 0);
    assert_eq!(route.waypoints.len(), 1);
}

#[test]
fn blocked_row_forces_ripup_then_everything_routes() {
    // Net a routes its corner first and walls net b's only row; rip-up
    // reverses the order, and a then crosses b's row on m2.
    let mut l = layout(
        11,
        vec![
            Rect::labeled(0, 0, 3, 3, M1, "a"),
            Rect::labeled(20, 20, 3, 3, M1, "a"),
            Rect::labeled(-8, 10, 3, 3, M1, "b"),
            Rect::labeled(30, 10, 3, 3, M1, "b"),
        ],
    );
    let stats =
        controller::lafrieda(&mut l, OrderRule::PairRule3, "p", &CancelToken::new()).unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.success, 2);
    assert!(stats.ripups >= 1);
    for net in ["a", "b"] {
        assert_eq!(l.components[net].len(), 1, "net {net} should be one component");
        assert!(l.components[net][0].is_connected(&l.rects));
    }
}

#[test]
fn cancelled_pipeline_emits_interrupted_script() {
    let dir = std::env::temp_dir().join("charmroute-cancel-test");
    std::fs::create_dir_all(&dir).unwrap();
    let config = Config {
        layers: 11,
        order: OrderRule::PairRule3,
        route_modes: "pl".into(),
        input_mode: InputMode::Explicit,
        cell_dir: None,
        nodefile: None,
        netfile: None,
        placefile: None,
        rects: vec![
            RectSpec { x: 0, y: 0, w: 3, h: 3, material: "m1".into(), label: Some("a".into()) },
            RectSpec { x: 0, y: 20, w: 3, h: 3, material: "m1".into(), label: Some("a".into()) },
        ],
        output: dir.join("layout.tcl"),
    };
    let cancel = CancelToken::new();
    cancel.cancel();
    let (stats, output) = pipeline::run(&config, &cancel).unwrap();
    assert!(stats.interrupted);
    assert!(output.file_name().unwrap().to_string_lossy().starts_with("interrupted-"));
    let script = std::fs::read_to_string(&output).unwrap();
    assert!(script.lines().next().unwrap().starts_with("box "));
    assert!(script.contains("paint m1"));
}

#[test]
fn random_case_routes_without_violating_spacing() {
    let rects = common::generate_case(8, 3, 40, 100);
    assert!(!rects.is_empty());
    let mut l = layout(11, rects);
    let stats = controller::naive(&mut l, "pl", &CancelToken::new()).unwrap();
    assert!(stats.success <= stats.total);

    // Emitted wires of different nets keep their same-layer spacing.
    let mut routed: Vec<(String, Rect)> = Vec::new();
    for (net, comps) in &l.components {
        for comp in comps {
            for rect in comp.seg_rects.values() {
                routed.push((net.clone(), rect.clone()));
            }
        }
    }
    for (i, (net1, r1)) in routed.iter().enumerate() {
        for (net2, r2) in routed.iter().skip(i + 1) {
            if net1 != net2 && r1.mat.layer() == r2.mat.layer() {
                assert!(
                    !r1.bloated(r1.mat.spacing()).overlaps(r2),
                    "{net1} and {net2} too close: {r1:?} vs {r2:?}"
                );
            }
        }
    }

    let mut out = Vec::new();
    charmroute::emit::write_layout(&mut out, &l, &Default::default()).unwrap();
    assert!(!out.is_empty());
}
