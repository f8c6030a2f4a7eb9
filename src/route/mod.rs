pub mod controller;
pub mod lee;
pub mod order;
pub mod pattern;
pub mod spq;

use eyre::{bail, ensure, eyre, Result};
use tracing::debug;

use crate::model::component::CompId;
use crate::model::layout::Layout;
use crate::model::route::Route;

/// Tries the routers named by the mode string in order: `p` is the pattern
/// router (with its elevation preamble), `l` the Lee maze router. Returns the
/// first route found, or `None` when every router gave up.
pub fn route_pair(
    layout: &mut Layout,
    net: &str,
    a: CompId,
    b: CompId,
    modes: &str,
) -> Result<Option<Route>> {
    {
        let c1 = comp(layout, net, a)?;
        let c2 = comp(layout, net, b)?;
        ensure!(c1.label == c2.label, "different nets {} {}", c1.label, c2.label);
    }
    debug!(net, %a, %b, "routing pair");
    for mode in modes.chars() {
        let route = match mode {
            'p' => {
                elevate_pair(layout, net, a, b)?;
                pattern::route_components(comp(layout, net, a)?, comp(layout, net, b)?, layout)
            }
            'l' => {
                lee::route_components(comp(layout, net, a)?, comp(layout, net, b)?, layout, false)
            }
            other => bail!("invalid route mode {other:?}"),
        };
        if let Some(route) = route {
            debug!(net, cost = route.cost, "pair routed");
            return Ok(Some(route));
        }
    }
    debug!(net, "pair unroutable");
    Ok(None)
}

fn comp<'a>(
    layout: &'a Layout,
    net: &str,
    id: CompId,
) -> Result<&'a crate::model::component::Component> {
    layout.comp(net, id).ok_or_else(|| eyre!("unknown component {id} on net {net}"))
}

/// Pattern preamble: when one component tops out below the other, raise it to
/// the other's top routing layer before enumerating candidates.
fn elevate_pair(layout: &mut Layout, net: &str, a: CompId, b: CompId) -> Result<()> {
    let (t1, t2) = {
        let c1 = comp(layout, net, a)?;
        let c2 = comp(layout, net, b)?;
        (c1.top_routing_layer(), c2.top_routing_layer())
    };
    let (Some(t1), Some(t2)) = (t1, t2) else {
        return Ok(());
    };
    if t1 == t2 {
        return Ok(());
    }
    let (low, dest_layer) = if t1 < t2 { (a, t2) } else { (b, t1) };
    let Some(dest) = layout.stackup.mat_at(dest_layer) else {
        return Ok(());
    };
    let Some(idx) = layout.comp_pos(net, low) else {
        return Ok(());
    };
    debug!(net, comp = %low, ?dest, "elevating the lower component");
    layout.elevate_component(net, idx, dest)?;
    Ok(())
}
