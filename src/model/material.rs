use enumset::EnumSetType;
use strum::{Display, EnumIter, EnumString};

/// Fabrication materials. Routing materials carry wires, contact materials
/// bridge the routing layer directly below and above them, and diffusion
/// materials only appear in cell geometry.
#[derive(EnumSetType, Debug, Hash, PartialOrd, Ord, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Material {
    Poly,
    Pc,
    M1,
    M2c,
    M2,
    M3c,
    M3,
    M4c,
    M4,
    M5c,
    M5,
    Ndiff,
    Pdiff,
    Ndc,
    Pdc,
}

use Material::*;

impl Material {
    pub const fn is_contact(self) -> bool {
        matches!(self, Pc | M2c | M3c | M4c | M5c | Ndc | Pdc)
    }

    pub const fn is_routing(self) -> bool {
        matches!(self, Poly | M1 | M2 | M3 | M4 | M5)
    }

    pub const fn min_width(self) -> i64 {
        match self {
            M1 | M2 | M3 | M4 | M5 => 3,
            Poly => 2,
            Pc | M2c | M3c | M4c | M5c | Ndc | Pdc => 4,
            Ndiff | Pdiff => 1,
        }
    }

    /// Minimum same-layer spacing. Contacts inherit the larger spacing of the
    /// layers they bridge.
    pub fn spacing(self) -> i64 {
        match self {
            M1 | M2 | M3 | M4 | M5 | Poly => 3,
            Ndiff | Pdiff => 1,
            contact => {
                contact.bridges().iter().map(|m| m.spacing()).max().unwrap_or(1)
            }
        }
    }

    pub const fn cost(self) -> u64 {
        match self {
            M1 | M2 | M3 | M4 | M5 | M2c => 2,
            M3c | M4c | M5c | Poly | Pc | Ndc | Pdc => 5,
            Ndiff | Pdiff => 5,
        }
    }

    /// End-of-line spacing used to contour segment rectangles. Materials
    /// without an explicit rule fall back to their spacing.
    pub fn end_of_line(self) -> i64 {
        match self {
            Poly | M1 | M2 | M3 | M4 | M5 => 4,
            other => other.spacing(),
        }
    }

    /// Minimum jog length before a wire may turn.
    pub const fn point_to_edge(self) -> i64 {
        match self {
            Poly => 5,
            M1 | M2 | M3 | M4 | M5 => 3,
            other => other.min_width(),
        }
    }

    /// Minimum accumulated area before a wire may change layer.
    pub const fn min_area(self) -> i64 {
        match self {
            Poly => 4,
            M1 => 36,
            M2 | M3 | M4 | M5 => 40,
            other => other.min_width() * other.min_width(),
        }
    }

    /// Index on the layer stack. Adjacent routing layers differ by two with
    /// the contact at the odd index between them. Diffusion shares the poly
    /// plane and its contacts share the pc plane.
    pub const fn layer(self) -> usize {
        match self {
            Poly | Ndiff | Pdiff => 0,
            Pc | Ndc | Pdc => 1,
            M1 => 2,
            M2c => 3,
            M2 => 4,
            M3c => 5,
            M3 => 6,
            M4c => 7,
            M4 => 8,
            M5c => 9,
            M5 => 10,
        }
    }

    /// Routing materials a contact lands on. Diffusion contacts only reach
    /// m1; diffusion itself is not routable.
    pub const fn bridges(self) -> &'static [Material] {
        match self {
            Pc => &[Poly, M1],
            M2c => &[M1, M2],
            M3c => &[M2, M3],
            M4c => &[M3, M4],
            M5c => &[M4, M5],
            Ndc | Pdc => &[M1],
            _ => &[],
        }
    }

    /// Materials electrically continuous with this one through a shared
    /// contact, used when resolving pins declared on a neighboring material.
    pub const fn connected(self) -> &'static [Material] {
        match self {
            Poly => &[Pc],
            Pc => &[Poly, M1, M2c],
            M1 => &[Pc, M2c],
            M2 => &[M2c, M3c],
            M3 => &[M3c],
            M2c => &[M1, Pc, M2, M3c],
            M3c => &[M2, M2c, M3],
            _ => &[],
        }
    }

    /// Contact bridging exactly the two given routing materials, if any.
    pub fn contact_between(a: Material, b: Material) -> Option<Material> {
        if a == b {
            return None;
        }
        [Pc, M2c, M3c, M4c, M5c].into_iter().find(|c| {
            let br = c.bridges();
            br.contains(&a) && br.contains(&b)
        })
    }
}

/// The canonical chain of materials on the layer stack, bottom to top.
const CHAIN: [Material; 11] = [Poly, Pc, M1, M2c, M2, M3c, M3, M4c, M4, M5c, M5];

/// Usable portion of the layer stack. Bounds the occupancy grid and the Lee
/// router's vertical moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stackup {
    depth: usize,
}

impl Stackup {
    pub fn new(depth: usize) -> Self {
        Self { depth: depth.min(CHAIN.len()) }
    }

    /// Number of layer indices on the grid.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Canonical material at a layer index, if the index is on the stack.
    pub fn mat_at(&self, layer: usize) -> Option<Material> {
        if layer < self.depth {
            Some(CHAIN[layer])
        } else {
            None
        }
    }

    pub fn routing_mats(&self) -> impl Iterator<Item = Material> + '_ {
        CHAIN.iter().copied().take(self.depth).filter(|m| m.is_routing())
    }
}

impl Default for Stackup {
    fn default() -> Self {
        Self::new(CHAIN.len())
    }
}
