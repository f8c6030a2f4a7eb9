use charmroute::model::geom::Rect;
use charmroute::model::material::Material;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Scatters random pins over a square region, one net label per pin drawn
/// from `n_nets` names, keeping every pin clear of the others by `spacing`.
pub fn generate_case(n_nodes: usize, n_nets: usize, dim: i64, seed: u64) -> Vec<Rect> {
    const MATS: [Material; 3] = [Material::Ndc, Material::M3, Material::M4];
    const LIMIT: usize = 100;
    let spacing = 4;
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut rects: Vec<Rect> = Vec::new();
    let mut contours: Vec<Rect> = Vec::new();
    for _ in 0..n_nodes {
        let mat = MATS[rng.gen_range(0..MATS.len())];
        let width = mat.min_width();
        for _ in 0..LIMIT {
            let x = rng.gen_range(0..=dim);
            let y = rng.gen_range(0..=dim);
            let net = rng.gen_range(0..n_nets);
            let rect = Rect::labeled(x, y, width, width, mat, format!("n{net}"));
            if contours.iter().all(|c| !c.overlaps(&rect)) {
                contours.push(rect.bloated(spacing));
                rects.push(rect);
                break;
            }
        }
    }
    rects
}
