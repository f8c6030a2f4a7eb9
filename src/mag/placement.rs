use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use eyre::{bail, ensure, eyre, Result, WrapErr};
use tracing::{debug, warn};

use crate::mag::{self, MagOpts};
use crate::model::cell::{Cell, CellTemplate};
use crate::model::geom::{Pt, Rect};
use crate::model::material::Material;

/// The three sibling files of a placement bundle, plus the cell library
/// directory.
#[derive(Debug, Clone)]
pub struct PlacementPaths {
    pub cell_dir: PathBuf,
    pub nodes: PathBuf,
    pub nets: PathBuf,
    pub place: PathBuf,
}

#[derive(Debug)]
struct BlockState {
    kind: String,
    x: i64,
    y: i64,
    w: i64,
    h: i64,
    rects: Vec<Rect>,
}

/// Loads the placement bundle: block declarations (pulling cell geometry
/// from the library), pin labels from the netlist, then block origins.
/// Returns the placed cells with their offset, labeled geometry.
pub fn read_blocks(paths: &PlacementPaths) -> Result<Vec<(Cell, Vec<Rect>)>> {
    let mut templates: HashMap<String, CellTemplate> = HashMap::new();
    let mut blocks: HashMap<String, BlockState> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    read_nodes(&paths.nodes, &paths.cell_dir, &mut templates, &mut blocks, &mut order)?;
    read_nets(&paths.nets, &mut blocks)?;
    read_placement(&paths.place, &mut blocks)?;

    debug!(blocks = order.len(), cells = templates.len(), "placement loaded");
    order
        .into_iter()
        .map(|key| {
            let b = blocks.remove(&key).expect("declared block");
            let cell =
                Cell { key, kind: b.kind.clone(), x: b.x, y: b.y, w: b.w, h: b.h };
            Ok((cell, b.rects))
        })
        .collect()
}

fn lines_of(path: &Path) -> Result<Vec<Vec<String>>> {
    let content =
        fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?;
    Ok(content
        .lines()
        .map(|l| l.split_whitespace().map(str::to_owned).collect::<Vec<_>>())
        .filter(|toks: &Vec<String>| !toks.is_empty() && !toks[0].starts_with('#'))
        .collect())
}

/// `oNNN w h cell_type` declares a block instance of a library cell.
fn read_nodes(
    path: &Path,
    cell_dir: &Path,
    templates: &mut HashMap<String, CellTemplate>,
    blocks: &mut HashMap<String, BlockState>,
    order: &mut Vec<String>,
) -> Result<()> {
    for toks in lines_of(path)? {
        if toks.len() != 4 {
            continue;
        }
        let (key, kind) = (toks[0].clone(), toks[3].clone());
        let w = parse_coord(&toks[1])?;
        let h = parse_coord(&toks[2])?;
        if let Some(t) = templates.get(&kind) {
            ensure!(t.w == w && t.h == h, "cell {kind} width and height mismatch");
        } else {
            let cellfile = cell_dir.join(format!("{kind}.mag"));
            let rects = mag::read(&cellfile, &MagOpts::default())?;
            templates.insert(kind.clone(), CellTemplate::new(w, h, rects));
        }
        let rects = templates[&kind].rects.clone();
        blocks.insert(key.clone(), BlockState { kind, x: 0, y: 0, w, h, rects });
        order.push(key);
    }
    Ok(())
}

/// `NetDegree` blocks followed by `oNNN _ _ x y mat` pin assignments.
fn read_nets(path: &Path, blocks: &mut HashMap<String, BlockState>) -> Result<()> {
    let mut current: Option<String> = None;
    for toks in lines_of(path)? {
        if toks[0] == "NetDegree" {
            ensure!(toks.len() >= 4, "malformed NetDegree line in {}", path.display());
            current = Some(toks[3].clone());
            continue;
        }
        if !toks[0].starts_with('o') {
            continue;
        }
        ensure!(toks.len() >= 6, "malformed pin line in {}", path.display());
        let Some(net) = current.clone() else {
            bail!("pin assignment before any NetDegree in {}", path.display());
        };
        let block = match blocks.get_mut(&toks[0]) {
            Some(b) => b,
            None => bail!("pin names undeclared block {}", toks[0]),
        };
        let x = parse_coord(&toks[3])?;
        let y = parse_coord(&toks[4])?;
        let mat = Material::from_str(&toks[5])
            .map_err(|_| eyre!("unknown material {} in {}", toks[5], path.display()))?;
        if !label_pin(&mut block.rects, &net, x, y, mat) {
            warn!(net = %net, block = %toks[0], ?mat, x, y, "pin not found in cell geometry");
        }
    }
    Ok(())
}

/// `oNNN x y …` places a block's origin.
fn read_placement(path: &Path, blocks: &mut HashMap<String, BlockState>) -> Result<()> {
    for toks in lines_of(path)? {
        if !toks[0].starts_with('o') || toks.len() < 3 {
            continue;
        }
        let Some(block) = blocks.get_mut(&toks[0]) else {
            bail!("placement names undeclared block {}", toks[0]);
        };
        let x = parse_coord(&toks[1])?;
        let y = parse_coord(&toks[2])?;
        block.x = x;
        block.y = y;
        for r in &mut block.rects {
            r.offset(x, y);
        }
    }
    Ok(())
}

fn parse_coord(tok: &str) -> Result<i64> {
    let v: f64 = tok.parse().wrap_err_with(|| format!("bad coordinate {tok:?}"))?;
    Ok(v as i64)
}

/// Labels the pin rectangle containing the point, trying the declared
/// material first and then the materials connected to it through contacts.
fn label_pin(rects: &mut [Rect], net: &str, x: i64, y: i64, mat: Material) -> bool {
    for m in std::iter::once(mat).chain(mat.connected().iter().copied()) {
        for r in rects.iter_mut() {
            if r.mat == m && r.contains(Pt::new(x, y)) {
                r.label = Some(net.to_owned());
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::material::Material::*;

    #[test]
    fn label_pin_falls_back_to_connected_material() {
        let mut rects = vec![Rect::new(0, 0, 4, 4, M1), Rect::new(0, 0, 4, 4, M2c)];
        // Pin declared on m2 lands on the m2c contact through connectivity.
        assert!(label_pin(&mut rects, "n1", 1, 1, M2));
        assert_eq!(rects[1].label.as_deref(), Some("n1"));
        assert!(rects[0].label.is_none());
    }

    #[test]
    fn label_pin_misses_cleanly() {
        let mut rects = vec![Rect::new(0, 0, 4, 4, M1)];
        assert!(!label_pin(&mut rects, "n1", 10, 10, M1));
        assert!(rects[0].label.is_none());
    }

    #[test]
    fn reads_a_full_bundle() {
        let dir = std::env::temp_dir().join("charmroute-placement-test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("inv.mag"),
            "magic\n<< metal1 >>\nrect 0 0 4 4\nrect 6 0 10 4\n<< end >>\n",
        )
        .unwrap();
        std::fs::write(dir.join("t.nodes"), "# comment\no0 12 12 inv\no1 12 12 inv\n").unwrap();
        std::fs::write(
            dir.join("t.nets"),
            "NetDegree : 2 n1\no0 I : 1 1 m1\no1 I : 7 1 m1\n",
        )
        .unwrap();
        std::fs::write(dir.join("t.pl"), "o0 0 0\no1 40 0\n").unwrap();
        let paths = PlacementPaths {
            cell_dir: dir.clone(),
            nodes: dir.join("t.nodes"),
            nets: dir.join("t.nets"),
            place: dir.join("t.pl"),
        };
        let blocks = read_blocks(&paths).unwrap();
        assert_eq!(blocks.len(), 2);
        let (cell1, rects1) = &blocks[1];
        assert_eq!((cell1.x, cell1.y), (40, 0));
        assert_eq!(rects1.iter().filter(|r| r.label.is_some()).count(), 1);
        // Offsets applied after pin labeling.
        let pinned = rects1.iter().find(|r| r.label.is_some()).unwrap();
        assert_eq!((pinned.x, pinned.y), (46, 0));
    }
}
