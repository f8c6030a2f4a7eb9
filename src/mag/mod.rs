pub mod placement;

use std::fs;
use std::path::Path;

use eyre::{bail, ensure, Result, WrapErr};

use crate::model::geom::Rect;
use crate::model::material::Material;

/// Materials a `.mag` section tag paints. Transistor and contact sections
/// emit one rectangle per material.
fn section_materials(tag: &str) -> Option<&'static [Material]> {
    use Material::*;
    Some(match tag {
        "ntransistor" => &[Ndiff, Poly],
        "ptransistor" => &[Pdiff, Poly],
        "ndiffusion" => &[Ndiff],
        "pdiffusion" => &[Pdiff],
        "ndcontact" => &[Ndc, Ndiff],
        "pdcontact" => &[Pdc, Pdiff],
        "polysilicon" => &[Poly],
        "polycontact" => &[Pc, Poly],
        "metal1" => &[M1],
        "metal2" => &[M2],
        "metal3" => &[M3],
        "m2contact" => &[M2c, M1, M2],
        "m3contact" => &[M3c, M2, M3],
        _ => return None,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct MagOpts {
    /// Translate so the lowest corner lands on (0, 0).
    pub correct_offset: bool,
    /// Attach `rlabel` texts to the matching rectangles. Placement loading
    /// leaves labels to the netlist instead.
    pub keep_labels: bool,
}

impl Default for MagOpts {
    fn default() -> Self {
        Self { correct_offset: true, keep_labels: false }
    }
}

/// Reads a magic cell file into rectangles.
pub fn read(path: &Path, opts: &MagOpts) -> Result<Vec<Rect>> {
    let content =
        fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?;
    read_str(&content, opts).wrap_err_with(|| format!("parsing {}", path.display()))
}

pub fn read_str(content: &str, opts: &MagOpts) -> Result<Vec<Rect>> {
    let mut lines = content.lines();
    ensure!(
        lines.next().map(str::trim) == Some("magic"),
        "not a magic file: missing magic header"
    );

    let mut tag: Option<String> = None;
    let mut sections: Vec<(String, [i64; 4])> = Vec::new();
    let mut labels: Vec<(String, [i64; 4], String)> = Vec::new();
    let (mut min_x, mut min_y) = (i64::MAX, i64::MAX);

    for line in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with("tech") || line.starts_with("timestamp") {
            continue;
        }
        if line.starts_with("<<") && line.ends_with(">>") {
            tag = Some(line.trim_start_matches("<<").trim_end_matches(">>").trim().to_owned());
            continue;
        }
        let toks: Vec<&str> = line.split_whitespace().collect();
        match toks.first().copied() {
            Some("rect") => {
                ensure!(toks.len() == 5, "malformed rect line {line:?}");
                let mut c = [0i64; 4];
                for (i, t) in toks[1..].iter().enumerate() {
                    c[i] = t.parse().wrap_err_with(|| format!("bad coordinate in {line:?}"))?;
                }
                min_x = min_x.min(c[0]);
                min_y = min_y.min(c[1]);
                if let Some(t) = &tag {
                    if section_materials(t).is_some() {
                        sections.push((t.clone(), c));
                    }
                }
            }
            Some("rlabel") if tag.as_deref() == Some("labels") => {
                ensure!(toks.len() >= 8, "malformed rlabel line {line:?}");
                let mut c = [0i64; 4];
                for (i, t) in toks[2..6].iter().enumerate() {
                    c[i] = t.parse().wrap_err_with(|| format!("bad coordinate in {line:?}"))?;
                }
                labels.push((toks[1].to_owned(), c, toks[7].to_owned()));
            }
            _ => {}
        }
    }

    let mut out: Vec<Rect> = Vec::new();
    let mut poly: Vec<Rect> = Vec::new();
    for (t, [x0, y0, x1, y1]) in &sections {
        let mats = section_materials(t).expect("filtered above");
        let matched: Vec<&str> = labels
            .iter()
            .filter(|(lt, lb, _)| {
                lt == t && lb[0] >= *x0 && lb[1] >= *y0 && lb[2] <= *x1 && lb[3] <= *y1
            })
            .map(|(_, _, text)| text.as_str())
            .collect();
        for (i, &m) in mats.iter().enumerate() {
            let dest = if m == Material::Poly { &mut poly } else { &mut out };
            // Only the section's primary material carries the label.
            if opts.keep_labels && i == 0 && !matched.is_empty() {
                for text in &matched {
                    dest.push(Rect::labeled(*x0, *y0, x1 - x0, y1 - y0, m, *text));
                }
            } else {
                dest.push(Rect::new(*x0, *y0, x1 - x0, y1 - y0, m));
            }
        }
    }

    // Adjacent poly and m3 paint merges until fixpoint.
    out.extend(merge_adjacent(poly)?);
    let (m3, mut out): (Vec<Rect>, Vec<Rect>) =
        out.into_iter().partition(|r| r.mat == Material::M3);
    out.extend(merge_adjacent(m3)?);

    if opts.correct_offset && min_x != i64::MAX {
        for r in &mut out {
            r.offset(-min_x, -min_y);
        }
    }
    Ok(out)
}

/// Greedily merges edge-sharing, aligned rectangles of the same material
/// until no merge applies.
fn merge_adjacent(mut rects: Vec<Rect>) -> Result<Vec<Rect>> {
    loop {
        let mut merged = None;
        'scan: for i in 0..rects.len() {
            for j in (i + 1)..rects.len() {
                if let Some(m) = merge_two(&rects[i], &rects[j])? {
                    merged = Some((i, j, m));
                    break 'scan;
                }
            }
        }
        match merged {
            Some((i, j, m)) => {
                rects[i] = m;
                rects.swap_remove(j);
            }
            None => return Ok(rects),
        }
    }
}

fn merge_two(a: &Rect, b: &Rect) -> Result<Option<Rect>> {
    if a.mat != b.mat {
        return Ok(None);
    }
    let label = match (&a.label, &b.label) {
        (Some(la), Some(lb)) if la != lb => {
            bail!("adjacent rectangles carry different labels {la:?} and {lb:?}")
        }
        (Some(l), _) | (_, Some(l)) => Some(l.clone()),
        (None, None) => None,
    };
    let horizontal = a.y == b.y && a.h == b.h && (a.x + a.w == b.x || b.x + b.w == a.x);
    let vertical = a.x == b.x && a.w == b.w && (a.y + a.h == b.y || b.y + b.h == a.y);
    if !horizontal && !vertical {
        return Ok(None);
    }
    let mut m = Rect::new(
        a.x.min(b.x),
        a.y.min(b.y),
        if horizontal { a.w + b.w } else { a.w },
        if horizontal { a.h } else { a.h + b.h },
        a.mat,
    );
    m.label = label;
    Ok(Some(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::material::Material::*;

    const CELL: &str = "\
magic
tech scmos
timestamp 1
<< metal1 >>
rect 0 0 4 4
rect 4 0 8 4
<< polysilicon >>
rect 0 8 2 12
rect 2 8 4 12
<< m2contact >>
rect 10 0 14 4
<< labels >>
rlabel metal1 0 0 4 4 0 vdd
<< end >>
";

    #[test]
    fn reads_sections_and_merges_poly() {
        let rects = read_str(CELL, &MagOpts { correct_offset: false, keep_labels: true }).unwrap();
        // Two m1 rects, one merged poly rect, three m2contact rects.
        let polys: Vec<_> = rects.iter().filter(|r| r.mat == Poly).collect();
        assert_eq!(polys.len(), 1);
        assert_eq!((polys[0].x, polys[0].y, polys[0].w, polys[0].h), (0, 8, 4, 4));
        assert_eq!(rects.iter().filter(|r| r.mat == M1).count(), 2);
        for m in [M2c, M1, M2] {
            assert!(rects.iter().any(|r| r.mat == m && r.x == 10));
        }
    }

    #[test]
    fn label_attaches_to_primary_material() {
        let rects = read_str(CELL, &MagOpts { correct_offset: false, keep_labels: true }).unwrap();
        let labeled: Vec<_> = rects.iter().filter(|r| r.label.is_some()).collect();
        assert_eq!(labeled.len(), 1);
        assert_eq!(labeled[0].mat, M1);
        assert_eq!(labeled[0].label.as_deref(), Some("vdd"));
        // Stripping labels is the default.
        let stripped = read_str(CELL, &MagOpts { correct_offset: false, ..Default::default() })
            .unwrap();
        assert!(stripped.iter().all(|r| r.label.is_none()));
    }

    #[test]
    fn corrects_offset_to_origin() {
        let shifted = "magic\n<< metal1 >>\nrect 5 7 9 11\n<< end >>\n";
        let rects = read_str(shifted, &MagOpts::default()).unwrap();
        assert_eq!((rects[0].x, rects[0].y), (0, 0));
    }

    #[test]
    fn rejects_non_magic_file() {
        assert!(read_str("not magic\n", &MagOpts::default()).is_err());
    }

    #[test]
    fn merge_rejects_conflicting_labels() {
        let a = Rect::labeled(0, 0, 4, 4, Poly, "x");
        let b = Rect::labeled(4, 0, 4, 4, Poly, "y");
        assert!(merge_two(&a, &b).is_err());
    }
}
