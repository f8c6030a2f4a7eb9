use std::io::Write;
use std::path::PathBuf;

use eyre::Result;

use crate::config::InputMode;
use crate::model::cell::Cell;
use crate::model::component::Component;
use crate::model::geom::Rect;
use crate::model::layout::Layout;

#[derive(Debug, Clone, Default)]
pub struct EmitOpts {
    pub cell_dir: PathBuf,
    /// `dump` the cell files instead of `getcell`-ing them.
    pub dump: bool,
}

/// Serializes the layout as a drawing script: the loaded geometry (raw
/// rectangles or placed cells plus pins), then every routed component.
pub fn write_layout<W: Write>(w: &mut W, layout: &Layout, opts: &EmitOpts) -> Result<()> {
    match layout.mode {
        InputMode::Explicit => {
            for rect in &layout.rects {
                write_rect(w, rect)?;
            }
        }
        InputMode::Placed => {
            for cell in &layout.blocks {
                write_cell(w, cell, opts)?;
            }
            for rids in layout.nodes.values() {
                for &rid in rids {
                    write_rect(w, &layout.rects[rid])?;
                }
            }
        }
    }
    for comps in layout.components.values() {
        for comp in comps {
            write_component(w, comp)?;
        }
    }
    Ok(())
}

fn write_rect<W: Write>(w: &mut W, rect: &Rect) -> Result<()> {
    writeln!(w, "box {} {} {} {}", rect.x, rect.y, rect.x + rect.w, rect.y + rect.h)?;
    writeln!(w, "paint {}", rect.mat)?;
    if let Some(label) = &rect.label {
        // Net labels ride on contacts, where both bridged layers can see them.
        if rect.mat.is_contact() {
            writeln!(w, "move right 1")?;
            writeln!(w, "move up 1")?;
            writeln!(w, "box w 0")?;
            writeln!(w, "box h 0")?;
            writeln!(w, "label {label}")?;
        }
    }
    Ok(())
}

fn write_cell<W: Write>(w: &mut W, cell: &Cell, opts: &EmitOpts) -> Result<()> {
    writeln!(w, "box position {} {}", cell.x, cell.y)?;
    let file = opts.cell_dir.join(format!("{}.mag", cell.kind));
    let verb = if opts.dump { "dump" } else { "getcell" };
    writeln!(w, "{verb} {}", file.display())?;
    Ok(())
}

/// Pins were emitted with the base geometry; only wires and notch fillers
/// need drawing.
fn write_component<W: Write>(w: &mut W, comp: &Component) -> Result<()> {
    for seg in &comp.segments {
        write_rect(w, &seg.rect(Some(comp.label.as_str()), false))?;
    }
    let mut fillers: Vec<_> = comp.fillers.iter().collect();
    fillers.sort_by_key(|(k, _)| *k);
    for (_, f) in fillers {
        write_rect(w, f)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::material::Material::*;
    use crate::model::material::Stackup;

    #[test]
    fn explicit_layout_emits_boxes() {
        let layout = Layout::from_rects(
            Stackup::new(11),
            vec![Rect::labeled(0, 0, 3, 3, M1, "a"), Rect::new(5, 5, 4, 4, M2)],
        )
        .unwrap();
        let mut out = Vec::new();
        write_layout(&mut out, &layout, &EmitOpts::default()).unwrap();
        let script = String::from_utf8(out).unwrap();
        assert!(script.contains("box 0 0 3 3\npaint m1\n"));
        assert!(script.contains("box 5 5 9 9\npaint m2\n"));
        // Plain metal pins carry no label command.
        assert!(!script.contains("label"));
    }

    #[test]
    fn labeled_contact_gets_label_block() {
        let layout =
            Layout::from_rects(Stackup::new(11), vec![Rect::labeled(0, 0, 4, 4, M2c, "net7")])
                .unwrap();
        let mut out = Vec::new();
        write_layout(&mut out, &layout, &EmitOpts::default()).unwrap();
        let script = String::from_utf8(out).unwrap();
        assert!(script.contains("paint m2c\n"));
        assert!(script.contains("label net7\n"));
    }
}
