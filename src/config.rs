use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use eyre::{ensure, eyre, Result, WrapErr};
use serde::{Deserialize, Serialize};

use crate::mag::placement::PlacementPaths;
use crate::model::geom::Rect;
use crate::model::material::Material;
use crate::route::order::OrderRule;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    Explicit,
    Placed,
}

/// An explicit input rectangle, for configs that carry their geometry
/// inline instead of a placement bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RectSpec {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
    pub material: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// A run configuration, usually loaded from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Grid depth: number of layer indices available to the router.
    pub layers: usize,
    pub order: OrderRule,
    /// Routers to try per pair, in order: a non-empty subset of "pl".
    pub route_modes: String,
    pub input_mode: InputMode,
    #[serde(default)]
    pub cell_dir: Option<PathBuf>,
    #[serde(default)]
    pub nodefile: Option<PathBuf>,
    #[serde(default)]
    pub netfile: Option<PathBuf>,
    #[serde(default)]
    pub placefile: Option<PathBuf>,
    #[serde(default)]
    pub rects: Vec<RectSpec>,
    pub output: PathBuf,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let content =
            fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .wrap_err_with(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.route_modes.is_empty(), "route_modes must name at least one router");
        for c in self.route_modes.chars() {
            ensure!(
                c == 'p' || c == 'l',
                "invalid route mode {c:?}: only 'p' (pattern) and 'l' (lee) exist"
            );
        }
        ensure!(self.layers >= 3, "need at least 3 layers (poly, pc, m1)");
        match self.input_mode {
            InputMode::Explicit => {
                ensure!(!self.rects.is_empty(), "explicit mode without rects");
            }
            InputMode::Placed => {
                for (name, path) in [
                    ("cell_dir", &self.cell_dir),
                    ("nodefile", &self.nodefile),
                    ("netfile", &self.netfile),
                    ("placefile", &self.placefile),
                ] {
                    ensure!(path.is_some(), "placed mode requires {name}");
                }
            }
        }
        Ok(())
    }

    /// The explicit rectangles, materialized.
    pub fn explicit_rects(&self) -> Result<Vec<Rect>> {
        self.rects
            .iter()
            .map(|s| {
                let mat = Material::from_str(&s.material)
                    .map_err(|_| eyre!("unknown material {:?}", s.material))?;
                let mut r = Rect::new(s.x, s.y, s.w, s.h, mat);
                r.label = s.label.clone();
                Ok(r)
            })
            .collect()
    }

    pub fn placement_paths(&self) -> Result<PlacementPaths> {
        let get = |name: &str, p: &Option<PathBuf>| {
            p.clone().ok_or_else(|| eyre!("placed mode requires {name}"))
        };
        Ok(PlacementPaths {
            cell_dir: get("cell_dir", &self.cell_dir)?,
            nodes: get("nodefile", &self.nodefile)?,
            nets: get("netfile", &self.netfile)?,
            place: get("placefile", &self.placefile)?,
        })
    }
}
