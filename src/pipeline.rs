use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use tracing::info;

use crate::config::{Config, InputMode};
use crate::emit::{self, EmitOpts};
use crate::model::layout::Layout;
use crate::model::material::Stackup;
use crate::route::controller::{self, CancelToken, RouteStats};

/// Loads the layout, routes it, and writes the drawing script. A cancelled
/// run still emits whatever was routed, under an `interrupted-` name.
pub fn run(config: &Config, cancel: &CancelToken) -> Result<(RouteStats, PathBuf)> {
    config.validate()?;
    let stackup = Stackup::new(config.layers);
    let mut layout = match config.input_mode {
        InputMode::Explicit => Layout::from_rects(stackup, config.explicit_rects()?)?,
        InputMode::Placed => Layout::from_placement(stackup, &config.placement_paths()?)?,
    };

    let stats = controller::run(&mut layout, config.order, &config.route_modes, cancel)?;

    let output =
        if stats.interrupted { interrupted_name(&config.output) } else { config.output.clone() };
    let file = File::create(&output)
        .wrap_err_with(|| format!("creating output {}", output.display()))?;
    let mut w = BufWriter::new(file);
    let opts = EmitOpts { cell_dir: config.cell_dir.clone().unwrap_or_default(), dump: false };
    emit::write_layout(&mut w, &layout, &opts)?;
    info!(output = %output.display(), "layout written");
    Ok((stats, output))
}

fn interrupted_name(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    path.with_file_name(format!("interrupted-{name}"))
}
