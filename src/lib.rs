//! Detail router for placed standard-cell layouts: connects labeled pins on
//! a layered manufacturing grid with pattern and Lee maze search under a
//! fixed design-rule set, and emits the result as a drawing script.

pub mod config;
pub mod drc;
pub mod emit;
pub mod mag;
pub mod model;
pub mod pipeline;
pub mod route;
