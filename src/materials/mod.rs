//! Materials, techniques, passes, and the shared parameter table.

mod params;
mod pass;

pub use params::{ParamId, ParamValue, ParameterTable, Semantic};
pub use pass::{CollectedParams, Material, MaterialPass, Technique};
