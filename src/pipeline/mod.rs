//! Target and feature pipeline: labels, scaling and feature selection

pub mod scaling;
pub mod selection;
pub mod target;

pub use scaling::MinMaxScaler;
pub use selection::{CumulativeImportanceSelector, Selection};
pub use target::FiveCategoryTarget;
