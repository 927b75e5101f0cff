pub mod classifier;

pub use classifier::{classify_open_location, classify_opening_trend, classify_pdc};
