//! Terminal output
//!
//! Stats sampling, layout, and the neon palette used to draw it.

pub mod render;
pub mod stats;
pub mod theme;

pub use render::{Line, RenderContext};
pub use stats::StatsAggregator;
pub use theme::{Theme, Tone};
