//! Applying the rewriter to whole class files
//!
//! A class is only rewritten if it carries the marker annotation (unless
//! [`Settings::require_marker`] is turned off). Each method body is decoded, rewritten, and
//! encoded again if anything changed.

mod class;
mod errors;
mod settings;

pub use class::*;
pub use errors::*;
pub use settings::*;
