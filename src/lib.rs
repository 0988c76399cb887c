//! Rewrite placeholder calls in JVM class files into the bytecode they describe
//!
//!   - [`jvm`] reads and writes class files, and decodes method bodies into instruction lists
//!   - [`rewrite`] replaces placeholder calls in an instruction list
//!   - [`transform`] applies the rewriter to whole class files

pub mod jvm;
pub mod rewrite;
pub mod transform;
mod util;
