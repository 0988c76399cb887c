//! Representation of the `class` file format, along with reading and writing it
//!
//! Everything here stays close to the binary layout: references into the constant pool are plain
//! indices and bytecode is an opaque byte array. See [`crate::jvm::code`] for a symbolic view of
//! method bodies.

mod attribute;
mod class;
mod constants;
mod field;
mod method;
mod serialize;
mod version;

pub use attribute::*;
pub use class::*;
pub use constants::*;
pub use field::*;
pub use method::*;
pub use serialize::*;
pub use version::*;
