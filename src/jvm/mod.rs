//! Read, inspect, and write JVM classes
//!
//! There are two levels of representation:
//!
//!   - [`class_file`] mirrors the binary format of class files, with everything referring to
//!     constants by index
//!   - [`code`] decodes method bodies into a list of symbolic instructions that can be freely
//!     edited, then encodes them back
//!
//! [`class_graph`] holds just enough of the class hierarchy to recompute stack map frames.
//!
//! ### Simple example
//!
//! Decode the body of every method in a class, then write it back:
//!
//! ```no_run
//! use opcode_insertion::jvm::class_file::{Attribute, ClassFile, Code as CodeAttribute, Serialize};
//! use opcode_insertion::jvm::code::Code;
//! use opcode_insertion::jvm::Error;
//!
//! # fn reencode(bytes: &[u8]) -> Result<Vec<u8>, Error> {
//! let mut class = ClassFile::parse(bytes)?;
//! for method in &mut class.methods {
//!     for attribute in &mut method.attributes {
//!         if attribute.name(&class.constants)? != "Code" {
//!             continue;
//!         }
//!         let code_attribute: CodeAttribute = attribute.parse()?;
//!         let code = Code::decode(&code_attribute, &class.constants)?;
//!         let encoded = code.serialize_code(&mut class.constants)?;
//!         *attribute = class.constants.get_attribute(encoded)?;
//!     }
//! }
//! class.sync_bootstrap_methods()?;
//!
//! let mut class_bytes: Vec<u8> = vec![];
//! class.serialize(&mut class_bytes)?;
//! # Ok(class_bytes)
//! # }
//! ```

mod access_flags;
pub mod class_file;
pub mod class_graph;
pub mod code;
mod descriptors;
mod errors;

pub use access_flags::*;
pub use descriptors::*;
pub use errors::*;
