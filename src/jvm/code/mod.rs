//! Bytecode representation, decoding, and encoding
//!
//! ### Structure
//!
//! Despite being pushed off into [just another method attribute](crate::jvm::class_file::Code),
//! the bytecode is arguably the most important part of the class file - it contains the actual
//! executable instructions. We split up the [list of bytecode instructions][0] into two groups:
//!
//!   - [`Instruction`] for straight-line instructions
//!   - [`BranchInstruction`] for instructions that may branch (wrapped in
//!     [`Instruction::Branch`])
//!
//! With these, method [`Code`] is a flat list of instructions, interspersed with labels, line
//! numbers, and stack map frames. The list can be edited freely, since nothing in it refers to
//! positions by offset. Edits which change the operand stack leave the frames stale, so
//! [`Code::compute_frames`] can recompute them before encoding.
//!
//! ### Operands
//!
//! Instructions are generic over their operands. While editing, operands are symbolic
//! ([`FieldRef`], [`MethodRef`], [`CallSite`], [`ConstantData`]). Before serialization, they get
//! interned into the constants pool by [`ConstantsWriter`] (and [`ConstantsReader`] goes the other
//! way while decoding).
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se18/html/jvms-6.html#jvms-6.5

mod code;
mod constants_writer;
mod decode;
mod encode;
mod frames;
mod instructions;
mod label;
mod max_stack;
mod operands;

pub use code::*;
pub use constants_writer::*;
pub use frames::*;
pub use instructions::*;
pub use label::*;
pub use operands::*;
