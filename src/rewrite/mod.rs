//! Rewriting of placeholder calls into the instructions they describe
//!
//! Source code can't express some bytecode directly (eg. a bare `new` without a constructor call,
//! or an `invokedynamic` with an arbitrary bootstrap method). Instead, it calls placeholder
//! methods with string/enum operands naming exactly what should be emitted:
//!
//! ```java
//! OpcodeInsertion.invoke(Opcode.VIRTUAL, "java/io/PrintStream", "println", "(I)V", false);
//! ```
//!
//! The rewriter finds those calls in the compiled instruction list, recovers the operands from
//! the instructions which pushed them, removes those instructions, and substitutes the target
//! instruction for the call.
//!
//! ### Structure
//!
//!   - [`Stream`] is the instruction list of a method, while one placeholder is being rewritten.
//!     It has the generic directed scan that everything else is built on.
//!   - `extract` decodes operands (scalars, opcode tags, handles, and `indy` argument arrays)
//!   - [`Placeholder`] classifies placeholder calls and [`synthesize`] rewrites one of them
//!   - [`rewrite_instructions`] rewrites placeholders until none are left

mod driver;
mod errors;
mod extract;
mod handle_arg;
mod names;
mod opcode;
mod placeholder;
mod stream;
mod synthesize;

#[cfg(test)]
mod fixtures;

pub use driver::*;
pub use errors::*;
pub use extract::*;
pub use handle_arg::*;
pub use names::*;
pub use opcode::*;
pub use placeholder::*;
pub use stream::*;
pub use synthesize::*;
