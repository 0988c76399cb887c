use crate::jvm::class_file::{Constant, ConstantIndex, ConstantPoolOverflow};
use crate::jvm::code::Label;
use crate::util::Offset;

#[derive(Debug)]
pub enum Error {
    ConstantPoolOverflow {
        constant: Constant,
        offset: u16,
    },
    IoError(std::io::Error),

    /// The bootstrap methods table can hold at most 65535 entries
    BootstrapMethodsOverflow,

    /// Class file structure is wrong in a way not caught while reading bytes
    MalformedClass(String),

    /// Attribute contents don't match the attribute name
    MalformedAttribute {
        name: &'static str,
        message: String,
    },

    /// No constant exists at this index
    MissingConstant(ConstantIndex),

    /// Constant at this index has the wrong type
    UnexpectedConstant {
        index: ConstantIndex,
        expected: &'static str,
        found: Constant,
    },

    /// No bootstrap method exists at this index
    MissingBootstrapMethod(u16),

    /// Opcode is reserved or unknown
    BadOpcode {
        opcode: u8,
        offset: Offset,
    },

    /// Jump (or exception range, local variable range, frame position) doesn't fall on an
    /// instruction boundary
    InvalidBranchTarget(Offset),

    BadDescriptor(String),

    /// A label is used but never placed in the instruction list
    UnresolvedLabel(Label),

    /// Conditional branch needs a relative jump that does not fit in 16 bits
    BranchOffsetOverflow {
        label: Label,
        offset: Offset,
    },

    /// Method body is larger than the 65535 bytes allowed
    MethodCodeOverflow(Offset),

    /// Maximum stack size does not fit in 16 bits (at this instruction index)
    MaxStackOverflow(usize),

    /// A particular offset has two frames
    ConflictingFrames(Offset),

    /// Paths meeting at this instruction index have stacks of different shapes
    IncompatibleStacks(usize),

    /// Instruction at this index finds too few (or the wrong kind of) values on the stack
    InvalidStack(usize),

    /// Frames can't be computed for `jsr`/`ret` subroutines (at this instruction index)
    UnsupportedSubroutine(usize),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl From<ConstantPoolOverflow> for Error {
    fn from(overflow: ConstantPoolOverflow) -> Error {
        Error::ConstantPoolOverflow {
            constant: overflow.constant,
            offset: overflow.offset,
        }
    }
}
