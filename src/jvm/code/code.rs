use crate::jvm::class_file::Attribute;
use crate::jvm::code::{Instruction, Label};

/// Method body, decoded into an editable instruction list
///
/// All positions (jump targets, exception ranges, local variable ranges) are [`Label`]s which are
/// placed in the instruction list as pseudo-instructions. Instructions can therefore be inserted
/// and removed freely without having to patch up offsets: those only get computed again when the
/// code is serialized.
#[derive(Clone, Debug, PartialEq)]
pub struct Code {
    /// Max stack as read from the class file (recomputed when serializing)
    pub max_stack: u16,
    pub max_locals: u16,
    pub instructions: Vec<Instruction>,
    pub exception_handlers: Vec<ExceptionHandler>,
    pub local_variables: Vec<LocalVariable>,

    /// Local variables with generic signatures (`LocalVariableTypeTable`)
    pub local_variable_types: Vec<LocalVariable>,

    /// Sub-attributes which are not understood (these don't survive serialization)
    pub other_attributes: Vec<Attribute>,
}

impl Code {
    /// Count the instructions that aren't labels, line numbers, or frames
    pub fn real_instruction_count(&self) -> usize {
        self.instructions
            .iter()
            .filter(|insn| !insn.is_pseudo())
            .count()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Start of the protected range (inclusive)
    pub start: Label,

    /// End of the protected range (exclusive)
    pub end: Label,

    /// Start of the handler
    pub handler: Label,

    /// Class of exceptions caught (`None` catches everything)
    pub catch_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVariable {
    pub start: Label,
    pub end: Label,
    pub name: String,

    /// Descriptor or generic signature, depending on which table the variable is from
    pub descriptor: String,
    pub index: u16,
}
