use std::fmt;

/// Position in a list of instructions
///
/// Labels are placed into the instruction list with [`super::Instruction::Label`] and referred
/// to by branches, exception handlers, local variable ranges, and uninitialized types in frames.
/// When decoded from a class file, the label is named after the offset it originally marked.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Label(pub usize);

impl fmt::Debug for Label {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("l{}", self.0))
    }
}
