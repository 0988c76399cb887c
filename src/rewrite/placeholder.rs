use crate::jvm::code::{FieldAccessKind, Instruction};
use crate::rewrite::ReservedNames;

/// Kinds of placeholder calls
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Placeholder {
    /// `alloc(type)`: allocate an uninitialized object
    Alloc,

    /// `init(type, descriptor)`: call a constructor on an allocated object
    Init,

    /// `getStatic`/`putStatic`/`getField`/`putField(owner, name, descriptor)`
    Field(FieldAccessKind),

    /// `invoke(opcode, owner, name, descriptor, isInterface)`
    Invoke,

    /// `indy(name, descriptor, bootstrap, args...)`
    Indy,

    /// `arg*` and `end*`: type hints for the compiler, without any runtime effect
    Marker,

    /// Anything else under the placeholder owner
    Unsupported,
}

impl Placeholder {
    /// Classify a method name under the placeholder owner
    pub fn from_name(name: &str) -> Placeholder {
        match name {
            "alloc" => Placeholder::Alloc,
            "init" => Placeholder::Init,
            "getStatic" => Placeholder::Field(FieldAccessKind::GetStatic),
            "putStatic" => Placeholder::Field(FieldAccessKind::PutStatic),
            "getField" => Placeholder::Field(FieldAccessKind::GetField),
            "putField" => Placeholder::Field(FieldAccessKind::PutField),
            "invoke" => Placeholder::Invoke,
            "indy" => Placeholder::Indy,
            _ if name.starts_with("arg") || name.starts_with("end") => Placeholder::Marker,
            _ => Placeholder::Unsupported,
        }
    }
}

/// Is this instruction a call to a placeholder?
///
/// Any sort of invocation counts: the chained markers (eg. `end()`) are instance methods.
pub fn is_placeholder_call(insn: &Instruction, names: &ReservedNames) -> bool {
    matches!(insn, Instruction::Invoke(_, method) if method.owner == names.placeholder_owner)
}

/// If the instruction is a placeholder call, get its name and kind
pub fn recognize<'i>(
    insn: &'i Instruction,
    names: &ReservedNames,
) -> Option<(&'i str, Placeholder)> {
    match insn {
        Instruction::Invoke(_, method) if method.owner == names.placeholder_owner => {
            Some((&method.name, Placeholder::from_name(&method.name)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{InvokeType, MethodRef};
    use crate::rewrite::fixtures::placeholder;

    #[test]
    fn vocabulary() {
        assert_eq!(Placeholder::from_name("alloc"), Placeholder::Alloc);
        assert_eq!(
            Placeholder::from_name("putField"),
            Placeholder::Field(FieldAccessKind::PutField)
        );
        assert_eq!(Placeholder::from_name("argZ"), Placeholder::Marker);
        assert_eq!(Placeholder::from_name("end"), Placeholder::Marker);
        assert_eq!(Placeholder::from_name("goto"), Placeholder::Unsupported);
    }

    #[test]
    fn only_calls_to_the_owner_are_placeholders() {
        let names = ReservedNames::default();
        assert_eq!(
            recognize(&placeholder("indy", "()V"), &names),
            Some(("indy", Placeholder::Indy))
        );

        let unrelated = Instruction::Invoke(
            InvokeType::Static,
            MethodRef {
                owner: String::from("java/lang/Math"),
                name: String::from("alloc"),
                descriptor: String::from("()V"),
                is_interface: false,
            },
        );
        assert_eq!(recognize(&unrelated, &names), None);
        assert!(!is_placeholder_call(&unrelated, &names));
        assert!(!is_placeholder_call(&Instruction::Nop, &names));
    }
}
