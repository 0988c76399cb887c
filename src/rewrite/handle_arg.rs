use crate::jvm::code::{ConstantData, Handle};
use crate::rewrite::ReservedNames;

/// Static argument of an `indy` placeholder
#[derive(Clone, Debug, PartialEq)]
pub enum HandleArg {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),

    /// Type descriptor (eg. `Ljava/lang/String;` or `(I)V`)
    Type(String),
    Handle(Handle),
}

impl HandleArg {
    /// Loadable constant passed to the bootstrap method
    pub fn into_constant(self) -> ConstantData {
        match self {
            HandleArg::Int(value) => ConstantData::Integer(value),
            HandleArg::Long(value) => ConstantData::Long(value),
            HandleArg::Float(value) => ConstantData::Float(value),
            HandleArg::Double(value) => ConstantData::Double(value),
            HandleArg::String(value) => ConstantData::String(value),
            HandleArg::Type(descriptor) => type_constant(descriptor),
            HandleArg::Handle(handle) => ConstantData::MethodHandle(handle),
        }
    }
}

/// Method descriptors become method types, everything else is a class. Object descriptors are
/// unwrapped to internal names while array descriptors are already what a class constant holds.
fn type_constant(descriptor: String) -> ConstantData {
    if descriptor.starts_with('(') {
        ConstantData::MethodType(descriptor)
    } else if descriptor.len() > 2 && descriptor.starts_with('L') && descriptor.ends_with(';') {
        ConstantData::Class(String::from(&descriptor[1..descriptor.len() - 1]))
    } else {
        ConstantData::Class(descriptor)
    }
}

/// Wrapper class used to construct an `indy` argument
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HandleArgKind {
    Int,
    Long,
    Float,
    Double,
    String,
    Type,
    Handle,
}

impl HandleArgKind {
    const ALL: [HandleArgKind; 7] = [
        HandleArgKind::Int,
        HandleArgKind::Long,
        HandleArgKind::Float,
        HandleArgKind::Double,
        HandleArgKind::String,
        HandleArgKind::Type,
        HandleArgKind::Handle,
    ];

    /// Suffix of the nested wrapper class
    pub fn suffix(self) -> &'static str {
        match self {
            HandleArgKind::Int => "Int",
            HandleArgKind::Long => "Long",
            HandleArgKind::Float => "Float",
            HandleArgKind::Double => "Double",
            HandleArgKind::String => "String",
            HandleArgKind::Type => "Type",
            HandleArgKind::Handle => "Handle",
        }
    }

    /// Identify the wrapper from the class being allocated
    pub fn from_class(class: &str, names: &ReservedNames) -> Option<HandleArgKind> {
        HandleArgKind::ALL
            .iter()
            .copied()
            .find(|kind| names.handle_arg_kind_class(kind.suffix()) == class)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::HandleKind;

    #[test]
    fn kinds_from_classes() {
        let names = ReservedNames::default();
        assert_eq!(
            HandleArgKind::from_class("ru/DmN/bul/IndyHandleArg$Double", &names),
            Some(HandleArgKind::Double)
        );
        assert_eq!(
            HandleArgKind::from_class("ru/DmN/bul/IndyHandleArg$Char", &names),
            None
        );
        assert_eq!(
            HandleArgKind::from_class("ru/DmN/bul/IndyHandleArg", &names),
            None
        );
        assert_eq!(HandleArgKind::from_class("java/lang/Integer", &names), None);
    }

    #[test]
    fn kinds_follow_the_runtime_package() {
        let names = ReservedNames::in_package("com/example/rt");
        for kind in HandleArgKind::ALL {
            let class = names.handle_arg_kind_class(kind.suffix());
            assert_eq!(HandleArgKind::from_class(&class, &names), Some(kind));
        }
        assert_eq!(
            HandleArgKind::from_class("ru/DmN/bul/IndyHandleArg$Int", &names),
            None
        );
    }

    #[test]
    fn type_arguments() {
        let constant = |descriptor: &str| HandleArg::Type(String::from(descriptor)).into_constant();
        assert_eq!(
            constant("(I)V"),
            ConstantData::MethodType(String::from("(I)V"))
        );
        assert_eq!(
            constant("Ljava/lang/String;"),
            ConstantData::Class(String::from("java/lang/String"))
        );
        assert_eq!(constant("[J"), ConstantData::Class(String::from("[J")));
        assert_eq!(
            constant("java/util/List"),
            ConstantData::Class(String::from("java/util/List"))
        );
    }

    #[test]
    fn other_arguments() {
        let handle = Handle {
            kind: HandleKind::GetStatic,
            owner: String::from("Foo"),
            name: String::from("BAR"),
            descriptor: String::from("I"),
            is_interface: false,
        };
        assert_eq!(
            HandleArg::Handle(handle.clone()).into_constant(),
            ConstantData::MethodHandle(handle)
        );
        assert_eq!(HandleArg::Long(3).into_constant(), ConstantData::Long(3));
    }
}
