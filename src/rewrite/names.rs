/// Reserved classes of the placeholder runtime
///
/// The placeholders are calls into a small runtime library whose methods never actually run: the
/// rewriter recognizes them by class name. All of those classes live in one package, so the
/// names are normally derived from just that package (see [`ReservedNames::in_package`]).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReservedNames {
    /// Descriptor of the annotation that opts a class into rewriting
    pub marker_annotation: String,

    /// Class whose static methods are the placeholders
    pub placeholder_owner: String,

    /// Class whose constructor describes a method handle
    pub handle_class: String,

    /// Base class of the `indy` argument wrappers (each kind is a nested class, eg. `$Int`)
    pub handle_arg_class: String,

    /// Enum whose members select an invocation or handle kind
    pub opcode_class: String,
}

impl ReservedNames {
    /// Package of the runtime library used when none is specified
    pub const DEFAULT_PACKAGE: &'static str = "ru/DmN/bul";

    /// Reserved names for a runtime living in the given package (eg. `ru/DmN/bul`)
    ///
    /// The package may be given with either `/` or `.` separators.
    pub fn in_package(package: &str) -> ReservedNames {
        let package = package.trim_matches(|c| c == '/' || c == '.').replace('.', "/");
        let qualify = |name: &str| {
            if package.is_empty() {
                String::from(name)
            } else {
                format!("{}/{}", package, name)
            }
        };

        ReservedNames {
            marker_annotation: format!("L{};", qualify("BytecodeProcessor")),
            placeholder_owner: qualify("OpcodeInsertion"),
            handle_class: qualify("IndyHandle"),
            handle_arg_class: qualify("IndyHandleArg"),
            opcode_class: qualify("Opcode"),
        }
    }

    /// Name of the nested argument wrapper class of a given kind (eg. `Int`)
    pub fn handle_arg_kind_class(&self, kind: &str) -> String {
        format!("{}${}", self.handle_arg_class, kind)
    }
}

impl Default for ReservedNames {
    fn default() -> ReservedNames {
        ReservedNames::in_package(ReservedNames::DEFAULT_PACKAGE)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_names() {
        let names = ReservedNames::default();
        assert_eq!(names.marker_annotation, "Lru/DmN/bul/BytecodeProcessor;");
        assert_eq!(names.placeholder_owner, "ru/DmN/bul/OpcodeInsertion");
        assert_eq!(names.handle_class, "ru/DmN/bul/IndyHandle");
        assert_eq!(names.opcode_class, "ru/DmN/bul/Opcode");
        assert_eq!(
            names.handle_arg_kind_class("Type"),
            "ru/DmN/bul/IndyHandleArg$Type"
        );
    }

    #[test]
    fn dotted_packages() {
        let names = ReservedNames::in_package("com.example.rt.");
        assert_eq!(names.placeholder_owner, "com/example/rt/OpcodeInsertion");
        assert_eq!(ReservedNames::in_package("").opcode_class, "Opcode");
    }
}
