use crate::jvm::class_file::HandleKind;
use crate::jvm::{FieldType, ParseDescriptor};
use crate::util::Width;

/// Field referenced by a `getfield`, `putfield`, `getstatic`, or `putstatic`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Internal name of the class declaring the field (eg. `java/lang/System`)
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

/// Method referenced by one of the `invoke*` instructions (except `invokedynamic`)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Internal name of the class declaring the method
    pub owner: String,
    pub name: String,
    pub descriptor: String,

    /// Is the owner an interface? This decides between `Methodref` and `InterfaceMethodref`
    pub is_interface: bool,
}

/// Method handle constant
///
/// Field handles have a field descriptor, method handles have a method descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    pub kind: HandleKind,
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub is_interface: bool,
}

/// Call site of an `invokedynamic` (or the recipe for a dynamically-computed constant)
#[derive(Clone, Debug, PartialEq)]
pub struct CallSite {
    pub name: String,

    /// Method descriptor for a call site, field descriptor for a dynamic constant
    pub descriptor: String,

    /// Bootstrap method
    pub bootstrap: Handle,

    /// Static arguments passed to the bootstrap method
    pub arguments: Vec<ConstantData>,
}

/// Loadable constants, as pushed by `ldc` or passed to bootstrap methods
#[derive(Clone, Debug, PartialEq)]
pub enum ConstantData {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),

    /// Internal name of a class, or descriptor of an array class
    Class(String),

    /// Method descriptor
    MethodType(String),
    MethodHandle(Handle),
    Dynamic(Box<CallSite>),
}

impl Width for ConstantData {
    fn width(&self) -> usize {
        match self {
            ConstantData::Long(_) | ConstantData::Double(_) => 2,
            ConstantData::Dynamic(call_site) => FieldType::<String>::parse(&call_site.descriptor)
                .map_or(1, |field_type| field_type.width()),
            _ => 1,
        }
    }
}
