use crate::jvm::class_file::{
    BootstrapMethod, ClassConstantIndex, Constant, ConstantIndex, ConstantsPool,
    FieldRefConstantIndex, InvokeDynamicConstantIndex, MethodRefConstantIndex,
    NameAndTypeConstantIndex,
};
use crate::jvm::code::{CallSite, ConstantData, FieldRef, Handle, MethodRef};
use crate::jvm::Error;
use std::result::Result;

/// Bootstrap arguments can themselves be dynamic constants, but never this deeply
const MAX_DYNAMIC_NESTING: usize = 64;

pub trait ConstantsWriter<Index = ConstantIndex> {
    /// Get or insert a constant into the constant pool and return the associated index
    fn constant_index(&self, constants_pool: &mut ConstantsPool) -> Result<Index, Error>;
}

/// Counterpart of [`ConstantsWriter`]: resolve a constant pool index into its symbolic form
pub trait ConstantsReader<Index = ConstantIndex>: Sized {
    fn read_constant(index: Index, constants_pool: &ConstantsPool) -> Result<Self, Error>;
}

/// Class names are internal names for objects, but descriptors for arrays (section 4.4.1)
impl ConstantsWriter<ClassConstantIndex> for String {
    fn constant_index(&self, constants: &mut ConstantsPool) -> Result<ClassConstantIndex, Error> {
        let class_name = constants.get_utf8(self.as_str())?;
        Ok(constants.get_class(class_name)?)
    }
}

impl ConstantsReader<ClassConstantIndex> for String {
    fn read_constant(index: ClassConstantIndex, constants: &ConstantsPool) -> Result<Self, Error> {
        constants.lookup_class(index).map(String::from)
    }
}

fn name_and_type(
    constants: &mut ConstantsPool,
    name: &str,
    descriptor: &str,
) -> Result<NameAndTypeConstantIndex, Error> {
    let name_utf8 = constants.get_utf8(name)?;
    let desc_utf8 = constants.get_utf8(descriptor)?;
    Ok(constants.get_name_and_type(name_utf8, desc_utf8)?)
}

impl ConstantsWriter<FieldRefConstantIndex> for FieldRef {
    fn constant_index(
        &self,
        constants: &mut ConstantsPool,
    ) -> Result<FieldRefConstantIndex, Error> {
        let class_idx = self.owner.constant_index(constants)?;
        let name_and_type_idx = name_and_type(constants, &self.name, &self.descriptor)?;
        Ok(constants.get_field_ref(class_idx, name_and_type_idx)?)
    }
}

impl ConstantsReader<FieldRefConstantIndex> for FieldRef {
    fn read_constant(index: FieldRefConstantIndex, constants: &ConstantsPool) -> Result<Self, Error> {
        match constants.lookup(index.0)? {
            Constant::FieldRef(class, name_and_type) => {
                let (name, descriptor) = constants.lookup_name_and_type(*name_and_type)?;
                Ok(FieldRef {
                    owner: String::read_constant(*class, constants)?,
                    name: String::from(name),
                    descriptor: String::from(descriptor),
                })
            }
            other => Err(unexpected(index.0, "FieldRef", other)),
        }
    }
}

impl ConstantsWriter<MethodRefConstantIndex> for MethodRef {
    fn constant_index(
        &self,
        constants: &mut ConstantsPool,
    ) -> Result<MethodRefConstantIndex, Error> {
        let class_idx = self.owner.constant_index(constants)?;
        let name_and_type_idx = name_and_type(constants, &self.name, &self.descriptor)?;
        Ok(constants.get_method_ref(class_idx, name_and_type_idx, self.is_interface)?)
    }
}

impl ConstantsReader<MethodRefConstantIndex> for MethodRef {
    fn read_constant(
        index: MethodRefConstantIndex,
        constants: &ConstantsPool,
    ) -> Result<Self, Error> {
        match constants.lookup(index.0)? {
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                let (name, descriptor) = constants.lookup_name_and_type(*name_and_type)?;
                Ok(MethodRef {
                    owner: String::read_constant(*class, constants)?,
                    name: String::from(name),
                    descriptor: String::from(descriptor),
                    is_interface: *is_interface,
                })
            }
            other => Err(unexpected(index.0, "MethodRef", other)),
        }
    }
}

impl ConstantsWriter<ConstantIndex> for Handle {
    fn constant_index(&self, constants: &mut ConstantsPool) -> Result<ConstantIndex, Error> {
        let member: ConstantIndex = if self.kind.is_field() {
            let field = FieldRef {
                owner: self.owner.clone(),
                name: self.name.clone(),
                descriptor: self.descriptor.clone(),
            };
            field.constant_index(constants)?.into()
        } else {
            let method = MethodRef {
                owner: self.owner.clone(),
                name: self.name.clone(),
                descriptor: self.descriptor.clone(),
                is_interface: self.is_interface,
            };
            method.constant_index(constants)?.into()
        };
        Ok(constants.get_method_handle(self.kind, member)?)
    }
}

impl ConstantsReader<ConstantIndex> for Handle {
    fn read_constant(index: ConstantIndex, constants: &ConstantsPool) -> Result<Self, Error> {
        let (kind, member) = match constants.lookup(index)? {
            Constant::MethodHandle {
                handle_kind,
                member,
            } => (*handle_kind, *member),
            other => return Err(unexpected(index, "MethodHandle", other)),
        };
        if kind.is_field() {
            let field = FieldRef::read_constant(FieldRefConstantIndex(member), constants)?;
            Ok(Handle {
                kind,
                owner: field.owner,
                name: field.name,
                descriptor: field.descriptor,
                is_interface: false,
            })
        } else {
            let method = MethodRef::read_constant(MethodRefConstantIndex(member), constants)?;
            Ok(Handle {
                kind,
                owner: method.owner,
                name: method.name,
                descriptor: method.descriptor,
                is_interface: method.is_interface,
            })
        }
    }
}

impl ConstantsWriter<ConstantIndex> for ConstantData {
    fn constant_index(&self, constants: &mut ConstantsPool) -> Result<ConstantIndex, Error> {
        match self {
            ConstantData::String(string) => {
                let str_utf8 = constants.get_utf8(string.as_str())?;
                let str_idx = constants.get_string(str_utf8)?;
                Ok(str_idx.into())
            }
            ConstantData::Class(class) => Ok(class.constant_index(constants)?.into()),
            ConstantData::Integer(integer) => Ok(constants.get_integer(*integer)?),
            ConstantData::Long(long) => Ok(constants.get_long(*long)?),
            ConstantData::Float(float) => Ok(constants.get_float(*float)?),
            ConstantData::Double(double) => Ok(constants.get_double(*double)?),
            ConstantData::MethodType(descriptor) => {
                let desc_utf8 = constants.get_utf8(descriptor.as_str())?;
                Ok(constants.get_method_type(desc_utf8)?)
            }
            ConstantData::MethodHandle(handle) => handle.constant_index(constants),
            ConstantData::Dynamic(call_site) => {
                let bootstrap_method = bootstrap_method_index(call_site, constants)?;
                let name_and_type_idx =
                    name_and_type(constants, &call_site.name, &call_site.descriptor)?;
                Ok(constants.get_dynamic(bootstrap_method, name_and_type_idx)?)
            }
        }
    }
}

impl ConstantsReader<ConstantIndex> for ConstantData {
    fn read_constant(index: ConstantIndex, constants: &ConstantsPool) -> Result<Self, Error> {
        read_constant_data(index, constants, 0)
    }
}

fn read_constant_data(
    index: ConstantIndex,
    constants: &ConstantsPool,
    nesting: usize,
) -> Result<ConstantData, Error> {
    Ok(match constants.lookup(index)? {
        Constant::Integer(integer) => ConstantData::Integer(*integer),
        Constant::Float(float) => ConstantData::Float(*float),
        Constant::Long(long) => ConstantData::Long(*long),
        Constant::Double(double) => ConstantData::Double(*double),
        Constant::String(utf8) => ConstantData::String(String::from(constants.lookup_utf8(*utf8)?)),
        Constant::Class(utf8) => ConstantData::Class(String::from(constants.lookup_utf8(*utf8)?)),
        Constant::MethodType { descriptor } => {
            ConstantData::MethodType(String::from(constants.lookup_utf8(*descriptor)?))
        }
        Constant::MethodHandle { .. } => {
            ConstantData::MethodHandle(Handle::read_constant(index, constants)?)
        }
        Constant::Dynamic {
            bootstrap_method,
            name_and_type,
        } => {
            if nesting >= MAX_DYNAMIC_NESTING {
                let msg = format!("Dynamic constant {:?} nests too deeply", index);
                return Err(Error::MalformedClass(msg));
            }
            let call_site =
                read_call_site(*bootstrap_method, *name_and_type, constants, nesting + 1)?;
            ConstantData::Dynamic(Box::new(call_site))
        }
        other => return Err(unexpected(index, "loadable constant", other)),
    })
}

fn read_call_site(
    bootstrap_method: u16,
    name_and_type: NameAndTypeConstantIndex,
    constants: &ConstantsPool,
    nesting: usize,
) -> Result<CallSite, Error> {
    let (name, descriptor) = constants.lookup_name_and_type(name_and_type)?;
    let bootstrap = constants.lookup_bootstrap_method(bootstrap_method)?;
    let arguments = bootstrap
        .bootstrap_arguments
        .iter()
        .map(|argument| read_constant_data(*argument, constants, nesting))
        .collect::<Result<Vec<_>, Error>>()?;
    Ok(CallSite {
        name: String::from(name),
        descriptor: String::from(descriptor),
        bootstrap: Handle::read_constant(bootstrap.bootstrap_method, constants)?,
        arguments,
    })
}

fn bootstrap_method_index(
    call_site: &CallSite,
    constants: &mut ConstantsPool,
) -> Result<u16, Error> {
    let bootstrap_method = call_site.bootstrap.constant_index(constants)?;
    let bootstrap_arguments = call_site
        .arguments
        .iter()
        .map(|argument| argument.constant_index(constants))
        .collect::<Result<Vec<_>, Error>>()?;
    constants.get_bootstrap_method(BootstrapMethod {
        bootstrap_method,
        bootstrap_arguments,
    })
}

impl ConstantsWriter<InvokeDynamicConstantIndex> for CallSite {
    fn constant_index(
        &self,
        constants: &mut ConstantsPool,
    ) -> Result<InvokeDynamicConstantIndex, Error> {
        let bootstrap_method = bootstrap_method_index(self, constants)?;
        let name_and_type_idx = name_and_type(constants, &self.name, &self.descriptor)?;
        Ok(constants.get_invoke_dynamic(bootstrap_method, name_and_type_idx)?)
    }
}

impl ConstantsReader<InvokeDynamicConstantIndex> for CallSite {
    fn read_constant(
        index: InvokeDynamicConstantIndex,
        constants: &ConstantsPool,
    ) -> Result<Self, Error> {
        match constants.lookup(index.0)? {
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            } => read_call_site(*bootstrap_method, *method_descriptor, constants, 0),
            other => Err(unexpected(index.0, "InvokeDynamic", other)),
        }
    }
}

fn unexpected(index: ConstantIndex, expected: &'static str, found: &Constant) -> Error {
    Error::UnexpectedConstant {
        index,
        expected,
        found: found.clone(),
    }
}
