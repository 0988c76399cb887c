use crate::jvm::class_file::{
    read_bytes, Attribute, AttributeLike, BootstrapMethod, Deserialize, Serialize,
};
use crate::jvm::Error;
use crate::util::{Offset, OffsetResult, OffsetVec, Width};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::borrow::{Borrow, Cow};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::result::Result;

/// Class file constants pool
///
/// The pool starts off as whatever was read out of the class file and is append only after that:
/// indices into the pool never move, so every part of the class which is not rewritten can still
/// be written back out verbatim. New entries are deduplicated against existing ones.
///
/// `invokedynamic` and `ldc` of dynamic constants refer to the `BootstrapMethods` class attribute
/// by index. Since that table is append only in the exact same way, the pool owns it too.
pub struct ConstantsPool {
    constants: OffsetVec<Constant>,
    bootstrap_methods: Vec<BootstrapMethod>,

    /// How many bootstrap methods were loaded (as opposed to added since)
    loaded_bootstrap_methods: usize,

    classes: HashMap<Utf8ConstantIndex, ClassConstantIndex>,
    fieldrefs: HashMap<(ClassConstantIndex, NameAndTypeConstantIndex), FieldRefConstantIndex>,
    methodrefs:
        HashMap<(ClassConstantIndex, NameAndTypeConstantIndex, bool), MethodRefConstantIndex>,
    strings: HashMap<Utf8ConstantIndex, StringConstantIndex>,
    integers: HashMap<i32, ConstantIndex>,
    floats: HashMap<u32, ConstantIndex>,
    longs: HashMap<i64, ConstantIndex>,
    doubles: HashMap<u64, ConstantIndex>,
    name_and_types: HashMap<(Utf8ConstantIndex, Utf8ConstantIndex), NameAndTypeConstantIndex>,
    utf8s: HashMap<String, Utf8ConstantIndex>,
    method_handles: HashMap<(HandleKind, ConstantIndex), ConstantIndex>,
    method_types: HashMap<Utf8ConstantIndex, ConstantIndex>,
    dynamics: HashMap<(u16, NameAndTypeConstantIndex), ConstantIndex>,
    invoke_dynamics: HashMap<(u16, NameAndTypeConstantIndex), InvokeDynamicConstantIndex>,
    bootstrap_method_indices: HashMap<BootstrapMethod, u16>,
}

impl ConstantsPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantsPool {
        ConstantsPool {
            constants: OffsetVec::new_starting_at(Offset(1)),
            bootstrap_methods: vec![],
            loaded_bootstrap_methods: 0,

            classes: HashMap::new(),
            fieldrefs: HashMap::new(),
            methodrefs: HashMap::new(),
            strings: HashMap::new(),
            integers: HashMap::new(),
            floats: HashMap::new(),
            longs: HashMap::new(),
            doubles: HashMap::new(),
            name_and_types: HashMap::new(),
            utf8s: HashMap::new(),
            method_handles: HashMap::new(),
            method_types: HashMap::new(),
            dynamics: HashMap::new(),
            invoke_dynamics: HashMap::new(),
            bootstrap_method_indices: HashMap::new(),
        }
    }

    /// Rebuild a pool from constants read out of a class file
    ///
    /// When the same constant appears more than once, the first occurrence is the one new
    /// references will share.
    pub fn from_constants(constants: OffsetVec<Constant>) -> ConstantsPool {
        let mut pool = ConstantsPool::new();
        for (Offset(offset), _, constant) in &constants {
            let index = ConstantIndex(offset as u16);
            match constant {
                Constant::Class(name) => {
                    pool.classes.entry(*name).or_insert(ClassConstantIndex(index));
                }
                Constant::FieldRef(class, name_and_type) => {
                    pool.fieldrefs
                        .entry((*class, *name_and_type))
                        .or_insert(FieldRefConstantIndex(index));
                }
                Constant::MethodRef {
                    class,
                    name_and_type,
                    is_interface,
                } => {
                    pool.methodrefs
                        .entry((*class, *name_and_type, *is_interface))
                        .or_insert(MethodRefConstantIndex(index));
                }
                Constant::String(utf8) => {
                    pool.strings.entry(*utf8).or_insert(StringConstantIndex(index));
                }
                Constant::Integer(integer) => {
                    pool.integers.entry(*integer).or_insert(index);
                }
                Constant::Float(float) => {
                    pool.floats.entry(float.to_bits()).or_insert(index);
                }
                Constant::Long(long) => {
                    pool.longs.entry(*long).or_insert(index);
                }
                Constant::Double(double) => {
                    pool.doubles.entry(double.to_bits()).or_insert(index);
                }
                Constant::NameAndType { name, descriptor } => {
                    pool.name_and_types
                        .entry((*name, *descriptor))
                        .or_insert(NameAndTypeConstantIndex(index));
                }
                Constant::Utf8(string) => {
                    pool.utf8s
                        .entry(string.clone())
                        .or_insert(Utf8ConstantIndex(index));
                }
                Constant::MethodHandle {
                    handle_kind,
                    member,
                } => {
                    pool.method_handles
                        .entry((*handle_kind, *member))
                        .or_insert(index);
                }
                Constant::MethodType { descriptor } => {
                    pool.method_types.entry(*descriptor).or_insert(index);
                }
                Constant::Dynamic {
                    bootstrap_method,
                    name_and_type,
                } => {
                    pool.dynamics
                        .entry((*bootstrap_method, *name_and_type))
                        .or_insert(index);
                }
                Constant::InvokeDynamic {
                    bootstrap_method,
                    method_descriptor,
                } => {
                    pool.invoke_dynamics
                        .entry((*bootstrap_method, *method_descriptor))
                        .or_insert(InvokeDynamicConstantIndex(index));
                }
                Constant::Module(_) | Constant::Package(_) => (),
            }
        }
        pool.constants = constants;
        pool
    }

    /// Install the bootstrap methods table read from the class' `BootstrapMethods` attribute
    pub fn load_bootstrap_methods(&mut self, bootstrap_methods: Vec<BootstrapMethod>) {
        self.bootstrap_method_indices.clear();
        for (idx, bootstrap_method) in bootstrap_methods.iter().enumerate() {
            self.bootstrap_method_indices
                .entry(bootstrap_method.clone())
                .or_insert(idx as u16);
        }
        self.loaded_bootstrap_methods = bootstrap_methods.len();
        self.bootstrap_methods = bootstrap_methods;
    }

    /// Bootstrap methods table (loaded ones first, then anything added since)
    pub fn bootstrap_methods(&self) -> &[BootstrapMethod] {
        &self.bootstrap_methods
    }

    /// Have any bootstrap methods been added since the table was loaded?
    pub fn bootstrap_methods_changed(&self) -> bool {
        self.bootstrap_methods.len() != self.loaded_bootstrap_methods
    }

    /// Number of slots used by the pool (the next constant will be inserted at this index)
    pub fn offset_len(&self) -> u16 {
        self.constants.offset_len().0 as u16
    }

    /// Push a constant into the constant pool, provided there is space for it
    ///
    /// Note: the largest valid index is 65535, indexing starts at 1, and some constants take two
    /// spaces.
    fn push_constant(
        constants: &mut OffsetVec<Constant>,
        constant: Constant,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let Offset(offset) = constants.offset_len();

        if offset + constant.width() <= u16::MAX.into() {
            let _ = constants.push(constant);
            Ok(ConstantIndex(offset as u16))
        } else {
            Err(ConstantPoolOverflow {
                constant,
                offset: offset as u16,
            })
        }
    }

    /// Get a constant from the pool
    pub fn get(&self, index: ConstantIndex) -> OffsetResult<Constant> {
        self.constants.get_offset(Offset(index.0 as usize))
    }

    /// Get a constant from the pool, failing if there is nothing at that index
    pub fn lookup(&self, index: ConstantIndex) -> Result<&Constant, Error> {
        self.get(index).ok().ok_or(Error::MissingConstant(index))
    }

    /// Get the string value of a utf8 constant
    pub fn lookup_utf8(&self, index: Utf8ConstantIndex) -> Result<&str, Error> {
        match self.lookup(index.0)? {
            Constant::Utf8(string) => Ok(string),
            other => Err(unexpected(index.0, "Utf8", other)),
        }
    }

    /// Get the internal name of a class constant (eg. `java/lang/Object` or `[I`)
    pub fn lookup_class(&self, index: ClassConstantIndex) -> Result<&str, Error> {
        match self.lookup(index.0)? {
            Constant::Class(name) => self.lookup_utf8(*name),
            other => Err(unexpected(index.0, "Class", other)),
        }
    }

    /// Get the name and descriptor of a name & type constant
    pub fn lookup_name_and_type(
        &self,
        index: NameAndTypeConstantIndex,
    ) -> Result<(&str, &str), Error> {
        match self.lookup(index.0)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.lookup_utf8(*name)?, self.lookup_utf8(*descriptor)?))
            }
            other => Err(unexpected(index.0, "NameAndType", other)),
        }
    }

    /// Get an entry in the bootstrap method table
    pub fn lookup_bootstrap_method(&self, index: u16) -> Result<&BootstrapMethod, Error> {
        self.bootstrap_methods
            .get(index as usize)
            .ok_or(Error::MissingBootstrapMethod(index))
    }

    /// Get or insert a class constant from the constant pool
    pub fn get_class(
        &mut self,
        name: Utf8ConstantIndex,
    ) -> Result<ClassConstantIndex, ConstantPoolOverflow> {
        match self.classes.entry(name) {
            Entry::Occupied(occupied) => Ok(*occupied.get()),
            Entry::Vacant(vacant) => {
                let constant = Constant::Class(name);
                let idx = ClassConstantIndex(Self::push_constant(&mut self.constants, constant)?);
                let _ = vacant.insert(idx);
                Ok(idx)
            }
        }
    }

    /// Get or insert an integer constant from the constant pool
    pub fn get_integer(&mut self, integer: i32) -> Result<ConstantIndex, ConstantPoolOverflow> {
        match self.integers.entry(integer) {
            Entry::Occupied(occupied) => Ok(*occupied.get()),
            Entry::Vacant(vacant) => {
                let idx = Self::push_constant(&mut self.constants, Constant::Integer(integer))?;
                let _ = vacant.insert(idx);
                Ok(idx)
            }
        }
    }

    /// Get or insert a long constant from the constant pool
    pub fn get_long(&mut self, long: i64) -> Result<ConstantIndex, ConstantPoolOverflow> {
        match self.longs.entry(long) {
            Entry::Occupied(occupied) => Ok(*occupied.get()),
            Entry::Vacant(vacant) => {
                let idx = Self::push_constant(&mut self.constants, Constant::Long(long))?;
                let _ = vacant.insert(idx);
                Ok(idx)
            }
        }
    }

    /// Get or insert a float constant from the constant pool
    ///
    /// Floats are compared bitwise, so `NaN` payloads and signed zeros stay distinct.
    pub fn get_float(&mut self, float: f32) -> Result<ConstantIndex, ConstantPoolOverflow> {
        match self.floats.entry(float.to_bits()) {
            Entry::Occupied(occupied) => Ok(*occupied.get()),
            Entry::Vacant(vacant) => {
                let idx = Self::push_constant(&mut self.constants, Constant::Float(float))?;
                let _ = vacant.insert(idx);
                Ok(idx)
            }
        }
    }

    /// Get or insert a double constant from the constant pool
    pub fn get_double(&mut self, double: f64) -> Result<ConstantIndex, ConstantPoolOverflow> {
        match self.doubles.entry(double.to_bits()) {
            Entry::Occupied(occupied) => Ok(*occupied.get()),
            Entry::Vacant(vacant) => {
                let idx = Self::push_constant(&mut self.constants, Constant::Double(double))?;
                let _ = vacant.insert(idx);
                Ok(idx)
            }
        }
    }

    /// Get or insert a utf8 constant from the constant pool
    pub fn get_utf8<'a, S: Into<Cow<'a, str>>>(
        &mut self,
        utf8: S,
    ) -> Result<Utf8ConstantIndex, ConstantPoolOverflow> {
        let cow = utf8.into();

        if let Some(idx) = self.utf8s.get::<str>(cow.borrow()) {
            Ok(*idx)
        } else {
            let owned = cow.into_owned();
            let constant = Constant::Utf8(owned.clone());
            let idx = Utf8ConstantIndex(Self::push_constant(&mut self.constants, constant)?);
            self.utf8s.insert(owned, idx);
            Ok(idx)
        }
    }

    /// Get or insert a string constant from the constant pool
    pub fn get_string(
        &mut self,
        utf8: Utf8ConstantIndex,
    ) -> Result<StringConstantIndex, ConstantPoolOverflow> {
        match self.strings.entry(utf8) {
            Entry::Occupied(occupied) => Ok(*occupied.get()),
            Entry::Vacant(vacant) => {
                let constant = Constant::String(utf8);
                let idx = StringConstantIndex(Self::push_constant(&mut self.constants, constant)?);
                let _ = vacant.insert(idx);
                Ok(idx)
            }
        }
    }

    /// Get or insert a name & type constant from the constant pool
    pub fn get_name_and_type(
        &mut self,
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    ) -> Result<NameAndTypeConstantIndex, ConstantPoolOverflow> {
        match self.name_and_types.entry((name, descriptor)) {
            Entry::Occupied(occupied) => Ok(*occupied.get()),
            Entry::Vacant(vacant) => {
                let constant = Constant::NameAndType { name, descriptor };
                let idx =
                    NameAndTypeConstantIndex(Self::push_constant(&mut self.constants, constant)?);
                let _ = vacant.insert(idx);
                Ok(idx)
            }
        }
    }

    /// Get or insert a field reference constant from the constant pool
    pub fn get_field_ref(
        &mut self,
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
    ) -> Result<FieldRefConstantIndex, ConstantPoolOverflow> {
        match self.fieldrefs.entry((class, name_and_type)) {
            Entry::Occupied(occupied) => Ok(*occupied.get()),
            Entry::Vacant(vacant) => {
                let constant = Constant::FieldRef(class, name_and_type);
                let idx =
                    FieldRefConstantIndex(Self::push_constant(&mut self.constants, constant)?);
                let _ = vacant.insert(idx);
                Ok(idx)
            }
        }
    }

    /// Get or insert a method reference constant from the constant pool
    pub fn get_method_ref(
        &mut self,
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    ) -> Result<MethodRefConstantIndex, ConstantPoolOverflow> {
        match self.methodrefs.entry((class, name_and_type, is_interface)) {
            Entry::Occupied(occupied) => Ok(*occupied.get()),
            Entry::Vacant(vacant) => {
                let constant = Constant::MethodRef {
                    class,
                    name_and_type,
                    is_interface,
                };
                let idx =
                    MethodRefConstantIndex(Self::push_constant(&mut self.constants, constant)?);
                let _ = vacant.insert(idx);
                Ok(idx)
            }
        }
    }

    /// Get or insert a method handle constant from the constant pool
    pub fn get_method_handle(
        &mut self,
        handle_kind: HandleKind,
        member: ConstantIndex,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        match self.method_handles.entry((handle_kind, member)) {
            Entry::Occupied(occupied) => Ok(*occupied.get()),
            Entry::Vacant(vacant) => {
                let constant = Constant::MethodHandle {
                    handle_kind,
                    member,
                };
                let idx = Self::push_constant(&mut self.constants, constant)?;
                let _ = vacant.insert(idx);
                Ok(idx)
            }
        }
    }

    /// Get or insert a method type constant from the constant pool
    pub fn get_method_type(
        &mut self,
        descriptor: Utf8ConstantIndex,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        match self.method_types.entry(descriptor) {
            Entry::Occupied(occupied) => Ok(*occupied.get()),
            Entry::Vacant(vacant) => {
                let constant = Constant::MethodType { descriptor };
                let idx = Self::push_constant(&mut self.constants, constant)?;
                let _ = vacant.insert(idx);
                Ok(idx)
            }
        }
    }

    /// Get or insert a dynamically-computed constant from the constant pool
    pub fn get_dynamic(
        &mut self,
        bootstrap_method: u16,
        name_and_type: NameAndTypeConstantIndex,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        match self.dynamics.entry((bootstrap_method, name_and_type)) {
            Entry::Occupied(occupied) => Ok(*occupied.get()),
            Entry::Vacant(vacant) => {
                let constant = Constant::Dynamic {
                    bootstrap_method,
                    name_and_type,
                };
                let idx = Self::push_constant(&mut self.constants, constant)?;
                let _ = vacant.insert(idx);
                Ok(idx)
            }
        }
    }

    /// Get or insert an invoke dynamic constant from the constant pool
    pub fn get_invoke_dynamic(
        &mut self,
        bootstrap_method: u16,
        method_descriptor: NameAndTypeConstantIndex,
    ) -> Result<InvokeDynamicConstantIndex, ConstantPoolOverflow> {
        match self
            .invoke_dynamics
            .entry((bootstrap_method, method_descriptor))
        {
            Entry::Occupied(occupied) => Ok(*occupied.get()),
            Entry::Vacant(vacant) => {
                let constant = Constant::InvokeDynamic {
                    bootstrap_method,
                    method_descriptor,
                };
                let idx =
                    InvokeDynamicConstantIndex(Self::push_constant(&mut self.constants, constant)?);
                let _ = vacant.insert(idx);
                Ok(idx)
            }
        }
    }

    /// Get or insert an entry in the bootstrap methods table
    pub fn get_bootstrap_method(
        &mut self,
        bootstrap_method: BootstrapMethod,
    ) -> Result<u16, Error> {
        let next_index = self.bootstrap_methods.len();
        match self.bootstrap_method_indices.entry(bootstrap_method) {
            Entry::Occupied(occupied) => Ok(*occupied.get()),
            Entry::Vacant(vacant) => {
                if next_index >= u16::MAX as usize {
                    return Err(Error::BootstrapMethodsOverflow);
                }
                self.bootstrap_methods.push(vacant.key().clone());
                let _ = vacant.insert(next_index as u16);
                Ok(next_index as u16)
            }
        }
    }

    /// Add an attribute to the constant pool
    pub fn get_attribute<A: AttributeLike>(&mut self, attribute: A) -> Result<Attribute, Error> {
        let name_index = self.get_utf8(A::NAME)?;
        let mut info = vec![];

        attribute.serialize(&mut info).map_err(Error::IoError)?;

        Ok(Attribute { name_index, info })
    }
}

fn unexpected(index: ConstantIndex, expected: &'static str, found: &Constant) -> Error {
    Error::UnexpectedConstant {
        index,
        expected,
        found: found.clone(),
    }
}

impl Default for ConstantsPool {
    fn default() -> Self {
        ConstantsPool::new()
    }
}

impl std::fmt::Debug for ConstantsPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.constants.fmt(f)
    }
}

/// The count written is one more than the largest index, since indexing starts at 1
impl Serialize for ConstantsPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.offset_len().serialize(writer)?;
        for (_, _, constant) in &self.constants {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

impl Deserialize for ConstantsPool {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let count = u16::deserialize(reader)?;
        let mut constants = OffsetVec::new_starting_at(Offset(1));
        while constants.offset_len().0 < count as usize {
            constants.push(Constant::deserialize(reader)?);
        }
        if constants.offset_len().0 != count as usize {
            let msg = "Constant pool count splits a long or double entry";
            return Err(std::io::Error::new(ErrorKind::InvalidData, msg));
        }
        Ok(ConstantsPool::from_constants(constants))
    }
}

#[derive(Debug)]
pub struct ConstantPoolOverflow {
    pub constant: Constant,
    pub offset: u16,
}

/// Constants as in the constant pool
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Class or an interface
    Class(Utf8ConstantIndex),

    /// Field
    FieldRef(ClassConstantIndex, NameAndTypeConstantIndex),

    /// Method (this combines `Methodref` and `InterfaceMethodref`
    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    },

    /// Constant object of type `java.lang.String`
    String(Utf8ConstantIndex),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`
    Float(f32),

    /// Constant primitive of type `long`
    Long(i64),

    /// Constant primitive of type `double`
    Double(f64),

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the
    /// null character `\u{0000}` and the encoding of supplementary characters
    /// is different).
    Utf8(String),

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle {
        handle_kind: HandleKind,

        /// Depending on the method kind, this points to different things:
        ///
        ///   - `FieldRef` for `GetField`, `GetStatic`, `PutField`, `PutStatic`
        ///   - `MethodRef` for the rest
        member: ConstantIndex,
    },

    /// Method type
    MethodType { descriptor: Utf8ConstantIndex },

    /// Dynamically-computed constant
    Dynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// Dynamically-computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        method_descriptor: NameAndTypeConstantIndex,
    },

    /// Module (only in `module-info.class`)
    Module(Utf8ConstantIndex),

    /// Package exported or opened by a module
    Package(Utf8ConstantIndex),
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Constant::Utf8(string) => {
                1u8.serialize(writer)?;
                let buffer: Vec<u8> = encode_modified_utf8(string);
                (buffer.len() as u16).serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Integer(integer) => {
                3u8.serialize(writer)?;
                integer.serialize(writer)?;
            }
            Constant::Float(float) => {
                4u8.serialize(writer)?;
                float.serialize(writer)?;
            }
            Constant::Long(long) => {
                5u8.serialize(writer)?;
                long.serialize(writer)?;
            }
            Constant::Double(double) => {
                6u8.serialize(writer)?;
                double.serialize(writer)?;
            }
            Constant::Class(name) => {
                7u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::String(bytes) => {
                8u8.serialize(writer)?;
                bytes.serialize(writer)?;
            }
            Constant::FieldRef(class, name_and_type) => {
                9u8.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                (if !is_interface { 10u8 } else { 11u8 }).serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                12u8.serialize(writer)?;
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                15u8.serialize(writer)?;
                handle_kind.serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::MethodType { descriptor } => {
                16u8.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            } => {
                17u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            } => {
                18u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                method_descriptor.serialize(writer)?;
            }
            Constant::Module(name) => {
                19u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::Package(name) => {
                20u8.serialize(writer)?;
                name.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Deserialize for Constant {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let constant = match u8::deserialize(reader)? {
            1 => {
                let len = u16::deserialize(reader)?;
                let bytes = read_bytes(reader, len as usize)?;
                Constant::Utf8(decode_modified_utf8(&bytes)?)
            }
            3 => Constant::Integer(i32::deserialize(reader)?),
            4 => Constant::Float(f32::deserialize(reader)?),
            5 => Constant::Long(i64::deserialize(reader)?),
            6 => Constant::Double(f64::deserialize(reader)?),
            7 => Constant::Class(Utf8ConstantIndex::deserialize(reader)?),
            8 => Constant::String(Utf8ConstantIndex::deserialize(reader)?),
            9 => Constant::FieldRef(
                ClassConstantIndex::deserialize(reader)?,
                NameAndTypeConstantIndex::deserialize(reader)?,
            ),
            tag @ (10 | 11) => Constant::MethodRef {
                class: ClassConstantIndex::deserialize(reader)?,
                name_and_type: NameAndTypeConstantIndex::deserialize(reader)?,
                is_interface: tag == 11,
            },
            12 => Constant::NameAndType {
                name: Utf8ConstantIndex::deserialize(reader)?,
                descriptor: Utf8ConstantIndex::deserialize(reader)?,
            },
            15 => Constant::MethodHandle {
                handle_kind: HandleKind::deserialize(reader)?,
                member: ConstantIndex::deserialize(reader)?,
            },
            16 => Constant::MethodType {
                descriptor: Utf8ConstantIndex::deserialize(reader)?,
            },
            17 => Constant::Dynamic {
                bootstrap_method: u16::deserialize(reader)?,
                name_and_type: NameAndTypeConstantIndex::deserialize(reader)?,
            },
            18 => Constant::InvokeDynamic {
                bootstrap_method: u16::deserialize(reader)?,
                method_descriptor: NameAndTypeConstantIndex::deserialize(reader)?,
            },
            19 => Constant::Module(Utf8ConstantIndex::deserialize(reader)?),
            20 => Constant::Package(Utf8ConstantIndex::deserialize(reader)?),
            tag => {
                let msg = format!("Unknown constant pool tag {}", tag);
                return Err(std::io::Error::new(ErrorKind::InvalidData, msg));
            }
        };
        Ok(constant)
    }
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u0000` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = vec![];
    for unit in string.encode_utf16() {
        let code = unit as u32;
        if code != 0 && code < 0x80 {
            buffer.push(code as u8);
        } else if code < 0x800 {
            buffer.push((code >> 6 & 0x1F) as u8 | 0b1100_0000);
            buffer.push((code & 0x3F) as u8 | 0b1000_0000);
        } else {
            buffer.push((code >> 12 & 0x0F) as u8 | 0b1110_0000);
            buffer.push((code >> 6 & 0x3F) as u8 | 0b1000_0000);
            buffer.push((code & 0x3F) as u8 | 0b1000_0000);
        }
    }
    buffer
}

/// Inverse of [`encode_modified_utf8`]
///
/// Strings that are valid on the JVM but contain unpaired surrogates have no `String`
/// representation and are rejected.
pub fn decode_modified_utf8(bytes: &[u8]) -> std::io::Result<String> {
    let malformed = || std::io::Error::new(ErrorKind::InvalidData, "Malformed modified UTF-8");
    let continuation = |byte: Option<&u8>| -> std::io::Result<u16> {
        match byte {
            Some(b) if b & 0b1100_0000 == 0b1000_0000 => Ok((b & 0x3F) as u16),
            _ => Err(malformed()),
        }
    };

    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter();
    while let Some(&byte) = iter.next() {
        let unit = if byte & 0b1000_0000 == 0 {
            byte as u16
        } else if byte & 0b1110_0000 == 0b1100_0000 {
            ((byte & 0x1F) as u16) << 6 | continuation(iter.next())?
        } else if byte & 0b1111_0000 == 0b1110_0000 {
            let high = continuation(iter.next())?;
            let low = continuation(iter.next())?;
            ((byte & 0x0F) as u16) << 12 | high << 6 | low
        } else {
            return Err(malformed());
        };
        units.push(unit);
    }

    String::from_utf16(&units).map_err(|_| malformed())
}


/// Almost all constants have width 1, except for `Constant::Long` and `Constant::Double`. From
/// the JVMS (section 4.4.5):
///
/// > All 8-byte constants take up two entries in the constant_pool table of the class file. If a
/// > CONSTANT_Long_info or CONSTANT_Double_info structure is the item in the constant_pool table
/// > at index n, then the next usable item in the pool is located at index n+2. The constant_pool
/// > index n+1 must be valid but is considered unusable.
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct ConstantIndex(pub u16);

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for ConstantIndex {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(ConstantIndex(u16::deserialize(reader)?))
    }
}

/// Typed wrappers around `ConstantIndex`, recording what sort of constant is expected there
macro_rules! typed_constant_index {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
            pub struct $name(pub ConstantIndex);

            impl From<$name> for ConstantIndex {
                fn from(index: $name) -> ConstantIndex {
                    index.0
                }
            }

            impl Serialize for $name {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                    self.0.serialize(writer)
                }
            }

            impl Deserialize for $name {
                fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
                    Ok($name(ConstantIndex::deserialize(reader)?))
                }
            }
        )*
    };
}

typed_constant_index!(
    Utf8ConstantIndex,
    StringConstantIndex,
    NameAndTypeConstantIndex,
    ClassConstantIndex,
    FieldRefConstantIndex,
    MethodRefConstantIndex,
    InvokeDynamicConstantIndex,
);

/// Type of method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-5.html#jvms-5.4.3.5-220
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

impl HandleKind {
    /// Does the handle refer to a field (as opposed to a method)?
    pub fn is_field(self) -> bool {
        matches!(
            self,
            HandleKind::GetField
                | HandleKind::GetStatic
                | HandleKind::PutField
                | HandleKind::PutStatic
        )
    }
}

impl Serialize for HandleKind {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        let byte: u8 = match self {
            HandleKind::GetField => 1,
            HandleKind::GetStatic => 2,
            HandleKind::PutField => 3,
            HandleKind::PutStatic => 4,
            HandleKind::InvokeVirtual => 5,
            HandleKind::InvokeStatic => 6,
            HandleKind::InvokeSpecial => 7,
            HandleKind::NewInvokeSpecial => 8,
            HandleKind::InvokeInterface => 9,
        };
        byte.serialize(writer)
    }
}

impl Deserialize for HandleKind {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let kind = match u8::deserialize(reader)? {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            other => {
                let msg = format!("Unknown method handle kind {}", other);
                return Err(std::io::Error::new(ErrorKind::InvalidData, msg));
            }
        };
        Ok(kind)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn read_pool(bytes: &[u8]) -> ConstantsPool {
        ConstantsPool::deserialize(&mut &bytes[..]).unwrap()
    }

    #[test]
    fn wide_constants_skip_an_index() {
        let mut pool = ConstantsPool::new();
        let long = pool.get_long(42).unwrap();
        let utf8 = pool.get_utf8("after").unwrap();
        assert_eq!(long, ConstantIndex(1));
        assert_eq!(utf8, Utf8ConstantIndex(ConstantIndex(3)));
        assert_eq!(pool.offset_len(), 4);
    }

    #[test]
    fn interning_is_deduplicated() {
        let mut pool = ConstantsPool::new();
        let name = pool.get_utf8("java/lang/Object").unwrap();
        let class1 = pool.get_class(name).unwrap();
        let name2 = pool.get_utf8("java/lang/Object").unwrap();
        let class2 = pool.get_class(name2).unwrap();
        assert_eq!(class1, class2);
        assert_eq!(pool.get_integer(7).unwrap(), pool.get_integer(7).unwrap());
        assert_ne!(pool.get_float(0.0).unwrap(), pool.get_float(-0.0).unwrap());
    }

    #[test]
    fn serialized_pool_reads_back_with_same_indices() {
        let mut pool = ConstantsPool::new();
        let name = pool.get_utf8("Foo").unwrap();
        let class = pool.get_class(name).unwrap();
        let _ = pool.get_double(1.5).unwrap();
        let hi = pool.get_utf8("hi").unwrap();
        let string = pool.get_string(hi).unwrap();

        let mut bytes = vec![];
        pool.serialize(&mut bytes).unwrap();
        let mut read = read_pool(&bytes);

        assert_eq!(read.lookup_class(class).unwrap(), "Foo");
        assert_eq!(read.offset_len(), pool.offset_len());

        // Existing entries are found rather than appended
        let hi = read.get_utf8("hi").unwrap();
        assert_eq!(read.get_string(hi).unwrap(), string);
        assert_eq!(read.offset_len(), pool.offset_len());
    }

    #[test]
    fn lookups_check_the_constant_type() {
        let mut pool = ConstantsPool::new();
        let int = pool.get_integer(3).unwrap();
        assert!(matches!(
            pool.lookup_utf8(Utf8ConstantIndex(int)),
            Err(Error::UnexpectedConstant { expected: "Utf8", .. })
        ));
        assert!(matches!(
            pool.lookup(ConstantIndex(40)),
            Err(Error::MissingConstant(ConstantIndex(40)))
        ));
    }

    #[test]
    fn bootstrap_methods_are_appended_once() {
        let mut pool = ConstantsPool::new();
        let existing = BootstrapMethod {
            bootstrap_method: ConstantIndex(5),
            bootstrap_arguments: vec![],
        };
        pool.load_bootstrap_methods(vec![existing.clone()]);
        assert_eq!(pool.get_bootstrap_method(existing).unwrap(), 0);
        assert!(!pool.bootstrap_methods_changed());

        let added = BootstrapMethod {
            bootstrap_method: ConstantIndex(5),
            bootstrap_arguments: vec![ConstantIndex(6)],
        };
        assert_eq!(pool.get_bootstrap_method(added.clone()).unwrap(), 1);
        assert_eq!(pool.get_bootstrap_method(added).unwrap(), 1);
        assert!(pool.bootstrap_methods_changed());
        assert_eq!(pool.bootstrap_methods().len(), 2);
    }
}
