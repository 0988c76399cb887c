use crate::jvm::class_file::{
    read_bytes, ClassConstantIndex, ConstantIndex, ConstantsPool, Deserialize, Serialize,
    Utf8ConstantIndex,
};
use crate::jvm::Error;
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::ErrorKind;

/// Attributes (used in classes, fields, methods, and even on some attributes)
///
/// The representation is designed to be easily extended with custom attributes.
/// While some attributes aren't essential, others are really important (eg. the
/// code attribute for including the actual bytecode).
///
/// Attributes that are never inspected are carried around as raw bytes, which is what makes it
/// possible to write a class back out without understanding all of it.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name_index: Utf8ConstantIndex,
    pub info: Vec<u8>,
}

impl Attribute {
    /// Name of the attribute
    pub fn name<'a>(&self, constants: &'a ConstantsPool) -> Result<&'a str, Error> {
        constants.lookup_utf8(self.name_index)
    }

    /// Interpret the attribute contents
    ///
    /// The whole of the contents must be consumed.
    pub fn parse<A: AttributeLike + Deserialize>(&self) -> Result<A, Error> {
        let mut reader: &[u8] = &self.info;
        let parsed = A::deserialize(&mut reader)?;
        if !reader.is_empty() {
            return Err(Error::MalformedAttribute {
                name: A::NAME,
                message: format!("{} trailing bytes", reader.len()),
            });
        }
        Ok(parsed)
    }

    /// Find and interpret the first attribute matching `A`
    pub fn find<A: AttributeLike + Deserialize>(
        attributes: &[Attribute],
        constants: &ConstantsPool,
    ) -> Result<Option<A>, Error> {
        for attribute in attributes {
            if attribute.name(constants)? == A::NAME {
                return attribute.parse().map(Some);
            }
        }
        Ok(None)
    }
}

impl Serialize for Attribute {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.name_index.serialize(writer)?;

        // Attribute info length is 4 bytes
        (self.info.len() as u32).serialize(writer)?;
        writer.write_all(&self.info)?;

        Ok(())
    }
}

impl Deserialize for Attribute {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let name_index = Utf8ConstantIndex::deserialize(reader)?;
        let length = u32::deserialize(reader)?;
        let info = read_bytes(reader, length as usize)?;
        Ok(Attribute { name_index, info })
    }
}

/// Attributes are all stored in the same way (see `Attribute`), but internally
/// they represent very different things. This trait is implemented by things
/// which can be turned into attributes.
pub trait AttributeLike: Serialize {
    /// Name of the attribute
    const NAME: &'static str;
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.3
#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code_array: BytecodeArray,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

impl Serialize for Code {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.max_stack.serialize(writer)?;
        self.max_locals.serialize(writer)?;
        self.code_array.serialize(writer)?;
        self.exception_table.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for Code {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(Code {
            max_stack: u16::deserialize(reader)?,
            max_locals: u16::deserialize(reader)?,
            code_array: BytecodeArray::deserialize(reader)?,
            exception_table: Vec::deserialize(reader)?,
            attributes: Vec::deserialize(reader)?,
        })
    }
}

impl AttributeLike for Code {
    const NAME: &'static str = "Code";
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionHandler {
    /// Start of exception handler range (inclusive)
    pub start_pc: BytecodeIndex,

    /// End of exception handler range (exclusive)
    pub end_pc: BytecodeIndex,

    /// Start of the exception handler
    pub handler_pc: BytecodeIndex,

    /// Class of exceptions caught (index 0 catches everything)
    pub catch_type: ClassConstantIndex,
}

impl Serialize for ExceptionHandler {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.end_pc.serialize(writer)?;
        self.handler_pc.serialize(writer)?;
        self.catch_type.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for ExceptionHandler {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(ExceptionHandler {
            start_pc: BytecodeIndex::deserialize(reader)?,
            end_pc: BytecodeIndex::deserialize(reader)?,
            handler_pc: BytecodeIndex::deserialize(reader)?,
            catch_type: ClassConstantIndex::deserialize(reader)?,
        })
    }
}

/// Encoded bytecode instructions
#[derive(Debug, Clone, PartialEq)]
pub struct BytecodeArray(pub Vec<u8>);

impl Serialize for BytecodeArray {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        let len = self.0.len() as u32;
        len.serialize(writer)?;
        writer.write_all(&self.0)?;
        Ok(())
    }
}

impl Deserialize for BytecodeArray {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let len = u32::deserialize(reader)?;
        Ok(BytecodeArray(read_bytes(reader, len as usize)?))
    }
}

/// Index into `BytecodeArray`
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BytecodeIndex(pub u16);

impl Serialize for BytecodeIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for BytecodeIndex {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(BytecodeIndex(u16::deserialize(reader)?))
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.7.4
#[derive(Debug, Clone, PartialEq)]
pub struct StackMapTable(pub Vec<StackMapFrame>);

impl AttributeLike for StackMapTable {
    const NAME: &'static str = "StackMapTable";
}

impl Serialize for StackMapTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for StackMapTable {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(StackMapTable(Vec::deserialize(reader)?))
    }
}

/// Stack map frame
///
/// The type parameters abstract over how the position of the frame is stored (`Delta`) and how
/// the position of a `new` instruction for an uninitialized type is stored (`U`). In the class
/// file, both are offsets (the first relative to the previous frame, the second absolute).
#[derive(Debug, Clone, PartialEq)]
pub enum StackMapFrame<Delta = u16, U = u16> {
    /// Frame has the same locals as the previous frame and number of stack items is zero
    /// Tags: 0-63 or 251
    SameLocalsNoStack { offset_delta: Delta },

    /// Frame has the same locals as the previous frame and number of stack items is one
    /// Tags: 64-127 or 247
    SameLocalsOneStack {
        offset_delta: Delta,
        stack_verification: VerificationType<ClassConstantIndex, U>,
    },

    /// Frame is like the previous frame, but without the last `chopped_k` locals
    /// Tags: 248-250
    ChoppedFrameNoStack { offset_delta: Delta, chopped_k: u8 },

    /// Frame is like the previous frame, but with an extra `locals_verifications.len()` locals
    /// Tags: 252-254
    AppendFrameNoStack {
        offset_delta: Delta,
        local_verifications: Vec<VerificationType<ClassConstantIndex, U>>,
    },

    /// Frame has exactly the locals and stack specified
    /// Tag: 255
    FullFrame {
        offset_delta: Delta,
        local_verifications: Vec<VerificationType<ClassConstantIndex, U>>,
        stack_verifications: Vec<VerificationType<ClassConstantIndex, U>>,
    },
}

impl<Delta, U> StackMapFrame<Delta, U> {
    pub fn offset_delta(&self) -> &Delta {
        match self {
            StackMapFrame::SameLocalsNoStack { offset_delta }
            | StackMapFrame::SameLocalsOneStack { offset_delta, .. }
            | StackMapFrame::ChoppedFrameNoStack { offset_delta, .. }
            | StackMapFrame::AppendFrameNoStack { offset_delta, .. }
            | StackMapFrame::FullFrame { offset_delta, .. } => offset_delta,
        }
    }

    /// Change the representation of positions
    pub fn map<Delta2, U2, E>(
        &self,
        delta: Delta2,
        map_uninitialized: impl Fn(&U) -> Result<U2, E>,
    ) -> Result<StackMapFrame<Delta2, U2>, E> {
        let map_all = |types: &[VerificationType<ClassConstantIndex, U>]| {
            types
                .iter()
                .map(|typ| typ.map(&map_uninitialized))
                .collect::<Result<Vec<_>, E>>()
        };
        Ok(match self {
            StackMapFrame::SameLocalsNoStack { .. } => StackMapFrame::SameLocalsNoStack {
                offset_delta: delta,
            },
            StackMapFrame::SameLocalsOneStack {
                stack_verification, ..
            } => StackMapFrame::SameLocalsOneStack {
                offset_delta: delta,
                stack_verification: stack_verification.map(&map_uninitialized)?,
            },
            StackMapFrame::ChoppedFrameNoStack { chopped_k, .. } => {
                StackMapFrame::ChoppedFrameNoStack {
                    offset_delta: delta,
                    chopped_k: *chopped_k,
                }
            }
            StackMapFrame::AppendFrameNoStack {
                local_verifications,
                ..
            } => StackMapFrame::AppendFrameNoStack {
                offset_delta: delta,
                local_verifications: map_all(local_verifications)?,
            },
            StackMapFrame::FullFrame {
                local_verifications,
                stack_verifications,
                ..
            } => StackMapFrame::FullFrame {
                offset_delta: delta,
                local_verifications: map_all(local_verifications)?,
                stack_verifications: map_all(stack_verifications)?,
            },
        })
    }
}

impl Serialize for StackMapFrame {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            StackMapFrame::SameLocalsNoStack {
                offset_delta: o @ 0..=63,
            } => {
                (*o as u8).serialize(writer)?;
            }
            StackMapFrame::SameLocalsNoStack { offset_delta } => {
                251u8.serialize(writer)?;
                offset_delta.serialize(writer)?;
            }
            StackMapFrame::SameLocalsOneStack {
                offset_delta: o @ 0..=63,
                stack_verification,
            } => {
                (*o as u8 + 64).serialize(writer)?;
                stack_verification.serialize(writer)?;
            }
            StackMapFrame::SameLocalsOneStack {
                offset_delta,
                stack_verification,
            } => {
                247u8.serialize(writer)?;
                offset_delta.serialize(writer)?;
                stack_verification.serialize(writer)?;
            }
            StackMapFrame::ChoppedFrameNoStack {
                offset_delta,
                chopped_k,
            } => {
                (251 - chopped_k).serialize(writer)?;
                offset_delta.serialize(writer)?;
            }
            StackMapFrame::AppendFrameNoStack {
                offset_delta,
                local_verifications,
            } => {
                (251 + local_verifications.len() as u8).serialize(writer)?;
                offset_delta.serialize(writer)?;
                for ver in local_verifications {
                    ver.serialize(writer)?;
                }
            }
            StackMapFrame::FullFrame {
                offset_delta,
                local_verifications,
                stack_verifications,
            } => {
                255u8.serialize(writer)?;
                offset_delta.serialize(writer)?;
                local_verifications.serialize(writer)?;
                stack_verifications.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Deserialize for StackMapFrame {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let frame = match u8::deserialize(reader)? {
            tag @ 0..=63 => StackMapFrame::SameLocalsNoStack {
                offset_delta: tag as u16,
            },
            tag @ 64..=127 => StackMapFrame::SameLocalsOneStack {
                offset_delta: (tag - 64) as u16,
                stack_verification: VerificationType::deserialize(reader)?,
            },
            247 => StackMapFrame::SameLocalsOneStack {
                offset_delta: u16::deserialize(reader)?,
                stack_verification: VerificationType::deserialize(reader)?,
            },
            tag @ 248..=250 => StackMapFrame::ChoppedFrameNoStack {
                offset_delta: u16::deserialize(reader)?,
                chopped_k: 251 - tag,
            },
            251 => StackMapFrame::SameLocalsNoStack {
                offset_delta: u16::deserialize(reader)?,
            },
            tag @ 252..=254 => {
                let offset_delta = u16::deserialize(reader)?;
                let mut local_verifications = vec![];
                for _ in 251..tag {
                    local_verifications.push(VerificationType::deserialize(reader)?);
                }
                StackMapFrame::AppendFrameNoStack {
                    offset_delta,
                    local_verifications,
                }
            }
            255 => StackMapFrame::FullFrame {
                offset_delta: u16::deserialize(reader)?,
                local_verifications: Vec::deserialize(reader)?,
                stack_verifications: Vec::deserialize(reader)?,
            },
            tag => {
                let msg = format!("Reserved stack map frame tag {}", tag);
                return Err(std::io::Error::new(ErrorKind::InvalidData, msg));
            }
        };
        Ok(frame)
    }
}

/// Types as understood by the verifier
///
///   - `Cls` is the representation of object types (a class constant in the class file)
///   - `U` is the representation of the position of the `new` instruction which created an
///     uninitialized object (an offset in the code array in the class file)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VerificationType<Cls, U> {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,

    /// In the constructor, the `this` parameter starts with this type then turns into an object
    /// type after `<init>` is called
    UninitializedThis,

    /// Object type
    Object(Cls),

    /// State of an object after `new` has been called by `<init>` has not been called
    Uninitialized(U),
}

impl<Cls: Clone, U> VerificationType<Cls, U> {
    pub fn map<U2, E>(
        &self,
        map_uninitialized: impl Fn(&U) -> Result<U2, E>,
    ) -> Result<VerificationType<Cls, U2>, E> {
        Ok(match self {
            VerificationType::Top => VerificationType::Top,
            VerificationType::Integer => VerificationType::Integer,
            VerificationType::Float => VerificationType::Float,
            VerificationType::Double => VerificationType::Double,
            VerificationType::Long => VerificationType::Long,
            VerificationType::Null => VerificationType::Null,
            VerificationType::UninitializedThis => VerificationType::UninitializedThis,
            VerificationType::Object(cls) => VerificationType::Object(cls.clone()),
            VerificationType::Uninitialized(u) => {
                VerificationType::Uninitialized(map_uninitialized(u)?)
            }
        })
    }
}

impl<Cls, U: Clone> VerificationType<Cls, U> {
    /// Change the representation of object types
    pub fn map_class<Cls2, E>(
        &self,
        mut map_class: impl FnMut(&Cls) -> Result<Cls2, E>,
    ) -> Result<VerificationType<Cls2, U>, E> {
        Ok(match self {
            VerificationType::Top => VerificationType::Top,
            VerificationType::Integer => VerificationType::Integer,
            VerificationType::Float => VerificationType::Float,
            VerificationType::Double => VerificationType::Double,
            VerificationType::Long => VerificationType::Long,
            VerificationType::Null => VerificationType::Null,
            VerificationType::UninitializedThis => VerificationType::UninitializedThis,
            VerificationType::Object(cls) => VerificationType::Object(map_class(cls)?),
            VerificationType::Uninitialized(u) => VerificationType::Uninitialized(u.clone()),
        })
    }
}

impl Serialize for VerificationType<ClassConstantIndex, u16> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            VerificationType::Top => 0u8.serialize(writer)?,
            VerificationType::Integer => 1u8.serialize(writer)?,
            VerificationType::Float => 2u8.serialize(writer)?,
            VerificationType::Double => 3u8.serialize(writer)?,
            VerificationType::Long => 4u8.serialize(writer)?,
            VerificationType::Null => 5u8.serialize(writer)?,
            VerificationType::UninitializedThis => 6u8.serialize(writer)?,
            VerificationType::Object(cls) => {
                7u8.serialize(writer)?;
                cls.serialize(writer)?;
            }
            VerificationType::Uninitialized(off) => {
                8u8.serialize(writer)?;
                off.serialize(writer)?;
            }
        }
        Ok(())
    }
}

impl Deserialize for VerificationType<ClassConstantIndex, u16> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let typ = match u8::deserialize(reader)? {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(ClassConstantIndex::deserialize(reader)?),
            8 => VerificationType::Uninitialized(u16::deserialize(reader)?),
            tag => {
                let msg = format!("Unknown verification type tag {}", tag);
                return Err(std::io::Error::new(ErrorKind::InvalidData, msg));
            }
        };
        Ok(typ)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.23
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapMethods(pub Vec<BootstrapMethod>);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BootstrapMethod {
    pub bootstrap_method: ConstantIndex,
    pub bootstrap_arguments: Vec<ConstantIndex>,
}

impl AttributeLike for BootstrapMethods {
    const NAME: &'static str = "BootstrapMethods";
}

impl Serialize for BootstrapMethods {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for BootstrapMethods {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(BootstrapMethods(Vec::deserialize(reader)?))
    }
}

impl Serialize for BootstrapMethod {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.bootstrap_method.serialize(writer)?;
        self.bootstrap_arguments.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for BootstrapMethod {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(BootstrapMethod {
            bootstrap_method: ConstantIndex::deserialize(reader)?,
            bootstrap_arguments: Vec::deserialize(reader)?,
        })
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.12
#[derive(Debug, Clone, PartialEq)]
pub struct LineNumberTable(pub Vec<LineNumber>);

#[derive(Debug, Clone, PartialEq)]
pub struct LineNumber {
    pub start_pc: BytecodeIndex,
    pub line_number: u16,
}

impl AttributeLike for LineNumberTable {
    const NAME: &'static str = "LineNumberTable";
}

impl Serialize for LineNumberTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for LineNumberTable {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(LineNumberTable(Vec::deserialize(reader)?))
    }
}

impl Serialize for LineNumber {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.line_number.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for LineNumber {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(LineNumber {
            start_pc: BytecodeIndex::deserialize(reader)?,
            line_number: u16::deserialize(reader)?,
        })
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.13
#[derive(Debug, Clone, PartialEq)]
pub struct LocalVariableTable(pub Vec<LocalVariable>);

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.14
///
/// Same layout as `LocalVariableTable`, except `descriptor_index` points to a generic signature.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalVariableTypeTable(pub Vec<LocalVariable>);

#[derive(Debug, Clone, PartialEq)]
pub struct LocalVariable {
    pub start_pc: BytecodeIndex,
    pub length: u16,
    pub name_index: Utf8ConstantIndex,
    pub descriptor_index: Utf8ConstantIndex,
    pub index: u16,
}

impl AttributeLike for LocalVariableTable {
    const NAME: &'static str = "LocalVariableTable";
}

impl AttributeLike for LocalVariableTypeTable {
    const NAME: &'static str = "LocalVariableTypeTable";
}

impl Serialize for LocalVariableTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for LocalVariableTable {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(LocalVariableTable(Vec::deserialize(reader)?))
    }
}

impl Serialize for LocalVariableTypeTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for LocalVariableTypeTable {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(LocalVariableTypeTable(Vec::deserialize(reader)?))
    }
}

impl Serialize for LocalVariable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.length.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.index.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for LocalVariable {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        Ok(LocalVariable {
            start_pc: BytecodeIndex::deserialize(reader)?,
            length: u16::deserialize(reader)?,
            name_index: Utf8ConstantIndex::deserialize(reader)?,
            descriptor_index: Utf8ConstantIndex::deserialize(reader)?,
            index: u16::deserialize(reader)?,
        })
    }
}

/// Name of the attribute holding annotations with `RUNTIME` retention
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.16
pub const RUNTIME_VISIBLE_ANNOTATIONS: &str = "RuntimeVisibleAnnotations";

/// Name of the attribute holding annotations with `CLASS` retention
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.17
pub const RUNTIME_INVISIBLE_ANNOTATIONS: &str = "RuntimeInvisibleAnnotations";

/// Read the types of the annotations in an annotations attribute
///
/// Element values are skipped over: only the annotation types are kept.
pub fn read_annotation_types<R: ReadBytesExt>(
    reader: &mut R,
) -> std::io::Result<Vec<Utf8ConstantIndex>> {
    let count = u16::deserialize(reader)?;
    let mut types = Vec::with_capacity(count as usize);
    for _ in 0..count {
        types.push(skip_annotation(reader)?);
    }
    Ok(types)
}

/// Read an `annotation` structure, returning its type
fn skip_annotation<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Utf8ConstantIndex> {
    let type_index = Utf8ConstantIndex::deserialize(reader)?;
    let pairs = u16::deserialize(reader)?;
    for _ in 0..pairs {
        let _element_name = u16::deserialize(reader)?;
        skip_element_value(reader)?;
    }
    Ok(type_index)
}

fn skip_element_value<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<()> {
    match u8::deserialize(reader)? {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' | b'c' => {
            let _index = u16::deserialize(reader)?;
        }
        b'e' => {
            let _type_name = u16::deserialize(reader)?;
            let _const_name = u16::deserialize(reader)?;
        }
        b'@' => {
            let _nested = skip_annotation(reader)?;
        }
        b'[' => {
            let values = u16::deserialize(reader)?;
            for _ in 0..values {
                skip_element_value(reader)?;
            }
        }
        tag => {
            let msg = format!("Unknown annotation element tag {:?}", tag as char);
            return Err(std::io::Error::new(ErrorKind::InvalidData, msg));
        }
    }
    Ok(())
}
