use crate::jvm::class_file::{
    read_annotation_types, Attribute, AttributeLike, BootstrapMethods, ClassConstantIndex,
    ConstantsPool, Deserialize, Field, Method, Serialize, Version, RUNTIME_INVISIBLE_ANNOTATIONS,
    RUNTIME_VISIBLE_ANNOTATIONS,
};
use crate::jvm::{ClassAccessFlags, Error};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::ErrorKind;

/// Representation of the [`class` file format of the JVM][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html
#[derive(Debug)]
pub struct ClassFile {
    pub version: Version,
    pub constants: ConstantsPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: ClassConstantIndex,
    pub super_class: ClassConstantIndex,
    pub interfaces: Vec<ClassConstantIndex>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Magic header bytes that go at the front of the serialized class file
    const MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];

    /// Parse a class file from bytes
    ///
    /// The `BootstrapMethods` attribute, if there is one, is loaded into the constants pool so
    /// that `invokedynamic` call sites can be resolved.
    pub fn parse(bytes: &[u8]) -> Result<ClassFile, Error> {
        let mut reader = bytes;
        let mut class_file = ClassFile::deserialize(&mut reader)?;
        if !reader.is_empty() {
            return Err(Error::MalformedClass(format!(
                "{} trailing bytes after class file",
                reader.len()
            )));
        }

        if let Some(BootstrapMethods(methods)) =
            Attribute::find::<BootstrapMethods>(&class_file.attributes, &class_file.constants)?
        {
            class_file.constants.load_bootstrap_methods(methods);
        }

        Ok(class_file)
    }

    /// Internal name of the class
    pub fn class_name(&self) -> Result<&str, Error> {
        self.constants.lookup_class(self.this_class)
    }

    /// Internal name of the superclass (only `java/lang/Object` has none)
    pub fn superclass_name(&self) -> Result<Option<&str>, Error> {
        if self.super_class.0 .0 == 0 {
            return Ok(None);
        }
        self.constants.lookup_class(self.super_class).map(Some)
    }

    /// Does the class carry an annotation with this descriptor? Both visible and invisible
    /// annotations are considered.
    pub fn has_annotation(&self, descriptor: &str) -> Result<bool, Error> {
        for attribute in &self.attributes {
            let name = attribute.name(&self.constants)?;
            if name != RUNTIME_INVISIBLE_ANNOTATIONS && name != RUNTIME_VISIBLE_ANNOTATIONS {
                continue;
            }
            for annotation_type in read_annotation_types(&mut attribute.info.as_slice())? {
                if self.constants.lookup_utf8(annotation_type)? == descriptor {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// If new bootstrap methods were added to the constants pool, write out a fresh
    /// `BootstrapMethods` attribute (replacing the existing one, if any)
    pub fn sync_bootstrap_methods(&mut self) -> Result<(), Error> {
        if !self.constants.bootstrap_methods_changed() {
            return Ok(());
        }

        let table = BootstrapMethods(self.constants.bootstrap_methods().to_vec());
        let attribute = self.constants.get_attribute(table)?;

        let mut existing = None;
        for (idx, attr) in self.attributes.iter().enumerate() {
            if attr.name(&self.constants)? == BootstrapMethods::NAME {
                existing = Some(idx);
                break;
            }
        }
        match existing {
            Some(idx) => self.attributes[idx] = attribute,
            None => self.attributes.push(attribute),
        }
        Ok(())
    }
}

impl Serialize for ClassFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&ClassFile::MAGIC)?;
        self.version.serialize(writer)?;
        self.constants.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        self.super_class.serialize(writer)?;
        self.interfaces.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for ClassFile {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != ClassFile::MAGIC {
            return Err(std::io::Error::new(
                ErrorKind::InvalidData,
                "Missing 0xCAFEBABE class file header",
            ));
        }

        Ok(ClassFile {
            version: Version::deserialize(reader)?,
            constants: ConstantsPool::deserialize(reader)?,
            access_flags: ClassAccessFlags::deserialize(reader)?,
            this_class: ClassConstantIndex::deserialize(reader)?,
            super_class: ClassConstantIndex::deserialize(reader)?,
            interfaces: Vec::deserialize(reader)?,
            fields: Vec::deserialize(reader)?,
            methods: Vec::deserialize(reader)?,
            attributes: Vec::deserialize(reader)?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{BootstrapMethod, ConstantIndex};
    use crate::jvm::MethodAccessFlags;

    fn minimal_class() -> ClassFile {
        let mut constants = ConstantsPool::new();
        let this_name = constants.get_utf8("me/Example").unwrap();
        let this_class = constants.get_class(this_name).unwrap();
        let super_name = constants.get_utf8("java/lang/Object").unwrap();
        let super_class = constants.get_class(super_name).unwrap();
        let method_name = constants.get_utf8("run").unwrap();
        let method_descriptor = constants.get_utf8("()V").unwrap();
        ClassFile {
            version: Version::JAVA8,
            constants,
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class,
            super_class,
            interfaces: vec![],
            fields: vec![],
            methods: vec![Method {
                access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
                name_index: method_name,
                descriptor_index: method_descriptor,
                attributes: vec![],
            }],
            attributes: vec![],
        }
    }

    fn to_bytes(class: &ClassFile) -> Vec<u8> {
        let mut bytes = vec![];
        class.serialize(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn bytes_survive_a_parse() {
        let bytes = to_bytes(&minimal_class());
        assert_eq!(&bytes[0..4], &[0xCA, 0xFE, 0xBA, 0xBE]);

        let parsed = ClassFile::parse(&bytes).unwrap();
        assert_eq!(parsed.class_name().unwrap(), "me/Example");
        assert_eq!(parsed.superclass_name().unwrap(), Some("java/lang/Object"));
        assert_eq!(parsed.methods.len(), 1);
        assert_eq!(to_bytes(&parsed), bytes);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = to_bytes(&minimal_class());
        bytes[0] = 0;
        assert!(matches!(ClassFile::parse(&bytes), Err(Error::IoError(_))));
    }

    #[test]
    fn annotations_are_found_by_descriptor() {
        let mut class = minimal_class();
        let descriptor = class.constants.get_utf8("Lru/DmN/bul/BytecodeProcessor;").unwrap();
        let name_index = class.constants.get_utf8(RUNTIME_INVISIBLE_ANNOTATIONS).unwrap();
        let mut info = vec![0, 1];
        descriptor.serialize(&mut info).unwrap();
        info.extend_from_slice(&[0, 0]);
        class.attributes.push(Attribute { name_index, info });

        assert!(class.has_annotation("Lru/DmN/bul/BytecodeProcessor;").unwrap());
        assert!(!class.has_annotation("Ljava/lang/Deprecated;").unwrap());
    }

    #[test]
    fn bootstrap_methods_attribute_is_written_when_extended() {
        let mut class = minimal_class();
        class.sync_bootstrap_methods().unwrap();
        assert!(class.attributes.is_empty());

        let method = BootstrapMethod {
            bootstrap_method: ConstantIndex(1),
            bootstrap_arguments: vec![],
        };
        assert_eq!(class.constants.get_bootstrap_method(method).unwrap(), 0);
        class.sync_bootstrap_methods().unwrap();
        assert_eq!(class.attributes.len(), 1);

        let parsed = ClassFile::parse(&to_bytes(&class)).unwrap();
        assert_eq!(parsed.constants.bootstrap_methods().len(), 1);
        assert!(!parsed.constants.bootstrap_methods_changed());
    }
}
