#![allow(dead_code)]

use opcode_insertion::jvm::class_file::{
    Attribute, ClassFile, Code as CodeAttribute, ConstantsPool, Method, Serialize, StackMapFrame,
    VerificationType, Version, RUNTIME_INVISIBLE_ANNOTATIONS,
};
use opcode_insertion::jvm::code::{
    Code, ConstantData, ConstantsWriter, FieldAccessKind, FieldRef, Instruction, InvokeType,
    Label, MethodRef,
};
use opcode_insertion::jvm::{ClassAccessFlags, MethodAccessFlags};

pub const MARKER: &str = "Lru/DmN/bul/BytecodeProcessor;";
pub const INSERTION: &str = "ru/DmN/bul/OpcodeInsertion";
pub const INSERTION_TYPE: &str = "Lru/DmN/bul/OpcodeInsertion;";

/// Frame that `javac` would have emitted at a label, with classes given by name
pub struct JavacFrame {
    pub at: Label,
    pub locals: Vec<VerificationType<String, Label>>,
    pub stack: Vec<VerificationType<String, Label>>,
}

/// Class file assembled in memory, the way `javac` would have compiled placeholder calls
pub struct TestClass {
    name: String,
    marked: bool,
    methods: Vec<(String, String, Code, Vec<JavacFrame>)>,
}

impl TestClass {
    pub fn new(name: &str) -> TestClass {
        TestClass {
            name: String::from(name),
            marked: false,
            methods: vec![],
        }
    }

    /// Add the marker annotation
    pub fn marked(mut self) -> TestClass {
        self.marked = true;
        self
    }

    /// Add a static method
    pub fn method(
        self,
        name: &str,
        descriptor: &str,
        max_locals: u16,
        instructions: Vec<Instruction>,
    ) -> TestClass {
        self.method_with_frames(name, descriptor, max_locals, instructions, vec![])
    }

    /// Add a static method, with full frames at some of its labels
    pub fn method_with_frames(
        mut self,
        name: &str,
        descriptor: &str,
        max_locals: u16,
        instructions: Vec<Instruction>,
        frames: Vec<JavacFrame>,
    ) -> TestClass {
        let code = Code {
            max_stack: 0,
            max_locals,
            instructions,
            exception_handlers: vec![],
            local_variables: vec![],
            local_variable_types: vec![],
            other_attributes: vec![],
        };
        self.methods
            .push((String::from(name), String::from(descriptor), code, frames));
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut constants = ConstantsPool::new();
        let this_name = constants.get_utf8(self.name.as_str()).unwrap();
        let this_class = constants.get_class(this_name).unwrap();
        let super_name = constants.get_utf8("java/lang/Object").unwrap();
        let super_class = constants.get_class(super_name).unwrap();

        let mut methods = vec![];
        for (name, descriptor, code, frames) in &self.methods {
            let name_index = constants.get_utf8(name.as_str()).unwrap();
            let descriptor_index = constants.get_utf8(descriptor.as_str()).unwrap();
            let mut code = code.clone();
            for frame in frames {
                let position = code
                    .instructions
                    .iter()
                    .position(|insn| *insn == Instruction::Label(frame.at))
                    .unwrap();
                let mut intern = |types: &[VerificationType<String, Label>]| {
                    types
                        .iter()
                        .map(|typ| typ.map_class(|class| class.constant_index(&mut constants)))
                        .collect::<Result<Vec<_>, _>>()
                        .unwrap()
                };
                let full_frame = StackMapFrame::FullFrame {
                    offset_delta: (),
                    local_verifications: intern(&frame.locals),
                    stack_verifications: intern(&frame.stack),
                };
                code.instructions
                    .insert(position + 1, Instruction::Frame(full_frame));
            }
            let code_attribute = code.serialize_code(&mut constants).unwrap();
            let attribute = constants.get_attribute(code_attribute).unwrap();
            methods.push(Method {
                access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
                name_index,
                descriptor_index,
                attributes: vec![attribute],
            });
        }

        let mut attributes = vec![];
        if self.marked {
            let name_index = constants.get_utf8(RUNTIME_INVISIBLE_ANNOTATIONS).unwrap();
            let type_index = constants.get_utf8(MARKER).unwrap();
            let mut info = vec![0, 1];
            type_index.serialize(&mut info).unwrap();
            info.extend_from_slice(&[0, 0]);
            attributes.push(Attribute { name_index, info });
        }

        let mut class = ClassFile {
            version: Version::JAVA8,
            constants,
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class,
            super_class,
            interfaces: vec![],
            fields: vec![],
            methods,
            attributes,
        };
        class.sync_bootstrap_methods().unwrap();

        let mut bytes = vec![];
        class.serialize(&mut bytes).unwrap();
        bytes
    }
}

/// Raw `Code` attribute of a method
pub fn code_attribute(class: &ClassFile, method_name: &str) -> CodeAttribute {
    for method in &class.methods {
        if class.constants.lookup_utf8(method.name_index).unwrap() == method_name {
            return Attribute::find::<CodeAttribute>(&method.attributes, &class.constants)
                .unwrap()
                .unwrap();
        }
    }
    panic!("no method {}", method_name)
}

/// Decoded instructions of a method, without labels, line numbers, or frames
pub fn real_instructions(bytes: &[u8], method_name: &str) -> Vec<Instruction> {
    let class = ClassFile::parse(bytes).unwrap();
    let code = Code::decode(&code_attribute(&class, method_name), &class.constants).unwrap();
    code.instructions
        .into_iter()
        .filter(|insn| !insn.is_pseudo())
        .collect()
}

pub fn string(value: &str) -> Instruction {
    Instruction::Ldc(ConstantData::String(String::from(value)))
}

pub fn invoke(typ: InvokeType, owner: &str, name: &str, descriptor: &str) -> Instruction {
    Instruction::Invoke(
        typ,
        MethodRef {
            owner: String::from(owner),
            name: String::from(name),
            descriptor: String::from(descriptor),
            is_interface: false,
        },
    )
}

/// Static placeholder call (eg. `alloc`, `invoke`, `indy`)
pub fn insertion(name: &str, descriptor: &str) -> Instruction {
    invoke(InvokeType::Static, INSERTION, name, descriptor)
}

/// Chained placeholder call on the result of a previous one (eg. `init`, `argI`, `end`)
pub fn chained(name: &str, descriptor: &str) -> Instruction {
    invoke(InvokeType::Virtual, INSERTION, name, descriptor)
}

pub fn get_static(owner: &str, name: &str, descriptor: &str) -> Instruction {
    Instruction::Field(
        FieldAccessKind::GetStatic,
        FieldRef {
            owner: String::from(owner),
            name: String::from(name),
            descriptor: String::from(descriptor),
        },
    )
}

pub fn opcode(member: &str) -> Instruction {
    get_static("ru/DmN/bul/Opcode", member, "Lru/DmN/bul/Opcode;")
}
