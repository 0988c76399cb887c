//! Instruction sequences shaped like what `javac` emits for placeholder calls

use crate::jvm::code::{ConstantData, FieldAccessKind, FieldRef, Instruction, InvokeType, MethodRef};
use crate::rewrite::{HandleArgKind, ReservedNames};

const HANDLE_INIT: &str =
    "(Lru/DmN/bul/Opcode;Ljava/lang/String;Ljava/lang/String;Ljava/lang/String;Z)V";

pub fn ldc(constant: ConstantData) -> Instruction {
    Instruction::Ldc(constant)
}

pub fn string(value: &str) -> Instruction {
    Instruction::Ldc(ConstantData::String(String::from(value)))
}

/// Shortest push of an `int`
pub fn int(value: i32) -> Instruction {
    match value {
        -1 => Instruction::IConstM1,
        0 => Instruction::IConst0,
        1 => Instruction::IConst1,
        2 => Instruction::IConst2,
        3 => Instruction::IConst3,
        4 => Instruction::IConst4,
        5 => Instruction::IConst5,
        -128..=127 => Instruction::BiPush(value as i8),
        -32768..=32767 => Instruction::SiPush(value as i16),
        _ => Instruction::Ldc(ConstantData::Integer(value)),
    }
}

pub fn boolean(value: bool) -> Instruction {
    if value {
        Instruction::IConst1
    } else {
        Instruction::IConst0
    }
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

pub fn placeholder(name: &str, descriptor: &str) -> Instruction {
    invoke(
        InvokeType::Static,
        "ru/DmN/bul/OpcodeInsertion",
        name,
        descriptor,
    )
}

pub fn opcode(member: &str) -> Instruction {
    Instruction::Field(
        FieldAccessKind::GetStatic,
        FieldRef {
            owner: String::from("ru/DmN/bul/Opcode"),
            name: String::from(member),
            descriptor: String::from("Lru/DmN/bul/Opcode;"),
        },
    )
}

/// `new IndyHandle(Opcode.member, owner, name, descriptor, is_interface)`
pub fn new_handle(
    member: &str,
    owner: &str,
    name: &str,
    descriptor: &str,
    is_interface: bool,
) -> Vec<Instruction> {
    vec![
        Instruction::New(String::from("ru/DmN/bul/IndyHandle")),
        Instruction::Dup,
        opcode(member),
        string(owner),
        string(name),
        string(descriptor),
        boolean(is_interface),
        invoke(
            InvokeType::Special,
            "ru/DmN/bul/IndyHandle",
            "<init>",
            HANDLE_INIT,
        ),
    ]
}

/// `new IndyHandleArg.Kind(payload)`
pub fn new_handle_arg(
    kind: HandleArgKind,
    payload: Vec<Instruction>,
    descriptor: &str,
) -> Vec<Instruction> {
    let class = ReservedNames::default().handle_arg_kind_class(kind.suffix());
    let mut instructions = vec![Instruction::New(class.clone()), Instruction::Dup];
    instructions.extend(payload);
    instructions.push(invoke(InvokeType::Special, &class, "<init>", descriptor));
    instructions
}

/// Varargs array holding the given argument constructions
pub fn handle_args(elements: Vec<Vec<Instruction>>) -> Vec<Instruction> {
    let mut instructions = vec![
        int(elements.len() as i32),
        Instruction::ANewArray(String::from("ru/DmN/bul/IndyHandleArg")),
    ];
    for (idx, element) in elements.into_iter().enumerate() {
        instructions.push(Instruction::Dup);
        instructions.push(int(idx as i32));
        instructions.extend(element);
        instructions.push(Instruction::AAStore);
    }
    instructions
}
