mod harness;

use harness::*;
use opcode_insertion::jvm::class_file::{
    Attribute, ClassConstantIndex, ClassFile, HandleKind, StackMapFrame, StackMapTable,
    VerificationType,
};
use opcode_insertion::jvm::code::{
    BranchInstruction, Code, ConstantData, Handle, Instruction, InvokeType, Label, MethodRef,
    OrdComparison,
};
use opcode_insertion::rewrite;
use opcode_insertion::transform::{transform_class, Error, FailurePolicy, Settings, Transformed};

const BOOTSTRAP: &str = "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;";

/// `return (StringBuilder) OpcodeInsertion.alloc("java/lang/StringBuilder").init(..., "()V").endA();`
fn new_string_builder() -> Vec<Instruction> {
    vec![
        string("java/lang/StringBuilder"),
        insertion("alloc", "(Ljava/lang/String;)Lru/DmN/bul/OpcodeInsertion;"),
        string("java/lang/StringBuilder"),
        string("()V"),
        chained(
            "init",
            "(Ljava/lang/String;Ljava/lang/String;)Lru/DmN/bul/OpcodeInsertion;",
        ),
        chained("endA", "()Ljava/lang/Object;"),
        Instruction::CheckCast(String::from("java/lang/StringBuilder")),
        Instruction::Branch(BranchInstruction::AReturn),
    ]
}

fn rewritten_bytes(transformed: Transformed) -> (Vec<u8>, usize) {
    match transformed {
        Transformed::Rewritten { bytes, rewrites } => (bytes, rewrites),
        Transformed::Unchanged => panic!("class was not rewritten"),
    }
}

#[test]
fn unmarked_classes_are_unchanged() {
    let bytes = TestClass::new("me/Plain")
        .method("make", "()Ljava/lang/StringBuilder;", 0, new_string_builder())
        .to_bytes();
    assert_eq!(
        transform_class(&bytes, &Settings::default()).unwrap(),
        Transformed::Unchanged
    );
}

#[test]
fn marker_can_be_ignored() {
    let bytes = TestClass::new("me/Plain")
        .method("make", "()Ljava/lang/StringBuilder;", 0, new_string_builder())
        .to_bytes();
    let mut settings = Settings::default();
    settings.require_marker = false;

    let (_, rewrites) = rewritten_bytes(transform_class(&bytes, &settings).unwrap());
    assert_eq!(rewrites, 3);
}

#[test]
fn nothing_to_rewrite() {
    let bytes = TestClass::new("me/Marked")
        .marked()
        .method(
            "run",
            "()V",
            0,
            vec![
                string("hello"),
                Instruction::Pop,
                Instruction::Branch(BranchInstruction::Return),
            ],
        )
        .to_bytes();
    assert_eq!(
        transform_class(&bytes, &Settings::default()).unwrap(),
        Transformed::Unchanged
    );
}

#[test]
fn alloc_and_init() {
    let bytes = TestClass::new("me/Marked")
        .marked()
        .method("make", "()Ljava/lang/StringBuilder;", 0, new_string_builder())
        .to_bytes();
    let (bytes, rewrites) = rewritten_bytes(transform_class(&bytes, &Settings::default()).unwrap());
    assert_eq!(rewrites, 3);

    assert_eq!(
        real_instructions(&bytes, "make"),
        vec![
            Instruction::New(String::from("java/lang/StringBuilder")),
            Instruction::Dup,
            invoke(
                InvokeType::Special,
                "java/lang/StringBuilder",
                "<init>",
                "()V"
            ),
            Instruction::CheckCast(String::from("java/lang/StringBuilder")),
            Instruction::Branch(BranchInstruction::AReturn),
        ]
    );

    // `new` and `dup` are both on the stack when the constructor is called
    let class = ClassFile::parse(&bytes).unwrap();
    assert_eq!(code_attribute(&class, "make").max_stack, 2);
}

#[test]
fn branch_inside_alloc_and_init() {
    // return (StringBuilder) OpcodeInsertion.alloc("java/lang/StringBuilder")
    //     .argA(flag ? "yes" : "no")
    //     .init("java/lang/StringBuilder", "(Ljava/lang/String;)V")
    //     .endA();
    let insertion_type = || VerificationType::Object(String::from(INSERTION));
    let string_type = || VerificationType::Object(String::from("java/lang/String"));
    let bytes = TestClass::new("me/Marked")
        .marked()
        .method_with_frames(
            "make",
            "(Z)Ljava/lang/StringBuilder;",
            1,
            vec![
                string("java/lang/StringBuilder"),
                insertion("alloc", "(Ljava/lang/String;)Lru/DmN/bul/OpcodeInsertion;"),
                Instruction::ILoad(0),
                Instruction::Branch(BranchInstruction::If(OrdComparison::EQ, Label(1))),
                string("yes"),
                Instruction::Branch(BranchInstruction::Goto(Label(2))),
                Instruction::Label(Label(1)),
                string("no"),
                Instruction::Label(Label(2)),
                chained("argA", "(Ljava/lang/Object;)Lru/DmN/bul/OpcodeInsertion;"),
                string("java/lang/StringBuilder"),
                string("(Ljava/lang/String;)V"),
                chained(
                    "init",
                    "(Ljava/lang/String;Ljava/lang/String;)Lru/DmN/bul/OpcodeInsertion;",
                ),
                chained("endA", "()Ljava/lang/Object;"),
                Instruction::CheckCast(String::from("java/lang/StringBuilder")),
                Instruction::Branch(BranchInstruction::AReturn),
            ],
            vec![
                JavacFrame {
                    at: Label(1),
                    locals: vec![VerificationType::Integer],
                    stack: vec![insertion_type()],
                },
                JavacFrame {
                    at: Label(2),
                    locals: vec![VerificationType::Integer],
                    stack: vec![insertion_type(), string_type()],
                },
            ],
        )
        .to_bytes();
    let (bytes, rewrites) = rewritten_bytes(transform_class(&bytes, &Settings::default()).unwrap());
    assert_eq!(rewrites, 4);

    let class = ClassFile::parse(&bytes).unwrap();
    let attribute = code_attribute(&class, "make");
    assert_eq!(attribute.max_stack, 3);
    assert!(
        Attribute::find::<StackMapTable>(&attribute.attributes, &class.constants)
            .unwrap()
            .is_some()
    );

    let code = Code::decode(&attribute, &class.constants).unwrap();
    let allocation = match code.instructions[0] {
        Instruction::Label(label) => label,
        ref other => panic!("expected a label before `new`, found {:?}", other),
    };
    assert_eq!(
        code.instructions[1],
        Instruction::New(String::from("java/lang/StringBuilder"))
    );

    // Both branch targets sit between `new` and `<init>`, so the stale `OpcodeInsertion` entries
    // must have become the uninitialized object
    let named = |types: &[VerificationType<ClassConstantIndex, Label>]| {
        types
            .iter()
            .map(|typ| {
                typ.map_class(|class_index| {
                    class
                        .constants
                        .lookup_class(*class_index)
                        .map(String::from)
                })
                .unwrap()
            })
            .collect::<Vec<_>>()
    };
    let frames: Vec<_> = code
        .instructions
        .iter()
        .filter_map(|insn| match insn {
            Instruction::Frame(StackMapFrame::FullFrame {
                local_verifications,
                stack_verifications,
                ..
            }) => Some((named(local_verifications), named(stack_verifications))),
            Instruction::Frame(other) => panic!("expected a full frame, found {:?}", other),
            _ => None,
        })
        .collect();
    let uninitialized = || VerificationType::Uninitialized(allocation);
    assert_eq!(
        frames,
        vec![
            (
                vec![VerificationType::Integer],
                vec![uninitialized(), uninitialized()],
            ),
            (
                vec![VerificationType::Integer],
                vec![uninitialized(), uninitialized(), string_type()],
            ),
        ]
    );
}

#[test]
fn invoke_keeps_call_arguments() {
    // OpcodeInsertion.invoke(Opcode.VIRTUAL, "java/io/PrintStream", "println", "(I)V", false).end();
    let bytes = TestClass::new("me/Marked")
        .marked()
        .method(
            "run",
            "()V",
            0,
            vec![
                get_static("java/lang/System", "out", "Ljava/io/PrintStream;"),
                Instruction::BiPush(42),
                opcode("VIRTUAL"),
                string("java/io/PrintStream"),
                string("println"),
                string("(I)V"),
                Instruction::IConst0,
                insertion(
                    "invoke",
                    "(Lru/DmN/bul/Opcode;Ljava/lang/String;Ljava/lang/String;Ljava/lang/String;Z)Lru/DmN/bul/OpcodeInsertion;",
                ),
                chained("end", "()V"),
                Instruction::Branch(BranchInstruction::Return),
            ],
        )
        .to_bytes();
    let (bytes, rewrites) = rewritten_bytes(transform_class(&bytes, &Settings::default()).unwrap());
    assert_eq!(rewrites, 2);
    assert_eq!(
        real_instructions(&bytes, "run"),
        vec![
            get_static("java/lang/System", "out", "Ljava/io/PrintStream;"),
            Instruction::BiPush(42),
            Instruction::Invoke(
                InvokeType::Virtual,
                MethodRef {
                    owner: String::from("java/io/PrintStream"),
                    name: String::from("println"),
                    descriptor: String::from("(I)V"),
                    is_interface: false,
                }
            ),
            Instruction::Branch(BranchInstruction::Return),
        ]
    );
}

#[test]
fn indy_adds_a_bootstrap_method() {
    // OpcodeInsertion.indy("println", "()V", new IndyHandle(...), new IndyHandleArg.String("hi")).end();
    let handle_arg = "ru/DmN/bul/IndyHandleArg";
    let string_arg = "ru/DmN/bul/IndyHandleArg$String";
    let bytes = TestClass::new("me/Marked")
        .marked()
        .method(
            "run",
            "()V",
            0,
            vec![
                string("println"),
                string("()V"),
                Instruction::New(String::from("ru/DmN/bul/IndyHandle")),
                Instruction::Dup,
                opcode("H_INVOKE_STATIC"),
                string("me/Marked"),
                string("bootstrap"),
                string(BOOTSTRAP),
                Instruction::IConst0,
                invoke(
                    InvokeType::Special,
                    "ru/DmN/bul/IndyHandle",
                    "<init>",
                    "(Lru/DmN/bul/Opcode;Ljava/lang/String;Ljava/lang/String;Ljava/lang/String;Z)V",
                ),
                Instruction::IConst1,
                Instruction::ANewArray(String::from(handle_arg)),
                Instruction::Dup,
                Instruction::IConst0,
                Instruction::New(String::from(string_arg)),
                Instruction::Dup,
                string("hi"),
                invoke(
                    InvokeType::Special,
                    string_arg,
                    "<init>",
                    "(Ljava/lang/String;)V",
                ),
                Instruction::AAStore,
                insertion(
                    "indy",
                    "(Ljava/lang/String;Ljava/lang/String;Lru/DmN/bul/IndyHandle;[Lru/DmN/bul/IndyHandleArg;)Lru/DmN/bul/OpcodeInsertion;",
                ),
                chained("end", "()V"),
                Instruction::Branch(BranchInstruction::Return),
            ],
        )
        .to_bytes();
    let (bytes, rewrites) = rewritten_bytes(transform_class(&bytes, &Settings::default()).unwrap());
    assert_eq!(rewrites, 2);

    let bootstrap = Handle {
        kind: HandleKind::InvokeStatic,
        owner: String::from("me/Marked"),
        name: String::from("bootstrap"),
        descriptor: String::from(BOOTSTRAP),
        is_interface: false,
    };
    let instructions = real_instructions(&bytes, "run");
    assert_eq!(instructions.len(), 2);
    match &instructions[0] {
        Instruction::InvokeDynamic(call_site) => {
            assert_eq!(call_site.name, "println");
            assert_eq!(call_site.descriptor, "()V");
            assert_eq!(call_site.bootstrap, bootstrap);
            assert_eq!(
                call_site.arguments,
                vec![ConstantData::String(String::from("hi"))]
            );
        }
        other => panic!("expected invokedynamic, got {:?}", other),
    }

    let class = ClassFile::parse(&bytes).unwrap();
    assert_eq!(class.constants.bootstrap_methods().len(), 1);
    assert_eq!(
        class.constants.bootstrap_methods()[0]
            .bootstrap_arguments
            .len(),
        1
    );
}

#[test]
fn untouched_methods_keep_their_code() {
    let plain_body = vec![
        Instruction::ILoad(0),
        Instruction::IConst2,
        Instruction::IMul,
        Instruction::Branch(BranchInstruction::IReturn),
    ];
    let bytes = TestClass::new("me/Marked")
        .marked()
        .method("twice", "(I)I", 1, plain_body)
        .method("make", "()Ljava/lang/StringBuilder;", 0, new_string_builder())
        .to_bytes();
    let (rewritten, _) = rewritten_bytes(transform_class(&bytes, &Settings::default()).unwrap());

    let before = ClassFile::parse(&bytes).unwrap();
    let after = ClassFile::parse(&rewritten).unwrap();
    assert_eq!(
        code_attribute(&before, "twice").code_array,
        code_attribute(&after, "twice").code_array
    );
    assert_eq!(before.methods[0].attributes, after.methods[0].attributes);
}

#[test]
fn failures_name_the_method() {
    // `invoke` without the opcode
    let bytes = TestClass::new("me/Broken")
        .marked()
        .method(
            "run",
            "()V",
            0,
            vec![
                string("java/io/PrintStream"),
                string("flush"),
                string("()V"),
                Instruction::IConst0,
                insertion(
                    "invoke",
                    "(Ljava/lang/String;Ljava/lang/String;Ljava/lang/String;Z)Lru/DmN/bul/OpcodeInsertion;",
                ),
                Instruction::Pop,
                Instruction::Branch(BranchInstruction::Return),
            ],
        )
        .to_bytes();

    match transform_class(&bytes, &Settings::default()) {
        Err(Error::Rewrite {
            class,
            method,
            error,
        }) => {
            assert_eq!(class, "me/Broken");
            assert_eq!(method, "run()V");
            assert_eq!(
                error,
                rewrite::Error::ArgumentNotFound {
                    insertion: String::from("invoke")
                }
            );
        }
        other => panic!("expected a rewrite error, got {:?}", other),
    }

    let mut settings = Settings::default();
    settings.failure_policy = FailurePolicy::KeepOriginal;
    assert_eq!(
        transform_class(&bytes, &settings).unwrap(),
        Transformed::Unchanged
    );
}

#[test]
fn unknown_placeholders_are_rejected() {
    let bytes = TestClass::new("me/Broken")
        .marked()
        .method(
            "run",
            "()V",
            0,
            vec![
                insertion("monitorEnter", "()V"),
                Instruction::Branch(BranchInstruction::Return),
            ],
        )
        .to_bytes();
    assert!(matches!(
        transform_class(&bytes, &Settings::default()),
        Err(Error::Rewrite {
            error: rewrite::Error::UnsupportedOperation { .. },
            ..
        })
    ));
}

#[test]
fn other_runtime_packages() {
    let bytes = TestClass::new("me/Marked")
        .marked()
        .method("make", "()Ljava/lang/StringBuilder;", 0, new_string_builder())
        .to_bytes();

    // Neither the marker nor the placeholders are in this package
    let mut settings = Settings::new("com/example/rt");
    assert_eq!(
        transform_class(&bytes, &settings).unwrap(),
        Transformed::Unchanged
    );
    settings.require_marker = false;
    assert_eq!(
        transform_class(&bytes, &settings).unwrap(),
        Transformed::Unchanged
    );
}
