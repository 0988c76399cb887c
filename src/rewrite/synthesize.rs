//! Replacing placeholders with the instructions they stand for
//!
//! Operands are always recovered last-pushed first, with each extraction continuing from where
//! the previous one removed its match.

use crate::jvm::code::{CallSite, FieldAccessKind, FieldRef, Instruction, InvokeType, MethodRef};
use crate::rewrite::extract::{bool_value, string_value};
use crate::rewrite::stream::Direction::Backward;
use crate::rewrite::{Error, HandleArg, Placeholder, Stream};

/// Rewrite the placeholder at the stream's site
pub fn synthesize(stream: &mut Stream, placeholder: Placeholder) -> Result<(), Error> {
    match placeholder {
        Placeholder::Alloc => alloc(stream),
        Placeholder::Init => init(stream),
        Placeholder::Field(kind) => field(stream, kind),
        Placeholder::Invoke => invoke(stream),
        Placeholder::Indy => indy(stream),
        Placeholder::Marker => {
            stream.remove_site();
            Ok(())
        }
        Placeholder::Unsupported => Err(Error::UnsupportedOperation {
            insertion: String::from(stream.insertion()),
        }),
    }
}

/// `alloc(type)` becomes `new type; dup`
///
/// The placeholder returns the allocated object, and the `dup` keeps the value on the stack for
/// the `init` that follows (which consumes one copy).
fn alloc(stream: &mut Stream) -> Result<(), Error> {
    let (_, class) = stream.extract(stream.site(), Backward, string_value)?;
    stream.insert_before_site(Instruction::New(class));
    stream.replace_site(Instruction::Dup);
    Ok(())
}

/// `init(type, descriptor)` becomes `invokespecial type.<init>(descriptor)`
fn init(stream: &mut Stream) -> Result<(), Error> {
    let (cursor, descriptor) = stream.extract(stream.site(), Backward, string_value)?;
    let (_, owner) = stream.extract(cursor, Backward, string_value)?;
    stream.replace_site(Instruction::Invoke(
        InvokeType::Special,
        MethodRef {
            owner,
            name: String::from("<init>"),
            descriptor,
            is_interface: false,
        },
    ));
    Ok(())
}

fn field(stream: &mut Stream, kind: FieldAccessKind) -> Result<(), Error> {
    let (cursor, descriptor) = stream.extract(stream.site(), Backward, string_value)?;
    let (cursor, name) = stream.extract(cursor, Backward, string_value)?;
    let (_, owner) = stream.extract(cursor, Backward, string_value)?;
    stream.replace_site(Instruction::Field(
        kind,
        FieldRef {
            owner,
            name,
            descriptor,
        },
    ));
    Ok(())
}

fn invoke(stream: &mut Stream) -> Result<(), Error> {
    let (cursor, is_interface) = stream.extract(stream.site(), Backward, bool_value)?;
    let (cursor, descriptor) = stream.extract(cursor, Backward, string_value)?;
    let (cursor, name) = stream.extract(cursor, Backward, string_value)?;
    let (cursor, owner) = stream.extract(cursor, Backward, string_value)?;
    let (_, typ) = stream.pop_invoke_type(cursor)?;
    stream.replace_site(Instruction::Invoke(
        typ,
        MethodRef {
            owner,
            name,
            descriptor,
            is_interface,
        },
    ));
    Ok(())
}

fn indy(stream: &mut Stream) -> Result<(), Error> {
    let (cursor, arguments) = stream.pop_last_handle_args(stream.site())?;
    let (cursor, bootstrap) = stream.pop_last_handle(cursor)?;
    let (cursor, descriptor) = stream.extract(cursor, Backward, string_value)?;
    let (_, name) = stream.extract(cursor, Backward, string_value)?;
    stream.replace_site(Instruction::InvokeDynamic(CallSite {
        name,
        descriptor,
        bootstrap,
        arguments: arguments.into_iter().map(HandleArg::into_constant).collect(),
    }));
    Ok(())
}
