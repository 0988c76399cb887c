//! Operand extractors
//!
//! Each placeholder argument was pushed onto the stack by some instruction (or, for handles and
//! argument arrays, a run of instructions) before the placeholder call. The extractors find those
//! instructions, decode the value they push, and remove them. Scalar values have more than one
//! possible encoding, so each gets a decoding function usable with [`Stream::extract`] in either
//! direction.

use crate::jvm::class_file::HandleKind;
use crate::jvm::code::{ConstantData, FieldAccessKind, Handle, Instruction, InvokeType};
use crate::rewrite::placeholder::is_placeholder_call;
use crate::rewrite::stream::Direction::{Backward, Forward};
use crate::rewrite::{Error, HandleArg, HandleArgKind, OpcodeTag, Stream};

pub fn int_value(insn: &Instruction) -> Option<i32> {
    let value = match insn {
        Instruction::IConstM1 => -1,
        Instruction::IConst0 => 0,
        Instruction::IConst1 => 1,
        Instruction::IConst2 => 2,
        Instruction::IConst3 => 3,
        Instruction::IConst4 => 4,
        Instruction::IConst5 => 5,
        Instruction::BiPush(value) => *value as i32,
        Instruction::SiPush(value) => *value as i32,
        Instruction::Ldc(ConstantData::Integer(value)) => *value,
        _ => return None,
    };
    Some(value)
}

pub fn long_value(insn: &Instruction) -> Option<i64> {
    match insn {
        Instruction::LConst0 => Some(0),
        Instruction::LConst1 => Some(1),
        Instruction::Ldc(ConstantData::Long(value))
        | Instruction::Ldc2(ConstantData::Long(value)) => Some(*value),
        _ => None,
    }
}

pub fn float_value(insn: &Instruction) -> Option<f32> {
    match insn {
        Instruction::FConst0 => Some(0.0),
        Instruction::FConst1 => Some(1.0),
        Instruction::FConst2 => Some(2.0),
        Instruction::Ldc(ConstantData::Float(value)) => Some(*value),
        _ => None,
    }
}

pub fn double_value(insn: &Instruction) -> Option<f64> {
    match insn {
        Instruction::DConst0 => Some(0.0),
        Instruction::DConst1 => Some(1.0),
        Instruction::Ldc(ConstantData::Double(value))
        | Instruction::Ldc2(ConstantData::Double(value)) => Some(*value),
        _ => None,
    }
}

pub fn string_value(insn: &Instruction) -> Option<String> {
    match insn {
        Instruction::Ldc(ConstantData::String(value)) => Some(value.clone()),
        _ => None,
    }
}

/// Booleans are `int`s on the JVM, and `javac` always pushes them with `iconst_0`/`iconst_1`
pub fn bool_value(insn: &Instruction) -> Option<bool> {
    match insn {
        Instruction::IConst0 => Some(false),
        Instruction::IConst1 => Some(true),
        _ => None,
    }
}

/// Is this a call to a constructor of `class`?
pub fn is_constructor_of(insn: &Instruction, class: &str) -> bool {
    matches!(
        insn,
        Instruction::Invoke(InvokeType::Special, method)
            if method.owner == class && method.name == "<init>"
    )
}

impl<'a> Stream<'a> {
    /// Name of the opcode enum member loaded before the cursor
    fn pop_opcode_member(&mut self, cursor: usize) -> Result<(usize, String), Error> {
        let names = self.names();
        self.extract(cursor, Backward, |insn| match insn {
            Instruction::Field(FieldAccessKind::GetStatic, field)
                if field.owner == names.opcode_class =>
            {
                Some(field.name.clone())
            }
            _ => None,
        })
    }

    /// Invocation kind selected by an opcode enum member, scanning backward
    pub fn pop_invoke_type(&mut self, cursor: usize) -> Result<(usize, InvokeType), Error> {
        let (cursor, member) = self.pop_opcode_member(cursor)?;
        match OpcodeTag::from_member(&member) {
            Some(OpcodeTag::Invoke(typ)) => Ok((cursor, typ)),
            _ => Err(self.unknown_opcode(member)),
        }
    }

    /// Handle kind selected by an opcode enum member, scanning backward
    pub fn pop_handle_kind(&mut self, cursor: usize) -> Result<(usize, HandleKind), Error> {
        let (cursor, member) = self.pop_opcode_member(cursor)?;
        match OpcodeTag::from_member(&member) {
            Some(OpcodeTag::Handle(kind)) => Ok((cursor, kind)),
            _ => Err(self.unknown_opcode(member)),
        }
    }

    /// Arguments of a handle constructor call, scanning backward from the call
    fn pop_handle_operands(&mut self, cursor: usize) -> Result<(usize, Handle), Error> {
        let (cursor, is_interface) = self.extract(cursor, Backward, bool_value)?;
        let (cursor, descriptor) = self.extract(cursor, Backward, string_value)?;
        let (cursor, name) = self.extract(cursor, Backward, string_value)?;
        let (cursor, owner) = self.extract(cursor, Backward, string_value)?;
        let (cursor, kind) = self.pop_handle_kind(cursor)?;
        let handle = Handle {
            kind,
            owner,
            name,
            descriptor,
            is_interface,
        };
        Ok((cursor, handle))
    }

    /// Handle constructed before the cursor
    ///
    /// The `new` and `dup` that allocated the handle object are removed too, if they directly
    /// precede the constructor arguments.
    pub fn pop_last_handle(&mut self, cursor: usize) -> Result<(usize, Handle), Error> {
        let handle_class = self.names().handle_class.as_str();
        let (cursor, ()) = self.extract(cursor, Backward, |insn| {
            is_constructor_of(insn, handle_class).then(|| ())
        })?;
        let (mut cursor, handle) = self.pop_handle_operands(cursor)?;

        if let Some(dup) = self.previous_real(cursor) {
            if let Some(new) = self.previous_real(dup) {
                let is_dup = self.instructions()[dup] == Instruction::Dup;
                let is_new = matches!(
                    &self.instructions()[new],
                    Instruction::New(class) if class == handle_class
                );
                if is_dup && is_new {
                    self.remove(dup);
                    self.remove(new);
                    cursor = new;
                }
            }
        }

        Ok((cursor, handle))
    }

    /// Handle constructed at or after the cursor
    ///
    /// Allocations of handle objects found on the way to the constructor call are removed.
    pub fn pop_handle(&mut self, cursor: usize) -> Result<(usize, Handle), Error> {
        let names = self.names();
        let mut idx = cursor;
        while idx < self.site() {
            let insn = &self.instructions()[idx];
            let allocation = matches!(insn, Instruction::New(class) if *class == names.handle_class);
            let constructor = is_constructor_of(insn, &names.handle_class);

            if allocation {
                self.remove(idx);
                self.expect_next(idx, |insn| *insn == Instruction::Dup)?;
            } else if constructor {
                self.remove(idx);
                return self.pop_handle_operands(idx);
            } else if is_placeholder_call(insn, names) {
                break;
            } else {
                idx += 1;
            }
        }
        Err(self.argument_not_found())
    }

    /// Varargs array of `indy` arguments, built before the cursor
    ///
    /// Returns the arguments in declaration order, along with the position where the array
    /// length was pushed.
    pub fn pop_last_handle_args(
        &mut self,
        cursor: usize,
    ) -> Result<(usize, Vec<HandleArg>), Error> {
        let arg_class = self.names().handle_arg_class.as_str();
        let (cursor, ()) = self.extract(cursor, Backward, |insn| {
            matches!(insn, Instruction::ANewArray(class) if class == arg_class).then(|| ())
        })?;
        let (cursor, length) = self.extract(cursor, Backward, int_value)?;
        let length = usize::try_from(length)
            .map_err(|_| self.malformed_kind(format!("array of length {}", length)))?;

        // Elements are stored in order, right after the array is allocated
        let mut args = vec![];
        for _ in 0..length {
            args.push(self.pop_handle_arg(cursor)?);
        }
        Ok((cursor, args))
    }

    /// One `indy` argument, stored into the varargs array at or after the cursor
    fn pop_handle_arg(&mut self, cursor: usize) -> Result<HandleArg, Error> {
        // Array reference and element index
        self.skip_noise(cursor, true);

        let idx = self
            .next_real(cursor)
            .ok_or_else(|| self.argument_not_found())?;
        let class = match &self.instructions()[idx] {
            Instruction::New(class) => class.clone(),
            other => return Err(self.malformed_kind(format!("{:?}", other))),
        };
        let kind = HandleArgKind::from_class(&class, self.names())
            .ok_or_else(|| self.malformed_kind(class.clone()))?;
        self.remove(idx);
        self.expect_next(cursor, |insn| *insn == Instruction::Dup)?;
        self.skip_noise(cursor, false);

        let arg = match kind {
            HandleArgKind::Int => HandleArg::Int(self.extract(cursor, Forward, int_value)?.1),
            HandleArgKind::Long => HandleArg::Long(self.extract(cursor, Forward, long_value)?.1),
            HandleArgKind::Float => HandleArg::Float(self.extract(cursor, Forward, float_value)?.1),
            HandleArgKind::Double => {
                HandleArg::Double(self.extract(cursor, Forward, double_value)?.1)
            }
            HandleArgKind::String => {
                HandleArg::String(self.extract(cursor, Forward, string_value)?.1)
            }
            HandleArgKind::Type => HandleArg::Type(self.extract(cursor, Forward, string_value)?.1),
            HandleArgKind::Handle => HandleArg::Handle(self.pop_handle(cursor)?.1),
        };

        self.expect_next(cursor, |insn| is_constructor_of(insn, &class))?;
        self.expect_next(cursor, |insn| *insn == Instruction::AAStore)?;
        Ok(arg)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rewrite::fixtures::*;
    use crate::rewrite::ReservedNames;

    fn with_stream<T>(
        mut instructions: Vec<Instruction>,
        run: impl FnOnce(&mut Stream) -> T,
    ) -> (T, Vec<Instruction>) {
        let names = ReservedNames::default();
        instructions.push(placeholder("indy", "()V"));
        let site = instructions.len() - 1;
        let result = {
            let mut stream = Stream::new(&mut instructions, &names, site, String::from("indy"));
            run(&mut stream)
        };
        instructions.pop();
        (result, instructions)
    }

    fn static_handle(name: &str) -> Handle {
        Handle {
            kind: HandleKind::InvokeStatic,
            owner: String::from("ru/DmN/bul/Test"),
            name: String::from(name),
            descriptor: String::from("()V"),
            is_interface: false,
        }
    }

    #[test]
    fn scalar_encodings() {
        assert_eq!(int_value(&Instruction::IConstM1), Some(-1));
        assert_eq!(int_value(&Instruction::SiPush(-300)), Some(-300));
        assert_eq!(int_value(&ldc(ConstantData::Integer(1 << 20))), Some(1 << 20));
        assert_eq!(int_value(&Instruction::LConst1), None);

        assert_eq!(long_value(&Instruction::LConst1), Some(1));
        assert_eq!(
            long_value(&Instruction::Ldc2(ConstantData::Long(-9))),
            Some(-9)
        );
        assert_eq!(float_value(&Instruction::FConst2), Some(2.0));
        assert_eq!(
            double_value(&Instruction::Ldc2(ConstantData::Double(0.5))),
            Some(0.5)
        );
        assert_eq!(string_value(&string("x")), Some(String::from("x")));
        assert_eq!(string_value(&ldc(ConstantData::Class(String::from("x")))), None);

        assert_eq!(bool_value(&Instruction::IConst1), Some(true));
        assert_eq!(bool_value(&Instruction::IConst0), Some(false));
        assert_eq!(bool_value(&Instruction::IConst2), None);
    }

    #[test]
    fn opcode_members() {
        let (result, rest) = with_stream(
            vec![opcode("STATIC"), Instruction::ALoad(0)],
            |stream| stream.pop_invoke_type(2),
        );
        assert_eq!(result, Ok((0, InvokeType::Static)));
        assert_eq!(rest, vec![Instruction::ALoad(0)]);

        let (result, _) = with_stream(vec![opcode("H_GETFIELD")], |stream| {
            stream.pop_invoke_type(1)
        });
        assert_eq!(
            result,
            Err(Error::UnknownOpcodeTag {
                insertion: String::from("indy"),
                member: String::from("H_GETFIELD"),
            })
        );
    }

    #[test]
    fn backward_handle_takes_its_allocation() {
        let mut instructions = vec![Instruction::ALoad(1)];
        instructions.extend(new_handle(
            "H_INVOKE_STATIC",
            "ru/DmN/bul/Test",
            "foo",
            "()V",
            false,
        ));
        let (result, rest) = with_stream(instructions, |stream| {
            let site = stream.site();
            stream.pop_last_handle(site)
        });
        assert_eq!(result, Ok((1, static_handle("foo"))));
        assert_eq!(rest, vec![Instruction::ALoad(1)]);
    }

    #[test]
    fn handle_without_flag_is_not_found() {
        let mut instructions = new_handle("H_INVOKE_STATIC", "a", "b", "()V", false);
        instructions.remove(6);
        let (result, _) = with_stream(instructions, |stream| {
            let site = stream.site();
            stream.pop_last_handle(site)
        });
        assert_eq!(
            result,
            Err(Error::ArgumentNotFound {
                insertion: String::from("indy")
            })
        );
    }

    #[test]
    fn forward_handle() {
        let mut instructions = vec![Instruction::Nop];
        instructions.extend(new_handle(
            "H_INVOKESTATIC",
            "ru/DmN/bul/Test",
            "bar",
            "()V",
            false,
        ));
        instructions.push(Instruction::AAStore);
        let (result, rest) = with_stream(instructions, |stream| stream.pop_handle(1));
        assert_eq!(result.map(|(_, handle)| handle), Ok(static_handle("bar")));
        assert_eq!(rest, vec![Instruction::Nop, Instruction::AAStore]);
    }

    #[test]
    fn argument_array() {
        let mut instructions = vec![string("name")];
        instructions.extend(handle_args(vec![
            new_handle_arg(HandleArgKind::Int, vec![int(1)], "(I)V"),
            new_handle_arg(HandleArgKind::String, vec![string("x")], "(Ljava/lang/String;)V"),
            new_handle_arg(
                HandleArgKind::Long,
                vec![Instruction::Ldc2(ConstantData::Long(1 << 40))],
                "(J)V",
            ),
            new_handle_arg(HandleArgKind::Float, vec![Instruction::FConst2], "(F)V"),
            new_handle_arg(
                HandleArgKind::Float,
                vec![ldc(ConstantData::Float(1.5))],
                "(F)V",
            ),
            new_handle_arg(HandleArgKind::Double, vec![Instruction::DConst1], "(D)V"),
            new_handle_arg(
                HandleArgKind::Double,
                vec![Instruction::Ldc2(ConstantData::Double(0.25))],
                "(D)V",
            ),
            new_handle_arg(
                HandleArgKind::Type,
                vec![string("Ljava/lang/Object;")],
                "(Ljava/lang/String;)V",
            ),
            new_handle_arg(
                HandleArgKind::Handle,
                new_handle("H_INVOKE_STATIC", "ru/DmN/bul/Test", "foo", "()V", false),
                "(Lru/DmN/bul/IndyHandle;)V",
            ),
        ]));

        let (result, rest) = with_stream(instructions, |stream| {
            let site = stream.site();
            stream.pop_last_handle_args(site)
        });
        assert_eq!(
            result,
            Ok((
                1,
                vec![
                    HandleArg::Int(1),
                    HandleArg::String(String::from("x")),
                    HandleArg::Long(1 << 40),
                    HandleArg::Float(2.0),
                    HandleArg::Float(1.5),
                    HandleArg::Double(1.0),
                    HandleArg::Double(0.25),
                    HandleArg::Type(String::from("Ljava/lang/Object;")),
                    HandleArg::Handle(static_handle("foo")),
                ]
            ))
        );
        assert_eq!(rest, vec![string("name")]);
    }

    #[test]
    fn empty_argument_array() {
        let (result, rest) = with_stream(handle_args(vec![]), |stream| {
            stream.pop_last_handle_args(2)
        });
        assert_eq!(result, Ok((0, vec![])));
        assert!(rest.is_empty());
    }

    #[test]
    fn unknown_argument_kind() {
        let mut element = new_handle_arg(HandleArgKind::Int, vec![int(1)], "(I)V");
        element[0] = Instruction::New(String::from("ru/DmN/bul/IndyHandleArg$Char"));
        let (result, _) = with_stream(handle_args(vec![element]), |stream| {
            let site = stream.site();
            stream.pop_last_handle_args(site)
        });
        assert_eq!(
            result,
            Err(Error::MalformedArgumentKind {
                insertion: String::from("indy"),
                kind: String::from("ru/DmN/bul/IndyHandleArg$Char"),
            })
        );
    }
}
