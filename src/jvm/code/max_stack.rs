//! Maximum operand stack depth
//!
//! Rewriting changes the stack usage of a method (eg. an allocation becomes `new` followed by
//! `dup`), so the `max_stack` read from the class file can't be trusted anymore. This walks the
//! instruction list from the method entry and every exception handler, tracking the stack depth
//! in slots (`long` and `double` take two).
//!
//! Every instruction is visited once, with the depth of the first path to reach it. That is
//! exactly right for code which passes verification, since the verifier requires all paths into
//! an instruction to agree on the stack.

use crate::jvm::code::{BranchInstruction, Code, FieldAccessKind, Instruction, Label};
use crate::jvm::{Error, FieldType, MethodDescriptor, ParseDescriptor};
use crate::util::Width;
use std::collections::HashMap;

impl Code {
    /// Compute the maximum depth of the operand stack
    pub fn compute_max_stack(&self) -> Result<u16, Error> {
        let label_indices: HashMap<Label, usize> = self
            .instructions
            .iter()
            .enumerate()
            .filter_map(|(idx, insn)| match insn {
                Instruction::Label(lbl) => Some((*lbl, idx)),
                _ => None,
            })
            .collect();
        let index_of = |lbl: &Label| -> Result<usize, Error> {
            label_indices
                .get(lbl)
                .copied()
                .ok_or(Error::UnresolvedLabel(*lbl))
        };

        let mut visited = vec![false; self.instructions.len()];
        let mut worklist: Vec<(usize, usize)> = vec![(0, 0)];
        for handler in &self.exception_handlers {
            // Handlers start with just the exception on the stack
            worklist.push((index_of(&handler.handler)?, 1));
        }

        let mut max_depth = 0;
        while let Some((start, mut depth)) = worklist.pop() {
            let mut idx = start;
            while let Some(insn) = self.instructions.get(idx) {
                if visited[idx] {
                    break;
                }
                visited[idx] = true;

                let (pop, push) = stack_effect(insn)?;
                depth = depth.saturating_sub(pop) + push;
                max_depth = max_depth.max(depth);
                if max_depth > u16::MAX as usize {
                    return Err(Error::MaxStackOverflow(idx));
                }

                if let Instruction::Branch(branch) = insn {
                    match branch {
                        // The return address is pushed for the subroutine only
                        BranchInstruction::Jsr(lbl) | BranchInstruction::JsrW(lbl) => {
                            max_depth = max_depth.max(depth + 1);
                            worklist.push((index_of(lbl)?, depth + 1));
                        }
                        _ => {
                            for lbl in branch.jump_targets() {
                                worklist.push((index_of(lbl)?, depth));
                            }
                        }
                    }
                    if !branch.falls_through() {
                        break;
                    }
                }
                idx += 1;
            }
        }

        Ok(max_depth as u16)
    }
}

fn bad_descriptor(descriptor: &str) -> Error {
    Error::BadDescriptor(String::from(descriptor))
}

fn field_width(descriptor: &str) -> Result<usize, Error> {
    FieldType::<String>::parse(descriptor)
        .map(|typ| typ.width())
        .map_err(|_| bad_descriptor(descriptor))
}

fn method_descriptor(descriptor: &str) -> Result<MethodDescriptor, Error> {
    MethodDescriptor::parse(descriptor).map_err(|_| bad_descriptor(descriptor))
}

/// Number of stack slots popped and then pushed by an instruction
fn stack_effect(insn: &Instruction) -> Result<(usize, usize), Error> {
    use Instruction::*;

    Ok(match insn {
        Nop | IInc(_, _) | Label(_) | LineNumber(_) | Frame(_) => (0, 0),

        AConstNull | IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5
        | FConst0 | FConst1 | FConst2 | BiPush(_) | SiPush(_) | ILoad(_) | FLoad(_)
        | ALoad(_) | New(_) => (0, 1),
        LConst0 | LConst1 | DConst0 | DConst1 | LLoad(_) | DLoad(_) => (0, 2),
        Ldc(constant) | Ldc2(constant) => (0, constant.width()),

        IALoad | FALoad | AALoad | BALoad | CALoad | SALoad => (2, 1),
        LALoad | DALoad => (2, 2),

        IStore(_) | FStore(_) | AStore(_) | Pop => (1, 0),
        LStore(_) | DStore(_) | Pop2 => (2, 0),

        IAStore | FAStore | AAStore | BAStore | CAStore | SAStore => (3, 0),
        LAStore | DAStore => (4, 0),

        Dup => (1, 2),
        DupX1 => (2, 3),
        DupX2 => (3, 4),
        Dup2 => (2, 4),
        Dup2X1 => (3, 5),
        Dup2X2 => (4, 6),
        Swap => (2, 2),

        IAdd | FAdd | ISub | FSub | IMul | FMul | IDiv | FDiv | IRem | FRem | IAnd | IOr
        | IXor | ISh(_) | FCmp(_) => (2, 1),
        LAdd | DAdd | LSub | DSub | LMul | DMul | LDiv | DDiv | LRem | DRem | LAnd | LOr
        | LXor => (4, 2),
        LSh(_) => (3, 2),
        LCmp | DCmp(_) => (4, 1),

        INeg | FNeg | I2F | F2I | I2B | I2C | I2S => (1, 1),
        LNeg | DNeg | L2D | D2L => (2, 2),
        I2L | I2D | F2L | F2D => (1, 2),
        L2I | L2F | D2I | D2F => (2, 1),

        Field(kind, field) => {
            let width = field_width(&field.descriptor)?;
            match kind {
                FieldAccessKind::GetStatic => (0, width),
                FieldAccessKind::PutStatic => (width, 0),
                FieldAccessKind::GetField => (1, width),
                FieldAccessKind::PutField => (1 + width, 0),
            }
        }
        Invoke(typ, method) => {
            let descriptor = method_descriptor(&method.descriptor)?;
            (
                descriptor.parameter_length(typ.has_receiver()),
                descriptor.return_length(),
            )
        }
        InvokeDynamic(call_site) => {
            let descriptor = method_descriptor(&call_site.descriptor)?;
            (descriptor.parameter_length(false), descriptor.return_length())
        }

        NewArray(_) | ANewArray(_) | ArrayLength | CheckCast(_) | InstanceOf(_) => (1, 1),
        MonitorEnter | MonitorExit => (1, 0),
        MultiANewArray(_, dimensions) => (*dimensions as usize, 1),

        Branch(branch) => match branch {
            BranchInstruction::If(_, _)
            | BranchInstruction::IfNull(_, _)
            | BranchInstruction::TableSwitch { .. }
            | BranchInstruction::LookupSwitch { .. }
            | BranchInstruction::IReturn
            | BranchInstruction::FReturn
            | BranchInstruction::AReturn
            | BranchInstruction::AThrow => (1, 0),
            BranchInstruction::IfICmp(_, _)
            | BranchInstruction::IfACmp(_, _)
            | BranchInstruction::LReturn
            | BranchInstruction::DReturn => (2, 0),
            BranchInstruction::Goto(_)
            | BranchInstruction::GotoW(_)
            | BranchInstruction::Jsr(_)
            | BranchInstruction::JsrW(_)
            | BranchInstruction::Ret(_)
            | BranchInstruction::Return => (0, 0),
        },
    })
}
