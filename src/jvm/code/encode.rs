//! Encoding of [`Code`] back into a `Code` attribute
//!
//! Operands get interned into the constants pool first. Then comes layout: since the width of
//! some instructions depends on their position (switch padding) and on the distance to their jump
//! targets (`goto` vs. `goto_w`), offsets are computed repeatedly until they settle. Widening only
//! ever makes instructions larger, so this always terminates.
//!
//! Conditional branches have no wide form. If one of those ends up with a jump that is too far,
//! encoding fails instead of trying to restructure the code.

use crate::jvm::class_file::{
    self, BytecodeArray, BytecodeIndex, ClassConstantIndex, Code as CodeAttribute, ConstantIndex,
    ConstantsPool, LineNumber, LineNumberTable, LocalVariableTable, LocalVariableTypeTable,
    Serialize, StackMapFrame, StackMapTable,
};
use crate::jvm::code::{
    BranchInstruction, CallSite, Code, ConstantData, ConstantsWriter, FieldRef, IndexedInstruction,
    Instruction, Label, LocalVariable, MethodRef, SerializableInstruction,
};
use crate::jvm::{Error, MethodDescriptor, ParseDescriptor};
use crate::util::{Offset, Width};
use log::warn;
use std::cell::RefCell;
use std::collections::HashMap;

impl Code {
    /// Encode the code into a `Code` attribute, adding whatever constants are needed
    ///
    /// Max stack is recomputed, but max locals is kept as is.
    pub fn serialize_code(&self, constants: &mut ConstantsPool) -> Result<CodeAttribute, Error> {
        let max_stack = self.compute_max_stack()?;

        let mut indexed = self
            .instructions
            .iter()
            .map(|insn| index_instruction(insn, constants))
            .collect::<Result<Vec<_>, Error>>()?;
        let layout = Layout::compute(&mut indexed)?;

        // Bytecode
        let mut code_array = vec![];
        for (insn, offset) in indexed.iter().zip(&layout.offsets) {
            let serializable = relativize(insn, *offset, &layout)?;
            serializable.serialize(&mut code_array)?;
        }
        if code_array.len() > u16::MAX as usize {
            return Err(Error::MethodCodeOverflow(Offset(code_array.len())));
        }

        let exception_table = self
            .exception_handlers
            .iter()
            .map(|handler| {
                let catch_type = match &handler.catch_type {
                    None => ClassConstantIndex(ConstantIndex(0)),
                    Some(class) => class.constant_index(constants)?,
                };
                Ok(class_file::ExceptionHandler {
                    start_pc: layout.bytecode_index(handler.start)?,
                    end_pc: layout.bytecode_index(handler.end)?,
                    handler_pc: layout.bytecode_index(handler.handler)?,
                    catch_type,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        // Sub-attributes
        let mut attributes = vec![];

        let line_numbers: Vec<LineNumber> = indexed
            .iter()
            .zip(&layout.offsets)
            .filter_map(|(insn, offset)| match insn {
                Instruction::LineNumber(line) => Some(LineNumber {
                    start_pc: BytecodeIndex(*offset as u16),
                    line_number: *line,
                }),
                _ => None,
            })
            .collect();
        if !line_numbers.is_empty() {
            attributes.push(constants.get_attribute(LineNumberTable(line_numbers))?);
        }

        if !self.local_variables.is_empty() {
            let table = encode_locals(&self.local_variables, &layout, constants)?;
            attributes.push(constants.get_attribute(LocalVariableTable(table))?);
        }
        if !self.local_variable_types.is_empty() {
            let table = encode_locals(&self.local_variable_types, &layout, constants)?;
            attributes.push(constants.get_attribute(LocalVariableTypeTable(table))?);
        }

        let frames = encode_frames(&indexed, &layout)?;
        if !frames.is_empty() {
            attributes.push(constants.get_attribute(StackMapTable(frames))?);
        }

        for other in &self.other_attributes {
            warn!(
                "Dropping code attribute {:?}",
                other.name(constants).unwrap_or("<unnamed>")
            );
        }

        Ok(CodeAttribute {
            max_stack,
            max_locals: self.max_locals,
            code_array: BytecodeArray(code_array),
            exception_table,
            attributes,
        })
    }
}

/// Intern all of the operands of an instruction
fn index_instruction(
    insn: &Instruction,
    constants: &mut ConstantsPool,
) -> Result<IndexedInstruction, Error> {
    // Only one of these closures runs at a time
    let constants = RefCell::new(constants);
    insn.map(
        |class: &String| class.constant_index(&mut constants.borrow_mut()),
        |constant: &ConstantData| constant.constant_index(&mut constants.borrow_mut()),
        |field: &FieldRef| field.constant_index(&mut constants.borrow_mut()),
        |method: &MethodRef| {
            let descriptor = MethodDescriptor::<String>::parse(&method.descriptor)
                .map_err(|_| Error::BadDescriptor(method.descriptor.clone()))?;
            let count = u8::try_from(descriptor.parameter_length(true))
                .map_err(|_| Error::BadDescriptor(method.descriptor.clone()))?;
            Ok((method.constant_index(&mut constants.borrow_mut())?, count))
        },
        |call_site: &CallSite| call_site.constant_index(&mut constants.borrow_mut()),
        |lbl: &Label| Ok(*lbl),
    )
}

/// Offsets of every instruction and every placed label
struct Layout {
    offsets: Vec<usize>,
    labels: HashMap<Label, usize>,
}

impl Layout {
    fn compute(instructions: &mut [IndexedInstruction]) -> Result<Layout, Error> {
        loop {
            let layout = Layout::place(instructions);

            let mut widened = false;
            for (insn, offset) in instructions.iter_mut().zip(&layout.offsets) {
                let target = match insn {
                    Instruction::Branch(BranchInstruction::Goto(lbl))
                    | Instruction::Branch(BranchInstruction::Jsr(lbl)) => *lbl,
                    _ => continue,
                };
                if i16::try_from(layout.relative(target, *offset)?).is_ok() {
                    continue;
                }
                let wide = match insn {
                    Instruction::Branch(BranchInstruction::Goto(_)) => {
                        BranchInstruction::GotoW(target)
                    }
                    _ => BranchInstruction::JsrW(target),
                };
                *insn = Instruction::Branch(wide);
                widened = true;
            }

            if !widened {
                return Ok(layout);
            }
        }
    }

    /// Assign offsets given the current instruction widths, updating switch padding on the way
    fn place(instructions: &mut [IndexedInstruction]) -> Layout {
        let mut offsets = Vec::with_capacity(instructions.len());
        let mut labels = HashMap::new();
        let mut offset = 0;
        for insn in instructions.iter_mut() {
            match insn {
                Instruction::Branch(
                    BranchInstruction::TableSwitch { padding, .. }
                    | BranchInstruction::LookupSwitch { padding, .. },
                ) => *padding = ((4 - (offset + 1) % 4) % 4) as u8,
                Instruction::Label(lbl) => {
                    labels.insert(*lbl, offset);
                }
                _ => (),
            }
            offsets.push(offset);
            offset += insn.width();
        }
        Layout { offsets, labels }
    }

    fn offset(&self, lbl: Label) -> Result<usize, Error> {
        self.labels
            .get(&lbl)
            .copied()
            .ok_or(Error::UnresolvedLabel(lbl))
    }

    fn relative(&self, lbl: Label, from: usize) -> Result<i64, Error> {
        Ok(self.offset(lbl)? as i64 - from as i64)
    }

    fn bytecode_index(&self, lbl: Label) -> Result<BytecodeIndex, Error> {
        let offset = self.offset(lbl)?;
        u16::try_from(offset)
            .map(BytecodeIndex)
            .map_err(|_| Error::MethodCodeOverflow(Offset(offset)))
    }
}

/// Replace labels with jumps relative to the instruction
fn relativize(
    insn: &IndexedInstruction,
    offset: usize,
    layout: &Layout,
) -> Result<SerializableInstruction, Error> {
    let short_form = matches!(
        insn,
        Instruction::Branch(
            BranchInstruction::If(_, _)
                | BranchInstruction::IfICmp(_, _)
                | BranchInstruction::IfACmp(_, _)
                | BranchInstruction::IfNull(_, _)
                | BranchInstruction::Goto(_)
                | BranchInstruction::Jsr(_)
        )
    );
    insn.map(
        |class| Ok(*class),
        |constant| Ok(*constant),
        |field| Ok(*field),
        |method| Ok(*method),
        |indy| Ok(*indy),
        |lbl: &Label| {
            let relative = layout.relative(*lbl, offset)?;
            let fits = if short_form {
                i16::try_from(relative).is_ok()
            } else {
                i32::try_from(relative).is_ok()
            };
            if !fits {
                return Err(Error::BranchOffsetOverflow {
                    label: *lbl,
                    offset: Offset(offset),
                });
            }
            Ok(relative as i32)
        },
    )
}

fn encode_locals(
    variables: &[LocalVariable],
    layout: &Layout,
    constants: &mut ConstantsPool,
) -> Result<Vec<class_file::LocalVariable>, Error> {
    variables
        .iter()
        .map(|variable| {
            let start_pc = layout.bytecode_index(variable.start)?;
            let end_pc = layout.bytecode_index(variable.end)?;
            Ok(class_file::LocalVariable {
                start_pc,
                length: end_pc.0.saturating_sub(start_pc.0),
                name_index: constants.get_utf8(variable.name.as_str())?,
                descriptor_index: constants.get_utf8(variable.descriptor.as_str())?,
                index: variable.index,
            })
        })
        .collect()
}

/// Frame deltas are relative to the previous frame (plus one, except for the first frame)
fn encode_frames(
    instructions: &[IndexedInstruction],
    layout: &Layout,
) -> Result<Vec<StackMapFrame>, Error> {
    let mut frames = vec![];
    let mut previous: Option<usize> = None;
    for (insn, offset) in instructions.iter().zip(&layout.offsets) {
        let frame = match insn {
            Instruction::Frame(frame) => frame,
            _ => continue,
        };
        let delta = match previous {
            None => *offset,
            Some(prev) if *offset > prev => offset - prev - 1,
            Some(_) => return Err(Error::ConflictingFrames(Offset(*offset))),
        };
        let delta =
            u16::try_from(delta).map_err(|_| Error::MethodCodeOverflow(Offset(*offset)))?;
        frames.push(frame.map(delta, |lbl| Ok::<u16, Error>(layout.bytecode_index(*lbl)?.0))?);
        previous = Some(*offset);
    }
    Ok(frames)
}
