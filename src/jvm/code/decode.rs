//! Decoding of `Code` attributes into [`Code`]
//!
//! Decoding happens in two passes over the bytecode. The first pass reads instructions with jump
//! targets as absolute offsets. Then every offset something refers to (jumps, exception ranges,
//! local variable ranges, stack map frames, `new` instructions of uninitialized types) gets a
//! label, and the second pass builds the symbolic instruction list with those labels in place.

use crate::jvm::class_file::{
    self, ClassConstantIndex, Code as CodeAttribute, ConstantIndex, ConstantsPool, Deserialize,
    FieldRefConstantIndex, InvokeDynamicConstantIndex, LineNumberTable, LocalVariableTable,
    LocalVariableTypeTable, MethodRefConstantIndex, StackMapTable,
};
use crate::jvm::code::{
    array_type_from_code, BranchInstruction, CallSite, Code, CompareMode, ConstantData,
    ConstantsReader, EqComparison, ExceptionHandler, FieldAccessKind, FieldRef, Frame,
    IndexedInstruction, Instruction, InvokeType, Label, LocalVariable, MethodRef, OrdComparison,
    ShiftType,
};
use crate::jvm::Error;
use crate::util::Offset;
use log::warn;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

/// Instruction with jump targets as absolute offsets into the code array
type RawInstruction = IndexedInstruction<usize>;

impl Code {
    /// Decode a `Code` attribute
    ///
    /// The constants pool is used to resolve all operands into their symbolic form.
    pub fn decode(attribute: &CodeAttribute, constants: &ConstantsPool) -> Result<Code, Error> {
        let bytes = &attribute.code_array.0;
        let raw = read_instructions(bytes)?;
        let boundaries: BTreeSet<usize> = raw.iter().map(|(offset, _)| *offset).collect();
        let code_end = bytes.len();

        let labels = Labels {
            boundaries: &boundaries,
            code_end,
            labels: RefCell::new(BTreeMap::new()),
        };

        // Jump targets
        for (_, insn) in &raw {
            if let Instruction::Branch(branch) = insn {
                for target in branch.jump_targets() {
                    labels.label_at(*target)?;
                }
            }
        }

        let exception_handlers = attribute
            .exception_table
            .iter()
            .map(|handler| {
                Ok(ExceptionHandler {
                    start: labels.label_at(handler.start_pc.0 as usize)?,
                    end: labels.label_at(handler.end_pc.0 as usize)?,
                    handler: labels.label_at(handler.handler_pc.0 as usize)?,
                    catch_type: if handler.catch_type.0 .0 == 0 {
                        None
                    } else {
                        Some(String::read_constant(handler.catch_type, constants)?)
                    },
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        // Sub-attributes
        let mut line_numbers: BTreeMap<usize, Vec<u16>> = BTreeMap::new();
        let mut frames: BTreeMap<usize, Frame> = BTreeMap::new();
        let mut local_variables = vec![];
        let mut local_variable_types = vec![];
        let mut other_attributes = vec![];
        for sub_attribute in &attribute.attributes {
            match sub_attribute.name(constants)? {
                "LineNumberTable" => {
                    let table: LineNumberTable = sub_attribute.parse()?;
                    for entry in table.0 {
                        let offset = entry.start_pc.0 as usize;
                        if boundaries.contains(&offset) {
                            line_numbers.entry(offset).or_default().push(entry.line_number);
                        } else {
                            warn!("Dropping line number entry at offset {}", offset);
                        }
                    }
                }
                "LocalVariableTable" => {
                    let table: LocalVariableTable = sub_attribute.parse()?;
                    for variable in table.0 {
                        local_variables.push(decode_local(&variable, &labels, constants)?);
                    }
                }
                "LocalVariableTypeTable" => {
                    let table: LocalVariableTypeTable = sub_attribute.parse()?;
                    for variable in table.0 {
                        local_variable_types.push(decode_local(&variable, &labels, constants)?);
                    }
                }
                "StackMapTable" => {
                    let table: StackMapTable = sub_attribute.parse()?;
                    let mut previous: Option<usize> = None;
                    for frame in table.0 {
                        let delta = *frame.offset_delta() as usize;
                        let offset = match previous {
                            None => delta,
                            Some(prev) => prev + delta + 1,
                        };
                        previous = Some(offset);

                        if !boundaries.contains(&offset) {
                            return Err(Error::InvalidBranchTarget(Offset(offset)));
                        }
                        let frame =
                            frame.map((), |new_offset| labels.label_at(*new_offset as usize))?;
                        if frames.insert(offset, frame).is_some() {
                            return Err(Error::ConflictingFrames(Offset(offset)));
                        }
                    }
                }
                _ => other_attributes.push(sub_attribute.clone()),
            }
        }

        // Build up the symbolic instruction list
        let label_offsets = labels.labels.into_inner();
        let mut instructions = Vec::with_capacity(raw.len() + label_offsets.len());
        for (offset, insn) in &raw {
            if let Some(label) = label_offsets.get(offset) {
                instructions.push(Instruction::Label(*label));
            }
            if let Some(lines) = line_numbers.get(offset) {
                instructions.extend(lines.iter().map(|line| Instruction::LineNumber(*line)));
            }
            if let Some(frame) = frames.remove(offset) {
                instructions.push(Instruction::Frame(frame));
            }
            instructions.push(resolve_instruction(insn, &label_offsets, constants)?);
        }
        if let Some(label) = label_offsets.get(&code_end) {
            instructions.push(Instruction::Label(*label));
        }

        Ok(Code {
            max_stack: attribute.max_stack,
            max_locals: attribute.max_locals,
            instructions,
            exception_handlers,
            local_variables,
            local_variable_types,
            other_attributes,
        })
    }
}

/// Labels given to offsets, numbered in order of first reference
struct Labels<'a> {
    boundaries: &'a BTreeSet<usize>,
    code_end: usize,
    labels: RefCell<BTreeMap<usize, Label>>,
}

impl<'a> Labels<'a> {
    /// Get or create the label at an offset, which must be an instruction boundary (or the end)
    fn label_at(&self, offset: usize) -> Result<Label, Error> {
        if offset != self.code_end && !self.boundaries.contains(&offset) {
            return Err(Error::InvalidBranchTarget(Offset(offset)));
        }
        let mut labels = self.labels.borrow_mut();
        let next = Label(labels.len());
        Ok(*labels.entry(offset).or_insert(next))
    }
}

fn decode_local(
    variable: &class_file::LocalVariable,
    labels: &Labels,
    constants: &ConstantsPool,
) -> Result<LocalVariable, Error> {
    let start = variable.start_pc.0 as usize;
    Ok(LocalVariable {
        start: labels.label_at(start)?,
        end: labels.label_at(start + variable.length as usize)?,
        name: String::from(constants.lookup_utf8(variable.name_index)?),
        descriptor: String::from(constants.lookup_utf8(variable.descriptor_index)?),
        index: variable.index,
    })
}

fn resolve_instruction(
    insn: &RawInstruction,
    labels: &BTreeMap<usize, Label>,
    constants: &ConstantsPool,
) -> Result<Instruction, Error> {
    insn.map(
        |class: &ClassConstantIndex| String::read_constant(*class, constants),
        |constant: &ConstantIndex| ConstantData::read_constant(*constant, constants),
        |field: &FieldRefConstantIndex| FieldRef::read_constant(*field, constants),
        |(method, _): &(MethodRefConstantIndex, u8)| MethodRef::read_constant(*method, constants),
        |indy: &InvokeDynamicConstantIndex| CallSite::read_constant(*indy, constants),
        |target: &usize| {
            labels
                .get(target)
                .copied()
                .ok_or(Error::InvalidBranchTarget(Offset(*target)))
        },
    )
}

/// Read all of the instructions in a code array, along with their offsets
fn read_instructions(bytes: &[u8]) -> Result<Vec<(usize, RawInstruction)>, Error> {
    let mut reader: &[u8] = bytes;
    let mut instructions = vec![];
    while !reader.is_empty() {
        let offset = bytes.len() - reader.len();
        let insn = read_instruction(&mut reader, offset)?;
        instructions.push((offset, insn));
    }
    Ok(instructions)
}

/// Turn a relative jump into an absolute offset
fn jump_target(offset: usize, relative: i32) -> Result<usize, Error> {
    let target = offset as i64 + relative as i64;
    usize::try_from(target).map_err(|_| Error::InvalidBranchTarget(Offset(offset)))
}

fn read_instruction(reader: &mut &[u8], offset: usize) -> Result<RawInstruction, Error> {
    use Instruction::*;

    let opcode = u8::deserialize(reader)?;
    let short_jump = |reader: &mut &[u8]| -> Result<usize, Error> {
        jump_target(offset, i16::deserialize(reader)? as i32)
    };
    let class = |reader: &mut &[u8]| -> Result<ClassConstantIndex, Error> {
        Ok(ClassConstantIndex::deserialize(reader)?)
    };
    let field = |reader: &mut &[u8], kind: FieldAccessKind| -> Result<RawInstruction, Error> {
        Ok(Field(kind, FieldRefConstantIndex::deserialize(reader)?))
    };
    let method = |reader: &mut &[u8], typ: InvokeType| -> Result<RawInstruction, Error> {
        Ok(Invoke(typ, (MethodRefConstantIndex::deserialize(reader)?, 0)))
    };

    Ok(match opcode {
        0x00 => Nop,
        0x01 => AConstNull,
        0x02 => IConstM1,
        0x03 => IConst0,
        0x04 => IConst1,
        0x05 => IConst2,
        0x06 => IConst3,
        0x07 => IConst4,
        0x08 => IConst5,
        0x09 => LConst0,
        0x0a => LConst1,
        0x0b => FConst0,
        0x0c => FConst1,
        0x0d => FConst2,
        0x0e => DConst0,
        0x0f => DConst1,
        0x10 => BiPush(i8::deserialize(reader)?),
        0x11 => SiPush(i16::deserialize(reader)?),
        0x12 => Ldc(ConstantIndex(u8::deserialize(reader)? as u16)),
        0x13 => Ldc(ConstantIndex::deserialize(reader)?),
        0x14 => Ldc2(ConstantIndex::deserialize(reader)?),
        0x15 => ILoad(u8::deserialize(reader)? as u16),
        0x16 => LLoad(u8::deserialize(reader)? as u16),
        0x17 => FLoad(u8::deserialize(reader)? as u16),
        0x18 => DLoad(u8::deserialize(reader)? as u16),
        0x19 => ALoad(u8::deserialize(reader)? as u16),
        0x1a..=0x1d => ILoad((opcode - 0x1a) as u16),
        0x1e..=0x21 => LLoad((opcode - 0x1e) as u16),
        0x22..=0x25 => FLoad((opcode - 0x22) as u16),
        0x26..=0x29 => DLoad((opcode - 0x26) as u16),
        0x2a..=0x2d => ALoad((opcode - 0x2a) as u16),
        0x2e => IALoad,
        0x2f => LALoad,
        0x30 => FALoad,
        0x31 => DALoad,
        0x32 => AALoad,
        0x33 => BALoad,
        0x34 => CALoad,
        0x35 => SALoad,
        0x36 => IStore(u8::deserialize(reader)? as u16),
        0x37 => LStore(u8::deserialize(reader)? as u16),
        0x38 => FStore(u8::deserialize(reader)? as u16),
        0x39 => DStore(u8::deserialize(reader)? as u16),
        0x3a => AStore(u8::deserialize(reader)? as u16),
        0x3b..=0x3e => IStore((opcode - 0x3b) as u16),
        0x3f..=0x42 => LStore((opcode - 0x3f) as u16),
        0x43..=0x46 => FStore((opcode - 0x43) as u16),
        0x47..=0x4a => DStore((opcode - 0x47) as u16),
        0x4b..=0x4e => AStore((opcode - 0x4b) as u16),
        0x4f => IAStore,
        0x50 => LAStore,
        0x51 => FAStore,
        0x52 => DAStore,
        0x53 => AAStore,
        0x54 => BAStore,
        0x55 => CAStore,
        0x56 => SAStore,
        0x57 => Pop,
        0x58 => Pop2,
        0x59 => Dup,
        0x5a => DupX1,
        0x5b => DupX2,
        0x5c => Dup2,
        0x5d => Dup2X1,
        0x5e => Dup2X2,
        0x5f => Swap,
        0x60 => IAdd,
        0x61 => LAdd,
        0x62 => FAdd,
        0x63 => DAdd,
        0x64 => ISub,
        0x65 => LSub,
        0x66 => FSub,
        0x67 => DSub,
        0x68 => IMul,
        0x69 => LMul,
        0x6a => FMul,
        0x6b => DMul,
        0x6c => IDiv,
        0x6d => LDiv,
        0x6e => FDiv,
        0x6f => DDiv,
        0x70 => IRem,
        0x71 => LRem,
        0x72 => FRem,
        0x73 => DRem,
        0x74 => INeg,
        0x75 => LNeg,
        0x76 => FNeg,
        0x77 => DNeg,
        0x78 => ISh(ShiftType::Left),
        0x79 => LSh(ShiftType::Left),
        0x7a => ISh(ShiftType::ArithmeticRight),
        0x7b => LSh(ShiftType::ArithmeticRight),
        0x7c => ISh(ShiftType::LogicalRight),
        0x7d => LSh(ShiftType::LogicalRight),
        0x7e => IAnd,
        0x7f => LAnd,
        0x80 => IOr,
        0x81 => LOr,
        0x82 => IXor,
        0x83 => LXor,
        0x84 => {
            let idx = u8::deserialize(reader)? as u16;
            IInc(idx, i8::deserialize(reader)? as i16)
        }
        0x85 => I2L,
        0x86 => I2F,
        0x87 => I2D,
        0x88 => L2I,
        0x89 => L2F,
        0x8a => L2D,
        0x8b => F2I,
        0x8c => F2L,
        0x8d => F2D,
        0x8e => D2I,
        0x8f => D2L,
        0x90 => D2F,
        0x91 => I2B,
        0x92 => I2C,
        0x93 => I2S,
        0x94 => LCmp,
        0x95 => FCmp(CompareMode::L),
        0x96 => FCmp(CompareMode::G),
        0x97 => DCmp(CompareMode::L),
        0x98 => DCmp(CompareMode::G),
        0x99 => Branch(BranchInstruction::If(OrdComparison::EQ, short_jump(reader)?)),
        0x9a => Branch(BranchInstruction::If(OrdComparison::NE, short_jump(reader)?)),
        0x9b => Branch(BranchInstruction::If(OrdComparison::LT, short_jump(reader)?)),
        0x9c => Branch(BranchInstruction::If(OrdComparison::GE, short_jump(reader)?)),
        0x9d => Branch(BranchInstruction::If(OrdComparison::GT, short_jump(reader)?)),
        0x9e => Branch(BranchInstruction::If(OrdComparison::LE, short_jump(reader)?)),
        0x9f => Branch(BranchInstruction::IfICmp(OrdComparison::EQ, short_jump(reader)?)),
        0xa0 => Branch(BranchInstruction::IfICmp(OrdComparison::NE, short_jump(reader)?)),
        0xa1 => Branch(BranchInstruction::IfICmp(OrdComparison::LT, short_jump(reader)?)),
        0xa2 => Branch(BranchInstruction::IfICmp(OrdComparison::GE, short_jump(reader)?)),
        0xa3 => Branch(BranchInstruction::IfICmp(OrdComparison::GT, short_jump(reader)?)),
        0xa4 => Branch(BranchInstruction::IfICmp(OrdComparison::LE, short_jump(reader)?)),
        0xa5 => Branch(BranchInstruction::IfACmp(EqComparison::EQ, short_jump(reader)?)),
        0xa6 => Branch(BranchInstruction::IfACmp(EqComparison::NE, short_jump(reader)?)),
        0xa7 => Branch(BranchInstruction::Goto(short_jump(reader)?)),
        0xa8 => Branch(BranchInstruction::Jsr(short_jump(reader)?)),
        0xa9 => Branch(BranchInstruction::Ret(u8::deserialize(reader)? as u16)),
        0xaa => {
            let padding = skip_padding(reader, offset)?;
            let default = jump_target(offset, i32::deserialize(reader)?)?;
            let low = i32::deserialize(reader)?;
            let high = i32::deserialize(reader)?;
            if high < low {
                let msg = format!("tableswitch at {} has high {} below low {}", offset, high, low);
                return Err(Error::MalformedClass(msg));
            }
            let count = (high as i64 - low as i64 + 1) as usize;
            if count > reader.len() / 4 {
                let msg = format!("tableswitch at {} runs past the end of the code", offset);
                return Err(Error::MalformedClass(msg));
            }
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(jump_target(offset, i32::deserialize(reader)?)?);
            }
            Branch(BranchInstruction::TableSwitch {
                padding,
                default,
                low,
                targets,
            })
        }
        0xab => {
            let padding = skip_padding(reader, offset)?;
            let default = jump_target(offset, i32::deserialize(reader)?)?;
            let npairs = i32::deserialize(reader)?;
            if npairs < 0 || npairs as usize > reader.len() / 8 {
                let msg = format!("lookupswitch at {} has {} pairs", offset, npairs);
                return Err(Error::MalformedClass(msg));
            }
            let mut targets = Vec::with_capacity(npairs as usize);
            for _ in 0..npairs {
                let key = i32::deserialize(reader)?;
                targets.push((key, jump_target(offset, i32::deserialize(reader)?)?));
            }
            Branch(BranchInstruction::LookupSwitch {
                padding,
                default,
                targets,
            })
        }
        0xac => Branch(BranchInstruction::IReturn),
        0xad => Branch(BranchInstruction::LReturn),
        0xae => Branch(BranchInstruction::FReturn),
        0xaf => Branch(BranchInstruction::DReturn),
        0xb0 => Branch(BranchInstruction::AReturn),
        0xb1 => Branch(BranchInstruction::Return),
        0xb2 => field(reader, FieldAccessKind::GetStatic)?,
        0xb3 => field(reader, FieldAccessKind::PutStatic)?,
        0xb4 => field(reader, FieldAccessKind::GetField)?,
        0xb5 => field(reader, FieldAccessKind::PutField)?,
        0xb6 => method(reader, InvokeType::Virtual)?,
        0xb7 => method(reader, InvokeType::Special)?,
        0xb8 => method(reader, InvokeType::Static)?,
        0xb9 => {
            let idx = MethodRefConstantIndex::deserialize(reader)?;
            let count = u8::deserialize(reader)?;
            let _zero = u8::deserialize(reader)?;
            Invoke(InvokeType::Interface, (idx, count))
        }
        0xba => {
            let idx = InvokeDynamicConstantIndex::deserialize(reader)?;
            let _zero = u16::deserialize(reader)?;
            InvokeDynamic(idx)
        }
        0xbb => New(class(reader)?),
        0xbc => {
            let code = u8::deserialize(reader)?;
            match array_type_from_code(code) {
                Some(base_type) => NewArray(base_type),
                None => {
                    let msg = format!("newarray at {} has bad type code {}", offset, code);
                    return Err(Error::MalformedClass(msg));
                }
            }
        }
        0xbd => ANewArray(class(reader)?),
        0xbe => ArrayLength,
        0xbf => Branch(BranchInstruction::AThrow),
        0xc0 => CheckCast(class(reader)?),
        0xc1 => InstanceOf(class(reader)?),
        0xc2 => MonitorEnter,
        0xc3 => MonitorExit,
        0xc4 => {
            let wide_opcode = u8::deserialize(reader)?;
            let idx = u16::deserialize(reader)?;
            match wide_opcode {
                0x15 => ILoad(idx),
                0x16 => LLoad(idx),
                0x17 => FLoad(idx),
                0x18 => DLoad(idx),
                0x19 => ALoad(idx),
                0x36 => IStore(idx),
                0x37 => LStore(idx),
                0x38 => FStore(idx),
                0x39 => DStore(idx),
                0x3a => AStore(idx),
                0x84 => IInc(idx, i16::deserialize(reader)?),
                0xa9 => Branch(BranchInstruction::Ret(idx)),
                other => {
                    return Err(Error::BadOpcode {
                        opcode: other,
                        offset: Offset(offset + 1),
                    })
                }
            }
        }
        0xc5 => {
            let idx = class(reader)?;
            MultiANewArray(idx, u8::deserialize(reader)?)
        }
        0xc6 => Branch(BranchInstruction::IfNull(EqComparison::EQ, short_jump(reader)?)),
        0xc7 => Branch(BranchInstruction::IfNull(EqComparison::NE, short_jump(reader)?)),
        0xc8 => Branch(BranchInstruction::GotoW(jump_target(
            offset,
            i32::deserialize(reader)?,
        )?)),
        0xc9 => Branch(BranchInstruction::JsrW(jump_target(
            offset,
            i32::deserialize(reader)?,
        )?)),
        _ => {
            return Err(Error::BadOpcode {
                opcode,
                offset: Offset(offset),
            })
        }
    })
}

/// Switch operands start at the next multiple of four bytes
fn skip_padding(reader: &mut &[u8], offset: usize) -> Result<u8, Error> {
    let padding = ((4 - (offset + 1) % 4) % 4) as u8;
    for _ in 0..padding {
        let _ = u8::deserialize(reader)?;
    }
    Ok(padding)
}
