//! Stack map frame computation
//!
//! Rewriting changes what sits on the operand stack between instructions: a placeholder object
//! becomes a pair of uninitialized references, marker calls disappear. Frames read from the class
//! file then describe stacks that no longer exist, and the verifier rejects the method as soon as
//! a branch lands in rewritten code. This recomputes the frame at every jump target and exception
//! handler by running the types of locals and stack forward from the method entry until they stop
//! changing.
//!
//! The frames already in the code are still useful. Rewriting never touches local variables, so
//! their locals (which `javac` cuts down to the variables in scope) are kept as they are. Their
//! stack entries also act as hints when paths merge with different object types, since the
//! compiler knew the whole class hierarchy while the [`ClassGraph`] may not.

use crate::jvm::class_file::{ClassConstantIndex, ConstantsPool, StackMapFrame, VerificationType};
use crate::jvm::class_graph::{array_of, ClassGraph, OBJECT};
use crate::jvm::code::{
    BranchInstruction, Code, ConstantData, ConstantsWriter, FieldAccessKind, Frame, Instruction,
    InvokeType, Label, MethodRef,
};
use crate::jvm::{BaseType, Error, FieldType, MethodDescriptor, ParseDescriptor, RefType};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Verification type with symbolic classes and allocation sites
type VType = VerificationType<String, Label>;

/// Method that the code belongs to
pub struct MethodContext<'a> {
    /// Internal name of the class declaring the method
    pub class_name: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
    pub is_static: bool,
}

impl Code {
    /// Replace the stack map frames with ones computed from the instructions
    ///
    /// A frame is placed before every jump target and every exception handler, as well as
    /// wherever the compiler already put one. Every `new` gets a label (if it doesn't have one
    /// already) so that uninitialized types can refer to it.
    pub fn compute_frames(
        &mut self,
        method: &MethodContext,
        classes: &ClassGraph,
        constants: &mut ConstantsPool,
    ) -> Result<(), Error> {
        self.label_allocations();

        let initial = State::initial(method)?;
        let declared = self.declared_frames(&initial, constants)?;

        let mut analysis = Analysis::new(&self.instructions, &declared, classes, method.class_name);
        for handler in &self.exception_handlers {
            analysis.handlers.push(Handler {
                start: analysis.position(handler.start)?,
                end: analysis.position(handler.end)?,
                target: analysis.target(handler.handler)?,
                catch_type: handler
                    .catch_type
                    .clone()
                    .unwrap_or_else(|| String::from("java/lang/Throwable")),
            });
        }
        analysis.run(initial.clone())?;

        let mut frames: HashMap<usize, Frame> = HashMap::new();
        let mut previous = initial.local_entries();
        for idx in &analysis.merge_points {
            // Unreachable code keeps whatever frame it had
            let state = match analysis.states.get(idx).or_else(|| declared.get(idx)) {
                Some(state) => state,
                None => continue,
            };
            let locals = state.local_entries();
            frames.insert(*idx, compress(&locals, &state.stack, &previous, constants)?);
            previous = locals;
        }
        log::trace!("Computed {} frame(s) for {}", frames.len(), method.name);

        let instructions = std::mem::take(&mut self.instructions);
        for (idx, insn) in instructions.into_iter().enumerate() {
            if let Instruction::Frame(_) = insn {
                continue;
            }
            if let Some(frame) = frames.remove(&idx) {
                self.instructions.push(Instruction::Frame(frame));
            }
            self.instructions.push(insn);
        }
        Ok(())
    }

    /// Insert a fresh label before every `new` which doesn't already have one
    fn label_allocations(&mut self) {
        let mut next = self.max_label().map_or(0, |Label(max)| max + 1);
        let mut idx = 0;
        while idx < self.instructions.len() {
            if let Instruction::New(_) = self.instructions[idx] {
                if allocation_label(&self.instructions, idx).is_none() {
                    self.instructions.insert(idx, Instruction::Label(Label(next)));
                    next += 1;
                    idx += 1;
                }
            }
            idx += 1;
        }
    }

    fn max_label(&self) -> Option<Label> {
        let placed = self.instructions.iter().filter_map(|insn| match insn {
            Instruction::Label(lbl) => Some(*lbl),
            _ => None,
        });
        let handlers = self
            .exception_handlers
            .iter()
            .flat_map(|handler| [handler.start, handler.end, handler.handler]);
        let variables = self
            .local_variables
            .iter()
            .chain(&self.local_variable_types)
            .flat_map(|variable| [variable.start, variable.end]);
        placed.chain(handlers).chain(variables).max()
    }

    /// Existing frames, fully expanded and keyed by the index of the instruction they describe
    fn declared_frames(
        &self,
        initial: &State,
        constants: &ConstantsPool,
    ) -> Result<BTreeMap<usize, State>, Error> {
        let mut declared = BTreeMap::new();
        let mut previous = initial.local_entries();
        for (idx, insn) in self.instructions.iter().enumerate() {
            let frame = match insn {
                Instruction::Frame(frame) => frame,
                _ => continue,
            };
            let (locals, stack) = expand_frame(frame, &previous, constants)?;
            if let Some(described) = next_real(&self.instructions, idx) {
                declared.insert(described, State::from_entries(&locals, stack));
            }
            previous = locals;
        }
        Ok(declared)
    }
}

/// Index of the first instruction at or after `from` which isn't a pseudo-instruction
fn next_real(instructions: &[Instruction], from: usize) -> Option<usize> {
    (from..instructions.len()).find(|idx| !instructions[*idx].is_pseudo())
}

/// Label placed before the instruction at this index, with only pseudo-instructions in between
fn allocation_label(instructions: &[Instruction], idx: usize) -> Option<Label> {
    instructions[..idx]
        .iter()
        .rev()
        .take_while(|insn| insn.is_pseudo())
        .find_map(|insn| match insn {
            Instruction::Label(lbl) => Some(*lbl),
            _ => None,
        })
}

/// Locals (as entries) and stack of a frame, given the locals of the frame before it
fn expand_frame(
    frame: &Frame,
    previous: &[VType],
    constants: &ConstantsPool,
) -> Result<(Vec<VType>, Vec<VType>), Error> {
    let read_all = |types: &[VerificationType<ClassConstantIndex, Label>]| {
        types
            .iter()
            .map(|typ| typ.map_class(|class| constants.lookup_class(*class).map(String::from)))
            .collect::<Result<Vec<VType>, Error>>()
    };
    Ok(match frame {
        StackMapFrame::SameLocalsNoStack { .. } => (previous.to_vec(), vec![]),
        StackMapFrame::SameLocalsOneStack {
            stack_verification,
            ..
        } => (
            previous.to_vec(),
            read_all(std::slice::from_ref(stack_verification))?,
        ),
        StackMapFrame::ChoppedFrameNoStack { chopped_k, .. } => {
            let kept = previous.len().saturating_sub(*chopped_k as usize);
            (previous[..kept].to_vec(), vec![])
        }
        StackMapFrame::AppendFrameNoStack {
            local_verifications,
            ..
        } => {
            let mut locals = previous.to_vec();
            locals.extend(read_all(local_verifications)?);
            (locals, vec![])
        }
        StackMapFrame::FullFrame {
            local_verifications,
            stack_verifications,
            ..
        } => (read_all(local_verifications)?, read_all(stack_verifications)?),
    })
}

/// Pick the most compact encoding of a frame given the locals of the previous frame
fn compress(
    locals: &[VType],
    stack: &[VType],
    previous: &[VType],
    constants: &mut ConstantsPool,
) -> Result<Frame, Error> {
    let offset_delta = ();
    match stack.len() {
        0 if locals == previous => return Ok(StackMapFrame::SameLocalsNoStack { offset_delta }),
        0 if locals.len() < previous.len()
            && previous.len() - locals.len() <= 3
            && previous.starts_with(locals) =>
        {
            return Ok(StackMapFrame::ChoppedFrameNoStack {
                offset_delta,
                chopped_k: (previous.len() - locals.len()) as u8,
            })
        }
        0 if locals.len() > previous.len()
            && locals.len() - previous.len() <= 3
            && locals.starts_with(previous) =>
        {
            return Ok(StackMapFrame::AppendFrameNoStack {
                offset_delta,
                local_verifications: intern(&locals[previous.len()..], constants)?,
            })
        }
        1 if locals == previous => {
            return Ok(StackMapFrame::SameLocalsOneStack {
                offset_delta,
                stack_verification: intern(stack, constants)?.remove(0),
            })
        }
        _ => (),
    }

    Ok(StackMapFrame::FullFrame {
        offset_delta,
        local_verifications: intern(locals, constants)?,
        stack_verifications: intern(stack, constants)?,
    })
}

fn intern(
    types: &[VType],
    constants: &mut ConstantsPool,
) -> Result<Vec<VerificationType<ClassConstantIndex, Label>>, Error> {
    types
        .iter()
        .map(|typ| typ.map_class(|class| class.constant_index(constants)))
        .collect()
}

fn is_wide(typ: &VType) -> bool {
    matches!(typ, VType::Long | VType::Double)
}

fn bad_descriptor(descriptor: &str) -> Error {
    Error::BadDescriptor(String::from(descriptor))
}

fn base_descriptor(base_type: BaseType) -> char {
    match base_type {
        BaseType::Byte => 'B',
        BaseType::Char => 'C',
        BaseType::Double => 'D',
        BaseType::Float => 'F',
        BaseType::Int => 'I',
        BaseType::Long => 'J',
        BaseType::Short => 'S',
        BaseType::Boolean => 'Z',
    }
}

fn vtype_of(typ: &FieldType) -> VType {
    match typ {
        FieldType::Base(BaseType::Long) => VType::Long,
        FieldType::Base(BaseType::Double) => VType::Double,
        FieldType::Base(BaseType::Float) => VType::Float,
        FieldType::Base(_) => VType::Integer,
        FieldType::Ref(RefType::Object(class)) => VType::Object(class.clone()),
        FieldType::Ref(RefType::ObjectArray(array)) => VType::Object(format!(
            "{}L{};",
            "[".repeat(array.additional_dimensions + 1),
            array.element_type
        )),
        FieldType::Ref(RefType::PrimitiveArray(array)) => VType::Object(format!(
            "{}{}",
            "[".repeat(array.additional_dimensions + 1),
            base_descriptor(array.element_type)
        )),
    }
}

fn field_vtype(descriptor: &str) -> Result<VType, Error> {
    FieldType::parse(descriptor)
        .map(|typ| vtype_of(&typ))
        .map_err(|_| bad_descriptor(descriptor))
}

fn method_descriptor(descriptor: &str) -> Result<MethodDescriptor, Error> {
    MethodDescriptor::parse(descriptor).map_err(|_| bad_descriptor(descriptor))
}

fn constant_vtype(constant: &ConstantData) -> Result<VType, Error> {
    let object = |class: &str| VType::Object(String::from(class));
    Ok(match constant {
        ConstantData::Integer(_) => VType::Integer,
        ConstantData::Float(_) => VType::Float,
        ConstantData::Long(_) => VType::Long,
        ConstantData::Double(_) => VType::Double,
        ConstantData::String(_) => object("java/lang/String"),
        ConstantData::Class(_) => object("java/lang/Class"),
        ConstantData::MethodType(_) => object("java/lang/invoke/MethodType"),
        ConstantData::MethodHandle(_) => object("java/lang/invoke/MethodHandle"),
        ConstantData::Dynamic(call_site) => field_vtype(&call_site.descriptor)?,
    })
}

/// Type of an element loaded from an array of references
fn element_vtype(array: &VType) -> VType {
    match array {
        VType::Null => VType::Null,
        VType::Object(descriptor) => match descriptor.strip_prefix('[') {
            Some(element) if element.starts_with('[') => VType::Object(String::from(element)),
            Some(element) => match element.strip_prefix('L').and_then(|e| e.strip_suffix(';')) {
                Some(class) => VType::Object(String::from(class)),
                None => VType::Object(String::from(OBJECT)),
            },
            None => VType::Object(String::from(OBJECT)),
        },
        _ => VType::Object(String::from(OBJECT)),
    }
}

/// Merge two types reaching the same point, or `None` if they can't be merged
fn merge_types(
    type1: &VType,
    type2: &VType,
    hint: Option<&VType>,
    classes: &ClassGraph,
) -> Option<VType> {
    match (type1, type2) {
        _ if type1 == type2 => Some(type1.clone()),
        (VType::Null, VType::Object(_)) => Some(type2.clone()),
        (VType::Object(_), VType::Null) => Some(type1.clone()),
        (VType::Object(class1), VType::Object(class2)) => {
            let merged = match hint {
                Some(VType::Object(hinted)) if hint_fits(classes, hinted, [class1, class2]) => {
                    hinted.clone()
                }
                _ => classes.common_superclass(class1, class2),
            };
            Some(VType::Object(merged))
        }
        _ => None,
    }
}

/// Could both classes be assigned to the hinted one? Classes missing from the graph can't be
/// checked, so the hint is trusted for those.
fn hint_fits(classes: &ClassGraph, hinted: &str, merging: [&String; 2]) -> bool {
    classes.is_interface(hinted)
        || merging.iter().all(|class| {
            class.as_str() == hinted
                || !classes.contains(class)
                || classes.is_subclass(class, hinted)
        })
}

/// Types at one point in the code
///
/// Locals are stored one per slot (so `long` and `double` are followed by `Top`), while the
/// stack holds one entry per value.
#[derive(Clone, Debug, PartialEq, Eq)]
struct State {
    locals: Vec<VType>,
    stack: Vec<VType>,
}

impl State {
    /// State on entry to the method: just the parameters
    fn initial(method: &MethodContext) -> Result<State, Error> {
        let descriptor = method_descriptor(method.descriptor)?;
        let mut state = State {
            locals: vec![],
            stack: vec![],
        };
        if !method.is_static {
            let this = if method.name == "<init>" && method.class_name != OBJECT {
                VType::UninitializedThis
            } else {
                VType::Object(String::from(method.class_name))
            };
            state.push_local(this);
        }
        for parameter in &descriptor.parameters {
            state.push_local(vtype_of(parameter));
        }
        Ok(state)
    }

    fn from_entries(locals: &[VType], stack: Vec<VType>) -> State {
        let mut state = State {
            locals: vec![],
            stack,
        };
        for local in locals {
            state.push_local(local.clone());
        }
        state
    }

    fn push_local(&mut self, typ: VType) {
        let wide = is_wide(&typ);
        self.locals.push(typ);
        if wide {
            self.locals.push(VType::Top);
        }
    }

    /// Locals as frame entries (wide values take one entry), without trailing `Top`s
    fn local_entries(&self) -> Vec<VType> {
        let mut entries = vec![];
        let mut slot = 0;
        while let Some(typ) = self.locals.get(slot) {
            entries.push(typ.clone());
            slot += if is_wide(typ) { 2 } else { 1 };
        }
        while entries.last() == Some(&VType::Top) {
            entries.pop();
        }
        entries
    }

    fn load(&self, slot: u16) -> VType {
        self.locals
            .get(slot as usize)
            .cloned()
            .unwrap_or(VType::Top)
    }

    fn store(&mut self, slot: u16, typ: VType) {
        let slot = slot as usize;
        let width = if is_wide(&typ) { 2 } else { 1 };
        if self.locals.len() < slot + width {
            self.locals.resize(slot + width, VType::Top);
        }

        // Overwriting the second half of a wide value invalidates the whole value
        if slot > 0 && is_wide(&self.locals[slot - 1]) {
            self.locals[slot - 1] = VType::Top;
        }
        self.locals[slot] = typ;
        if width == 2 {
            self.locals[slot + 1] = VType::Top;
        }
    }

    fn push(&mut self, typ: VType) {
        self.stack.push(typ);
    }

    fn push_all(&mut self, types: &[&VType]) {
        self.stack.extend(types.iter().map(|typ| (*typ).clone()));
    }

    fn pop(&mut self, idx: usize) -> Result<VType, Error> {
        self.stack.pop().ok_or(Error::InvalidStack(idx))
    }

    fn pop_n(&mut self, count: usize, idx: usize) -> Result<(), Error> {
        if self.stack.len() < count {
            return Err(Error::InvalidStack(idx));
        }
        self.stack.truncate(self.stack.len() - count);
        Ok(())
    }

    /// Every copy of a type (in locals and on the stack) becomes another type
    fn replace(&mut self, from: &VType, to: &VType) {
        for typ in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if typ == from {
                *typ = to.clone();
            }
        }
    }

    /// Merge the state of another path into this one
    ///
    /// Locals of a declared frame are kept as is. Otherwise, locals which disagree become `Top`.
    fn merge(
        &self,
        other: &State,
        declared: Option<&State>,
        classes: &ClassGraph,
        idx: usize,
    ) -> Result<State, Error> {
        if self.stack.len() != other.stack.len() {
            return Err(Error::IncompatibleStacks(idx));
        }

        // Declared stacks may be shaped differently, so hints are lined up from the top
        let depth = self.stack.len();
        let hint = |position: usize| {
            declared.and_then(|declared| {
                let from_top = depth - position;
                declared
                    .stack
                    .len()
                    .checked_sub(from_top)
                    .map(|declared_position| &declared.stack[declared_position])
            })
        };
        let stack = self
            .stack
            .iter()
            .zip(&other.stack)
            .enumerate()
            .map(|(position, (type1, type2))| {
                merge_types(type1, type2, hint(position), classes)
                    .ok_or(Error::IncompatibleStacks(idx))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let locals = match declared {
            Some(declared) => declared.locals.clone(),
            None => {
                let len = self.locals.len().max(other.locals.len());
                (0..len)
                    .map(|slot| {
                        let type1 = self.locals.get(slot).unwrap_or(&VType::Top);
                        let type2 = other.locals.get(slot).unwrap_or(&VType::Top);
                        merge_types(type1, type2, None, classes).unwrap_or(VType::Top)
                    })
                    .collect()
            }
        };

        Ok(State { locals, stack })
    }

    /// Update the state to reflect the effects of an instruction
    fn execute(
        &mut self,
        idx: usize,
        insn: &Instruction,
        allocations: &Allocations,
        this_class: &str,
    ) -> Result<(), Error> {
        use Instruction::*;

        match insn {
            Nop | IInc(_, _) | Label(_) | LineNumber(_) | Frame(_) => (),

            AConstNull => self.push(VType::Null),
            IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5 | BiPush(_)
            | SiPush(_) | ILoad(_) => self.push(VType::Integer),
            LConst0 | LConst1 | LLoad(_) => self.push(VType::Long),
            FConst0 | FConst1 | FConst2 | FLoad(_) => self.push(VType::Float),
            DConst0 | DConst1 | DLoad(_) => self.push(VType::Double),
            Ldc(constant) | Ldc2(constant) => self.push(constant_vtype(constant)?),
            ALoad(slot) => {
                let typ = self.load(*slot);
                self.push(typ);
            }

            IALoad | BALoad | CALoad | SALoad => {
                self.pop_n(2, idx)?;
                self.push(VType::Integer);
            }
            LALoad => {
                self.pop_n(2, idx)?;
                self.push(VType::Long);
            }
            FALoad => {
                self.pop_n(2, idx)?;
                self.push(VType::Float);
            }
            DALoad => {
                self.pop_n(2, idx)?;
                self.push(VType::Double);
            }
            AALoad => {
                self.pop(idx)?;
                let array = self.pop(idx)?;
                self.push(element_vtype(&array));
            }

            IStore(slot) => {
                self.pop(idx)?;
                self.store(*slot, VType::Integer);
            }
            LStore(slot) => {
                self.pop(idx)?;
                self.store(*slot, VType::Long);
            }
            FStore(slot) => {
                self.pop(idx)?;
                self.store(*slot, VType::Float);
            }
            DStore(slot) => {
                self.pop(idx)?;
                self.store(*slot, VType::Double);
            }
            AStore(slot) => {
                let typ = self.pop(idx)?;
                self.store(*slot, typ);
            }

            IAStore | LAStore | FAStore | DAStore | AAStore | BAStore | CAStore | SAStore => {
                self.pop_n(3, idx)?
            }

            Pop => {
                self.pop(idx)?;
            }
            Pop2 => {
                if !is_wide(&self.pop(idx)?) {
                    self.pop(idx)?;
                }
            }
            Dup => {
                let arg1 = self.pop(idx)?;
                self.push_all(&[&arg1, &arg1]);
            }
            DupX1 => {
                let arg1 = self.pop(idx)?;
                let arg2 = self.pop(idx)?;
                self.push_all(&[&arg1, &arg2, &arg1]);
            }
            DupX2 => {
                let arg1 = self.pop(idx)?;
                let arg2 = self.pop(idx)?;
                if is_wide(&arg2) {
                    self.push_all(&[&arg1, &arg2, &arg1]);
                } else {
                    let arg3 = self.pop(idx)?;
                    self.push_all(&[&arg1, &arg3, &arg2, &arg1]);
                }
            }
            Dup2 => {
                let arg1 = self.pop(idx)?;
                if is_wide(&arg1) {
                    self.push_all(&[&arg1, &arg1]);
                } else {
                    let arg2 = self.pop(idx)?;
                    self.push_all(&[&arg2, &arg1, &arg2, &arg1]);
                }
            }
            Dup2X1 => {
                let arg1 = self.pop(idx)?;
                let arg2 = self.pop(idx)?;
                if is_wide(&arg1) {
                    self.push_all(&[&arg1, &arg2, &arg1]);
                } else {
                    let arg3 = self.pop(idx)?;
                    self.push_all(&[&arg2, &arg1, &arg3, &arg2, &arg1]);
                }
            }
            Dup2X2 => {
                let arg1 = self.pop(idx)?;
                let arg2 = self.pop(idx)?;
                match (is_wide(&arg1), is_wide(&arg2)) {
                    (true, true) => self.push_all(&[&arg1, &arg2, &arg1]),
                    (true, false) => {
                        let arg3 = self.pop(idx)?;
                        self.push_all(&[&arg1, &arg3, &arg2, &arg1]);
                    }
                    (false, _) => {
                        let arg3 = self.pop(idx)?;
                        if is_wide(&arg3) {
                            self.push_all(&[&arg2, &arg1, &arg3, &arg2, &arg1]);
                        } else {
                            let arg4 = self.pop(idx)?;
                            self.push_all(&[&arg2, &arg1, &arg4, &arg3, &arg2, &arg1]);
                        }
                    }
                }
            }
            Swap => {
                let arg1 = self.pop(idx)?;
                let arg2 = self.pop(idx)?;
                self.push_all(&[&arg1, &arg2]);
            }

            IAdd | ISub | IMul | IDiv | IRem | IAnd | IOr | IXor | ISh(_) | LCmp | FCmp(_)
            | DCmp(_) => {
                self.pop_n(2, idx)?;
                self.push(VType::Integer);
            }
            LAdd | LSub | LMul | LDiv | LRem | LAnd | LOr | LXor | LSh(_) => {
                self.pop_n(2, idx)?;
                self.push(VType::Long);
            }
            FAdd | FSub | FMul | FDiv | FRem => {
                self.pop_n(2, idx)?;
                self.push(VType::Float);
            }
            DAdd | DSub | DMul | DDiv | DRem => {
                self.pop_n(2, idx)?;
                self.push(VType::Double);
            }

            INeg | L2I | F2I | D2I | I2B | I2C | I2S => {
                self.pop(idx)?;
                self.push(VType::Integer);
            }
            LNeg | I2L | F2L | D2L => {
                self.pop(idx)?;
                self.push(VType::Long);
            }
            FNeg | I2F | L2F | D2F => {
                self.pop(idx)?;
                self.push(VType::Float);
            }
            DNeg | I2D | L2D | F2D => {
                self.pop(idx)?;
                self.push(VType::Double);
            }

            Field(kind, field) => {
                let typ = field_vtype(&field.descriptor)?;
                match kind {
                    FieldAccessKind::GetStatic => self.push(typ),
                    FieldAccessKind::PutStatic => self.pop_n(1, idx)?,
                    FieldAccessKind::GetField => {
                        self.pop(idx)?;
                        self.push(typ);
                    }
                    FieldAccessKind::PutField => self.pop_n(2, idx)?,
                }
            }
            Invoke(typ, method) => self.invoke(idx, *typ, method, allocations, this_class)?,
            InvokeDynamic(call_site) => {
                let descriptor = method_descriptor(&call_site.descriptor)?;
                self.pop_n(descriptor.parameters.len(), idx)?;
                if let Some(return_type) = &descriptor.return_type {
                    self.push(vtype_of(return_type));
                }
            }

            New(_) => {
                let lbl = allocations.label(idx)?;
                self.push(VType::Uninitialized(lbl));
            }
            NewArray(base_type) => {
                self.pop(idx)?;
                self.push(VType::Object(format!("[{}", base_descriptor(*base_type))));
            }
            ANewArray(class) => {
                self.pop(idx)?;
                self.push(VType::Object(array_of(class)));
            }
            MultiANewArray(class, dimensions) => {
                self.pop_n(*dimensions as usize, idx)?;
                self.push(VType::Object(class.clone()));
            }
            ArrayLength | InstanceOf(_) => {
                self.pop(idx)?;
                self.push(VType::Integer);
            }
            CheckCast(class) => {
                self.pop(idx)?;
                self.push(VType::Object(class.clone()));
            }
            MonitorEnter | MonitorExit => self.pop_n(1, idx)?,

            Branch(branch) => match branch {
                BranchInstruction::If(_, _)
                | BranchInstruction::IfNull(_, _)
                | BranchInstruction::TableSwitch { .. }
                | BranchInstruction::LookupSwitch { .. }
                | BranchInstruction::IReturn
                | BranchInstruction::LReturn
                | BranchInstruction::FReturn
                | BranchInstruction::DReturn
                | BranchInstruction::AReturn
                | BranchInstruction::AThrow => self.pop_n(1, idx)?,
                BranchInstruction::IfICmp(_, _) | BranchInstruction::IfACmp(_, _) => {
                    self.pop_n(2, idx)?
                }
                BranchInstruction::Goto(_)
                | BranchInstruction::GotoW(_)
                | BranchInstruction::Return => (),
                BranchInstruction::Jsr(_)
                | BranchInstruction::JsrW(_)
                | BranchInstruction::Ret(_) => return Err(Error::UnsupportedSubroutine(idx)),
            },
        }
        Ok(())
    }

    fn invoke(
        &mut self,
        idx: usize,
        typ: InvokeType,
        method: &MethodRef,
        allocations: &Allocations,
        this_class: &str,
    ) -> Result<(), Error> {
        let descriptor = method_descriptor(&method.descriptor)?;
        self.pop_n(descriptor.parameters.len(), idx)?;

        if typ.has_receiver() {
            let receiver = self.pop(idx)?;
            if typ == InvokeType::Special && method.name == "<init>" {
                let initialized = match &receiver {
                    VType::UninitializedThis => VType::Object(String::from(this_class)),
                    VType::Uninitialized(lbl) => {
                        VType::Object(String::from(allocations.class(*lbl, &method.owner)))
                    }
                    _ => return Err(Error::InvalidStack(idx)),
                };
                self.replace(&receiver, &initialized);
            }
        }

        if let Some(return_type) = &descriptor.return_type {
            self.push(vtype_of(return_type));
        }
        Ok(())
    }
}

/// Where objects get allocated
struct Allocations<'a> {
    /// Label of each `new`, by instruction index
    labels: HashMap<usize, Label>,

    /// Class allocated at each label
    classes: HashMap<Label, &'a str>,
}

impl<'a> Allocations<'a> {
    fn new(instructions: &'a [Instruction]) -> Allocations<'a> {
        let mut labels = HashMap::new();
        let mut classes = HashMap::new();
        for (idx, insn) in instructions.iter().enumerate() {
            if let Instruction::New(class) = insn {
                if let Some(lbl) = allocation_label(instructions, idx) {
                    labels.insert(idx, lbl);
                    classes.insert(lbl, class.as_str());
                }
            }
        }
        Allocations { labels, classes }
    }

    fn label(&self, idx: usize) -> Result<Label, Error> {
        self.labels
            .get(&idx)
            .copied()
            .ok_or(Error::InvalidStack(idx))
    }

    /// Class allocated at the label, falling back to the owner of the constructor
    fn class<'b>(&'b self, lbl: Label, constructor_owner: &'b str) -> &'b str {
        self.classes.get(&lbl).copied().unwrap_or(constructor_owner)
    }
}

/// Exception handler, with all positions as instruction indices
struct Handler {
    /// First covered instruction
    start: usize,

    /// First instruction past the covered range
    end: usize,

    /// First instruction of the handler
    target: usize,
    catch_type: String,
}

/// Dataflow over the frame points of a method
struct Analysis<'a> {
    instructions: &'a [Instruction],
    declared: &'a BTreeMap<usize, State>,
    classes: &'a ClassGraph,
    this_class: &'a str,
    allocations: Allocations<'a>,
    handlers: Vec<Handler>,

    /// Position of every label in the instruction list
    labels: HashMap<Label, usize>,

    /// Instructions which paths may jump to, and so need a frame
    merge_points: BTreeSet<usize>,

    /// States at merge points (and at the method entry)
    states: BTreeMap<usize, State>,

    /// Merge points whose state changed since they were last walked from
    worklist: Vec<usize>,
}

impl<'a> Analysis<'a> {
    fn new(
        instructions: &'a [Instruction],
        declared: &'a BTreeMap<usize, State>,
        classes: &'a ClassGraph,
        this_class: &'a str,
    ) -> Analysis<'a> {
        let labels = instructions
            .iter()
            .enumerate()
            .filter_map(|(idx, insn)| match insn {
                Instruction::Label(lbl) => Some((*lbl, idx)),
                _ => None,
            })
            .collect();
        Analysis {
            instructions,
            declared,
            classes,
            this_class,
            allocations: Allocations::new(instructions),
            handlers: vec![],
            labels,
            merge_points: BTreeSet::new(),
            states: BTreeMap::new(),
            worklist: vec![],
        }
    }

    fn position(&self, lbl: Label) -> Result<usize, Error> {
        self.labels
            .get(&lbl)
            .copied()
            .ok_or(Error::UnresolvedLabel(lbl))
    }

    /// Index of the instruction a jump to the label lands on
    fn target(&self, lbl: Label) -> Result<usize, Error> {
        next_real(self.instructions, self.position(lbl)?).ok_or(Error::UnresolvedLabel(lbl))
    }

    fn run(&mut self, initial: State) -> Result<(), Error> {
        let instructions = self.instructions;
        for insn in instructions {
            if let Instruction::Branch(branch) = insn {
                for lbl in branch.jump_targets() {
                    let target = self.target(*lbl)?;
                    self.merge_points.insert(target);
                }
            }
        }
        let handler_targets: Vec<usize> = self.handlers.iter().map(|h| h.target).collect();
        self.merge_points.extend(handler_targets);
        let declared = self.declared;
        self.merge_points.extend(declared.keys().copied());

        let entry = match next_real(instructions, 0) {
            Some(entry) => entry,
            None => return Ok(()),
        };
        self.merge_into(entry, initial)?;
        while let Some(start) = self.worklist.pop() {
            self.walk(start)?;
        }
        Ok(())
    }

    /// Follow straight-line code from a merge point until the next merge point (or the end of
    /// the block)
    fn walk(&mut self, start: usize) -> Result<(), Error> {
        let instructions = self.instructions;
        let mut state = match self.states.get(&start) {
            Some(state) => state.clone(),
            None => return Ok(()),
        };

        let mut idx = start;
        while let Some(insn) = instructions.get(idx) {
            if insn.is_pseudo() {
                idx += 1;
                continue;
            }
            if idx != start && self.merge_points.contains(&idx) {
                return self.merge_into(idx, state);
            }

            // Handlers see the locals from both before and after the instruction
            self.flow_to_handlers(idx, &state)?;
            state.execute(idx, insn, &self.allocations, self.this_class)?;
            self.flow_to_handlers(idx, &state)?;

            if let Instruction::Branch(branch) = insn {
                for lbl in branch.jump_targets() {
                    let target = self.target(*lbl)?;
                    self.merge_into(target, state.clone())?;
                }
                if !branch.falls_through() {
                    return Ok(());
                }
            }
            idx += 1;
        }
        Ok(())
    }

    fn flow_to_handlers(&mut self, idx: usize, state: &State) -> Result<(), Error> {
        let caught: Vec<(usize, String)> = self
            .handlers
            .iter()
            .filter(|handler| handler.start <= idx && idx < handler.end)
            .map(|handler| (handler.target, handler.catch_type.clone()))
            .collect();
        for (target, catch_type) in caught {
            let handler_state = State {
                locals: state.locals.clone(),
                stack: vec![VType::Object(catch_type)],
            };
            self.merge_into(target, handler_state)?;
        }
        Ok(())
    }

    /// Merge an incoming state into the state at a merge point, queueing the point up if its
    /// state changed
    fn merge_into(&mut self, idx: usize, incoming: State) -> Result<(), Error> {
        let declared = self.declared.get(&idx);
        let merged = match self.states.get(&idx) {
            Some(existing) => existing.merge(&incoming, declared, self.classes, idx)?,
            None => match declared {
                Some(declared) => State {
                    locals: declared.locals.clone(),
                    stack: incoming.stack,
                },
                None => incoming,
            },
        };

        if self.states.get(&idx) != Some(&merged) {
            self.states.insert(idx, merged);
            self.worklist.push(idx);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{ExceptionHandler, OrdComparison};

    fn code(instructions: Vec<Instruction>) -> Code {
        Code {
            max_stack: 0,
            max_locals: 4,
            instructions,
            exception_handlers: vec![],
            local_variables: vec![],
            local_variable_types: vec![],
            other_attributes: vec![],
        }
    }

    fn static_method(descriptor: &str) -> MethodContext {
        MethodContext {
            class_name: "me/Example",
            name: "run",
            descriptor,
            is_static: true,
        }
    }

    fn invoke(typ: InvokeType, owner: &str, name: &str, descriptor: &str) -> Instruction {
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

    fn string(value: &str) -> Instruction {
        Instruction::Ldc(ConstantData::String(String::from(value)))
    }

    fn class(name: &str, constants: &mut ConstantsPool) -> ClassConstantIndex {
        String::from(name).constant_index(constants).unwrap()
    }

    fn object(
        name: &str,
        constants: &mut ConstantsPool,
    ) -> VerificationType<ClassConstantIndex, Label> {
        VerificationType::Object(class(name, constants))
    }

    fn frames(code: &Code) -> Vec<Frame> {
        code.instructions
            .iter()
            .filter_map(|insn| match insn {
                Instruction::Frame(frame) => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn branch_inside_allocation() {
        // new StringBuilder(flag ? "yes" : "no")
        let mut body = code(vec![
            Instruction::New(String::from("java/lang/StringBuilder")),
            Instruction::Dup,
            Instruction::ILoad(0),
            Instruction::Branch(BranchInstruction::If(OrdComparison::EQ, Label(1))),
            string("yes"),
            Instruction::Branch(BranchInstruction::Goto(Label(2))),
            Instruction::Label(Label(1)),
            string("no"),
            Instruction::Label(Label(2)),
            invoke(
                InvokeType::Special,
                "java/lang/StringBuilder",
                "<init>",
                "(Ljava/lang/String;)V",
            ),
            Instruction::Branch(BranchInstruction::AReturn),
        ]);

        let mut pool = ConstantsPool::new();
        let method = static_method("(Z)Ljava/lang/StringBuilder;");
        body.compute_frames(&method, &ClassGraph::default(), &mut pool).unwrap();

        assert_eq!(body.instructions[0], Instruction::Label(Label(3)));
        let allocated = VerificationType::Uninitialized(Label(3));
        assert_eq!(
            frames(&body),
            vec![
                StackMapFrame::FullFrame {
                    offset_delta: (),
                    local_verifications: vec![VerificationType::Integer],
                    stack_verifications: vec![allocated.clone(), allocated.clone()],
                },
                StackMapFrame::FullFrame {
                    offset_delta: (),
                    local_verifications: vec![VerificationType::Integer],
                    stack_verifications: vec![
                        allocated.clone(),
                        allocated,
                        object("java/lang/String", &mut pool),
                    ],
                },
            ]
        );

        // Frames sit right before the instruction they describe
        assert!(matches!(body.instructions[8], Instruction::Frame(_)));
        assert_eq!(body.instructions[9], string("no"));
    }

    #[test]
    fn stale_frames_are_replaced() {
        // The frame at `l1` still types the stack as it was before rewriting
        let mut pool = ConstantsPool::new();
        let placeholder = object("ru/DmN/bul/OpcodeInsertion", &mut pool);
        let mut body = code(vec![
            Instruction::Label(Label(0)),
            Instruction::New(String::from("java/lang/Object")),
            Instruction::Dup,
            Instruction::ILoad(0),
            Instruction::Branch(BranchInstruction::If(OrdComparison::EQ, Label(1))),
            Instruction::Label(Label(1)),
            Instruction::Frame(StackMapFrame::SameLocalsOneStack {
                offset_delta: (),
                stack_verification: placeholder,
            }),
            invoke(InvokeType::Special, "java/lang/Object", "<init>", "()V"),
            Instruction::Branch(BranchInstruction::AReturn),
        ]);
        body.compute_frames(
            &static_method("(Z)Ljava/lang/Object;"),
            &ClassGraph::default(),
            &mut pool,
        )
        .unwrap();

        let allocated = VerificationType::Uninitialized(Label(0));
        assert_eq!(
            frames(&body),
            vec![StackMapFrame::FullFrame {
                offset_delta: (),
                local_verifications: vec![VerificationType::Integer],
                stack_verifications: vec![allocated.clone(), allocated],
            }]
        );
    }

    #[test]
    fn merged_objects() {
        // flag ? Integer.valueOf(1) : Long.valueOf(2L)
        let mut body = code(vec![
            Instruction::ILoad(0),
            Instruction::Branch(BranchInstruction::If(OrdComparison::EQ, Label(1))),
            Instruction::IConst1,
            invoke(InvokeType::Static, "java/lang/Integer", "valueOf", "(I)Ljava/lang/Integer;"),
            Instruction::Branch(BranchInstruction::Goto(Label(2))),
            Instruction::Label(Label(1)),
            Instruction::LConst1,
            invoke(InvokeType::Static, "java/lang/Long", "valueOf", "(J)Ljava/lang/Long;"),
            Instruction::Label(Label(2)),
            Instruction::Branch(BranchInstruction::AReturn),
        ]);
        let mut pool = ConstantsPool::new();
        body.compute_frames(
            &static_method("(Z)Ljava/lang/Number;"),
            &ClassGraph::default(),
            &mut pool,
        )
        .unwrap();

        assert_eq!(
            frames(&body),
            vec![
                StackMapFrame::SameLocalsNoStack { offset_delta: () },
                StackMapFrame::SameLocalsOneStack {
                    offset_delta: (),
                    stack_verification: object("java/lang/Number", &mut pool),
                },
            ]
        );
    }

    #[test]
    fn declared_types_guide_merges() {
        // flag ? new Foo() : new Bar(), where the compiler knew both extend `me/Base`
        let mut pool = ConstantsPool::new();
        let base = object("me/Base", &mut pool);
        let mut body = code(vec![
            Instruction::ILoad(0),
            Instruction::Branch(BranchInstruction::If(OrdComparison::EQ, Label(1))),
            invoke(InvokeType::Static, "me/Foo", "make", "()Lme/Foo;"),
            Instruction::Branch(BranchInstruction::Goto(Label(2))),
            Instruction::Label(Label(1)),
            Instruction::Frame(StackMapFrame::SameLocalsNoStack { offset_delta: () }),
            invoke(InvokeType::Static, "me/Bar", "make", "()Lme/Bar;"),
            Instruction::Label(Label(2)),
            Instruction::Frame(StackMapFrame::SameLocalsOneStack {
                offset_delta: (),
                stack_verification: base.clone(),
            }),
            Instruction::Branch(BranchInstruction::AReturn),
        ]);
        body.compute_frames(
            &static_method("(Z)Lme/Base;"),
            &ClassGraph::default(),
            &mut pool,
        )
        .unwrap();

        assert_eq!(
            frames(&body)[1],
            StackMapFrame::SameLocalsOneStack {
                offset_delta: (),
                stack_verification: base,
            }
        );
    }

    #[test]
    fn declared_locals_are_kept() {
        // The string in local 1 is out of scope by `l1`
        let mut body = code(vec![
            string("a"),
            Instruction::AStore(1),
            Instruction::ILoad(0),
            Instruction::Branch(BranchInstruction::If(OrdComparison::EQ, Label(1))),
            string("b"),
            Instruction::AStore(1),
            Instruction::Label(Label(1)),
            Instruction::Frame(StackMapFrame::SameLocalsNoStack { offset_delta: () }),
            Instruction::Branch(BranchInstruction::Return),
        ]);
        let mut pool = ConstantsPool::new();
        body.compute_frames(&static_method("(Z)V"), &ClassGraph::default(), &mut pool).unwrap();
        assert_eq!(
            frames(&body),
            vec![StackMapFrame::SameLocalsNoStack { offset_delta: () }]
        );
    }

    #[test]
    fn handlers_start_with_the_exception() {
        let mut body = code(vec![
            Instruction::Label(Label(0)),
            invoke(InvokeType::Static, "me/Example", "risky", "()V"),
            Instruction::Label(Label(1)),
            Instruction::Branch(BranchInstruction::Return),
            Instruction::Label(Label(2)),
            Instruction::AStore(0),
            Instruction::Branch(BranchInstruction::Return),
        ]);
        body.exception_handlers.push(ExceptionHandler {
            start: Label(0),
            end: Label(1),
            handler: Label(2),
            catch_type: Some(String::from("java/lang/Exception")),
        });
        let mut pool = ConstantsPool::new();
        body.compute_frames(&static_method("()V"), &ClassGraph::default(), &mut pool).unwrap();

        assert_eq!(
            frames(&body),
            vec![StackMapFrame::SameLocalsOneStack {
                offset_delta: (),
                stack_verification: object("java/lang/Exception", &mut pool),
            }]
        );
    }

    #[test]
    fn constructors_start_uninitialized() {
        let mut body = code(vec![
            Instruction::ALoad(0),
            Instruction::ILoad(1),
            Instruction::Branch(BranchInstruction::If(OrdComparison::EQ, Label(1))),
            Instruction::Label(Label(1)),
            invoke(InvokeType::Special, "java/lang/Object", "<init>", "()V"),
            Instruction::ALoad(0),
            Instruction::ILoad(1),
            Instruction::Branch(BranchInstruction::If(OrdComparison::EQ, Label(2))),
            Instruction::Label(Label(2)),
            Instruction::Pop,
            Instruction::Branch(BranchInstruction::Return),
        ]);
        let method = MethodContext {
            class_name: "me/Example",
            name: "<init>",
            descriptor: "(Z)V",
            is_static: false,
        };
        let mut pool = ConstantsPool::new();
        body.compute_frames(&method, &ClassGraph::default(), &mut pool).unwrap();

        let this = object("me/Example", &mut pool);
        assert_eq!(
            frames(&body),
            vec![
                StackMapFrame::SameLocalsOneStack {
                    offset_delta: (),
                    stack_verification: VerificationType::UninitializedThis,
                },
                StackMapFrame::FullFrame {
                    offset_delta: (),
                    local_verifications: vec![this.clone(), VerificationType::Integer],
                    stack_verifications: vec![this],
                },
            ]
        );
    }

    #[test]
    fn wide_locals() {
        let mut body = code(vec![
            Instruction::LConst0,
            Instruction::LStore(1),
            Instruction::Label(Label(0)),
            Instruction::ILoad(0),
            Instruction::Branch(BranchInstruction::If(OrdComparison::EQ, Label(0))),
            Instruction::Branch(BranchInstruction::Return),
        ]);
        let mut pool = ConstantsPool::new();
        body.compute_frames(&static_method("(I)V"), &ClassGraph::default(), &mut pool).unwrap();
        assert_eq!(
            frames(&body),
            vec![StackMapFrame::AppendFrameNoStack {
                offset_delta: (),
                local_verifications: vec![VerificationType::Long],
            }]
        );
    }

    #[test]
    fn mismatched_stacks() {
        let mut body = code(vec![
            Instruction::ILoad(0),
            Instruction::Branch(BranchInstruction::If(OrdComparison::EQ, Label(1))),
            Instruction::IConst1,
            Instruction::Label(Label(1)),
            Instruction::Branch(BranchInstruction::Return),
        ]);
        let mut pool = ConstantsPool::new();
        assert!(matches!(
            body.compute_frames(&static_method("(Z)V"), &ClassGraph::default(), &mut pool),
            Err(Error::IncompatibleStacks(_))
        ));
    }

    #[test]
    fn subroutines_are_rejected() {
        let mut body = code(vec![
            Instruction::Branch(BranchInstruction::Jsr(Label(0))),
            Instruction::Branch(BranchInstruction::Return),
            Instruction::Label(Label(0)),
            Instruction::AStore(0),
            Instruction::Branch(BranchInstruction::Ret(0)),
        ]);
        let mut pool = ConstantsPool::new();
        assert!(matches!(
            body.compute_frames(&static_method("()V"), &ClassGraph::default(), &mut pool),
            Err(Error::UnsupportedSubroutine(0))
        ));
    }
}
