use crate::jvm::code::Instruction;
use crate::rewrite::placeholder::is_placeholder_call;
use crate::rewrite::{Error, ReservedNames};

/// Direction in which operands are searched for, relative to a cursor
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Towards the start of the method, starting just before the cursor
    Backward,

    /// Towards the placeholder, starting at the cursor
    Forward,
}

/// Instruction list of a method, while one placeholder in it is being rewritten
///
/// The stream tracks the position of the placeholder (the "site") through removals and
/// insertions, so synthesizers can chain extractions without worrying about indices shifting.
/// Scans never go past another placeholder: operands of a placeholder are always produced after
/// any earlier placeholder has been called.
///
/// Pseudo-instructions (labels, line numbers, frames) are stepped over but never removed, since
/// other parts of the method may refer to them.
pub struct Stream<'a> {
    instructions: &'a mut Vec<Instruction>,
    names: &'a ReservedNames,
    insertion: String,
    site: usize,
}

impl<'a> Stream<'a> {
    /// Prepare to rewrite the placeholder named `insertion` at index `site`
    pub fn new(
        instructions: &'a mut Vec<Instruction>,
        names: &'a ReservedNames,
        site: usize,
        insertion: String,
    ) -> Stream<'a> {
        Stream {
            instructions,
            names,
            insertion,
            site,
        }
    }

    pub fn names(&self) -> &'a ReservedNames {
        self.names
    }

    /// Name of the placeholder being rewritten
    pub fn insertion(&self) -> &str {
        &self.insertion
    }

    /// Current index of the placeholder
    pub fn site(&self) -> usize {
        self.site
    }

    pub fn instructions(&self) -> &[Instruction] {
        self.instructions
    }

    pub fn argument_not_found(&self) -> Error {
        Error::ArgumentNotFound {
            insertion: self.insertion.clone(),
        }
    }

    pub fn malformed_kind(&self, kind: String) -> Error {
        Error::MalformedArgumentKind {
            insertion: self.insertion.clone(),
            kind,
        }
    }

    pub fn unknown_opcode(&self, member: String) -> Error {
        Error::UnknownOpcodeTag {
            insertion: self.insertion.clone(),
            member,
        }
    }

    /// Find, decode, and remove one instruction
    ///
    /// Backward scans examine everything before the cursor down to the start of the method.
    /// Forward scans examine everything from the cursor up to the placeholder. Instructions which
    /// `decode` rejects are left in place. Returns the index at which the matched instruction
    /// was removed (which is where the next scan in the same direction should continue).
    pub fn extract<T, F>(
        &mut self,
        cursor: usize,
        direction: Direction,
        decode: F,
    ) -> Result<(usize, T), Error>
    where
        F: Fn(&Instruction) -> Option<T>,
    {
        let (idx, value) = match direction {
            Direction::Backward => self.find_backward(cursor, decode)?,
            Direction::Forward => self.find_forward(cursor, decode)?,
        };
        self.remove(idx);
        Ok((idx, value))
    }

    fn find_backward<T, F>(&self, cursor: usize, decode: F) -> Result<(usize, T), Error>
    where
        F: Fn(&Instruction) -> Option<T>,
    {
        for idx in (0..cursor.min(self.instructions.len())).rev() {
            if idx == self.site {
                continue;
            }
            let insn = &self.instructions[idx];
            if is_placeholder_call(insn, self.names) {
                break;
            }
            if let Some(value) = decode(insn) {
                return Ok((idx, value));
            }
        }
        Err(self.argument_not_found())
    }

    fn find_forward<T, F>(&self, cursor: usize, decode: F) -> Result<(usize, T), Error>
    where
        F: Fn(&Instruction) -> Option<T>,
    {
        for idx in cursor..self.site {
            let insn = &self.instructions[idx];
            if is_placeholder_call(insn, self.names) {
                break;
            }
            if let Some(value) = decode(insn) {
                return Ok((idx, value));
            }
        }
        Err(self.argument_not_found())
    }

    /// Index of the first non-pseudo instruction at or after `from` (and before the placeholder)
    pub fn next_real(&self, from: usize) -> Option<usize> {
        (from..self.site).find(|idx| !self.instructions[*idx].is_pseudo())
    }

    /// Index of the last non-pseudo instruction before `before`
    pub fn previous_real(&self, before: usize) -> Option<usize> {
        (0..before.min(self.site))
            .rev()
            .find(|idx| !self.instructions[*idx].is_pseudo())
    }

    /// Remove the next non-pseudo instruction at or after `from`, which must satisfy `expected`
    pub fn expect_next<F>(&mut self, from: usize, expected: F) -> Result<(), Error>
    where
        F: Fn(&Instruction) -> bool,
    {
        match self.next_real(from) {
            Some(idx) if expected(&self.instructions[idx]) => {
                self.remove(idx);
                Ok(())
            }
            _ => Err(self.argument_not_found()),
        }
    }

    /// Remove leading `nop` and `dup` instructions (and also integer or `ldc` constants when
    /// `constants` is set) at or after `from`
    ///
    /// There is no bound on how much gets skipped.
    pub fn skip_noise(&mut self, from: usize, constants: bool) {
        while let Some(idx) = self.next_real(from) {
            if !is_noise(&self.instructions[idx], constants) {
                break;
            }
            self.remove(idx);
        }
    }

    /// Remove an instruction which isn't the placeholder
    pub fn remove(&mut self, idx: usize) -> Instruction {
        debug_assert_ne!(idx, self.site, "placeholder removed as an operand");
        if idx < self.site {
            self.site -= 1;
        }
        self.instructions.remove(idx)
    }

    /// Insert an instruction just before the placeholder
    pub fn insert_before_site(&mut self, insn: Instruction) {
        self.instructions.insert(self.site, insn);
        self.site += 1;
    }

    /// Replace the placeholder with the instruction it stands for
    pub fn replace_site(&mut self, insn: Instruction) {
        self.instructions[self.site] = insn;
    }

    /// Remove the placeholder altogether
    pub fn remove_site(&mut self) {
        self.instructions.remove(self.site);
    }
}

fn is_noise(insn: &Instruction, constants: bool) -> bool {
    use Instruction::*;
    match insn {
        Nop | Dup => true,
        IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5 | BiPush(_)
        | SiPush(_) | Ldc(_) | Ldc2(_) => constants,
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{ConstantData, Label};
    use crate::rewrite::fixtures::{ldc, placeholder};

    fn integer(insn: &Instruction) -> Option<i32> {
        match insn {
            Instruction::IConst1 => Some(1),
            Instruction::BiPush(b) => Some(*b as i32),
            _ => None,
        }
    }

    #[test]
    fn backward_scan_skips_unrelated_instructions() {
        let names = ReservedNames::default();
        let mut instructions = vec![
            Instruction::BiPush(7),
            Instruction::ALoad(0),
            Instruction::Label(Label(0)),
            placeholder("argI", "()V"),
        ];
        let mut stream = Stream::new(&mut instructions, &names, 3, String::from("argI"));

        let (cursor, value) = stream.extract(3, Direction::Backward, integer).unwrap();
        assert_eq!((cursor, value), (0, 7));
        assert_eq!(stream.site(), 2);
        assert_eq!(
            stream.instructions(),
            &[
                Instruction::ALoad(0),
                Instruction::Label(Label(0)),
                placeholder("argI", "()V"),
            ]
        );
    }

    #[test]
    fn backward_scan_stops_at_other_placeholders() {
        let names = ReservedNames::default();
        let mut instructions = vec![
            Instruction::IConst1,
            placeholder("endI", "(I)I"),
            placeholder("argI", "()V"),
        ];
        let mut stream = Stream::new(&mut instructions, &names, 2, String::from("argI"));

        assert_eq!(
            stream.extract(2, Direction::Backward, integer),
            Err(Error::ArgumentNotFound {
                insertion: String::from("argI")
            })
        );
        assert_eq!(stream.instructions().len(), 3);
    }

    #[test]
    fn forward_scan_is_bounded_by_the_site() {
        let names = ReservedNames::default();
        let mut instructions = vec![
            Instruction::Nop,
            Instruction::IConst1,
            placeholder("indy", "()V"),
            Instruction::BiPush(3),
        ];
        let mut stream = Stream::new(&mut instructions, &names, 2, String::from("indy"));

        assert_eq!(
            stream.extract(0, Direction::Forward, integer).unwrap(),
            (1, 1)
        );
        assert!(stream.extract(0, Direction::Forward, integer).is_err());
        assert_eq!(stream.site(), 1);
    }

    #[test]
    fn noise_is_skipped_up_to_real_work() {
        let names = ReservedNames::default();
        let mut instructions = vec![
            Instruction::Dup,
            Instruction::LineNumber(4),
            Instruction::IConst2,
            ldc(ConstantData::String(String::from("noise"))),
            Instruction::Nop,
            Instruction::New(String::from("Foo")),
            placeholder("indy", "()V"),
        ];
        let mut stream = Stream::new(&mut instructions, &names, 6, String::from("indy"));

        stream.skip_noise(0, true);
        assert_eq!(
            stream.instructions(),
            &[
                Instruction::LineNumber(4),
                Instruction::New(String::from("Foo")),
                placeholder("indy", "()V"),
            ]
        );
        assert_eq!(stream.next_real(0), Some(1));
        assert_eq!(stream.previous_real(1), None);
    }

    #[test]
    fn site_edits() {
        let names = ReservedNames::default();
        let mut instructions = vec![placeholder("alloc", "(Ljava/lang/String;)V")];
        let mut stream = Stream::new(&mut instructions, &names, 0, String::from("alloc"));

        stream.insert_before_site(Instruction::New(String::from("Foo")));
        stream.replace_site(Instruction::Dup);
        assert_eq!(stream.site(), 1);
        assert!(stream.expect_next(0, |insn| *insn == Instruction::Dup).is_err());
        assert_eq!(
            instructions,
            vec![Instruction::New(String::from("Foo")), Instruction::Dup]
        );
    }
}
