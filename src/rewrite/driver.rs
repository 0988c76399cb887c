use crate::jvm::code::Instruction;
use crate::rewrite::{recognize, synthesize, Error, ReservedNames, Stream};

/// Rewrite every placeholder in an instruction list, returning how many were rewritten
///
/// After each rewrite the scan starts over from the first instruction, since any number of
/// instructions before the placeholder may have been removed. The loop ends once a full pass
/// finds no placeholder. Each rewrite removes one placeholder call without introducing another,
/// so this always terminates.
///
/// On error, the list is left partially rewritten and should be discarded.
pub fn rewrite_instructions(
    instructions: &mut Vec<Instruction>,
    names: &ReservedNames,
) -> Result<usize, Error> {
    let mut rewrites = 0;
    let mut idx = 0;

    while idx < instructions.len() {
        let (insertion, placeholder) = match recognize(&instructions[idx], names) {
            Some((name, placeholder)) => (String::from(name), placeholder),
            None => {
                idx += 1;
                continue;
            }
        };

        log::trace!("Rewriting `{}` at index {}", insertion, idx);
        let mut stream = Stream::new(instructions, names, idx, insertion);
        synthesize(&mut stream, placeholder)?;

        rewrites += 1;
        idx = 0;
    }

    Ok(rewrites)
}
