//! T32 IT-block splitting and re-synthesis.
//!
//! Thumb-2 predicated instructions (other than branches) are only legal lexically inside an
//! `it` block declaring up to four following predicates. Mangling routinely needs to pull a
//! single predicated instruction out of its block to rewrite it (possibly into something that
//! can no longer be predicated at all, like an indirect branch sequence), then put IT
//! coverage back over whatever is left once it is done.

use smallvec::SmallVec;

use crate::errors::{MangleError, MangleResult};
use crate::ir::{Inst, InstrList, InstructionData, Opcode, Operand, Translation};
use crate::isa::{IsaMode, Predicate};

const IT_MAX_LEN: usize = 4;

fn it_covers(list: &InstrList, it: Inst, target: Inst) -> bool {
    list.data(it)
        .srcs
        .iter()
        .any(|op| matches!(op, Operand::InstRef(i) if *i == target))
}

/// Find the `it` instruction governing `instr`, if any. Limited to a short backward walk
/// since a block can cover at most four instructions.
pub fn find_governing_it(list: &InstrList, instr: Inst) -> Option<Inst> {
    let mut cur = instr;
    for _ in 0..IT_MAX_LEN + 1 {
        cur = list.prev(cur)?;
        if list.data(cur).opcode == Opcode::It && it_covers(list, cur, instr) {
            return Some(cur);
        }
    }
    None
}

fn make_it(covers: &[Inst], base_pred: Predicate, mode: IsaMode, translation: Translation) -> InstructionData {
    debug_assert!(!covers.is_empty() && covers.len() <= IT_MAX_LEN);
    let srcs: SmallVec<[Operand; 4]> = covers.iter().map(|&i| Operand::InstRef(i)).collect();
    InstructionData::new(Opcode::It { it_len: covers.len() as u8 }, "it", mode, translation)
        .with_predicate(base_pred)
        .with_srcs(srcs)
}

fn first_translation(list: &InstrList, covers: &[Inst]) -> Translation {
    covers
        .iter()
        .find_map(|&i| list.data(i).translation.app_pc())
        .map(Translation::App)
        .unwrap_or(Translation::Meta)
}

/// Remove `instr` from whatever `it` block governs it, splitting the block into a leading
/// piece (instructions before `instr`) and a trailing piece (instructions after), each
/// re-synthesized as its own `it` if non-empty. `instr` itself is left governed by nothing;
/// the caller is responsible for giving it a legal encoding (typically by making it
/// unconditional, or by removing it outright).
///
/// Returns the instruction to resume mangling at (unchanged; this function only edits the
/// blocks bracketing `instr`, never `instr` itself).
pub fn remove_from_block(list: &mut InstrList, instr: Inst) -> MangleResult<()> {
    let it = match find_governing_it(list, instr) {
        Some(it) => it,
        None => return Ok(()), // not predicated, or already unconditional: nothing to do
    };

    let covers: SmallVec<[Inst; 4]> = list.data(it).srcs.iter().map(|op| match op {
        Operand::InstRef(i) => *i,
        _ => unreachable!("it block srcs are always InstRef"),
    }).collect();
    let base_pred = list.data(it).predicate;
    let mode = list.data(it).mode;

    let split_at = covers
        .iter()
        .position(|&i| i == instr)
        .ok_or_else(|| MangleError::invariant("remove_from_block", "instr not found in its own governing it block"))?;

    let (leading, trailing_with_self) = covers.split_at(split_at);
    let trailing = &trailing_with_self[1..];

    if !leading.is_empty() {
        let data = make_it(leading, base_pred, mode, first_translation(list, leading));
        list.insert_before_data(it, data);
    }
    if !trailing.is_empty() {
        let data = make_it(trailing, base_pred, mode, first_translation(list, trailing));
        list.insert_after_data(instr, data);
    }
    list.remove(it);
    Ok(())
}

/// Re-synthesize `it` blocks over every predicated non-branch instruction in `[start, end)`.
/// Branches are never subsumed (the linker patches them directly); runs already inside an
/// existing `it` are left alone.
///
/// Calling this twice in a row on the same range is a no-op the second time: every
/// predicated instruction already has governing coverage after the first call.
pub fn reinstate_it_blocks(list: &mut InstrList, start: Inst, end: Option<Inst>) -> MangleResult<()> {
    let mut run: SmallVec<[Inst; IT_MAX_LEN]> = SmallVec::new();
    let mut run_pred: Option<Predicate> = None;

    let mut cur = Some(start);
    while let Some(inst) = cur {
        if Some(inst) == end {
            break;
        }
        let next = list.next(inst);

        let data = list.data(inst);
        let eligible = data.is_predicated() && !data.opcode.is_cti() && data.opcode != Opcode::It;
        let already_covered = find_governing_it(list, inst).is_some();

        if eligible && !already_covered {
            let compatible = match run_pred {
                None => true,
                Some(p) => data.predicate == p || data.predicate == p.invert(),
            };
            if compatible && run.len() < IT_MAX_LEN {
                if run_pred.is_none() {
                    run_pred = Some(data.predicate);
                }
                run.push(inst);
            } else {
                flush_run(list, &mut run, &mut run_pred)?;
                run_pred = Some(data.predicate);
                run.push(inst);
            }
        } else {
            flush_run(list, &mut run, &mut run_pred)?;
        }

        cur = next;
    }
    flush_run(list, &mut run, &mut run_pred)?;
    Ok(())
}

fn flush_run(
    list: &mut InstrList,
    run: &mut SmallVec<[Inst; IT_MAX_LEN]>,
    run_pred: &mut Option<Predicate>,
) -> MangleResult<()> {
    if run.is_empty() {
        *run_pred = None;
        return Ok(());
    }
    let base_pred = run_pred.take().expect("run_pred set whenever run is non-empty");
    let mode = list.data(run[0]).mode;
    let translation = first_translation(list, run);
    let data = make_it(run, base_pred, mode, translation);
    list.insert_before_data(run[0], data);
    run.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Translation;

    fn predicated(pred: Predicate, pc: u32) -> InstructionData {
        InstructionData::new(Opcode::DataOrMem, "mov", IsaMode::T32, Translation::App(pc))
            .with_predicate(pred)
    }

    fn block(len: u8, pred: Predicate, covers: &[Inst]) -> InstructionData {
        InstructionData::new(Opcode::It { it_len: len }, "it", IsaMode::T32, Translation::Meta)
            .with_predicate(pred)
            .with_srcs(covers.iter().map(|&i| Operand::InstRef(i)))
    }

    #[test]
    fn remove_middle_splits_into_two_blocks() {
        let mut list = InstrList::new();
        let i0 = list.append_data(predicated(Predicate::Eq, 0x100));
        let i1 = list.append_data(predicated(Predicate::Eq, 0x104));
        let i2 = list.append_data(predicated(Predicate::Eq, 0x108));
        let it = list.insert_before_data(i0, block(3, Predicate::Eq, &[i0, i1, i2]));
        let _ = it;

        remove_from_block(&mut list, i1).unwrap();

        let order: Vec<Inst> = list.iter().collect();
        // leading-it, i0, i1, trailing-it, i2
        assert_eq!(order.len(), 5);
        assert_eq!(order[1], i0);
        assert_eq!(order[2], i1);
        assert_eq!(order[4], i2);
        assert_eq!(list.data(order[0]).opcode, Opcode::It { it_len: 1 });
        assert_eq!(list.data(order[3]).opcode, Opcode::It { it_len: 1 });
    }

    #[test]
    fn remove_only_member_drops_block_entirely() {
        let mut list = InstrList::new();
        let i0 = list.append_data(predicated(Predicate::Ne, 0x200));
        list.insert_before_data(i0, block(1, Predicate::Ne, &[i0]));

        remove_from_block(&mut list, i0).unwrap();
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![i0]);
    }

    #[test]
    fn reinstate_groups_compatible_predicates() {
        let mut list = InstrList::new();
        let i0 = list.append_data(predicated(Predicate::Eq, 0x300));
        let i1 = list.append_data(predicated(Predicate::Ne, 0x304));
        let i2 = list.append_data(predicated(Predicate::Eq, 0x308));

        reinstate_it_blocks(&mut list, i0, None).unwrap();

        let order: Vec<Inst> = list.iter().collect();
        assert_eq!(order.len(), 4);
        assert_eq!(list.data(order[0]).opcode, Opcode::It { it_len: 3 });
    }

    #[test]
    fn reinstate_is_idempotent() {
        let mut list = InstrList::new();
        let i0 = list.append_data(predicated(Predicate::Eq, 0x300));
        let i1 = list.append_data(predicated(Predicate::Eq, 0x304));
        let _ = i1;
        reinstate_it_blocks(&mut list, i0, None).unwrap();
        let first_pass: Vec<Inst> = list.iter().collect();
        reinstate_it_blocks(&mut list, first_pass[0], None).unwrap();
        let second_pass: Vec<Inst> = list.iter().collect();
        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn reinstate_skips_branches() {
        let mut list = InstrList::new();
        let i0 = list.append_data(predicated(Predicate::Eq, 0x300));
        let b = list.append_data(
            InstructionData::new(Opcode::Branch, "b", IsaMode::T32, Translation::App(0x304))
                .with_predicate(Predicate::Eq),
        );
        reinstate_it_blocks(&mut list, i0, None).unwrap();
        assert!(find_governing_it(&list, b).is_none());
        assert!(find_governing_it(&list, i0).is_some());
    }
}
