//! Short-branch widening: `b_short` to `b`, and `cbz`/`cbnz` to a reachable sequence.

use smallvec::smallvec;

use crate::cursor::ListCursor;
use crate::errors::{MangleError, MangleResult};
use crate::ir::{BranchTarget, Inst, InstrList, InstructionData, Opcode, Operand, Translation};
use crate::isa::registers::Reg;
use crate::isa::IsaMode;

/// Encode a 4-byte unconditional `b` targeting `target`, relative to `pc`. This is the
/// reference system's `encode_raw_jmp`: a stand-in for a real encoder, sufficient for this
/// crate's own round-trip tests. An embedder supplies its own encoder for the final bytes
/// that reach the code cache.
fn encode_raw_b(pc: u32, target: u32) -> [u8; 4] {
    let rel = (target.wrapping_sub(pc.wrapping_add(4)) as i32) >> 1;
    let imm24 = (rel as u32) & 0x00ff_ffff;
    let word = 0xea00_0000u32 | imm24;
    word.to_le_bytes()
}

fn decode_raw_b_target(pc: u32, bytes: &[u8; 4]) -> u32 {
    let word = u32::from_le_bytes(*bytes);
    let imm24 = word & 0x00ff_ffff;
    let signed = ((imm24 << 8) as i32) >> 8; // sign-extend 24 -> 32
    pc.wrapping_add(4).wrapping_add((signed << 1) as u32)
}

/// `convert_short_to_near` for a plain conditional/unconditional `b_short`: just widen the
/// opcode in place, the operand already carries the real target.
pub fn widen_b_short(cursor: &mut ListCursor) {
    let at = cursor.current().expect("cursor must be at an instruction");
    cursor.list.data_mut(at).opcode = Opcode::Branch;
}

/// `convert_short_to_near` for `cbz`/`cbnz`. App uses get a 6-byte raw encoding: an inverted
/// compare-skip-one followed by a 4-byte encoded `b`. Meta (engine-inserted) uses get a
/// plain three-instruction expansion instead, since they have no fixed encoding to preserve.
pub fn widen_cbz(list: &mut InstrList, at: Inst, cfg_negate_is_app: bool) -> MangleResult<Inst> {
    let data = list.data(at).clone();
    let (negate, reg) = match data.opcode {
        Opcode::CompareBranchZero { negate } => {
            let reg = data
                .srcs
                .iter()
                .find_map(|op| op.as_reg())
                .ok_or_else(|| MangleError::invariant("widen_cbz", "cbz/cbnz without a compare register"))?;
            (negate, reg)
        }
        _ => return Err(MangleError::invariant("widen_cbz", "not a cbz/cbnz instruction")),
    };
    let target = data
        .srcs
        .iter()
        .find_map(|op| op.as_branch_target())
        .ok_or_else(|| MangleError::invariant("widen_cbz", "cbz/cbnz without a branch target"))?;

    if data.translation.is_meta() || !cfg_negate_is_app {
        return Ok(widen_cbz_meta(list, at, reg, target));
    }

    let app_pc = data
        .translation
        .app_pc()
        .ok_or_else(|| MangleError::invariant("widen_cbz", "missing app pc for raw cbz encoding"))?;
    let target_addr = match target {
        BranchTarget::AppAddr(a) => a,
        BranchTarget::Label(_) => {
            return Err(MangleError::invariant(
                "widen_cbz",
                "app cbz/cbnz must carry a concrete application target, not a meta label",
            ))
        }
    };

    // byte 0: halfword opcode for the *inverted* cbz/cbnz with immediate 1 (skip the 4-byte b).
    // 0x0008 is imm5 bit 0 (the `i`/low bit of the scaled displacement), which is what actually
    // makes this branch skip over the following 4-byte `b` instead of falling through to it.
    let inverted_opcode = 0xb100u16 | if !negate { 0x0800 } else { 0 } | 0x0008 | (reg.num() as u16 & 0x7);
    let mut raw: smallvec::SmallVec<[u8; 6]> = smallvec![0u8, 0u8, 0u8, 0u8, 0u8, 0u8];
    raw[0..2].copy_from_slice(&inverted_opcode.to_le_bytes());
    let b_bytes = encode_raw_b(app_pc.wrapping_add(2), target_addr);
    raw[2..6].copy_from_slice(&b_bytes);

    let mut new_data = InstructionData::new(Opcode::Branch, "b", data.mode, data.translation)
        .with_srcs([Operand::Branch(target), Operand::Reg(reg)]);
    new_data.raw_bytes = Some(raw);
    *list.data_mut(at) = new_data;
    Ok(at)
}

fn widen_cbz_meta(list: &mut InstrList, at: Inst, reg: Reg, target: BranchTarget) -> Inst {
    let data = list.data(at).clone();
    let negate = matches!(data.opcode, Opcode::CompareBranchZero { negate: true });

    let fall_label = list.create_label();
    let inverted = InstructionData::new(
        Opcode::CompareBranchZero { negate: !negate },
        if negate { "cbz" } else { "cbnz" },
        data.mode,
        Translation::Meta,
    )
    .with_srcs([Operand::Reg(reg), Operand::Branch(BranchTarget::Label(fall_label))]);

    let b = InstructionData::new(Opcode::Branch, "b", data.mode, data.translation)
        .with_srcs([Operand::Branch(target)]);

    let label_data = InstructionData::new(Opcode::Label, "label", data.mode, Translation::Meta);

    list.insert_before_data(at, inverted);
    let b_inst = list.insert_before_data(at, b);
    let label_inst = list.insert_before_data(at, label_data);
    list.bind_label(fall_label, label_inst);
    list.remove(at);
    b_inst
}

/// `remangle_short_rewrite`: re-encode only the 4-byte `b` portion of a previously widened
/// app `cbz`/`cbnz`, at a new address and/or with a new target.
pub fn remangle_short_rewrite(
    list: &mut InstrList,
    at: Inst,
    pc: u32,
    new_target: Option<u32>,
) -> MangleResult<()> {
    let data = list.data_mut(at);
    let raw = data
        .raw_bytes
        .as_mut()
        .ok_or_else(|| MangleError::invariant("remangle_short_rewrite", "instruction has no raw cbz encoding"))?;
    if raw.len() != 6 {
        return Err(MangleError::invariant(
            "remangle_short_rewrite",
            "raw encoding is not a widened cbz/cbnz",
        ));
    }
    let old_bytes: [u8; 4] = raw[2..6].try_into().expect("checked length above");
    let target = match new_target {
        Some(t) => t,
        None => decode_raw_b_target(pc, &old_bytes),
    };
    let new_bytes = encode_raw_b(pc.wrapping_add(2), target);
    raw[2..6].copy_from_slice(&new_bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::InstrList;

    #[test]
    fn widen_b_short_changes_opcode_only() {
        let mut list = InstrList::new();
        let data = InstructionData::new(Opcode::BranchShort, "b_short", IsaMode::T32, Translation::App(0x100))
            .with_srcs([Operand::Branch(BranchTarget::AppAddr(0x200))]);
        let at = list.append_data(data.clone());
        let mut cursor = ListCursor::at(&mut list, at);
        widen_b_short(&mut cursor);
        assert_eq!(cursor.list.data(at).opcode, Opcode::Branch);
        assert_eq!(cursor.list.data(at).srcs, data.srcs);
    }

    #[test]
    fn widen_app_cbz_produces_six_raw_bytes() {
        let mut list = InstrList::new();
        let data = InstructionData::new(
            Opcode::CompareBranchZero { negate: false },
            "cbz",
            IsaMode::T32,
            Translation::App(0x1000),
        )
        .with_srcs([Operand::Reg(Reg::R3), Operand::Branch(BranchTarget::AppAddr(0x1040))]);
        let at = list.append_data(data);
        let result = widen_cbz(&mut list, at, true).unwrap();
        let raw = list.data(result).raw_bytes.clone().unwrap();
        assert_eq!(raw.len(), 6);
        // low halfword should be the inverted cbnz (opposite of cbz) with skip-1 immediate.
        let inverted = u16::from_le_bytes([raw[0], raw[1]]);
        assert_eq!(inverted & 0xf800, 0xb900);
        // imm5 bit 0 must be set, or the inverted branch targets itself instead of skipping
        // over the 4-byte `b` that follows it.
        assert_eq!(inverted & 0x0008, 0x0008);
        assert_eq!(list.data(result).srcs[0], Operand::Branch(BranchTarget::AppAddr(0x1040)));
        assert_eq!(list.data(result).srcs[1], Operand::Reg(Reg::R3));
    }

    #[test]
    fn remangle_short_rewrite_roundtrips_target() {
        let mut list = InstrList::new();
        let data = InstructionData::new(
            Opcode::CompareBranchZero { negate: true },
            "cbnz",
            IsaMode::T32,
            Translation::App(0x2000),
        )
        .with_srcs([Operand::Reg(Reg::R1), Operand::Branch(BranchTarget::AppAddr(0x2080))]);
        let at = list.append_data(data);
        let at = widen_cbz(&mut list, at, true).unwrap();

        remangle_short_rewrite(&mut list, at, 0x3000, Some(0x3100)).unwrap();
        let raw = list.data(at).raw_bytes.clone().unwrap();
        let bytes: [u8; 4] = raw[2..6].try_into().unwrap();
        assert_eq!(decode_raw_b_target(0x3000u32.wrapping_add(2), &bytes), 0x3100);
    }

    #[test]
    fn widen_meta_cbz_expands_to_three_instructions() {
        let mut list = InstrList::new();
        let data = InstructionData::new(
            Opcode::CompareBranchZero { negate: false },
            "cbz",
            IsaMode::T32,
            Translation::Meta,
        )
        .with_srcs([Operand::Reg(Reg::R0), Operand::Branch(BranchTarget::AppAddr(0x5000))]);
        let at = list.append_data(data);
        widen_cbz(&mut list, at, true).unwrap();
        assert_eq!(list.iter().count(), 3);
    }
}
