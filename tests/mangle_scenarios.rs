//! End-to-end scenarios exercised through the public API, one per concrete testable property
//! named in the design document: widen a short branch, widen a cbz, materialize a `bl`,
//! normalize a `pop {r0-r3, pc}`, relocate a pc-relative load, collapse a stolen-reg `mov`,
//! and post-process a clone syscall.

use armng::codec::{Codec, ReferenceCodec};
use armng::config::MangleConfig;
use armng::cursor::ListCursor;
use armng::ir::{BranchTarget, InstrList, InstructionData, MemOperand, Opcode, Operand, Translation};
use armng::isa::registers::{Reg, RegList};
use armng::isa::{IsaMode, Predicate};
use armng::mangle;

fn cfg() -> MangleConfig {
    MangleConfig::reference_default()
}

#[test]
fn widen_b_short_label() {
    let mut list = InstrList::new();
    let data = InstructionData::new(Opcode::BranchShort, "b_short", IsaMode::T32, Translation::App(0x100))
        .with_srcs([Operand::Branch(BranchTarget::AppAddr(0x180))]);
    let at = list.append_data(data);
    let mut cursor = ListCursor::at(&mut list, at);
    mangle::widen_b_short(&mut cursor);

    assert_eq!(cursor.list.data(at).opcode, Opcode::Branch);
    assert_eq!(cursor.list.data(at).srcs[0], Operand::Branch(BranchTarget::AppAddr(0x180)));
}

#[test]
fn widen_app_cbz_to_six_raw_bytes() {
    let mut list = InstrList::new();
    let data = InstructionData::new(
        Opcode::CompareBranchZero { negate: false },
        "cbz",
        IsaMode::T32,
        Translation::App(0x1000),
    )
    .with_srcs([Operand::Reg(Reg::R3), Operand::Branch(BranchTarget::AppAddr(0x1040))]);
    let at = list.append_data(data);
    let result = mangle::widen_cbz(&mut list, at, true).unwrap();
    let raw = list.data(result).raw_bytes.clone().unwrap();
    assert_eq!(raw.len(), 6);
}

#[test]
fn bl_materializes_return_address_then_branches() {
    let mut list = InstrList::new();
    let data = InstructionData::new(
        Opcode::BranchLinkImm { mode_switch: false },
        "bl",
        IsaMode::T32,
        Translation::App(0x2000),
    );
    let at = list.append_data(data);
    let mut cursor = ListCursor::at(&mut list, at);
    mangle::mangle_direct_call(&mut cursor, 0x6000, false, &cfg()).unwrap();

    let order: Vec<_> = cursor.list.iter().collect();
    assert!(order.len() >= 2);
    let last = cursor.list.data(*order.last().unwrap());
    assert_eq!(last.opcode, Opcode::Branch);
    assert_eq!(last.srcs[0], Operand::Branch(BranchTarget::AppAddr(0x6000)));
}

#[test]
fn pop_r0_r3_pc_normalizes_to_ldmia_then_pop_pc() {
    let mut list = InstrList::new();
    let mut reglist = RegList::empty();
    for r in [Reg::R0, Reg::R1, Reg::R2, Reg::R3, Reg::PC] {
        reglist.insert(r);
    }
    let data = InstructionData::new(Opcode::Pop, "pop", IsaMode::A32, Translation::App(0x3000))
        .with_srcs([Operand::Mem(MemOperand::simple(Reg::SP, 0))])
        .with_dsts([Operand::RegList(reglist), Operand::Reg(Reg::SP)]);
    let at = list.append_data(data);
    let mut cursor = ListCursor::at(&mut list, at);
    mangle::mangle_ldm_write(&mut cursor, &cfg()).unwrap();

    let mnemonics: Vec<&str> = list.iter().map(|i| list.data(i).mnemonic).collect();
    assert!(mnemonics.contains(&"ldmia"));
    assert!(mnemonics.iter().any(|m| *m == "pop"));
}

#[test]
fn relocates_ldr_from_pc() {
    let mut list = InstrList::new();
    let data = InstructionData::new(Opcode::DataOrMem, "ldr", IsaMode::A32, Translation::App(0x4000))
        .with_dsts([Operand::Reg(Reg::R1)])
        .with_srcs([Operand::Mem(MemOperand::simple(Reg::PC, 8))]);
    let at = list.append_data(data);
    let mut cursor = ListCursor::at(&mut list, at);
    mangle::mangle_rel_addr(&mut cursor, &cfg()).unwrap();

    match list.data(at).srcs[0] {
        Operand::Mem(m) => assert_ne!(m.base, Reg::PC),
        _ => panic!("expected a mem operand"),
    }
}

#[test]
fn mov_from_stolen_reg_collapses_to_tls_load() {
    let mut list = InstrList::new();
    let data = InstructionData::new(Opcode::DataOrMem, "mov", IsaMode::A32, Translation::App(0x5000))
        .with_predicate(Predicate::Al)
        .with_dsts([Operand::Reg(Reg::R5)])
        .with_srcs([Operand::Reg(cfg().stolen_reg())]);
    let at = list.append_data(data);
    let mut cursor = ListCursor::at(&mut list, at);
    assert!(mangle::stolen_reg::try_stolen_mov_peephole(&mut cursor, &cfg()));
    assert_eq!(list.data(at).mnemonic, "ldr");
    assert_eq!(list.iter().count(), 1);
}

#[test]
fn clone_syscall_gets_cbnz_and_jump_and_parent_label() {
    let mut list = InstrList::new();
    let data = InstructionData::new(Opcode::Syscall, "svc", IsaMode::T32, Translation::App(0x6000));
    let at = list.append_data(data);
    let mut cursor = ListCursor::at(&mut list, at);
    mangle::mangle_insert_clone_code(&mut cursor, 0x9000, &cfg()).unwrap();

    assert!(list.data(at).translation.is_meta());
    let mnemonics: Vec<&str> = list.iter().map(|i| list.data(i).mnemonic).collect();
    assert!(mnemonics.contains(&"cbnz"));
    assert!(mnemonics.contains(&"label"));
}

#[test]
fn reference_codec_round_trips() {
    let codec = ReferenceCodec;
    let mut buf = [0u8; 4];
    codec.encode_raw_jmp(IsaMode::A32, 0x7000, 0x7400, &mut buf);
    assert_eq!(codec.decode_raw_jmp_target(0x7000, &buf), 0x7400);
}
