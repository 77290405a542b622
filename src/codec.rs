//! Decoder/encoder seam.
//!
//! The mangler never decodes or encodes application bytes itself; it consumes whatever
//! upstream decoder produced its `InstrList` and hands back operand edits. The handful of
//! places that still need raw bytes (computing the architectural PC-read value, encoding a
//! widened short branch) go through this trait so an embedder can swap in a real ARM
//! decoder/encoder without touching any mangle routine.

use crate::isa::IsaMode;

/// Decode-time and encode-time helpers a real frontend/backend supplies.
///
/// The reference values used by this crate's own tests come from `ReferenceCodec`, a minimal
/// stand-in sufficient for round-trip testing within this crate; it is not a substitute for a
/// real ARM instruction encoder in an embedder.
pub trait Codec {
    /// The architectural value r15 reads as, for an instruction decoded at `pc` in `mode`.
    /// A32 always reads `pc + 8`; T32 reads `pc + 4` rounded down to a word boundary.
    fn decode_cur_pc(&self, mode: IsaMode, pc: u32) -> u32 {
        mode.cur_pc(pc)
    }

    /// Decode the absolute target of a previously-encoded unconditional `b`, given the PC it
    /// sits at.
    fn decode_raw_jmp_target(&self, pc: u32, raw: &[u8; 4]) -> u32;

    /// Encode a 4-byte unconditional `b` from `pc` to `target` into `buf`.
    fn encode_raw_jmp(&self, mode: IsaMode, pc: u32, target: u32, buf: &mut [u8; 4]);
}

/// A minimal reference codec matching the A32 `b`/`bl` encoding (bits 31:28 = 0xE, bits 27:24
/// = 0xA, signed 24-bit word-granularity offset). Sufficient for this crate's own tests; an
/// embedder with a real disassembler/assembler should implement `Codec` directly instead.
#[derive(Copy, Clone, Debug, Default)]
pub struct ReferenceCodec;

impl Codec for ReferenceCodec {
    fn decode_raw_jmp_target(&self, pc: u32, raw: &[u8; 4]) -> u32 {
        let word = u32::from_le_bytes(*raw);
        let imm24 = word & 0x00ff_ffff;
        let signed = ((imm24 << 8) as i32) >> 8;
        pc.wrapping_add(4).wrapping_add((signed << 1) as u32)
    }

    fn encode_raw_jmp(&self, _mode: IsaMode, pc: u32, target: u32, buf: &mut [u8; 4]) {
        let rel = (target.wrapping_sub(pc.wrapping_add(4)) as i32) >> 1;
        let imm24 = (rel as u32) & 0x00ff_ffff;
        let word = 0xea00_0000u32 | imm24;
        buf.copy_from_slice(&word.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_codec_round_trips_a_jump_target() {
        let codec = ReferenceCodec;
        let mut buf = [0u8; 4];
        codec.encode_raw_jmp(IsaMode::A32, 0x1000, 0x2000, &mut buf);
        assert_eq!(codec.decode_raw_jmp_target(0x1000, &buf), 0x2000);
    }

    #[test]
    fn decode_cur_pc_delegates_to_isa_mode() {
        let codec = ReferenceCodec;
        assert_eq!(codec.decode_cur_pc(IsaMode::A32, 0x100), IsaMode::A32.cur_pc(0x100));
    }
}
