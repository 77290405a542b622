//! Cursor for editing an `InstrList` in place.
//!
//! Mirrors the shape of a function-layout cursor: a position plus a mutable borrow of the
//! list, with `next_inst`/`insert_before`/`insert_after`/`remove` as the primitive edits
//! every mangle rule is built from.

use crate::ir::{Inst, InstrList, InstructionData};

/// The possible positions of a cursor over a flat instruction list.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CursorPosition {
    /// Not pointing anywhere; `next()` starts from the top of the list.
    Nowhere,
    /// Pointing at an existing instruction.
    At(Inst),
    /// Past the end of the list; new instructions are appended.
    End,
}

pub struct ListCursor<'f> {
    pos: CursorPosition,
    pub list: &'f mut InstrList,
}

impl<'f> ListCursor<'f> {
    pub fn new(list: &'f mut InstrList) -> Self {
        ListCursor {
            pos: CursorPosition::Nowhere,
            list,
        }
    }

    pub fn at(list: &'f mut InstrList, inst: Inst) -> Self {
        ListCursor {
            pos: CursorPosition::At(inst),
            list,
        }
    }

    pub fn position(&self) -> CursorPosition {
        self.pos
    }

    pub fn goto(&mut self, inst: Inst) {
        self.pos = CursorPosition::At(inst);
    }

    pub fn current(&self) -> Option<Inst> {
        match self.pos {
            CursorPosition::At(inst) => Some(inst),
            _ => None,
        }
    }

    /// Advance to the next instruction in the list, updating position.
    pub fn next(&mut self) -> Option<Inst> {
        let next = match self.pos {
            CursorPosition::Nowhere => self.list.first(),
            CursorPosition::At(inst) => self.list.next(inst),
            CursorPosition::End => None,
        };
        self.pos = match next {
            Some(inst) => CursorPosition::At(inst),
            None => CursorPosition::End,
        };
        next
    }

    /// Insert a new instruction immediately before the cursor's current position, without
    /// moving the cursor. Panics if the cursor is not `At` an instruction.
    pub fn insert_before(&mut self, data: InstructionData) -> Inst {
        match self.pos {
            CursorPosition::At(at) => self.list.insert_before_data(at, data),
            _ => panic!("insert_before requires the cursor to be at an instruction"),
        }
    }

    /// Insert a new instruction immediately after the cursor's current position, without
    /// moving the cursor.
    pub fn insert_after(&mut self, data: InstructionData) -> Inst {
        match self.pos {
            CursorPosition::At(at) => self.list.insert_after_data(at, data),
            CursorPosition::End | CursorPosition::Nowhere => self.list.append_data(data),
        }
    }

    /// Remove the instruction under the cursor, leaving the cursor at the following
    /// instruction (or `End`).
    pub fn remove_and_advance(&mut self) -> Inst {
        let inst = self.current().expect("no instruction under cursor");
        let next = self.list.next(inst);
        self.list.remove(inst);
        self.pos = match next {
            Some(n) => CursorPosition::At(n),
            None => CursorPosition::End,
        };
        inst
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{InstructionData, Opcode, Translation};
    use crate::isa::IsaMode;

    fn nop() -> InstructionData {
        InstructionData::new(Opcode::Other, "nop", IsaMode::A32, Translation::Meta)
    }

    #[test]
    fn insert_before_keeps_cursor_position() {
        let mut list = InstrList::new();
        let b = list.append_data(nop());
        let mut cur = ListCursor::at(&mut list, b);
        let a = cur.insert_before(nop());
        assert_eq!(cur.current(), Some(b));
        assert_eq!(cur.list.first(), Some(a));
    }

    #[test]
    fn remove_and_advance_moves_to_next() {
        let mut list = InstrList::new();
        let a = list.append_data(nop());
        let b = list.append_data(nop());
        let mut cur = ListCursor::at(&mut list, a);
        let removed = cur.remove_and_advance();
        assert_eq!(removed, a);
        assert_eq!(cur.current(), Some(b));
    }
}
