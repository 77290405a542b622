//! A flat, doubly linked instruction list with arena-backed storage.
//!
//! Cranelift's `Layout` threads instructions through extended basic blocks; the mangler has
//! no basic-block structure of its own; it receives one application instruction at a time
//! from its builder and is allowed to insert/remove neighbors around it. `InstrList` keeps
//! that same arena-plus-links shape without the EBB layer.

use cranelift_entity::PrimaryMap;

use crate::ir::entities::{Inst, Label};
use crate::ir::instr::InstructionData;

#[derive(Clone, Copy, Default)]
struct Links {
    prev: Option<Inst>,
    next: Option<Inst>,
}

/// Owns every instruction and label created during a mangling session, plus the order they
/// appear in.
pub struct InstrList {
    insts: PrimaryMap<Inst, InstructionData>,
    links: PrimaryMap<Inst, Links>,
    labels: PrimaryMap<Label, Option<Inst>>,
    head: Option<Inst>,
    tail: Option<Inst>,
}

impl InstrList {
    pub fn new() -> Self {
        InstrList {
            insts: PrimaryMap::new(),
            links: PrimaryMap::new(),
            labels: PrimaryMap::new(),
            head: None,
            tail: None,
        }
    }

    /// Build the list from an ordered sequence of instructions, as a test fixture would.
    pub fn from_instructions(instrs: impl IntoIterator<Item = InstructionData>) -> Self {
        let mut list = InstrList::new();
        let mut cursor = None;
        for data in instrs {
            let inst = list.insts.push(data);
            list.links.push(Links::default());
            if let Some(prev) = cursor {
                list.insert_after(prev, inst);
            } else {
                list.head = Some(inst);
                list.tail = Some(inst);
            }
            cursor = Some(inst);
        }
        list
    }

    pub fn data(&self, inst: Inst) -> &InstructionData {
        &self.insts[inst]
    }

    pub fn data_mut(&mut self, inst: Inst) -> &mut InstructionData {
        &mut self.insts[inst]
    }

    pub fn first(&self) -> Option<Inst> {
        self.head
    }

    pub fn last(&self) -> Option<Inst> {
        self.tail
    }

    pub fn next(&self, inst: Inst) -> Option<Inst> {
        self.links[inst].next
    }

    pub fn prev(&self, inst: Inst) -> Option<Inst> {
        self.links[inst].prev
    }

    /// Allocate a fresh, unplaced label. `bind` attaches it to an instruction once that
    /// instruction has been inserted.
    pub fn create_label(&mut self) -> Label {
        self.labels.push(None)
    }

    pub fn bind_label(&mut self, label: Label, inst: Inst) {
        self.labels[label] = Some(inst);
    }

    pub fn label_target(&self, label: Label) -> Option<Inst> {
        self.labels[label]
    }

    /// Insert `data` as a new instruction immediately before `at`, returning its reference.
    pub fn insert_before_data(&mut self, at: Inst, data: InstructionData) -> Inst {
        let inst = self.insts.push(data);
        self.links.push(Links::default());
        self.insert_before(at, inst);
        inst
    }

    /// Insert `data` as a new instruction immediately after `at`, returning its reference.
    pub fn insert_after_data(&mut self, at: Inst, data: InstructionData) -> Inst {
        let inst = self.insts.push(data);
        self.links.push(Links::default());
        self.insert_after(at, inst);
        inst
    }

    /// Append `data` at the end of the list, returning its reference.
    pub fn append_data(&mut self, data: InstructionData) -> Inst {
        let inst = self.insts.push(data);
        self.links.push(Links::default());
        match self.tail {
            Some(tail) => self.insert_after(tail, inst),
            None => {
                self.head = Some(inst);
                self.tail = Some(inst);
            }
        }
        inst
    }

    fn insert_before(&mut self, at: Inst, inst: Inst) {
        let prev = self.links[at].prev;
        self.links[inst].prev = prev;
        self.links[inst].next = Some(at);
        self.links[at].prev = Some(inst);
        match prev {
            Some(p) => self.links[p].next = Some(inst),
            None => self.head = Some(inst),
        }
    }

    fn insert_after(&mut self, at: Inst, inst: Inst) {
        let next = self.links[at].next;
        self.links[inst].next = next;
        self.links[inst].prev = Some(at);
        self.links[at].next = Some(inst);
        match next {
            Some(n) => self.links[n].prev = Some(inst),
            None => self.tail = Some(inst),
        }
    }

    /// Unlink `inst` from the list. The instruction's storage is retained (arena entries are
    /// never reclaimed) but it is no longer reachable via `next`/`prev`/`first`/`last`.
    pub fn remove(&mut self, inst: Inst) {
        let Links { prev, next } = self.links[inst];
        match prev {
            Some(p) => self.links[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.links[n].prev = prev,
            None => self.tail = prev,
        }
        self.links[inst] = Links::default();
    }

    /// Iterate the list in execution order from `first()` to `last()`.
    pub fn iter(&self) -> ListIter<'_> {
        ListIter {
            list: self,
            cur: self.head,
        }
    }
}

impl Default for InstrList {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ListIter<'a> {
    list: &'a InstrList,
    cur: Option<Inst>,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = Inst;

    fn next(&mut self) -> Option<Inst> {
        let cur = self.cur?;
        self.cur = self.list.next(cur);
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instr::Translation;
    use crate::ir::opcode::Opcode;
    use crate::isa::IsaMode;

    fn nop() -> InstructionData {
        InstructionData::new(Opcode::Other, "nop", IsaMode::A32, Translation::Meta)
    }

    #[test]
    fn insert_before_and_after_preserve_order() {
        let mut list = InstrList::new();
        let a = list.append_data(nop());
        let c = list.append_data(nop());
        let b = list.insert_before_data(c, nop());

        let order: Vec<Inst> = list.iter().collect();
        assert_eq!(order, vec![a, b, c]);
    }

    #[test]
    fn remove_reknits_links() {
        let mut list = InstrList::new();
        let a = list.append_data(nop());
        let b = list.append_data(nop());
        let c = list.append_data(nop());

        list.remove(b);
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![a, c]);
        assert_eq!(list.next(a), Some(c));
        assert_eq!(list.prev(c), Some(a));
    }

    #[test]
    fn remove_head_and_tail() {
        let mut list = InstrList::new();
        let a = list.append_data(nop());
        let b = list.append_data(nop());
        list.remove(a);
        assert_eq!(list.first(), Some(b));
        list.remove(b);
        assert_eq!(list.first(), None);
        assert_eq!(list.last(), None);
    }

    #[test]
    fn labels_bind_after_creation() {
        let mut list = InstrList::new();
        let label = list.create_label();
        assert_eq!(list.label_target(label), None);
        let inst = list.append_data(nop());
        list.bind_label(label, inst);
        assert_eq!(list.label_target(label), Some(inst));
    }
}
