/// A branch target inside a bytecode buffer.
///
/// Maps to QEMU's `TCGLabel`. Branches may reference a label before it
/// is placed; each such use is recorded and back-patched with the
/// label's absolute buffer offset once `set_label` runs.
#[derive(Debug, Clone)]
pub struct Label {
    pub id: u32,
    /// Whether this label has been placed.
    pub present: bool,
    /// Absolute offset in the code buffer, valid once `present`.
    pub value: usize,
    /// Forward references waiting for the label's value.
    pub uses: Vec<LabelUse>,
}

/// A forward reference to a label: the offset of the operand field
/// that must receive the label's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelUse {
    pub offset: usize,
    pub kind: RelocKind,
}

/// Width of a label operand field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// 32-bit absolute offset (32-bit host word).
    Abs32,
    /// 64-bit absolute offset (64-bit host word).
    Abs64,
}

impl RelocKind {
    pub const fn size_bytes(self) -> usize {
        match self {
            RelocKind::Abs32 => 4,
            RelocKind::Abs64 => 8,
        }
    }
}

impl Label {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            present: false,
            value: 0,
            uses: Vec::new(),
        }
    }

    /// Record a forward reference to this label.
    pub fn add_use(&mut self, offset: usize, kind: RelocKind) {
        self.uses.push(LabelUse { offset, kind });
    }

    /// Place the label at `offset` and hand back the uses that now
    /// need patching.
    pub fn set_value(&mut self, offset: usize) -> Vec<LabelUse> {
        assert!(!self.present, "label {} placed twice", self.id);
        self.present = true;
        self.value = offset;
        std::mem::take(&mut self.uses)
    }

    /// Whether there are references the label has not resolved yet.
    pub fn has_pending_uses(&self) -> bool {
        !self.present && !self.uses.is_empty()
    }
}
