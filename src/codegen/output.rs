//! Per-method output buffer.
//!
//! One slot per SBIL instruction, each holding an optional comment, the
//! emitted code and a label-required flag. Branch emitters flag target
//! slots before those slots are written; `assemble` walks the slots in
//! order and brackets them with the preamble and postamble.

#[derive(Debug, Clone, Default)]
struct Slot {
    comment: Option<String>,
    code: Option<String>,
    needs_label: bool,
}

/// Mutable scratchpad for a single method compile. Discarded once the
/// assembled text is appended to the global stream.
#[derive(Debug)]
pub struct OutputWriter {
    label_prefix: String,
    slots: Vec<Slot>,
    preamble: Vec<String>,
    postamble: Vec<String>,
}

impl OutputWriter {
    pub fn new(label_prefix: impl Into<String>, instruction_count: usize) -> Self {
        OutputWriter {
            label_prefix: label_prefix.into(),
            slots: vec![Slot::default(); instruction_count],
            preamble: Vec::new(),
            postamble: Vec::new(),
        }
    }

    pub fn label_prefix(&self) -> &str {
        &self.label_prefix
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// The label a branch uses to reach instruction `index`.
    pub fn label_name(&self, index: usize) -> String {
        format!("{}_il_{index}", self.label_prefix)
    }

    /// Flag instruction `index` as a branch target. Idempotent.
    pub fn require_label(&mut self, index: usize) {
        self.slots[index].needs_label = true;
    }

    pub fn has_label(&self, index: usize) -> bool {
        self.slots[index].needs_label
    }

    /// Append a line (or several) of code to a slot.
    pub fn append_code(&mut self, index: usize, code: &str) {
        let slot = &mut self.slots[index];
        match &mut slot.code {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(code);
            }
            None => slot.code = Some(code.to_string()),
        }
    }

    pub fn set_comment(&mut self, index: usize, comment: impl Into<String>) {
        self.slots[index].comment = Some(comment.into());
    }

    pub fn code_at(&self, index: usize) -> Option<&str> {
        self.slots[index].code.as_deref()
    }

    pub fn push_preamble(&mut self, line: impl Into<String>) {
        self.preamble.push(line.into());
    }

    pub fn push_postamble(&mut self, line: impl Into<String>) {
        self.postamble.push(line.into());
    }

    /// Assemble preamble, slots and postamble into final text.
    pub fn assemble(&self) -> String {
        let mut lines: Vec<String> = Vec::new();
        lines.extend(self.preamble.iter().cloned());
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(comment) = &slot.comment {
                lines.push(format!("# {comment}"));
            }
            if slot.needs_label {
                lines.push(format!("{}:", self.label_name(index)));
            }
            if let Some(code) = &slot.code {
                lines.push(code.clone());
            }
        }
        lines.extend(self.postamble.iter().cloned());
        lines.join("\n")
    }
}
