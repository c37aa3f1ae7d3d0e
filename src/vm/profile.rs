use super::ops::Opcode;

/// Per-opcode execution counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpcodeProfile {
    counts: [u64; Opcode::ALL.len()],
}

impl OpcodeProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, op: Opcode) {
        self.counts[op as usize] += 1;
    }

    pub fn count(&self, op: Opcode) -> u64 {
        self.counts[op as usize]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Executed opcodes, most frequent first; ties keep opcode order.
    pub fn sorted(&self) -> Vec<(Opcode, u64)> {
        let mut entries: Vec<(Opcode, u64)> = Opcode::ALL
            .iter()
            .map(|&op| (op, self.count(op)))
            .filter(|&(_, n)| n > 0)
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        entries
    }

    pub fn report(&self) -> String {
        let total = self.total();
        let mut out = String::from("== Opcode Profile ==\n");
        for (op, count) in self.sorted() {
            let pct = count as f64 * 100.0 / total as f64;
            out.push_str(&format!("  {:<6} {:>12} {:>6.2}%\n", op.name(), count, pct));
        }
        out.push_str(&format!("  {:<6} {:>12}\n", "total", total));
        out
    }
}
