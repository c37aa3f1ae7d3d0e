use std::fmt;

/// Instruction set of the VM.
///
/// The discriminants are the opcode numbers stored in the low 48 bits of an
/// instruction's control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Opcode {
    // ========================================
    // Memory
    // ========================================
    Put = 0,
    Cls = 1,
    St = 2,
    Mst = 3,
    Ld = 4,
    Mld = 5,
    Swp = 6,

    // ========================================
    // Arithmetic
    // ========================================
    Add = 7,
    Sub = 8,
    Neg = 9,
    Mul = 10,
    Div = 11,
    Mod = 12,

    // ========================================
    // Strings
    // ========================================
    Len = 13,
    Ins = 14,
    Cat = 15,
    Sbs = 16,
    Cmp = 17,
    Casi = 18,
    Iasc = 19,
    Stoi = 20,
    Itos = 21,

    // ========================================
    // Control Flow
    // ========================================
    Jmp = 22,
    Jb = 23,
    Je = 24,
    Ja = 25,

    // ========================================
    // Misc
    // ========================================
    Nop = 26,
    Type = 27,
    /// Reserved; has no execution semantics and traps when reached.
    Run = 28,
}

/// Operand count accepted by an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    /// Either of the two counts.
    Either(usize, usize),
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exactly(n) => n == count,
            Arity::Either(a, b) => count == a || count == b,
        }
    }

    /// The count reported in diagnostics.
    pub fn expected(self) -> usize {
        match self {
            Arity::Exactly(n) => n,
            Arity::Either(_, b) => b,
        }
    }
}

impl Opcode {
    pub const ALL: [Opcode; 29] = [
        Opcode::Put,
        Opcode::Cls,
        Opcode::St,
        Opcode::Mst,
        Opcode::Ld,
        Opcode::Mld,
        Opcode::Swp,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Neg,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Mod,
        Opcode::Len,
        Opcode::Ins,
        Opcode::Cat,
        Opcode::Sbs,
        Opcode::Cmp,
        Opcode::Casi,
        Opcode::Iasc,
        Opcode::Stoi,
        Opcode::Itos,
        Opcode::Jmp,
        Opcode::Jb,
        Opcode::Je,
        Opcode::Ja,
        Opcode::Nop,
        Opcode::Type,
        Opcode::Run,
    ];

    /// Decode an opcode number. Unknown numbers are not an error here;
    /// the engine traps on them when they are reached.
    pub fn from_code(code: u64) -> Option<Opcode> {
        usize::try_from(code)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn code(self) -> u64 {
        self as u64
    }

    /// Returns the mnemonic, as used by the assembler and in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Put => "PUT",
            Opcode::Cls => "CLS",
            Opcode::St => "ST",
            Opcode::Mst => "MST",
            Opcode::Ld => "LD",
            Opcode::Mld => "MLD",
            Opcode::Swp => "SWP",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Neg => "NEG",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Mod => "MOD",
            Opcode::Len => "LEN",
            Opcode::Ins => "INS",
            Opcode::Cat => "CAT",
            Opcode::Sbs => "SBS",
            Opcode::Cmp => "CMP",
            Opcode::Casi => "CASI",
            Opcode::Iasc => "IASC",
            Opcode::Stoi => "STOI",
            Opcode::Itos => "ITOS",
            Opcode::Jmp => "JMP",
            Opcode::Jb => "JB",
            Opcode::Je => "JE",
            Opcode::Ja => "JA",
            Opcode::Nop => "NOP",
            Opcode::Type => "TYPE",
            Opcode::Run => "RUN",
        }
    }

    pub fn arity(self) -> Arity {
        match self {
            Opcode::Neg | Opcode::Len | Opcode::Iasc | Opcode::Nop => Arity::Exactly(0),
            Opcode::Put
            | Opcode::Cls
            | Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Cat
            | Opcode::Cmp
            | Opcode::Casi
            | Opcode::Stoi
            | Opcode::Itos
            | Opcode::Jmp
            | Opcode::Jb
            | Opcode::Ja
            | Opcode::Run => Arity::Exactly(1),
            Opcode::St
            | Opcode::Mst
            | Opcode::Ld
            | Opcode::Mld
            | Opcode::Swp
            | Opcode::Ins
            | Opcode::Sbs
            | Opcode::Je => Arity::Exactly(2),
            Opcode::Type => Arity::Either(0, 1),
        }
    }

    pub fn is_reserved(self) -> bool {
        matches!(self, Opcode::Run)
    }

    /// Whether operand 0 is a jump target.
    pub fn is_jump(self) -> bool {
        matches!(self, Opcode::Jmp | Opcode::Jb | Opcode::Je | Opcode::Ja)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
