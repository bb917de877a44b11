use std::fmt;

/// Opcodes of the instruction set.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum Op {
    Push,
    Pop,
    Add,
    Sub,
    Mul,
    Div,
    Store,
    Load,
    Jmp,
    Jz,
    Jnz,
    Call,
    Ret,
    Print,
    Halt,
}

impl Op {
    /// Every opcode, in declaration order. This is the mnemonic table.
    pub const ALL: [Op; 15] = [
        Op::Push,
        Op::Pop,
        Op::Add,
        Op::Sub,
        Op::Mul,
        Op::Div,
        Op::Store,
        Op::Load,
        Op::Jmp,
        Op::Jz,
        Op::Jnz,
        Op::Call,
        Op::Ret,
        Op::Print,
        Op::Halt,
    ];

    pub const fn mnemonic(self) -> &'static str {
        match self {
            Op::Push => "PUSH",
            Op::Pop => "POP",
            Op::Add => "ADD",
            Op::Sub => "SUB",
            Op::Mul => "MUL",
            Op::Div => "DIV",
            Op::Store => "STORE",
            Op::Load => "LOAD",
            Op::Jmp => "JMP",
            Op::Jz => "JZ",
            Op::Jnz => "JNZ",
            Op::Call => "CALL",
            Op::Ret => "RET",
            Op::Print => "PRINT",
            Op::Halt => "HALT",
        }
    }

    /// Look up a mnemonic, ignoring ASCII case.
    pub fn from_mnemonic(word: &str) -> Option<Op> {
        Op::ALL
            .into_iter()
            .find(|op| op.mnemonic().eq_ignore_ascii_case(word))
    }

    /// Whether executing this opcode needs an operand.
    pub const fn takes_operand(self) -> bool {
        matches!(self, Op::Push | Op::Jmp | Op::Jz | Op::Jnz | Op::Call)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
