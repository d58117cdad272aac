// =============================================================================
// OPCODE TABLE - conversation bytecode instruction set
// =============================================================================

/// Static description of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    pub mnemonic: &'static str,
    /// Number of immediate words following the opcode (0 or 1).
    pub operands: u8,
    /// printf-like operand format used in listings.
    pub format: &'static str,
    /// Infix text when the opcode is an expression operator.
    pub operator: Option<&'static str>,
    /// Binding strength; higher binds tighter. `None` for non-operators.
    pub precedence: Option<u8>,
}

const fn plain(mnemonic: &'static str) -> OpcodeInfo {
    OpcodeInfo {
        mnemonic,
        operands: 0,
        format: "",
        operator: None,
        precedence: None,
    }
}

const fn imm(mnemonic: &'static str, format: &'static str) -> OpcodeInfo {
    OpcodeInfo {
        mnemonic,
        operands: 1,
        format,
        operator: None,
        precedence: None,
    }
}

const fn infix(mnemonic: &'static str, text: &'static str, precedence: u8) -> OpcodeInfo {
    OpcodeInfo {
        mnemonic,
        operands: 0,
        format: "",
        operator: Some(text),
        precedence: Some(precedence),
    }
}

const fn ranked(mnemonic: &'static str, operands: u8, format: &'static str, precedence: u8) -> OpcodeInfo {
    OpcodeInfo {
        mnemonic,
        operands,
        format,
        operator: None,
        precedence: Some(precedence),
    }
}

pub const OPCODES: [OpcodeInfo; 0x2a] = [
    plain("NOP"),
    infix("OPADD", "+", 0x79),
    infix("OPMUL", "*", 0x7b),
    infix("OPSUB", "-", 0x79),
    infix("OPDIV", "/", 0x7b),
    infix("OPMOD", "%", 0x7a),
    infix("OPOR", "||", 0x46),
    infix("OPAND", "&&", 0x50),
    infix("OPNOT", "!", 0x5a),
    infix("TSTGT", ">", 0x64),
    infix("TSTGE", ">=", 0x64),
    infix("TSTLT", "<", 0x64),
    infix("TSTLE", "<=", 0x64),
    infix("TSTEQ", "==", 0x64),
    infix("TSTNE", "!=", 0x64),
    imm("JMP", " $%04x"),
    imm("BEQ", " +%04x"),
    imm("BNE", " +%04x"),
    imm("BRA", " +%04x"),
    ranked("CALL", 1, " $%04x", 0x90),
    ranked("CALLI", 1, " $%04x", 0x90),
    plain("RET"),
    imm("PUSHI", " #%04x"),
    imm("PUSHI_EFF", " #%04x"),
    plain("POP"),
    plain("SWAP"),
    plain("PUSHBP"),
    plain("POPBP"),
    plain("SPTOBP"),
    plain("BPTOSP"),
    plain("ADDSP"),
    ranked("FETCHM", 0, "", 0x85),
    ranked("STO", 0, "", 0x20),
    ranked("OFFSET", 0, "", 0xa0),
    plain("START"),
    plain("SAVE_REG"),
    plain("PUSH_REG"),
    plain("STRCMP"),
    plain("EXIT_OP"),
    ranked("SAY_OP", 0, "", 0x90),
    plain("RESPOND_OP"),
    ranked("OPNEG", 0, "", 0x7d),
];

/// Decoded opcode. The discriminant is the opcode word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum Opcode {
    Nop = 0x00,
    OpAdd,
    OpMul,
    OpSub,
    OpDiv,
    OpMod,
    OpOr,
    OpAnd,
    OpNot,
    TstGt,
    TstGe,
    TstLt,
    TstLe,
    TstEq,
    TstNe,
    Jmp,
    Beq,
    Bne,
    Bra,
    Call,
    CallI,
    Ret,
    PushI,
    PushIEff,
    Pop,
    Swap,
    PushBp,
    PopBp,
    SpToBp,
    BpToSp,
    AddSp,
    FetchM,
    Sto,
    Offset,
    Start,
    SaveReg,
    PushReg,
    StrCmp,
    ExitOp,
    SayOp,
    RespondOp,
    OpNeg = 0x29,
}

const DECODE: [Opcode; 0x2a] = [
    Opcode::Nop,
    Opcode::OpAdd,
    Opcode::OpMul,
    Opcode::OpSub,
    Opcode::OpDiv,
    Opcode::OpMod,
    Opcode::OpOr,
    Opcode::OpAnd,
    Opcode::OpNot,
    Opcode::TstGt,
    Opcode::TstGe,
    Opcode::TstLt,
    Opcode::TstLe,
    Opcode::TstEq,
    Opcode::TstNe,
    Opcode::Jmp,
    Opcode::Beq,
    Opcode::Bne,
    Opcode::Bra,
    Opcode::Call,
    Opcode::CallI,
    Opcode::Ret,
    Opcode::PushI,
    Opcode::PushIEff,
    Opcode::Pop,
    Opcode::Swap,
    Opcode::PushBp,
    Opcode::PopBp,
    Opcode::SpToBp,
    Opcode::BpToSp,
    Opcode::AddSp,
    Opcode::FetchM,
    Opcode::Sto,
    Opcode::Offset,
    Opcode::Start,
    Opcode::SaveReg,
    Opcode::PushReg,
    Opcode::StrCmp,
    Opcode::ExitOp,
    Opcode::SayOp,
    Opcode::RespondOp,
    Opcode::OpNeg,
];

impl Opcode {
    /// Decode an opcode word; `None` for words above 0x29.
    pub fn from_word(word: u16) -> Option<Opcode> {
        DECODE.get(word as usize).copied()
    }

    pub fn word(self) -> u16 {
        self as u16
    }

    pub fn info(self) -> &'static OpcodeInfo {
        &OPCODES[self as usize]
    }

    pub fn mnemonic(self) -> &'static str {
        self.info().mnemonic
    }

    pub fn has_operand(self) -> bool {
        self.info().operands > 0
    }

    /// Branches whose operand is an offset relative to the branch.
    pub fn is_relative_branch(self) -> bool {
        matches!(self, Opcode::Beq | Opcode::Bne | Opcode::Bra)
    }

    /// Instructions whose operand names a code position.
    pub fn is_jump(self) -> bool {
        matches!(self, Opcode::Jmp | Opcode::Call) || self.is_relative_branch()
    }

    pub fn is_binary_operator(self) -> bool {
        matches!(
            self,
            Opcode::OpAdd
                | Opcode::OpMul
                | Opcode::OpSub
                | Opcode::OpDiv
                | Opcode::OpMod
                | Opcode::OpOr
                | Opcode::OpAnd
                | Opcode::TstGt
                | Opcode::TstGe
                | Opcode::TstLt
                | Opcode::TstLe
                | Opcode::TstEq
                | Opcode::TstNe
        )
    }
}

/// Absolute target of a jump-like instruction at `pos` with operand `arg`.
///
/// Relative branches count from the operand word.
pub fn jump_target(op: Opcode, pos: u16, arg: u16) -> u16 {
    if op.is_relative_branch() {
        arg.wrapping_add(pos).wrapping_add(1)
    } else {
        arg
    }
}

/// Render the operand the way listings show it, e.g. `JMP $0012`.
pub fn format_operand(op: Opcode, arg: u16) -> String {
    let info = op.info();
    if info.operands == 0 {
        return String::new();
    }
    // every format is " <sigil>%04x"
    let sigil = info.format.chars().nth(1).unwrap_or('#');
    format!(" {}{:04x}", sigil, arg)
}
