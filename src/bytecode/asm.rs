//! Tiny assembler used by tests to write code segments by hand.

use crate::bytecode::op::Opcode;

#[derive(Debug, Default)]
pub struct Asm {
    pub code: Vec<u16>,
}

impl Asm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Position of the next emitted word.
    pub fn pos(&self) -> u16 {
        self.code.len() as u16
    }

    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.code.push(op.word());
        self
    }

    pub fn op_arg(&mut self, op: Opcode, arg: u16) -> &mut Self {
        self.code.push(op.word());
        self.code.push(arg);
        self
    }

    pub fn pushi(&mut self, v: u16) -> &mut Self {
        self.op_arg(Opcode::PushI, v)
    }

    /// Relative branch to an absolute target.
    pub fn branch(&mut self, op: Opcode, target: u16) -> &mut Self {
        let pos = self.pos();
        self.op_arg(op, target.wrapping_sub(pos).wrapping_sub(1))
    }

    /// Emit a branch with a placeholder offset; returns its position for `patch_branch`.
    pub fn branch_fwd(&mut self, op: Opcode) -> u16 {
        let pos = self.pos();
        self.op_arg(op, 0);
        pos
    }

    pub fn patch_branch(&mut self, at: u16, target: u16) {
        self.code[at as usize + 1] = target.wrapping_sub(at).wrapping_sub(1);
    }

    pub fn jmp_fwd(&mut self) -> u16 {
        let pos = self.pos();
        self.op_arg(Opcode::Jmp, 0);
        pos
    }

    pub fn patch_jmp(&mut self, at: u16, target: u16) {
        self.code[at as usize + 1] = target;
    }

    /// PUSHBP SPTOBP PUSHI #locals ADDSP
    pub fn prologue(&mut self, locals: u16) -> &mut Self {
        self.op(Opcode::PushBp)
            .op(Opcode::SpToBp)
            .pushi(locals)
            .op(Opcode::AddSp)
    }

    /// BPTOSP POPBP RET
    pub fn epilogue(&mut self) -> &mut Self {
        self.op(Opcode::BpToSp).op(Opcode::PopBp).op(Opcode::Ret)
    }

    pub fn finish(&self) -> Vec<u16> {
        self.code.clone()
    }
}
