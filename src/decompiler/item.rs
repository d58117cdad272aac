use crate::bytecode::DataType;
use crate::bytecode::op::{Opcode, format_operand};

/// Precedence of a plain variable, literal or call.
pub const PREC_ATOM: u8 = 0xff;

#[derive(Debug, Clone, PartialEq)]
pub struct OpcodeData {
    /// Raw opcode word; may be outside the opcode table.
    pub word: u16,
    pub arg: u16,
    /// Label or import name the operand resolves to.
    pub jump_target: Option<String>,
    pub jump_target_pos: u16,
}

impl OpcodeData {
    pub fn op(&self) -> Option<Opcode> {
        Opcode::from_word(self.word)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperatorData {
    pub opcode: Opcode,
    /// Number of expressions the operator consumes.
    pub needed: usize,
    /// Whether combining yields an expression rather than a statement.
    pub returns: bool,
    pub returned_type: DataType,
    pub prec: u8,
    /// STO operands arrive swapped.
    pub swap: bool,
    /// Call target position or import id.
    pub target: u16,
    pub target_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatementData {
    pub text: String,
    pub indent_before: i32,
    pub indent_after: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionData {
    pub text: String,
    pub is_address: bool,
    /// Produced by a bare PUSHI; `value` holds the immediate.
    pub is_immediate: bool,
    pub value: u16,
    pub prec: u8,
}

impl ExpressionData {
    pub fn new(text: impl Into<String>, is_address: bool) -> Self {
        Self {
            text: text.into(),
            is_address,
            is_immediate: false,
            value: 0,
            prec: PREC_ATOM,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    Opcode(OpcodeData),
    FuncStart,
    FuncEnd,
    Operator(OperatorData),
    Statement(StatementData),
    Expression(ExpressionData),
}

/// One element of the code graph.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphItem {
    /// Code position of the instruction this item came from.
    pub pos: u16,
    pub label: Option<String>,
    pub xrefs: u32,
    pub processed: bool,
    pub kind: ItemKind,
}

impl GraphItem {
    pub fn new(pos: u16, kind: ItemKind) -> Self {
        Self {
            pos,
            label: None,
            xrefs: 0,
            processed: false,
            kind,
        }
    }

    pub fn opcode(&self) -> Option<&OpcodeData> {
        match &self.kind {
            ItemKind::Opcode(data) => Some(data),
            _ => None,
        }
    }

    pub fn opcode_mut(&mut self) -> Option<&mut OpcodeData> {
        match &mut self.kind {
            ItemKind::Opcode(data) => Some(data),
            _ => None,
        }
    }

    /// Opcode item holding `op`, processed or not.
    pub fn is_opcode(&self, op: Opcode) -> bool {
        self.opcode().is_some_and(|data| data.word == op.word())
    }

    pub fn operator(&self) -> Option<&OperatorData> {
        match &self.kind {
            ItemKind::Operator(data) => Some(data),
            _ => None,
        }
    }

    pub fn expression(&self) -> Option<&ExpressionData> {
        match &self.kind {
            ItemKind::Expression(data) => Some(data),
            _ => None,
        }
    }

    pub fn expression_mut(&mut self) -> Option<&mut ExpressionData> {
        match &mut self.kind {
            ItemKind::Expression(data) => Some(data),
            _ => None,
        }
    }

    pub fn statement(&self) -> Option<&StatementData> {
        match &self.kind {
            ItemKind::Statement(data) => Some(data),
            _ => None,
        }
    }

    /// Unprocessed expression still waiting for an operator or a statement.
    pub fn is_open_expression(&self) -> bool {
        !self.processed && matches!(self.kind, ItemKind::Expression(_))
    }

    pub fn format(&self) -> String {
        let marker = if self.processed { "   // " } else { "" };
        match &self.kind {
            ItemKind::FuncStart => "function start".to_string(),
            ItemKind::FuncEnd => "function end".to_string(),
            ItemKind::Opcode(data) => format_opcode(self.pos, data, self.processed),
            ItemKind::Statement(data) => data.text.clone(),
            ItemKind::Operator(data) => format!(
                "{}operator {}, needs {} expressions, yields {} expression;{} level={}",
                marker,
                data.opcode.mnemonic(),
                data.needed,
                if data.returns { "an" } else { "no" },
                if data.swap { " swaps args;" } else { "" },
                data.prec
            ),
            ItemKind::Expression(data) => format!(
                "{}expression: {} ({}); level={}",
                marker,
                data.text,
                if data.is_address { "address-of" } else { "value-of" },
                data.prec
            ),
        }
    }
}

/// Disassembly line of one instruction, e.g. `   0012 JMP label_0020`.
pub fn format_opcode(pos: u16, data: &OpcodeData, processed: bool) -> String {
    let mut line = String::from("   ");
    if processed {
        line.push_str("// ");
    }
    line.push_str(&format!("{:04x} ", pos));

    let Some(op) = data.op() else {
        line.push_str(&format!("??? (0x{:04x})", data.word));
        return line;
    };
    line.push_str(op.mnemonic());

    match &data.jump_target {
        Some(target) if op.is_jump() || op == Opcode::CallI => {
            line.push(' ');
            line.push_str(target);
        }
        _ => line.push_str(&format_operand(op, data.arg)),
    }
    line
}
