//! Combination of operators with the expressions they consume.

use crate::bytecode::op::Opcode;
use crate::decompiler::builder::CodeGraph;
use crate::decompiler::decompile_error::DecompileError;
use crate::decompiler::func_info::FuncInfo;
use crate::decompiler::graph::ItemId;
use crate::decompiler::item::{ExpressionData, ItemKind, OperatorData};

/// Result of combining one operator.
enum Combined {
    Expression(ExpressionData),
    Statement(String),
}

impl CodeGraph {
    pub(crate) fn combine_operators(&mut self, info: &FuncInfo) -> Result<(), DecompileError> {
        while let Some(oper) = self.next_open_operator(info) {
            let Some(data) = self.graph[oper].operator().cloned() else {
                break;
            };

            let (exprs, statement_between) = self.collect_expressions(info.start_item, oper, &data)?;

            // a statement in between means the expressions were set up as
            // temporaries; keep the result where the operator is
            let insert_at = match exprs.last() {
                Some((earliest, _)) if !statement_between => *earliest,
                _ => oper,
            };

            let values: Vec<ExpressionData> = exprs.iter().map(|(_, e)| e.clone()).collect();
            match self.combine(oper, &data, values, info.end_item)? {
                Combined::Expression(expr) => {
                    let new_id = self.add_expression(insert_at, expr);
                    if let Some((earliest, _)) = exprs.last() {
                        if self.graph[new_id].label.is_none() {
                            self.graph[new_id].label = self.graph[*earliest].label.take();
                        }
                    }
                }
                Combined::Statement(text) => {
                    self.add_statement(insert_at, text, false);
                }
            }

            self.graph[oper].processed = true;
            for (id, _) in &exprs {
                self.graph[*id].processed = true;
            }
        }
        Ok(())
    }

    fn next_open_operator(&self, info: &FuncInfo) -> Option<ItemId> {
        let mut cur = Some(info.start_item);
        while let Some(id) = cur {
            if id == info.end_item {
                return None;
            }
            let item = &self.graph[id];
            if !item.processed && matches!(item.kind, ItemKind::Operator(_)) {
                return Some(id);
            }
            cur = self.graph.next(id);
        }
        None
    }

    /// Open expressions before `oper`, nearest first.
    fn collect_expressions(
        &self,
        start: ItemId,
        oper: ItemId,
        data: &OperatorData,
    ) -> Result<(Vec<(ItemId, ExpressionData)>, bool), DecompileError> {
        let mut exprs = Vec::with_capacity(data.needed);
        let mut statement_between = false;

        let mut cur = self.graph.prev(oper);
        while let Some(id) = cur {
            if id == start || exprs.len() == data.needed {
                break;
            }
            let item = &self.graph[id];
            match &item.kind {
                ItemKind::Expression(expr) if !item.processed => exprs.push((id, expr.clone())),
                ItemKind::Statement(_) => statement_between = true,
                _ => {}
            }
            cur = self.graph.prev(id);
        }

        if exprs.len() < data.needed {
            return Err(DecompileError::MissingExpressions {
                mnemonic: data.opcode.mnemonic(),
                pos: self.graph[oper].pos,
                needed: data.needed,
                found: exprs.len(),
            });
        }
        Ok((exprs, statement_between))
    }

    fn combine(
        &self,
        oper: ItemId,
        data: &OperatorData,
        mut exprs: Vec<ExpressionData>,
        stop: ItemId,
    ) -> Result<Combined, DecompileError> {
        let combined = match data.opcode {
            Opcode::Call | Opcode::CallI => self.combine_call(data, exprs),
            Opcode::SaveReg => Combined::Statement(format!("return {};", exprs[0].text)),
            Opcode::FetchM => {
                let mut value = exprs.swap_remove(0);
                value.is_address = false;
                Combined::Expression(value)
            }
            Opcode::Offset => {
                self.immediate_to_global(&mut exprs[0]);
                Combined::Expression(ExpressionData::new(
                    format!("{}[{}]", exprs[0].text, exprs[1].text),
                    true,
                ))
            }
            Opcode::OpNeg => Combined::Expression(unary(data, "-", &exprs[0])),
            Opcode::OpNot => Combined::Expression(unary(data, "!", &exprs[0])),
            op if op.is_binary_operator() => Combined::Expression(binary(data, &exprs[1], &exprs[0])),
            Opcode::SayOp => Combined::Statement(self.say_text(&exprs[0])),
            Opcode::Sto => self.combine_assignment(oper, data, exprs, stop),
            op => {
                return Err(DecompileError::UnexpectedOperator {
                    mnemonic: op.mnemonic(),
                    pos: self.graph[oper].pos,
                });
            }
        };
        Ok(combined)
    }

    fn combine_call(&self, data: &OperatorData, mut args: Vec<ExpressionData>) -> Combined {
        let name = match data.opcode {
            Opcode::CallI => match self.image.imported_funcs.get(&data.target) {
                Some(import) => import.name.clone(),
                None => format!("import_{:04x}", data.target),
            },
            _ if data.target_name.is_empty() => format!("func_{:04x}", data.target),
            _ => data.target_name.clone(),
        };

        // arguments are passed by reference; immediates are global slots
        for arg in &mut args {
            self.immediate_to_global(arg);
        }
        let args = args.iter().map(|a| a.text.as_str()).collect::<Vec<_>>().join(", ");

        if data.returns {
            Combined::Expression(ExpressionData::new(format!("{}({})", name, args), false))
        } else {
            Combined::Statement(format!("{}({});", name, args))
        }
    }

    fn say_text(&self, expr: &ExpressionData) -> String {
        match self.image.strings.get(expr.value as usize) {
            Some(text) if expr.is_immediate => format!("say(\"{}\");", text.replace('\n', "\\n")),
            _ => format!("say({});", expr.text),
        }
    }

    fn combine_assignment(
        &self,
        oper: ItemId,
        data: &OperatorData,
        mut exprs: Vec<ExpressionData>,
        stop: ItemId,
    ) -> Combined {
        let mut lvalue = exprs.pop().unwrap_or_else(|| ExpressionData::new("", true));
        let mut rvalue = exprs.pop().unwrap_or_else(|| ExpressionData::new("", false));
        if data.swap {
            std::mem::swap(&mut lvalue, &mut rvalue);
        }
        self.immediate_to_global(&mut lvalue);

        if let Some(text) = self.menu_string(oper, stop, &lvalue, &rvalue) {
            return Combined::Statement(format!(
                "{} = \"{}\"; // {}",
                lvalue.text, text, rvalue.value
            ));
        }
        Combined::Statement(format!("{} = {};", lvalue.text, rvalue.text))
    }

    /// String for an immediate stored into an array that feeds the next
    /// `babl_menu` / `babl_fmenu` call.
    fn menu_string(
        &self,
        oper: ItemId,
        stop: ItemId,
        lvalue: &ExpressionData,
        rvalue: &ExpressionData,
    ) -> Option<&str> {
        if !rvalue.is_immediate || !lvalue.text.contains('[') {
            return None;
        }

        let mut cur = self.graph.next(oper);
        let call = loop {
            let id = cur.filter(|id| *id != stop)?;
            if let Some(data) = self.graph[id].operator() {
                if data.opcode == Opcode::CallI {
                    break data;
                }
            }
            cur = self.graph.next(id);
        };

        let name = self.image.imported_funcs.get(&call.target)?.name.as_str();
        if name != "babl_menu" && name != "babl_fmenu" {
            return None;
        }
        // id 0 terminates the menu list
        if rvalue.value == 0 {
            return None;
        }
        self.image.strings.get(rvalue.value as usize).map(String::as_str)
    }

    fn immediate_to_global(&self, expr: &mut ExpressionData) {
        if !expr.is_immediate {
            return;
        }
        expr.text = self.memory_var_name(expr.value);
        expr.is_immediate = false;
        expr.value = 0;
        expr.is_address = true;
    }
}

fn binary(data: &OperatorData, lhs: &ExpressionData, rhs: &ExpressionData) -> ExpressionData {
    let (lhs, rhs) = if data.opcode == Opcode::TstEq && lhs.is_immediate {
        (rhs, lhs)
    } else {
        (lhs, rhs)
    };
    let text = format!(
        "{} {} {}",
        operand(data.prec, lhs),
        data.opcode.info().operator.unwrap_or("?"),
        operand(data.prec, rhs)
    );
    ExpressionData {
        prec: data.prec.min(lhs.prec).min(rhs.prec),
        ..ExpressionData::new(text, false)
    }
}

fn unary(data: &OperatorData, prefix: &str, expr: &ExpressionData) -> ExpressionData {
    ExpressionData {
        prec: data.prec.min(expr.prec),
        ..ExpressionData::new(format!("{}{}", prefix, operand(data.prec, expr)), false)
    }
}

/// Operand text, parenthesized when it binds looser than the operator.
fn operand(prec: u8, expr: &ExpressionData) -> String {
    if prec > expr.prec {
        format!("({})", expr.text)
    } else {
        expr.text.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::asm::Asm;
    use crate::bytecode::{ConvImage, DataType, ImportedItem};

    fn image(asm: &Asm) -> ConvImage {
        let mut image = ConvImage::new(asm.finish());
        image.globals_reserved = 8;
        image.strings = vec!["".into(), "Hello\nthere".into(), "Yes".into(), "No".into()];
        image
            .imported_funcs
            .insert(0, ImportedItem::new("babl_menu", DataType::Int));
        image
            .imported_funcs
            .insert(1, ImportedItem::new("random", DataType::Int));
        image
    }

    fn combined(locals: u16, body: impl FnOnce(&mut Asm)) -> Result<Vec<String>, DecompileError> {
        let mut asm = Asm::new();
        asm.prologue(locals);
        body(&mut asm);
        asm.epilogue();

        let mut cg = CodeGraph::new(&image(&asm))?;
        cg.find_all_functions();
        let mut info = cg.functions["main"].clone();
        cg.analyze_function(&mut info)?;
        cg.combine_operators(&info)?;

        Ok(cg
            .graph
            .iter()
            .filter(|(_, item)| !item.processed)
            .filter_map(|(_, item)| match &item.kind {
                ItemKind::Statement(s) => Some(s.text.clone()),
                ItemKind::Expression(e) => Some(format!("expr {}", e.text)),
                _ => None,
            })
            .collect())
    }

    #[test]
    fn test_say_escapes_newlines() {
        let lines = combined(0, |a| {
            a.pushi(1).op(Opcode::SayOp);
        })
        .unwrap();
        assert_eq!(lines, vec!["say(\"Hello\\nthere\");"]);
    }

    #[test]
    fn test_assignment_of_sum() {
        let lines = combined(2, |a| {
            a.op_arg(Opcode::PushIEff, 1);
            a.pushi(2).op(Opcode::FetchM).pushi(3).op(Opcode::OpAdd);
            a.op(Opcode::Sto);
        })
        .unwrap();
        assert_eq!(lines, vec!["local_1 = global_2 + 3;"]);
    }

    #[test]
    fn test_parenthesize_looser_operand() {
        // (global_1 + 2) * 3
        let lines = combined(1, |a| {
            a.op_arg(Opcode::PushIEff, 0);
            a.pushi(1).op(Opcode::FetchM).pushi(2).op(Opcode::OpAdd);
            a.pushi(3).op(Opcode::OpMul);
            a.op(Opcode::Sto);
        })
        .unwrap();
        assert_eq!(lines, vec!["local_0 = (global_1 + 2) * 3;"]);
    }

    #[test]
    fn test_tighter_operand_stays_bare() {
        // global_1 + 2 * 3
        let lines = combined(1, |a| {
            a.op_arg(Opcode::PushIEff, 0);
            a.pushi(1).op(Opcode::FetchM);
            a.pushi(2).pushi(3).op(Opcode::OpMul);
            a.op(Opcode::OpAdd);
            a.op(Opcode::Sto);
        })
        .unwrap();
        assert_eq!(lines, vec!["local_0 = global_1 + 2 * 3;"]);
    }

    #[test]
    fn test_immediate_moves_right_of_equality() {
        let lines = combined(1, |a| {
            a.op_arg(Opcode::PushIEff, 0);
            a.pushi(1).pushi(4).op(Opcode::FetchM).op(Opcode::TstEq);
            a.op(Opcode::Sto);
        })
        .unwrap();
        assert_eq!(lines, vec!["local_0 = global_4 == 1;"]);
    }

    #[test]
    fn test_negation_and_swap() {
        let lines = combined(1, |a| {
            a.pushi(5).op(Opcode::FetchM).op(Opcode::OpNeg);
            a.op_arg(Opcode::PushIEff, 0).op(Opcode::Swap).op(Opcode::Sto);
        })
        .unwrap();
        assert_eq!(lines, vec!["local_0 = -global_5;"]);
    }

    #[test]
    fn test_intrinsic_call_with_result() {
        let lines = combined(2, |a| {
            a.op_arg(Opcode::PushIEff, 1);
            a.op_arg(Opcode::PushIEff, 0);
            a.pushi(1).op_arg(Opcode::CallI, 1);
            a.op(Opcode::Pop).op(Opcode::Pop).op(Opcode::PushReg);
            a.op(Opcode::Sto);
        })
        .unwrap();
        assert_eq!(lines, vec!["local_1 = random(local_0);"]);
    }

    #[test]
    fn test_menu_strings_are_resolved() {
        let lines = combined(4, |a| {
            a.pushi(1).op_arg(Opcode::PushIEff, 1).op(Opcode::Offset);
            a.pushi(2).op(Opcode::Sto);
            a.pushi(2).op_arg(Opcode::PushIEff, 1).op(Opcode::Offset);
            a.pushi(0).op(Opcode::Sto);
            a.op_arg(Opcode::PushIEff, 1);
            a.pushi(1).op_arg(Opcode::CallI, 0);
            a.op(Opcode::Pop).op(Opcode::Pop).op(Opcode::PushReg);
            a.op_arg(Opcode::PushIEff, 0).op(Opcode::Swap).op(Opcode::Sto);
        })
        .unwrap();
        assert_eq!(
            lines,
            vec![
                "local_1[1] = \"Yes\"; // 2",
                "local_1[2] = 0;",
                "local_0 = babl_menu(local_1);",
            ]
        );
    }

    #[test]
    fn test_return_statement() {
        let lines = combined(0, |a| {
            a.pushi(7).op(Opcode::SaveReg).op(Opcode::Pop);
        })
        .unwrap();
        assert_eq!(lines, vec!["return 7;"]);
    }

    #[test]
    fn test_missing_expression_is_an_error() {
        let err = combined(0, |a| {
            a.pushi(1).op(Opcode::OpAdd);
        })
        .unwrap_err();
        assert_eq!(
            err,
            DecompileError::MissingExpressions {
                mnemonic: "OPADD",
                pos: 7,
                needed: 2,
                found: 1,
            }
        );
    }

    #[test]
    fn test_statement_between_keeps_result_at_call() {
        // local_0 = 3; then a call taking local_0 set up before the statement
        let lines = combined(2, |a| {
            a.op_arg(Opcode::PushIEff, 1);
            a.op_arg(Opcode::PushIEff, 0).pushi(3).op(Opcode::Sto);
            a.pushi(1).op_arg(Opcode::CallI, 1);
            a.op(Opcode::Pop).op(Opcode::Pop);
        })
        .unwrap();
        assert_eq!(lines, vec!["local_0 = 3;", "random(local_1);"]);
    }
}
