//! Folding of single instructions into operators and expressions.

use crate::bytecode::DataType;
use crate::bytecode::op::Opcode;
use crate::decompiler::builder::CodeGraph;
use crate::decompiler::decompile_error::DecompileError;
use crate::decompiler::func_info::FuncInfo;
use crate::decompiler::graph::ItemId;
use crate::decompiler::item::{ExpressionData, ItemKind};
use tracing::debug;

const LOCAL_ARRAY: [Opcode; 3] = [Opcode::PushI, Opcode::PushIEff, Opcode::Offset];
const RETURN_VALUE: [Opcode; 2] = [Opcode::SaveReg, Opcode::Pop];

impl CodeGraph {
    pub(crate) fn analyze_function(&mut self, info: &mut FuncInfo) -> Result<(), DecompileError> {
        let stop = info.end_item;
        let mut cur = Some(info.start_item);

        while let Some(id) = cur {
            if id == stop {
                break;
            }
            self.analyze_item(id, stop, info)?;
            cur = self.graph.next(id);
        }
        Ok(())
    }

    fn analyze_item(&mut self, id: ItemId, stop: ItemId, info: &mut FuncInfo) -> Result<(), DecompileError> {
        let item = &self.graph[id];
        if item.processed {
            return Ok(());
        }
        let Some(op) = item.opcode().and_then(|data| data.op()) else {
            return Ok(());
        };

        if self.match_opcode_pattern(id, stop, &LOCAL_ARRAY) {
            self.add_local_array_expression(id, info);
            self.set_opcodes_processed(id, LOCAL_ARRAY.len());
            return Ok(());
        }

        if self.match_opcode_pattern(id, stop, &RETURN_VALUE) {
            self.add_operator(id, 1, false, DataType::Void);
            self.set_opcodes_processed(id, RETURN_VALUE.len());
            info.return_type = DataType::Int;
            return Ok(());
        }

        match op {
            Opcode::SayOp => {
                self.add_operator(id, 1, false, DataType::Void);
            }
            Opcode::ExitOp => {
                self.add_statement(id, "exit;", true);
            }
            Opcode::CallI => self.add_call_operator(id, stop, info, true)?,
            Opcode::Call => self.add_call_operator(id, stop, info, false)?,
            op if op.is_binary_operator() => {
                self.add_operator(id, 2, true, DataType::Int);
            }
            Opcode::OpNeg | Opcode::OpNot | Opcode::FetchM => {
                self.add_operator(id, 1, true, DataType::Int);
            }
            Opcode::Offset => {
                self.add_operator(id, 2, true, DataType::Int);
            }
            Opcode::Sto => self.add_assignment_operator(id),
            Opcode::PushIEff => self.add_local_var_expression(id, info),
            Opcode::PushI => {
                // argument count of an imported call; the call consumes it
                let before_calli = self
                    .graph
                    .next(id)
                    .is_some_and(|next| self.graph[next].is_opcode(Opcode::CallI));
                if !before_calli {
                    self.add_immediate_expression(id);
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// PUSHI offset, PUSHI_EFF local, OFFSET: address of `local_N[offset]`.
    fn add_local_array_expression(&mut self, id: ItemId, info: &mut FuncInfo) {
        let offset = self.opcode_arg(id);
        let local = self.graph.next(id).map_or(0, |next| self.opcode_arg(next));

        self.add_expression(
            id,
            ExpressionData::new(format!("local_{}[{}]", local, offset), true),
        );
        info.add_array_access(local, offset);
    }

    fn add_call_operator(
        &mut self,
        id: ItemId,
        stop: ItemId,
        info: &FuncInfo,
        intrinsic: bool,
    ) -> Result<(), DecompileError> {
        self.graph[id].processed = true;
        let pos = self.graph[id].pos;
        let (target, target_name) = match self.graph[id].opcode() {
            Some(data) => (data.arg, data.jump_target.clone().unwrap_or_default()),
            None => (0, String::new()),
        };

        // for imported calls the operator sits on the PUSHI holding the argument count
        let mut anchor = id;
        if intrinsic {
            anchor = self
                .graph
                .prev(id)
                .filter(|prev| self.graph[*prev].is_opcode(Opcode::PushI))
                .ok_or(DecompileError::MissingArgumentCount { pos })?;
            self.graph[anchor].processed = true;
        }

        let mut arguments = 0usize;
        let mut cur = self.graph.next(id);
        while let Some(next) = cur {
            if next == stop || !self.graph[next].is_opcode(Opcode::Pop) {
                break;
            }
            self.graph[next].processed = true;
            arguments += 1;
            cur = self.graph.next(next);
        }

        let mut returns = false;
        if let Some(next) = cur {
            if next != stop && self.graph[next].is_opcode(Opcode::PushReg) {
                self.graph[next].processed = true;
                returns = true;
            }
        }

        if intrinsic {
            // one of the POPs removes the argument count
            arguments = arguments.saturating_sub(1);
        }

        let returned_type = if returns { DataType::Int } else { DataType::Void };
        let operator = self.add_operator(anchor, arguments, returns, returned_type);
        if let ItemKind::Operator(data) = &mut self.graph[operator].kind {
            data.opcode = if intrinsic { Opcode::CallI } else { Opcode::Call };
            data.prec = Opcode::Call.info().precedence.unwrap_or(data.prec);
            data.target = target;
            data.target_name = target_name.clone();
        }

        if intrinsic {
            return Ok(());
        }

        if target_name == info.name {
            debug!(function = %info.name, pos, "recursive call");
            return Ok(());
        }

        let callee = self
            .functions
            .get_mut(&target_name)
            .ok_or_else(|| DecompileError::UnknownFunction {
                name: target_name.clone(),
                pos,
            })?;
        callee.callers.insert(info.name.clone());
        if !self.processed.contains(&callee.start) {
            self.queue.push_back(target_name);
        }
        Ok(())
    }

    fn add_assignment_operator(&mut self, id: ItemId) {
        self.graph[id].processed = true;

        let mut swap = false;
        if let Some(prev) = self.graph.prev(id) {
            if self.graph[prev].is_opcode(Opcode::Swap) {
                self.graph[prev].processed = true;
                swap = true;
            }
        }

        let operator = self.add_operator(id, 2, false, DataType::Void);
        if let ItemKind::Operator(data) = &mut self.graph[operator].kind {
            data.swap = swap;
        }
    }

    /// PUSHI_EFF: a local or, for negative offsets, a parameter. A following
    /// FETCHM turns the local's address into its value.
    fn add_local_var_expression(&mut self, id: ItemId, info: &mut FuncInfo) {
        let index = self.opcode_arg(id);
        self.graph[id].processed = true;

        let fetch = self.take_following_fetch(id);

        let data = if index > 0x7fff {
            let number = (index as i16).unsigned_abs() - 1;
            info.note_param(number);
            // parameters are passed by reference
            ExpressionData::new(format!("param{}", number), true)
        } else {
            info.set_local_type(index, DataType::Int);
            ExpressionData::new(format!("local_{}", index), !fetch)
        };
        self.add_expression(id, data);
    }

    /// PUSHI: an immediate, or a global's value when FETCHM follows.
    fn add_immediate_expression(&mut self, id: ItemId) {
        let value = self.opcode_arg(id);
        self.graph[id].processed = true;

        let data = if self.take_following_fetch(id) {
            ExpressionData::new(self.memory_var_name(value), false)
        } else {
            ExpressionData {
                is_immediate: true,
                value,
                ..ExpressionData::new(value.to_string(), false)
            }
        };
        self.add_expression(id, data);
    }

    /// Marks a FETCHM right after `id` processed; returns whether there was one.
    fn take_following_fetch(&mut self, id: ItemId) -> bool {
        match self.graph.next(id) {
            Some(next) if self.graph[next].is_opcode(Opcode::FetchM) => {
                self.graph[next].processed = true;
                true
            }
            _ => false,
        }
    }

    fn opcode_arg(&self, id: ItemId) -> u16 {
        self.graph[id].opcode().map_or(0, |data| data.arg)
    }
}
