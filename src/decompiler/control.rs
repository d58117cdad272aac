//! Recovery of switch, while and if/else blocks from conditional branches.
//!
//! Each pass looks at the open expressions left by combination. A
//! condition is an open expression whose next unprocessed opcode is a BEQ;
//! where the BEQ and the jumps around its target lead decides the shape.
//! Whatever unconditional jumps remain afterwards become `goto`s.

use crate::bytecode::op::Opcode;
use crate::decompiler::builder::CodeGraph;
use crate::decompiler::func_info::FuncInfo;
use crate::decompiler::graph::ItemId;
use tracing::{debug, warn};

impl CodeGraph {
    pub(crate) fn find_switch_case(&mut self, info: &FuncInfo) {
        let stop = info.end_item;
        let mut cur = Some(info.start_item);

        while let Some(id) = cur.filter(|id| *id != stop) {
            if self.graph[id].is_open_expression() {
                self.add_switch(id, stop);
            }
            cur = self.graph.next(id);
        }
    }

    /// Chain `case`s starting at the condition `first` for as long as each
    /// case's BEQ leads to the next comparison before the shared break target.
    fn add_switch(&mut self, first: ItemId, stop: ItemId) {
        let mut switch_end = None;
        let mut expr = first;

        while let Some(next) = self.add_next_case(expr, stop, &mut switch_end) {
            expr = next;
            let more = self.graph[expr].is_open_expression()
                && switch_end.is_some_and(|end| self.graph[expr].pos < end);
            if !more {
                break;
            }
        }

        if switch_end.is_some() {
            // closes after the last case's break
            let at = self.graph.prev(expr).unwrap_or(expr);
            self.add_statement(at, "} // end-switch", false);
        }
    }

    /// Add one `case` for the condition at `expr`, opening the switch on the
    /// first call. Returns the item the case's BEQ jumps to.
    fn add_next_case(&mut self, expr: ItemId, stop: ItemId, switch_end: &mut Option<u16>) -> Option<ItemId> {
        let beq = self
            .next_open_opcode(expr, stop)
            .filter(|id| self.graph[*id].is_opcode(Opcode::Beq))?;
        let mut brk = self
            .next_open_opcode(beq, stop)
            .filter(|id| self.graph[*id].is_opcode(Opcode::Jmp))?;

        let beq_target = self.resolved_target(beq)?;
        let next_case = self.graph.find_pos(beq_target)?;

        let text = self.graph[expr].expression()?.text.clone();
        let (subject, value) = text.split_once(" == ")?;

        let opening = switch_end.is_none();
        if opening && !self.graph[next_case].is_open_expression() {
            // a plain if without else
            return None;
        }

        // a JMP right after the break with a different target is a goto out
        // of the case
        if let Some(second) = self.graph.next(brk).filter(|id| *id != stop) {
            let second_item = &self.graph[second];
            if !second_item.processed && second_item.is_opcode(Opcode::Jmp) {
                if self.resolved_target(brk) != self.resolved_target(second) {
                    self.add_goto(brk);
                } else {
                    self.graph[brk].processed = true;
                }
                brk = second;
            }
        }

        if opening {
            *switch_end = Some(self.resolved_target(brk)?);
            self.add_statement(expr, format!("switch ({}) {{", subject), false);
        }

        let case = self.add_statement(expr, format!("case {}:", value), true);
        self.set_indent(case, 0, 1);
        self.graph[beq].processed = true;

        let brk_stmt = self.add_statement(brk, "break;", true);
        self.set_indent(brk_stmt, 0, -1);

        Some(next_case)
    }

    pub(crate) fn find_while(&mut self, info: &FuncInfo) {
        let stop = info.end_item;
        let mut cur = Some(info.start_item);

        while let Some(id) = cur.filter(|id| *id != stop) {
            if self.graph[id].is_open_expression() {
                self.add_while(id, stop);
            }
            cur = self.graph.next(id);
        }
    }

    fn add_while(&mut self, expr: ItemId, stop: ItemId) -> Option<()> {
        let beq = self.forward_beq(expr, stop)?;
        let target_pos = self.resolved_target(beq)?;
        let target = self.graph.find_pos(target_pos)?;

        // the loop body ends with a BRA back to the condition
        let bra = self
            .graph
            .prev(target)
            .filter(|id| !self.graph[*id].processed && self.graph[*id].is_opcode(Opcode::Bra))?;
        let bra_target = self.resolved_target(bra)?;
        if bra_target > target_pos {
            return None;
        }
        if bra_target != self.graph[expr].pos {
            debug!(pos = bra_target, "backward branch misses the loop condition; possible for loop");
            return None;
        }

        let text = self.graph[expr].expression()?.text.clone();
        let head = self.add_statement(expr, format!("while ({}) {{", text), true);
        self.set_indent(head, 0, 1);
        self.graph[beq].processed = true;

        let end = self.add_statement(bra, "} // end-while", true);
        self.set_indent(end, -1, 0);
        Some(())
    }

    pub(crate) fn find_if_else(&mut self, info: &FuncInfo) {
        let stop = info.end_item;
        let mut cur = Some(info.start_item);

        while let Some(id) = cur.filter(|id| *id != stop) {
            if self.graph[id].is_open_expression() {
                self.add_if_else(id, stop);
            }
            cur = self.graph.next(id);
        }
    }

    fn add_if_else(&mut self, expr: ItemId, stop: ItemId) -> Option<()> {
        let beq = self.forward_beq(expr, stop)?;
        let target_pos = self.resolved_target(beq)?;
        let target = self.graph.find_pos(target_pos)?;

        // a BRA or JMP right before the BEQ target skips the else block
        let skip = self.graph.prev(target).filter(|id| {
            let item = &self.graph[*id];
            !item.processed && (item.is_opcode(Opcode::Bra) || item.is_opcode(Opcode::Jmp))
        });

        let mut else_at = None;
        let mut endif_at = target;
        if let Some(skip) = skip {
            let skip_target = self.resolved_target(skip)?;
            if skip_target < target_pos {
                // loop back edge inside the body; the goto pass takes it
                debug!(pos = self.graph[skip].pos, target = skip_target, "backward jump ends if block");
            } else {
                endif_at = self.graph.find_pos(skip_target)?;
                else_at = self.graph.next(skip);
                self.graph[skip].processed = true;
            }
        }

        let text = self.graph[expr].expression()?.text.clone();
        let head = self.add_statement(expr, format!("if ({}) {{", text), true);
        self.set_indent(head, 0, 1);
        self.graph[beq].processed = true;

        if let Some(else_at) = else_at {
            let stmt = self.add_statement(else_at, "} else {", false);
            self.set_indent(stmt, -1, 1);
        }
        let end = self.add_statement(endif_at, "} // end-if", false);
        self.set_indent(end, -1, 0);
        Some(())
    }

    /// Remaining JMPs and BRAs become `goto`s.
    pub(crate) fn add_goto_jumps(&mut self, info: &FuncInfo) {
        let stop = info.end_item;
        let mut cur = Some(info.start_item);

        while let Some(id) = cur.filter(|id| *id != stop) {
            cur = self.graph.next(id);

            let item = &self.graph[id];
            if item.processed || item.opcode().is_none() {
                continue;
            }
            if !item.is_opcode(Opcode::Jmp) && !item.is_opcode(Opcode::Bra) {
                debug!(pos = item.pos, line = %item.format(), "opcode left after folding");
                continue;
            }
            self.add_goto(id);
        }
    }

    /// Replace the jump at `id` with a `goto`; its target gets one `label:` line.
    fn add_goto(&mut self, id: ItemId) {
        let label = self.jump_label(id);
        self.add_statement(id, format!("goto {};", label), true);

        let Some(target_pos) = self.resolved_target(id) else {
            return;
        };
        let line = format!("{}:;", label);
        if self.has_statement_at(target_pos, &line) {
            return;
        }
        if let Some(target) = self.graph.find_pos(target_pos) {
            let stmt = self.add_statement(target, line, false);
            self.set_indent(stmt, -1, 1);
        }
    }

    /// Next unprocessed opcode after `expr`, if it is a forward BEQ.
    fn forward_beq(&self, expr: ItemId, stop: ItemId) -> Option<ItemId> {
        let beq = self
            .next_open_opcode(expr, stop)
            .filter(|id| self.graph[*id].is_opcode(Opcode::Beq))?;
        let target = self.resolved_target(beq)?;
        if target <= self.graph[beq].pos {
            warn!(pos = self.graph[beq].pos, target, "conditional branch jumps backward");
            return None;
        }
        Some(beq)
    }

    /// Target position of a jump whose target was found during xref collection.
    fn resolved_target(&self, id: ItemId) -> Option<u16> {
        let data = self.graph[id].opcode()?;
        data.jump_target.as_ref().map(|_| data.jump_target_pos)
    }

    fn jump_label(&self, id: ItemId) -> String {
        match self.graph[id].opcode() {
            Some(data) => data
                .jump_target
                .clone()
                .unwrap_or_else(|| format!("label_{:04x}", data.arg)),
            None => String::new(),
        }
    }

    fn has_statement_at(&self, pos: u16, text: &str) -> bool {
        self.graph
            .iter()
            .any(|(_, item)| item.pos == pos && item.statement().is_some_and(|s| s.text == text))
    }
}
