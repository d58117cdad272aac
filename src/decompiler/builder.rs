use crate::bytecode::op::{Opcode, jump_target};
use crate::bytecode::{ConvImage, DataType};
use crate::decompiler::decompile_error::DecompileError;
use crate::decompiler::func_info::FuncInfo;
use crate::decompiler::graph::{Graph, ItemId};
use crate::decompiler::item::{
    ExpressionData, GraphItem, ItemKind, OpcodeData, OperatorData, PREC_ATOM, StatementData,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info, warn};

const FUNC_ENTRY: [Opcode; 4] = [Opcode::PushBp, Opcode::SpToBp, Opcode::PushI, Opcode::AddSp];
const FUNC_EXIT: [Opcode; 3] = [Opcode::BpToSp, Opcode::PopBp, Opcode::Ret];

/// Decompiler engine for one conversation's code segment.
///
/// [`CodeGraph::new`] turns the code into one item per instruction;
/// [`CodeGraph::decompile`] then rewrites that sequence in place into
/// pseudocode statements.
#[derive(Debug, Clone)]
pub struct CodeGraph {
    pub(crate) graph: Graph,
    pub(crate) functions: BTreeMap<String, FuncInfo>,
    pub(crate) queue: VecDeque<String>,
    /// Start positions of analyzed functions.
    pub(crate) processed: BTreeSet<u16>,
    pub(crate) failed: BTreeMap<String, DecompileError>,
    /// Symbols and strings of the conversation; the code lives in `graph`.
    pub(crate) image: ConvImage,
}

impl CodeGraph {
    pub fn new(image: &ConvImage) -> Result<Self, DecompileError> {
        let mut graph = Graph::new();
        let code = &image.code;

        let mut pos = 0;
        while pos < code.len() {
            let word = code[pos];
            let has_operand = Opcode::from_word(word).is_some_and(Opcode::has_operand);
            let arg = if has_operand {
                *code
                    .get(pos + 1)
                    .ok_or(DecompileError::TruncatedOperand { pos: pos as u16 })?
            } else {
                0
            };

            graph.push_back(GraphItem::new(
                pos as u16,
                ItemKind::Opcode(OpcodeData {
                    word,
                    arg,
                    jump_target: None,
                    jump_target_pos: 0,
                }),
            ));
            pos += if has_operand { 2 } else { 1 };
        }

        Ok(Self {
            graph,
            functions: BTreeMap::new(),
            queue: VecDeque::new(),
            processed: BTreeSet::new(),
            failed: BTreeMap::new(),
            image: ConvImage {
                code: Vec::new(),
                ..image.clone()
            },
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn functions(&self) -> &BTreeMap<String, FuncInfo> {
        &self.functions
    }

    /// Functions whose analysis failed, with the reason.
    pub fn failed(&self) -> &BTreeMap<String, DecompileError> {
        &self.failed
    }

    /// Resolve jump labels only; leaves every instruction in place.
    pub fn disassemble(&mut self) {
        self.collect_xrefs();
    }

    pub fn decompile(&mut self) {
        self.find_all_functions();
        self.process_function_queue();
        self.mark_functions_unused();
    }

    /// Labels, function boundaries and call target names.
    pub(crate) fn find_all_functions(&mut self) {
        self.collect_xrefs();
        self.find_functions();
        self.update_call_targets();
    }

    // =========================================================================
    // Cross references
    // =========================================================================

    fn collect_xrefs(&mut self) {
        let Some(front) = self.graph.front() else {
            return;
        };
        self.graph[front].label = Some("start".to_string());
        self.graph[front].xrefs = 1;

        let mut cur = Some(front);
        while let Some(id) = cur {
            cur = self.graph.next(id);

            let item = &self.graph[id];
            let Some(data) = item.opcode() else {
                continue;
            };
            let Some(op) = data.op() else {
                continue;
            };

            if op.is_jump() {
                let target = jump_target(op, item.pos, data.arg);
                let Some(target_id) = self.graph.find_pos(target) else {
                    warn!(pos = item.pos, target, "jump target is not an instruction");
                    continue;
                };

                let target_item = &mut self.graph[target_id];
                if target_item.xrefs == 0 {
                    target_item.label = Some(format!("label_{:04x}", target));
                }
                target_item.xrefs += 1;
                let name = target_item.label.clone();

                if let Some(data) = self.graph[id].opcode_mut() {
                    data.jump_target = name;
                    data.jump_target_pos = target;
                }
            } else if op == Opcode::CallI {
                let name = match self.image.imported_funcs.get(&data.arg) {
                    Some(import) => import.name.clone(),
                    None => {
                        warn!(pos = item.pos, id = data.arg, "call to unknown imported function");
                        format!("import_{:04x}", data.arg)
                    }
                };
                if let Some(data) = self.graph[id].opcode_mut() {
                    data.jump_target = Some(name);
                }
            }
        }
    }

    // =========================================================================
    // Function boundaries
    // =========================================================================

    fn find_functions(&mut self) {
        let mut cur = self.graph.front();
        while let Some(from) = cur {
            let Some(entry) = self.find_opcode_pattern(from, &FUNC_ENTRY) else {
                break;
            };
            let Some(exit) = self.find_opcode_pattern(entry, &FUNC_EXIT) else {
                warn!(pos = self.graph[entry].pos, "function has no epilogue");
                break;
            };

            let mut info = self.add_function_start(entry);
            let end_item = self.add_function_end(exit);
            info.end = self.graph[end_item].pos;
            info.end_item = end_item;

            debug!(function = %info.name, start = info.start, end = info.end, "found function");
            let name = info.name.clone();
            if self.functions.contains_key(&name) {
                warn!(function = %name, "duplicate function name");
            } else {
                self.functions.insert(name, info);
            }
            cur = Some(exit);
        }
    }

    fn add_function_start(&mut self, entry: ItemId) -> FuncInfo {
        let entry_pos = self.graph[entry].pos;

        let locals = self
            .nth_opcode(entry, 2)
            .and_then(|id| self.graph[id].opcode())
            .map_or(0, |data| data.arg);

        let mut label = self.graph[entry].label.take();
        let mut xrefs = std::mem::take(&mut self.graph[entry].xrefs);

        // a START right before the prologue belongs to the function
        let mut first = entry;
        if let Some(prev) = self.graph.prev(entry) {
            if self.graph[prev].is_opcode(Opcode::Start) {
                first = prev;
                if let Some(start_label) = self.graph[prev].label.take() {
                    label.get_or_insert(start_label);
                }
                xrefs += std::mem::take(&mut self.graph[prev].xrefs);
            }
        }
        let start = self.graph[first].pos;

        let name = if entry_pos <= 1 {
            xrefs = 1;
            "main".to_string()
        } else {
            match label {
                Some(label) => match label.strip_prefix("label_") {
                    Some(rest) => format!("func_{}", rest),
                    None => label,
                },
                None => format!("unused_{:04x}", entry_pos),
            }
        };

        let mut item = GraphItem::new(start, ItemKind::FuncStart);
        item.label = Some(name.clone());
        item.xrefs = xrefs;
        let start_item = self.graph.insert_before(first, item);

        let count = if first == entry { 4 } else { 5 };
        self.set_opcodes_processed(first, count);

        FuncInfo::new(name, start, start_item, locals)
    }

    fn add_function_end(&mut self, exit: ItemId) -> ItemId {
        let exit_item = &mut self.graph[exit];
        let mut item = GraphItem::new(exit_item.pos, ItemKind::FuncEnd);
        item.xrefs = std::mem::take(&mut exit_item.xrefs);
        item.label = exit_item.label.clone();

        let end_item = self.graph.insert_before(exit, item);
        self.set_opcodes_processed(exit, 3);
        end_item
    }

    fn update_call_targets(&mut self) {
        let calls: Vec<(ItemId, u16)> = self
            .graph
            .iter()
            .filter(|(_, item)| item.is_opcode(Opcode::Call))
            .filter_map(|(id, item)| item.opcode().map(|data| (id, data.arg)))
            .collect();

        for (id, target) in calls {
            let name = self
                .graph
                .find_pos(target)
                .and_then(|target| self.graph[target].label.clone());
            if let Some(data) = self.graph[id].opcode_mut() {
                data.jump_target = name;
            }
        }
    }

    // =========================================================================
    // Per-function analysis
    // =========================================================================

    fn process_function_queue(&mut self) {
        if !self.functions.contains_key("main") {
            warn!("no main function found");
            return;
        }
        self.queue.push_back("main".to_string());

        while let Some(name) = self.queue.pop_front() {
            let Some(mut info) = self.functions.get(&name).cloned() else {
                continue;
            };
            if !self.processed.insert(info.start) {
                continue;
            }

            info!(function = %name, "analyzing function");
            if let Err(err) = self.run_passes(&mut info) {
                warn!(function = %name, "falling back to disassembly: {}", err);
                self.failed.insert(name.clone(), err);
            }

            if let Some(slot) = self.functions.get_mut(&name) {
                let callers = std::mem::take(&mut slot.callers);
                info.callers.extend(callers);
                *slot = info;
            }
        }
    }

    fn run_passes(&mut self, info: &mut FuncInfo) -> Result<(), DecompileError> {
        self.analyze_function(info)?;
        self.combine_operators(info)?;
        self.find_switch_case(info);
        self.find_while(info);
        self.find_if_else(info);
        self.add_goto_jumps(info);
        self.post_process_function(info);
        Ok(())
    }

    fn mark_functions_unused(&mut self) {
        for info in self.functions.values() {
            if self.processed.contains(&info.start) || info.is_unused_stub() {
                continue;
            }
            info!(function = %info.name, "removing unreachable function");
            self.graph[info.start_item].xrefs = 0;
        }
    }

    // =========================================================================
    // Graph helpers shared by the passes
    // =========================================================================

    /// First item of the next run of consecutive opcode items matching
    /// `pattern`, searching from `from`. Non-opcode items are skipped.
    pub(crate) fn find_opcode_pattern(&self, from: ItemId, pattern: &[Opcode]) -> Option<ItemId> {
        let mut matched = 0;
        let mut first = from;
        let mut cur = Some(from);

        while let Some(id) = cur {
            cur = self.graph.next(id);
            let item = &self.graph[id];
            if item.opcode().is_none() {
                continue;
            }

            if !item.is_opcode(pattern[matched]) {
                matched = 0;
                if !item.is_opcode(pattern[0]) {
                    continue;
                }
            }
            if matched == 0 {
                first = id;
            }
            matched += 1;
            if matched == pattern.len() {
                return Some(first);
            }
        }
        None
    }

    /// Whether the items starting at `from` are exactly the opcodes of `pattern`.
    pub(crate) fn match_opcode_pattern(&self, from: ItemId, stop: ItemId, pattern: &[Opcode]) -> bool {
        let mut cur = Some(from);
        for op in pattern {
            match cur {
                Some(id) if id != stop && self.graph[id].is_opcode(*op) => {
                    cur = self.graph.next(id);
                }
                _ => return false,
            }
        }
        true
    }

    /// The `n`th opcode item at or after `from`.
    pub(crate) fn nth_opcode(&self, from: ItemId, n: usize) -> Option<ItemId> {
        let mut seen = 0;
        let mut cur = Some(from);
        while let Some(id) = cur {
            if self.graph[id].opcode().is_some() {
                if seen == n {
                    return Some(id);
                }
                seen += 1;
            }
            cur = self.graph.next(id);
        }
        None
    }

    pub(crate) fn set_opcodes_processed(&mut self, from: ItemId, count: usize) {
        let mut cur = Some(from);
        let mut left = count;
        while let (Some(id), true) = (cur, left > 0) {
            if self.graph[id].opcode().is_some() {
                self.graph[id].processed = true;
                left -= 1;
            }
            cur = self.graph.next(id);
        }
    }

    /// Next unprocessed opcode item after `from`, not going past `stop`.
    pub(crate) fn next_open_opcode(&self, from: ItemId, stop: ItemId) -> Option<ItemId> {
        let mut cur = self.graph.next(from);
        while let Some(id) = cur {
            if id == stop {
                return None;
            }
            let item = &self.graph[id];
            if !item.processed && item.opcode().is_some() {
                return Some(id);
            }
            cur = self.graph.next(id);
        }
        None
    }

    /// Insert an operator before the opcode at `at` and mark the opcode processed.
    pub(crate) fn add_operator(&mut self, at: ItemId, needed: usize, returns: bool, returned_type: DataType) -> ItemId {
        let item = &mut self.graph[at];
        item.processed = true;
        let pos = item.pos;

        let (opcode, target, target_name) = match item.opcode() {
            Some(data) => (
                data.op().unwrap_or(Opcode::Nop),
                data.arg,
                data.jump_target.clone().unwrap_or_default(),
            ),
            None => (Opcode::Nop, 0, String::new()),
        };
        let prec = opcode.info().precedence.unwrap_or(PREC_ATOM);

        self.graph.insert_before(
            at,
            GraphItem::new(
                pos,
                ItemKind::Operator(OperatorData {
                    opcode,
                    needed,
                    returns,
                    returned_type,
                    prec,
                    swap: false,
                    target,
                    target_name,
                }),
            ),
        )
    }

    /// Insert a statement before `at`, optionally marking `at` processed.
    pub(crate) fn add_statement(&mut self, at: ItemId, text: impl Into<String>, mark_processed: bool) -> ItemId {
        let pos = self.graph[at].pos;
        if mark_processed {
            self.graph[at].processed = true;
        }
        self.graph.insert_before(
            at,
            GraphItem::new(
                pos,
                ItemKind::Statement(StatementData {
                    text: text.into(),
                    indent_before: 0,
                    indent_after: 0,
                }),
            ),
        )
    }

    pub(crate) fn set_indent(&mut self, statement: ItemId, before: i32, after: i32) {
        if let ItemKind::Statement(data) = &mut self.graph[statement].kind {
            data.indent_before = before;
            data.indent_after = after;
        }
    }

    /// Insert an expression before `at`; the expression takes over `at`'s label.
    pub(crate) fn add_expression(&mut self, at: ItemId, data: ExpressionData) -> ItemId {
        let pos = self.graph[at].pos;
        let label = self.graph[at].label.take();
        let mut item = GraphItem::new(pos, ItemKind::Expression(data));
        item.label = label;
        self.graph.insert_before(at, item)
    }

    /// `global_N` or the imported global's name.
    pub(crate) fn memory_var_name(&self, slot: u16) -> String {
        if slot >= self.image.globals_reserved {
            debug!(slot, reserved = self.image.globals_reserved, "memory access past reserved globals");
        }
        self.image.global_name(slot)
    }
}
