use crate::bytecode::ConvImage;
use crate::bytecode::op::{Opcode, jump_target};
use crate::runtime::callback::CodeCallback;
use crate::runtime::runtime_error::{StackFault, VmFault};
use crate::runtime::stack::{ConvStack, EMPTY};
use tracing::{debug, trace, warn};

/// Filler pushed by ADDSP for fresh locals.
const LOCAL_FILLER: u16 = 0xdddd;

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Stack capacity in words.
    pub stack_size: u16,
    /// Stop with a fault after this many instructions.
    pub max_steps: Option<usize>,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            stack_size: 4096,
            max_steps: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Running,
    Finished,
}

/// Interpreter for one conversation.
pub struct CodeVm<C> {
    image: ConvImage,
    config: VmConfig,
    stack: ConvStack,
    ip: u16,
    bp: u16,
    call_depth: u32,
    result_register: u16,
    state: VmState,
    fault: Option<VmFault>,
    steps: usize,
    callback: Option<C>,
}

impl<C: CodeCallback> CodeVm<C> {
    pub fn new(image: ConvImage) -> Self {
        Self::with_config(image, VmConfig::default())
    }

    pub fn with_config(image: ConvImage, config: VmConfig) -> Self {
        Self {
            image,
            config,
            stack: ConvStack::new(),
            ip: 0,
            bp: EMPTY,
            call_depth: 0,
            result_register: 0,
            state: VmState::Finished,
            fault: None,
            steps: 0,
            callback: None,
        }
    }

    /// Prepare a run: reset registers, size the stack and load globals.
    ///
    /// `persisted` holds the conversation's private globals, which land in
    /// slots `0..persisted.len()`; imported globals are then fetched from the
    /// callback into their own slots.
    pub fn init(&mut self, mut callback: C, persisted: &[u16]) -> Result<(), StackFault> {
        self.ip = 0;
        self.bp = EMPTY;
        self.call_depth = 1;
        self.result_register = 0;
        self.fault = None;
        self.steps = 0;

        self.stack.init(self.config.stack_size);
        self.stack.set_stack_pointer(self.image.globals_reserved)?;

        for (slot, value) in persisted.iter().enumerate() {
            let slot = u16::try_from(slot).map_err(|_| StackFault::OutOfRange {
                pos: u16::MAX,
                capacity: self.stack.capacity(),
            })?;
            self.stack.set(slot, *value)?;
        }

        for (slot, item) in &self.image.imported_globals {
            let value = callback.get_global(&item.name);
            self.stack.set(*slot, value)?;
        }

        self.callback = Some(callback);
        self.state = VmState::Running;
        debug!(
            slot = self.image.slot,
            globals = persisted.len(),
            "conversation initialized"
        );
        Ok(())
    }

    /// Execute one instruction. Returns false once the run has finished.
    pub fn step(&mut self) -> bool {
        if self.state == VmState::Finished {
            return false;
        }
        if let Err(fault) = self.execute() {
            self.fail(fault);
        }
        self.state == VmState::Running
    }

    /// Step until finished; returns the fault that stopped the run, if any.
    pub fn run(&mut self) -> Option<&VmFault> {
        while self.step() {}
        self.fault.as_ref()
    }

    /// Copy the private globals back out of the stack.
    pub fn done(&self, persisted: &mut [u16]) {
        for (slot, value) in persisted.iter_mut().enumerate() {
            if let Ok(word) = self.stack.get(slot as u16) {
                *value = word;
            }
        }
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn fault(&self) -> Option<&VmFault> {
        self.fault.as_ref()
    }

    pub fn stack(&self) -> &ConvStack {
        &self.stack
    }

    pub fn image(&self) -> &ConvImage {
        &self.image
    }

    pub fn ip(&self) -> u16 {
        self.ip
    }

    pub fn base_pointer(&self) -> u16 {
        self.bp
    }

    pub fn result_register(&self) -> u16 {
        self.result_register
    }

    pub fn callback(&self) -> Option<&C> {
        self.callback.as_ref()
    }

    pub fn callback_mut(&mut self) -> Option<&mut C> {
        self.callback.as_mut()
    }

    fn fail(&mut self, fault: VmFault) {
        warn!(slot = self.image.slot, ip = self.ip, "conversation stopped: {}", fault);
        self.state = VmState::Finished;
        self.fault = Some(fault);
    }

    // =========================================================================
    // Execution
    // =========================================================================

    fn execute(&mut self) -> Result<(), VmFault> {
        if let Some(limit) = self.config.max_steps {
            if self.steps >= limit {
                return Err(VmFault::StepLimit(limit));
            }
        }
        self.steps += 1;

        let ip = self.ip;
        let word = self.fetch(ip)?;
        let op = Opcode::from_word(word).ok_or(VmFault::UnknownOpcode { opcode: word, ip })?;

        let (arg, mut next) = if op.has_operand() {
            (self.fetch(ip.wrapping_add(1))?, ip.wrapping_add(2))
        } else {
            (0, ip.wrapping_add(1))
        };

        trace!(ip, op = op.mnemonic(), arg, "step");

        match op {
            Opcode::Nop | Opcode::Start | Opcode::RespondOp => {}

            // ─── Arithmetic and logic ───
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
            | Opcode::TstNe => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let value = binary(op, lhs, rhs).ok_or(VmFault::DivisionByZero { ip })?;
                self.push(value)?;
            }
            Opcode::OpNot => {
                let value = self.pop()?;
                self.push((value == 0) as u16)?;
            }
            Opcode::OpNeg => {
                let value = self.pop()?;
                self.push(value.wrapping_neg())?;
            }

            // ─── Control flow ───
            Opcode::Jmp => next = arg,
            Opcode::Beq => {
                if self.pop()? == 0 {
                    next = jump_target(op, ip, arg);
                }
            }
            Opcode::Bne => {
                if self.pop()? != 0 {
                    next = jump_target(op, ip, arg);
                }
            }
            Opcode::Bra => next = jump_target(op, ip, arg),
            Opcode::Call => {
                self.push(ip.wrapping_add(1))?;
                self.call_depth += 1;
                next = arg;
            }
            Opcode::CallI => {
                let name = match self.image.imported_funcs.get(&arg) {
                    Some(item) => item.name.clone(),
                    None => return Err(VmFault::UnresolvedImport { id: arg, ip }),
                };
                self.result_register = self.call_import(&name)?;
            }
            Opcode::Ret => {
                self.call_depth = self.call_depth.saturating_sub(1);
                if self.call_depth == 0 {
                    debug!(ip, "returned from outermost frame");
                    self.state = VmState::Finished;
                    return Ok(());
                }
                next = self.pop()?.wrapping_add(1);
            }
            Opcode::ExitOp => {
                debug!(ip, "conversation exit");
                self.state = VmState::Finished;
                return Ok(());
            }

            // ─── Stack and frame ───
            Opcode::PushI => self.push(arg)?,
            Opcode::PushIEff => self.push(self.bp.wrapping_add(arg))?,
            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::Swap => {
                let a = self.pop()?;
                let b = self.pop()?;
                self.push(a)?;
                self.push(b)?;
            }
            Opcode::PushBp => self.push(self.bp)?,
            Opcode::PopBp => self.bp = self.pop()?,
            Opcode::SpToBp => self.bp = self.stack.stack_pointer(),
            Opcode::BpToSp => {
                let bp = self.bp;
                self.stack
                    .set_stack_pointer(bp)
                    .map_err(|fault| VmFault::Stack { fault, ip })?;
            }
            Opcode::AddSp => {
                let count = self.pop()?;
                for _ in 0..count {
                    self.push(LOCAL_FILLER)?;
                }
            }

            // ─── Memory ───
            Opcode::FetchM => {
                let addr = self.pop()?;
                if let Some(item) = self.image.imported_globals.get(&addr) {
                    debug!(global = %item.name, "fetch imported global");
                }
                let value = self.load(addr)?;
                self.push(value)?;
            }
            Opcode::Sto => {
                let value = self.pop()?;
                let addr = self.pop()?;
                self.store(addr, value)?;
                if let Some(item) = self.image.imported_globals.get(&addr) {
                    debug!(global = %item.name, value, "store imported global");
                    if let Some(callback) = self.callback.as_mut() {
                        callback.set_global(&item.name, value);
                    }
                }
            }
            Opcode::Offset => {
                let a = self.pop()?;
                let b = self.pop()?;
                self.push(a.wrapping_add(b).wrapping_sub(1))?;
            }

            // ─── Result register and output ───
            Opcode::SaveReg => self.result_register = self.pop()?,
            Opcode::PushReg => self.push(self.result_register)?,
            Opcode::SayOp => {
                let id = self.pop()?;
                let callback = self.callback.as_mut().ok_or(VmFault::NotInitialized)?;
                callback.say(id);
            }
            Opcode::StrCmp => {
                return Err(VmFault::UnsupportedOpcode {
                    mnemonic: op.mnemonic(),
                    ip,
                });
            }
        }

        self.ip = next;
        Ok(())
    }

    fn call_import(&mut self, name: &str) -> Result<u16, VmFault> {
        let callback = self.callback.as_mut().ok_or(VmFault::NotInitialized)?;
        let result = match name {
            "babl_menu" => {
                let choices = menu_choices(&self.stack, false);
                callback.menu(&choices)
            }
            "babl_fmenu" => {
                let choices = menu_choices(&self.stack, true);
                callback.menu(&choices)
            }
            _ => callback.call_external(name, &mut self.stack),
        };
        debug!(function = name, result, "imported function returned");
        Ok(result)
    }

    fn fetch(&self, pos: u16) -> Result<u16, VmFault> {
        self.image
            .code
            .get(pos as usize)
            .copied()
            .ok_or(VmFault::CodeOutOfRange { ip: pos })
    }

    fn push(&mut self, value: u16) -> Result<(), VmFault> {
        let ip = self.ip;
        self.stack
            .push(value)
            .map_err(|fault| VmFault::Stack { fault, ip })
    }

    fn pop(&mut self) -> Result<u16, VmFault> {
        let ip = self.ip;
        self.stack.pop().map_err(|fault| VmFault::Stack { fault, ip })
    }

    fn load(&self, addr: u16) -> Result<u16, VmFault> {
        let ip = self.ip;
        self.stack
            .get(addr)
            .map_err(|fault| VmFault::Stack { fault, ip })
    }

    fn store(&mut self, addr: u16, value: u16) -> Result<(), VmFault> {
        let ip = self.ip;
        self.stack
            .set(addr, value)
            .map_err(|fault| VmFault::Stack { fault, ip })
    }
}

/// `lhs op rhs`; `None` on division or modulo by zero.
fn binary(op: Opcode, lhs: u16, rhs: u16) -> Option<u16> {
    let value = match op {
        Opcode::OpAdd => lhs.wrapping_add(rhs),
        Opcode::OpMul => lhs.wrapping_mul(rhs),
        Opcode::OpSub => lhs.wrapping_sub(rhs),
        Opcode::OpDiv => lhs.checked_div(rhs)?,
        Opcode::OpMod => lhs.checked_rem(rhs)?,
        Opcode::OpOr => (lhs != 0 || rhs != 0) as u16,
        Opcode::OpAnd => (lhs != 0 && rhs != 0) as u16,
        Opcode::TstGt => (lhs > rhs) as u16,
        Opcode::TstGe => (lhs >= rhs) as u16,
        Opcode::TstLt => (lhs < rhs) as u16,
        Opcode::TstLe => (lhs <= rhs) as u16,
        Opcode::TstEq => (lhs == rhs) as u16,
        Opcode::TstNe => (lhs != rhs) as u16,
        _ => return None,
    };
    Some(value)
}

/// Zero-terminated string id list of a menu call. The list address is the
/// first argument; for filtered menus the second argument addresses a
/// parallel flag array and only flagged entries are offered.
fn menu_choices(stack: &ConvStack, filtered: bool) -> Vec<u16> {
    let sp = stack.stack_pointer();
    let Some(list) = sp.checked_sub(1).and_then(|slot| stack.get(slot).ok()) else {
        return Vec::new();
    };
    let flags = if filtered {
        sp.checked_sub(2).and_then(|slot| stack.get(slot).ok())
    } else {
        None
    };

    let mut choices = Vec::new();
    for i in 0.. {
        let id = match stack.get(list.wrapping_add(i)) {
            Ok(0) | Err(_) => break,
            Ok(id) => id,
        };
        let offered = match flags {
            Some(flags) => stack.get(flags.wrapping_add(i)).is_ok_and(|f| f != 0),
            None => true,
        };
        if offered {
            choices.push(id);
        }
    }
    choices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::asm::Asm;
    use crate::bytecode::{DataType, ImportedItem};
    use crate::runtime::callback::call_argument;
    use crate::runtime::intrinsics::Intrinsics;
    use std::collections::HashMap;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Say(u16),
        Menu(Vec<u16>),
        External(String, u16),
        SetGlobal(String, u16),
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
        menu_answer: u16,
        globals: HashMap<String, u16>,
        intrinsics: Option<Intrinsics>,
    }

    impl CodeCallback for Recorder {
        fn say(&mut self, text_id: u16) {
            self.events.push(Event::Say(text_id));
        }

        fn menu(&mut self, choice_ids: &[u16]) -> u16 {
            self.events.push(Event::Menu(choice_ids.to_vec()));
            self.menu_answer
        }

        fn call_external(&mut self, name: &str, stack: &mut ConvStack) -> u16 {
            let result = match self.intrinsics.as_mut() {
                Some(intrinsics) => intrinsics.call(name, stack).unwrap_or(0),
                None => call_argument(stack, 0).unwrap_or(0),
            };
            self.events.push(Event::External(name.to_string(), result));
            result
        }

        fn get_global(&mut self, name: &str) -> u16 {
            if let Some(value) = self.intrinsics.as_mut().and_then(|i| i.global(name)) {
                return value;
            }
            self.globals.get(name).copied().unwrap_or(0)
        }

        fn set_global(&mut self, name: &str, value: u16) {
            self.events.push(Event::SetGlobal(name.to_string(), value));
        }
    }

    fn image(code: Vec<u16>) -> ConvImage {
        let mut image = ConvImage::new(code);
        image.globals_reserved = 16;
        image
    }

    fn run_image(image: ConvImage, callback: Recorder) -> CodeVm<Recorder> {
        let mut vm = CodeVm::new(image);
        vm.init(callback, &[]).unwrap();
        vm.run();
        vm
    }

    fn run_code(code: Vec<u16>) -> CodeVm<Recorder> {
        run_image(image(code), Recorder::default())
    }

    fn events(vm: &CodeVm<Recorder>) -> Vec<Event> {
        vm.callback().map(|c| c.events.clone()).unwrap_or_default()
    }

    fn say_result(build: impl FnOnce(&mut Asm)) -> Vec<Event> {
        let mut asm = Asm::new();
        build(&mut asm);
        asm.op(Opcode::SayOp).op(Opcode::ExitOp);
        let vm = run_code(asm.finish());
        assert_eq!(vm.fault(), None);
        events(&vm)
    }

    #[test]
    fn test_add_then_say() {
        let got = say_result(|a| {
            a.pushi(2).pushi(3).op(Opcode::OpAdd);
        });
        assert_eq!(got, vec![Event::Say(5)]);
    }

    #[test]
    fn test_sub_operand_order() {
        let got = say_result(|a| {
            a.pushi(10).pushi(3).op(Opcode::OpSub);
        });
        assert_eq!(got, vec![Event::Say(7)]);
    }

    #[test]
    fn test_div_and_mod() {
        let got = say_result(|a| {
            a.pushi(17).pushi(5).op(Opcode::OpDiv);
        });
        assert_eq!(got, vec![Event::Say(3)]);

        let got = say_result(|a| {
            a.pushi(17).pushi(5).op(Opcode::OpMod);
        });
        assert_eq!(got, vec![Event::Say(2)]);
    }

    #[test]
    fn test_wrapping_arithmetic() {
        let got = say_result(|a| {
            a.pushi(0xffff).pushi(2).op(Opcode::OpAdd);
        });
        assert_eq!(got, vec![Event::Say(1)]);

        let got = say_result(|a| {
            a.pushi(1).op(Opcode::OpNeg);
        });
        assert_eq!(got, vec![Event::Say(0xffff)]);
    }

    #[test]
    fn test_comparisons_and_logic() {
        let cases = [
            (Opcode::TstGt, 3, 2, 1),
            (Opcode::TstGe, 2, 2, 1),
            (Opcode::TstLt, 3, 2, 0),
            (Opcode::TstLe, 2, 3, 1),
            (Opcode::TstEq, 4, 4, 1),
            (Opcode::TstNe, 4, 4, 0),
            (Opcode::OpAnd, 1, 0, 0),
            (Opcode::OpOr, 0, 9, 1),
        ];
        for (op, lhs, rhs, want) in cases {
            let got = say_result(|a| {
                a.pushi(lhs).pushi(rhs).op(op);
            });
            assert_eq!(got, vec![Event::Say(want)], "{:?}", op);
        }
    }

    #[test]
    fn test_not() {
        let got = say_result(|a| {
            a.pushi(0).op(Opcode::OpNot);
        });
        assert_eq!(got, vec![Event::Say(1)]);
    }

    #[test]
    fn test_div_by_zero_finishes() {
        let mut asm = Asm::new();
        asm.pushi(1).pushi(0).op(Opcode::OpDiv).pushi(9).op(Opcode::SayOp);
        let vm = run_code(asm.finish());

        assert_eq!(vm.state(), VmState::Finished);
        assert_eq!(vm.fault(), Some(&VmFault::DivisionByZero { ip: 4 }));
        assert!(events(&vm).is_empty());
    }

    #[test]
    fn test_unknown_opcode_finishes() {
        let vm = run_code(vec![0x16, 1, 0x30, 0x27]);
        assert_eq!(
            vm.fault(),
            Some(&VmFault::UnknownOpcode {
                opcode: 0x30,
                ip: 2
            })
        );
    }

    #[test]
    fn test_strcmp_is_unsupported() {
        let vm = run_code(vec![Opcode::StrCmp.word()]);
        assert!(matches!(vm.fault(), Some(VmFault::UnsupportedOpcode { .. })));
    }

    #[test]
    fn test_unresolved_import_finishes() {
        let mut asm = Asm::new();
        asm.pushi(0).op_arg(Opcode::CallI, 7);
        let vm = run_code(asm.finish());
        assert_eq!(
            vm.fault(),
            Some(&VmFault::UnresolvedImport { id: 7, ip: 2 })
        );
    }

    #[test]
    fn test_running_off_the_code_is_a_fault() {
        let vm = run_code(vec![Opcode::Nop.word()]);
        assert_eq!(vm.fault(), Some(&VmFault::CodeOutOfRange { ip: 1 }));
    }

    #[test]
    fn test_step_reports_finished() {
        let mut asm = Asm::new();
        asm.op(Opcode::Nop).op(Opcode::ExitOp);
        let mut vm = CodeVm::new(image(asm.finish()));
        vm.init(Recorder::default(), &[]).unwrap();

        assert!(vm.step());
        assert!(!vm.step());
        assert!(!vm.step());
        assert_eq!(vm.fault(), None);
    }

    #[test]
    fn test_step_before_init() {
        let mut vm: CodeVm<Recorder> = CodeVm::new(image(vec![0]));
        assert!(!vm.step());
    }

    #[test]
    fn test_branches() {
        // BEQ taken on zero
        let mut asm = Asm::new();
        asm.pushi(0);
        let beq = asm.branch_fwd(Opcode::Beq);
        asm.pushi(1).op(Opcode::SayOp);
        let target = asm.pos();
        asm.patch_branch(beq, target);
        asm.pushi(2).op(Opcode::SayOp).op(Opcode::ExitOp);
        assert_eq!(events(&run_code(asm.finish())), vec![Event::Say(2)]);

        // BNE not taken on zero
        let mut asm = Asm::new();
        asm.pushi(0);
        let bne = asm.branch_fwd(Opcode::Bne);
        asm.pushi(1).op(Opcode::SayOp);
        let target = asm.pos();
        asm.patch_branch(bne, target);
        asm.pushi(2).op(Opcode::SayOp).op(Opcode::ExitOp);
        assert_eq!(
            events(&run_code(asm.finish())),
            vec![Event::Say(1), Event::Say(2)]
        );
    }

    #[test]
    fn test_backward_bra_loop() {
        // slot 0 counts down from 3, saying each value
        let mut asm = Asm::new();
        asm.pushi(0).pushi(3).op(Opcode::Sto);
        let top = asm.pos();
        asm.pushi(0).op(Opcode::FetchM);
        let beq = asm.branch_fwd(Opcode::Beq);
        asm.pushi(0).op(Opcode::FetchM).op(Opcode::SayOp);
        asm.pushi(0)
            .pushi(0)
            .op(Opcode::FetchM)
            .pushi(1)
            .op(Opcode::OpSub)
            .op(Opcode::Sto);
        asm.branch(Opcode::Bra, top);
        let end = asm.pos();
        asm.patch_branch(beq, end);
        asm.op(Opcode::ExitOp);

        let vm = run_code(asm.finish());
        assert_eq!(vm.fault(), None);
        assert_eq!(
            events(&vm),
            vec![Event::Say(3), Event::Say(2), Event::Say(1)]
        );
    }

    #[test]
    fn test_call_and_ret() {
        let mut asm = Asm::new();
        asm.op_arg(Opcode::Call, 0);
        asm.pushi(1).op(Opcode::SayOp).op(Opcode::ExitOp);
        let func = asm.pos();
        asm.pushi(7).op(Opcode::SayOp).op(Opcode::Ret);
        asm.patch_jmp(0, func);

        let vm = run_code(asm.finish());
        assert_eq!(vm.fault(), None);
        assert_eq!(events(&vm), vec![Event::Say(7), Event::Say(1)]);
    }

    #[test]
    fn test_ret_from_outermost_frame_finishes() {
        let mut asm = Asm::new();
        asm.op(Opcode::Ret).pushi(1).op(Opcode::SayOp);
        let vm = run_code(asm.finish());
        assert_eq!(vm.state(), VmState::Finished);
        assert_eq!(vm.fault(), None);
        assert!(events(&vm).is_empty());
    }

    #[test]
    fn test_frame_locals_and_params() {
        // caller pushes 42, callee reads param1 at bp-2 and stores it into local 1
        let mut asm = Asm::new();
        asm.pushi(42);
        asm.op_arg(Opcode::Call, 0);
        asm.op(Opcode::Pop).op(Opcode::ExitOp);
        let func = asm.pos();
        asm.prologue(1);
        asm.op_arg(Opcode::PushIEff, 1)
            .op_arg(Opcode::PushIEff, 0xfffe)
            .op(Opcode::FetchM)
            .op(Opcode::Sto);
        asm.op_arg(Opcode::PushIEff, 1)
            .op(Opcode::FetchM)
            .op(Opcode::SayOp);
        asm.epilogue();
        asm.patch_jmp(2, func);

        let vm = run_code(asm.finish());
        assert_eq!(vm.fault(), None);
        assert_eq!(events(&vm), vec![Event::Say(42)]);
    }

    #[test]
    fn test_addsp_fills_locals() {
        let mut asm = Asm::new();
        asm.pushi(2).op(Opcode::AddSp).op(Opcode::ExitOp);
        let vm = run_code(asm.finish());
        assert_eq!(vm.stack().stack_pointer(), 18);
        assert_eq!(vm.stack().get(17).unwrap(), LOCAL_FILLER);
        assert_eq!(vm.stack().get(18).unwrap(), LOCAL_FILLER);
    }

    #[test]
    fn test_swap_and_offset() {
        let got = say_result(|a| {
            a.pushi(1).pushi(9).op(Opcode::Swap).op(Opcode::OpSub);
        });
        assert_eq!(got, vec![Event::Say(8)]);

        let got = say_result(|a| {
            a.pushi(3).pushi(10).op(Opcode::Offset);
        });
        assert_eq!(got, vec![Event::Say(12)]);
    }

    #[test]
    fn test_result_register() {
        let got = say_result(|a| {
            a.pushi(6)
                .op(Opcode::SaveReg)
                .op(Opcode::PushReg)
                .op(Opcode::PushReg)
                .op(Opcode::OpMul);
        });
        assert_eq!(got, vec![Event::Say(36)]);
    }

    fn with_import(mut image: ConvImage, id: u16, name: &str) -> ConvImage {
        image
            .imported_funcs
            .insert(id, ImportedItem::new(name, DataType::Int));
        image
    }

    #[test]
    fn test_babl_menu_collects_choices() {
        let mut asm = Asm::new();
        asm.pushi(10).pushi(5).op(Opcode::Sto);
        asm.pushi(11).pushi(6).op(Opcode::Sto);
        asm.pushi(10).pushi(1).op_arg(Opcode::CallI, 0);
        asm.op(Opcode::Pop).op(Opcode::Pop);
        asm.op(Opcode::PushReg).op(Opcode::SayOp).op(Opcode::ExitOp);

        let image = with_import(image(asm.finish()), 0, "babl_menu");
        let recorder = Recorder {
            menu_answer: 2,
            ..Recorder::default()
        };
        let vm = run_image(image, recorder);
        assert_eq!(vm.fault(), None);
        assert_eq!(
            events(&vm),
            vec![Event::Menu(vec![5, 6]), Event::Say(2)]
        );
    }

    #[test]
    fn test_babl_fmenu_skips_unflagged() {
        let mut asm = Asm::new();
        for (addr, value) in [(8, 5), (9, 6), (10, 7), (12, 1), (13, 0), (14, 1)] {
            asm.pushi(addr).pushi(value).op(Opcode::Sto);
        }
        asm.pushi(12).pushi(8).pushi(2).op_arg(Opcode::CallI, 1);
        asm.op(Opcode::ExitOp);

        let image = with_import(image(asm.finish()), 1, "babl_fmenu");
        let vm = run_image(image, Recorder::default());
        assert_eq!(events(&vm), vec![Event::Menu(vec![5, 7])]);
    }

    #[test]
    fn test_external_call_sets_result() {
        let mut asm = Asm::new();
        asm.pushi(3).pushi(44).op(Opcode::Sto);
        asm.pushi(3).pushi(1).op_arg(Opcode::CallI, 2);
        asm.op(Opcode::Pop).op(Opcode::Pop);
        asm.op(Opcode::PushReg).op(Opcode::SayOp).op(Opcode::ExitOp);

        let image = with_import(image(asm.finish()), 2, "get_quest");
        let vm = run_image(image, Recorder::default());
        assert_eq!(
            events(&vm),
            vec![Event::External("get_quest".into(), 44), Event::Say(44)]
        );
    }

    #[test]
    fn test_imported_globals_round_trip_through_callback() {
        let mut asm = Asm::new();
        asm.pushi(14).op(Opcode::FetchM).op(Opcode::SayOp);
        asm.pushi(14).pushi(99).op(Opcode::Sto);
        asm.op(Opcode::ExitOp);

        let mut image = image(asm.finish());
        image
            .imported_globals
            .insert(14, ImportedItem::new("npc_attitude", DataType::Int));
        let mut recorder = Recorder::default();
        recorder.globals.insert("npc_attitude".into(), 3);

        let vm = run_image(image, recorder);
        assert_eq!(
            events(&vm),
            vec![
                Event::Say(3),
                Event::SetGlobal("npc_attitude".into(), 99)
            ]
        );
    }

    #[test]
    fn test_say_player_name() {
        let mut asm = Asm::new();
        asm.pushi(15).op(Opcode::FetchM).op(Opcode::SayOp);
        asm.op(Opcode::ExitOp);

        let mut image = image(asm.finish());
        image
            .imported_globals
            .insert(15, ImportedItem::new("play_name", DataType::String));
        let mut intrinsics = Intrinsics::new(vec!["Hello.".into(), "Bye.".into()], 0);
        intrinsics.player_name = "Shamino".to_string();
        let recorder = Recorder {
            intrinsics: Some(intrinsics),
            ..Recorder::default()
        };

        let vm = run_image(image, recorder);
        assert_eq!(events(&vm), vec![Event::Say(2)]);
        let said = vm.callback().and_then(|c| c.intrinsics.as_ref()?.string(2));
        assert_eq!(said, Some("Shamino"));
    }

    #[test]
    fn test_private_globals_persist() {
        let mut asm = Asm::new();
        asm.pushi(1).op(Opcode::FetchM).op(Opcode::SayOp);
        asm.pushi(1).pushi(8).op(Opcode::Sto).op(Opcode::ExitOp);

        let mut vm = CodeVm::new(image(asm.finish()));
        let mut globals = vec![4, 5, 6];
        vm.init(Recorder::default(), &globals).unwrap();
        vm.run();
        vm.done(&mut globals);

        assert_eq!(events(&vm), vec![Event::Say(5)]);
        assert_eq!(globals, vec![4, 8, 6]);
    }

    #[test]
    fn test_init_rejects_oversized_globals() {
        let config = VmConfig {
            stack_size: 4,
            max_steps: None,
        };
        let mut image = image(vec![0x26]);
        image.globals_reserved = 2;
        let mut vm = CodeVm::with_config(image, config);
        assert!(vm.init(Recorder::default(), &[1, 2, 3, 4, 5]).is_err());
    }

    #[test]
    fn test_stack_overflow_is_a_fault() {
        let config = VmConfig {
            stack_size: 20,
            max_steps: None,
        };
        let mut asm = Asm::new();
        asm.pushi(100).op(Opcode::AddSp);
        let mut vm = CodeVm::with_config(image(asm.finish()), config);
        vm.init(Recorder::default(), &[]).unwrap();
        vm.run();
        assert!(matches!(
            vm.fault(),
            Some(VmFault::Stack {
                fault: StackFault::Overflow { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_step_limit() {
        let config = VmConfig {
            stack_size: 64,
            max_steps: Some(50),
        };
        // JMP to itself
        let mut vm = CodeVm::with_config(image(vec![Opcode::Jmp.word(), 0]), config);
        vm.init(Recorder::default(), &[]).unwrap();
        assert_eq!(vm.run(), Some(&VmFault::StepLimit(50)));
    }

    #[test]
    fn test_seeded_runs_are_deterministic() {
        let mut asm = Asm::new();
        for _ in 0..5 {
            asm.pushi(3).pushi(100).op(Opcode::Sto);
            asm.pushi(3).pushi(1).op_arg(Opcode::CallI, 0);
            asm.op(Opcode::Pop).op(Opcode::Pop);
            asm.op(Opcode::PushReg).op(Opcode::SayOp);
        }
        asm.op(Opcode::ExitOp);
        let image = with_import(image(asm.finish()), 0, "random");

        let run = |seed| {
            let recorder = Recorder {
                intrinsics: Some(Intrinsics::new(Vec::new(), seed)),
                ..Recorder::default()
            };
            events(&run_image(image.clone(), recorder))
        };

        let first = run(7);
        assert_eq!(first.len(), 10);
        assert_eq!(first, run(7));
        for event in &first {
            if let Event::Say(v) = event {
                assert!((1..=100).contains(v));
            }
        }
    }
}
