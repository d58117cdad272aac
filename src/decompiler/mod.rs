//! Decompiler for conversation code.
//!
//! The code segment becomes a sequence of graph items, one per
//! instruction. Passes then fold instructions into expressions, combine
//! expressions into statements and recover block structure, all in place.

mod analyze;
pub mod builder;
mod combine;
mod control;
pub mod decompile_error;
mod emit;
pub mod facade;
pub mod func_info;
pub mod graph;
pub mod item;
mod post;

pub use builder::CodeGraph;
pub use decompile_error::DecompileError;
pub use facade::{ConvSource, Decompiler, DecompilerConfig};
pub use func_info::{ArrayInfo, FuncInfo};
pub use graph::{Graph, ItemId};
pub use item::{GraphItem, ItemKind};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::asm::Asm;
    use crate::bytecode::op::Opcode;
    use crate::bytecode::ConvImage;
    use crate::loader::LoadError;

    fn image(asm: &Asm, strings: &[&str]) -> ConvImage {
        let mut image = ConvImage::new(asm.finish());
        image.globals_reserved = 4;
        image.strings = strings.iter().map(|s| s.to_string()).collect();
        image
    }

    #[test]
    fn test_if_else_conversation() {
        let mut asm = Asm::new();
        asm.prologue(0);
        asm.pushi(0).op(Opcode::FetchM).pushi(1).op(Opcode::TstEq);
        let beq = asm.branch_fwd(Opcode::Beq);
        asm.pushi(0).op(Opcode::SayOp);
        let bra = asm.branch_fwd(Opcode::Bra);
        asm.patch_branch(beq, asm.pos());
        asm.pushi(1).op(Opcode::SayOp);
        asm.patch_branch(bra, asm.pos());
        asm.epilogue();

        let dec = Decompiler::new(&image(&asm, &["hi", "bye"]), "Test").unwrap();
        assert_eq!(
            dec.to_text(),
            "; conversation for Test\n\
             \n\
             void main() // referenced 1 times\n\
             {\n\
             \x20  if (global_0 == 1) {\n\
             \x20     say(\"hi\");\n\
             \x20  } else {\n\
             \x20     say(\"bye\");\n\
             \x20  } // end-if\n\
             } // end-function\n\
             \n"
        );
    }

    #[test]
    fn test_switch_pairs() {
        let mut asm = Asm::new();
        asm.prologue(1);
        // local_0 = random(local_0)
        asm.op_arg(Opcode::PushIEff, 0);
        asm.op_arg(Opcode::PushIEff, 0).pushi(1).op_arg(Opcode::CallI, 0);
        asm.op(Opcode::Pop).op(Opcode::Pop).op(Opcode::PushReg).op(Opcode::Sto);

        let mut breaks = Vec::new();
        for value in 1..=4 {
            asm.op_arg(Opcode::PushIEff, 0).op(Opcode::FetchM);
            asm.pushi(value).op(Opcode::TstEq);
            let beq = asm.branch_fwd(Opcode::Beq);
            asm.pushi(value).op(Opcode::SayOp);
            breaks.push(asm.jmp_fwd());
            asm.patch_branch(beq, asm.pos());
        }
        let end = asm.pos();
        for at in breaks {
            asm.patch_jmp(at, end);
        }
        asm.epilogue();

        let mut image = image(&asm, &["", "a", "b", "c", "d"]);
        image
            .imported_funcs
            .insert(0, crate::bytecode::ImportedItem::new("random", crate::bytecode::DataType::Int));
        let text = Decompiler::new(&image, "Switch").unwrap().to_text();

        let lines: Vec<&str> = text.lines().map(str::trim).collect();
        assert!(lines.contains(&"local_0 = random(local_0);"));
        assert!(lines.contains(&"switch (local_0) {"));
        assert_eq!(lines.iter().filter(|l| l.starts_with("switch")).count(), 1);
        assert_eq!(lines.iter().filter(|l| **l == "} // end-switch").count(), 1);
        assert_eq!(lines.iter().filter(|l| l.starts_with("case ")).count(), 4);
        assert_eq!(lines.iter().filter(|l| **l == "break;").count(), 4);
        assert!(lines.contains(&"case 4:"));
        assert!(lines.contains(&"int local_0;"));
    }

    #[test]
    fn test_self_recursion_terminates() {
        let mut asm = Asm::new();
        asm.prologue(0);
        let call = asm.pos();
        asm.op_arg(Opcode::Call, 0).epilogue();
        let func = asm.pos();
        asm.prologue(0).op_arg(Opcode::Call, func).epilogue();
        asm.patch_jmp(call, func);

        let dec = Decompiler::new(&image(&asm, &[]), "Loop").unwrap();
        let graph = dec.graph();
        assert!(graph.failed().is_empty());

        let callee = &graph.functions()["func_000a"];
        assert_eq!(callee.callers.iter().collect::<Vec<_>>(), vec!["main"]);
        assert_eq!(
            dec.to_text().lines().skip(2).collect::<Vec<_>>(),
            vec![
                "void main() // referenced 1 times",
                "{",
                "   func_000a();",
                "} // end-function",
                "",
                "void func_000a() // referenced 2 times",
                "{",
                "   func_000a();",
                "} // end-function",
                "",
            ]
        );
    }

    #[test]
    fn test_function_only_called_by_dead_code_is_dropped() {
        let mut asm = Asm::new();
        asm.prologue(0).op(Opcode::ExitOp).epilogue();
        // unused stub calling a labeled function
        asm.prologue(0);
        let call = asm.pos();
        asm.op_arg(Opcode::Call, 0).epilogue();
        let func = asm.pos();
        asm.prologue(0).pushi(1).op(Opcode::SayOp).epilogue();
        asm.patch_jmp(call, func);

        let dec = Decompiler::new(&image(&asm, &["", "never"]), "Dead").unwrap();
        let graph = dec.graph();
        let name = format!("func_{:04x}", func);
        let info = &graph.functions()[&name];
        assert_eq!(graph.graph()[info.start_item].xrefs, 0);

        let text = dec.to_text();
        assert!(!text.contains(&name));
        assert!(!text.contains("never"));
        assert!(text.contains("exit;"));
    }

    #[test]
    fn test_header_and_indent_are_configurable() {
        let mut asm = Asm::new();
        asm.prologue(0).op(Opcode::ExitOp).epilogue();
        let config = DecompilerConfig {
            indent: "\t".to_string(),
            header: false,
        };
        let dec = Decompiler::with_config(&image(&asm, &[]), "x", config).unwrap();
        assert_eq!(
            dec.to_text(),
            "void main() // referenced 1 times\n{\n\texit;\n} // end-function\n\n"
        );
    }

    struct OneImage(ConvImage);

    impl ConvSource for OneImage {
        fn load_conversation(&self, slot: u16) -> Result<ConvImage, LoadError> {
            if slot == self.0.slot {
                Ok(self.0.clone())
            } else {
                Err(LoadError::EmptySlot(slot))
            }
        }
    }

    #[test]
    fn test_load_from_source() {
        let mut asm = Asm::new();
        asm.prologue(0).op(Opcode::ExitOp).epilogue();
        let mut image = image(&asm, &[]);
        image.slot = 3;
        let source = OneImage(image);

        let dec = Decompiler::load(&source, 3, DecompilerConfig::default()).unwrap();
        assert_eq!(dec.name(), "conversation 3");
        let mut out = Vec::new();
        dec.write_to(&mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("; conversation for conversation 3\n"));

        assert!(matches!(
            Decompiler::load(&source, 4, DecompilerConfig::default()),
            Err(LoadError::EmptySlot(4))
        ));
    }

    #[test]
    fn test_truncated_code_is_a_load_error() {
        let source = OneImage(ConvImage::new(vec![Opcode::PushI.word()]));
        assert!(matches!(
            Decompiler::load(&source, 0, DecompilerConfig::default()),
            Err(LoadError::Code(DecompileError::TruncatedOperand { pos: 0 }))
        ));
    }
}
