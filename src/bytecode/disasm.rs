use crate::bytecode::op::{Opcode, format_operand, jump_target};
use crate::bytecode::ConvImage;
use std::collections::{BTreeSet, HashMap};

/// Print disassembly of a conversation's code segment
pub fn print_listing(image: &ConvImage) {
    println!("=== CONVERSATION {} ===\n", image.slot);
    print!("{}", disassemble_to_string(image));
}

/// Return disassembly as a String
pub fn disassemble_to_string(image: &ConvImage) -> String {
    let mut output = String::new();
    let jump_targets = collect_jump_targets(&image.code);

    for (pos, op, arg) in decode(&image.code) {
        if jump_targets.contains(&pos) {
            output.push_str(&format!("label_{:04x}:\n", pos));
        }
        output.push_str(&format!("   {:04x} ", pos));
        output.push_str(&format_instruction(image, pos, op, arg));
        output.push('\n');
    }

    output
}

/// Walk the code one instruction at a time; unknown words decode as `Err(word)`.
fn decode(code: &[u16]) -> Vec<(u16, Result<Opcode, u16>, u16)> {
    let mut out = Vec::new();
    let mut pos = 0;

    while pos < code.len() {
        let word = code[pos];
        match Opcode::from_word(word) {
            Some(op) if op.has_operand() => {
                // a missing trailing operand reads as zero
                let arg = code.get(pos + 1).copied().unwrap_or(0);
                out.push((pos as u16, Ok(op), arg));
                pos += 2;
            }
            Some(op) => {
                out.push((pos as u16, Ok(op), 0));
                pos += 1;
            }
            None => {
                out.push((pos as u16, Err(word), 0));
                pos += 1;
            }
        }
    }

    out
}

fn collect_jump_targets(code: &[u16]) -> BTreeSet<u16> {
    decode(code)
        .into_iter()
        .filter_map(|(pos, op, arg)| match op {
            Ok(op) if op.is_jump() => Some(jump_target(op, pos, arg)),
            _ => None,
        })
        .collect()
}

fn format_instruction(image: &ConvImage, pos: u16, op: Result<Opcode, u16>, arg: u16) -> String {
    let op = match op {
        Ok(op) => op,
        Err(word) => return format!("??? (0x{:04x})", word),
    };

    match op {
        Opcode::CallI => match image.imported_funcs.get(&arg) {
            Some(import) => format!("{} {}", op.mnemonic(), import.name),
            None => format!("{}{}", op.mnemonic(), format_operand(op, arg)),
        },
        op if op.is_jump() => {
            format!("{} label_{:04x}", op.mnemonic(), jump_target(op, pos, arg))
        }
        op => format!("{}{}", op.mnemonic(), format_operand(op, arg)),
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Print code statistics
pub fn print_stats(image: &ConvImage) {
    println!("=== CODE STATISTICS ===\n");

    let instructions = decode(&image.code);
    let total_ops = instructions.len();
    let functions = instructions
        .iter()
        .filter(|(_, op, _)| *op == Ok(Opcode::PushBp))
        .count();

    println!("Conversation:     {}", image.slot);
    println!("String block:     {}", image.string_block);
    println!("Code words:       {}", image.code.len());
    println!("Instructions:     {}", total_ops);
    println!("Functions:        {}", functions);
    println!("Strings:          {}", image.strings.len());
    println!("Imported funcs:   {}", image.imported_funcs.len());
    println!("Imported globals: {}", image.imported_globals.len());
    println!("Reserved globals: {}", image.globals_reserved);
    println!();

    let mut op_counts: HashMap<&str, usize> = HashMap::new();
    count_ops(&image.code, &mut op_counts);

    println!("Op frequency:");
    let mut counts: Vec<_> = op_counts.iter().collect();
    counts.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

    for (op, count) in counts.iter().take(10) {
        let pct = (**count as f64 / total_ops.max(1) as f64) * 100.0;
        println!("  {:<14} {:>4} ({:>5.1}%)", op, count, pct);
    }
}

fn count_ops(code: &[u16], counts: &mut HashMap<&'static str, usize>) {
    for (_, op, _) in decode(code) {
        *counts.entry(op_name(op)).or_insert(0) += 1;
    }
}

fn op_name(op: Result<Opcode, u16>) -> &'static str {
    match op {
        Ok(op) => op.mnemonic(),
        Err(_) => "???",
    }
}
