use crate::decompiler::builder::CodeGraph;
use crate::decompiler::func_info::FuncInfo;
use crate::decompiler::item::{ItemKind, format_opcode};
use std::fmt::Write;

/// How a function's code range is written out.
enum Range<'a> {
    Hidden,
    Raw(&'a FuncInfo, String),
}

impl CodeGraph {
    /// Pseudocode text of the whole graph, one line per open item.
    ///
    /// Functions with no references are left out. A function whose analysis
    /// failed is written as its raw instructions under a comment naming the
    /// error.
    pub fn format_code(&self, indent: &str) -> String {
        let ranges = self.function_ranges();
        let mut out = String::new();
        let mut level: i32 = 0;
        let mut raw_started: Option<&str> = None;

        for (_, item) in self.graph.iter() {
            match ranges.iter().find(|(start, end, _)| (*start..=*end).contains(&item.pos)) {
                Some((_, _, Range::Hidden)) => continue,
                Some((_, _, Range::Raw(info, error))) => {
                    if raw_started != Some(info.name.as_str()) {
                        raw_started = Some(info.name.as_str());
                        let _ = writeln!(out, "// {}: decompiling failed: {}", info.name, error);
                    }
                    // folding may have moved the label onto an expression
                    if let Some(label) = &item.label {
                        let _ = writeln!(out, "{}:", label);
                    }
                    if let ItemKind::Opcode(data) = &item.kind {
                        let _ = writeln!(out, "{}", format_opcode(item.pos, data, false));
                    }
                    continue;
                }
                None => {}
            }

            if item.processed {
                continue;
            }
            match &item.kind {
                ItemKind::Statement(data) => {
                    level += data.indent_before;
                    let _ = writeln!(out, "{}{}", indent.repeat(level.max(0) as usize), data.text);
                    level += data.indent_after;
                }
                ItemKind::FuncStart | ItemKind::FuncEnd => {}
                _ => {
                    if let Some(label) = &item.label {
                        let _ = writeln!(out, "{}:", label);
                    }
                    let _ = writeln!(out, "{}{}", indent.repeat(level.max(0) as usize), item.format());
                }
            }
        }
        out
    }

    /// Code ranges of hidden and failed functions, epilogue included.
    fn function_ranges(&self) -> Vec<(u16, u16, Range<'_>)> {
        self.functions
            .values()
            .filter_map(|info| {
                let end = info.end.saturating_add(2);
                let start = &self.graph[info.start_item];
                if start.xrefs == 0 || info.is_unused_stub() {
                    Some((info.start, end, Range::Hidden))
                } else {
                    self.failed
                        .get(&info.name)
                        .map(|err| (info.start, end, Range::Raw(info, err.to_string())))
                }
            })
            .collect()
    }
}
