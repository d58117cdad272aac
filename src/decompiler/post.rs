use crate::bytecode::DataType;
use crate::decompiler::builder::CodeGraph;
use crate::decompiler::func_info::FuncInfo;

impl CodeGraph {
    /// Wrap the function body into its signature, braces and declarations.
    pub(crate) fn post_process_function(&mut self, info: &FuncInfo) {
        let start = info.start_item;

        let params = info
            .param_types
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{} param{}", t.as_str(), i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let signature = format!(
            "{} {}({}) // referenced {} times",
            info.return_type.as_str(),
            info.name,
            params,
            self.graph[start].xrefs
        );
        self.add_statement(start, signature, true);

        let brace = self.add_statement(start, "{", true);
        self.set_indent(brace, 0, 1);

        for (index, data_type) in info.locals_types.iter().enumerate() {
            let is_array = info.arrays.iter().any(|a| a.local_start as usize == index);
            if *data_type != DataType::Unknown && !is_array {
                self.add_statement(start, format!("{} local_{};", data_type.as_str(), index), true);
            }
        }

        for array in &info.arrays {
            let data_type = match info.locals_types.get(array.local_start as usize) {
                Some(DataType::Unknown) | None => DataType::Int,
                Some(t) => *t,
            };
            self.add_statement(
                start,
                format!("{} local_{}[{}];", data_type.as_str(), array.local_start, array.size),
                true,
            );
        }

        let end = self.add_statement(info.end_item, "} // end-function", true);
        self.set_indent(end, -1, 0);
        if let Some(after) = self.graph.next(info.end_item) {
            self.add_statement(after, "", false);
        }
    }
}
