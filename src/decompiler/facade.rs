use crate::bytecode::ConvImage;
use crate::decompiler::builder::CodeGraph;
use crate::decompiler::decompile_error::DecompileError;
use crate::loader::LoadError;
use std::io;

/// Somewhere conversations can be loaded from.
pub trait ConvSource {
    fn load_conversation(&self, slot: u16) -> Result<ConvImage, LoadError>;

    /// Display name of the conversation partner, if known.
    fn conversation_name(&self, _slot: u16) -> Option<String> {
        None
    }
}

/// Decompiler configuration
#[derive(Debug, Clone)]
pub struct DecompilerConfig {
    /// Repeated once per indent level.
    pub indent: String,
    /// Write the `; conversation for` header line.
    pub header: bool,
}

impl Default for DecompilerConfig {
    fn default() -> Self {
        Self {
            indent: "   ".to_string(),
            header: true,
        }
    }
}

/// One decompiled conversation.
#[derive(Debug, Clone)]
pub struct Decompiler {
    config: DecompilerConfig,
    name: String,
    graph: CodeGraph,
}

impl Decompiler {
    pub fn new(image: &ConvImage, name: impl Into<String>) -> Result<Self, DecompileError> {
        Self::with_config(image, name, DecompilerConfig::default())
    }

    pub fn with_config(
        image: &ConvImage,
        name: impl Into<String>,
        config: DecompilerConfig,
    ) -> Result<Self, DecompileError> {
        let mut graph = CodeGraph::new(image)?;
        graph.decompile();
        Ok(Self {
            config,
            name: name.into(),
            graph,
        })
    }

    /// Load conversation `slot` from `source` and decompile it.
    pub fn load<S: ConvSource + ?Sized>(
        source: &S,
        slot: u16,
        config: DecompilerConfig,
    ) -> Result<Self, LoadError> {
        let image = source.load_conversation(slot)?;
        let name = source
            .conversation_name(slot)
            .unwrap_or_else(|| format!("conversation {}", slot));
        Ok(Self::with_config(&image, name, config)?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &CodeGraph {
        &self.graph
    }

    pub fn to_text(&self) -> String {
        let mut text = String::new();
        if self.config.header {
            text.push_str(&format!("; conversation for {}\n\n", self.name));
        }
        text.push_str(&self.graph.format_code(&self.config.indent));
        text
    }

    pub fn write_to<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(self.to_text().as_bytes())
    }
}
