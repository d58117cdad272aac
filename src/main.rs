use clap::{Args, Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uwconv::bytecode::disasm::{print_listing, print_stats};
use uwconv::decompiler::{ConvSource, Decompiler, DecompilerConfig};
use uwconv::loader::{Bundle, ConvGlobals, GameData, LoadError, save_bundle};
use uwconv::runtime::{CodeCallback, CodeVm, ConvStack, Intrinsics, StackFault, VmConfig};

#[derive(Parser, Debug)]
#[command(name = "uwconv")]
#[command(about = "Inspect, decompile and run Ultima Underworld conversations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the code segment instruction by instruction
    Disasm(Input),

    /// Print the conversation as pseudocode
    Decompile {
        #[command(flatten)]
        input: Input,

        /// Indent marker, repeated once per level
        #[arg(long, default_value = "   ")]
        indent: String,

        /// Leave out the `; conversation for` header
        #[arg(long)]
        no_header: bool,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show code and symbol statistics
    Stats(Input),

    /// Play the conversation on the console
    Run {
        #[command(flatten)]
        input: Input,

        /// Seed for the `random` intrinsic
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Conversation globals from a saved game (bglobals.dat)
        #[arg(long, conflicts_with = "initial_globals")]
        globals: Option<PathBuf>,

        /// Initial conversation globals (babglobs.dat)
        #[arg(long)]
        initial_globals: Option<PathBuf>,

        /// Write the updated globals here after the run
        #[arg(long)]
        save_globals: Option<PathBuf>,

        /// Abort after this many instructions
        #[arg(long)]
        max_steps: Option<usize>,

        /// Play as a female character
        #[arg(long)]
        female: bool,

        /// Player name, for conversations that address the player
        #[arg(long, default_value = "Avatar")]
        name: String,
    },

    /// List the conversations in cnv.ark
    List {
        /// Path to cnv.ark
        ark: PathBuf,

        /// String dump with the partner names
        #[arg(long)]
        strings: Option<PathBuf>,
    },

    /// Save a conversation as a standalone bundle
    Pack {
        #[command(flatten)]
        input: Input,

        /// Bundle file to write
        #[arg(short, long)]
        output: PathBuf,
    },
}

/// A bundle file, or a slot of the game's `cnv.ark`.
#[derive(Args, Debug)]
struct Input {
    /// Conversation bundle written by `uwconv pack`
    #[arg(required_unless_present = "ark", conflicts_with = "ark")]
    bundle: Option<PathBuf>,

    /// Path to cnv.ark
    #[arg(long, requires = "slot")]
    ark: Option<PathBuf>,

    /// Conversation slot in cnv.ark
    #[arg(long)]
    slot: Option<u16>,

    /// String dump with the conversation texts
    #[arg(long, requires = "ark")]
    strings: Option<PathBuf>,
}

impl Input {
    fn open(&self) -> Result<(Box<dyn ConvSource>, u16), CliError> {
        match (&self.bundle, &self.ark) {
            (Some(path), _) => {
                let bundle = Bundle::load(path)?;
                let slot = bundle.image().slot;
                Ok((Box::new(bundle), slot))
            }
            (None, Some(ark)) => {
                let data = GameData::open(ark, self.strings.as_deref())?;
                Ok((Box::new(data), self.slot.unwrap_or(0)))
            }
            (None, None) => Err(CliError::NoInput),
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Load(#[from] LoadError),

    #[error("stack setup failed: {0}")]
    Stack(#[from] StackFault),

    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("give a bundle or --ark and --slot")]
    NoInput,
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    if let Err(e) = dispatch(cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("uwconv=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn dispatch(command: Command) -> Result<(), CliError> {
    match command {
        Command::Disasm(input) => {
            let (source, slot) = input.open()?;
            print_listing(&source.load_conversation(slot)?);
        }
        Command::Stats(input) => {
            let (source, slot) = input.open()?;
            print_stats(&source.load_conversation(slot)?);
        }
        Command::Decompile {
            input,
            indent,
            no_header,
            output,
        } => {
            let (source, slot) = input.open()?;
            let config = DecompilerConfig {
                indent,
                header: !no_header,
            };
            let decompiler = Decompiler::load(source.as_ref(), slot, config)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, decompiler.to_text())?;
                    info!(path = %path.display(), "wrote pseudocode");
                }
                None => decompiler.write_to(&mut io::stdout().lock())?,
            }
        }
        Command::Run {
            input,
            seed,
            globals,
            initial_globals,
            save_globals,
            max_steps,
            female,
            name,
        } => {
            let (source, slot) = input.open()?;
            let globals = match (globals, initial_globals) {
                (Some(path), _) => ConvGlobals::load(path, false)?,
                (None, Some(path)) => ConvGlobals::load(path, true)?,
                (None, None) => ConvGlobals::new(),
            };
            let options = RunOptions {
                seed,
                max_steps,
                female,
                name,
                save_globals,
            };
            run_conversation(source.as_ref(), slot, globals, options)?;
        }
        Command::List { ark, strings } => {
            let data = GameData::open(ark, strings.as_deref())?;
            for slot in data.archive().slots() {
                let name = data.strings().conversation_name(slot).unwrap_or("");
                println!("{:4} {}", slot, name);
            }
        }
        Command::Pack { input, output } => {
            let (source, slot) = input.open()?;
            let image = source.load_conversation(slot)?;
            save_bundle(&image, &output)?;
            info!(slot, path = %output.display(), "wrote bundle");
        }
    }
    Ok(())
}

struct RunOptions {
    seed: u64,
    max_steps: Option<usize>,
    female: bool,
    name: String,
    save_globals: Option<PathBuf>,
}

fn run_conversation(
    source: &dyn ConvSource,
    slot: u16,
    mut globals: ConvGlobals,
    options: RunOptions,
) -> Result<(), CliError> {
    let image = source.load_conversation(slot)?;
    let mut persisted = globals.get(slot).to_vec();
    if persisted.is_empty() {
        persisted = vec![0; image.globals_reserved as usize];
    }

    let mut intrinsics = Intrinsics::new(image.strings.clone(), options.seed);
    intrinsics.player_gender = options.female as u16;
    intrinsics.player_name = options.name;

    let config = VmConfig {
        max_steps: options.max_steps,
        ..VmConfig::default()
    };
    let mut vm = CodeVm::with_config(image, config);
    vm.init(ConsoleHost::new(intrinsics), &persisted)?;

    while vm.step() {
        print_pending(&mut vm);
    }
    print_pending(&mut vm);

    if let Some(fault) = vm.fault() {
        warn!("conversation stopped: {}", fault);
    }

    vm.done(&mut persisted);
    globals.set(slot, persisted);
    if let Some(path) = options.save_globals {
        save_globals(&globals, &path)?;
    }
    Ok(())
}

fn save_globals(globals: &ConvGlobals, path: &Path) -> Result<(), LoadError> {
    globals.save(path)?;
    info!(path = %path.display(), "saved conversation globals");
    Ok(())
}

/// Print what the conversation said since the last step. Placeholders are
/// expanded against the stack as it is right after the SAY_OP.
fn print_pending(vm: &mut CodeVm<ConsoleHost>) {
    let pending = match vm.callback_mut() {
        Some(host) => std::mem::take(&mut host.pending),
        None => return,
    };
    let Some(host) = vm.callback() else {
        return;
    };
    for id in pending {
        let text = host.text(id);
        println!("{}", vm.replace_placeholders(&text, host.intrinsics.strings()));
    }
}

/// Console side of a conversation: prints text, asks for menu choices on
/// stdin and answers imported functions with the stock intrinsics.
struct ConsoleHost {
    intrinsics: Intrinsics,
    /// Said but not yet printed.
    pending: Vec<u16>,
}

impl ConsoleHost {
    fn new(intrinsics: Intrinsics) -> Self {
        Self {
            intrinsics,
            pending: Vec::new(),
        }
    }

    fn text(&self, id: u16) -> String {
        match self.intrinsics.string(id) {
            Some(text) => text.to_string(),
            None => format!("<string {}>", id),
        }
    }

    fn read_choice(&self, count: usize) -> u16 {
        let stdin = io::stdin();
        let mut line = String::new();
        loop {
            print!("> ");
            if let Err(e) = io::stdout().flush() {
                warn!("cannot flush stdout: {}", e);
            }
            line.clear();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => {
                    warn!("no more input, picking the first answer");
                    return 1;
                }
                Ok(_) => {}
            }
            match line.trim().parse::<usize>() {
                Ok(n) if (1..=count).contains(&n) => return n as u16,
                _ => println!("pick 1 to {}", count),
            }
        }
    }
}

impl CodeCallback for ConsoleHost {
    fn say(&mut self, text_id: u16) {
        self.pending.push(text_id);
    }

    fn menu(&mut self, choice_ids: &[u16]) -> u16 {
        if choice_ids.is_empty() {
            warn!("empty menu");
            return 0;
        }
        println!();
        for (i, id) in choice_ids.iter().enumerate() {
            println!("{}. {}", i + 1, self.text(*id));
        }
        self.read_choice(choice_ids.len())
    }

    fn get_global(&mut self, name: &str) -> u16 {
        match self.intrinsics.global(name) {
            Some(value) => value,
            None => {
                info!(global = name, "no value for imported global, using 0");
                0
            }
        }
    }

    fn call_external(&mut self, name: &str, stack: &mut ConvStack) -> u16 {
        match self.intrinsics.call(name, stack) {
            Some(result) => result,
            None => {
                info!(function = name, "imported function not available, returning 0");
                0
            }
        }
    }
}
