use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gsr_jit::compiler::{CompileOptions, Compiler, HotReloader, ScriptSource};
use gsr_jit::ir::{ModuleResolver, ResolvedModule};
use gsr_jit::JitError;

#[derive(Parser)]
#[command(name = "gsr-jit")]
#[command(author, version, about = "JIT compiler for gameplay scripts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Attribute that marks the entry function
    #[arg(long = "entry-attr", global = true, default_value = "entry")]
    entry_attr: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a script, run its entry function and print the result
    Run {
        /// The script to run
        input: PathBuf,
    },

    /// Check a script for errors without generating code
    Check {
        /// The script to check
        input: PathBuf,
    },

    /// Print the generated machine code
    Dump {
        /// The script to compile
        input: PathBuf,

        /// Also print the IR as JSON
        #[arg(long)]
        ir: bool,

        /// Do not print the machine code
        #[arg(long)]
        no_code: bool,
    },

    /// Re-run a script whenever it or one of its module files changes
    Watch {
        /// The script to watch
        input: PathBuf,
    },
}

/// Quiet period that folds an editor's burst of writes into one reload
const DEBOUNCE: Duration = Duration::from_millis(200);

fn main() -> Result<()> {
    let cli = Cli::parse();

    // `--verbose` overrides RUST_LOG
    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    let options = CompileOptions {
        entry_attribute: cli.entry_attr,
        ..CompileOptions::default()
    };

    let result = match cli.command {
        Commands::Run { input } => run(&input, options),
        Commands::Check { input } => check(&input, options),
        Commands::Dump { input, ir, no_code } => dump(&input, options, ir, no_code),
        Commands::Watch { input } => watch(&input, options),
    };

    if let Err(e) = result {
        eprintln!("{}: {}", "error".red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}

/// Resolves `mod name;` to `name.rs` or `name/mod.rs` next to the root script
struct FileResolver {
    root: PathBuf,
    /// Canonical paths of every module file loaded so far
    loaded: Arc<Mutex<HashSet<PathBuf>>>,
}

impl FileResolver {
    fn for_script(input: &Path) -> Self {
        let root = input.parent().unwrap_or(Path::new(".")).to_path_buf();
        Self {
            root,
            loaded: Arc::default(),
        }
    }

    fn loaded(&self) -> Arc<Mutex<HashSet<PathBuf>>> {
        Arc::clone(&self.loaded)
    }

    fn candidates(&self, path: &[String]) -> [PathBuf; 2] {
        let mut dir = self.root.clone();
        for segment in path {
            dir.push(segment);
        }
        [dir.with_extension("rs"), dir.join("mod.rs")]
    }
}

impl ModuleResolver for FileResolver {
    fn resolve(&self, path: &[String]) -> Option<ResolvedModule> {
        let file = self.candidates(path).into_iter().find(|p| p.is_file())?;
        let key = fs::canonicalize(&file).unwrap_or_else(|_| file.clone());
        if let Ok(mut loaded) = self.loaded.lock() {
            loaded.insert(key.clone());
        }
        let source = match fs::read_to_string(&file) {
            Ok(source) => source,
            Err(e) => {
                log::warn!("failed to read module {}: {}", file.display(), e);
                return None;
            }
        };
        match syn::parse_file(&source) {
            Ok(parsed) => Some(ResolvedModule {
                key: key.display().to_string(),
                file: parsed,
            }),
            Err(e) => {
                log::warn!("failed to parse module {}: {}", file.display(), e);
                None
            }
        }
    }
}

fn compiler_for(input: &Path, options: CompileOptions) -> Compiler {
    Compiler::new(options).with_resolver(FileResolver::for_script(input))
}

/// Parse the script, reporting syntax errors as diagnostics
fn parse(state: &ScriptSource) -> Result<syn::File> {
    match state.parse() {
        Ok(file) => Ok(file),
        Err(e) => {
            state.report(&e)?;
            anyhow::bail!("parsing failed");
        }
    }
}

fn run(input: &Path, options: CompileOptions) -> Result<()> {
    let state = ScriptSource::from_path(input)?;
    let file = parse(&state)?;
    let compiler = compiler_for(input, options);

    let unit = match compiler.compile(&file) {
        Ok(unit) => unit,
        Err(e) => {
            state.report(&e)?;
            anyhow::bail!("compilation failed");
        }
    };
    let image = compiler.load(&unit).context("failed to load compiled code")?;
    let value = image.invoke();
    log::debug!("{} returned {}", image.entry_path(), value);
    image.release();

    println!("{}", value);
    Ok(())
}

fn check(input: &Path, options: CompileOptions) -> Result<()> {
    log::info!("Checking {:?}", input);

    let state = ScriptSource::from_path(input)?;
    let file = parse(&state)?;
    let compiler = compiler_for(input, options);

    match compiler.check_all(&file) {
        Ok(module) => {
            let entry = module.entry().map(|f| f.path.as_str()).unwrap_or("-");
            println!(
                "{}: {} function(s), entry {}",
                "ok".green().bold(),
                module.functions().len(),
                entry
            );
            Ok(())
        }
        Err(errors) => {
            state.report_all(&errors)?;
            anyhow::bail!("found {} error(s)", errors.len());
        }
    }
}

fn dump(input: &Path, options: CompileOptions, ir: bool, no_code: bool) -> Result<()> {
    let state = ScriptSource::from_path(input)?;
    let file = parse(&state)?;
    let compiler = compiler_for(input, options);

    if ir {
        let module = match compiler.build_ir(&file) {
            Ok(module) => module,
            Err(e) => {
                state.report(&e)?;
                anyhow::bail!("compilation failed");
            }
        };
        println!("{}", "=== IR ===".blue().bold());
        println!("{}", serde_json::to_string_pretty(&module)?);
        println!();
    }

    if no_code {
        return Ok(());
    }

    let unit = match compiler.compile(&file) {
        Ok(unit) => unit,
        Err(e) => {
            state.report(&e)?;
            anyhow::bail!("compilation failed");
        }
    };

    println!("{}", "=== Code ===".blue().bold());
    print!("{}", unit.disassembly());
    println!();
    println!("{}", "=== Bytes ===".blue().bold());
    print!("{}", unit.hex_dump());
    Ok(())
}

fn watch(input: &Path, options: CompileOptions) -> Result<()> {
    let input = fs::canonicalize(input).with_context(|| format!("failed to read {:?}", input))?;
    let dir = input.parent().unwrap_or(Path::new(".")).to_path_buf();

    let resolver = FileResolver::for_script(&input);
    let modules = resolver.loaded();
    let mut reloader = HotReloader::new(Compiler::new(options).with_resolver(resolver));

    // Watch the directory: atomic saves replace the file itself
    let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(tx).context("failed to start the file watcher")?;
    watcher
        .watch(&dir, RecursiveMode::Recursive)
        .with_context(|| format!("failed to watch {:?}", dir))?;

    println!("{}: watching {:?} (Ctrl-C to stop)", "info".blue().bold(), input);
    reload(&mut reloader, &input)?;

    loop {
        let event = rx.recv().context("file watcher stopped")?;
        if !touches(&event, &input, &modules) {
            continue;
        }
        while rx.recv_timeout(DEBOUNCE).is_ok() {}
        reload(&mut reloader, &input)?;
    }
}

/// Does the event change the root script or a module file it loaded?
fn touches(event: &notify::Result<Event>, input: &Path, modules: &Mutex<HashSet<PathBuf>>) -> bool {
    let event = match event {
        Ok(event) => event,
        Err(e) => {
            log::warn!("watch error: {}", e);
            return false;
        }
    };
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    let modules = match modules.lock() {
        Ok(modules) => modules,
        Err(_) => return false,
    };
    event
        .paths
        .iter()
        .any(|path| path == input || modules.contains(path))
}

/// One reload cycle; compile errors are reported and the previous image stays
fn reload(reloader: &mut HotReloader, input: &Path) -> Result<()> {
    // the file is briefly missing while an editor swaps it in
    let state = match ScriptSource::from_path(input) {
        Ok(state) => state,
        Err(e) => {
            log::warn!("{}", e);
            println!(
                "{}: keeping generation {}",
                "reload failed".yellow().bold(),
                reloader.generation()
            );
            return Ok(());
        }
    };

    match reloader.reload_source(&state.source) {
        Ok(previous) => {
            // nothing can be executing the old image here
            drop(previous);
            if let Some(value) = reloader.invoke() {
                println!(
                    "{} {}: {}",
                    "reload".green().bold(),
                    reloader.generation(),
                    value
                );
            }
        }
        Err(JitError::MemoryMap(e)) => return Err(e).context("failed to load compiled code"),
        Err(e) => {
            state.report(&e)?;
            println!(
                "{}: keeping generation {}",
                "reload failed".yellow().bold(),
                reloader.generation()
            );
        }
    }
    Ok(())
}
