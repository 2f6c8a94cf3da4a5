//! CLI front-end for the live-patch ELF engine: subcommand dispatch on the
//! first positional per spec §6 (`diff`, `extract`, `changeCallSymbol`,
//! `disassemble`, `callchain`).

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use kpatch_extract::builder::ElfBuilder;
use kpatch_extract::disasm::render::render_function;
use kpatch_extract::disasm::rewrite::rewrite_function;
use kpatch_extract::elf::ElfView;
use kpatch_extract::{callchain, changecall, diff, extract};
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "kpatch-extract", about = "ELF diffing, symbol extraction and relocation rewriting for kernel live patches")]
struct Opt {
    /// Repeatable: raises the log filter warn -> info -> debug -> trace.
    #[structopt(short = "v", long = "verbose", parse(from_occurrences), global = true)]
    verbose: u8,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt, Debug)]
enum Command {
    /// Print one line per changed symbol between two object files.
    Diff {
        #[structopt(short = "a")]
        original: PathBuf,
        #[structopt(short = "b")]
        modified: PathBuf,
    },
    /// Build an output object containing the closure of the named symbols.
    Extract {
        #[structopt(short = "f")]
        input: PathBuf,
        #[structopt(short = "o")]
        output: PathBuf,
        #[structopt(short = "s", long = "symbol")]
        symbols: Vec<String>,
    },
    /// Rewrite every relocation referencing OLD to reference NEW instead.
    #[structopt(name = "changeCallSymbol")]
    ChangeCallSymbol {
        #[structopt(short = "s")]
        old: String,
        #[structopt(short = "d")]
        new: String,
        input: PathBuf,
    },
    /// Print the disassembly of one named function.
    Disassemble {
        #[structopt(short = "f")]
        input: PathBuf,
        #[structopt(short = "s", long = "symbol")]
        symbol: String,
        /// Run the JMP->reloc rewriter (C7) first.
        #[structopt(short = "r")]
        rewrite: bool,
    },
    /// Print every call chain starting from each function, DFS, cycle-free.
    Callchain {
        #[structopt(short = "f")]
        input: PathBuf,
    },
}

impl Command {
    /// The name printed in the `error: {file}:{subcommand}: {err}` contract.
    fn name(&self) -> &'static str {
        match self {
            Command::Diff { .. } => "diff",
            Command::Extract { .. } => "extract",
            Command::ChangeCallSymbol { .. } => "changeCallSymbol",
            Command::Disassemble { .. } => "disassemble",
            Command::Callchain { .. } => "callchain",
        }
    }

    /// The input object the subcommand centers on, for the same contract.
    /// `diff` names two files; the `-a` one is the reference point.
    fn primary_file(&self) -> &PathBuf {
        match self {
            Command::Diff { original, .. } => original,
            Command::Extract { input, .. } => input,
            Command::ChangeCallSymbol { input, .. } => input,
            Command::Disassemble { input, .. } => input,
            Command::Callchain { input } => input,
        }
    }
}

fn open_view(path: &PathBuf) -> Result<ElfView> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(ElfView::parse(&bytes)?)
}

fn run(opt: Opt) -> Result<()> {
    match opt.command {
        Command::Diff { original, modified } => {
            let a = open_view(&original)?;
            let b = open_view(&modified)?;
            for entry in diff::diff(&a, &b)? {
                println!("{}: {}", entry.classification.label(), entry.name);
            }
        }
        Command::Extract { input, output, symbols } => {
            let view = open_view(&input)?;
            let builder = extract::extract(&view, &symbols)?;
            let bytes = builder.write()?;
            fs::write(&output, bytes).with_context(|| format!("writing {}", output.display()))?;
        }
        Command::ChangeCallSymbol { old, new, input } => {
            let view = open_view(&input)?;
            let builder = changecall::change_call_symbol(&view, &old, &new)?;
            let bytes = builder.write()?;
            fs::write(&input, bytes).with_context(|| format!("writing {}", input.display()))?;
        }
        Command::Disassemble { input, symbol, rewrite } => {
            let view = open_view(&input)?;
            let sym = view
                .symbol_by_name(&symbol)
                .ok_or_else(|| {
                    log::error!("disassemble: unknown symbol {}", symbol);
                    kpatch_extract::Error::UnknownSymbol(symbol.clone())
                })?
                .clone();
            if rewrite {
                let mut builder = ElfBuilder::new();
                let section = view.section_by_index(sym.section_index).ok_or_else(|| {
                    log::error!("disassemble: {} references missing section {}", sym.name, sym.section_index);
                    kpatch_extract::Error::malformed_at("symbol references missing section", sym.section_index)
                })?;
                let start = sym.value as usize;
                let end = start + sym.size as usize;
                let mut code = section.data[start..end].to_vec();
                rewrite_function(&view, &sym, &mut code, |target| builder.copy_symbol(&view, target.index, false))?;
                println!("{:02x?}", code);
            } else {
                println!("{}", render_function(&view, &sym)?);
            }
        }
        Command::Callchain { input } => {
            let view = open_view(&input)?;
            for chain in callchain::callchains(&view)? {
                println!("{}", chain.join(" "));
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let opt = Opt::from_args();
    let level = match opt.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let subcommand = opt.command.name();
    let file = opt.command.primary_file().display().to_string();

    match run(opt) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}: {}: {:#}", file, subcommand, err);
            eprintln!("error: {file}:{subcommand}: {err:#}");
            ExitCode::FAILURE
        }
    }
}
