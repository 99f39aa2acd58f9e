//! MCL CLI - machine-code lifter.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mcl::toy::{ToyTranslator, TOY_SP};
use mcl::{Abi, Address, Config, Image, Lifter};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mcl")]
#[command(about = "Machine-code lifter - decodes binaries into typed IR")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lift a raw code file (toy ISA) and report the decoded CFG
    Lift {
        /// Input file with raw code bytes
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Load address of the code
        #[arg(long, value_parser = parse_address, default_value = "0x1000")]
        base: u64,

        /// Entry point (defaults to the load address)
        #[arg(long, value_parser = parse_address)]
        entry: Option<u64>,

        /// Write the control-flow JSON dump here
        #[arg(long)]
        cfg_json: Option<PathBuf>,

        /// Cap on symbolic expansion depth in the stack pass
        #[arg(long, default_value = "32")]
        max_depth: usize,
    },
}

fn parse_address(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", s, e))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("mcl=info".parse().unwrap()))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Lift {
            input,
            base,
            entry,
            cfg_json,
            max_depth,
        } => {
            if let Err(e) = lift(&input, base, entry, cfg_json.as_deref(), max_depth) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn lift(
    input: &std::path::Path,
    base: u64,
    entry: Option<u64>,
    cfg_json: Option<&std::path::Path>,
    max_depth: usize,
) -> mcl::Result<()> {
    info!(input = %input.display(), base = %Address::new(base), "lifting");

    let code = std::fs::read(input)?;
    let mut image = Image::from_code(code, base);
    image.entry_point = entry.unwrap_or(base);

    let config = Config::new().with_max_expansion_depth(max_depth);
    let lifter = Lifter::new(&image, Abi::new(TOY_SP)).with_config(config);
    let result = lifter.run(&mut ToyTranslator::new())?;

    let functions = result.index.functions().count();
    let blocks = result.index.blocks().count();
    info!(functions, blocks, changed = result.changed, "lifted");

    if let Some(path) = cfg_json {
        std::fs::write(path, &result.cfg_json)?;
        info!(output = %path.display(), "control-flow dump written");
    }

    Ok(())
}
