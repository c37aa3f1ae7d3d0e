use clap::{ArgAction, Parser, ValueEnum};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tracing_subscriber::{EnvFilter, fmt};
use vmagick::vm::dump;
use vmagick::{Image, OutputFormat, RuntimeConfig};

// Wrapper type for clap ValueEnum support
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum FormatArg {
    #[default]
    Human,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Human => OutputFormat::Human,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

#[derive(Parser)]
#[command(name = "vmagick")]
#[command(about = "Run a vmagick bytecode image", long_about = None)]
struct Cli {
    /// The binary image to run
    image: PathBuf,

    /// Stop with an error after this many executed instructions
    #[arg(long, value_name = "N")]
    max_steps: Option<u64>,

    /// Statically verify the image before running it
    #[arg(long)]
    verify: bool,

    /// Profile opcode execution counts
    #[arg(long)]
    profile_opcodes: bool,

    /// Output format for the final accumulator (human or json)
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Read runtime settings from a TOML file; flags take precedence
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log more (-v debug, -vv trace); VMAGICK_LOG overrides
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Dump the disassembled image to stderr, or to a file with --dump-image=path
    #[arg(long, value_name = "FILE", num_args = 0..=1, require_equals = true)]
    dump_image: Option<Option<PathBuf>>,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("VMAGICK_LOG").unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> vmagick::Result<()> {
    let config = build_config(cli)?;
    let image = Image::load(&cli.image)?;

    if let Some(target) = &cli.dump_image {
        dump_image(&image, target.as_deref())?;
    }

    let outcome = vmagick::execute(&image, &config)?;

    if let Some(profile) = &outcome.profile {
        eprint!("{}", profile.report());
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match config.format {
        OutputFormat::Human => outcome.accumulator.write_human(&mut out)?,
        OutputFormat::Json => writeln!(out, "{}", outcome.to_json()?)?,
    }
    out.flush()?;
    Ok(())
}

/// Config file values, then command-line flags on top.
fn build_config(cli: &Cli) -> vmagick::Result<RuntimeConfig> {
    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };

    if cli.max_steps.is_some() {
        config.max_steps = cli.max_steps;
    }
    if cli.verify {
        config.verify = true;
    }
    if cli.profile_opcodes {
        config.profile_opcodes = true;
    }
    if let Some(format) = cli.format {
        config.format = format.into();
    }
    Ok(config)
}

fn dump_image(image: &Image, target: Option<&Path>) -> vmagick::Result<()> {
    let text = dump::format_image(image);
    match target {
        Some(path) => std::fs::write(path, text)?,
        None => eprint!("{}", text),
    }
    Ok(())
}
