//! Command-line driver: compile program bundles, generate catalogues.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use bumpalo::Bump;
use clap::{Parser, Subcommand};
use log::{debug, error, info};

use ic10c::catalogue;
use ic10c::codegen::{compile_bundle, CompileOptions};
use ic10c::core::CompilationSession;
use ic10c::sbil::ProgramBundle;

#[derive(Parser)]
#[command(name = "ic10c")]
#[command(about = "Compile SBIL program bundles to IC10 assembly", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile every program class in a bundle to `{ClassName}.ic10`.
    Compile {
        /// Bundle JSON produced by the front-end.
        input: PathBuf,
        /// Directory the .ic10 files are written into (default: cwd).
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Skip the IC10 optimiser.
        #[arg(long)]
        no_optimise: bool,
        /// Emit SBIL instructions as comments above each fragment.
        #[arg(long)]
        comments: bool,
    },
    /// Generate device interface declarations from PrefabData.json.
    Catalogue {
        /// The PrefabData.json dump.
        input: PathBuf,
        /// Output file (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Compile {
            input,
            out_dir,
            no_optimise,
            comments,
        } => compile(input, out_dir, no_optimise, comments),
        Command::Catalogue { input, output } => generate_catalogue(input, output),
    }
}

fn compile(
    input: PathBuf,
    out_dir: Option<PathBuf>,
    no_optimise: bool,
    comments: bool,
) -> ExitCode {
    let json = match fs::read_to_string(&input) {
        Ok(json) => json,
        Err(err) => {
            error!("cannot read {}: {err}", input.display());
            return ExitCode::FAILURE;
        }
    };
    let bundle: ProgramBundle = match serde_json::from_str(&json) {
        Ok(bundle) => bundle,
        Err(err) => {
            error!("{} is not a valid program bundle: {err}", input.display());
            return ExitCode::FAILURE;
        }
    };
    let options = CompileOptions {
        optimise: !no_optimise,
        comments,
    };
    let out_dir = out_dir.unwrap_or_else(|| PathBuf::from("."));

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut failed = false;
    for (class_name, result) in compile_bundle(&session, &bundle, &options) {
        match result {
            Ok(text) => {
                let path = out_dir.join(format!("{class_name}.ic10"));
                match fs::write(&path, text) {
                    Ok(()) => info!("{class_name} -> {}", path.display()),
                    Err(err) => {
                        error!("cannot write {}: {err}", path.display());
                        failed = true;
                    }
                }
            }
            Err(err) => {
                error!("{class_name}: {err}");
                failed = true;
            }
        }
    }
    debug!("session: {}", session.stats());
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn generate_catalogue(input: PathBuf, output: Option<PathBuf>) -> ExitCode {
    let json = match fs::read_to_string(&input) {
        Ok(json) => json,
        Err(err) => {
            error!("cannot read {}: {err}", input.display());
            return ExitCode::FAILURE;
        }
    };
    let generated = match catalogue::generate_from_json(&json) {
        Ok(generated) => generated,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };
    match output {
        Some(path) => {
            if let Err(err) = fs::write(&path, generated) {
                error!("cannot write {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
            info!("catalogue -> {}", path.display());
        }
        None => print!("{generated}"),
    }
    ExitCode::SUCCESS
}
