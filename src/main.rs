use clap::Parser;
use kompile::{
    config::Config,
    deploy::{scheduler::Kubectl, toolchain::CommandToolchain, Orchestrator},
    diagnostics::report_error,
    error::KompileResult,
    kompiler::{artifacts::write_all, compile},
    program::{load_path, Program},
};
use std::{path::PathBuf, process::ExitCode};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Splits a Go program's goroutines into services deployed on Kubernetes.
#[derive(Parser, Debug)]
#[command(name = "kompile", version, about, long_about = None)]
struct Cli {
    /// Go source file to compile
    #[arg(short, long, value_name = "FILE")]
    filename: PathBuf,

    /// Directory the controller and services are written to
    #[arg(short, long, value_name = "DIR", default_value = "output")]
    output: PathBuf,

    /// Container registry images are pushed to (overrides kompile.toml)
    #[arg(short, long, value_name = "HOST[:PORT]")]
    registry: Option<String>,

    /// Configuration file (defaults to ./kompile.toml when present)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Stop after writing the generated programs
    #[arg(long)]
    no_deploy: bool,

    /// Log at debug level unless KOMPILE_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("KOMPILE_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut program = None;
    match run(&cli, &mut program) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let source = program
                .as_ref()
                .map(|p: &Program| (p.path.as_path(), p.source.as_str()));
            report_error(&error, source);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, loaded: &mut Option<Program>) -> KompileResult<()> {
    let mut config = Config::discover(cli.config.as_deref())?;
    if let Some(registry) = &cli.registry {
        config.registry.location = registry.clone();
    }

    let program = loaded.insert(load_path(&cli.filename)?);
    info!(
        file = %cli.filename.display(),
        functions = program.symbols.len(),
        "loaded program"
    );
    let compilation = compile(program, &config)?;
    let artifacts = write_all(&cli.output, &compilation, &config)?;
    info!(
        output = %cli.output.display(),
        services = compilation.services.len(),
        skipped = compilation.analysis.skipped.len(),
        "wrote artifacts"
    );
    if cli.no_deploy {
        return Ok(());
    }

    let toolchain = CommandToolchain;
    let scheduler = Kubectl::new(config.scheduler.namespace.clone());
    let addresses = Orchestrator::new(&toolchain, &scheduler, &config)
        .build_and_deploy(&artifacts, &compilation.controller)?;
    for (artifact, address) in &addresses {
        println!("{artifact}\t{address}");
    }
    Ok(())
}
