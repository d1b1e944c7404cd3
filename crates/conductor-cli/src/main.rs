use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Run analysis scripts against a request and manage its results", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script with CONDUCTOR_CONTEXT taken from a context file. Exits with the script's code.
    Run {
        /// Executable to run
        #[arg(long)]
        script: PathBuf,

        /// Context file (JSON or YAML)
        #[arg(long)]
        context: PathBuf,

        /// Set CONDUCTOR_DRY_RUN=1 for the script
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Arguments passed through to the script (after `--`)
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Print the absolute path a data name resolves to
    Resolve {
        #[arg(long)]
        context: PathBuf,

        /// Basename or stem, e.g. `Operetta_objectresults`
        name: String,
    },

    /// Copy a file into results/<kind>/ and register it in results.json
    Publish {
        #[arg(long)]
        context: PathBuf,

        /// figure | table | artifact
        #[arg(long)]
        kind: String,

        /// Manifest id (and output file name)
        #[arg(long)]
        name: String,

        /// Source file
        #[arg(long)]
        file: PathBuf,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Producing step; defaults to the context's `step`
        #[arg(long)]
        step: Option<String>,

        /// Name the output file by its sha256 instead of --name
        #[arg(long, default_value_t = false)]
        by_content: bool,
    },

    /// Print results.json
    Manifest {
        #[arg(long)]
        context: PathBuf,
    },

    /// Compare results/ against results.json. Fails if they disagree.
    Verify {
        #[arg(long)]
        context: PathBuf,
    },

    /// Append a workflow row to the queue API (CONDUCTOR_API_BASE)
    Submit {
        #[arg(long)]
        project_id: String,

        #[arg(long)]
        experiment_id: String,

        #[arg(long)]
        created_by: String,

        #[arg(long)]
        source_plate_name: String,

        #[arg(long)]
        source_plate_format: String,

        /// `operation:method:device`; repeat for more steps (max 5 are sent)
        #[arg(long = "step", required = true)]
        steps: Vec<String>,

        /// Log the payload instead of sending it
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

fn main() -> Result<()> {
    // dev-time convenience; absent file is fine
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Run {
            script,
            context,
            dry_run,
            args,
        } => {
            let code = commands::run::run_script(&script, &context, dry_run, &args)?;
            std::process::exit(code);
        }

        Commands::Resolve { context, name } => commands::results::resolve(&context, &name)?,

        Commands::Publish {
            context,
            kind,
            name,
            file,
            title,
            description,
            step,
            by_content,
        } => commands::results::publish(
            &context,
            &kind,
            &name,
            &file,
            commands::results::PublishArgs {
                title,
                description,
                step,
                by_content,
            },
        )?,

        Commands::Manifest { context } => commands::results::manifest(&context)?,

        Commands::Verify { context } => commands::results::verify(&context)?,

        Commands::Submit {
            project_id,
            experiment_id,
            created_by,
            source_plate_name,
            source_plate_format,
            steps,
            dry_run,
        } => commands::submit::submit(
            commands::submit::SubmitArgs {
                project_id,
                experiment_id,
                created_by,
                source_plate_name,
                source_plate_format,
                steps,
            },
            dry_run,
        )?,
    }

    Ok(())
}

/// Logs go to stderr; stdout carries command output.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
