//! `nbpdf` CLI - Convert notebook HTML to a bookmarked PDF and inspect results

mod cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nbpdf")]
#[command(about = "Notebook HTML to single-page PDF with bookmarks and the notebook attached")]
#[command(version)]
struct Cli {
    /// Debug logging (repeat to include dependencies)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render an HTML export of a notebook to PDF
    Convert {
        /// Rendered notebook HTML
        html: PathBuf,

        /// Notebook file to embed in the PDF
        #[arg(short, long)]
        notebook: PathBuf,

        /// Output path (default: <name>.pdf)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Notebook name used for the attachment (default: notebook file stem)
        #[arg(long)]
        name: Option<String>,

        /// Keep the browser sandbox enabled
        #[arg(long)]
        sandbox: bool,

        /// Browser executable to use
        #[arg(long)]
        chrome: Option<PathBuf>,

        /// Nest h2 bookmarks under the preceding h1
        #[arg(long)]
        nested: bool,

        /// Config file (default: ~/.config/nbpdf/config.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show pages, bookmarks, and attachments of a PDF
    Inspect {
        pdf: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Convert {
            html,
            notebook,
            output,
            name,
            sandbox,
            chrome,
            nested,
            config,
        } => cmd::convert::cmd_convert(&cmd::convert::ConvertArgs {
            html,
            notebook,
            output,
            name,
            sandbox,
            chrome,
            nested,
            config,
        })?,
        Commands::Inspect { pdf, json } => cmd::inspect::cmd_inspect(&pdf, json)?,
    }

    Ok(())
}

/// Logs go to stderr so stdout stays clean for `--json`.
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "nbpdf=info",
        1 => "nbpdf=debug",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
