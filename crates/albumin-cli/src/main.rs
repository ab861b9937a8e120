use std::path::PathBuf;

use albumin_core::{
    date::parse_zone, ArrangeOptions, AnalyzeOptions, ContentIdentifier, ExifAdapter,
    ImportOptions, JsonStore, Method, Sha256Identifier,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "albumin", version, about = "Date, tag and arrange photo batches by their best-known timestamp")]
struct Cli {
    /// Library directory holding arranged batches and the metadata store
    #[arg(short, long, global = true, env = albumin_core::LIBRARY_ENV, default_value = ".")]
    library: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show what importing the files would change, without writing anything.
    /// Outside a library, shows the timestamp each file would get
    Analyze {
        path: PathBuf,

        /// IANA zone for timestamps recorded without one
        #[arg(long)]
        timezone: Option<String>,
    },

    /// Date, tag and arrange a batch of files into the library
    Import {
        path: PathBuf,

        #[arg(long)]
        timezone: Option<String>,

        /// Tag every imported file, written name:value
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Import files with no date information instead of refusing
        #[arg(long)]
        allow_unknown: bool,

        /// Batch label (default: import time, YYYYMMDDTHHMMSSZ)
        #[arg(long)]
        label: Option<String>,
    },

    /// Record a manual timestamp for a file
    Fix {
        file: PathBuf,

        /// e.g. "2015:05:16 14:04:29" or "2015-05-16@14-04-29"
        datetime: String,

        /// Record as untrusted, so camera metadata still wins
        #[arg(long)]
        untrusted: bool,

        #[arg(long)]
        timezone: Option<String>,
    },

    /// Arrange files under <library>/<label>/ by their stored timestamps
    Arrange {
        path: PathBuf,

        #[arg(long)]
        label: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut store = JsonStore::in_library(&cli.library)
        .with_context(|| format!("opening metadata store in {}", cli.library.display()))?;

    match cli.command {
        Command::Analyze { path, timezone } => {
            let options = AnalyzeOptions { path, timezone };
            let report = if store.exists() {
                albumin_core::analyze(&options, &ExifAdapter, &Sha256Identifier, &store)?
            } else {
                info!(library = %cli.library.display(), "no metadata store, analyzing files by path");
                albumin_core::analyze_files(&options, &ExifAdapter)?
            };
            println!("{report}");
        }
        Command::Import {
            path,
            timezone,
            tags,
            allow_unknown,
            label,
        } => {
            let options = ImportOptions {
                source: path,
                library: cli.library.clone(),
                timezone,
                tags,
                allow_unknown,
                label,
            };
            let result =
                albumin_core::import(&options, &ExifAdapter, &Sha256Identifier, &mut store)?;
            store.save()?;
            println!("{}", result.message);
            info!(renamed = result.renamed, "import finished");
        }
        Command::Fix {
            file,
            datetime,
            untrusted,
            timezone,
        } => {
            let method = if untrusted {
                Method::ManualUntrusted
            } else {
                Method::ManualTrusted
            };
            let timezone = timezone.as_deref().map(parse_zone).transpose()?;
            let identity = Sha256Identifier
                .identify(&file)
                .with_context(|| format!("hashing {}", file.display()))?;
            let candidate = albumin_core::fix(&mut store, &identity, method, &datetime, timezone)?;
            store.save()?;
            println!("{identity}: {candidate}");
        }
        Command::Arrange { path, label } => {
            let options = ArrangeOptions {
                path,
                library: cli.library.clone(),
                label,
            };
            let renamed = albumin_core::arrange_batch(&options, &Sha256Identifier, &store)?;
            println!("{renamed} file(s) renamed");
        }
    }

    Ok(())
}
