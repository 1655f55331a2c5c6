mod cli;
mod commands {
    pub mod ingest;
    pub mod query;
    pub mod verify;
}

use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;
use vl_core::config::{config_init, StoreConfig};
use vl_core::diff::DiffMode;
use vl_core::service::UrlMode;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let result = match cli.cmd {
        Command::Init {
            root,
            s3_bucket,
            s3_prefix,
        } => {
            let store = s3_bucket.map(|bucket| StoreConfig::S3 {
                bucket,
                prefix: s3_prefix,
            });
            config_init(std::path::Path::new(&root), store).map(|loaded| {
                println!("ledger initialized: {}", loaded.db_path().display());
            })
        }
        Command::Ingest {
            root,
            report,
            base,
            best_effort,
        } => commands::ingest::run_ingest_report(&root, &report, base.as_deref(), best_effort),
        Command::IngestJson {
            root,
            changes,
            best_effort,
        } => commands::ingest::run_ingest_json(&root, &changes, best_effort),
        Command::Latest { root, path } => commands::query::run_latest(&root, &path),
        Command::Version {
            root,
            path,
            version,
        } => commands::query::run_version(&root, &path, version),
        Command::AtTime { root, path, time } => commands::query::run_at_time(&root, &path, &time),
        Command::History { root, path } => commands::query::run_history(&root, &path),
        Command::Ls {
            root,
            dir,
            at,
            with_urls,
        } => {
            let urls = if with_urls {
                UrlMode::WithUrls
            } else {
                UrlMode::Omit
            };
            commands::query::run_ls(&root, &dir, at.as_deref(), urls)
        }
        Command::Compare {
            root,
            dir,
            start,
            end,
            symmetric,
        } => {
            let mode = if symmetric {
                DiffMode::Symmetric
            } else {
                DiffMode::AsOfLater
            };
            commands::query::run_compare(&root, &dir, &start, &end, mode)
        }
        Command::VerifyArchive { root, path } => commands::verify::run_verify_archive(&root, &path),
    };

    if let Err(err) = result {
        eprintln!("{}: {}", err.code, err.message);
        std::process::exit(1);
    }
}
