use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vl_cli")]
#[command(about = "VersionLedger CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a default config and create the ledger database.
    Init {
        root: String,
        #[arg(long)]
        s3_bucket: Option<String>,
        #[arg(long, default_value = "")]
        s3_prefix: String,
    },
    /// Ingest an itemized change report from one sync pass.
    Ingest {
        root: String,
        #[arg(long)]
        report: String,
        #[arg(long)]
        base: Option<String>,
        #[arg(long)]
        best_effort: bool,
    },
    /// Ingest a structured JSON change list.
    IngestJson {
        root: String,
        #[arg(long)]
        changes: String,
        #[arg(long)]
        best_effort: bool,
    },
    Latest {
        root: String,
        path: String,
    },
    Version {
        root: String,
        path: String,
        version: i64,
    },
    AtTime {
        root: String,
        path: String,
        time: String,
    },
    History {
        root: String,
        path: String,
    },
    /// List a directory, live or as of a past time.
    Ls {
        root: String,
        dir: String,
        #[arg(long)]
        at: Option<String>,
        #[arg(long)]
        with_urls: bool,
    },
    Compare {
        root: String,
        dir: String,
        start: String,
        end: String,
        #[arg(long)]
        symmetric: bool,
    },
    /// Recompute the archive key of every archived version of a file.
    VerifyArchive {
        root: String,
        path: String,
    },
}
