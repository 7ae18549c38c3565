// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{path::PathBuf, sync::Arc};

use clap::{Args, Parser, Subcommand};
use logship_common_telemetry as telemetry;
use logship_sender::{
    FtConfig, FtSender, StdoutSink, Strategy,
    config::{BACKUP_QUEUE_NAME, STREAM_QUEUE_NAME},
    peek_queue_depth,
};
use snafu::{ResultExt, Whatever, ensure_whatever};
use tracing::info;

mod build_info;
mod config;
mod ship;

use crate::config::ShipConfig;

#[derive(Debug, Parser)]
#[clap(
name = "logship",
about= "Fault-tolerant log shipping",
author = build_info::AUTHOR,
version = build_info::FULL_VERSION)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Ship(ShipArgs),
    Inspect(InspectArgs),
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Ships newline-delimited JSON records from stdin to stdout through the
fault-tolerant sender. Undelivered records are kept on disk and retried on
the next run.
Examples:

tail -F app.log | logship ship --save-log-path /var/lib/logship

")]
struct ShipArgs {
    /// TOML configuration file.
    #[arg(short, long)]
    config:        Option<PathBuf>,
    /// Directory of the disk queues.
    #[arg(long)]
    save_log_path: Option<PathBuf>,
    /// `always_save` or `backup_only`.
    #[arg(long)]
    strategy:      Option<Strategy>,
    /// Stream queue workers.
    #[arg(long)]
    procs:         Option<usize>,
    /// Records per batch.
    #[arg(long)]
    batch_size:    Option<usize>,
}

impl ShipArgs {
    fn resolve(&self) -> Result<ShipConfig, Whatever> {
        let mut config = match &self.config {
            Some(path) => ShipConfig::load(path)?,
            None => ShipConfig::default(),
        };
        if let Some(path) = &self.save_log_path {
            config.sender.save_log_path.clone_from(path);
        }
        if let Some(strategy) = self.strategy {
            config.sender.strategy = strategy;
        }
        if let Some(procs) = self.procs {
            config.sender.procs = procs;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        config.validate()?;
        Ok(config)
    }

    async fn run(&self) -> Result<(), Whatever> {
        let config = self.resolve()?;
        let _guards = telemetry::init_global_logging("logship", &config.logging);
        telemetry::set_panic_hook();

        let sender = FtSender::new(Arc::new(StdoutSink::stdout()), config.sender.clone())
            .whatever_context("Failed to start fault-tolerant sender")?;
        info!(sender = %sender.name(), batch_size = config.batch_size, "Shipping stdin");

        let summary = ship::pump(
            tokio::io::BufReader::new(tokio::io::stdin()),
            &sender,
            config.batch_size,
            ship::shutdown_signal(),
        )
        .await;
        sender
            .close()
            .await
            .whatever_context("Failed to close sender")?;

        let summary = summary?;
        info!(
            batches = summary.batches,
            records = summary.records,
            skipped = summary.skipped,
            rejected = summary.rejected,
            "Shipping finished"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Prints the number of entries waiting in each disk queue.
Examples:

logship inspect /var/lib/logship

")]
struct InspectArgs {
    /// Directory of the disk queues.
    dir: PathBuf,
}

impl InspectArgs {
    fn run(&self) -> Result<(), Whatever> {
        for (name, depth) in queue_depths(&self.dir)? {
            println!("{name}\t{depth}");
        }
        Ok(())
    }
}

/// Reads queue depths without opening the queues for writing, so a running
/// `ship` on the same directory is not disturbed.
fn queue_depths(dir: &std::path::Path) -> Result<Vec<(&'static str, i64)>, Whatever> {
    ensure_whatever!(dir.is_dir(), "{} is not a directory", dir.display());
    let config = FtConfig::builder().save_log_path(dir).build();

    [STREAM_QUEUE_NAME, BACKUP_QUEUE_NAME]
        .into_iter()
        .map(|name| {
            peek_queue_depth(name, &config)
                .map(|depth| (name, depth))
                .with_whatever_context(|_| format!("Failed to inspect queue {name}"))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();
    match cli.commands {
        Commands::Ship(args) => args.run().await,
        Commands::Inspect(args) => args.run(),
    }
}

#[cfg(test)]
mod tests {
    use logship_sender::{codec, open_queue};
    use serde_json::json;

    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "logship",
            "ship",
            "--save-log-path",
            "/tmp/ft",
            "--strategy",
            "backup_only",
            "--procs",
            "4",
            "--batch-size",
            "9",
        ]);
        let Commands::Ship(args) = cli.commands else {
            panic!("expected ship");
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.sender.save_log_path, PathBuf::from("/tmp/ft"));
        assert_eq!(config.sender.strategy, Strategy::BackupOnly);
        assert_eq!(config.sender.procs, 4);
        assert_eq!(config.batch_size, 9);
    }

    #[test]
    fn test_unknown_strategy_flag_rejected() {
        let parsed = Cli::try_parse_from(["logship", "ship", "--strategy", "never"]);
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn test_inspect_reports_depths_of_open_queue() {
        let dir = tempfile::tempdir().unwrap();
        let config = FtConfig::builder().save_log_path(dir.path()).build();
        let backup = open_queue(BACKUP_QUEUE_NAME, &config).unwrap();
        for i in 0..3 {
            let record = json!({ "seq": i }).as_object().unwrap().clone();
            backup.put(codec::encode(&[record]).unwrap()).await.unwrap();
        }
        let segment = dir.path().join("backup_local_save.diskqueue.000000.dat");
        let segment_len = std::fs::metadata(&segment).unwrap().len();

        let depths = queue_depths(dir.path()).unwrap();
        assert_eq!(depths, vec![(STREAM_QUEUE_NAME, 0), (BACKUP_QUEUE_NAME, 3)]);

        // Inspecting neither created the stream queue nor touched the open one.
        assert!(!dir.path().join("stream_local_save.diskqueue.meta.dat").exists());
        assert_eq!(std::fs::metadata(&segment).unwrap().len(), segment_len);
        assert_eq!(backup.depth(), 3);
        backup.close().unwrap();
    }

    #[test]
    fn test_inspect_missing_dir() {
        assert!(queue_depths(std::path::Path::new("/nonexistent/logship")).is_err());
    }
}
