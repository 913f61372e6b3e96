//! Waveform-DB: Main entry point

use anyhow::{bail, Context};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use waveform_db::access::{Requester, Restriction};
use waveform_db::cli::{Cli, Commands, QueryArgs};
use waveform_db::codec::JsonCodec;
use waveform_db::config::Config;
use waveform_db::db::WaveformDB;
use waveform_db::ingest::FsEvent;
use waveform_db::query::QuerySpec;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::from_default_env();
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config '{}'", path.display()))?,
        None => Config::default(),
    };
    if let Some(catalog) = cli.catalog {
        config.catalog_path = Some(catalog);
    }

    let db = WaveformDB::open(config, Arc::new(JsonCodec::new()))
        .await
        .context("opening catalog")?;

    match cli.command {
        Commands::Index { root, purge } => {
            let report = db
                .index_path(&root, purge)
                .await
                .with_context(|| format!("indexing '{}'", root.display()))?;
            println!(
                "indexed {} unchanged {} failed {} purged {}",
                report.indexed.len(),
                report.unchanged,
                report.failed.len(),
                report.purged
            );
            for (path, reason) in &report.failed {
                eprintln!("{}: {}", path.display(), reason);
            }
            db.save().await.context("saving catalog")?;
        }
        Commands::Ingest { paths } => {
            for path in paths {
                let outcome = db
                    .ingest(&path)
                    .await
                    .with_context(|| format!("ingesting '{}'", path.display()))?;
                println!("{}: {:?}", path.display(), outcome);
            }
            db.save().await.context("saving catalog")?;
        }
        Commands::Event { json } => {
            let event: FsEvent = serde_json::from_str(&json).context("parsing event")?;
            let outcome = db.handle_event(&event).await?;
            println!("{}", outcome);
            db.save().await.context("saving catalog")?;
        }
        Commands::Remove { path } => {
            match db.remove_file(&path)? {
                Some(record) => println!("removed {} ({})", path.display(), record.id),
                None => println!("{} was not indexed", path.display()),
            }
            db.save().await.context("saving catalog")?;
        }
        Commands::Query(args) => query(&db, &args).await?,
        Commands::Restrict {
            network,
            station,
            users,
        } => {
            db.restrict(Restriction::new(&network, &station, users));
            db.save().await.context("saving catalog")?;
        }
        Commands::Unrestrict { network, station } => {
            if db.unrestrict(&network, &station).is_none() {
                println!("{}.{} was not restricted", network, station);
            }
            db.save().await.context("saving catalog")?;
        }
        Commands::Stats => {
            let stats = db.stats();
            println!("generation:  {}", stats.generation);
            println!("files:       {}", stats.files);
            println!("directories: {}", stats.directories);
            println!("streams:     {}", stats.streams);
            println!("segments:    {}", stats.segments);
        }
    }

    Ok(())
}

async fn query(db: &WaveformDB, args: &QueryArgs) -> anyhow::Result<()> {
    let requester = match &args.user {
        Some(user) => Requester::user(user.clone()),
        None => Requester::Anonymous,
    };
    let spec = QuerySpec::parse(args.params(), requester)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut stdout = tokio::io::stdout();
    match db.query(&spec, &mut stdout, &cancel).await? {
        Some(summary) => {
            tracing::info!(segments = summary.segments, bytes = summary.bytes, "query done");
            Ok(())
        }
        None => bail!("no data selected"),
    }
}
