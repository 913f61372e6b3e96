//! CLI commands

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Waveform-DB CLI
#[derive(Debug, Parser)]
#[command(name = "waveform-db")]
#[command(about = "Waveform file indexer and query engine")]
pub struct Cli {
    /// JSON config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Catalog file, overrides the config
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Index every file under a directory
    Index {
        root: PathBuf,
        /// Drop all records under the directory first
        #[arg(long)]
        purge: bool,
    },
    /// Ingest individual files
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Apply a file monitor event given as JSON
    Event {
        /// e.g. {"event_type":"moved","is_directory":false,"src_path":"a","dest_path":"b"}
        json: String,
    },
    /// Drop a file from the index
    Remove { path: PathBuf },
    /// Stream matching data to stdout
    Query(QueryArgs),
    /// Restrict a network/station pair to a set of users
    Restrict {
        #[arg(short, long)]
        network: String,
        #[arg(short, long)]
        station: String,
        /// Authorized user, may be repeated
        #[arg(short, long = "user")]
        users: Vec<String>,
    },
    /// Lift the restriction on a network/station pair
    Unrestrict {
        #[arg(short, long)]
        network: String,
        #[arg(short, long)]
        station: String,
    },
    /// Print index statistics
    Stats,
}

#[derive(Debug, Args)]
pub struct QueryArgs {
    #[arg(long = "starttime", visible_alias = "start")]
    pub start: String,
    #[arg(long = "endtime", visible_alias = "end")]
    pub end: String,
    #[arg(long = "network", visible_alias = "net")]
    pub network: Option<String>,
    #[arg(long = "station", visible_alias = "sta")]
    pub station: Option<String>,
    #[arg(long = "location", visible_alias = "loc")]
    pub location: Option<String>,
    #[arg(long = "channel", visible_alias = "cha")]
    pub channel: Option<String>,
    #[arg(long, default_value = "json")]
    pub format: String,
    /// Query as this user instead of anonymously
    #[arg(long)]
    pub user: Option<String>,
}

impl QueryArgs {
    /// The arguments as dataselect parameter pairs
    pub fn params(&self) -> Vec<(&'static str, &str)> {
        let mut params = vec![
            ("starttime", self.start.as_str()),
            ("endtime", self.end.as_str()),
            ("format", self.format.as_str()),
        ];
        let selectors = [
            ("network", &self.network),
            ("station", &self.station),
            ("location", &self.location),
            ("channel", &self.channel),
        ];
        params.extend(
            selectors
                .into_iter()
                .filter_map(|(name, value)| value.as_deref().map(|v| (name, v))),
        );
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_aliases() {
        let cli = Cli::try_parse_from([
            "waveform-db",
            "query",
            "--start",
            "2010-03-25",
            "--end",
            "2010-03-26",
            "--cha",
            "BH?",
        ])
        .unwrap();
        let Commands::Query(args) = cli.command else {
            panic!("expected query");
        };
        assert_eq!(
            args.params(),
            vec![
                ("starttime", "2010-03-25"),
                ("endtime", "2010-03-26"),
                ("format", "json"),
                ("channel", "BH?"),
            ]
        );
        assert!(args.user.is_none());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["waveform-db", "stats", "--catalog", "/tmp/c.wfdb", "--log-json"])
            .unwrap();
        assert!(cli.log_json);
        assert_eq!(cli.catalog, Some(PathBuf::from("/tmp/c.wfdb")));
        assert!(matches!(cli.command, Commands::Stats));
    }

    #[test]
    fn test_restrict_users() {
        let cli = Cli::try_parse_from([
            "waveform-db", "restrict", "-n", "TA", "-s", "A25A", "-u", "alice", "-u", "bob",
        ])
        .unwrap();
        match cli.command {
            Commands::Restrict { users, .. } => assert_eq!(users, vec!["alice", "bob"]),
            other => panic!("unexpected {other:?}"),
        }
    }
}
