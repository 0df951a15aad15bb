use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "mos",
    about = "Managed Object Store: object records, identity ledger and roots",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Snapshot file holding the store; created on first write
    #[arg(long, global = true, default_value = "mos.db")]
    pub db: PathBuf,

    /// Persistor configuration (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create objects with freshly allocated identifiers
    Populate(PopulateArgs),
    /// Delete live objects in an identifier range
    Delete(DeleteArgs),
    /// Drain the identity ledger into the bitmaps
    Compact,
    /// Show store counters
    Stats,
    /// List live identifiers of one index
    Ids(IdsArgs),
    /// Bind, look up, or list named roots
    Root(RootArgs),
}

#[derive(Args)]
pub struct PopulateArgs {
    #[arg(short = 'n', long, default_value = "1000")]
    pub count: u64,
    /// Every Nth object is a map (0 disables)
    #[arg(long, default_value = "10")]
    pub map_every: u64,
    /// Every Nth object is an evictable server map (0 disables)
    #[arg(long, default_value = "50")]
    pub evictable_every: u64,
    /// Entries written into each map
    #[arg(long, default_value = "4")]
    pub entries: usize,
    /// Bind this root name to the first created object
    #[arg(long)]
    pub root: Option<String>,
}

#[derive(Args)]
pub struct DeleteArgs {
    /// First identifier (inclusive)
    #[arg(long)]
    pub from: u64,
    /// Last identifier (exclusive)
    #[arg(long)]
    pub to: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum IndexKind {
    All,
    Maps,
    Evictable,
}

#[derive(Args)]
pub struct IdsArgs {
    #[arg(long, default_value = "all")]
    pub index: IndexKind,
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Args)]
pub struct RootArgs {
    #[command(subcommand)]
    pub action: RootAction,
}

#[derive(Subcommand)]
pub enum RootAction {
    Set { name: String, id: u64 },
    Get { name: String },
    List,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_populate_defaults() {
        let cli = Cli::try_parse_from(["mos", "populate"]).unwrap();
        if let Command::Populate(args) = cli.command {
            assert_eq!(args.count, 1000);
            assert_eq!(args.map_every, 10);
            assert_eq!(args.evictable_every, 50);
            assert!(args.root.is_none());
        } else { panic!("wrong command"); }
        assert_eq!(cli.db, PathBuf::from("mos.db"));
    }

    #[test]
    fn parse_populate_with_options() {
        let cli = Cli::try_parse_from([
            "mos", "populate", "-n", "20", "--map-every", "2", "--root", "main",
        ])
        .unwrap();
        if let Command::Populate(args) = cli.command {
            assert_eq!(args.count, 20);
            assert_eq!(args.map_every, 2);
            assert_eq!(args.root, Some("main".into()));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_delete_range() {
        let cli = Cli::try_parse_from(["mos", "delete", "--from", "5", "--to", "9"]).unwrap();
        if let Command::Delete(args) = cli.command {
            assert_eq!((args.from, args.to), (5, 9));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_ids_index() {
        let cli = Cli::try_parse_from(["mos", "ids", "--index", "evictable", "-n", "3"]).unwrap();
        if let Command::Ids(args) = cli.command {
            assert_eq!(args.index, IndexKind::Evictable);
            assert_eq!(args.limit, Some(3));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_root_set() {
        let cli = Cli::try_parse_from(["mos", "root", "set", "main", "42"]).unwrap();
        if let Command::Root(args) = cli.command {
            assert!(matches!(args.action, RootAction::Set { ref name, id: 42 } if name == "main"));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_global_options() {
        let cli = Cli::try_parse_from([
            "mos", "stats", "--db", "/tmp/x.db", "--format", "json", "--verbose",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Stats));
        assert_eq!(cli.db, PathBuf::from("/tmp/x.db"));
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(cli.verbose);
    }
}
