use std::path::PathBuf;
use std::sync::Arc;

use afs::AppData;
use afs_backends::{ExtensionScanner, LocalFileScanner};
use afs_config::AfsConfig;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "afs", version, about = "Application file system")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Recognize files in local drives, as `<ext>=<pseudo-class>:<format>`
    #[arg(short, long = "scanner", value_name = "SPEC")]
    scanners: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured drives
    Drives,
    /// List the children of a node
    Ls {
        /// Node path, as `<drive>:/<path>`
        path: String,
    },
    /// Show a subtree
    Tree {
        /// Node path, as `<drive>:/<path>`
        path: String,
        /// Maximum depth to recurse
        #[arg(short, long)]
        depth: Option<usize>,
    },
    /// Show node details
    Info {
        /// Node path, as `<drive>:/<path>`
        path: String,
    },
    /// Print string attributes of a node
    Attr {
        /// Node path, as `<drive>:/<path>`
        path: String,
        /// Attribute to print (all when omitted)
        name: Option<String>,
    },
    /// Show dependencies of a node in both directions
    Deps {
        /// Node path, as `<drive>:/<path>`
        path: String,
    },
    /// Export a subtree into a directory
    Archive {
        /// Node path, as `<drive>:/<path>`
        path: String,
        /// Directory receiving the archive
        dir: PathBuf,
    },
    /// Show effective configuration
    Config,
}

fn find_config() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("AFS_CONFIG") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let cwd_config = PathBuf::from("afs.yaml");
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    if let Some(home) = dirs_next::home_dir() {
        let home_config = home.join(".config/afs/config.yaml");
        if home_config.exists() {
            return Some(home_config);
        }
    }

    None
}

fn parse_scanner(spec: &str) -> Result<Arc<dyn LocalFileScanner>, String> {
    let parsed = spec
        .split_once('=')
        .and_then(|(ext, rest)| rest.split_once(':').map(|(class, format)| (ext, class, format)))
        .filter(|(ext, class, format)| !ext.is_empty() && !class.is_empty() && !format.is_empty());
    match parsed {
        Some((ext, class, format)) => Ok(Arc::new(ExtensionScanner::new(class, format, [ext]))),
        None => Err(format!(
            "invalid scanner '{}', expected <ext>=<pseudo-class>:<format>",
            spec
        )),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.or_else(find_config).ok_or(
        "No configuration file found. Use --config, set AFS_CONFIG, or create afs.yaml",
    )?;
    let config = AfsConfig::from_file(&config_path)?;

    if let Commands::Config = cli.command {
        return commands::config::run(&config);
    }

    let scanners = cli
        .scanners
        .iter()
        .map(|spec| parse_scanner(spec))
        .collect::<Result<Vec<_>, _>>()?;
    let mut app_data = AppData::from_config(&config, &scanners)?;

    let result = match cli.command {
        Commands::Drives => commands::drives::run(&app_data),
        Commands::Ls { path } => commands::ls::run(&app_data, &path),
        Commands::Tree { path, depth } => commands::tree::run(&app_data, &path, depth),
        Commands::Info { path } => commands::info::run(&app_data, &path),
        Commands::Attr { path, name } => commands::attr::run(&app_data, &path, name.as_deref()),
        Commands::Deps { path } => commands::deps::run(&app_data, &path),
        Commands::Archive { path, dir } => commands::archive::run(&app_data, &path, &dir),
        Commands::Config => Ok(()),
    };

    app_data.close()?;
    result
}
