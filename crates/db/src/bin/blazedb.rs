use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use db::mount::MountManager;
use db::safe_write::backup_path;
use db::shell::{run_manager_shell, run_shell};
use db::{CollectionPaths, Database};

#[derive(Parser, Debug)]
#[command(name = "blazedb", about = "Embedded single-file document store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a database and start the interactive shell
    Open {
        db_path: PathBuf,
        password: String,
        #[arg(long, value_name = "TAG", default_value = "default")]
        project: String,
    },
    /// Start the multi-database manager shell
    Manager,
    /// Copy the sibling backups into place
    RestoreBackup { db_path: PathBuf },
    /// Print where this database keeps its backups
    ShowBackup { db_path: PathBuf },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Usage problems exit 1; --help and --version exit 0.
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Open {
            db_path,
            password,
            project,
        } => {
            if let Some(parent) = db_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).context("create db directory")?;
            }
            println!("blazedb v{}", env!("CARGO_PKG_VERSION"));
            println!("Using database file: {}", db_path.display());
            let database = Database::open(&db_path, &password, project)?;
            run_shell(&database)
        }
        Command::Manager => {
            println!("blazedb manager v{}", env!("CARGO_PKG_VERSION"));
            let mut manager = MountManager::new();
            run_manager_shell(&mut manager)
        }
        Command::RestoreBackup { db_path } => {
            let paths = CollectionPaths::for_db(&db_path);
            let db_backup = backup_path(&paths.db);
            let layout_backup = backup_path(&paths.layout);
            if !db_backup.exists() && !layout_backup.exists() {
                bail!("no backup found next to {}", db_path.display());
            }
            if db_backup.exists() {
                std::fs::copy(&db_backup, &paths.db).context("restore database file")?;
                println!("restored {}", paths.db.display());
            }
            if layout_backup.exists() {
                std::fs::copy(&layout_backup, &paths.layout).context("restore layout file")?;
                println!("restored {}", paths.layout.display());
            }
            Ok(())
        }
        Command::ShowBackup { db_path } => {
            let paths = CollectionPaths::for_db(&db_path);
            println!("{}", backup_path(&paths.db).display());
            println!("{}", backup_path(&paths.layout).display());
            Ok(())
        }
    }
}
