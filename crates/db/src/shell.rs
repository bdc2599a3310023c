//! Interactive shells: one over a single opened database, one over the
//! mount manager.

use std::fs;

use anyhow::{Context, Result};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::client::Database;
use crate::commands::{
    ManagerCommand, ShellCommand, parse_manager_command, parse_shell_command,
};
use crate::history::resolve_history_path;
use crate::mount::MountManager;
use crate::printer::{format_document, format_stats, print_documents};

const PRIMARY_PROMPT: &str = "blazedb> ";
const MANAGER_PROMPT: &str = "blazedb:mgr> ";

pub fn run_shell(database: &Database) -> Result<()> {
    run_loop(PRIMARY_PROMPT, |line| {
        let command = match parse_shell_command(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(false),
            Err(usage) => {
                eprintln!("Error: {}", usage);
                return Ok(false);
            }
        };
        if command == ShellCommand::Quit {
            return Ok(true);
        }
        if let Err(err) = handle_shell_command(database, command) {
            eprintln!("Error: {}", err);
        }
        Ok(false)
    })
}

pub fn run_manager_shell(manager: &mut MountManager) -> Result<()> {
    run_loop(MANAGER_PROMPT, |line| {
        let command = match parse_manager_command(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(false),
            Err(usage) => {
                eprintln!("Error: {}", usage);
                return Ok(false);
            }
        };
        if command == ManagerCommand::Quit {
            return Ok(true);
        }
        if let Err(err) = handle_manager_command(manager, command) {
            eprintln!("Error: {}", err);
        }
        Ok(false)
    })
}

fn run_loop(prompt: &str, mut handle: impl FnMut(&str) -> Result<bool>) -> Result<()> {
    let history_path = resolve_history_path();
    if let Some(parent) = history_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).context("create history directory")?;
    }

    let mut editor = DefaultEditor::new().context("initialize line editor")?;
    let _ = editor.load_history(&history_path);

    loop {
        let line = match editor.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        };
        if line.trim().is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line.trim());
        if handle(&line)? {
            break;
        }
    }

    let _ = editor.save_history(&history_path);
    Ok(())
}

fn handle_shell_command(database: &Database, command: ShellCommand) -> Result<()> {
    match command {
        ShellCommand::Quit => {}
        ShellCommand::Help => print_shell_help(),
        ShellCommand::Insert { json } => {
            let parsed: serde_json::Value =
                serde_json::from_str(&json).context("document is not valid JSON")?;
            let document = common::Document::from_json(&parsed);
            let id = database.insert(document)?;
            println!("inserted {}", id);
        }
        ShellCommand::Get { id } => match database.fetch(id)? {
            Some(document) => println!("{}", format_document(&document)),
            None => println!("not found"),
        },
        ShellCommand::All => print_documents(&database.fetch_all()?),
        ShellCommand::Project { tag } => {
            print_documents(&database.fetch_all_by_project(&tag)?)
        }
        ShellCommand::Find { field, value } => {
            print_documents(&database.fetch_by_indexed_field(&field, &value)?)
        }
        ShellCommand::FindCompound { fields, values } => {
            print_documents(&database.fetch_by_indexed_fields(&fields, &values)?)
        }
        ShellCommand::Update { id, json } => {
            let parsed: serde_json::Value =
                serde_json::from_str(&json).context("document is not valid JSON")?;
            database.update(id, common::Document::from_json(&parsed))?;
            println!("updated {}", id);
        }
        ShellCommand::Delete { id } => {
            database.delete(id)?;
            println!("deleted {}", id);
        }
        ShellCommand::SoftDelete { id } => {
            database.soft_delete(id)?;
            println!("soft-deleted {}", id);
        }
        ShellCommand::Purge => {
            let purged = database.purge()?;
            println!("purged {} record(s)", purged);
        }
        ShellCommand::CreateIndex { fields } => {
            database.create_index(&fields)?;
            println!("index ready on {}", fields.join("+"));
        }
        ShellCommand::Indexes => {
            let definitions = database.index_definitions()?;
            if definitions.is_empty() {
                println!("(no indexes)");
            }
            for (name, fields) in definitions {
                println!("{}  [{}]", name, fields.join(", "));
            }
        }
        ShellCommand::Stats => println!("{}", format_stats(&database.stats()?)),
        ShellCommand::Validate { strict } => {
            let report = database.check_integrity(strict)?;
            println!("{}", report);
        }
        ShellCommand::Dump => {
            for (page_index, payload) in database.dump_raw()? {
                println!("page {}: {} bytes", page_index, payload.len());
            }
        }
        ShellCommand::Begin => {
            database.begin_transaction()?;
            println!("transaction started");
        }
        ShellCommand::Commit => {
            database.commit_transaction()?;
            println!("transaction committed");
        }
        ShellCommand::Rollback => {
            database.rollback_transaction()?;
            println!("transaction rolled back");
        }
    }
    Ok(())
}

fn handle_manager_command(manager: &mut MountManager, command: ManagerCommand) -> Result<()> {
    match command {
        ManagerCommand::Quit => {}
        ManagerCommand::Help => print_manager_help(),
        ManagerCommand::List => {
            let names = manager.names();
            if names.is_empty() {
                println!("(no databases mounted)");
            }
            for name in names {
                let marker = if manager.current_name() == Some(name.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{} {}", marker, name);
            }
        }
        ManagerCommand::Mount { name, path, password } => {
            let project = name.clone();
            manager.mount(&name, &path, &password, project)?;
            println!("mounted {} from {}", name, path.display());
        }
        ManagerCommand::Use { name } => {
            manager.use_db(&name)?;
            println!("current database is {}", name);
        }
        ManagerCommand::Current => match manager.current_name() {
            Some(name) => println!("{}", name),
            None => println!("(none)"),
        },
        ManagerCommand::Unmount { name } => {
            if manager.unmount(&name) {
                println!("unmounted {}", name);
            } else {
                println!("{} is not mounted", name);
            }
        }
        ManagerCommand::Reload { name } => {
            manager.reload(&name)?;
            println!("reloaded {}", name);
        }
    }
    Ok(())
}

fn print_shell_help() {
    println!("Commands:");
    println!("  insert <json>             Insert a document, printing its id");
    println!("  get <id>                  Fetch one document");
    println!("  all                       List all documents");
    println!("  project <tag>             List documents for one project");
    println!("  find <field> <value>      Indexed single-field lookup");
    println!("  findc <f1+f2> <v1,v2>     Indexed compound lookup");
    println!("  update <id> <json>        Replace a document");
    println!("  delete <id>               Hard-delete a document");
    println!("  softdelete <id>           Mark a document deleted");
    println!("  purge                     Hard-delete all soft-deleted documents");
    println!("  index <f1[+f2...]>        Create a (compound) index");
    println!("  indexes                   List index definitions");
    println!("  stats                     Page-file statistics");
    println!("  validate [strict]         Run the integrity check");
    println!("  dump                      List live pages and payload sizes");
    println!("  begin | commit | rollback File-level transaction control");
    println!("  help, exit");
}

fn print_manager_help() {
    println!("Commands:");
    println!("  list                         List mounted databases");
    println!("  mount <name> <path> <pw>     Open and mount a database");
    println!("  use <name>                   Switch the current database");
    println!("  current                      Show the current database");
    println!("  unmount <name>               Drop a mount (files untouched)");
    println!("  reload <name>                Reopen a mount from disk");
    println!("  help, exit");
}
