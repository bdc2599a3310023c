use std::fmt;
use std::path::PathBuf;

use common::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Quit,
    Help,
    Insert { json: String },
    Get { id: Uuid },
    All,
    Project { tag: String },
    Find { field: String, value: Value },
    FindCompound { fields: Vec<String>, values: Vec<Value> },
    Update { id: Uuid, json: String },
    Delete { id: Uuid },
    SoftDelete { id: Uuid },
    Purge,
    CreateIndex { fields: Vec<String> },
    Indexes,
    Stats,
    Validate { strict: bool },
    Dump,
    Begin,
    Commit,
    Rollback,
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellCommand::Quit => write!(f, "quit"),
            ShellCommand::Help => write!(f, "help"),
            ShellCommand::Insert { .. } => write!(f, "insert"),
            ShellCommand::Get { id } => write!(f, "get {}", id),
            ShellCommand::All => write!(f, "all"),
            ShellCommand::Project { tag } => write!(f, "project {}", tag),
            ShellCommand::Find { field, .. } => write!(f, "find {}", field),
            ShellCommand::FindCompound { fields, .. } => write!(f, "findc {}", fields.join("+")),
            ShellCommand::Update { id, .. } => write!(f, "update {}", id),
            ShellCommand::Delete { id } => write!(f, "delete {}", id),
            ShellCommand::SoftDelete { id } => write!(f, "softdelete {}", id),
            ShellCommand::Purge => write!(f, "purge"),
            ShellCommand::CreateIndex { fields } => write!(f, "index {}", fields.join("+")),
            ShellCommand::Indexes => write!(f, "indexes"),
            ShellCommand::Stats => write!(f, "stats"),
            ShellCommand::Validate { strict } => {
                write!(f, "validate{}", if *strict { " strict" } else { "" })
            }
            ShellCommand::Dump => write!(f, "dump"),
            ShellCommand::Begin => write!(f, "begin"),
            ShellCommand::Commit => write!(f, "commit"),
            ShellCommand::Rollback => write!(f, "rollback"),
        }
    }
}

/// Parses one shell line. `Ok(None)` means an empty line; `Err` carries a
/// usage message.
pub fn parse_shell_command(input: &str) -> Result<Option<ShellCommand>, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let (word, rest) = split_word(trimmed);
    let command = match word.to_lowercase().as_str() {
        "\\q" | "quit" | "exit" => ShellCommand::Quit,
        "\\help" | "help" | "?" => ShellCommand::Help,
        "insert" => ShellCommand::Insert {
            json: require(rest, "insert <json>")?.to_string(),
        },
        "get" => ShellCommand::Get {
            id: parse_id(require(rest, "get <id>")?)?,
        },
        "all" => ShellCommand::All,
        "project" => ShellCommand::Project {
            tag: require(rest, "project <tag>")?.to_string(),
        },
        "find" => {
            let (field, value) = split_word(require(rest, "find <field> <value>")?);
            if value.is_empty() {
                return Err("usage: find <field> <value>".to_string());
            }
            ShellCommand::Find {
                field: field.to_string(),
                value: parse_value_token(value),
            }
        }
        "findc" => {
            let (fields, values) = split_word(require(rest, "findc <f1+f2> <v1,v2>")?);
            if values.is_empty() {
                return Err("usage: findc <f1+f2> <v1,v2>".to_string());
            }
            ShellCommand::FindCompound {
                fields: split_fields(fields),
                values: values.split(',').map(parse_value_token).collect(),
            }
        }
        "update" => {
            let (id, json) = split_word(require(rest, "update <id> <json>")?);
            if json.is_empty() {
                return Err("usage: update <id> <json>".to_string());
            }
            ShellCommand::Update {
                id: parse_id(id)?,
                json: json.to_string(),
            }
        }
        "delete" => ShellCommand::Delete {
            id: parse_id(require(rest, "delete <id>")?)?,
        },
        "softdelete" => ShellCommand::SoftDelete {
            id: parse_id(require(rest, "softdelete <id>")?)?,
        },
        "purge" => ShellCommand::Purge,
        "index" => ShellCommand::CreateIndex {
            fields: split_fields(require(rest, "index <f1[+f2...]>")?),
        },
        "indexes" => ShellCommand::Indexes,
        "stats" => ShellCommand::Stats,
        "validate" => ShellCommand::Validate {
            strict: rest.trim().eq_ignore_ascii_case("strict"),
        },
        "dump" => ShellCommand::Dump,
        "begin" => ShellCommand::Begin,
        "commit" => ShellCommand::Commit,
        "rollback" => ShellCommand::Rollback,
        other => return Err(format!("unknown command: {}", other)),
    };
    Ok(Some(command))
}

#[derive(Debug, Clone, PartialEq)]
pub enum ManagerCommand {
    Quit,
    Help,
    List,
    Mount {
        name: String,
        path: PathBuf,
        password: String,
    },
    Use {
        name: String,
    },
    Current,
    Unmount {
        name: String,
    },
    Reload {
        name: String,
    },
}

pub fn parse_manager_command(input: &str) -> Result<Option<ManagerCommand>, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let mut tokens = trimmed.split_whitespace();
    let word = tokens.next().unwrap_or_default().to_lowercase();
    let command = match word.as_str() {
        "\\q" | "quit" | "exit" => ManagerCommand::Quit,
        "\\help" | "help" | "?" => ManagerCommand::Help,
        "list" => ManagerCommand::List,
        "mount" => {
            let (name, path, password) = (tokens.next(), tokens.next(), tokens.next());
            match (name, path, password) {
                (Some(name), Some(path), Some(password)) => ManagerCommand::Mount {
                    name: name.to_string(),
                    path: PathBuf::from(path),
                    password: password.to_string(),
                },
                _ => return Err("usage: mount <name> <path> <password>".to_string()),
            }
        }
        "use" => ManagerCommand::Use {
            name: tokens
                .next()
                .ok_or_else(|| "usage: use <name>".to_string())?
                .to_string(),
        },
        "current" => ManagerCommand::Current,
        "unmount" => ManagerCommand::Unmount {
            name: tokens
                .next()
                .ok_or_else(|| "usage: unmount <name>".to_string())?
                .to_string(),
        },
        "reload" => ManagerCommand::Reload {
            name: tokens
                .next()
                .ok_or_else(|| "usage: reload <name>".to_string())?
                .to_string(),
        },
        other => return Err(format!("unknown command: {}", other)),
    };
    Ok(Some(command))
}

fn split_word(input: &str) -> (&str, &str) {
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (input, ""),
    }
}

fn require<'a>(rest: &'a str, usage: &str) -> Result<&'a str, String> {
    let trimmed = rest.trim();
    if trimmed.is_empty() {
        return Err(format!("usage: {}", usage));
    }
    Ok(trimmed)
}

fn parse_id(token: &str) -> Result<Uuid, String> {
    Uuid::parse_str(token.trim()).map_err(|_| format!("not a record id: {}", token.trim()))
}

fn split_fields(list: &str) -> Vec<String> {
    list.split('+')
        .map(|field| field.trim().to_string())
        .filter(|field| !field.is_empty())
        .collect()
}

/// Best-effort typed parse of a query token: int, float, bool, id, else text.
pub fn parse_value_token(token: &str) -> Value {
    let token = token.trim();
    if let Ok(int) = token.parse::<i64>() {
        return Value::Int(int);
    }
    if let Ok(float) = token.parse::<f64>() {
        return Value::Float(float);
    }
    match token {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(id) = Uuid::parse_str(token) {
        return Value::Id(id);
    }
    Value::Text(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_commands() {
        assert_eq!(parse_shell_command("\\q").unwrap(), Some(ShellCommand::Quit));
        assert_eq!(parse_shell_command("exit").unwrap(), Some(ShellCommand::Quit));
        assert_eq!(parse_shell_command("all").unwrap(), Some(ShellCommand::All));
        assert_eq!(parse_shell_command("  ").unwrap(), None);
        assert!(parse_shell_command("frobnicate").is_err());
    }

    #[test]
    fn insert_keeps_the_raw_json() {
        let parsed = parse_shell_command(r#"insert {"title": "Fix crash"}"#).unwrap();
        assert_eq!(
            parsed,
            Some(ShellCommand::Insert {
                json: r#"{"title": "Fix crash"}"#.to_string()
            })
        );
        assert!(parse_shell_command("insert").is_err());
    }

    #[test]
    fn find_parses_typed_values() {
        let parsed = parse_shell_command("find priority 3").unwrap();
        assert_eq!(
            parsed,
            Some(ShellCommand::Find {
                field: "priority".to_string(),
                value: Value::Int(3),
            })
        );

        let parsed = parse_shell_command("findc status+priority inProgress,high").unwrap();
        assert_eq!(
            parsed,
            Some(ShellCommand::FindCompound {
                fields: vec!["status".to_string(), "priority".to_string()],
                values: vec![
                    Value::Text("inProgress".to_string()),
                    Value::Text("high".to_string()),
                ],
            })
        );
    }

    #[test]
    fn validate_accepts_strict() {
        assert_eq!(
            parse_shell_command("validate strict").unwrap(),
            Some(ShellCommand::Validate { strict: true })
        );
        assert_eq!(
            parse_shell_command("validate").unwrap(),
            Some(ShellCommand::Validate { strict: false })
        );
    }

    #[test]
    fn manager_mount_needs_three_arguments() {
        assert!(parse_manager_command("mount onlyname").is_err());
        let parsed = parse_manager_command("mount bugs /tmp/bugs.db secret123").unwrap();
        assert_eq!(
            parsed,
            Some(ManagerCommand::Mount {
                name: "bugs".to_string(),
                path: PathBuf::from("/tmp/bugs.db"),
                password: "secret123".to_string(),
            })
        );
    }

    #[test]
    fn value_tokens_prefer_numbers_and_bools() {
        assert_eq!(parse_value_token("42"), Value::Int(42));
        assert_eq!(parse_value_token("2.5"), Value::Float(2.5));
        assert_eq!(parse_value_token("true"), Value::Bool(true));
        assert_eq!(
            parse_value_token("inProgress"),
            Value::Text("inProgress".to_string())
        );
    }
}
