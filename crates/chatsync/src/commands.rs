//! Session commands shared by one-shot mode and the interactive CLI

use std::path::PathBuf;

use chatsync_core::codec::{self, EXPORT_MIME_TYPE};
use chatsync_core::{Error, Identity, MigrationReport, Persona, ReconciliationEngine, SessionRecord};
use chrono::Utc;

/// A parsed session command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    New { name: String, persona: Persona },
    Rename { id: String, name: String },
    Delete { id: String },
    Export { path: Option<PathBuf> },
    Import { path: PathBuf },
    Migrate,
    Groups,
    Login { user_id: String },
    Logout,
}

/// Command names with their argument hint and description
pub const COMMANDS: &[(&str, &str, &str)] = &[
    ("list", "", "List sessions, most recent first"),
    ("new", "<name> [persona]", "Start a new session"),
    ("rename", "<id> <name>", "Rename a session"),
    ("delete", "<id>", "Delete a session"),
    ("export", "[path]", "Export sessions to a JSON file"),
    ("import", "<path>", "Import sessions from a JSON file"),
    ("migrate", "", "Move local sessions to the signed-in account"),
    ("groups", "", "List group chats of the signed-in account"),
    ("login", "<user-id>", "Sign in (interactive mode)"),
    ("logout", "", "Sign out (interactive mode)"),
];

impl Command {
    /// Parse a command from its words, e.g. `["rename", "abc", "New", "name"]`.
    /// Trailing words of a name are joined with spaces.
    pub fn parse(words: &[String]) -> Result<Self, String> {
        let Some((head, rest)) = words.split_first() else {
            return Err("no command given".to_string());
        };

        let joined = |from: usize| rest.get(from..).map(|w| w.join(" ")).unwrap_or_default();
        let required = |index: usize, what: &str| {
            rest.get(index)
                .cloned()
                .ok_or_else(|| format!("`{}` needs {}", head, what))
        };

        match head.as_str() {
            "list" | "ls" => Ok(Command::List),
            "new" => {
                let name = required(0, "a name")?;
                let persona = rest.get(1).map(|p| Persona::from(p.as_str())).unwrap_or_default();
                Ok(Command::New { name, persona })
            }
            "rename" => {
                let id = required(0, "a session id")?;
                Ok(Command::Rename { id, name: joined(1) })
            }
            "delete" | "rm" => Ok(Command::Delete {
                id: required(0, "a session id")?,
            }),
            "export" => Ok(Command::Export {
                path: rest.first().map(PathBuf::from),
            }),
            "import" => Ok(Command::Import {
                path: PathBuf::from(required(0, "a file path")?),
            }),
            "migrate" => Ok(Command::Migrate),
            "groups" => Ok(Command::Groups),
            "login" => Ok(Command::Login {
                user_id: required(0, "a user id")?,
            }),
            "logout" => Ok(Command::Logout),
            other => Err(format!("unknown command: {}", other)),
        }
    }
}

/// User-facing wording for an engine error
pub fn feedback_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<Error>() {
        Some(Error::Network(_)) => format!("Could not reach the session service, try again later ({})", err),
        Some(Error::Auth(_)) => format!("Please sign in again ({})", err),
        Some(Error::NoValidRecords { .. }) => "The file did not contain any usable sessions".to_string(),
        Some(Error::InvalidDocument(reason)) => format!("That file is not a session export: {}", reason),
        _ => err.to_string(),
    }
}

fn format_session(record: &SessionRecord) -> String {
    format!(
        "{}  {:<32} {:<10} {:>4} msgs  {}",
        record.id,
        record.name,
        record.persona,
        record.message_count(),
        record.last_modified.format("%Y-%m-%d %H:%M")
    )
}

/// One-line summary of a migration pass
pub fn format_migration(report: &MigrationReport) -> String {
    let mut line = format!("{} migrated", report.migrated);
    if report.already_migrated > 0 {
        line.push_str(&format!(", {} already present", report.already_migrated));
    }
    if report.pending > 0 {
        line.push_str(&format!(", {} pending", report.pending));
    }
    if let Some(err) = &report.stopped_by {
        line.push_str(&format!(" (stopped: {})", err));
    }
    line
}

/// Run one command and return the text to show
pub async fn execute(engine: &ReconciliationEngine, command: Command) -> anyhow::Result<String> {
    let output = match command {
        Command::List => {
            let sessions = engine.load().await?;
            if sessions.is_empty() {
                "No sessions".to_string()
            } else {
                sessions.iter().map(format_session).collect::<Vec<_>>().join("\n")
            }
        }
        Command::New { name, persona } => {
            let record = engine.create_session(name, persona).await?;
            format!("Created {} ({})", record.id, record.name)
        }
        Command::Rename { id, name } => {
            engine.rename(&id, &name).await?;
            format!("Renamed {}", id)
        }
        Command::Delete { id } => {
            engine.delete(&id).await?;
            format!("Deleted {}", id)
        }
        Command::Export { path } => {
            let document = engine.export().await?;
            let path = path.unwrap_or_else(|| PathBuf::from(codec::export_file_name(Utc::now())));
            std::fs::write(&path, document.to_json()?)?;
            format!(
                "Exported {} sessions to {} ({})",
                document.sessions.len(),
                path.display(),
                EXPORT_MIME_TYPE
            )
        }
        Command::Import { path } => {
            let text = std::fs::read_to_string(&path)?;
            let report = engine.import(&text).await?;
            let mut line = format!("Imported {} sessions", report.count());
            if report.dropped > 0 {
                line.push_str(&format!(", skipped {} invalid", report.dropped));
            }
            if report.pending > 0 {
                line.push_str(&format!(", {} pending", report.pending));
            }
            if let Some(err) = &report.stopped_by {
                line.push_str(&format!(" (stopped: {}; import the file again to finish)", err));
            }
            line
        }
        Command::Migrate => format_migration(&engine.migrate_to_remote().await?),
        Command::Groups => {
            let chats = engine.list_group_chats().await?;
            if chats.is_empty() {
                "No group chats".to_string()
            } else {
                chats
                    .iter()
                    .map(|c| {
                        format!(
                            "{}  {:<32} {:<10} {} ({} participants)",
                            c.id, c.name, c.persona, c.owner_name, c.participant_count
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        Command::Login { user_id } => match engine.sign_in(&user_id).await? {
            Some(report) => format!("Signed in as {}; {}", user_id, format_migration(&report)),
            None => format!("Signed in as {}", user_id),
        },
        Command::Logout => {
            engine.sign_out().await;
            "Signed out".to_string()
        }
    };
    Ok(output)
}

/// Label of the current identity, used in prompts
pub fn identity_label(identity: &Identity) -> &str {
    match identity {
        Identity::Anonymous => "local",
        Identity::Authenticated { owner_id } => owner_id.as_str(),
    }
}
