//! CLI (Command Line Interface) mode
//!
//! Interactive REPL over the session engine. Every one-shot command is
//! available as a `/command`, plus `/login` and `/logout` to switch identity
//! without restarting.

use std::borrow::Cow;

use chatsync_core::ReconciliationEngine;
use nu_ansi_term::{Color, Style};
use reedline::{
    ColumnarMenu, Completer, DefaultHinter, Emacs, KeyCode, KeyModifiers, Keybindings,
    MenuBuilder, Prompt, PromptEditMode, PromptHistorySearch, Reedline, ReedlineEvent,
    ReedlineMenu, Signal, Suggestion,
};
use tracing::info;

use crate::commands::{self, COMMANDS, Command};

/// Commands that only exist in the REPL
const REPL_COMMANDS: &[(&str, &str)] = &[
    ("/help", "Show this help"),
    ("/exit", "Quit"),
];

/// Command completer for reedline
#[derive(Clone)]
pub struct CommandCompleter {
    commands: Vec<(String, String)>,
}

impl CommandCompleter {
    pub fn new() -> Self {
        let session_commands = COMMANDS
            .iter()
            .map(|(name, _, desc)| (format!("/{}", name), desc.to_string()));
        let repl_commands = REPL_COMMANDS
            .iter()
            .map(|(name, desc)| (name.to_string(), desc.to_string()));
        Self {
            commands: session_commands.chain(repl_commands).collect(),
        }
    }
}

impl Default for CommandCompleter {
    fn default() -> Self {
        Self::new()
    }
}

impl Completer for CommandCompleter {
    fn complete(&mut self, line: &str, pos: usize) -> Vec<Suggestion> {
        // 行頭が / で始まる場合のみ候補を表示
        if !line.starts_with('/') {
            return Vec::new();
        }

        self.commands
            .iter()
            .filter(|(cmd, _)| cmd.starts_with(line))
            .map(|(cmd, desc)| Suggestion {
                value: cmd.clone(),
                description: Some(desc.clone()),
                extra: None,
                span: reedline::Span::new(0, pos),
                append_whitespace: true,
                style: None,
            })
            .collect()
    }
}

/// Prompt showing the current identity
struct IdentityPrompt {
    label: String,
    style: Style,
}

impl IdentityPrompt {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            style: Color::Cyan.bold(),
        }
    }
}

impl Prompt for IdentityPrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        Cow::Owned(self.style.paint(format!("{}> ", self.label)).to_string())
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _prompt_mode: PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_history_search_indicator(
        &self,
        _history_search: PromptHistorySearch,
    ) -> Cow<'_, str> {
        Cow::Borrowed("")
    }
}

/// What the REPL should do with one input line
#[derive(Debug, PartialEq, Eq)]
enum LineAction {
    Skip,
    Exit,
    Help,
    Run(Command),
    Invalid(String),
}

fn parse_line(line: &str) -> LineAction {
    let input = line.trim();
    if input.is_empty() {
        return LineAction::Skip;
    }

    let Some(stripped) = input.strip_prefix('/') else {
        return LineAction::Invalid("commands start with '/'; try /help".to_string());
    };

    let words: Vec<String> = stripped.split_whitespace().map(str::to_string).collect();
    match words.first().map(|w| w.to_lowercase()).as_deref() {
        Some("exit" | "quit" | "q") => LineAction::Exit,
        Some("help" | "?") => LineAction::Help,
        _ => match Command::parse(&words) {
            Ok(command) => LineAction::Run(command),
            Err(e) => LineAction::Invalid(e),
        },
    }
}

/// Run CLI interactive mode
pub async fn run_cli(engine: ReconciliationEngine) -> anyhow::Result<()> {
    info!("Starting interactive session CLI");
    print_welcome();

    // Setup keybindings
    let mut keybindings = default_keybindings();

    // Trigger completion on '/' key
    keybindings.add_binding(
        KeyModifiers::NONE,
        KeyCode::Char('/'),
        ReedlineEvent::Edit(vec![reedline::EditCommand::InsertChar('/'), reedline::EditCommand::Complete]),
    );

    let menu = Box::new(
        ColumnarMenu::default()
            .with_name("command_menu")
            .with_columns(1)
            .with_column_width(Some(48))
            .with_only_buffer_difference(false),
    );

    let hinter = DefaultHinter::default().with_style(Style::new().dimmed());

    let mut line_editor = Reedline::create()
        .with_completer(Box::new(CommandCompleter::new()))
        .with_menu(ReedlineMenu::EngineCompleter(menu))
        .with_hinter(Box::new(hinter))
        .with_edit_mode(Box::new(Emacs::new(keybindings)));

    loop {
        let identity = engine.identity().await;
        let prompt = IdentityPrompt::new(commands::identity_label(&identity));

        match line_editor.read_line(&prompt) {
            Ok(Signal::Success(line)) => match parse_line(&line) {
                LineAction::Skip => continue,
                LineAction::Exit => break,
                LineAction::Help => print_help(),
                LineAction::Invalid(message) => eprintln!("\n❓ {}\n", message),
                LineAction::Run(command) => match commands::execute(&engine, command).await {
                    Ok(output) => println!("\n{}\n", output),
                    // Errors are reported and the session list stays usable
                    Err(e) => eprintln!("\n❌ {}\n", commands::feedback_message(&e)),
                },
            },
            Ok(Signal::CtrlC) => {
                println!("^C");
                continue;
            }
            Ok(Signal::CtrlD) => break,
            Err(err) => {
                eprintln!("\n❌ {}\n", err);
                break;
            }
        }
    }

    println!("\n👋 Bye!\n");
    Ok(())
}

/// Default keybindings for reedline
fn default_keybindings() -> Keybindings {
    let mut keybindings = Keybindings::new();
    // Tab key triggers completion
    keybindings.add_binding(
        KeyModifiers::NONE,
        KeyCode::Tab,
        ReedlineEvent::Edit(vec![reedline::EditCommand::Complete]),
    );
    keybindings.add_binding(KeyModifiers::NONE, KeyCode::Enter, ReedlineEvent::Submit);
    keybindings.add_binding(KeyModifiers::NONE, KeyCode::Esc, ReedlineEvent::Esc);
    keybindings.add_binding(KeyModifiers::CONTROL, KeyCode::Char('c'), ReedlineEvent::CtrlC);
    keybindings.add_binding(KeyModifiers::CONTROL, KeyCode::Char('d'), ReedlineEvent::CtrlD);
    keybindings.add_binding(KeyModifiers::NONE, KeyCode::Up, ReedlineEvent::Up);
    keybindings.add_binding(KeyModifiers::NONE, KeyCode::Down, ReedlineEvent::Down);
    keybindings
}

fn print_welcome() {
    println!();
    println!("{}", Color::Cyan.bold().paint("chatsync"));
    println!("Type /help for commands, /exit to quit.");
    println!();
}

fn print_help() {
    println!();
    for (name, args, desc) in COMMANDS {
        let usage = format!("/{} {}", name, args);
        println!("  {:<28} {}", usage.trim_end(), desc);
    }
    for (name, desc) in REPL_COMMANDS {
        println!("  {:<28} {}", name, desc);
    }
    println!();
}
