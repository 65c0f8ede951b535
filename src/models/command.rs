/// Command model
/// A saved shell invocation and the shell it runs in.
/// Executions only ever read a snapshot of a command.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported command interpreters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShellKind {
    #[default]
    #[serde(rename = "POWERSHELL")]
    PowerShell,
    Cmd,
    GitBash,
    Wsl,
}

impl ShellKind {
    /// Executable name, resolved through PATH
    pub fn program(self) -> &'static str {
        match self {
            ShellKind::PowerShell => "powershell.exe",
            ShellKind::Cmd => "cmd.exe",
            ShellKind::GitBash => "bash",
            ShellKind::Wsl => "wsl",
        }
    }

    /// Flags that keep the interpreter reading commands from stdin
    pub fn interactive_args(self) -> &'static [&'static str] {
        match self {
            ShellKind::PowerShell => &["-NoLogo"],
            ShellKind::Cmd => &["/K"],
            ShellKind::GitBash => &["-i"],
            ShellKind::Wsl => &["bash", "-i"],
        }
    }
}

/// A persisted command template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    /// Text written to the shell once it is up. Blank for a bare terminal.
    pub command: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub working_directory: String,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub shell: ShellKind,
    /// Keep the shell open after the initial command. When false, stdin is
    /// closed after injection so the shell exits once the command is done.
    #[serde(default = "default_interactive")]
    pub interactive: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_interactive() -> bool {
    true
}

impl Command {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            command: command.into(),
            description: String::new(),
            working_directory: String::new(),
            project_id: None,
            category_id: None,
            is_favorite: false,
            tags: Vec::new(),
            shell: ShellKind::default(),
            interactive: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Ad-hoc empty command backing an interactive terminal
    pub fn terminal(working_directory: impl Into<String>, shell: ShellKind) -> Self {
        let now = Utc::now();
        Self {
            id: now.timestamp_millis(),
            description: "Interactive terminal".to_string(),
            working_directory: working_directory.into(),
            shell,
            ..Self::new("Terminal", "")
        }
    }

    pub fn with_shell(mut self, shell: ShellKind) -> Self {
        self.shell = shell;
        self
    }

    pub fn in_directory(mut self, working_directory: impl Into<String>) -> Self {
        self.working_directory = working_directory.into();
        self
    }

    /// Run the command and let the shell exit afterwards
    pub fn batch(mut self) -> Self {
        self.interactive = false;
        self
    }

    pub fn has_initial_input(&self) -> bool {
        !self.command.trim().is_empty()
    }
}
