use thiserror::Error;

#[derive(Debug, Error)]
pub enum TerminalError {
    /// No run template exists for the requested language.
    #[error("Language not supported")]
    UnsupportedLanguage(String),

    #[error("PTY error: {0}")]
    Pty(String),

    /// Input or resize for a socket that never requested a terminal.
    #[error("No terminal for this connection")]
    NoTerminal,

    #[error("Invalid entry path: {0}")]
    InvalidEntry(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TerminalError>;
