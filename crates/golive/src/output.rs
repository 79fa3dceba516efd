//! Terminal status output.
//!
//! Plays the part of an editor status bar: every lifecycle transition is
//! rendered as one colored line on stderr.

use console::{Style, Term};
use golive_server::{ServerError, ServerState};

/// Terminal output formatter.
pub(crate) struct Output {
    term: Term,
    dim: Style,
    green: Style,
    yellow: Style,
    red: Style,
    cyan_bold: Style,
}

impl Output {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            term: Term::stderr(),
            dim: Style::new().dim(),
            green: Style::new().green(),
            yellow: Style::new().yellow(),
            red: Style::new().red(),
            cyan_bold: Style::new().cyan().bold(),
        }
    }

    fn styled(&self, style: &Style, msg: &str) {
        let _ = self.term.write_line(&style.apply_to(msg).to_string());
    }

    pub(crate) fn info(&self, msg: &str) {
        let _ = self.term.write_line(msg);
    }

    /// Print an error message (red).
    pub(crate) fn error(&self, msg: &str) {
        self.styled(&self.red, msg);
    }

    /// Print the URL the user should open (cyan bold).
    pub(crate) fn open_url(&self, url: &str) {
        self.styled(&self.cyan_bold, &format!("Open {url}"));
    }

    /// Render a lifecycle transition.
    pub(crate) fn server_state(&self, state: &ServerState) {
        let label = state_label(state);
        match state {
            ServerState::Running(_) => self.styled(&self.green, &label),
            ServerState::Starting | ServerState::Stopping => self.styled(&self.dim, &label),
            ServerState::Stopped => self.info(&label),
        }
    }

    /// Print a remedy for errors the user can act on (yellow).
    pub(crate) fn hint(&self, error: &ServerError) {
        if let Some(hint) = error_hint(error) {
            self.styled(&self.yellow, hint);
        }
    }
}

fn state_label(state: &ServerState) -> String {
    match state {
        ServerState::Stopped => "Go Live".to_owned(),
        ServerState::Starting => "Starting...".to_owned(),
        ServerState::Running(info) => format!("Port: {}  {}", info.port, info.url),
        ServerState::Stopping => "Disposing...".to_owned(),
    }
}

fn error_hint(error: &ServerError) -> Option<&'static str> {
    match error {
        ServerError::PortExhausted { .. } => {
            Some("Hint: free a port or set [server] port in golive.toml")
        }
        ServerError::Bind { .. } if error.is_permission_denied() => {
            Some("Hint: ports below 1024 need elevated privileges, choose a higher port")
        }
        ServerError::RootNotFound(_) => Some("Hint: check [server] root or pass --root"),
        ServerError::Tls { .. } => {
            Some("Hint: provide an existing certificate pair under [tls] cert and key")
        }
        _ => None,
    }
}
