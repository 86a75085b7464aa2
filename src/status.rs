/// Hang status shown to the operator.
///
/// The text is a pure function of idle time; `TitleStatus` decides where it
/// goes. Nothing here feeds back into escalation decisions.
use std::io::{IsTerminal, Write};

/// Status text for the given idle duration.
pub fn status_text(idle_secs: u64, warn_after_secs: u64, display_name: &str) -> String {
    if idle_secs > warn_after_secs {
        format!("Hung {idle_secs} secs - {display_name}")
    } else {
        display_name.to_string()
    }
}

/// Pushes status text to the terminal title, or to the debug log when
/// stderr is not a terminal. Only writes when the text changes.
pub struct TitleStatus {
    display_name: String,
    warn_after_secs: u64,
    to_terminal: bool,
    current: Option<String>,
}

impl TitleStatus {
    pub fn new(display_name: impl Into<String>, warn_after_secs: u64) -> Self {
        Self::with_terminal(
            display_name,
            warn_after_secs,
            std::io::stderr().is_terminal(),
        )
    }

    pub fn with_terminal(
        display_name: impl Into<String>,
        warn_after_secs: u64,
        to_terminal: bool,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            warn_after_secs,
            to_terminal,
            current: None,
        }
    }

    /// Update for the current idle time. Returns the text if it changed.
    pub fn update(&mut self, idle_secs: u64) -> Option<&str> {
        let text = status_text(idle_secs, self.warn_after_secs, &self.display_name);
        if self.current.as_deref() == Some(text.as_str()) {
            return None;
        }
        self.present(&text);
        self.current = Some(text);
        self.current.as_deref()
    }

    /// Put back the plain name (at exit).
    pub fn clear(&mut self) {
        let _ = self.update(0);
    }

    fn present(&self, text: &str) {
        if self.to_terminal {
            // OSC 0: set icon name and window title
            let mut stderr = std::io::stderr().lock();
            let _ = write!(stderr, "\x1b]0;{text}\x07");
            let _ = stderr.flush();
        } else {
            tracing::debug!(status = %text, "status changed");
        }
    }
}
