use serde::{Deserialize, Serialize};

/// Messages from the consuming surface (UI interaction handlers) to the
/// pipeline controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SurfaceMessage {
    /// User explicitly opened the assistant
    Activate,
    /// Widget collapsed but still present
    Minimize,
    /// Widget expanded again after `Minimize`
    Restore,
    /// Widget container removed or hidden
    Close,
    /// Widget container shown again after `Close`
    Reopen,
    /// Host navigated; the editor accessor must be re-resolved
    Navigate { location: String },
    /// Tear the pipeline down
    Shutdown,
}

impl SurfaceMessage {
    /// Parse a single-line console command as typed in `cobra watch`.
    pub fn from_command(line: &str) -> Option<Self> {
        let line = line.trim();
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };
        match command {
            "a" | "activate" => Some(SurfaceMessage::Activate),
            "m" | "minimize" => Some(SurfaceMessage::Minimize),
            "r" | "restore" => Some(SurfaceMessage::Restore),
            "c" | "close" => Some(SurfaceMessage::Close),
            "o" | "reopen" => Some(SurfaceMessage::Reopen),
            "n" | "navigate" if !rest.is_empty() => Some(SurfaceMessage::Navigate {
                location: rest.to_string(),
            }),
            "q" | "quit" => Some(SurfaceMessage::Shutdown),
            _ => None,
        }
    }
}
