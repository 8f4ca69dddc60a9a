use std::{borrow::Cow, sync::LazyLock};

use regex_lite::Regex;
use shadlink_proto::{Channel, Line, control_payload};

static ANSI_CSI: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[mK]").unwrap());

/// Display colour of a relayed worker line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogColor {
    Default,
    Yellow,
    Red,
    Magenta,
    Gray,
    Cyan,
}

impl LogColor {
    pub fn level(self) -> tracing::Level {
        match self {
            LogColor::Red | LogColor::Magenta => tracing::Level::ERROR,
            LogColor::Yellow => tracing::Level::WARN,
            LogColor::Cyan => tracing::Level::DEBUG,
            LogColor::Gray => tracing::Level::TRACE,
            LogColor::Default => tracing::Level::INFO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LogEntry {
    #[serde(skip)]
    pub channel: Channel,
    pub color: LogColor,
    pub text: String,
}

impl LogEntry {
    pub fn level(&self) -> tracing::Level {
        match self.channel {
            Channel::Stderr => tracing::Level::ERROR,
            Channel::Stdout => self.color.level(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relayed {
    Log(LogEntry),
    /// Payload of a control frame, prefix removed.
    Control(String),
    Dropped,
}

pub fn strip_ansi(s: &str) -> Cow<'_, str> {
    ANSI_CSI.replace_all(s, "")
}

/// First matching tag wins, in this order.
const TAG_COLORS: &[(&str, LogColor)] = &[
    ("<Warning>", LogColor::Yellow),
    ("<Error>", LogColor::Red),
    ("<Critical>", LogColor::Magenta),
    ("<Trace>", LogColor::Gray),
    ("<Debug>", LogColor::Cyan),
];

pub fn classify(text: &str) -> LogColor {
    TAG_COLORS
        .iter()
        .find(|(tag, _)| text.contains(tag))
        .map(|(_, color)| *color)
        .unwrap_or(LogColor::Default)
}

/// Decides what happens to one complete worker line.
///
/// Only stderr carries control frames. Stderr log lines are passed through
/// untouched; stdout lines are cleaned, classified and dropped when blank.
pub fn relay(line: &Line) -> Relayed {
    match line.channel {
        Channel::Stderr => match control_payload(&line.text) {
            Some(payload) => Relayed::Control(payload.to_string()),
            None => Relayed::Log(LogEntry {
                channel: Channel::Stderr,
                color: LogColor::Red,
                text: line.text.clone(),
            }),
        },
        Channel::Stdout => {
            let clean = strip_ansi(&line.text);
            let text = clean.trim();
            if text.is_empty() {
                return Relayed::Dropped;
            }
            Relayed::Log(LogEntry {
                channel: Channel::Stdout,
                color: classify(text),
                text: text.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdout(text: &str) -> Line {
        Line {
            channel: Channel::Stdout,
            text: text.to_string(),
        }
    }

    fn stderr(text: &str) -> Line {
        Line {
            channel: Channel::Stderr,
            text: text.to_string(),
        }
    }

    fn entry(r: Relayed) -> LogEntry {
        match r {
            Relayed::Log(e) => e,
            other => panic!("expected log entry, got {other:?}"),
        }
    }

    #[test]
    fn strips_ansi_without_tag() {
        let e = entry(relay(&stdout("\x1b[33mHello\x1b[0m World")));
        assert_eq!(e.text, "Hello World");
        assert_eq!(e.color, LogColor::Default);
    }

    #[test]
    fn strips_ansi_and_classifies_error() {
        let e = entry(relay(&stdout("<Error>\x1b[31mBoom\x1b[0m")));
        assert_eq!(e.text, "<Error>Boom");
        assert_eq!(e.color, LogColor::Red);
        assert_eq!(e.level(), tracing::Level::ERROR);
    }

    #[test]
    fn strips_erase_line_and_multi_param_sequences() {
        assert_eq!(strip_ansi("\x1b[1;32mok\x1b[K"), "ok");
        // Not a CSI sequence we strip.
        assert_eq!(strip_ansi("\x1b[2J"), "\x1b[2J");
    }

    #[test]
    fn classification_precedence() {
        assert_eq!(classify("<Error> then <Warning>"), LogColor::Yellow);
        assert_eq!(classify("<Critical> <Debug>"), LogColor::Magenta);
        assert_eq!(classify("[Render] <Trace> frame"), LogColor::Gray);
        assert_eq!(classify("[Input] <Debug> pad"), LogColor::Cyan);
        assert_eq!(classify("[Core] <Info> boot"), LogColor::Default);
    }

    #[test]
    fn blank_stdout_is_dropped() {
        assert_eq!(relay(&stdout("   ")), Relayed::Dropped);
        assert_eq!(relay(&stdout("\x1b[0m")), Relayed::Dropped);
    }

    #[test]
    fn stdout_trims_whitespace() {
        assert_eq!(entry(relay(&stdout("  padded \t"))).text, "padded");
    }

    #[test]
    fn stdout_never_carries_control_frames() {
        let e = entry(relay(&stdout(";#IPC_ENABLED")));
        assert_eq!(e.text, ";#IPC_ENABLED");
    }

    #[test]
    fn stderr_control_and_verbatim_logs() {
        assert_eq!(
            relay(&stderr(";ENABLE_EMU_CONTROL")),
            Relayed::Control("ENABLE_EMU_CONTROL".to_string())
        );
        let e = entry(relay(&stderr("  \x1b[31mraw <Warning>")));
        assert_eq!(e.text, "  \x1b[31mraw <Warning>");
        assert_eq!(e.level(), tracing::Level::ERROR);
    }
}
