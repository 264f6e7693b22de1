//! Notifications that control a running sampler.

use std::str::FromStr;

use anyhow::{Context, anyhow};

/// Name under which the sampler receives notifications.
pub const PLUGIN_NAME: &str = "hpm";

/// A notification sent by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Target of the notification, `None` targets every plugin.
    pub plugin: Option<String>,
    pub message: String,
}

impl Notification {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            plugin: None,
            message: message.into(),
        }
    }

    pub fn for_plugin(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            plugin: Some(plugin.into()),
            message: message.into(),
        }
    }

    /// Returns `true` if the notification is addressed to `plugin`.
    pub fn targets(&self, plugin: &str) -> bool {
        match &self.plugin {
            None => true,
            Some(p) => p.starts_with(plugin),
        }
    }

    /// Interprets the message of the notification.
    pub fn command(&self) -> Option<Command> {
        let msg = self.message.trim_start();
        if msg.starts_with("rstCtrs") || msg.starts_with("reset") {
            Some(Command::ResetCounters)
        } else if msg.starts_with("disable") {
            Some(Command::Disable)
        } else if msg.starts_with("enable") {
            Some(Command::Enable)
        } else {
            None
        }
    }
}

/// Parses a notification from a line of text.
///
/// ## Accepted formats
///
/// - a bare message: `disable`
/// - `key=value` tokens: `plugin=hpm message=rstCtrs`, optionally preceded by `PUTNOTIF`.
///   Other keys, like `severity` or `time`, are ignored.
impl FromStr for Notification {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        if line.is_empty() {
            return Err(anyhow!("empty notification"));
        }
        if !line.contains('=') {
            return Ok(Notification::new(line));
        }

        let mut plugin = None;
        let mut message = None;
        for token in line.split_ascii_whitespace() {
            if token == "PUTNOTIF" {
                continue;
            }
            let (key, value) = token
                .split_once('=')
                .with_context(|| format!("invalid token '{token}', expected key=value"))?;
            match key {
                "plugin" => plugin = Some(value.to_owned()),
                "message" => message = Some(value.to_owned()),
                _ => log::trace!("ignoring notification field {key}"),
            }
        }
        let message = message.with_context(|| format!("missing 'message' in notification '{line}'"))?;
        Ok(Notification { plugin, message })
    }
}

/// Action requested by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Writes the counter programming of every resolved group again.
    ResetCounters,
    /// Suspends the measurement cycles.
    Disable,
    /// Resumes the measurement cycles.
    Enable,
}
