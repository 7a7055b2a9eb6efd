//! Side channel for human-readable stage progress.
//!
//! Every stage reports its outcome with a short title and a message, for
//! example "Error: Compiling SCSS." followed by the compiler output. The
//! console notifier writes these through `tracing`; the desktop notifier
//! additionally pops up a system notification via `notify-send`.

use std::process::{Command, Stdio};

use console::style;

/// Receives stage notifications.
pub trait Notifier: Send + Sync {
    fn success(&self, title: &str, message: &str);
    fn failure(&self, title: &str, message: &str);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn success(&self, title: &str, message: &str) {
        tracing::info!("{} {}", style(title).green(), message);
    }

    fn failure(&self, title: &str, message: &str) {
        tracing::error!("{}\n{}", style(title).red().bold(), message);
    }
}

/// Logs like [`ConsoleNotifier`] and also shows a desktop notification.
///
/// A missing `notify-send` binary is not an error; the notification is
/// simply dropped after the first log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopNotifier;

impl DesktopNotifier {
    fn send(&self, urgency: &str, title: &str, message: &str) {
        let spawned = Command::new("notify-send")
            .arg("--app-name=tsumugi")
            .arg(format!("--urgency={urgency}"))
            .arg(title)
            .arg(message)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        if let Err(e) = spawned {
            tracing::debug!("desktop notification dropped: {e}");
        }
    }
}

impl Notifier for DesktopNotifier {
    fn success(&self, title: &str, message: &str) {
        ConsoleNotifier.success(title, message);
        self.send("low", title, message);
    }

    fn failure(&self, title: &str, message: &str) {
        ConsoleNotifier.failure(title, message);
        self.send("critical", title, message);
    }
}

/// Title used when a stage fails.
pub(crate) fn failure_title(stage: &str) -> String {
    match stage {
        "templates" => "Error: Compiling templates.".into(),
        "styles" => "Error: Compiling SCSS.".into(),
        "scripts" => "Error: Concat and minify failed.".into(),
        "uncss" => "Error: UnCSS failed.".into(),
        "critical" => "Error: Critical failed.".into(),
        "surge" | "ftp" => "Error: Deploy failed.".into(),
        other => format!("Error: {other} failed."),
    }
}

/// Title used when a stage succeeds.
pub(crate) fn success_title(stage: &str) -> String {
    match stage {
        "templates" => "Templates compiled successfully!".into(),
        "styles" => "SCSS compiled and minified successfully!".into(),
        "scripts" => "JavaScript minified and concatenated!".into(),
        "uncss" => "Removed unused CSS".into(),
        "critical" => "Critical path completed!".into(),
        "surge" | "ftp" => "Deploy successful!".into(),
        other => format!("{other} completed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_stages_have_dedicated_titles() {
        assert_eq!(failure_title("styles"), "Error: Compiling SCSS.");
        assert_eq!(failure_title("ftp"), "Error: Deploy failed.");
        assert_eq!(success_title("uncss"), "Removed unused CSS");
    }

    #[test]
    fn unknown_stages_fall_back_to_their_name() {
        assert_eq!(failure_title("images"), "Error: images failed.");
        assert_eq!(success_title("images"), "images completed");
    }
}
