//! Terminal signal to the front end that started the run.
//!
//! The pipeline calls exactly one [`Shell`] method per logical run and has
//! no further interaction with the shell afterwards. A [`Progress`] sink, if
//! one is attached, sees unit state transitions while collection runs.

use std::path::Path;

use crate::domain::{Outcome, UnitState};

/// Receiver of the run's terminal signal
pub trait Shell: Send + Sync {
    /// The report was uploaded
    fn on_done(&self, url: &str);

    /// Local-only mode: the report was saved
    fn on_done_local_only(&self, path: &Path);

    /// The upload failed and the report was saved instead
    fn on_upload_failed(&self, path: &Path, reason: &str);

    fn on_fatal(&self, reason: &str);
}

/// Dispatch an outcome to the matching shell method
pub fn signal(shell: &dyn Shell, outcome: &Outcome) {
    match outcome {
        Outcome::Uploaded { url } => shell.on_done(url),
        Outcome::SavedLocally { path } => shell.on_done_local_only(path),
        Outcome::UploadFailed { path, reason } => shell.on_upload_failed(path, reason),
        Outcome::Fatal { reason } => shell.on_fatal(reason),
    }
}

/// Shell for the command line
#[derive(Debug, Clone)]
pub struct ConsoleShell {
    upload_origin: String,
}

impl ConsoleShell {
    pub fn new(upload_origin: impl Into<String>) -> Self {
        Self {
            upload_origin: upload_origin.into(),
        }
    }
}

impl Shell for ConsoleShell {
    fn on_done(&self, url: &str) {
        println!("✓ Report uploaded");
        println!("  View it at: {}", url);
    }

    fn on_done_local_only(&self, path: &Path) {
        println!("✓ Report saved");
        println!("  File: {}", path.display());
    }

    fn on_upload_failed(&self, path: &Path, reason: &str) {
        eprintln!("✗ Could not upload: {}", reason);
        eprintln!("  The report has been saved to {}", path.display());
        eprintln!("  Please go to {} to upload the file manually.", self.upload_origin);
    }

    fn on_fatal(&self, reason: &str) {
        eprintln!("✗ Report generation failed: {}", reason);
    }
}

/// Receiver of unit state transitions during collection.
///
/// Transitions can coalesce: a unit that finishes quickly may go from
/// `Queued` straight to `Done`. The terminal state of every blocking unit is
/// always reported before delivery starts.
pub trait Progress: Send + Sync {
    fn on_unit_state(&self, unit: &str, state: UnitState);
}

/// One stderr line per finished unit
#[derive(Debug, Clone, Default)]
pub struct ConsoleProgress;

impl ConsoleProgress {
    /// The line printed for a transition, if any
    pub fn line(unit: &str, state: UnitState) -> Option<String> {
        match state {
            UnitState::Done => Some(format!("  ✓ {}", unit)),
            UnitState::Failed => Some(format!("  ✗ {} (failed)", unit)),
            UnitState::Queued | UnitState::Running => None,
        }
    }
}

impl Progress for ConsoleProgress {
    fn on_unit_state(&self, unit: &str, state: UnitState) {
        if let Some(line) = Self::line(unit, state) {
            eprintln!("{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    impl Shell for Recording {
        fn on_done(&self, url: &str) {
            self.0.lock().unwrap().push(format!("done {}", url));
        }
        fn on_done_local_only(&self, path: &Path) {
            self.0.lock().unwrap().push(format!("local {}", path.display()));
        }
        fn on_upload_failed(&self, path: &Path, reason: &str) {
            self.0
                .lock()
                .unwrap()
                .push(format!("failed {} {}", path.display(), reason));
        }
        fn on_fatal(&self, reason: &str) {
            self.0.lock().unwrap().push(format!("fatal {}", reason));
        }
    }

    #[test]
    fn test_signal_dispatch() {
        let shell = Recording::default();
        signal(&shell, &Outcome::Uploaded { url: "u".into() });
        signal(&shell, &Outcome::SavedLocally { path: PathBuf::from("a.json") });
        signal(
            &shell,
            &Outcome::UploadFailed {
                path: PathBuf::from("a.json"),
                reason: "503".into(),
            },
        );
        signal(&shell, &Outcome::Fatal { reason: "bug".into() });

        assert_eq!(
            *shell.0.lock().unwrap(),
            vec!["done u", "local a.json", "failed a.json 503", "fatal bug"]
        );
    }

    #[test]
    fn test_console_progress_prints_terminal_states_only() {
        assert_eq!(ConsoleProgress::line("MainData", UnitState::Queued), None);
        assert_eq!(ConsoleProgress::line("MainData", UnitState::Running), None);
        assert_eq!(
            ConsoleProgress::line("MainData", UnitState::Done).as_deref(),
            Some("  ✓ MainData")
        );
        assert_eq!(
            ConsoleProgress::line("NetworkData", UnitState::Failed).as_deref(),
            Some("  ✗ NetworkData (failed)")
        );
    }
}
