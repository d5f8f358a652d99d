use std::time::Duration;

use capture_engine::ProgressObserver;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

/// Console renderer for capture progress: a spinner line for the segment
/// currently downloading, finished segments and status changes printed
/// above it.
pub struct ConsoleProgress {
    bar: ProgressBar,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg}").expect("static template is valid"),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }
}

impl ProgressObserver for ConsoleProgress {
    fn segment_started(&self, sequence: u64, url: &str) {
        self.bar.set_message(format!(
            "[{}] downloading {}{}",
            sequence.to_string().green(),
            url.dimmed(),
            "...".white()
        ));
    }

    fn segment_finished(&self, sequence: u64, bytes: u64) {
        self.bar.set_message(String::new());
        self.bar.println(format!(
            "[{}] downloaded ({bytes} bytes)",
            sequence.to_string().green()
        ));
    }

    fn status_changed(&self, online: bool, session_id: Option<&str>) {
        if online {
            self.bar
                .println(format!("{}", "stream is online".green().bold()));
            if let Some(id) = session_id {
                self.bar.println(format!("session id: {id}"));
            }
        } else {
            self.bar.set_message(String::new());
            self.bar
                .println(format!("{}", "stream is offline".yellow()));
        }
    }
}
