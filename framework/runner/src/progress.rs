use std::fmt::Write;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressState, ProgressStyle};

/// A progress bar for a timeline that is planned to run for `planned_runtime`. The caller moves it
/// along as the timeline advances.
pub fn timeline_progress(planned_runtime: Duration) -> ProgressBar {
    let pb = ProgressBar::new(planned_runtime.as_secs());
    match ProgressStyle::with_template(
        "{spinner:.green} [{wide_bar:.cyan/blue}] [{elapsed_precise} / {planned_runtime}]",
    ) {
        Ok(style) => pb.set_style(
            style
                .with_key("planned_runtime", {
                    let hours = planned_runtime.as_secs() / 3600;
                    let minutes = (planned_runtime.as_secs() % 3600) / 60;
                    let seconds = planned_runtime.as_secs() % 60;
                    move |_state: &ProgressState, w: &mut dyn Write| {
                        let _ = write!(w, "{:02}:{:02}:{:02}", hours, minutes, seconds);
                    }
                })
                .progress_chars("#>-"),
        ),
        Err(e) => log::warn!("Failed to set progress style: {e}"),
    }

    pb
}
