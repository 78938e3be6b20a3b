//! Download progress display on stderr.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Progress bar for a download of `total` bytes, redrawn at most once a second.
///
/// An unknown total shows a running byte counter instead of a bar. Output is
/// suppressed automatically when stderr is not a terminal.
pub fn download_bar(total: Option<u64>, label: &str) -> ProgressBar {
    let target = ProgressDrawTarget::stderr_with_hz(1);
    let bar = match total {
        Some(len) => {
            let bar = ProgressBar::with_draw_target(Some(len), target);
            bar.set_style(
                ProgressStyle::with_template(
                    "{msg} [{bar:30}] {bytes}/{total_bytes} ({bytes_per_sec})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
            );
            bar
        }
        None => {
            let bar = ProgressBar::with_draw_target(None, target);
            bar.set_style(
                ProgressStyle::with_template("{msg} {bytes} ({bytes_per_sec})")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar
        }
    };
    bar.set_message(label.to_string());
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_bar_lengths() {
        let bar = download_bar(Some(1024), "Downloading app.aci");
        assert_eq!(bar.length(), Some(1024));
        bar.inc(512);
        assert_eq!(bar.position(), 512);
        bar.finish_and_clear();

        let counter = download_bar(None, "Downloading app.aci");
        assert_eq!(counter.length(), None);
        counter.finish_and_clear();
    }
}
