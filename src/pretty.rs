//! Progress bar (§4.7, part of Module 8 CLI & Process Shell). A thin
//! `indicatif` wrapper ticked once per drained `ProbeResult`, styled after
//! the progress-bar helper pattern seen across the pack (bar + position +
//! message).

use indicatif::{ProgressBar, ProgressStyle};

/// Builds a ticking progress bar for `total` attempts, or a hidden no-op
/// bar when the caller passed `-noProgressBar` (§6).
pub fn build(total: u64, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
            .expect("static progress bar template is always valid")
            .progress_chars("##-"),
    );
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_bar_is_hidden_and_does_not_panic_on_tick() {
        let bar = build(10, false);
        bar.inc(1);
        bar.finish();
    }

    #[test]
    fn enabled_bar_tracks_position() {
        let bar = build(10, true);
        bar.inc(3);
        assert_eq!(bar.position(), 3);
        bar.finish();
    }
}
