use std::fmt::Write;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use log::debug;

/// Per-frame progress for the upscale loop.
pub struct Progress {
    progress_bar: ProgressBar,
    start_time: Instant,
    total: usize,
}

impl Progress {
    pub fn new(total: usize, header: &str, visible: bool) -> Self {
        let progress_bar = if visible {
            ProgressBar::new(total as u64)
        } else {
            ProgressBar::hidden()
        };
        let progress_template = "[{elapsed_precise}] [{eta}] [{wide_bar:.white/green}] {pos}/{len} {percent} {msg}";
        if let Ok(style) = ProgressStyle::default_bar().template(&format!("{}\n{}", header, progress_template)) {
            let style = style
                .progress_chars("█▓▒░-")
                .with_key("eta", |state: &ProgressState, w: &mut dyn Write| {
                    let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
                })
                .with_key("percent", |state: &ProgressState, w: &mut dyn Write| {
                    let _ = write!(w, "({:.0}%)", state.fraction() * 100.0);
                });
            progress_bar.set_style(style);
        }

        Self {
            progress_bar,
            start_time: Instant::now(),
            total,
        }
    }

    /// Records that `completed` frames are done, the last one at `position`.
    pub fn frame_done(&self, position: usize, completed: usize) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let frame_rate = if elapsed > 0.0 { completed as f64 / elapsed } else { 0.0 };
        self.progress_bar.set_position(completed as u64);
        self.progress_bar.set_message(format!("[fps: {:.2}]", frame_rate));
        debug!("Upscaled frame {} ({}/{})", position, completed, self.total);
    }

    pub fn finish(&self) {
        self.progress_bar.finish();
    }

    pub fn abandon(&self) {
        self.progress_bar.abandon();
    }
}
