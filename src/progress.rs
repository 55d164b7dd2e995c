use std::fmt::Write;
use std::sync::Mutex;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Snapshot of the current phase: what is happening and how far along it is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Progress {
    pub label: String,
    pub current: u64,
    pub max: u64,
}

/// Phase progress of one job, optionally mirrored to terminal progress bars.
///
/// `current` only moves forward within a phase. Starting a phase resets it.
pub struct ProgressTracker {
    state: Mutex<Progress>,
    multi_progress: Option<MultiProgress>,
    phase_bar: Mutex<Option<ProgressBar>>,
}

impl ProgressTracker {
    pub fn new(multi_progress: MultiProgress) -> Self {
        ProgressTracker {
            state: Mutex::new(Progress::default()),
            multi_progress: Some(multi_progress),
            phase_bar: Mutex::new(None),
        }
    }

    /// Tracks progress without drawing anything.
    pub fn hidden() -> Self {
        ProgressTracker {
            state: Mutex::new(Progress::default()),
            multi_progress: None,
            phase_bar: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> Progress {
        self.state.lock().unwrap().clone()
    }

    pub fn start_phase(&self, label: impl Into<String>, max: u64) {
        let label = label.into();
        log::debug!("{} (0/{})", label, max);

        *self.state.lock().unwrap() = Progress {
            label: label.clone(),
            current: 0,
            max,
        };

        let mut phase_bar = self.phase_bar.lock().unwrap();

        if let Some(previous) = phase_bar.take() {
            previous.finish_and_clear();
        }

        if let Some(multi_progress) = &self.multi_progress {
            let bar = ProgressBar::new(max)
                .with_style(
                    ProgressStyle::with_template("[{elapsed_precise}] {wide_msg} {pos:>4}/{len:<4} [{bar:30.cyan/blue}]")
                        .unwrap()
                        .progress_chars("=> "),
                )
                .with_message(label);
            *phase_bar = Some(multi_progress.add(bar));
        }
    }

    /// Advances the current phase by one finished item.
    pub fn advance(&self) {
        let mut state = self.state.lock().unwrap();
        state.current = (state.current + 1).min(state.max);

        if let Some(bar) = self.phase_bar.lock().unwrap().as_ref() {
            bar.set_position(state.current);
        }
    }

    /// Updates label and position together, e.g. `Downloading: EP 3`.
    /// Positions lower than the current one are ignored.
    pub fn set(&self, label: impl Into<String>, current: u64) {
        let label = label.into();
        let mut state = self.state.lock().unwrap();
        state.current = current.clamp(state.current, state.max);
        state.label = label.clone();

        if let Some(bar) = self.phase_bar.lock().unwrap().as_ref() {
            bar.set_message(label);
            bar.set_position(state.current);
        }
    }

    pub fn finish(&self) {
        if let Some(bar) = self.phase_bar.lock().unwrap().take() {
            bar.finish_and_clear();
        }
    }

    pub fn abandon(&self) {
        if let Some(bar) = self.phase_bar.lock().unwrap().take() {
            bar.abandon();
        }
    }

    /// Byte progress bar for one stream. Hidden when the tracker is hidden.
    pub fn start_bytes(&self, name: String, bytes: Option<u64>) -> ProgressBar {
        let Some(multi_progress) = &self.multi_progress else {
            return ProgressBar::with_draw_target(bytes, ProgressDrawTarget::hidden());
        };

        let bar = match bytes {
            Some(bytes) => ProgressBar::new(bytes).with_style(custom_progress_style(
                ProgressStyle::with_template(
                    "[{elapsed_precise}] {wide_msg} {binary_bytes_per_sec:>14} {bytes:>10}{total_bytes:<11} [{bar}] {eta:>5} {percent:>3}%",
                )
                .unwrap(),
            )),
            None => ProgressBar::new(u64::MAX).with_style(custom_progress_style(
                ProgressStyle::with_template("[{elapsed_precise}] {wide_msg} {binary_bytes_per_sec:>14} {bytes:>10}")
                    .unwrap(),
            )),
        }
        .with_message(name);

        let phase_bar = self.phase_bar.lock().unwrap();

        match phase_bar.as_ref() {
            Some(phase_bar) => multi_progress.insert_after(phase_bar, bar),
            None => multi_progress.add(bar),
        }
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.abandon();
    }
}

fn custom_progress_style(progress_style: ProgressStyle) -> ProgressStyle {
    use indicatif::{HumanDuration, ProgressState};
    use number_prefix::NumberPrefix;

    progress_style
        .with_key("bytes", |state: &ProgressState, w: &mut dyn Write| {
            let _ = match NumberPrefix::binary(state.pos() as f64) {
                NumberPrefix::Standalone(number) => write!(w, "{number:.0} B"),
                NumberPrefix::Prefixed(prefix, number) => write!(w, "{number:.1} {prefix}B"),
            };
        })
        .with_key("total_bytes", |state: &ProgressState, w: &mut dyn Write| {
            // Only if total bytes are known
            if let Some(len) = state.len().filter(|len| *len != u64::MAX) {
                let _ = write!(w, "/");
                let _ = match NumberPrefix::binary(len as f64) {
                    NumberPrefix::Standalone(number) => write!(w, "{number:.0} B"),
                    NumberPrefix::Prefixed(prefix, number) => write!(w, "{number:.1} {prefix}B"),
                };
            }
        })
        .with_key("binary_bytes_per_sec", |state: &ProgressState, w: &mut dyn Write| {
            let _ = match NumberPrefix::binary(state.per_sec()) {
                NumberPrefix::Standalone(number) => write!(w, "{number:.0} B/s"),
                NumberPrefix::Prefixed(prefix, number) => write!(w, "{number:.1} {prefix}B/s"),
            };
        })
        .with_key("bar", |state: &ProgressState, w: &mut dyn Write| {
            const BAR_WIDTH: usize = 20;

            let filled = match state.len() {
                Some(len) if len != 0 && len != u64::MAX => {
                    ((state.pos() as f64 / len as f64) * BAR_WIDTH as f64).floor() as usize
                }
                _ => 0,
            }
            .min(BAR_WIDTH);

            let _ = write!(
                w,
                "{}{}",
                console::style("=".repeat(filled)).cyan(),
                console::style("-".repeat(BAR_WIDTH - filled)).blue(),
            );
        })
        .with_key("eta", |state: &ProgressState, w: &mut dyn Write| {
            // Only if total bytes are known
            if state.len() != Some(u64::MAX) {
                let _ = write!(w, "({:#})", HumanDuration(state.eta()));
            }
        })
}
