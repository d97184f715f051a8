use ball_speed::pipeline::{Stage, StageObserver};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::cell::RefCell;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

/// Stage progress on stderr: spinners on a terminal, plain lines otherwise.
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
    current: RefCell<Option<StageGuard>>,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
            current: RefCell::new(None),
        }
    }

    /// Close a stage left open by a failed run.
    pub fn abandon_stage(&self) {
        if let Some(mut guard) = self.current.borrow_mut().take() {
            guard.failed = true;
        }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        let use_pretty = self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            };

        if use_pretty {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }
}

impl StageObserver for Ui {
    fn stage_started(&self, stage: Stage) {
        // finishing the previous stage first keeps spinners from overlapping
        self.current.borrow_mut().take();
        let guard = self.stage(stage.label());
        *self.current.borrow_mut() = Some(guard);
    }

    fn stage_finished(&self, _stage: Stage) {
        self.current.borrow_mut().take();
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    failed: bool,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
            failed: false,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let mark = if self.failed { "✘" } else { "✔" };
        let message = format!("{} {} ({})", mark, self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
