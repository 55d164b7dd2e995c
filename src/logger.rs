use chrono::Local;
use env_logger::fmt::{Color, Style, StyledValue};
use env_logger::{Builder, Logger};
use indicatif::MultiProgress;
use log::{Level, LevelFilter, Log, Metadata, Record};

pub(crate) fn default_logger(debug: bool) -> Logger {
    formatted_local_time_builder("%H:%M:%S.%3f")
        .filter_level(if debug { LevelFilter::Trace } else { LevelFilter::Info })
        .parse_default_env()
        .build()
}

fn formatted_local_time_builder(fmt: &'static str) -> Builder {
    let mut builder = Builder::new();

    builder.format(|f, record| {
        use std::io::Write;

        let target = record.target();
        let crate_target = clap::crate_name!().replace('-', "_");

        if !(target == crate_target || target.starts_with(&format!("{crate_target}::"))) {
            return Ok(());
        }

        let mut style = f.style();
        let level = colored_level(&mut style, record.level());

        let time = Local::now().format(fmt);

        writeln!(f, "{} {} > {}", time, level, record.args())
    });

    builder
}

fn colored_level(style: &'_ mut Style, level: Level) -> StyledValue<'_, &'static str> {
    match level {
        Level::Trace => style.set_color(Color::Magenta).value("TRACE"),
        Level::Debug => style.set_color(Color::Blue).value("DEBUG"),
        Level::Info => style.set_color(Color::Green).value("INFO "),
        Level::Warn => style.set_color(Color::Yellow).value("WARN "),
        Level::Error => style.set_color(Color::Red).value("ERROR"),
    }
}

/// Suspends the progress bars of a [MultiProgress] while a record is written,
/// so log lines never tear through a bar.
pub(crate) struct ProgressLogger<L> {
    multi: MultiProgress,
    log: L,
}

impl<L: Log + 'static> ProgressLogger<L> {
    pub(crate) fn new(multi: MultiProgress, log: L) -> Self {
        ProgressLogger { multi, log }
    }

    /// Installs the logger globally with the most verbose level the inner logger accepts.
    pub(crate) fn init(self) -> Result<(), log::SetLoggerError> {
        let max_level = [Level::Trace, Level::Debug, Level::Info, Level::Warn, Level::Error]
            .into_iter()
            .find(|level| self.log.enabled(&Metadata::builder().level(*level).build()))
            .map(|level| level.to_level_filter())
            .unwrap_or(LevelFilter::Off);

        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(max_level);

        Ok(())
    }
}

impl<L: Log> Log for ProgressLogger<L> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.log.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        // avoid suspending for records that would be dropped anyway
        if self.log.enabled(record.metadata()) {
            self.multi.suspend(|| self.log.log(record));
        }
    }

    fn flush(&self) {
        self.log.flush();
    }
}
