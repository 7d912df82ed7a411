//! A tracing subscriber tuned for simulation output.
//!
//! Log lines are stamped with the current *simulation* time instead of
//! wall-clock time, and with the path of the module whose event is
//! currently being processed. Filtering follows the standard `RUST_LOG`
//! environment variable.

use crate::net::try_current;
use crate::time::SimTime;
use nu_ansi_term::Color;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

///
/// The event formatter: `[ <sim-time> ] LEVEL <module-path> message`.
///
#[derive(Debug, Default)]
pub struct SimFormatter;

const fn level_color(level: Level) -> Color {
    match level {
        Level::TRACE => Color::Cyan,
        Level::DEBUG => Color::Magenta,
        Level::INFO => Color::Green,
        Level::WARN => Color::Yellow,
        Level::ERROR => Color::Red,
    }
}

impl<S, N> FormatEvent<S, N> for SimFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let time = format!("{}", SimTime::now());
        write!(writer, "{} ", Color::DarkGray.paint(format!("[ {time:^9} ]")))?;

        let level = *event.metadata().level();
        write!(
            writer,
            "{} ",
            level_color(level).paint(format!("{level:>5}"))
        )?;

        if let Some(module) = try_current() {
            write!(
                writer,
                "{} ",
                Color::Default.bold().paint(module.path().as_str().to_string())
            )?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

///
/// The simulation logger.
///
#[derive(Debug, Default)]
pub struct Logger;

impl Logger {
    ///
    /// Installs the simulation formatter as the global tracing
    /// subscriber. Repeated calls are no-ops, so tests can set up
    /// logging unconditionally.
    ///
    pub fn init() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .event_format(SimFormatter)
            .try_init();
    }
}
