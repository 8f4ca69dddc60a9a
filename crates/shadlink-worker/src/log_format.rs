use std::fmt;

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    fmt::{FmtContext, FormatEvent, FormatFields, format::Writer},
    registry::LookupSpan,
};

const RESET: &str = "\x1b[0m";

/// Formats events the way a worker prints its log:
/// `[<target>] <Level> <message>`, coloured by level.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerLogFormat {
    pub ansi: bool,
}

fn level_style(level: Level) -> (&'static str, &'static str) {
    match level {
        Level::ERROR => ("Error", "\x1b[31m"),
        Level::WARN => ("Warning", "\x1b[33m"),
        Level::INFO => ("Info", ""),
        Level::DEBUG => ("Debug", "\x1b[36m"),
        Level::TRACE => ("Trace", "\x1b[90m"),
    }
}

impl<S, N> FormatEvent<S, N> for WorkerLogFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let (tag, color) = level_style(*meta.level());
        let color = if self.ansi { color } else { "" };

        write!(writer, "{color}[{}] <{tag}> ", meta.target())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        if !color.is_empty() {
            writer.write_str(RESET)?;
        }
        writeln!(writer)
    }
}
