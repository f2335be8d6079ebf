//! Single line log format: `[LEVEL] [MM-DD|hh:mm:ss.mmm] message key=value ...`.
use std::{fmt, io};

use nu_ansi_term::Color;
use time::format_description::OwnedFormatItem;
use tracing::{Event, Level, Subscriber, field};
use tracing_subscriber::{
    field::{RecordFields, VisitFmt, VisitOutput},
    fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields, format::Writer},
    registry::LookupSpan,
};

const MESSAGE_WIDTH: usize = 48;

pub struct CompactFormat {
    timestamp: Option<OwnedFormatItem>,
}

impl Default for CompactFormat {
    fn default() -> Self {
        let timestamp = time::format_description::parse_owned::<2>(
            r#"\[[month]-[day]|[hour]:[minute]:[second].[subsecond digits:3]\]"#,
        )
        .ok();

        Self { timestamp }
    }
}

impl CompactFormat {
    fn write_timestamp(&self, writer: &mut Writer<'_>) -> fmt::Result {
        let Some(format) = &self.timestamp else {
            return Err(fmt::Error);
        };

        let now = time::OffsetDateTime::now_utc();
        let mut adaptor = IoAdaptor { inner: writer };
        now.format_into(&mut adaptor, format)
            .map(|_| ())
            .map_err(|_| fmt::Error)
    }
}

impl<S, N> FormatEvent<S, N> for CompactFormat
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
        let ansi = writer.has_ansi_escapes();
        write!(writer, "{} ", LevelLabel::new(event.metadata().level(), ansi))?;

        if self.write_timestamp(&mut writer).is_err() {
            writer.write_str("[-]")?;
        }
        writer.write_char(' ')?;

        ctx.format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

impl<'w> FormatFields<'w> for CompactFormat {
    fn format_fields<R: RecordFields>(&self, writer: Writer<'w>, fields: R) -> fmt::Result {
        let mut visitor = FieldVisitor::new(writer, true);
        fields.record(&mut visitor);
        visitor.finish()
    }

    fn add_fields(
        &self,
        current: &'w mut FormattedFields<Self>,
        fields: &tracing::span::Record<'_>,
    ) -> fmt::Result {
        let first = current.is_empty();
        let mut visitor = FieldVisitor::new(current.as_writer(), first);
        fields.record(&mut visitor);
        visitor.finish()
    }
}

struct FieldVisitor<'a> {
    writer: Writer<'a>,
    first: bool,
    result: fmt::Result,
}

impl<'a> FieldVisitor<'a> {
    fn new(writer: Writer<'a>, first: bool) -> Self {
        Self {
            writer,
            first,
            result: Ok(()),
        }
    }

    fn separator(&mut self) -> &'static str {
        if std::mem::replace(&mut self.first, false) {
            ""
        } else {
            " "
        }
    }
}

impl field::Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &field::Field, value: &str) {
        if field.name() == "message" {
            self.record_debug(field, &format_args!("{value}"));
        } else {
            self.record_debug(field, &value);
        }
    }

    fn record_debug(&mut self, field: &field::Field, value: &dyn fmt::Debug) {
        if self.result.is_err() {
            return;
        }

        let separator = self.separator();
        let ansi = self.writer.has_ansi_escapes();

        self.result = match field.name() {
            "message" => write!(
                self.writer,
                "{separator}{:<width$}",
                format!("{value:?}"),
                width = MESSAGE_WIDTH
            ),
            name if ansi => {
                let color = if name == "err" || name == "error" {
                    Color::Red
                } else {
                    Color::Cyan
                };
                write!(
                    self.writer,
                    "{separator}{}={}",
                    Color::DarkGray.paint(name),
                    color.paint(format!("{value:?}"))
                )
            }
            name => write!(self.writer, "{separator}{name}={value:?}"),
        };
    }
}

impl VisitOutput<fmt::Result> for FieldVisitor<'_> {
    fn finish(self) -> fmt::Result {
        self.result
    }
}

impl VisitFmt for FieldVisitor<'_> {
    fn writer(&mut self) -> &mut dyn fmt::Write {
        &mut self.writer
    }
}

struct LevelLabel<'a> {
    level: &'a Level,
    ansi: bool,
}

impl<'a> LevelLabel<'a> {
    fn new(level: &'a Level, ansi: bool) -> Self {
        Self { level, ansi }
    }
}

impl fmt::Display for LevelLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (label, color) = match *self.level {
            Level::TRACE => ("TRACE", Color::Purple),
            Level::DEBUG => ("DEBUG", Color::Blue),
            Level::INFO => ("INFO", Color::Green),
            Level::WARN => ("WARN", Color::Yellow),
            Level::ERROR => ("ERROR", Color::Red),
        };

        if self.ansi {
            write!(f, "[{}]", color.paint(label))
        } else {
            write!(f, "[{label}]")
        }
    }
}

/// Lets `time` write into a `fmt::Write`.
struct IoAdaptor<'a, 'w> {
    inner: &'a mut Writer<'w>,
}

impl io::Write for IoAdaptor<'_, '_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = std::str::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.inner.write_str(s).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
