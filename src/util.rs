use std::{fmt, time::Duration};

use lazy_static::lazy_static;
use rusty_pool::ThreadPool;
use url::Url;

use crate::error::Error;

lazy_static! {
    /// Pool for blocking file work (spooled part copies, asset writes, box scans) so it does not
    /// stall the tokio workers.
    pub static ref BLOCKING_POOL: ThreadPool = rusty_pool::Builder::new()
        .name(String::from("blocking_io_pool"))
        .build();
}

/// Runs the task on the [`BLOCKING_POOL`] and awaits its result.
pub async fn spawn_blocking<R: Send + 'static>(
    task: impl FnOnce() -> Result<R, Error> + Send + 'static,
) -> Result<R, Error> {
    let join_handle = BLOCKING_POOL.evaluate(task);

    match join_handle.receiver.await {
        Ok(t) => t,
        Err(_) => Err(Error::CancellationError),
    }
}

#[derive(Debug, Clone)]
pub struct FormattedDuration(Duration);

pub fn format_duration(val: Duration) -> FormattedDuration {
    FormattedDuration(val)
}

fn item(f: &mut fmt::Formatter, started: &mut bool, name: &str, value: u64) -> fmt::Result {
    if value > 0 {
        if *started {
            f.write_str(" ")?;
        }
        write!(f, "{value}{name}")?;
        *started = true;
    }
    Ok(())
}

// based on https://docs.rs/humantime/latest/src/humantime/duration.rs.html#295-331
impl fmt::Display for FormattedDuration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let secs = self.0.as_secs();
        let nanos = self.0.subsec_nanos();

        if secs == 0 && nanos == 0 {
            f.write_str("0s")?;
            return Ok(());
        }

        let hours = secs / 3600;
        let minutes = secs % 3600 / 60;
        let seconds = secs % 60;
        let millis = (nanos / 1_000_000) as u64;

        let started = &mut false;
        item(f, started, "h", hours)?;
        item(f, started, "m", minutes)?;
        item(f, started, "s", seconds)?;
        if !*started || millis > 0 {
            if *started {
                f.write_str(" ")?;
            }
            write!(f, "{millis}ms")?;
        }
        Ok(())
    }
}

pub struct OptFmt<T>(pub Option<T>);

impl<T: fmt::Display> fmt::Display for OptFmt<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref t) = self.0 {
            fmt::Display::fmt(t, f)
        } else {
            f.write_str("-")
        }
    }
}

pub fn join_url<'a>(
    url: &mut Url,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<(), Error> {
    let mut path_segments = url
        .path_segments_mut()
        .map_err(|_| Error::IoError(String::from("URL cannot be a base")))?;
    path_segments.pop_if_empty();
    for segment in segments {
        path_segments.push(segment);
    }
    Ok(())
}
