//! Rendering of fatal heap faults.

use core::{error::Error, fmt};

/// Formats an error together with its chain of sources.
///
/// ```text
/// Error: heap integrity fault at offset 0x40 (detected at src/free_list.rs:120:9)
///
/// Caused by:
///    0: next block does not link back: next=0x80, next_prev=None
/// ```
pub struct Report<E> {
    error: E,
}

impl<E> Report<E> {
    pub const fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E> fmt::Debug for Report<E>
where
    E: Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<E> fmt::Display for Report<E>
where
    E: Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error: {}", self.error)?;
        let mut source = self.error.source();
        if source.is_some() {
            writeln!(f)?;
            writeln!(f, "Caused by:")?;
        }
        let mut index = 0;
        while let Some(s) = source {
            writeln!(f, "{index:4}: {s}")?;
            source = s.source();
            index += 1;
        }
        Ok(())
    }
}

/// Aborts the current operation on a broken heap invariant.
#[track_caller]
pub(crate) fn fatal<E>(err: E) -> !
where
    E: Error,
{
    log::error!("{}", Report::new(&err));
    panic!("heap corruption detected\n\n{}", Report::new(err));
}
