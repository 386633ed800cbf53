//! Encoded byte input.
//!
//! A [`ByteSource`] hands the streaming decoder raw container bytes on demand.
//! Sources only need to be restartable, not seekable: looping and rewinding
//! start again from byte 0 through [`ByteSource::reset`].

use crate::error::Result;

/// Restartable stream of encoded bytes.
///
/// # Lifecycle
///
/// - `read` fills the front of `buf` and returns the number of bytes written.
///   `Ok(0)` means the source is exhausted.
/// - `reset` rewinds to byte 0. It must also work after `close`, re-acquiring
///   whatever handle `close` gave up.
/// - `close` releases the underlying handle (file descriptor, socket). It is
///   idempotent; a closed source reads as exhausted until it is reset.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::source::ByteSource;
///
/// fn drain(source: &mut dyn ByteSource) -> bridge_traits::error::Result<usize> {
///     let mut total = 0;
///     let mut buf = [0u8; 4096];
///     loop {
///         let n = source.read(&mut buf)?;
///         if n == 0 {
///             return Ok(total);
///         }
///         total += n;
///     }
/// }
/// ```
pub trait ByteSource: Send {
    /// Read up to `buf.len()` bytes. Returns `Ok(0)` at end of source.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Restart the source from byte 0.
    fn reset(&mut self) -> Result<()>;

    /// Release the underlying handle.
    fn close(&mut self);

    /// Short human-readable description used in logs.
    fn describe(&self) -> String {
        "byte source".to_string()
    }
}
