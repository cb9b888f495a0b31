use crate::models::error::SourceError;

/// A pull-based supplier of interleaved 16-bit little-endian PCM.
///
/// Implemented by:
/// - `CpalSampleSource` (playback-capture-cpal)
/// - `ToneSource` (playback-capture-cpal)
/// - `SyntheticSource` (`testing` feature)
///
/// `read` may block until samples arrive, but implementations should bound
/// that wait so the capture loop can observe a stop request.
pub trait SampleSource: Send {
    /// Begin producing samples.
    fn start(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Copy up to `buf.len()` bytes into `buf`.
    ///
    /// Returns `Ok(n)` with `n > 0` for data, `Ok(0)` when nothing is ready
    /// yet, and `Err(SourceError::Closed)` once the source has ended.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SourceError>;

    /// Stop producing samples and release the device. Best-effort.
    fn stop(&mut self) {}
}
