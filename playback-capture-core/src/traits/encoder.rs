use crate::models::audio_models::{CompressedChunk, RawAudioChunk, TrackFormat};
use crate::models::config::EncoderSettings;
use crate::models::error::EncoderError;

/// One item of encoder output.
#[derive(Debug)]
pub enum EncoderEvent {
    /// A compressed unit. Must be handed back through `AudioEncoder::release`.
    Chunk(CompressedChunk),
    /// The output format is known. Emitted once per session.
    FormatReady(TrackFormat),
    /// Everything submitted before end-of-stream has been emitted.
    EndOfStream,
}

/// Stateful audio codec with asynchronous input and output queues.
pub trait AudioEncoder: Send {
    /// Allocate the codec. Fails if the profile is not available.
    fn configure(&mut self, settings: &EncoderSettings) -> Result<(), EncoderError>;

    /// Offer raw samples to the next free input slot.
    ///
    /// Waits at most the configured input wait and returns
    /// `EncoderError::WouldBlock` if no slot freed up.
    fn submit(&mut self, chunk: RawAudioChunk<'_>) -> Result<(), EncoderError>;

    /// Ask the codec to flush everything it holds and then report
    /// `EncoderEvent::EndOfStream`.
    fn submit_end_of_stream(&mut self) -> Result<(), EncoderError>;

    /// Non-blocking poll of the output queue. `Ok(None)` means nothing is
    /// ready right now.
    fn poll_output(&mut self) -> Result<Option<EncoderEvent>, EncoderError>;

    /// Return a consumed unit's buffer to the codec.
    fn release(&mut self, chunk: CompressedChunk);

    /// Stop the codec and free its resources. Idempotent, never fails.
    fn shutdown(&mut self);

    /// Lazily poll output until the codec reports nothing ready.
    fn drain(&mut self) -> Drain<'_, Self>
    where
        Self: Sized,
    {
        Drain {
            encoder: self,
            done: false,
        }
    }
}

/// Iterator returned by [`AudioEncoder::drain`].
///
/// Ends at the first empty poll or after yielding an error.
pub struct Drain<'a, E: AudioEncoder> {
    encoder: &'a mut E,
    done: bool,
}

impl<'a, E: AudioEncoder> Iterator for Drain<'a, E> {
    type Item = Result<EncoderEvent, EncoderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.encoder.poll_output() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::models::audio_models::ChunkInfo;

    struct Queued {
        pending: VecDeque<Result<Option<EncoderEvent>, EncoderError>>,
    }

    impl AudioEncoder for Queued {
        fn configure(&mut self, _settings: &EncoderSettings) -> Result<(), EncoderError> {
            Ok(())
        }

        fn submit(&mut self, _chunk: RawAudioChunk<'_>) -> Result<(), EncoderError> {
            Ok(())
        }

        fn submit_end_of_stream(&mut self) -> Result<(), EncoderError> {
            Ok(())
        }

        fn poll_output(&mut self) -> Result<Option<EncoderEvent>, EncoderError> {
            self.pending.pop_front().unwrap_or(Ok(None))
        }

        fn release(&mut self, _chunk: CompressedChunk) {}

        fn shutdown(&mut self) {}
    }

    fn chunk() -> Result<Option<EncoderEvent>, EncoderError> {
        Ok(Some(EncoderEvent::Chunk(CompressedChunk::detached(vec![1], ChunkInfo::default()))))
    }

    #[test]
    fn drain_stops_at_first_empty_poll() {
        let mut encoder = Queued {
            pending: VecDeque::from(vec![chunk(), chunk(), Ok(None), chunk()]),
        };
        assert_eq!(encoder.drain().count(), 2);
        // The unit queued after the empty poll belongs to the next drain.
        assert_eq!(encoder.drain().count(), 1);
    }

    #[test]
    fn drain_ends_after_error() {
        let mut encoder = Queued {
            pending: VecDeque::from(vec![Err(EncoderError::Codec("boom".into())), chunk()]),
        };
        let items: Vec<_> = encoder.drain().collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }
}
