pub mod clock;
pub mod pcm;
pub mod resample;
pub mod ring_buffer;
