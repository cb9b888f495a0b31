/// Fixed-capacity circular buffer between a device callback and a reader.
///
/// Wrap in `Arc<parking_lot::Mutex<RingBuffer<T>>>` for cross-thread access.
///
/// Overflow behavior: drops the oldest samples so the producer never blocks.
#[derive(Debug)]
pub struct RingBuffer<T> {
    buffer: Vec<T>,
    write_index: usize,
    read_index: usize,
    available: usize,
    dropped: u64,
}

impl<T: Copy + Default> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![T::default(); capacity.max(1)],
            write_index: 0,
            read_index: 0,
            available: 0,
            dropped: 0,
        }
    }

    /// Write samples, dropping the oldest on overflow.
    ///
    /// If `samples` is larger than capacity, only the last `capacity` samples are kept.
    pub fn write(&mut self, samples: &[T]) {
        if samples.is_empty() {
            return;
        }
        let capacity = self.capacity();

        let samples = if samples.len() > capacity {
            self.dropped += (samples.len() - capacity) as u64;
            &samples[samples.len() - capacity..]
        } else {
            samples
        };

        let overflow = (self.available + samples.len()).saturating_sub(capacity);
        if overflow > 0 {
            self.read_index = (self.read_index + overflow) % capacity;
            self.available -= overflow;
            self.dropped += overflow as u64;
        }

        for &sample in samples {
            self.buffer[self.write_index] = sample;
            self.write_index = (self.write_index + 1) % capacity;
        }
        self.available += samples.len();
    }

    /// Move up to `out.len()` samples into `out`, returning how many were copied.
    pub fn read_into(&mut self, out: &mut [T]) -> usize {
        let to_read = out.len().min(self.available);
        let capacity = self.capacity();

        // At most two contiguous runs: up to the end of storage, then from the start.
        let first = to_read.min(capacity - self.read_index);
        out[..first].copy_from_slice(&self.buffer[self.read_index..self.read_index + first]);
        out[first..to_read].copy_from_slice(&self.buffer[..to_read - first]);

        self.read_index = (self.read_index + to_read) % capacity;
        self.available -= to_read;
        to_read
    }

    /// Read and remove up to `count` samples.
    pub fn read(&mut self, count: usize) -> Vec<T> {
        let mut out = vec![T::default(); count.min(self.available)];
        self.read_into(&mut out);
        out
    }

    pub fn count(&self) -> usize {
        self.available
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    /// Samples lost to overflow since creation or the last reset.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn reset(&mut self) {
        self.write_index = 0;
        self.read_index = 0;
        self.available = 0;
        self.dropped = 0;
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let mut buf = RingBuffer::<i16>::new(8);
        buf.write(&[1, 2, 3]);

        assert_eq!(buf.count(), 3);
        assert_eq!(buf.read(3), vec![1, 2, 3]);
        assert!(buf.is_empty());
    }

    #[test]
    fn read_into_short_buffer() {
        let mut buf = RingBuffer::<i16>::new(8);
        buf.write(&[10, 20, 30, 40, 50]);

        let mut out = [0i16; 2];
        assert_eq!(buf.read_into(&mut out), 2);
        assert_eq!(out, [10, 20]);

        let mut rest = [0i16; 8];
        assert_eq!(buf.read_into(&mut rest), 3);
        assert_eq!(&rest[..3], &[30, 40, 50]);
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let mut buf = RingBuffer::<i16>::new(4);
        buf.write(&[1, 2, 3, 4]);
        buf.write(&[5, 6]);

        assert_eq!(buf.dropped(), 2);
        assert_eq!(buf.read(4), vec![3, 4, 5, 6]);
    }

    #[test]
    fn oversized_write_keeps_tail() {
        let mut buf = RingBuffer::<i16>::new(3);
        buf.write(&[1, 2, 3, 4, 5]);

        assert_eq!(buf.count(), 3);
        assert_eq!(buf.dropped(), 2);
        assert_eq!(buf.read(3), vec![3, 4, 5]);
    }

    #[test]
    fn reads_across_wraparound() {
        let mut buf = RingBuffer::<i16>::new(4);
        buf.write(&[1, 2, 3]);
        buf.read(2);
        buf.write(&[4, 5, 6]);

        let mut out = [0i16; 4];
        assert_eq!(buf.read_into(&mut out), 4);
        assert_eq!(out, [3, 4, 5, 6]);
    }

    #[test]
    fn reset_clears_everything() {
        let mut buf = RingBuffer::<f32>::new(4);
        buf.write(&[0.5; 6]);
        buf.reset();

        assert!(buf.is_empty());
        assert_eq!(buf.dropped(), 0);
        assert!(buf.read(4).is_empty());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut buf = RingBuffer::<i16>::new(0);
        buf.write(&[7, 8]);
        assert_eq!(buf.capacity(), 1);
        assert_eq!(buf.read(1), vec![8]);
    }
}
