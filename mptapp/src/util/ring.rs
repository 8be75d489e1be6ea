//! Fixed-capacity sample ring for the rx→tx audio bridge.

pub(crate) struct SampleRing {
    buf: Vec<f32>,
    rd: usize,
    wr: usize,
    ready: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0.0; capacity],
            rd: 0,
            wr: 0,
            ready: 0,
        }
    }

    pub fn ready(&self) -> usize {
        self.ready
    }

    /// Append samples, overwriting the oldest when the ring is full.
    pub fn extend_from_slice(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.buf[self.wr] = sample;
            self.wr = (self.wr + 1) % self.buf.len();
            if self.ready == self.buf.len() {
                self.rd = (self.rd + 1) % self.buf.len();
            } else {
                self.ready += 1;
            }
        }
    }

    /// Take samples for one outgoing block: a full block when enough are
    /// buffered, the remainder when `flush` is set, otherwise nothing (the
    /// producer is still filling).
    pub fn drain(&mut self, out: &mut [f32], flush: bool) -> usize {
        let take = if self.ready >= out.len() {
            out.len()
        } else if flush {
            self.ready
        } else {
            return 0;
        };
        for slot in &mut out[..take] {
            *slot = self.buf[self.rd];
            self.rd = (self.rd + 1) % self.buf.len();
        }
        self.ready -= take;
        take
    }
}
