use std::collections::VecDeque;
use std::f32::consts::TAU;

use crate::error::ChannelError;
use mptcore::protocol::SAMPLE_RATE;

/// Invoked once, after the last sample of the carrying tone has been mixed
/// and before any sample of the following tone.
pub type ToneCompletion = Box<dyn FnOnce() + Send>;

pub struct Tone {
    /// Audio frequency in Hz; 0 is a timed silence.
    pub freq: u16,
    /// Samples left to play.
    pub remaining: u32,
    pub completion: Option<ToneCompletion>,
}

/// Bounded FIFO of tones awaiting playout on the transmit path.
///
/// Writers queue under the channel mutex; the worker mixes the head tone
/// into each outgoing block. A full queue rejects the new tone - the caller
/// finds out, and a rejected completion is simply dropped along with
/// whatever it captured.
pub struct ToneQueue {
    queue: VecDeque<Tone>,
    capacity: usize,
    amplitude: f32,
}

impl ToneQueue {
    pub fn new(capacity: usize, amplitude: f32) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            amplitude,
        }
    }

    pub fn has_space(&self, tones: usize) -> bool {
        self.queue.len() + tones <= self.capacity
    }

    pub fn push(&mut self, tone: Tone) -> Result<(), ChannelError> {
        if self.queue.len() >= self.capacity {
            return Err(ChannelError::ToneQueueFull);
        }
        self.queue.push_back(tone);
        Ok(())
    }

    /// Mix queued tones additively into `buf` with soft clipping.
    ///
    /// When a finished tone carries a completion, mixing stops for the rest
    /// of the block and the completion is handed back so the worker can run
    /// it with the queue lock released; the next tone starts on the next
    /// block.
    pub fn mix_into(&mut self, buf: &mut [f32]) -> Option<ToneCompletion> {
        let mut i = 0;
        while i < buf.len() {
            let head = self.queue.front_mut()?;
            while i < buf.len() && head.remaining > 0 {
                let t = head.remaining as f32;
                let v = buf[i]
                    + self.amplitude * (TAU * t * head.freq as f32 / SAMPLE_RATE as f32).sin();
                buf[i] = v.tanh();
                head.remaining -= 1;
                i += 1;
            }
            if head.remaining == 0 {
                let mut finished = self.queue.pop_front().expect("head exists");
                if let Some(completion) = finished.completion.take() {
                    return Some(completion);
                }
            }
        }
        None
    }
}
