use crate::protocol::SAMPLES_PER_BIT;
use crate::shaping::{FILTER_LEN, FIR_BANDPASS_900_2100, FIR_LOWPASS_600};
use core::f32::consts::TAU;
use libm::{fabsf, floorf, sinf};

/// Frequency factors relative to the 1200 Hz bit clock: a mark bit rides at
/// 1200 Hz, a space bit at 1800 Hz.
const FREQ_FACTOR_MARK: f32 = 1.0;
const FREQ_FACTOR_SPACE: f32 = 1.5;

/// Length of the discriminator delay queue.
const DISC_LEN: usize = 15;

/// Zero crossings are stretched to a third of a bit period.
const MONOSTABLE_SAMPLES: u32 = SAMPLES_PER_BIT / 3;

/// Band-passed envelope level above which we consider a carrier present.
/// Full-scale MSK settles near 0.18 after the filter; a -10 dB signal near
/// 0.05.
const DCD_THRESHOLD: f32 = 0.02;

pub trait Modulator {
    /// Fill `buf` with continuous-phase FSK for the bit stream drawn from
    /// `next_codeword`, one codeword at a time, MSB first.
    ///
    /// `next_codeword` is polled once per 64-bit boundary. While it returns 0
    /// the modulator is silent and leaves `buf` untouched, so anything a
    /// mixer already wrote there survives.
    fn modulate(&mut self, buf: &mut [f32], next_codeword: &mut dyn FnMut() -> u64);
}

pub trait Demodulator {
    /// Process one baseband sample, returning a recovered bit when the bit
    /// synchroniser fires.
    fn demod(&mut self, sample: f32) -> Option<u8>;
    fn data_carrier_detect(&self) -> bool;
}

/// Converts a lazy sequence of 64-bit codewords into MSK baseband.
///
/// Phase is continuous across bit boundaries: `padj` accumulates the phase
/// each bit ends on so the next bit starts exactly there, whichever of the
/// two frequencies it uses.
pub struct SoftModulator {
    /// Codeword currently on the air; 0 means silence.
    current: u64,
    /// Selects the next bit of `current`, MSB first. 0 means a new codeword
    /// is due.
    bitmask: u64,
    /// Sample position within the current bit, 1..=40.
    phase: u32,
    /// Accumulated phase offset in cycles, wrapped to [0,1).
    padj: f32,
    /// Frequency factor of the current bit.
    fs: f32,
}

impl SoftModulator {
    pub fn new() -> Self {
        Self {
            current: 0,
            bitmask: 0,
            phase: 0,
            padj: 0.0,
            fs: 0.0,
        }
    }
}

impl Modulator for SoftModulator {
    fn modulate(&mut self, buf: &mut [f32], next_codeword: &mut dyn FnMut() -> u64) {
        for out in buf.iter_mut() {
            self.phase += 1;
            if self.phase > SAMPLES_PER_BIT {
                self.phase = 1;

                // On the first bit, fetch a new codeword
                if self.bitmask == 0 {
                    self.bitmask = 1u64 << 63;
                    self.current = next_codeword();
                }

                // Carry the phase the previous bit ended on
                self.padj += self.fs;
                self.padj -= floorf(self.padj);

                self.fs = if self.current & self.bitmask != 0 {
                    FREQ_FACTOR_MARK
                } else {
                    FREQ_FACTOR_SPACE
                };
                self.bitmask >>= 1;
            }

            if self.current != 0 {
                *out = sinf(
                    TAU * (self.fs * (self.phase as f32 / SAMPLES_PER_BIT as f32) + self.padj),
                );
            }
        }
    }
}

impl Default for SoftModulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Incoherent MSK demodulator: band-pass filter, zero-crossing discriminator
/// and an early/late-gate bit synchroniser.
pub struct SoftDemodulator {
    /// Circular buffer of incoming samples for the band-pass FIR.
    filter_win: [f32; FILTER_LEN],
    /// Circular buffer of discriminator output for the low-pass FIR.
    disc_win: [f32; FILTER_LEN],
    /// Current write position in both filter windows.
    filter_cursor: usize,
    /// Sign reference of the previous band-passed sample.
    last: f32,
    /// Monostable countdown stretching each zero crossing.
    mst: u32,
    /// Delay queue feeding the AND-of-three discriminator.
    disc_queue: [u8; DISC_LEN],
    disc_cursor: usize,
    /// Previous sliced bit, for transition detection.
    slast: u8,
    /// PLL phase counter over the nominal 40-sample bit period.
    pll_count: u32,
    /// One-shot gate; cleared in the late half-period, fires on re-entry.
    pll: bool,
    /// A transition was seen before the nominal mid-bit. Cleared on reset.
    pll_early: bool,
    /// A transition was seen after the nominal mid-bit. Cleared on reset.
    pll_late: bool,
    /// Leaky-integrator envelope of the band-passed signal.
    envelope: f32,
}

impl SoftDemodulator {
    pub fn new() -> Self {
        SoftDemodulator {
            filter_win: [0f32; FILTER_LEN],
            disc_win: [0f32; FILTER_LEN],
            filter_cursor: 0,
            last: 0.0,
            mst: 0,
            disc_queue: [0u8; DISC_LEN],
            disc_cursor: 0,
            slast: 0,
            pll_count: 0,
            pll: true,
            pll_early: false,
            pll_late: false,
            envelope: 0.0,
        }
    }
}

fn convolve(win: &[f32; FILTER_LEN], coeff: &[f32; 51], newest: usize) -> f32 {
    let mut sum = 0.0;
    let mut p = newest;
    for c in coeff.iter().take(FILTER_LEN) {
        sum += win[p] * c;
        p = if p == 0 { FILTER_LEN - 1 } else { p - 1 };
    }
    sum
}

impl Demodulator for SoftDemodulator {
    fn demod(&mut self, sample: f32) -> Option<u8> {
        let mut out = None;

        // Band-pass to isolate the 1200/1800 Hz tones
        self.filter_win[self.filter_cursor] = sample;
        let v = convolve(&self.filter_win, &FIR_BANDPASS_900_2100, self.filter_cursor);

        self.envelope += (fabsf(v) - self.envelope) / 64.0;

        // Zero crossing arms the monostable
        if (self.last < 0.0 && v >= 0.0) || (self.last >= 0.0 && v < 0.0) {
            self.mst = MONOSTABLE_SAMPLES;
        }
        self.last = v;

        let mut b: u8 = 0;
        if self.mst > 0 {
            self.mst -= 1;
            b = 1;
        }

        // Crossing-density discriminator: AND of the pulse train against
        // itself delayed by a third and a sixth of a bit period
        self.disc_queue[self.disc_cursor] = b;
        let third = (self.disc_cursor + DISC_LEN - (SAMPLES_PER_BIT / 3) as usize) % DISC_LEN;
        let sixth = (self.disc_cursor + DISC_LEN - (SAMPLES_PER_BIT / 6) as usize) % DISC_LEN;
        b &= self.disc_queue[third];
        b &= self.disc_queue[sixth];
        b = 1 - b;
        self.disc_cursor = (self.disc_cursor + 1) % DISC_LEN;

        // Low-pass the pulse density and slice
        self.disc_win[self.filter_cursor] = b as f32;
        let v = convolve(&self.disc_win, &FIR_LOWPASS_600, self.filter_cursor);
        b = if v > 0.5 { 1 } else { 0 };

        let snrz = b != self.slast;
        self.slast = b;

        // Early/late gate
        if self.pll_count < SAMPLES_PER_BIT / 2 - 1 && snrz {
            self.pll_early = true;
        } else if self.pll_count > SAMPLES_PER_BIT / 2 + 1 && snrz {
            self.pll_late = true;
        }

        let pll_reset = (self.pll_count == SAMPLES_PER_BIT - 1 - 2
            && self.pll_early
            && !self.pll_late)
            || (self.pll_count == SAMPLES_PER_BIT - 1 && !self.pll_early && !self.pll_late)
            || (self.pll_count == SAMPLES_PER_BIT - 1 && self.pll_early && self.pll_late)
            || (self.pll_count == SAMPLES_PER_BIT + 1 + 2);

        // Reference generator: fire once per period on entering the early
        // half
        if self.pll_count > SAMPLES_PER_BIT / 2 {
            self.pll = false;
        } else {
            if !self.pll {
                out = Some(b);
            }
            self.pll = true;
        }

        if pll_reset {
            self.pll_count = 0;
            self.pll_early = false;
            self.pll_late = false;
        } else {
            self.pll_count += 1;
        }

        self.filter_cursor = (self.filter_cursor + 1) % FILTER_LEN;

        out
    }

    fn data_carrier_detect(&self) -> bool {
        self.envelope > DCD_THRESHOLD
    }
}

impl Default for SoftDemodulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CODEWORD_SAMPLES, IDLE_CODEWORD};

    fn modulate_repeated(cw: u64, codewords: usize) -> Vec<f32> {
        let mut modulator = SoftModulator::new();
        let mut buf = vec![0f32; CODEWORD_SAMPLES as usize * codewords];
        modulator.modulate(&mut buf, &mut || cw);
        buf
    }

    #[test]
    fn output_is_bounded_and_continuous() {
        let buf = modulate_repeated(crate::fcs::fcs_add(0x123456789ABC), 4);
        let rms = (buf.iter().map(|s| s * s).sum::<f32>() / buf.len() as f32).sqrt();
        assert!(rms >= 0.6, "rms {rms}");
        assert!(buf.iter().all(|s| s.abs() <= 1.0));
        // instantaneous frequency never exceeds 1800 Hz
        let bound = TAU * 1800.0 / 48000.0 + 0.01;
        for w in buf.windows(2) {
            assert!((w[1] - w[0]).abs() <= bound);
        }
    }

    #[test]
    fn silent_when_no_codeword() {
        let mut modulator = SoftModulator::new();
        let mut buf = vec![0f32; 4800];
        modulator.modulate(&mut buf, &mut || 0);
        let rms = (buf.iter().map(|s| s * s).sum::<f32>() / buf.len() as f32).sqrt();
        assert!(rms < 1e-4);
    }

    #[test]
    fn modulator_leaves_mixer_samples_during_silence() {
        let mut modulator = SoftModulator::new();
        let mut buf = vec![0.25f32; 1600];
        modulator.modulate(&mut buf, &mut || 0);
        assert!(buf.iter().all(|s| *s == 0.25));
    }

    #[test]
    fn bit_clock_recovers_from_any_phase_offset() {
        // Alternating bits give the PLL a transition every bit period. The
        // only possible firing intervals are the three reset periods, and
        // the bit count must come out at the nominal rate wherever the
        // counter starts.
        for start in [0u32, 10, 21, 42] {
            let buf = modulate_repeated(0xAAAAAAAAAAAAAAAA, 4);
            let mut demodulator = SoftDemodulator::new();
            demodulator.pll_count = start;
            let mut positions = vec![];
            for (n, s) in buf.iter().enumerate() {
                if demodulator.demod(*s).is_some() {
                    positions.push(n);
                }
            }
            assert!(
                (250..=260).contains(&positions.len()),
                "{} bits from start {start}",
                positions.len()
            );
            for w in positions.windows(2) {
                let spacing = w[1] - w[0];
                assert!(
                    spacing == 38 || spacing == 40 || spacing == 44,
                    "spacing {spacing} from start {start}"
                );
            }
        }
    }

    #[test]
    fn idle_codeword_survives_the_air() {
        // The SYNT idle pattern must be recoverable from the raw bit stream.
        let buf = modulate_repeated(IDLE_CODEWORD, 12);
        let mut demodulator = SoftDemodulator::new();
        let mut window = 0u64;
        let mut sightings = 0;
        for s in &buf {
            if let Some(bit) = demodulator.demod(*s) {
                window = (window << 1) | bit as u64;
                if window == IDLE_CODEWORD {
                    sightings += 1;
                }
            }
        }
        assert!(sightings >= 8, "{sightings} sightings");
    }

    #[test]
    fn data_carrier_detect_follows_signal() {
        let buf = modulate_repeated(IDLE_CODEWORD, 2);
        let mut demodulator = SoftDemodulator::new();
        assert!(!demodulator.data_carrier_detect());
        for s in &buf {
            demodulator.demod(*s);
        }
        assert!(demodulator.data_carrier_detect());
        for _ in 0..2000 {
            demodulator.demod(0.0);
        }
        assert!(!demodulator.data_carrier_detect());
    }

    #[test]
    fn weak_signal_still_carries() {
        let buf = modulate_repeated(IDLE_CODEWORD, 2);
        let mut demodulator = SoftDemodulator::new();
        for s in &buf {
            demodulator.demod(s * 0.3);
        }
        assert!(demodulator.data_carrier_detect());
    }
}
