//! Fixed constants of the MPT1327 physical layer as implemented here.

/// Baseband sample rate. No other rate is supported.
pub const SAMPLE_RATE: u32 = 48_000;

/// Samples per signalling bit at 1200 bit/s.
pub const SAMPLES_PER_BIT: u32 = 40;

/// Signalling rate in bit/s.
pub const BIT_RATE: u32 = SAMPLE_RATE / SAMPLES_PER_BIT;

/// Bits in one codeword including the FCS.
pub const CODEWORD_BITS: u32 = 64;

/// Samples spanned by one full codeword.
pub const CODEWORD_SAMPLES: u32 = CODEWORD_BITS * SAMPLES_PER_BIT;

/// Control channel sync word (SYNC).
pub const SYNC: u16 = 0xC4D7;

/// Traffic channel sync word (SYNT).
pub const SYNT: u16 = 0x3B28;

/// Codeword transmitted between messages on a traffic channel: 48 bits of
/// 10101010... preamble followed by SYNT. Gives distant receivers a
/// recoverable bit stream while no data is pending.
pub const IDLE_CODEWORD: u64 = 0xAAAA_AAAA_AAAA_0000 | SYNT as u64;

/// Duration of one Morse dot at the ident keying speed, in samples.
pub const MORSE_UNIT_SAMPLES: u32 = 3200;

/// Audio frequency of Morse ident tones in Hz.
pub const MORSE_FREQ: u16 = 800;
