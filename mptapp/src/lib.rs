#![doc = include_str!("../README.md")]

pub mod adapter;
pub mod channel;
pub mod error;
pub mod soundcard;
pub mod tones;

mod util;

// Core items needed to implement adapters or check codewords by hand
pub use mptcore::fcs::{fcs, fcs_add};
pub use mptcore::framing::TxWord;
