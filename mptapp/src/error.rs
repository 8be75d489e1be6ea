use std::path::PathBuf;

use thiserror::Error;

use crate::soundcard::SoundcardError;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("tone queue is full")]
    ToneQueueFull,

    #[error("provided path to baseband file could not be opened: {0}")]
    InvalidRawPath(PathBuf),

    #[error("failed to read from baseband file: {0}")]
    RawReadFailed(PathBuf),

    #[error("failed to write to baseband file: {0}")]
    RawWriteFailed(PathBuf),

    #[error("audio output underrun")]
    OutputUnderrun,

    #[error("sound card error: {0}")]
    Soundcard(#[from] SoundcardError),
}
