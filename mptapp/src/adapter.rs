use crate::error::ChannelError;
use mptcore::framing::TxWord;

/// The seam between the channel and the signalling logic above it.
///
/// Both methods are invoked on the channel worker thread, in between audio
/// deadlines - implementations must not block.
pub trait CodewordAdapter: Send + 'static {
    /// A 48-bit payload arrived whose FCS checked out (the FCS is stripped).
    fn codeword_received(&mut self, payload: u64);

    /// Polled at every 64-bit boundary for the next codeword to transmit.
    fn next_codeword(&mut self) -> TxWord;
}

/// Receives errors that arise inside the channel worker or the audio
/// backend after start-up. The audio path itself never fails; it keeps
/// running whatever the handler does.
pub trait ErrorHandler: Send + 'static {
    fn handle_error(&mut self, error: ChannelError);
}

/// Ignore all runtime errors. They are still logged.
pub struct NullErrorHandler;

impl NullErrorHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorHandler for NullErrorHandler {
    fn handle_error(&mut self, _error: ChannelError) {}
}

/// An adapter that keeps the channel idling on SYNT and discards anything
/// received. Useful for tests and for tone/Morse-only transmissions.
pub struct IdleAdapter;

impl CodewordAdapter for IdleAdapter {
    fn codeword_received(&mut self, _payload: u64) {}

    fn next_codeword(&mut self) -> TxWord {
        TxWord::IdleSync
    }
}
