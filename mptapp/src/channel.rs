use crate::adapter::{CodewordAdapter, ErrorHandler};
use crate::error::ChannelError;
use crate::tones::{Tone, ToneCompletion, ToneQueue};
use crate::util::ring::SampleRing;
use log::{debug, warn};
use mptcore::framing::{tx_codeword, CodewordFramer};
use mptcore::modem::{Demodulator, Modulator, SoftDemodulator, SoftModulator};
use mptcore::morse;
use mptcore::protocol::MORSE_UNIT_SAMPLES;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::mpsc::{channel, sync_channel, Receiver, Sender, SyncSender, TryRecvError};
use std::sync::RwLock;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Synthesis quantum for the transmit path: 10 ms.
const BLOCK_SAMPLES: usize = 480;

/// Keep this many samples queued ahead of the output device: 30 ms.
const TARGET_LEAD_SAMPLES: usize = 1440;

/// Capacity and level knobs. The defaults match the original deployment;
/// the protocol constants themselves are not configurable.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Maximum queued tones, Morse elements included.
    pub tone_capacity: usize,
    /// Capacity in samples of the rx→tx bridge ring.
    pub bridge_capacity: usize,
    /// Tone level relative to full scale, before soft clipping.
    pub tone_amplitude: f32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            tone_capacity: 512,
            bridge_capacity: 10240,
            tone_amplitude: 0.6,
        }
    }
}

/// One MPT1327 signalling channel bound to a baseband input and output.
///
/// All processing happens on a worker thread owned by the channel: received
/// baseband is demodulated and valid codewords handed to the
/// `CodewordAdapter`; outgoing blocks are synthesised from the bridge, the
/// tone queue and the modulator, which polls the adapter for codewords.
pub struct Channel {
    event_tx: SyncSender<ChannelEvent>,
    tones: Arc<Mutex<ToneQueue>>,
}

impl Channel {
    pub fn new<I: InputSource, O: OutputSink, A: CodewordAdapter, E: ErrorHandler>(
        input: I,
        output: O,
        adapter: A,
        error_handler: E,
    ) -> Self {
        Self::with_config(input, output, adapter, error_handler, ChannelConfig::default())
    }

    pub fn with_config<I: InputSource, O: OutputSink, A: CodewordAdapter, E: ErrorHandler>(
        input: I,
        output: O,
        adapter: A,
        error_handler: E,
        config: ChannelConfig,
    ) -> Self {
        let (event_tx, event_rx) = sync_channel(128);
        let tones = Arc::new(Mutex::new(ToneQueue::new(
            config.tone_capacity,
            config.tone_amplitude,
        )));
        spawn_channel_worker(
            event_tx.clone(),
            event_rx,
            Box::new(input),
            Box::new(output),
            Box::new(adapter),
            Box::new(error_handler),
            tones.clone(),
            config,
        );
        Self { event_tx, tones }
    }

    /// Activate the baseband input and output.
    pub fn start(&self) {
        let _ = self.event_tx.send(ChannelEvent::Start);
    }

    /// Deactivate the audio path. Queued tones are not cancelled; they
    /// resume on the next `start`.
    pub fn stop(&self) {
        let _ = self.event_tx.send(ChannelEvent::Stop);
    }

    /// Shut the worker down. Also happens on drop.
    pub fn close(&self) {
        let _ = self.event_tx.send(ChannelEvent::Close);
    }

    /// Route received audio back out of the transmitter. Turning the bridge
    /// off lets buffered audio play out and then falls silent.
    pub fn set_bridge(&self, enabled: bool) {
        let _ = self.event_tx.send(ChannelEvent::SetBridge(enabled));
    }

    /// Queue a tone for the transmit path. `freq` 0 is a timed silence.
    pub fn queue_tone(
        &self,
        freq: u16,
        duration_samples: u32,
        completion: Option<ToneCompletion>,
    ) -> Result<(), ChannelError> {
        self.tones.lock().unwrap().push(Tone {
            freq,
            remaining: duration_samples,
            completion,
        })
    }

    /// Queue the Morse rendering of `text`. The completion fires after the
    /// trailing word gap. The whole message is reserved up front, so it is
    /// queued entirely or not at all.
    pub fn queue_morse(
        &self,
        text: &str,
        completion: Option<ToneCompletion>,
    ) -> Result<(), ChannelError> {
        let elements: Vec<morse::MorseElement> = morse::elements(text).collect();
        let mut tones = self.tones.lock().unwrap();
        if !tones.has_space(elements.len() + 1) {
            return Err(ChannelError::ToneQueueFull);
        }
        for element in elements {
            tones.push(Tone {
                freq: element.freq,
                remaining: element.duration,
                completion: None,
            })?;
        }
        tones.push(Tone {
            freq: 0,
            remaining: 4 * MORSE_UNIT_SAMPLES,
            completion,
        })
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        let _ = self.event_tx.send(ChannelEvent::Close);
    }
}

pub enum ChannelEvent {
    BasebandInput(Arc<[f32]>),
    Start,
    Stop,
    Close,
    SetBridge(bool),
    DidReadFromOutputBuffer { len: usize },
    OutputUnderrun,
    RuntimeError(ChannelError),
}

/// Handed to sources and sinks so failures after start-up reach the
/// channel's `ErrorHandler` without touching the audio path.
#[derive(Clone)]
pub struct ChannelErrorSender {
    event_tx: SyncSender<ChannelEvent>,
}

impl ChannelErrorSender {
    pub fn send_error(&self, error: impl Into<ChannelError>) {
        let _ = self
            .event_tx
            .try_send(ChannelEvent::RuntimeError(error.into()));
    }
}

/// Everything the worker runs on behalf of one channel: the modem pair, the
/// codeword framer and the two side channels feeding the transmit mix.
struct ChannelDsp {
    demodulator: SoftDemodulator,
    modulator: SoftModulator,
    framer: CodewordFramer,
    adapter: Box<dyn CodewordAdapter>,
    tones: Arc<Mutex<ToneQueue>>,
    bridge: SampleRing,
    bridge_enabled: bool,
}

impl ChannelDsp {
    fn handle_baseband(&mut self, samples: &[f32]) {
        if self.bridge_enabled {
            self.bridge.extend_from_slice(samples);
        }
        for &sample in samples {
            if let Some(bit) = self.demodulator.demod(sample) {
                let carrier = self.demodulator.data_carrier_detect();
                if let Some(payload) = self.framer.push_bit(bit, carrier) {
                    self.adapter.codeword_received(payload);
                }
            }
        }
    }

    /// Synthesise one outgoing block: bridge audio underneath, then the head
    /// tone, then the modulator overwriting everything while a codeword is
    /// on the air.
    fn fill_block(&mut self, buf: &mut [f32]) {
        buf.fill(0.0);
        self.bridge.drain(buf, !self.bridge_enabled);
        let completion = self.tones.lock().unwrap().mix_into(buf);
        if let Some(completion) = completion {
            completion();
        }
        let adapter = &mut self.adapter;
        self.modulator
            .modulate(buf, &mut || tx_codeword(adapter.next_codeword()));
    }
}

fn refill(dsp: &mut ChannelDsp, out_buffer: &RwLock<OutputBuffer>, block: &mut [f32]) {
    loop {
        if out_buffer.read().unwrap().samples.len() >= TARGET_LEAD_SAMPLES {
            return;
        }
        dsp.fill_block(block);
        let mut buffer = out_buffer.write().unwrap();
        buffer.samples.extend(block.iter().copied());
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_channel_worker(
    event_tx: SyncSender<ChannelEvent>,
    event_rx: Receiver<ChannelEvent>,
    input: Box<dyn InputSource>,
    output: Box<dyn OutputSink>,
    adapter: Box<dyn CodewordAdapter>,
    mut error_handler: Box<dyn ErrorHandler>,
    tones: Arc<Mutex<ToneQueue>>,
    config: ChannelConfig,
) {
    std::thread::spawn(move || {
        let mut dsp = ChannelDsp {
            demodulator: SoftDemodulator::new(),
            modulator: SoftModulator::new(),
            framer: CodewordFramer::new(),
            adapter,
            tones,
            bridge: SampleRing::new(config.bridge_capacity),
            bridge_enabled: false,
        };
        let out_buffer = Arc::new(RwLock::new(OutputBuffer::new()));
        let mut block = [0f32; BLOCK_SAMPLES];
        let errors = ChannelErrorSender {
            event_tx: event_tx.clone(),
        };
        let mut started = false;

        while let Ok(ev) = event_rx.recv() {
            match ev {
                ChannelEvent::BasebandInput(samples) => {
                    dsp.handle_baseband(&samples);
                }
                ChannelEvent::Start => {
                    if !started {
                        started = true;
                        debug!("channel starting");
                        out_buffer.write().unwrap().idling = false;
                        refill(&mut dsp, &out_buffer, &mut block);
                        input.start(event_tx.clone(), errors.clone());
                        output.start(event_tx.clone(), out_buffer.clone(), errors.clone());
                    }
                }
                ChannelEvent::Stop => {
                    if started {
                        started = false;
                        debug!("channel stopping");
                        input.close();
                        output.close();
                    }
                }
                ChannelEvent::Close => {
                    input.close();
                    output.close();
                    break;
                }
                ChannelEvent::SetBridge(enabled) => {
                    dsp.bridge_enabled = enabled;
                }
                ChannelEvent::DidReadFromOutputBuffer { len: _ } => {
                    refill(&mut dsp, &out_buffer, &mut block);
                }
                ChannelEvent::OutputUnderrun => {
                    debug!("output underrun");
                    error_handler.handle_error(ChannelError::OutputUnderrun);
                    refill(&mut dsp, &out_buffer, &mut block);
                }
                ChannelEvent::RuntimeError(e) => {
                    warn!("channel runtime error: {e}");
                    error_handler.handle_error(e);
                }
            }
        }
    });
}

pub trait InputSource: Send + Sync + 'static {
    fn start(&self, samples: SyncSender<ChannelEvent>, errors: ChannelErrorSender);
    fn close(&self);
}

pub trait OutputSink: Send + Sync + 'static {
    fn start(
        &self,
        event_tx: SyncSender<ChannelEvent>,
        buffer: Arc<RwLock<OutputBuffer>>,
        errors: ChannelErrorSender,
    );
    fn close(&self);
}

pub struct OutputBuffer {
    /// When set, an empty buffer means silence rather than an underrun.
    pub idling: bool,
    pub samples: VecDeque<f32>,
    /// Estimated delay between the buffer and the transducer.
    pub latency: Duration,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self {
            idling: true,
            samples: VecDeque::new(),
            latency: Duration::ZERO,
        }
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Feeds the channel from a raw baseband capture: f32le mono at 48 kHz,
/// replayed in real time.
pub struct InputRawFile {
    baseband: Arc<[f32]>,
    end_tx: Mutex<Option<Sender<()>>>,
}

impl InputRawFile {
    pub fn new(path: PathBuf) -> Result<Self, ChannelError> {
        let mut file = File::open(&path).map_err(|_| ChannelError::InvalidRawPath(path.clone()))?;
        let mut bytes = vec![];
        file.read_to_end(&mut bytes)
            .map_err(|_| ChannelError::RawReadFailed(path))?;
        let baseband: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Self {
            baseband: baseband.into(),
            end_tx: Mutex::new(None),
        })
    }
}

impl InputSource for InputRawFile {
    fn start(&self, samples: SyncSender<ChannelEvent>, _errors: ChannelErrorSender) {
        let (end_tx, end_rx) = channel();
        let baseband = self.baseband.clone();
        std::thread::spawn(move || {
            const TICK: Duration = Duration::from_millis(25);
            const SAMPLES_PER_TICK: usize = 1200;

            let mut next_tick = Instant::now() + TICK;

            for chunk in baseband.chunks(SAMPLES_PER_TICK) {
                if let Err(e) = samples.try_send(ChannelEvent::BasebandInput(chunk.into())) {
                    debug!("overflow feeding channel: {e:?}");
                }
                next_tick += TICK;
                std::thread::sleep(next_tick.saturating_duration_since(Instant::now()));
                if end_rx.try_recv() != Err(TryRecvError::Empty) {
                    break;
                }
            }
        });
        *self.end_tx.lock().unwrap() = Some(end_tx);
    }

    fn close(&self) {
        let _ = self.end_tx.lock().unwrap().take();
    }
}

pub struct NullInputSource {
    end_tx: Mutex<Option<Sender<()>>>,
}

impl NullInputSource {
    pub fn new() -> Self {
        Self {
            end_tx: Mutex::new(None),
        }
    }
}

impl InputSource for NullInputSource {
    fn start(&self, samples: SyncSender<ChannelEvent>, _errors: ChannelErrorSender) {
        let (end_tx, end_rx) = channel();
        std::thread::spawn(move || {
            const TICK: Duration = Duration::from_millis(25);
            const SAMPLES_PER_TICK: usize = 1200;
            let mut next_tick = Instant::now() + TICK;

            loop {
                std::thread::sleep(next_tick.saturating_duration_since(Instant::now()));
                next_tick += TICK;
                if end_rx.try_recv() != Err(TryRecvError::Empty) {
                    break;
                }
                if let Err(e) = samples.try_send(ChannelEvent::BasebandInput(
                    [0f32; SAMPLES_PER_TICK].into(),
                )) {
                    debug!("overflow feeding channel: {e:?}");
                }
            }
        });
        *self.end_tx.lock().unwrap() = Some(end_tx);
    }

    fn close(&self) {
        let _ = self.end_tx.lock().unwrap().take();
    }
}

impl Default for NullInputSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes the transmit path to a raw f32le file in real time.
pub struct OutputRawFile {
    path: PathBuf,
    end_tx: Mutex<Option<Sender<()>>>,
}

impl OutputRawFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            end_tx: Mutex::new(None),
        }
    }
}

impl OutputSink for OutputRawFile {
    fn start(
        &self,
        event_tx: SyncSender<ChannelEvent>,
        buffer: Arc<RwLock<OutputBuffer>>,
        errors: ChannelErrorSender,
    ) {
        let (end_tx, end_rx) = channel();
        let path = self.path.clone();
        std::thread::spawn(move || {
            let mut file = match File::create(&path) {
                Ok(f) => f,
                Err(_) => {
                    errors.send_error(ChannelError::InvalidRawPath(path));
                    return;
                }
            };

            const TICK: Duration = Duration::from_millis(25);
            const SAMPLES_PER_TICK: usize = 1200;

            let mut bytes = [0u8; SAMPLES_PER_TICK * 4];
            let mut next_tick = Instant::now() + TICK;

            loop {
                std::thread::sleep(next_tick.saturating_duration_since(Instant::now()));
                next_tick += TICK;
                if end_rx.try_recv() != Err(TryRecvError::Empty) {
                    break;
                }
                let mut used = 0;
                {
                    let mut buffer = buffer.write().unwrap();
                    for out in bytes.chunks_mut(4) {
                        let sample = match buffer.samples.pop_front() {
                            Some(s) => s,
                            None if buffer.idling => 0.0,
                            None => {
                                let _ = event_tx.send(ChannelEvent::OutputUnderrun);
                                break;
                            }
                        };
                        out.copy_from_slice(&sample.to_le_bytes());
                        used += 4;
                    }
                }
                if file.write_all(&bytes[0..used]).is_err() {
                    errors.send_error(ChannelError::RawWriteFailed(path.clone()));
                    break;
                }
                let _ = event_tx.send(ChannelEvent::DidReadFromOutputBuffer { len: used / 4 });
            }
        });
        *self.end_tx.lock().unwrap() = Some(end_tx);
    }

    fn close(&self) {
        let _ = self.end_tx.lock().unwrap().take();
    }
}

pub struct NullOutputSink {
    end_tx: Mutex<Option<Sender<()>>>,
}

impl NullOutputSink {
    pub fn new() -> Self {
        Self {
            end_tx: Mutex::new(None),
        }
    }
}

impl Default for NullOutputSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for NullOutputSink {
    fn start(
        &self,
        event_tx: SyncSender<ChannelEvent>,
        buffer: Arc<RwLock<OutputBuffer>>,
        _errors: ChannelErrorSender,
    ) {
        let (end_tx, end_rx) = channel();
        std::thread::spawn(move || {
            const TICK: Duration = Duration::from_millis(25);
            const SAMPLES_PER_TICK: usize = 1200;
            let mut next_tick = Instant::now() + TICK;

            loop {
                std::thread::sleep(next_tick.saturating_duration_since(Instant::now()));
                next_tick += TICK;
                if end_rx.try_recv() != Err(TryRecvError::Empty) {
                    break;
                }

                let mut taken = 0;
                {
                    let mut buffer = buffer.write().unwrap();
                    for _ in 0..SAMPLES_PER_TICK {
                        match buffer.samples.pop_front() {
                            Some(_) => taken += 1,
                            None if buffer.idling => {}
                            None => {
                                let _ = event_tx.send(ChannelEvent::OutputUnderrun);
                                break;
                            }
                        }
                    }
                }
                let _ = event_tx.send(ChannelEvent::DidReadFromOutputBuffer { len: taken });
            }
        });
        *self.end_tx.lock().unwrap() = Some(end_tx);
    }

    fn close(&self) {
        let _ = self.end_tx.lock().unwrap().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{IdleAdapter, NullErrorHandler};
    use mptcore::framing::TxWord;
    use std::f32::consts::TAU;

    struct FixedAdapter {
        word: TxWord,
        received: Arc<Mutex<Vec<u64>>>,
    }

    impl CodewordAdapter for FixedAdapter {
        fn codeword_received(&mut self, payload: u64) {
            self.received.lock().unwrap().push(payload);
        }

        fn next_codeword(&mut self) -> TxWord {
            self.word
        }
    }

    fn test_dsp(word: TxWord, received: Arc<Mutex<Vec<u64>>>) -> ChannelDsp {
        ChannelDsp {
            demodulator: SoftDemodulator::new(),
            modulator: SoftModulator::new(),
            framer: CodewordFramer::new(),
            adapter: Box::new(FixedAdapter { word, received }),
            tones: Arc::new(Mutex::new(ToneQueue::new(512, 0.6))),
            bridge: SampleRing::new(10240),
            bridge_enabled: false,
        }
    }

    #[test]
    fn codewords_cross_between_two_channels() {
        let payload = 0x123456789ABC;
        let mut tx = test_dsp(TxWord::Data(payload), Arc::new(Mutex::new(vec![])));
        let received = Arc::new(Mutex::new(vec![]));
        let mut rx = test_dsp(TxWord::Silence, received.clone());

        let mut block = [0f32; BLOCK_SAMPLES];
        for _ in 0..220 {
            tx.fill_block(&mut block);
            rx.handle_baseband(&block);
        }

        let received = received.lock().unwrap();
        assert!(received.len() >= 30, "{} codewords", received.len());
        assert!(received.iter().all(|p| *p == payload));
    }

    #[test]
    fn silence_produces_silence() {
        let mut dsp = test_dsp(TxWord::Silence, Arc::new(Mutex::new(vec![])));
        let mut block = [0f32; BLOCK_SAMPLES];
        let mut energy = 0.0f32;
        for _ in 0..20 {
            dsp.fill_block(&mut block);
            energy += block.iter().map(|s| s * s).sum::<f32>();
        }
        let rms = (energy / (20.0 * BLOCK_SAMPLES as f32)).sqrt();
        assert!(rms < 1e-4);
    }

    #[test]
    fn idle_sync_keeps_the_carrier_up() {
        let mut dsp = test_dsp(TxWord::IdleSync, Arc::new(Mutex::new(vec![])));
        let mut block = [0f32; BLOCK_SAMPLES];
        let mut energy = 0.0f32;
        for _ in 0..20 {
            dsp.fill_block(&mut block);
            energy += block.iter().map(|s| s * s).sum::<f32>();
            assert!(block.iter().all(|s| s.abs() <= 1.0));
        }
        let rms = (energy / (20.0 * BLOCK_SAMPLES as f32)).sqrt();
        assert!(rms >= 0.6, "rms {rms}");
    }

    #[test]
    fn bridge_replays_received_audio_then_goes_quiet() {
        let mut dsp = test_dsp(TxWord::Silence, Arc::new(Mutex::new(vec![])));
        dsp.bridge_enabled = true;

        let sine: Vec<f32> = (0..4800)
            .map(|n| (TAU * 1000.0 * n as f32 / 48000.0).sin())
            .collect();
        dsp.handle_baseband(&sine);

        let mut out = vec![];
        let mut block = [0f32; BLOCK_SAMPLES];
        for _ in 0..12 {
            dsp.fill_block(&mut block);
            out.extend_from_slice(&block);
        }
        assert_eq!(&out[..4800], &sine[..]);
        assert!(out[4800..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn bridge_waits_while_short_then_flushes_on_disable() {
        let mut dsp = test_dsp(TxWord::Silence, Arc::new(Mutex::new(vec![])));
        dsp.bridge_enabled = true;
        dsp.handle_baseband(&[0.5f32; 300]);

        // not enough for a block while enabled: silence out
        let mut block = [1.0f32; BLOCK_SAMPLES];
        dsp.fill_block(&mut block);
        assert!(block.iter().all(|s| *s == 0.0));
        assert_eq!(dsp.bridge.ready(), 300);

        // disabling drains what is left
        dsp.bridge_enabled = false;
        dsp.fill_block(&mut block);
        assert!(block[..300].iter().all(|s| *s == 0.5));
        assert!(block[300..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn modulator_overrides_tones_while_transmitting() {
        let mut dsp = test_dsp(TxWord::IdleSync, Arc::new(Mutex::new(vec![])));
        dsp.tones.lock().unwrap().push(Tone {
            freq: 800,
            remaining: 48000,
            completion: None,
        }).unwrap();

        let mut reference = test_dsp(TxWord::IdleSync, Arc::new(Mutex::new(vec![])));
        let mut block = [0f32; BLOCK_SAMPLES];
        let mut expected = [0f32; BLOCK_SAMPLES];
        // the first block still carries the tone while the modulator primes
        // its first bit; from then on a live codeword owns every sample
        dsp.fill_block(&mut block);
        reference.fill_block(&mut expected);
        assert_ne!(block, expected);
        for _ in 0..9 {
            dsp.fill_block(&mut block);
            reference.fill_block(&mut expected);
            assert_eq!(block, expected);
        }
    }

    #[test]
    fn morse_reservation_is_all_or_nothing() {
        let channel = Channel::with_config(
            NullInputSource::new(),
            NullOutputSink::new(),
            IdleAdapter,
            NullErrorHandler::new(),
            ChannelConfig {
                tone_capacity: 4,
                ..ChannelConfig::default()
            },
        );
        // "SOS" needs 21 elements plus the completion tone
        assert!(channel.queue_morse("SOS", None).is_err());
        // nothing was queued, so individual tones still fit
        for _ in 0..4 {
            channel.queue_tone(800, 100, None).unwrap();
        }
        assert!(channel.queue_tone(800, 100, None).is_err());
    }

    #[test]
    fn channel_starts_and_stops_cleanly() {
        let channel = Channel::new(
            NullInputSource::new(),
            NullOutputSink::new(),
            IdleAdapter,
            NullErrorHandler::new(),
        );
        channel.queue_morse("K", None).unwrap();
        channel.start();
        std::thread::sleep(Duration::from_millis(80));
        channel.stop();
        channel.close();
    }
}
