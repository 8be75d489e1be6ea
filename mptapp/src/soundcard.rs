use std::{
    sync::{
        mpsc::{sync_channel, Receiver, SyncSender},
        Arc, RwLock,
    },
    time::Duration,
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BuildStreamError, Device, DevicesError, PlayStreamError, SampleFormat, SampleRate, Stream,
    StreamError, SupportedStreamConfig, SupportedStreamConfigRange, SupportedStreamConfigsError,
};
use thiserror::Error;

use crate::channel::{ChannelErrorSender, ChannelEvent, InputSource, OutputBuffer, OutputSink};
use mptcore::protocol::SAMPLE_RATE;

/// A sound card carrying one channel's baseband: a discriminator tap or
/// line-in on the receive side, a mic or line-out feeding the transmitter on
/// the other.
///
/// Use `input()` and `output()` to retrieve source/sink handles for the
/// channel; the two halves may come from different cards. MSK recovery keys
/// off zero-crossing timing, so there are no polarity controls - what does
/// matter against real radios is level, which the gain trims adjust.
///
/// The card must do f32 at 48 kHz. Opening the same card through two
/// `Soundcard` instances at once may not work.
pub struct Soundcard {
    event_tx: SyncSender<SoundcardEvent>,
}

impl Soundcard {
    pub fn new<S: Into<String>>(card_name: S) -> Result<Self, SoundcardError> {
        let (event_tx, event_rx) = sync_channel(128);
        let (setup_tx, setup_rx) = sync_channel(1);
        let card_name = card_name.into();
        std::thread::spawn(move || {
            // cpal streams are not Send, so the device and everything built
            // on it stay on this thread
            match find_device(&card_name) {
                Ok(device) => {
                    let _ = setup_tx.send(Ok(()));
                    run_worker(device, event_rx);
                }
                Err(e) => {
                    let _ = setup_tx.send(Err(e));
                }
            }
        });
        match setup_rx.recv() {
            Ok(Ok(())) => Ok(Self { event_tx }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SoundcardError::SoundcardInit),
        }
    }

    pub fn input(&self) -> SoundcardInputSource {
        SoundcardInputSource {
            event_tx: self.event_tx.clone(),
        }
    }

    pub fn output(&self) -> SoundcardOutputSink {
        SoundcardOutputSink {
            event_tx: self.event_tx.clone(),
        }
    }

    /// Scale received samples before the demodulator sees them. Takes
    /// effect when the input is next started.
    pub fn set_input_gain(&self, gain: f32) {
        let _ = self.event_tx.send(SoundcardEvent::SetInputGain(gain));
    }

    /// Scale the transmit path into the card. Takes effect when the output
    /// is next started.
    pub fn set_output_gain(&self, gain: f32) {
        let _ = self.event_tx.send(SoundcardEvent::SetOutputGain(gain));
    }

    /// List sound cards usable as a channel input (f32 at 48 kHz).
    pub fn supported_input_cards() -> Vec<String> {
        compatible_cards(Direction::Input)
    }

    /// List sound cards usable as a channel output (f32 at 48 kHz).
    pub fn supported_output_cards() -> Vec<String> {
        compatible_cards(Direction::Output)
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Input,
    Output,
}

fn compatible_cards(direction: Direction) -> Vec<String> {
    let host = cpal::default_host();
    let devices = match direction {
        Direction::Input => host.input_devices(),
        Direction::Output => host.output_devices(),
    };
    let Ok(devices) = devices else {
        return vec![];
    };
    let mut cards: Vec<String> = devices
        .filter(|d| device_is_usable(d, direction))
        .filter_map(|d| d.name().ok())
        .collect();
    cards.sort();
    cards
}

fn device_is_usable(device: &Device, direction: Direction) -> bool {
    match direction {
        Direction::Input => device
            .supported_input_configs()
            .map(|mut c| c.any(|r| range_is_usable(&r)))
            .unwrap_or(false),
        Direction::Output => device
            .supported_output_configs()
            .map(|mut c| c.any(|r| range_is_usable(&r)))
            .unwrap_or(false),
    }
}

fn range_is_usable(range: &SupportedStreamConfigRange) -> bool {
    (range.channels() == 1 || range.channels() == 2)
        && range.sample_format() == SampleFormat::F32
        && range.min_sample_rate().0 <= SAMPLE_RATE
        && range.max_sample_rate().0 >= SAMPLE_RATE
}

fn find_device(card_name: &str) -> Result<Device, SoundcardError> {
    let host = cpal::default_host();
    let mut devices = host.devices().map_err(SoundcardError::Host)?;
    devices
        .find(|d| d.name().map(|n| n == card_name).unwrap_or(false))
        .ok_or_else(|| SoundcardError::CardNotFound(card_name.to_owned()))
}

fn negotiate<I>(
    ranges: Result<I, SupportedStreamConfigsError>,
) -> Result<SupportedStreamConfig, SoundcardError>
where
    I: Iterator<Item = SupportedStreamConfigRange>,
{
    ranges
        .map_err(SoundcardError::SupportedConfigs)?
        .find(range_is_usable)
        .map(|range| range.with_sample_rate(SampleRate(SAMPLE_RATE)))
        .ok_or(SoundcardError::NoValidConfigAvailable)
}

fn open_input(
    device: &Device,
    gain: f32,
    samples: SyncSender<ChannelEvent>,
    errors: ChannelErrorSender,
) -> Result<Stream, SoundcardError> {
    let config = negotiate(device.supported_input_configs())?;
    let channels = config.channels() as usize;
    let stream = device
        .build_input_stream(
            &config.into(),
            move |frames: &[f32], _info: &cpal::InputCallbackInfo| {
                // the demodulator wants mono: first sample of each frame
                let baseband: Arc<[f32]> =
                    frames.iter().step_by(channels).map(|s| s * gain).collect();
                let _ = samples.try_send(ChannelEvent::BasebandInput(baseband));
            },
            move |e| errors.send_error(SoundcardError::Stream(e)),
            None,
        )
        .map_err(SoundcardError::StreamBuild)?;
    stream.play().map_err(SoundcardError::StreamPlay)?;
    Ok(stream)
}

fn open_output(
    device: &Device,
    gain: f32,
    event_tx: SyncSender<ChannelEvent>,
    buffer: Arc<RwLock<OutputBuffer>>,
    errors: ChannelErrorSender,
) -> Result<Stream, SoundcardError> {
    let config = negotiate(device.supported_output_configs())?;
    let channels = config.channels() as usize;
    let stream = device
        .build_output_stream(
            &config.into(),
            move |frames: &mut [f32], info: &cpal::OutputCallbackInfo| {
                let ts = info.timestamp();
                let latency = ts
                    .playback
                    .duration_since(&ts.callback)
                    .unwrap_or(Duration::ZERO);
                let wanted = frames.len() / channels;
                let mut taken = 0;
                let starved = {
                    let mut buffer = buffer.write().unwrap();
                    buffer.latency = latency;
                    // a short buffer gets zero-filled rather than left with
                    // stale card memory; one underrun report covers the lot
                    for frame in frames.chunks_mut(channels) {
                        match buffer.samples.pop_front() {
                            Some(sample) => {
                                frame.fill(sample * gain);
                                taken += 1;
                            }
                            None => frame.fill(0.0),
                        }
                    }
                    taken < wanted && !buffer.idling
                };
                if starved {
                    let _ = event_tx.send(ChannelEvent::OutputUnderrun);
                }
                let _ = event_tx.send(ChannelEvent::DidReadFromOutputBuffer { len: taken });
            },
            move |e| errors.send_error(SoundcardError::Stream(e)),
            None,
        )
        .map_err(SoundcardError::StreamBuild)?;
    stream.play().map_err(SoundcardError::StreamPlay)?;
    Ok(stream)
}

enum SoundcardEvent {
    SetInputGain(f32),
    SetOutputGain(f32),
    StartInput {
        samples: SyncSender<ChannelEvent>,
        errors: ChannelErrorSender,
    },
    CloseInput,
    StartOutput {
        event_tx: SyncSender<ChannelEvent>,
        buffer: Arc<RwLock<OutputBuffer>>,
        errors: ChannelErrorSender,
    },
    CloseOutput,
}

fn run_worker(device: Device, event_rx: Receiver<SoundcardEvent>) {
    let mut input_gain = 1.0f32;
    let mut output_gain = 1.0f32;
    let mut input_stream: Option<Stream> = None;
    let mut output_stream: Option<Stream> = None;

    while let Ok(ev) = event_rx.recv() {
        match ev {
            SoundcardEvent::SetInputGain(gain) => input_gain = gain,
            SoundcardEvent::SetOutputGain(gain) => output_gain = gain,
            SoundcardEvent::StartInput { samples, errors } => {
                match open_input(&device, input_gain, samples, errors.clone()) {
                    Ok(stream) => input_stream = Some(stream),
                    Err(e) => errors.send_error(e),
                }
            }
            SoundcardEvent::CloseInput => input_stream = None,
            SoundcardEvent::StartOutput {
                event_tx,
                buffer,
                errors,
            } => match open_output(&device, output_gain, event_tx, buffer, errors.clone()) {
                Ok(stream) => output_stream = Some(stream),
                Err(e) => errors.send_error(e),
            },
            SoundcardEvent::CloseOutput => output_stream = None,
        }
    }
}

pub struct SoundcardInputSource {
    event_tx: SyncSender<SoundcardEvent>,
}

impl InputSource for SoundcardInputSource {
    fn start(&self, samples: SyncSender<ChannelEvent>, errors: ChannelErrorSender) {
        let _ = self
            .event_tx
            .send(SoundcardEvent::StartInput { samples, errors });
    }

    fn close(&self) {
        let _ = self.event_tx.send(SoundcardEvent::CloseInput);
    }
}

pub struct SoundcardOutputSink {
    event_tx: SyncSender<SoundcardEvent>,
}

impl OutputSink for SoundcardOutputSink {
    fn start(
        &self,
        event_tx: SyncSender<ChannelEvent>,
        buffer: Arc<RwLock<OutputBuffer>>,
        errors: ChannelErrorSender,
    ) {
        let _ = self.event_tx.send(SoundcardEvent::StartOutput {
            event_tx,
            buffer,
            errors,
        });
    }

    fn close(&self) {
        let _ = self.event_tx.send(SoundcardEvent::CloseOutput);
    }
}

#[derive(Debug, Error)]
pub enum SoundcardError {
    #[error("sound card worker exited during setup")]
    SoundcardInit,

    #[error("unable to enumerate devices: {0}")]
    Host(DevicesError),

    #[error("no sound card named '{0}' is available - is it in use?")]
    CardNotFound(String),

    #[error("error occurred in sound card i/o: {0}")]
    Stream(#[source] StreamError),

    #[error("unable to retrieve supported configs for sound card: {0}")]
    SupportedConfigs(#[source] SupportedStreamConfigsError),

    #[error("sound card offers no f32 48 kHz mono or stereo config")]
    NoValidConfigAvailable,

    #[error("unable to build sound card stream: {0}")]
    StreamBuild(#[source] BuildStreamError),

    #[error("unable to play sound card stream: {0}")]
    StreamPlay(#[source] PlayStreamError),
}
