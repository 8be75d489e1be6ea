use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;
use log::info;
use mptapp::adapter::{IdleAdapter, NullErrorHandler};
use mptapp::channel::Channel;
use mptapp::soundcard::Soundcard;

#[derive(Parser)]
struct Args {
    #[arg(short = 'c', help = "Sound card name (see mptrt-soundcards)")]
    card: String,

    #[arg(short = 'i', help = "Morse ident to transmit")]
    ident: String,

    #[arg(short = 's', default_value = "30", help = "Seconds to idle on SYNT")]
    seconds: u64,
}

fn main() {
    env_logger::builder()
        .format_timestamp(Some(env_logger::TimestampPrecision::Millis))
        .init();
    let args = Args::parse();

    let soundcard = Soundcard::new(args.card).unwrap();
    let channel = Channel::new(
        soundcard.input(),
        soundcard.output(),
        IdleAdapter,
        NullErrorHandler::new(),
    );
    channel.start();

    let (done_tx, done_rx) = mpsc::channel();
    channel
        .queue_morse(
            &args.ident,
            Some(Box::new(move || {
                let _ = done_tx.send(());
            })),
        )
        .unwrap();
    info!("transmitting ident");
    let _ = done_rx.recv();

    info!("ident complete, idling on SYNT");
    std::thread::sleep(Duration::from_secs(args.seconds));
    channel.stop();
    channel.close();
}
