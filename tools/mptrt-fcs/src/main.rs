use std::error::Error;

use clap::Parser;
use mptcore::fcs::{fcs, fcs_add};

#[derive(Parser)]
struct Args {
    #[arg(
        required = true,
        help = "48-bit payloads in hex, e.g. 0x123456789ABC"
    )]
    payloads: Vec<String>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    for input in &args.payloads {
        let digits = input.trim_start_matches("0x").trim_start_matches("0X");
        let payload = u64::from_str_radix(digits, 16)? & 0xFFFF_FFFF_FFFF;
        println!(
            "{:012X}: fcs {:04X} codeword {:016X}",
            payload,
            fcs(payload),
            fcs_add(payload)
        );
    }

    Ok(())
}
