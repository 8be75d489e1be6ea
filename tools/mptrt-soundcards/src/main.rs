use ascii_table::{Align, AsciiTable};
use mptapp::soundcard::Soundcard;

fn main() {
    // On some platforms enumerating devices will emit junk to the terminal:
    // https://github.com/RustAudio/cpal/issues/384
    // To minimise the impact, enumerate first and put our output at the end.
    let input_cards = Soundcard::supported_input_cards();
    let output_cards = Soundcard::supported_output_cards();

    println!("\nDetected sound cards compatible with the MPT1327 channel:");

    let mut merged: Vec<&str> = input_cards
        .iter()
        .chain(output_cards.iter())
        .map(|s| s.as_str())
        .collect();
    merged.sort();
    merged.dedup();
    let yes = "OK";
    let no = "";
    let data = merged.into_iter().map(|c| {
        [
            c,
            if input_cards.iter().any(|s| s == c) {
                yes
            } else {
                no
            },
            if output_cards.iter().any(|s| s == c) {
                yes
            } else {
                no
            },
        ]
    });

    let mut table = AsciiTable::default();
    table.column(0).set_header("CARD").set_align(Align::Left);
    table.column(1).set_header("INPUT").set_align(Align::Center);
    table.column(2).set_header("OUTPUT").set_align(Align::Center);
    table.print(data);
}
