//! Morse ident generation per ITU-R M.1667-1: dot 1 unit, dash 3, signal
//! space 1, letter space 3, word space 7 (the larger spaces include the
//! spaces already emitted before them).

use crate::protocol::{MORSE_FREQ, MORSE_UNIT_SAMPLES};

/// One step of an ident transmission. `freq` 0 is silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MorseElement {
    pub freq: u16,
    pub duration: u32,
}

impl MorseElement {
    fn tone(units: u32) -> Self {
        Self {
            freq: MORSE_FREQ,
            duration: units * MORSE_UNIT_SAMPLES,
        }
    }

    fn gap(units: u32) -> Self {
        Self {
            freq: 0,
            duration: units * MORSE_UNIT_SAMPLES,
        }
    }
}

const MORSE_TABLE: [&str; 36] = [
    "A.-", "B-...", "C-.-.", "D-..", "E.", "F..-.", "G--.", "H....", "I..", "J.---", "K-.-",
    "L.-..", "M--", "N-.", "O---", "P.--.", "Q--.-", "R.-.", "S...", "T-", "U..-", "V...-", "W.--",
    "X-..-", "Y-.--", "Z--..", "0-----", "1.----", "2..---", "3...--", "4....-", "5.....", "6-....",
    "7--...", "8---..", "9----.",
];

fn lookup(ch: char) -> &'static str {
    for entry in MORSE_TABLE {
        if entry.as_bytes()[0] == ch as u8 {
            return &entry[1..];
        }
    }
    // unknown characters contribute only their letter space
    ""
}

/// Expand `text` into the tone/silence sequence of its Morse rendering.
pub fn elements(text: &str) -> MorseElements<'_> {
    MorseElements {
        chars: text.chars(),
        pattern: "",
        pending: None,
        letter_gap: false,
        word_gap: false,
    }
}

pub struct MorseElements<'a> {
    chars: core::str::Chars<'a>,
    /// Remaining dot/dash symbols of the current character.
    pattern: &'static str,
    /// Gap owed behind the element just yielded.
    pending: Option<MorseElement>,
    letter_gap: bool,
    word_gap: bool,
}

impl Iterator for MorseElements<'_> {
    type Item = MorseElement;

    fn next(&mut self) -> Option<MorseElement> {
        loop {
            if let Some(element) = self.pending.take() {
                return Some(element);
            }
            if let Some(symbol) = self.pattern.bytes().next() {
                self.pattern = &self.pattern[1..];
                self.pending = Some(MorseElement::gap(1));
                return Some(MorseElement::tone(if symbol == b'.' { 1 } else { 3 }));
            }
            if self.letter_gap {
                self.letter_gap = false;
                if self.word_gap {
                    self.word_gap = false;
                    self.pending = Some(MorseElement::gap(4));
                }
                return Some(MorseElement::gap(2));
            }
            let ch = self.chars.next()?.to_ascii_uppercase();
            self.pattern = lookup(ch);
            self.letter_gap = true;
            self.word_gap = ch == ' ';
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOT: MorseElement = MorseElement { freq: 800, duration: 3200 };
    const DASH: MorseElement = MorseElement { freq: 800, duration: 9600 };
    const GAP1: MorseElement = MorseElement { freq: 0, duration: 3200 };
    const GAP2: MorseElement = MorseElement { freq: 0, duration: 6400 };
    const GAP4: MorseElement = MorseElement { freq: 0, duration: 12800 };

    #[test]
    fn sos_sequence_and_duration() {
        let elements: Vec<MorseElement> = elements("SOS").collect();
        #[rustfmt::skip]
        let expected = vec![
            DOT, GAP1, DOT, GAP1, DOT, GAP1, GAP2,
            DASH, GAP1, DASH, GAP1, DASH, GAP1, GAP2,
            DOT, GAP1, DOT, GAP1, DOT, GAP1, GAP2,
        ];
        assert_eq!(elements, expected);
        let total: u32 = expected.iter().map(|e| e.duration).sum();
        assert_eq!(total, 96_000);
    }

    #[test]
    fn lowercase_matches_uppercase() {
        let lower: Vec<MorseElement> = elements("sos").collect();
        let upper: Vec<MorseElement> = elements("SOS").collect();
        assert_eq!(lower, upper);
    }

    #[test]
    fn word_space_follows_letter_space() {
        let seq: Vec<MorseElement> = elements("E E").collect();
        assert_eq!(seq, vec![DOT, GAP1, GAP2, GAP2, GAP4, DOT, GAP1, GAP2]);
    }

    #[test]
    fn unknown_character_leaves_only_letter_space() {
        let seq: Vec<MorseElement> = elements("?").collect();
        assert_eq!(seq, vec![GAP2]);
    }

    #[test]
    fn digits_have_five_symbols() {
        let tones = elements("73").filter(|e| e.freq != 0).count();
        assert_eq!(tones, 10);
    }
}
