use std::fmt;
use std::str::FromStr;

const A4_HZ: f32 = 440.0;
const A4_MIDI: f32 = 69.0;

/// An RGB triple as stored in the frame table and sent to the lights.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Multiply every channel by `factor` (clamped to 0.0-1.0), truncating.
    pub fn scaled(self, factor: f32) -> Self {
        let f = if factor.is_finite() { factor.clamp(0.0, 1.0) } else { 0.0 };
        let ch = |c: u8| (c as f32 * f) as u8;
        Self::new(ch(self.r), ch(self.g), ch(self.b))
    }

    pub fn is_black(self) -> bool {
        self == Self::BLACK
    }

    /// Brightest channel, used to check that fades only ever go down.
    pub fn peak(self) -> u8 {
        self.r.max(self.g).max(self.b)
    }
}

/// Natural note letters. Sharps and flats have no colour and are never produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Note {
    C,
    D,
    E,
    F,
    G,
    A,
    B,
}

impl Note {
    pub const ALL: [Note; 7] = [Note::C, Note::D, Note::E, Note::F, Note::G, Note::A, Note::B];

    pub fn color(self) -> Rgb {
        match self {
            Note::C => Rgb::new(255, 0, 0),
            Note::D => Rgb::new(255, 128, 0),
            Note::E => Rgb::new(255, 255, 0),
            Note::F => Rgb::new(0, 255, 0),
            Note::G => Rgb::new(0, 255, 255),
            Note::A => Rgb::new(0, 0, 255),
            Note::B => Rgb::new(128, 0, 255),
        }
    }

    pub fn letter(self) -> &'static str {
        match self {
            Note::C => "C",
            Note::D => "D",
            Note::E => "E",
            Note::F => "F",
            Note::G => "G",
            Note::A => "A",
            Note::B => "B",
        }
    }

    fn from_pitch_class(pc: u32) -> Option<Note> {
        match pc {
            0 => Some(Note::C),
            2 => Some(Note::D),
            4 => Some(Note::E),
            5 => Some(Note::F),
            7 => Some(Note::G),
            9 => Some(Note::A),
            11 => Some(Note::B),
            _ => None,
        }
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.letter())
    }
}

impl FromStr for Note {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Note::ALL
            .iter()
            .copied()
            .find(|n| n.letter() == s)
            .ok_or_else(|| format!("unknown note '{}'", s))
    }
}

/// Colour for an optional note; no note is black.
pub fn note_color(note: Option<Note>) -> Rgb {
    note.map_or(Rgb::BLACK, Note::color)
}

/// Nearest equal-tempered pitch class of `freq`, ignoring octave.
///
/// Returns `None` for non-positive or non-finite input and for the five
/// accidentals, which have no entry in the colour table.
pub fn freq_to_note(freq: f32) -> Option<Note> {
    if !freq.is_finite() || freq <= 0.0 {
        return None;
    }
    let midi = (12.0 * (freq / A4_HZ).log2() + A4_MIDI).round();
    let pc = (midi as i64).rem_euclid(12) as u32;
    Note::from_pitch_class(pc)
}
