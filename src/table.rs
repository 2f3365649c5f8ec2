//! The frame table: the persisted contract between analysis and playback.
//!
//! On disk it is a headed CSV with the columns
//! `frame,time_sec,brightness,note,R,G,B`. `time_sec` is written with three
//! decimals and `note` is a natural letter or the literal `None`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::note::{Note, Rgb};

const NO_NOTE: &str = "None";

/// Latest frame time accepted in a table (24 hours).
pub const MAX_TIME_SEC: f64 = 86_400.0;

/// One fixed-interval record of the table.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub index: usize,
    pub time_sec: f64,
    pub loudness: u8,
    pub note: Option<Note>,
    pub color: Rgb,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameTable {
    frames: Vec<Frame>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FrameRow {
    frame: usize,
    #[serde(serialize_with = "serialize_millis")]
    time_sec: f64,
    brightness: u8,
    note: String,
    #[serde(rename = "R")]
    r: u8,
    #[serde(rename = "G")]
    g: u8,
    #[serde(rename = "B")]
    b: u8,
}

fn serialize_millis<S: Serializer>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{:.3}", value))
}

/// Round a time offset to millisecond precision.
pub fn round_millis(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

impl From<&Frame> for FrameRow {
    fn from(frame: &Frame) -> Self {
        Self {
            frame: frame.index,
            time_sec: frame.time_sec,
            brightness: frame.loudness,
            note: frame.note.map_or_else(|| NO_NOTE.to_string(), |n| n.to_string()),
            r: frame.color.r,
            g: frame.color.g,
            b: frame.color.b,
        }
    }
}

impl FrameRow {
    fn into_frame(self) -> std::result::Result<Frame, String> {
        let note = match self.note.as_str() {
            NO_NOTE | "" => None,
            letter => Some(letter.parse::<Note>()?),
        };
        Ok(Frame {
            index: self.frame,
            time_sec: self.time_sec,
            loudness: self.brightness,
            note,
            color: Rgb::new(self.r, self.g, self.b),
        })
    }
}

/// Summary used by `lightshow inspect`.
#[derive(Debug, Default)]
pub struct TableStats {
    pub frames: usize,
    pub duration: f64,
    pub mean_brightness: f64,
    pub silent_frames: usize,
    pub notes: BTreeMap<Note, usize>,
}

impl FrameTable {
    /// Build a table, checking that frames are indexed in order and that
    /// their times strictly increase.
    pub fn new(frames: Vec<Frame>) -> std::result::Result<Self, String> {
        for (pos, frame) in frames.iter().enumerate() {
            if frame.index != pos {
                return Err(format!("frame at row {} has index {}", pos, frame.index));
            }
            if !(0.0..=MAX_TIME_SEC).contains(&frame.time_sec) {
                return Err(format!("frame {} has invalid time {}", pos, frame.time_sec));
            }
            if pos > 0 && frame.time_sec <= frames[pos - 1].time_sec {
                return Err(format!(
                    "frame {} at {:.3}s does not follow {:.3}s",
                    pos,
                    frame.time_sec,
                    frames[pos - 1].time_sec
                ));
            }
        }
        Ok(Self { frames })
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Scheduled offset of the last frame.
    pub fn duration(&self) -> f64 {
        self.frames.last().map_or(0.0, |f| f.time_sec)
    }

    pub fn stats(&self) -> TableStats {
        let mut stats = TableStats {
            frames: self.frames.len(),
            duration: self.duration(),
            ..Default::default()
        };
        if self.frames.is_empty() {
            return stats;
        }
        let mut total = 0u64;
        for frame in &self.frames {
            total += frame.loudness as u64;
            match frame.note {
                Some(note) => *stats.notes.entry(note).or_insert(0) += 1,
                None => stats.silent_frames += 1,
            }
        }
        stats.mean_brightness = total as f64 / self.frames.len() as f64;
        stats
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let table = Self::read_from(BufReader::new(file), path)?;
        log::info!("Loaded {} frames from {}", table.len(), path.display());
        Ok(table)
    }

    /// Parse CSV from any reader. `origin` only labels errors.
    pub fn read_from<R: Read>(reader: R, origin: &Path) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut frames = Vec::new();
        for (row_no, row) in rdr.deserialize::<FrameRow>().enumerate() {
            let row = row.map_err(|e| Error::table(origin, e))?;
            let frame = row
                .into_frame()
                .map_err(|e| Error::table(origin, format!("row {}: {}", row_no, e)))?;
            frames.push(frame);
        }
        Self::new(frames).map_err(|e| Error::table(origin, e))
    }

    pub fn write_to<W: Write>(&self, writer: W) -> std::result::Result<(), csv::Error> {
        let mut wtr = csv::Writer::from_writer(writer);
        for frame in &self.frames {
            wtr.serialize(FrameRow::from(frame))?;
        }
        if self.frames.is_empty() {
            wtr.write_record(["frame", "time_sec", "brightness", "note", "R", "G", "B"])?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Write the table next to `path` and rename it into place, so a failed
    /// write never leaves a truncated table behind.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = temp_sibling(path);
        let result = File::create(&tmp)
            .map_err(|e| Error::io(&tmp, e))
            .and_then(|file| {
                self.write_to(BufWriter::new(file))
                    .map_err(|e| Error::table(&tmp, e))
            })
            .and_then(|()| std::fs::rename(&tmp, path).map_err(|e| Error::io(path, e)));
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        result?;
        log::info!("Saved {} frames -> {}", self.len(), path.display());
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "frames.csv".into());
    name.push(".partial");
    path.with_file_name(name)
}
