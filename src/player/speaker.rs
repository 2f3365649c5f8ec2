use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rodio::{Decoder, OutputStream, Sink};

use crate::error::{Error, Result};

use super::{AudioBackend, Playback};

/// Plays through the default system output device.
#[derive(Clone, Copy, Debug, Default)]
pub struct RodioBackend;

impl AudioBackend for RodioBackend {
    fn load(&self, path: &Path) -> Result<Box<dyn Playback>> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let source = Decoder::new(BufReader::new(file)).map_err(|e| Error::decode(path, e))?;

        let (stream, handle) =
            OutputStream::try_default().map_err(|e| Error::Audio(format!("no output device: {}", e)))?;
        let sink = Sink::try_new(&handle).map_err(|e| Error::Audio(e.to_string()))?;
        sink.pause();
        sink.append(source);

        log::info!("Loaded {} for playback", path.display());
        Ok(Box::new(RodioPlayback {
            _stream: stream,
            sink,
        }))
    }
}

struct RodioPlayback {
    // dropping the stream silences the sink
    _stream: OutputStream,
    sink: Sink,
}

impl Playback for RodioPlayback {
    fn play(&mut self) -> Result<()> {
        self.sink.play();
        Ok(())
    }

    fn is_active(&self) -> bool {
        !self.sink.empty() && !self.sink.is_paused()
    }

    fn stop(&mut self) {
        self.sink.stop();
    }
}
