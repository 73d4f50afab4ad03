//! In-memory collaborators for unit tests.

use std::collections::HashSet;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::PlayerConfig;
use crate::decoder::{DecodeStatus, DecoderFactory, FrameDecoder, StreamInfo};
use crate::error::{PlayerError, Result};
use crate::output::{OutputDevice, PcmFormat};
use crate::storage::{DirEntry, EntryKind, Storage};
use crate::track::AudioFormat;

/// Small buffers and short delays so pipeline tests run in milliseconds.
pub(crate) fn test_config() -> PlayerConfig {
    PlayerConfig {
        queue_capacity: 5,
        header_chunk_bytes: 1024,
        input_chunk_bytes: 256,
        initial_output_bytes: 64,
        max_output_bytes: 64 * 1024,
        min_decode_bytes: 16,
        fade_step: 25,
        fade_step_delay: Duration::from_millis(1),
        forward_timeout: Duration::from_secs(1),
        settle_delay: Duration::from_millis(5),
        volume: 80,
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub(crate) fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum DeviceCall {
    /// `marker` is the first PCM byte; fake decoders fill frames with a per-file byte.
    Write { marker: u8, len: usize },
    Volume(u8),
    Mute(bool),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum LogEntry {
    Device(DeviceCall),
    DecoderOpened(AudioFormat),
    DecoderClosed,
}

/// Ordered record of everything the fakes observed.
#[derive(Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<LogEntry>>>);

impl EventLog {
    pub(crate) fn push(&self, entry: LogEntry) {
        self.0.lock().unwrap().push(entry);
    }

    pub(crate) fn entries(&self) -> Vec<LogEntry> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn device_calls(&self) -> Vec<DeviceCall> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                LogEntry::Device(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    /// Markers of written frames, in write order.
    pub(crate) fn written_markers(&self) -> Vec<u8> {
        self.device_calls()
            .into_iter()
            .filter_map(|c| match c {
                DeviceCall::Write { marker, .. } => Some(marker),
                _ => None,
            })
            .collect()
    }

    /// Markers of written frames with consecutive duplicates collapsed (one per track).
    pub(crate) fn played_tracks(&self) -> Vec<u8> {
        let mut out = self.written_markers();
        out.dedup();
        out
    }
}

pub(crate) struct RecordingDevice {
    name: String,
    log: EventLog,
    volume: AtomicU8,
    write_delay: Duration,
    fail_writes: AtomicBool,
}

impl RecordingDevice {
    pub(crate) fn new(name: &str, log: EventLog) -> Self {
        Self {
            name: name.to_string(),
            log,
            volume: AtomicU8::new(100),
            write_delay: Duration::ZERO,
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Simulate a device that consumes audio in real time.
    pub(crate) fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }
}

impl OutputDevice for RecordingDevice {
    fn write(&self, pcm: &[u8], _format: PcmFormat, _timeout: Option<Duration>) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(PlayerError::Device("stalled endpoint".into()));
        }
        thread::sleep(self.write_delay);
        self.log.push(LogEntry::Device(DeviceCall::Write {
            marker: pcm.first().copied().unwrap_or(0),
            len: pcm.len(),
        }));
        Ok(())
    }

    fn set_volume(&self, volume: u8) -> Result<()> {
        self.volume.store(volume, Ordering::Relaxed);
        self.log.push(LogEntry::Device(DeviceCall::Volume(volume)));
        Ok(())
    }

    fn volume(&self) -> Result<u8> {
        Ok(self.volume.load(Ordering::Relaxed))
    }

    fn set_mute(&self, muted: bool) -> Result<()> {
        self.log.push(LogEntry::Device(DeviceCall::Mute(muted)));
        Ok(())
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Directory tree held in memory. Entries keep insertion order.
#[derive(Default)]
pub(crate) struct MemoryStorage {
    files: Mutex<Vec<(PathBuf, Vec<u8>)>>,
    dirs: Mutex<Vec<PathBuf>>,
    unreadable: Mutex<HashSet<PathBuf>>,
}

impl MemoryStorage {
    pub(crate) fn add_file(&self, path: &str, bytes: Vec<u8>) {
        self.files.lock().unwrap().push((PathBuf::from(path), bytes));
    }

    /// A file whose content is `len` copies of `marker`.
    pub(crate) fn add_track(&self, path: &str, marker: u8, len: usize) {
        self.add_file(path, vec![marker; len]);
    }

    pub(crate) fn add_dir(&self, path: &str) {
        self.dirs.lock().unwrap().push(PathBuf::from(path));
    }

    pub(crate) fn remove(&self, path: &str) {
        self.files.lock().unwrap().retain(|(p, _)| p != Path::new(path));
    }

    /// Opening succeeds but every read fails.
    pub(crate) fn make_unreadable(&self, path: &str) {
        self.unreadable.lock().unwrap().insert(PathBuf::from(path));
    }
}

impl Storage for MemoryStorage {
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<DirEntry>> {
        let files = self.files.lock().unwrap();
        let dirs = self.dirs.lock().unwrap();
        let child_name = |p: &PathBuf| {
            (p.parent() == Some(dir))
                .then(|| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .flatten()
        };
        let mut out: Vec<DirEntry> = dirs
            .iter()
            .filter_map(|p| child_name(p).map(|n| DirEntry::new(n, EntryKind::Dir)))
            .collect();
        out.extend(
            files
                .iter()
                .filter_map(|(p, _)| child_name(p).map(|n| DirEntry::new(n, EntryKind::File))),
        );
        if out.is_empty() && !dirs.iter().any(|d| d == dir) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such directory"));
        }
        Ok(out)
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        if self.unreadable.lock().unwrap().contains(path) {
            return Ok(Box::new(FailingReader));
        }
        let files = self.files.lock().unwrap();
        files
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, bytes)| Box::new(Cursor::new(bytes.clone())) as Box<dyn Read + Send>)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn stat(&self, path: &Path) -> io::Result<EntryKind> {
        if self.files.lock().unwrap().iter().any(|(p, _)| p == path) {
            return Ok(EntryKind::File);
        }
        if self.dirs.lock().unwrap().iter().any(|d| d == path) {
            return Ok(EntryKind::Dir);
        }
        Err(io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }
}

struct FailingReader;

impl Read for FailingReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::other("card removed"))
    }
}

/// Misbehaviour injected into [`ScriptedDecoderFactory`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DecoderFault {
    /// `open` fails.
    FailOpen,
    /// `process` fails once this many frames were produced.
    FailAfter(u64),
    /// Frames are reported without consuming any input.
    EmitWithoutConsuming,
}

/// Decoder fake: every `frame_input` bytes of input decode to `frame_output` bytes filled
/// with the first input byte of the frame.
#[derive(Clone)]
pub(crate) struct ScriptedDecoderFactory {
    pub(crate) frame_input: usize,
    pub(crate) frame_output: usize,
    pub(crate) frame_delay: Duration,
    pub(crate) fault: Option<DecoderFault>,
    pub(crate) log: EventLog,
    pub(crate) consumed: Arc<AtomicU64>,
}

impl ScriptedDecoderFactory {
    pub(crate) fn new(frame_input: usize, frame_output: usize, log: EventLog) -> Self {
        Self {
            frame_input,
            frame_output,
            frame_delay: Duration::ZERO,
            fault: None,
            log,
            consumed: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl DecoderFactory for ScriptedDecoderFactory {
    fn open(&self, format: AudioFormat) -> Result<Box<dyn FrameDecoder>> {
        if self.fault == Some(DecoderFault::FailOpen) {
            return Err(PlayerError::Decoder("no decoder instance available".into()));
        }
        self.log.push(LogEntry::DecoderOpened(format));
        Ok(Box::new(ScriptedDecoder {
            script: self.clone(),
            started: false,
            frames: 0,
        }))
    }
}

struct ScriptedDecoder {
    script: ScriptedDecoderFactory,
    started: bool,
    frames: u64,
}

impl FrameDecoder for ScriptedDecoder {
    fn process(&mut self, input: &[u8], output: &mut [u8]) -> Result<DecodeStatus> {
        let s = &self.script;
        if input.len() < s.frame_input {
            return Ok(DecodeStatus::NeedInput { consumed: 0 });
        }
        if output.len() < s.frame_output {
            return Ok(DecodeStatus::OutputTooSmall {
                needed: s.frame_output,
            });
        }
        if s.fault == Some(DecoderFault::FailAfter(self.frames)) {
            return Err(PlayerError::Decoder("corrupt frame".into()));
        }
        thread::sleep(s.frame_delay);
        output[..s.frame_output].fill(input[0]);
        self.started = true;
        self.frames += 1;
        let consumed = if s.fault == Some(DecoderFault::EmitWithoutConsuming) {
            0
        } else {
            s.frame_input
        };
        s.consumed.fetch_add(consumed as u64, Ordering::Relaxed);
        Ok(DecodeStatus::Frame {
            consumed,
            decoded: s.frame_output,
        })
    }

    fn info(&self) -> Option<StreamInfo> {
        self.started.then_some(StreamInfo {
            sample_rate: 44_100,
            channels: 2,
            bits_per_sample: 16,
        })
    }

    fn close(&mut self) {
        self.script.log.push(LogEntry::DecoderClosed);
    }
}
