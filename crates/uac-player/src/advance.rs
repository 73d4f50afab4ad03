//! Track advance and resume.
//!
//! Directory order is the only ordering: the next track is the next recognised audio file
//! after the cursor in the storage's native listing. The last started track is persisted
//! under [`RESUME_KEY`] and played first on the next start.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, never, select};

use crate::config::AdvanceConfig;
use crate::error::{PlayerError, Result};
use crate::persist::{KeyValueStore, RESUME_KEY};
use crate::pipeline::PipelineHandle;
use crate::storage::{EntryKind, Storage};
use crate::track::{PlaybackRequest, TrackReference, is_audio_file_name};
use crate::worker::{StopSignal, WorkerHandle};

/// Next track after `current` in `base_dir`.
///
/// An empty or absent `current` yields the first match. When `current` is the last match,
/// or is not in the directory at all, `loop_enabled` decides between the first match and
/// no track.
pub fn resolve_next(
    storage: &dyn Storage,
    base_dir: &Path,
    current: Option<&TrackReference>,
    loop_enabled: bool,
) -> Result<Option<TrackReference>> {
    let entries = storage
        .list_dir(base_dir)
        .map_err(|e| PlayerError::io(format!("list {}", base_dir.display()), e))?;
    let matches: Vec<TrackReference> = entries
        .iter()
        .filter(|e| e.kind == EntryKind::File && is_audio_file_name(&e.name))
        .map(|e| TrackReference::in_dir(base_dir, &e.name))
        .collect();

    let Some(first) = matches.first() else {
        return Ok(None);
    };
    let Some(current) = current.filter(|c| !c.as_str().is_empty()) else {
        return Ok(Some(first.clone()));
    };
    let next = matches
        .iter()
        .position(|m| m == current)
        .and_then(|i| matches.get(i + 1));
    Ok(match next {
        Some(next) => Some(next.clone()),
        None if loop_enabled => Some(first.clone()),
        None => None,
    })
}

/// Owns the directory cursor and the resume pointer.
pub struct TrackAdvancer {
    storage: Arc<dyn Storage>,
    store: Arc<dyn KeyValueStore>,
    pipeline: PipelineHandle,
    base_dir: PathBuf,
    loop_enabled: bool,
    cursor: Option<TrackReference>,
    resume: Option<TrackReference>,
}

impl TrackAdvancer {
    pub fn new(
        config: &AdvanceConfig,
        storage: Arc<dyn Storage>,
        store: Arc<dyn KeyValueStore>,
        pipeline: PipelineHandle,
    ) -> Self {
        Self {
            storage,
            store,
            pipeline,
            base_dir: config.base_dir.clone(),
            loop_enabled: config.loop_enabled,
            cursor: None,
            resume: None,
        }
    }

    pub fn cursor(&self) -> Option<&TrackReference> {
        self.cursor.as_ref()
    }

    /// The persisted resume pointer, if it still names an existing regular file.
    pub fn load_resume(&self) -> Option<TrackReference> {
        let value = match self.store.get(RESUME_KEY) {
            Ok(Some(v)) if !v.is_empty() => v,
            Ok(_) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "resume pointer unreadable");
                return None;
            }
        };
        let track = TrackReference::new(value);
        match self.storage.stat(track.as_path()) {
            Ok(EntryKind::File) => Some(track),
            Ok(kind) => {
                tracing::info!(path = %track, kind = ?kind, "resume pointer is not a file; discarded");
                None
            }
            Err(e) => {
                tracing::info!(path = %track, error = %e, "resume pointer discarded");
                None
            }
        }
    }

    /// Load the resume pointer. A valid pointer becomes the cursor and is played by the
    /// next [`TrackAdvancer::tick`].
    pub fn startup(&mut self) -> Option<TrackReference> {
        let resume = self.load_resume();
        if let Some(track) = &resume {
            tracing::info!(path = %track, "resuming");
            self.cursor = Some(track.clone());
        }
        self.resume = resume.clone();
        resume
    }

    /// Start the next track. Returns `Ok(None)` when there is nothing to play.
    pub fn advance(&mut self) -> Result<Option<TrackReference>> {
        self.resume = None;
        let next = resolve_next(
            self.storage.as_ref(),
            &self.base_dir,
            self.cursor.as_ref(),
            self.loop_enabled,
        )?;
        match next {
            Some(track) => {
                self.start(track.clone())?;
                Ok(Some(track))
            }
            None => Ok(None),
        }
    }

    /// Periodic check: starts the resume track or the next one once the pipeline is idle,
    /// nothing is pending and a device is connected.
    pub fn tick(&mut self) {
        if self.pipeline.is_busy() || !self.pipeline.port().is_connected() {
            return;
        }
        if let Some(track) = self.resume.take() {
            if let Err(e) = self.start(track) {
                tracing::warn!(error = %e, "resume failed");
            }
            return;
        }
        self.log_advance("advance");
    }

    /// Skip request: advance now unless a request is already on its way. A playing session
    /// is faded out by the controller.
    pub fn skip(&mut self) {
        if self.pipeline.pending() > 0 {
            tracing::info!("skip ignored: request pending");
            return;
        }
        self.log_advance("skip");
    }

    /// Switch directory/loop mode. The cursor is cleared, so the next advance starts from
    /// the first file.
    pub fn restart(&mut self, base_dir: PathBuf, loop_enabled: bool) {
        tracing::info!(dir = %base_dir.display(), loop_enabled, "advance restarted");
        self.base_dir = base_dir;
        self.loop_enabled = loop_enabled;
        self.cursor = None;
        self.resume = None;
    }

    fn start(&mut self, track: TrackReference) -> Result<()> {
        if let Err(e) = self.store.set(RESUME_KEY, track.as_str()) {
            tracing::warn!(path = %track, error = %e, "resume pointer not saved");
        }
        self.pipeline.submit(PlaybackRequest::new(track.clone()))?;
        self.cursor = Some(track);
        Ok(())
    }

    fn log_advance(&mut self, reason: &'static str) {
        match self.advance() {
            Ok(Some(track)) => tracing::info!(path = %track, reason, "next track"),
            Ok(None) => tracing::debug!(reason, "no next track"),
            Err(e) => tracing::warn!(reason, error = %e, "advance failed"),
        }
    }
}

/// Commands accepted by the advance worker.
#[derive(Clone, Debug)]
pub enum AdvanceCommand {
    Skip,
    Restart { base_dir: PathBuf, loop_enabled: bool },
}

/// Cloneable handle for sending [`AdvanceCommand`]s.
#[derive(Clone)]
pub struct AdvanceHandle {
    commands: Sender<AdvanceCommand>,
}

impl AdvanceHandle {
    pub fn skip(&self) -> Result<()> {
        self.send(AdvanceCommand::Skip)
    }

    pub fn restart(&self, base_dir: PathBuf, loop_enabled: bool) -> Result<()> {
        self.send(AdvanceCommand::Restart {
            base_dir,
            loop_enabled,
        })
    }

    fn send(&self, command: AdvanceCommand) -> Result<()> {
        self.commands.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => PlayerError::QueueTimeout(Duration::ZERO),
            TrySendError::Disconnected(_) => PlayerError::Closed,
        })
    }
}

/// Run `advancer` on its own thread: load the resume pointer, then tick every `interval`
/// and apply commands as they arrive.
pub fn spawn_advance_worker(
    mut advancer: TrackAdvancer,
    config: &AdvanceConfig,
) -> Result<(AdvanceHandle, WorkerHandle)> {
    let (commands, command_rx) = bounded(5);
    let interval = config.interval;
    let worker = WorkerHandle::spawn("uac-advance", move |stop| {
        advancer.startup();
        run(&mut advancer, command_rx, &stop, interval);
    })?;
    Ok((AdvanceHandle { commands }, worker))
}

enum Wake {
    Command(Option<AdvanceCommand>),
    Stop,
    Tick,
}

fn run(
    advancer: &mut TrackAdvancer,
    mut commands: Receiver<AdvanceCommand>,
    stop: &StopSignal,
    interval: Duration,
) {
    loop {
        let wake = select! {
            recv(commands) -> msg => Wake::Command(msg.ok()),
            recv(stop.receiver()) -> _ => Wake::Stop,
            default(interval) => Wake::Tick,
        };
        match wake {
            Wake::Command(Some(AdvanceCommand::Skip)) => advancer.skip(),
            Wake::Command(Some(AdvanceCommand::Restart {
                base_dir,
                loop_enabled,
            })) => advancer.restart(base_dir, loop_enabled),
            // Every handle is gone; keep ticking.
            Wake::Command(None) => commands = never(),
            Wake::Stop => break,
            Wake::Tick => advancer.tick(),
        }
    }
    tracing::debug!("advance worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use crate::config::SkipConfig;
    use crate::output::OutputPort;
    use crate::persist::MemoryStore;
    use crate::pipeline::Pipeline;
    use crate::state::PlaybackState;
    use crate::testing::{
        DeviceCall, EventLog, MemoryStorage, RecordingDevice, ScriptedDecoderFactory, test_config,
        wait_until,
    };

    const WAIT: Duration = Duration::from_secs(10);

    fn media(names: &[&str]) -> MemoryStorage {
        let storage = MemoryStorage::default();
        storage.add_dir("/media");
        for (i, name) in names.iter().enumerate() {
            storage.add_track(&format!("/media/{name}"), b'a' + i as u8, 300);
        }
        storage
    }

    fn track(path: &str) -> TrackReference {
        TrackReference::new(path)
    }

    #[test]
    fn loop_on_visits_every_file_once_in_scan_order() {
        let storage = media(&["c.mp3", "a.mp3", "b.aac"]);
        let mut cursor: Option<TrackReference> = None;
        let mut seen = Vec::new();
        for _ in 0..3 {
            cursor = resolve_next(&storage, Path::new("/media"), cursor.as_ref(), true).unwrap();
            seen.push(cursor.clone().unwrap());
        }
        assert_eq!(
            seen,
            vec![track("/media/c.mp3"), track("/media/a.mp3"), track("/media/b.aac")]
        );
        let wrapped = resolve_next(&storage, Path::new("/media"), cursor.as_ref(), true).unwrap();
        assert_eq!(wrapped, Some(track("/media/c.mp3")));
    }

    #[test]
    fn loop_off_stops_after_the_last_file() {
        let storage = media(&["a.mp3", "b.mp3"]);
        let last = track("/media/b.mp3");
        assert_eq!(
            resolve_next(&storage, Path::new("/media"), Some(&last), false).unwrap(),
            None
        );
    }

    #[test]
    fn empty_anchor_yields_first_match_for_both_loop_settings() {
        let storage = media(&["a.mp3", "b.mp3"]);
        let empty = track("");
        for loop_enabled in [true, false] {
            assert_eq!(
                resolve_next(&storage, Path::new("/media"), Some(&empty), loop_enabled).unwrap(),
                Some(track("/media/a.mp3"))
            );
            assert_eq!(
                resolve_next(&storage, Path::new("/media"), None, loop_enabled).unwrap(),
                Some(track("/media/a.mp3"))
            );
        }
    }

    #[test]
    fn unknown_anchor_depends_on_loop() {
        let storage = media(&["a.mp3", "b.mp3"]);
        let gone = track("/media/zzz.mp3");
        assert_eq!(
            resolve_next(&storage, Path::new("/media"), Some(&gone), true).unwrap(),
            Some(track("/media/a.mp3"))
        );
        assert_eq!(
            resolve_next(&storage, Path::new("/media"), Some(&gone), false).unwrap(),
            None
        );
    }

    #[test]
    fn directories_and_other_files_are_skipped() {
        let storage = MemoryStorage::default();
        storage.add_dir("/media");
        storage.add_dir("/media/sub.mp3");
        storage.add_track("/media/cover.jpg", b'j', 10);
        storage.add_track("/media/song.MP3", b's', 10);
        assert_eq!(
            resolve_next(&storage, Path::new("/media"), None, true).unwrap(),
            Some(track("/media/song.MP3"))
        );

        let empty = MemoryStorage::default();
        empty.add_dir("/media");
        assert_eq!(
            resolve_next(&empty, Path::new("/media"), None, true).unwrap(),
            None
        );
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let storage = MemoryStorage::default();
        assert!(matches!(
            resolve_next(&storage, Path::new("/nowhere"), None, true),
            Err(PlayerError::Io { .. })
        ));
    }

    struct Jukebox {
        pipeline: Pipeline,
        storage: Arc<MemoryStorage>,
        store: Arc<MemoryStore>,
        log: EventLog,
    }

    fn jukebox(names: &[&str], write_delay: Duration) -> Jukebox {
        jukebox_with(media(names), write_delay)
    }

    fn jukebox_with(storage: MemoryStorage, write_delay: Duration) -> Jukebox {
        let log = EventLog::default();
        let storage = Arc::new(storage);
        let port = OutputPort::new();
        port.attach(Arc::new(
            RecordingDevice::new("dac", log.clone()).with_write_delay(write_delay),
        ));
        let decoders = ScriptedDecoderFactory::new(100, 200, log.clone());
        let pipeline =
            Pipeline::spawn(test_config(), storage.clone(), Arc::new(decoders), port).unwrap();
        Jukebox {
            pipeline,
            storage,
            store: Arc::new(MemoryStore::default()),
            log,
        }
    }

    fn advance_config(interval_ms: u64) -> AdvanceConfig {
        AdvanceConfig {
            base_dir: PathBuf::from("/media"),
            loop_enabled: true,
            interval: Duration::from_millis(interval_ms),
        }
    }

    fn advancer(j: &Jukebox, config: &AdvanceConfig) -> TrackAdvancer {
        TrackAdvancer::new(
            config,
            j.storage.clone(),
            j.store.clone(),
            j.pipeline.handle(),
        )
    }

    #[test]
    fn deleted_resume_pointer_is_discarded() {
        let j = jukebox(&["a.mp3", "b.mp3"], Duration::ZERO);
        j.store.set(RESUME_KEY, "/media/b.mp3").unwrap();
        j.storage.remove("/media/b.mp3");

        let mut adv = advancer(&j, &advance_config(5));
        assert_eq!(adv.startup(), None);
        assert_eq!(adv.cursor(), None);
    }

    #[test]
    fn resume_pointer_naming_a_directory_is_discarded() {
        let j = jukebox(&["a.mp3"], Duration::ZERO);
        j.storage.add_dir("/media/old");
        j.store.set(RESUME_KEY, "/media/old").unwrap();
        assert_eq!(advancer(&j, &advance_config(5)).load_resume(), None);
    }

    #[test]
    fn advance_persists_and_submits() {
        let j = jukebox(&["a.mp3", "b.mp3"], Duration::ZERO);
        let handle = j.pipeline.handle();
        let mut adv = advancer(&j, &advance_config(5));

        assert_eq!(adv.advance().unwrap(), Some(track("/media/a.mp3")));
        assert_eq!(
            j.store.get(RESUME_KEY).unwrap().as_deref(),
            Some("/media/a.mp3")
        );
        assert_eq!(adv.cursor(), Some(&track("/media/a.mp3")));
        assert!(handle.wait_idle(WAIT));
        assert_eq!(j.log.played_tracks(), vec![b'a']);
    }

    #[test]
    fn loop_off_past_the_end_submits_nothing() {
        let j = jukebox(&["a.mp3"], Duration::ZERO);
        let handle = j.pipeline.handle();
        let mut config = advance_config(5);
        config.loop_enabled = false;
        let mut adv = advancer(&j, &config);

        assert!(adv.advance().unwrap().is_some());
        assert!(handle.wait_idle(WAIT));
        assert_eq!(adv.advance().unwrap(), None);
        assert_eq!(handle.pending(), 0);
        assert_eq!(handle.snapshot().sessions_started, 1);
    }

    #[test]
    fn restart_clears_the_cursor() {
        let j = jukebox(&["a.mp3", "b.mp3"], Duration::ZERO);
        j.storage.add_dir("/other");
        j.storage.add_track("/other/x.mp3", b'x', 300);
        let mut adv = advancer(&j, &advance_config(5));

        adv.advance().unwrap();
        adv.restart(PathBuf::from("/other"), false);
        assert_eq!(adv.cursor(), None);
        assert!(j.pipeline.handle().wait_idle(WAIT));
        assert_eq!(adv.advance().unwrap(), Some(track("/other/x.mp3")));
    }

    #[test]
    fn worker_plays_directory_in_order_and_wraps() {
        let j = jukebox(&["a.mp3", "b.mp3", "c.mp3"], Duration::ZERO);
        let config = advance_config(5);
        let (_advance, worker) = spawn_advance_worker(advancer(&j, &config), &config).unwrap();

        assert!(wait_until(WAIT, || j.log.played_tracks().len() >= 4));
        worker.stop();
        assert_eq!(&j.log.played_tracks()[..4], &[b'a', b'b', b'c', b'a']);
    }

    #[test]
    fn worker_resumes_from_the_persisted_track() {
        let j = jukebox(&["a.mp3", "b.mp3", "c.mp3"], Duration::ZERO);
        j.store.set(RESUME_KEY, "/media/b.mp3").unwrap();
        let config = advance_config(5);
        let (_advance, worker) = spawn_advance_worker(advancer(&j, &config), &config).unwrap();

        assert!(wait_until(WAIT, || j.log.played_tracks().len() >= 2));
        worker.stop();
        assert_eq!(&j.log.played_tracks()[..2], &[b'b', b'c']);
    }

    #[test]
    fn worker_waits_for_a_connected_device() {
        let j = jukebox(&["a.mp3"], Duration::ZERO);
        let handle = j.pipeline.handle();
        let device = handle.port().detach().unwrap();
        let config = advance_config(5);
        let (_advance, worker) = spawn_advance_worker(advancer(&j, &config), &config).unwrap();

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(handle.snapshot().sessions_started, 0);

        handle.port().attach(device);
        assert!(wait_until(WAIT, || j.log.played_tracks() == vec![b'a']));
        worker.stop();
    }

    #[test]
    fn skip_mid_track_fades_and_starts_the_next_track() {
        let storage = MemoryStorage::default();
        storage.add_dir("/media");
        storage.add_track("/media/a.mp3", b'a', 30_000);
        storage.add_track("/media/b.mp3", b'b', 300);
        let j = jukebox_with(storage, Duration::from_millis(2));
        let handle = j.pipeline.handle();
        let config = advance_config(5);
        let (advance, worker) = spawn_advance_worker(advancer(&j, &config), &config).unwrap();

        assert!(wait_until(WAIT, || j.log.written_markers().contains(&b'a')));
        assert_eq!(handle.state(), PlaybackState::Playing);
        let skipped_at = Instant::now();
        advance.skip().unwrap();

        assert!(wait_until(WAIT, || j.log.written_markers().contains(&b'b')));
        // The next track must be audible before a second touch would be accepted.
        assert!(skipped_at.elapsed() < SkipConfig::default().debounce);
        worker.stop();
        let calls = j.log.device_calls();
        let first_b = calls
            .iter()
            .position(|c| matches!(c, DeviceCall::Write { marker: b'b', .. }))
            .unwrap();
        assert!(calls[..first_b].contains(&DeviceCall::Volume(0)));
        assert!(calls[..first_b].contains(&DeviceCall::Mute(true)));
        assert!(wait_until(WAIT, || handle.snapshot().sessions_stopped == 1));
    }
}
