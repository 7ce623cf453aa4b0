//! Interactive sampler runtime.
//!
//! Owns the current [`SamplerSession`], reads single-letter commands from stdin and prints
//! track changes as they happen. Loading another playlist waits for the clip that is playing
//! (see `SamplerSession::unload`) before the next session starts.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};
use sampler_pipeline::config::PipelineConfig;
use sampler_pipeline::session::{Collaborators, SamplerSession};
use sampler_pipeline::status::SessionStatus;
use sampler_pipeline::{device, transcode};
use sampler_types::{PlaybackState, PlayerEvent};

use crate::catalogue::Playlist;

pub struct PlayOptions {
    pub manifest: PathBuf,
    pub shuffle: bool,
    pub start_paused: bool,
}

type CurrentSession = Arc<Mutex<Option<SamplerSession>>>;

/// A playlist waiting for the previous session to finish its clip.
struct PendingSwap {
    playlist: Playlist,
    resume: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum UserCommand {
    Play,
    Pause,
    Load(PathBuf),
    Info,
    Quit,
    Help,
}

fn parse_command(line: &str) -> Option<UserCommand> {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    match head {
        "p" | "play" => Some(UserCommand::Play),
        "s" | "pause" => Some(UserCommand::Pause),
        "l" | "load" if !rest.is_empty() => Some(UserCommand::Load(PathBuf::from(rest))),
        "i" | "info" => Some(UserCommand::Info),
        "q" | "quit" => Some(UserCommand::Quit),
        "h" | "help" | "?" => Some(UserCommand::Help),
        _ => None,
    }
}

/// Print available output devices to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    for (i, name) in device::list_devices(&host)?.iter().enumerate() {
        println!("#{i}: {name}");
    }
    Ok(())
}

/// What a `l <manifest>` command does given the controller state.
#[derive(Debug, PartialEq, Eq)]
enum LoadAction {
    /// Unload the current session with wait; the next one starts after its clip.
    SwapAfterCurrent,
    /// Nothing is loaded; start right away.
    StartNow,
    /// A swap is already waiting for the current clip.
    Reject,
}

fn load_action(has_current: bool, swap_pending: bool) -> LoadAction {
    match (has_current, swap_pending) {
        (_, true) => LoadAction::Reject,
        (true, false) => LoadAction::SwapAfterCurrent,
        (false, false) => LoadAction::StartNow,
    }
}

/// Sample `opts.manifest` and serve stdin commands until `q` or end of input.
pub fn run_play(config: PipelineConfig, opts: PlayOptions) -> Result<()> {
    match transcode::cleanup_stale_pcm(&config.temp_dir) {
        Ok(0) => {}
        Ok(n) => tracing::info!(count = n, "cleaned up stale temp files"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("temp cleanup warning: {e}"),
    }

    let playlist = Playlist::load(&opts.manifest)?;

    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let status = SessionStatus::shared(0);
    spawn_event_printer(events_rx, status.clone());

    let (swap_tx, swap_rx) = crossbeam_channel::unbounded::<PendingSwap>();
    let mut controller = Controller {
        config,
        shuffle: opts.shuffle,
        events: events_tx,
        status,
        current: Arc::new(Mutex::new(None)),
        swap_tx,
        swap_pending: false,
    };

    install_interrupt_handler(controller.current.clone());

    let session = controller.start_session(playlist)?;
    if !opts.start_paused {
        session.play();
    }
    *controller.current.lock().unwrap() = Some(session);

    let lines = spawn_stdin_reader();
    print_help();

    loop {
        crossbeam_channel::select! {
            recv(lines) -> line => {
                let Ok(line) = line else {
                    tracing::info!("input closed");
                    break;
                };
                match parse_command(&line) {
                    Some(UserCommand::Quit) => break,
                    Some(cmd) => controller.handle(cmd),
                    None if line.trim().is_empty() => {}
                    None => println!("unknown command: {}", line.trim()),
                }
            }
            recv(swap_rx) -> swap => {
                if let Ok(swap) = swap {
                    controller.finish_swap(swap);
                }
            }
        }
    }

    controller.shutdown()
}

/// Ctrl-C unloads the current session without waiting and exits with 130.
///
/// Returns `false` (after logging) when the handler could not be installed.
fn install_interrupt_handler(current: CurrentSession) -> bool {
    let installed = ctrlc::set_handler(move || {
        let session = current.lock().ok().and_then(|mut g| g.take());
        if let Some(session) = session {
            if let Err(e) = session.unload(false, || {}) {
                tracing::warn!("unload on interrupt: {e:#}");
            }
        }
        std::process::exit(130);
    });
    match installed {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("ctrl-c handler not installed: {e}");
            false
        }
    }
}

/// Owns the current session and the playlist swap state of the interactive loop.
struct Controller {
    config: PipelineConfig,
    shuffle: bool,
    events: Sender<PlayerEvent>,
    status: Arc<Mutex<SessionStatus>>,
    current: CurrentSession,
    swap_tx: Sender<PendingSwap>,
    swap_pending: bool,
}

impl Controller {
    fn handle(&mut self, cmd: UserCommand) {
        match cmd {
            UserCommand::Play | UserCommand::Pause => {
                let guard = self.current.lock().unwrap();
                let Some(session) = guard.as_ref() else {
                    println!("no playlist loaded yet");
                    return;
                };
                if cmd == UserCommand::Play {
                    session.play();
                } else {
                    session.pause();
                    println!("pausing after the current clip");
                }
            }
            UserCommand::Info => self.print_info(),
            UserCommand::Load(path) => self.load(&path),
            UserCommand::Help => print_help(),
            UserCommand::Quit => {}
        }
    }

    fn print_info(&self) {
        let live = self
            .current
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| (s.state(), s.elapsed_seconds()));
        let snap = {
            let mut s = self.status.lock().unwrap();
            if let Some((state, elapsed)) = live {
                s.set_state(state);
                s.elapsed_secs = elapsed;
            }
            s.snapshot()
        };
        print_snapshot(&snap);
    }

    fn load(&mut self, path: &Path) {
        let has_current = self.current.lock().unwrap().is_some();
        let action = load_action(has_current, self.swap_pending);
        if action == LoadAction::Reject {
            println!("a playlist change is already waiting for the current clip");
            return;
        }

        let playlist = match Playlist::load(path) {
            Ok(p) => p,
            Err(e) => {
                println!("cannot load {}: {e:#}", path.display());
                return;
            }
        };

        if action == LoadAction::StartNow {
            self.install(playlist, false);
            return;
        }

        let Some(previous) = self.current.lock().unwrap().take() else {
            self.install(playlist, false);
            return;
        };
        let resume = !previous.is_paused();
        println!("loading \"{}\" after the current clip", playlist.name);
        self.swap_pending = true;
        let tx = self.swap_tx.clone();
        let pending = PendingSwap { playlist, resume };
        if let Err(e) = previous.unload(true, move || {
            let _ = tx.send(pending);
        }) {
            tracing::error!("previous playlist ended with an error: {e:#}");
        }
    }

    fn finish_swap(&mut self, swap: PendingSwap) {
        self.swap_pending = false;
        self.install(swap.playlist, swap.resume);
    }

    /// Start `playlist` as the current session, unloading whatever it replaces.
    fn install(&mut self, playlist: Playlist, resume: bool) {
        let replaced = self.current.lock().unwrap().take();
        if let Some(replaced) = replaced {
            if let Err(e) = replaced.unload(false, || {}) {
                tracing::error!("replaced playlist ended with an error: {e:#}");
            }
        }
        match self.start_session(playlist) {
            Ok(session) => {
                if resume {
                    session.play();
                }
                *self.current.lock().unwrap() = Some(session);
            }
            Err(e) => {
                tracing::error!("playlist start failed: {e:#}");
                println!("could not start playlist: {e:#}");
            }
        }
    }

    fn start_session(&self, playlist: Playlist) -> Result<SamplerSession> {
        let name = playlist.name.clone();
        let tracks = playlist.into_previewable(self.shuffle);
        self.status.lock().unwrap().reset(tracks.len());
        let session = SamplerSession::start(
            self.config.clone(),
            tracks,
            Collaborators::from_config(&self.config),
            self.events.clone(),
        )?;
        println!(
            "loaded \"{name}\": {} previewable tracks",
            session.expected_tracks()
        );
        Ok(session)
    }

    fn shutdown(self) -> Result<()> {
        let session = self.current.lock().unwrap().take();
        if let Some(session) = session {
            session.unload(false, || {})?;
        }
        Ok(())
    }
}

fn spawn_event_printer(rx: Receiver<PlayerEvent>, status: Arc<Mutex<SessionStatus>>) {
    let spawned = thread::Builder::new()
        .name("sampler-events".to_string())
        .spawn(move || {
            for event in rx {
                let mut s = status.lock().unwrap();
                s.apply(&event);
                match &event {
                    PlayerEvent::TrackStarted { track } => println!(
                        "[{}/{}] {}",
                        s.track_number,
                        s.playlist_total,
                        track.display_name()
                    ),
                    PlayerEvent::StageFailed { stage, error } => {
                        println!("{stage} stopped: {error}; clips already prepared keep playing")
                    }
                    _ => {}
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("event printer unavailable: {e}");
    }
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn print_snapshot(snap: &sampler_types::SessionSnapshot) {
    let state = match snap.state {
        PlaybackState::Playing => "playing",
        PlaybackState::Paused => "paused",
        PlaybackState::Stopped => "stopped",
    };
    match &snap.now_playing {
        Some(track) => println!(
            "{state}: [{}/{}] {} ({}s)",
            snap.track_number,
            snap.playlist_total,
            track.display_name(),
            snap.elapsed_secs
        ),
        None => println!("{state}: nothing playing ({} tracks queued)", snap.playlist_total),
    }
    println!("played so far: {}", snap.played.len());
    if let Some(fault) = &snap.fault {
        println!("pipeline error: {fault}");
    }
}

fn print_help() {
    println!("commands: p = play, s = pause, l <manifest> = load playlist, i = info, q = quit");
}
