use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam::channel::RecvTimeoutError;
use luma::{
    CompiledTrack, EngineCommand, EngineUpdate, Instrument, InstrumentFactory, LogInstrument, Song,
    spawn_engine,
};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use tracing_subscriber::EnvFilter;

/// Plays a generative song file, logging every note event.
#[derive(Parser)]
#[command(name = "luma")]
#[command(version)]
struct Cli {
    /// Song file (RON)
    song: PathBuf,

    /// Reload the song whenever the file changes
    #[arg(short, long)]
    watch: bool,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// Override the song tempo
    #[arg(long)]
    bpm: Option<f32>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("luma=info")),
        )
        .init();

    let cli = Cli::parse();

    let instruments: InstrumentFactory =
        Box::new(|track: &CompiledTrack| -> Box<dyn Instrument> {
            Box::new(LogInstrument::new(format!("{}:{}", track.name, track.instrument)))
        });
    let engine = spawn_engine(instruments);

    engine.send(EngineCommand::LoadSong(cli.song.clone()))?;
    if let Some(bpm) = cli.bpm {
        engine.send(EngineCommand::SetTempo(bpm))?;
    }
    engine.send(EngineCommand::Play)?;

    let _watcher = if cli.watch {
        let command_tx = engine.command_tx.clone();
        let path = cli.song.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) if event.kind.is_modify() => match Song::load(&path) {
                    Ok(song) => {
                        tracing::info!(path = %path.display(), "song changed, reloading");
                        let _ = command_tx.send(EngineCommand::ReloadSong(song));
                    }
                    Err(e) => tracing::warn!(error = %e, "could not reload song"),
                },
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "watch error"),
            },
            Config::default(),
        )?;
        watcher.watch(&cli.song, RecursiveMode::NonRecursive)?;
        Some(watcher)
    } else {
        None
    };

    let deadline = cli
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    loop {
        let update = match deadline {
            Some(deadline) => match engine.update_rx.recv_deadline(deadline) {
                Ok(update) => update,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match engine.update_rx.recv() {
                Ok(update) => update,
                Err(_) => break,
            },
        };

        match update {
            EngineUpdate::SongLoaded { name, tracks } => {
                tracing::info!(song = %name, ?tracks, "ready");
            }
            EngineUpdate::PlaybackState { playing } => tracing::info!(playing, "playback"),
            EngineUpdate::Error { message } => tracing::error!(%message, "engine error"),
        }
    }

    engine.send(EngineCommand::Stop)?;
    engine.shutdown();
    Ok(())
}
