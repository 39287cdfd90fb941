//! Sonance Play - headless demo player
//!
//! Builds the demo scene, opens the output device and plays it through the
//! processing chain while printing the playback position.
//!
//! ## Command line flags
//!
//! - `--loop`: Loop the selection (or the whole scene)
//! - `--select START:END`: Play only this range (seconds)
//! - `--stretch RATIO`: Time-stretch ratio (2.0 = half speed)
//! - `--delay`: Put a delay on the output
//! - `--seconds N`: Stop after N seconds (default: until the scene ends)
//! - `--config PATH`: Config file (default: `{config_dir}/sonance/play.yaml`)
//! - `--list-devices`: Print output devices and exit

mod scene;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use sonance_core::audio::{get_output_devices, start_output, AudioConfig};
use sonance_core::chain::{build_chain, StretchConfig};
use sonance_core::config::{default_config_path, load_config, EngineConfig};
use sonance_core::effect::native::DelayEffect;
use sonance_core::engine::{PlaybackContext, PlaybackEvent, PlaybackSource};
use sonance_core::selection::{Selection, SelectionState};
use sonance_core::{frames_to_seconds, seconds_to_frames};

/// Position print interval
const REPORT_INTERVAL: Duration = Duration::from_millis(250);

/// Contents of `play.yaml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct PlayConfig {
    engine: EngineConfig,
    audio: AudioConfig,
}

#[derive(Debug, Default)]
struct Args {
    looping: bool,
    select: Option<(f64, f64)>,
    stretch: Option<f64>,
    delay: bool,
    seconds: Option<f64>,
    config: Option<PathBuf>,
    list_devices: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--loop" => args.looping = true,
            "--delay" => args.delay = true,
            "--list-devices" => args.list_devices = true,
            "--select" => {
                let value = iter.next().context("--select needs START:END")?;
                let (start, end) = value
                    .split_once(':')
                    .context("--select expects START:END in seconds")?;
                args.select = Some((start.parse()?, end.parse()?));
            }
            "--stretch" => {
                let value = iter.next().context("--stretch needs a ratio")?;
                args.stretch = Some(value.parse()?);
            }
            "--seconds" => {
                let value = iter.next().context("--seconds needs a number")?;
                args.seconds = Some(value.parse()?);
            }
            "--config" => {
                let value = iter.next().context("--config needs a path")?;
                args.config = Some(PathBuf::from(value));
            }
            other => bail!("Unknown argument: {}", other),
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    let args = parse_args()?;

    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if args.list_devices {
        for device in get_output_devices()? {
            println!("{}", device);
        }
        return Ok(());
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| default_config_path("play.yaml"));
    let config: PlayConfig = load_config(&config_path);

    log::info!("sonance-play starting up");

    let scene = scene::build();
    let selection = Arc::new(SelectionState::new());
    if let Some((start, end)) = args.select {
        let rate = scene::SAMPLE_RATE;
        selection.set_selections([Selection::new(
            seconds_to_frames(start, rate) as u64,
            seconds_to_frames(end, rate) as u64,
        )]);
        selection.set_play_selection_mode(true);
    }
    selection.set_play_loop_mode(args.looping);

    let context = PlaybackContext::new(scene.models.clone(), selection.clone())
        .with_params(scene.params.clone());
    let (source, output) = PlaybackSource::new(context, &config.engine)?;
    for id in &scene.ids {
        let role = source.add_model(*id)?;
        log::info!("Added {} as {:?}", id, role);
    }

    let chain = build_chain(
        Box::new(output),
        config.engine.chain_order,
        StretchConfig {
            ratio: args.stretch.unwrap_or(config.engine.default_stretch_ratio),
            quality: config.engine.stretch_quality,
        },
        Some(source.event_sender()),
    );
    let stretch = chain.stretch.clone();
    let effect = chain.effect.clone();

    let audio_config = AudioConfig {
        channels: Some(source.target_channel_count() as u16),
        ..config.audio.clone()
    };
    let handle = start_output(&audio_config, chain.source)?;
    println!(
        "Playing on {} ({} ch, {} Hz, {:.1} ms), stretch {:.2}",
        handle.device_name(),
        handle.channel_count(),
        handle.sample_rate(),
        handle.latency_ms(),
        stretch.ratio()
    );

    if args.delay {
        effect.set_effect(Box::new(DelayEffect::new(handle.channel_count() as usize)));
    }

    let events = source.events();
    let started = Instant::now();
    source.play(0)?;

    loop {
        std::thread::sleep(REPORT_INTERVAL);

        for event in events.try_iter() {
            match event {
                PlaybackEvent::PlayStatusChanged(playing) => {
                    log::info!("Playback {}", if playing { "started" } else { "stopped" })
                }
                PlaybackEvent::ChannelCountIncreased(channels) => log::warn!(
                    "Scene now needs {} channels, restart to hear all of them",
                    channels
                ),
                PlaybackEvent::SampleRateMismatch {
                    model,
                    requested,
                    available,
                } => log::warn!(
                    "Sample rate mismatch ({:?}): {} Hz requested, {} Hz available",
                    model,
                    requested,
                    available
                ),
                PlaybackEvent::EffectFailed { name } => log::error!("Effect {} disabled", name),
            }
        }

        let frame = source.current_playing_frame();
        let levels = source.output_levels();
        let peak = levels.iter().fold(0.0f32, |p, l| p.max(*l));
        println!(
            "{:>8.3}s  frame {:>8}  peak {:.2}",
            frames_to_seconds(frame as f64, scene::SAMPLE_RATE),
            frame,
            peak
        );

        let elapsed = started.elapsed().as_secs_f64();
        if args.seconds.is_some_and(|limit| elapsed >= limit) {
            source.stop();
            break;
        }
        if !source.is_playing() {
            break;
        }
    }

    drop(handle);
    log::info!("sonance-play finished");
    Ok(())
}
