use std::io::BufRead;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use clap::Parser;
use encore_core::{
    ConfigManager, ControlAction, CueConfig, CueKind, Engine, EngineEvent, FadeCurve, FadeSpec,
    MediaSource, ModuleHost, NextAction, RetriggerPolicy, Show, ShowCommand, ShowEvent,
    ShowRunner, SimulatedMedia, SystemClock, TimeCode, TriggerAction,
};
use tokio::sync::mpsc;

mod console;

/// Cue-based playback controller for live stage productions.
#[derive(Parser, Debug)]
#[command(name = "encore")]
#[command(about = "Encore show playback controller")]
struct Args {
    /// Settings file (default: <config dir>/encore/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured tick rate in Hz
    #[arg(long)]
    tick_rate: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    let mut config = ConfigManager::new(args.config.clone());
    let mut settings = config.load()?;
    if let Some(rate) = args.tick_rate {
        settings.tick_rate_hz = rate;
    }
    ConfigManager::validate_settings(&settings).map_err(|errors| anyhow!(errors.join("; ")))?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(settings.log_level.as_str()),
    )
    .init();
    log::info!("Settings loaded from {}", config.config_path().display());

    let show = demo_show();

    let mut host = ModuleHost::new(Box::new(SimulatedMedia::new()));
    host.initialize().await.map_err(|e| anyhow!("{}", e))?;
    let engine = Engine::with_options(
        Box::new(host.backend()),
        Box::new(SystemClock::new()),
        settings.engine_options(),
    );
    host.start(engine.handle()).map_err(|e| anyhow!("{}", e))?;
    let runner = ShowRunner::load(engine, &show, settings.clone())?.with_host(host);

    println!("Show: {} ({} cues)", show.name, show.cues.len());
    println!("{}", console::USAGE);

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let curve = settings.default_fade_curve.clone();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match console::parse_line(&line, &curve) {
                Ok(Some(command)) => {
                    let quit = matches!(command, ShowCommand::Shutdown);
                    if command_tx.send(command).is_err() || quit {
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => eprintln!("{}\n{}", e, console::USAGE),
            }
        }
        // End of input
        let _ = command_tx.send(ShowCommand::Shutdown);
    });

    let started = Instant::now();
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(&event, TimeCode::from_duration(started.elapsed(), 30));
        }
    });

    runner.run_with_channels(command_rx, event_tx).await?;
    printer.await?;
    Ok(())
}

fn print_event(event: &ShowEvent, at: TimeCode) {
    match event {
        ShowEvent::Engine(EngineEvent::CueStateChanged { id, old, new, .. }) => {
            println!("[{}] cue {}: {} -> {}", at, id, old, new)
        }
        ShowEvent::Engine(EngineEvent::CueEnded { id }) => println!("[{}] cue {} ended", at, id),
        ShowEvent::Engine(EngineEvent::PostWaitElapsed { id }) => {
            println!("[{}] cue {} post-wait elapsed", at, id)
        }
        ShowEvent::Engine(EngineEvent::RetriggerQueued { id }) => {
            println!("[{}] cue {} queued", at, id)
        }
        ShowEvent::Engine(EngineEvent::CueFailed { id, reason }) => {
            println!("[{}] cue {} FAILED: {}", at, id, reason)
        }
        ShowEvent::Engine(EngineEvent::CommandRejected { command, error }) => {
            println!("[{}] {:?} on {} rejected: {}", at, command.action, command.target, error)
        }
        ShowEvent::ActiveCues { cues } => {
            for cue in cues {
                let progress = cue
                    .progress
                    .map(|p| format!("{:>3.0}%", p * 100.0))
                    .unwrap_or_else(|| "   -".to_string());
                let level = cue
                    .level
                    .map(|l| format!("{:.2}", l))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "[{}]   {:>4} {:<24} {:<12} {} level {} ({:.1}s)",
                    at,
                    cue.id,
                    cue.name,
                    cue.state.to_string(),
                    progress,
                    level,
                    cue.elapsed.as_secs_f64()
                );
            }
        }
        ShowEvent::Cursor { index, next } => match next {
            Some(id) => println!("[{}] cursor at {} (next: cue {})", at, index, id),
            None => println!("[{}] cursor at {} (end of stack)", at, index),
        },
        ShowEvent::Registered { id } => println!("[{}] registered cue {}", at, id),
        ShowEvent::Unregistered { id } => println!("[{}] removed cue {}", at, id),
        ShowEvent::Error { message } => println!("[{}] error: {}", at, message),
        ShowEvent::ShutdownComplete => println!("[{}] shutdown complete", at),
    }
}

fn demo_show() -> Show {
    let secs = Duration::from_secs_f64;
    Show::new("Demo")
        .with_cue(
            CueConfig::media(1, "House music", MediaSource::new("audio/house.wav").with_duration(secs(20.0)))
                .with_fade_in(secs(3.0), FadeCurve::Logarithmic)
                .with_fade_out(secs(4.0), FadeCurve::QuadraticOut)
                .with_level(0.8)
                .with_retrigger(RetriggerPolicy::Restart),
        )
        .with_cue(CueConfig::new(
            2,
            "Duck house music",
            CueKind::Control(ControlAction::Fade {
                target: 1.into(),
                property: Default::default(),
                to: 0.3,
                fade: FadeSpec::new(secs(2.0), FadeCurve::SCurve),
            }),
        ))
        .with_cue(
            CueConfig::media(3, "Preshow announcement", MediaSource::new("audio/announce.wav").with_duration(secs(6.0)))
                .with_next_action(NextAction::TriggerAfterEnd),
        )
        .with_cue(
            CueConfig::media(4, "Thunder", MediaSource::new("sfx/thunder.wav").with_duration(secs(4.0)))
                .with_pre_wait(secs(1.5))
                .with_post_wait(secs(2.0))
                .with_next_action(NextAction::TriggerAfterWait),
        )
        .with_cue(
            CueConfig::media(5, "Rain loop", MediaSource::new("sfx/rain.wav"))
                .with_fade_in(secs(5.0), FadeCurve::SCurve)
                .with_fade_out(secs(3.0), FadeCurve::Linear)
                .with_retrigger(RetriggerPolicy::Queue),
        )
        .with_cue(CueConfig::new(
            6,
            "Storm",
            CueKind::Composite {
                children: vec![4.into(), 5.into()],
                action: TriggerAction::Start,
            },
        ))
        .with_cue(CueConfig::media(7, "Broken cable", MediaSource::new("fail:device unplugged")))
        .with_cue(CueConfig::new(
            8,
            "Blackout",
            CueKind::Control(ControlAction::StopAll { immediate: false }),
        ))
}
