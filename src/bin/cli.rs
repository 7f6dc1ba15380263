use std::env;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crabavatar::animation::{AvatarRig, FaceChannel, LogFlash, MorphMesh};
use crabavatar::testing::{RecordingMesh, ScriptedMagnitudes};
use crabavatar::AvatarConfig;

const USAGE: &str = "Usage: crabavatar-cli <command> [args]

Commands:
  info                          crate and feature information
  config [--path <file>]        print the effective configuration
  lipsync-trace [--frames <n>]  mouth values for synthetic speech
  blink-trace [--ms <n>]        blink channel values over time
  emoji-trace <emoji> [--ms <n>]
  mic-trace [--frames <n>]      mouth values from the microphone (audio feature)
  call [room]                   join a room and call the other member (webrtc feature)

Common flags: --json, --fps <f>, --seed <n>";

fn main() -> Result<()> {
    crabavatar::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    let opts = Options::parse(&args[2..])?;
    match args[1].as_str() {
        "info" => cmd_info(&opts),
        "config" => cmd_config(&opts),
        "lipsync-trace" => cmd_lipsync_trace(&opts),
        "blink-trace" => cmd_blink_trace(&opts),
        "emoji-trace" => cmd_emoji_trace(&opts),
        #[cfg(feature = "audio")]
        "mic-trace" => cmd_mic_trace(&opts),
        #[cfg(feature = "webrtc")]
        "call" => cmd_call(&opts),
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(1);
        }
    }
}

struct Options {
    positional: Vec<String>,
    json: bool,
    frames: u64,
    duration_ms: u64,
    fps: f64,
    seed: u64,
    config_path: Option<String>,
}

impl Options {
    fn parse(args: &[String]) -> Result<Self> {
        let mut opts = Options {
            positional: Vec::new(),
            json: false,
            frames: 120,
            duration_ms: 10_000,
            fps: 60.0,
            seed: 7,
            config_path: None,
        };

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let mut value = |flag: &str| {
                iter.next()
                    .cloned()
                    .with_context(|| format!("{} needs a value", flag))
            };
            match arg.as_str() {
                "--json" => opts.json = true,
                "--frames" => opts.frames = value("--frames")?.parse()?,
                "--ms" => opts.duration_ms = value("--ms")?.parse()?,
                "--fps" => opts.fps = value("--fps")?.parse()?,
                "--seed" => opts.seed = value("--seed")?.parse()?,
                "--path" => opts.config_path = Some(value("--path")?),
                _ => opts.positional.push(arg.clone()),
            }
        }
        if !(opts.fps > 0.0) {
            bail!("--fps must be positive");
        }
        Ok(opts)
    }

    fn config(&self) -> Result<AvatarConfig> {
        let path = self
            .config_path
            .clone()
            .map(Into::into)
            .unwrap_or_else(AvatarConfig::default_path);
        Ok(AvatarConfig::load_layered(path)?)
    }

    fn frame_ms(&self, frame: u64) -> u64 {
        (frame as f64 * 1000.0 / self.fps).round() as u64
    }
}

#[derive(Serialize)]
struct TraceHeader<'a> {
    command: &'a str,
    generated_at: String,
    fps: f64,
}

#[derive(Serialize)]
struct TraceRow {
    t_ms: u64,
    mouth_open: f32,
    blink_left: f32,
    blink_right: f32,
    smile: f32,
}

impl TraceRow {
    fn sample(rig: &AvatarRig, t_ms: u64) -> Self {
        Self {
            t_ms,
            mouth_open: rig.value(FaceChannel::MouthOpen),
            blink_left: rig.value(FaceChannel::BlinkLeft),
            blink_right: rig.value(FaceChannel::BlinkRight),
            smile: rig.value(FaceChannel::Smile),
        }
    }
}

struct Trace<'a> {
    opts: &'a Options,
}

impl<'a> Trace<'a> {
    fn begin(opts: &'a Options, command: &str) -> Result<Self> {
        if opts.json {
            let header = TraceHeader {
                command,
                generated_at: chrono::Utc::now().to_rfc3339(),
                fps: opts.fps,
            };
            println!("{}", serde_json::to_string(&header)?);
        } else {
            println!("{:>8} {:>6} {:>6} {:>6} {:>6}", "t_ms", "mouth", "blinkL", "blinkR", "smile");
        }
        Ok(Self { opts })
    }

    fn row(&self, rig: &AvatarRig, t_ms: u64) -> Result<()> {
        let row = TraceRow::sample(rig, t_ms);
        if self.opts.json {
            println!("{}", serde_json::to_string(&row)?);
        } else {
            println!(
                "{:>8} {:>6.3} {:>6.3} {:>6.3} {:>6.3}",
                row.t_ms, row.mouth_open, row.blink_left, row.blink_right, row.smile
            );
        }
        Ok(())
    }
}

/// A rig over a single mesh exposing the canonical target names.
///
/// The driver only holds weak references, so the caller keeps the mesh alive.
fn demo_rig(config: &AvatarConfig, seed: u64) -> (AvatarRig, Arc<dyn MorphMesh>) {
    let mesh: Arc<dyn MorphMesh> = Arc::new(RecordingMesh::new(&[
        "mouthOpen",
        "Blink_Left",
        "Blink_Right",
        "Smile",
    ]));
    let rig = AvatarRig::with_seed(config, std::slice::from_ref(&mesh), seed, Box::new(LogFlash));
    (rig, mesh)
}

fn cmd_info(opts: &Options) -> Result<()> {
    let info = crabavatar::get_info();
    if opts.json {
        println!("{}", serde_json::to_string(&info)?);
    } else {
        println!("{} {} ({})", info.name, info.version, info.platform);
        println!("{}", info.description);
        println!("features: {:?}", info.features);
    }
    Ok(())
}

fn cmd_config(opts: &Options) -> Result<()> {
    let config = opts.config()?;
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}

fn cmd_lipsync_trace(opts: &Options) -> Result<()> {
    let config = opts.config()?;
    let (mut rig, _mesh) = demo_rig(&config, opts.seed);
    let source = ScriptedMagnitudes::synthetic(opts.frames, 128);

    let trace = Trace::begin(opts, "lipsync-trace")?;
    rig.set_speaking(true, Some(Box::new(source)), 0);
    for frame in 0..opts.frames {
        let t = opts.frame_ms(frame);
        rig.tick(t);
        trace.row(&rig, t)?;
    }

    // Let the mouth settle after speech ends.
    let end = opts.frame_ms(opts.frames);
    rig.set_speaking(false, None, end);
    for frame in opts.frames..opts.frames + 30 {
        let t = opts.frame_ms(frame);
        rig.tick(t);
        trace.row(&rig, t)?;
    }
    Ok(())
}

fn cmd_blink_trace(opts: &Options) -> Result<()> {
    let config = opts.config()?;
    let (mut rig, _mesh) = demo_rig(&config, opts.seed);
    let trace = Trace::begin(opts, "blink-trace")?;

    rig.start_blinking(0);
    let mut frame = 0;
    let mut last_blink = -1.0f32;
    loop {
        let t = opts.frame_ms(frame);
        if t > opts.duration_ms {
            break;
        }
        rig.tick(t);
        let blink = rig.value(FaceChannel::BlinkLeft);
        if blink != last_blink {
            trace.row(&rig, t)?;
            last_blink = blink;
        }
        frame += 1;
    }
    rig.shutdown(opts.frame_ms(frame));

    if !opts.json {
        println!("blinks: {}", rig.blink().completed_blinks());
    }
    Ok(())
}

fn cmd_emoji_trace(opts: &Options) -> Result<()> {
    let symbol = opts
        .positional
        .first()
        .context("Usage: crabavatar-cli emoji-trace <emoji>")?;
    let config = opts.config()?;
    let (mut rig, _mesh) = demo_rig(&config, opts.seed);

    if !rig.react_emoji(symbol, 0) {
        bail!("No reaction mapped for {:?}", symbol);
    }

    let trace = Trace::begin(opts, "emoji-trace")?;
    let step = (opts.frame_ms(1)).max(1);
    let mut t = 0;
    while t <= opts.duration_ms {
        rig.tick(t);
        trace.row(&rig, t)?;
        t += step * 5;
    }
    Ok(())
}

#[cfg(feature = "audio")]
fn cmd_mic_trace(opts: &Options) -> Result<()> {
    use crabavatar::{FrameClock, MicrophoneSource};

    let config = opts.config()?;
    let (mut rig, _mesh) = demo_rig(&config, opts.seed);
    let mic = MicrophoneSource::start(opts.positional.first().map(String::as_str))?;

    let clock = FrameClock::new();
    let trace = Trace::begin(opts, "mic-trace")?;
    rig.set_speaking(true, Some(Box::new(mic)), clock.now_ms());

    let frame_time = std::time::Duration::from_secs_f64(1.0 / opts.fps);
    for _ in 0..opts.frames {
        std::thread::sleep(frame_time);
        let t = clock.now_ms();
        rig.tick(t);
        trace.row(&rig, t)?;
    }
    rig.shutdown(clock.now_ms());
    Ok(())
}

#[cfg(feature = "webrtc")]
fn cmd_call(opts: &Options) -> Result<()> {
    use crabavatar::{CallSession, RtcPeerConnector, WsConnector};

    let mut config = opts.config()?;
    if let Some(room) = opts.positional.first() {
        config.signaling.room = room.clone();
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let peers = Arc::new(RtcPeerConnector::new(&config.rtc));
        let mut session = CallSession::new(&config.signaling, Arc::new(WsConnector::new()), peers)?;

        let handle = session.handle();
        ctrlc::set_handler(move || {
            eprintln!("Hanging up...");
            handle.stop();
        })
        .context("Failed to install Ctrl-C handler")?;

        let mut states = session.subscribe();
        let json = opts.json;
        tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let state = *states.borrow_and_update();
                if json {
                    println!(
                        "{}",
                        serde_json::json!({ "state": state, "at": chrono::Utc::now().to_rfc3339() })
                    );
                } else {
                    println!("call: {}", state);
                }
            }
        });

        eprintln!("Joining {} (Ctrl-C to hang up)", session.url());
        session.start().await?;
        session.run().await?;
        Ok::<(), anyhow::Error>(())
    })
}
