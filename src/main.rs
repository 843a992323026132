use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use clap::builder::PossibleValuesParser;
use pianolight::config::DmxConfig;
use pianolight::events::PerformanceEvent;
use pianolight::lighting::{
    ColorScheme, DeviceMode, DmxTransport, EnttecProTransport, NullTransport,
};
use pianolight::{Config, Error, LightingEngine, PerformanceSession, Result, config, midi};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    if cli.list_ports {
        for (index, name) in midi::list_ports()?.iter().enumerate() {
            println!("{index}: {name}");
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) if path.exists() => Config::load(path)?,
        Some(path) => {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            Config::default()
        }
        None => Config::default(),
    };
    if let Some(port) = cli.port {
        config.midi.port = Some(port);
    }
    if let Some(dmx) = cli.dmx {
        config.dmx.port = dmx;
    }

    if cli.dump_config {
        println!("{}", config.to_ron()?);
        return Ok(());
    }

    let scheme = cli.scheme.as_deref().map(ColorScheme::preset).transpose()?;
    run(config, &cli.devices, scheme)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

fn run(config: Config, devices: &[DeviceSpec], scheme: Option<ColorScheme>) -> Result<()> {
    let transport = open_transport(&config.dmx)?;
    let session = Arc::new(PerformanceSession::start(&config)?);
    let engine = LightingEngine::start(transport, session.signals(), config.lighting.clone())?;

    for device in devices {
        if !engine.add_device(&device.id, device.channel, device.mode) {
            tracing::warn!(id = %device.id, channel = device.channel, "device rejected");
            continue;
        }
        if let Some(scheme) = scheme {
            engine.set_color_scheme(&device.id, scheme)?;
            if device.mode == DeviceMode::Normal {
                engine.set_target(
                    &device.id,
                    scheme.resting(),
                    config::seconds(config.lighting.startup_fade),
                )?;
            }
        }
    }

    let input = session.clone();
    let end_note = config.midi.end_note;
    let session_log = config.midi.session_log.clone();
    let mut listener = midi::MidiListener::connect(config.midi.port.as_deref(), move |message| {
        let Some(PerformanceEvent::NoteOn { note, .. }) = input.handle_raw(message) else {
            return;
        };
        if Some(note) != end_note {
            return;
        }
        match input.finish_take(session_log.as_deref()) {
            Ok(true) => tracing::info!("take finished"),
            Ok(false) => tracing::debug!("end note before any tempo estimate"),
            Err(err) => tracing::warn!(%err, "failed to write session record"),
        }
    })?;

    println!("Listening on {}. Press Enter to stop.", listener.port_name());
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;

    listener.close();
    engine.shutdown();
    session.shutdown();
    Ok(())
}

fn open_transport(dmx: &DmxConfig) -> Result<Box<dyn DmxTransport>> {
    match EnttecProTransport::open(&dmx.port) {
        Ok(transport) => {
            tracing::info!(port = %transport.port().display(), "DMX output open");
            Ok(Box::new(transport))
        }
        Err(err) if dmx.allow_missing_hardware => {
            tracing::warn!(%err, "running without DMX output");
            Ok(Box::new(NullTransport::new()))
        }
        Err(err) => Err(err),
    }
}

#[derive(Debug, Clone)]
struct DeviceSpec {
    id: String,
    channel: u16,
    mode: DeviceMode,
}

fn parse_device(s: &str) -> std::result::Result<DeviceSpec, String> {
    let invalid = || Error::InvalidDevice(s.to_string()).to_string();
    let mut parts = s.split(':');
    let id = parts.next().filter(|id| !id.is_empty()).ok_or_else(invalid)?;
    let channel = parts
        .next()
        .and_then(|channel| channel.parse().ok())
        .ok_or_else(invalid)?;
    let mode = match parts.next() {
        Some(mode) => mode.parse().map_err(|_| invalid())?,
        None => DeviceMode::Normal,
    };
    if parts.next().is_some() {
        return Err(invalid());
    }
    Ok(DeviceSpec {
        id: id.to_string(),
        channel,
        mode,
    })
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Ambient DMX lighting driven by a live piano",
    long_about = None
)]
struct Cli {
    /// RON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MIDI input port, by index or part of its name.
    #[arg(short, long)]
    port: Option<String>,

    /// Device node of the DMX interface.
    #[arg(long)]
    dmx: Option<PathBuf>,

    /// Fixture as `id:channel[:normal|highlight]`. Repeatable.
    #[arg(short, long = "device", value_parser = parse_device)]
    devices: Vec<DeviceSpec>,

    /// Color scheme preset for every fixture.
    #[arg(
        short,
        long,
        ignore_case = true,
        value_parser = PossibleValuesParser::new(ColorScheme::preset_names())
    )]
    scheme: Option<String>,

    /// List MIDI input ports and exit.
    #[arg(long)]
    list_ports: bool,

    /// Print the effective configuration and exit.
    #[arg(long)]
    dump_config: bool,
}
