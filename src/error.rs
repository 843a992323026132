use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The DMX interface could not be opened.
    #[error("DMX hardware unavailable at {port}: {source}")]
    HardwareUnavailable {
        port: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("DMX transport write failed: {0}")]
    Transport(#[source] std::io::Error),

    #[error("unknown device `{0}`")]
    UnknownDevice(String),

    #[error("invalid device description `{0}`, expected id:channel[:normal|highlight]")]
    InvalidDevice(String),

    #[error("unknown color scheme `{0}`")]
    UnknownScheme(String),

    #[error("failed to create MIDI input: {0}")]
    MidiInit(#[from] midir::InitError),

    #[error("no MIDI input port matching `{0}`")]
    MidiPortNotFound(String),

    #[error("failed to connect to MIDI port `{port}`: {message}")]
    MidiConnect { port: String, message: String },

    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },

    #[error("failed to serialize config: {0}")]
    ConfigWrite(#[from] ron::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
