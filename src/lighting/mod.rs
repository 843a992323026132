mod color;
mod device;
mod transport;

pub use color::{Hsv, Rgb};
pub use device::{ColorScheme, Device, DeviceMode, FadeCommand, PulseCommand};
pub use transport::{
    DmxTransport, EnttecProTransport, FrameSink, FrameWriter, NullTransport, UNIVERSE_SIZE,
    WriterCommand,
};
