use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::{self, LightingConfig};
use crate::error::{Error, Result};
use crate::lighting::{
    ColorScheme, Device, DeviceMode, DmxTransport, FrameSink, FrameWriter, Hsv, Rgb,
};
use crate::session::PerformanceSignals;

/// Highest start channel that still leaves room for R, G and B.
pub const MAX_START_CHANNEL: u16 = 510;

struct EngineShared {
    devices: Mutex<BTreeMap<String, Device>>,
    sink: FrameSink,
    signals: PerformanceSignals,
    config: LightingConfig,
    active: AtomicBool,
}

impl EngineShared {
    fn with_device<R>(&self, id: &str, f: impl FnOnce(&Device) -> R) -> Result<R> {
        let devices = self.devices.lock();
        let device = devices
            .get(id)
            .ok_or_else(|| Error::UnknownDevice(id.to_string()))?;
        Ok(f(device))
    }
}

/// Fixture registry plus the loops that turn published mood and highlight
/// signals into color targets.
pub struct LightingEngine {
    shared: Arc<EngineShared>,
    writer: Mutex<Option<FrameWriter>>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    broadcasters: Mutex<Vec<JoinHandle<()>>>,
}

impl LightingEngine {
    pub fn start(
        transport: Box<dyn DmxTransport>,
        signals: PerformanceSignals,
        config: LightingConfig,
    ) -> Result<Self> {
        let writer = FrameWriter::spawn(transport)?;
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);
        let shared = Arc::new(EngineShared {
            devices: Mutex::new(BTreeMap::new()),
            sink: writer.sink(),
            signals,
            config,
            active: AtomicBool::new(true),
        });

        let engine = Self {
            shared: shared.clone(),
            writer: Mutex::new(Some(writer)),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            broadcasters: Mutex::new(Vec::new()),
        };

        let mood_shared = shared.clone();
        let mood_shutdown = shutdown_rx.clone();
        let handle = thread::Builder::new()
            .name("mood-broadcast".into())
            .spawn(move || mood_broadcaster(mood_shared, mood_shutdown))?;
        engine.broadcasters.lock().push(handle);

        let handle = thread::Builder::new()
            .name("highlight-broadcast".into())
            .spawn(move || highlight_broadcaster(shared, shutdown_rx))?;
        engine.broadcasters.lock().push(handle);

        tracing::info!("lighting engine started");
        Ok(engine)
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Registers a fixture. Fails without side effects when the id or the
    /// start channel is taken, the channel is out of range, or the engine is
    /// shut down.
    pub fn add_device(&self, id: &str, start_channel: u16, mode: DeviceMode) -> bool {
        if !(1..=MAX_START_CHANNEL).contains(&start_channel) {
            tracing::warn!(id, start_channel, "start channel out of range");
            return false;
        }

        let mut devices = self.shared.devices.lock();
        if !self.is_active() {
            return false;
        }
        if devices.contains_key(id) {
            tracing::warn!(id, "device id already registered");
            return false;
        }
        if let Some(other) = devices.values().find(|d| d.start_channel() == start_channel) {
            tracing::warn!(id, start_channel, taken_by = other.id(), "start channel in use");
            return false;
        }

        match Device::spawn(
            id,
            start_channel,
            mode,
            self.shared.sink.clone(),
            &self.shared.config,
        ) {
            Ok(device) => {
                devices.insert(id.to_string(), device);
                true
            }
            Err(err) => {
                tracing::warn!(id, %err, "failed to start device");
                false
            }
        }
    }

    /// Stops the fixture's actors, sets it to black and frees its id and
    /// channel.
    pub fn remove_device(&self, id: &str) -> Result<()> {
        let mut device = self
            .shared
            .devices
            .lock()
            .remove(id)
            .ok_or_else(|| Error::UnknownDevice(id.to_string()))?;
        device.request_stop();
        device.join();
        self.shared.sink.write(device.start_channel(), Rgb::BLACK);
        tracing::info!(id, "device removed");
        Ok(())
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.shared.devices.lock().keys().cloned().collect()
    }

    pub fn device_mode(&self, id: &str) -> Result<DeviceMode> {
        self.shared.with_device(id, Device::mode)
    }

    pub fn set_color_scheme(&self, id: &str, scheme: ColorScheme) -> Result<()> {
        self.shared.with_device(id, |d| d.set_scheme(scheme))
    }

    pub fn update_colors(&self, id: &str, highlight: Rgb, low: Rgb, high: Rgb) -> Result<()> {
        self.set_color_scheme(id, ColorScheme::from_rgb(highlight, low, high))
    }

    pub fn highlight_color(&self, id: &str) -> Result<Hsv> {
        self.shared.with_device(id, |d| d.scheme().highlight)
    }

    /// Low and high mood anchors.
    pub fn mood_colors(&self, id: &str) -> Result<(Hsv, Hsv)> {
        self.shared.with_device(id, |d| {
            let scheme = d.scheme();
            (scheme.low, scheme.high)
        })
    }

    pub fn current_color(&self, id: &str) -> Result<Hsv> {
        self.shared.with_device(id, Device::current)
    }

    pub fn set_target(&self, id: &str, target: Hsv, duration: Duration) -> Result<()> {
        self.shared
            .with_device(id, |d| d.set_target(target, duration))
    }

    /// Stops every loop and actor, forces all fixtures to black and closes
    /// the transport. Later calls do nothing.
    pub fn shutdown(&self) {
        let Some(shutdown_tx) = self.shutdown_tx.lock().take() else {
            return;
        };
        self.shared.active.store(false, Ordering::Release);
        drop(shutdown_tx);

        for handle in self.broadcasters.lock().drain(..) {
            if handle.join().is_err() {
                tracing::warn!("broadcaster panicked");
            }
        }

        let mut devices: Vec<Device> = std::mem::take(&mut *self.shared.devices.lock())
            .into_values()
            .collect();
        for device in &devices {
            device.request_stop();
        }
        for device in &mut devices {
            device.join();
        }
        for device in &devices {
            self.shared.sink.write(device.start_channel(), Rgb::BLACK);
        }

        if let Some(mut writer) = self.writer.lock().take() {
            if !writer.flush(config::seconds(self.shared.config.settle)) {
                tracing::debug!("frames still queued after settle time");
            }
            writer.close();
        }
        tracing::info!(devices = devices.len(), "lighting engine stopped");
    }
}

impl Drop for LightingEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn mood_broadcaster(shared: Arc<EngineShared>, shutdown: Receiver<()>) {
    let fade = config::seconds(shared.config.mood_fade);
    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(shared.signals.mood_updated().receiver()) -> _ => {}
        }
        if !shared.active.load(Ordering::Acquire) {
            break;
        }
        let Some(mood) = shared.signals.mood() else {
            continue;
        };

        let devices = shared.devices.lock();
        for device in devices.values().filter(|d| d.mode() == DeviceMode::Normal) {
            let color = device.scheme().mood_color(
                mood,
                shared.config.value_scale,
                shared.config.value_offset,
            );
            device.set_target(color, fade);
        }
    }
}

fn highlight_broadcaster(shared: Arc<EngineShared>, shutdown: Receiver<()>) {
    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(shared.signals.highlighted().receiver()) -> _ => {}
        }
        if !shared.active.load(Ordering::Acquire) {
            break;
        }

        let bpm = shared.signals.bpm();
        let devices = shared.devices.lock();
        for device in devices
            .values()
            .filter(|d| d.mode() == DeviceMode::Highlight)
        {
            device.trigger_pulse(bpm);
        }
    }
}
