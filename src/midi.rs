use midir::{Ignore, MidiInput, MidiInputConnection, MidiInputPort};

use crate::error::{Error, Result};

const CLIENT_NAME: &str = "pianolight";

/// Names of the available MIDI inputs, in port order.
pub fn list_ports() -> Result<Vec<String>> {
    let midi_in = MidiInput::new(CLIENT_NAME)?;
    Ok(midi_in
        .ports()
        .iter()
        .map(|port| midi_in.port_name(port).unwrap_or_default())
        .collect())
}

/// Picks a port by index or by a case-insensitive name substring; the first
/// port when nothing is requested.
fn select_port(midi_in: &MidiInput, wanted: Option<&str>) -> Result<(MidiInputPort, String)> {
    let ports = midi_in.ports();
    let named: Vec<(MidiInputPort, String)> = ports
        .into_iter()
        .map(|port| {
            let name = midi_in.port_name(&port).unwrap_or_default();
            (port, name)
        })
        .collect();

    let found = match wanted {
        None => named.into_iter().next(),
        Some(wanted) => match wanted.trim().parse::<usize>() {
            Ok(index) => named.into_iter().nth(index),
            Err(_) => {
                let needle = wanted.to_lowercase();
                named
                    .into_iter()
                    .find(|(_, name)| name.to_lowercase().contains(&needle))
            }
        },
    };
    found.ok_or_else(|| Error::MidiPortNotFound(wanted.unwrap_or("<any>").to_string()))
}

/// Open MIDI input. Messages are delivered on midir's thread until the
/// listener is dropped or closed.
pub struct MidiListener {
    port_name: String,
    connection: Option<MidiInputConnection<()>>,
}

impl MidiListener {
    pub fn connect<F>(port: Option<&str>, mut on_message: F) -> Result<Self>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let mut midi_in = MidiInput::new(CLIENT_NAME)?;
        midi_in.ignore(Ignore::All);
        let (port, port_name) = select_port(&midi_in, port)?;

        let connection = midi_in
            .connect(
                &port,
                "pianolight-input",
                move |_timestamp, message, _| on_message(message),
                (),
            )
            .map_err(|err| Error::MidiConnect {
                port: port_name.clone(),
                message: err.to_string(),
            })?;

        tracing::info!(port = %port_name, "MIDI input connected");
        Ok(Self {
            port_name,
            connection: Some(connection),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            tracing::info!(port = %self.port_name, "MIDI input closed");
        }
    }
}

impl Drop for MidiListener {
    fn drop(&mut self) {
        self.close();
    }
}
