/// Controller number of the sustain (damper) pedal.
pub const SUSTAIN_CONTROLLER: u8 = 64;

/// A performance event decoded from a raw MIDI message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceEvent {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    PedalOn,
    PedalOff,
}

/// A decoded event with the session time it was received at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedEvent {
    pub timestamp: f64,
    pub event: PerformanceEvent,
}

impl PerformanceEvent {
    /// Decodes a raw message. Returns `None` for anything that is not a note
    /// or sustain-pedal message.
    pub fn decode(msg: &[u8]) -> Option<Self> {
        if msg.len() < 3 {
            return None;
        }
        let status = msg[0] & 0xF0;
        let data1 = msg[1] & 0x7F;
        let data2 = msg[2] & 0x7F;

        match status {
            0x90 if data2 > 0 => Some(Self::NoteOn {
                note: data1,
                velocity: data2,
            }),
            0x80 | 0x90 => Some(Self::NoteOff { note: data1 }),
            0xB0 if data1 == SUSTAIN_CONTROLLER => {
                if data2 != 0 {
                    Some(Self::PedalOn)
                } else {
                    Some(Self::PedalOff)
                }
            }
            _ => None,
        }
    }
}
