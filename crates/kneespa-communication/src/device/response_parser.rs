//! KneeSpa Response Parser
//!
//! Decodes the report lines the rig's controller writes back:
//!
//! | Line | Event |
//! |---|---|
//! | `P<addr> <raw_position> [<raw_steps>]` | position report |
//! | `W<value>` | pressure report (lb) |
//! | `S<a> [<b> [<c> [<pressure>]]]` | status report |
//! | `G` | ready |
//! | `D` | done |
//! | `F<code>` | error |
//!
//! Reports may drop trailing fields; those are filled from the last reading
//! the parser has seen rather than zeroed.

use kneespa_core::{Actuator, CodecError, DeviceEvent};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default)]
struct StatusFields {
    a: i32,
    b: i32,
    c: i32,
    pressure: f64,
}

/// Stateful line decoder
#[derive(Debug, Default)]
pub struct ResponseParser {
    steps: HashMap<Actuator, i32>,
    status: StatusFields,
}

impl ResponseParser {
    /// Create a new parser with no remembered readings
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one line
    ///
    /// Blank lines yield `Ok(None)`.
    pub fn parse(&mut self, line: &str) -> Result<Option<DeviceEvent>, CodecError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let bad = |reason: &str| CodecError::malformed(line, reason);
        let mut chars = line.chars();
        let prefix = chars.next().ok_or_else(|| bad("empty line"))?;
        let body = chars.as_str();

        let event = match prefix {
            'G' if body.is_empty() => DeviceEvent::Ready,
            'D' if body.is_empty() => DeviceEvent::Done,
            'G' | 'D' => return Err(bad("unexpected payload")),
            'F' => DeviceEvent::Error {
                code: body.trim().parse().map_err(|_| bad("bad error code"))?,
            },
            'W' => {
                let value: f64 = body.trim().parse().map_err(|_| bad("bad pressure"))?;
                if !value.is_finite() {
                    return Err(bad("bad pressure"));
                }
                self.status.pressure = value;
                DeviceEvent::PressureReport { value }
            }
            'P' => self.parse_position(body).map_err(|reason| bad(reason))?,
            'S' => self.parse_status(body).map_err(|reason| bad(reason))?,
            _ => return Err(bad("unknown prefix")),
        };

        Ok(Some(event))
    }

    fn parse_position(&mut self, body: &str) -> Result<DeviceEvent, &'static str> {
        let fields: Vec<&str> = body.split_whitespace().collect();
        let (address, position, steps) = match fields.as_slice() {
            [address, position] => (*address, *position, None),
            [address, position, steps] => (*address, *position, Some(*steps)),
            _ => return Err("expected address, position and optional steps"),
        };

        let actuator = address
            .parse::<u8>()
            .ok()
            .and_then(Actuator::from_address)
            .ok_or("unknown actuator address")?;
        let raw_position: i32 = position.parse().map_err(|_| "bad position")?;
        let raw_steps: i32 = match steps {
            Some(s) => s.parse().map_err(|_| "bad step count")?,
            None => self.steps.get(&actuator).copied().unwrap_or_default(),
        };

        self.steps.insert(actuator, raw_steps);
        match actuator {
            Actuator::A => self.status.a = raw_position,
            Actuator::B => self.status.b = raw_position,
            Actuator::C => self.status.c = raw_steps,
            Actuator::D => {}
        }

        Ok(DeviceEvent::PositionReport {
            actuator,
            raw_position,
            raw_steps,
        })
    }

    fn parse_status(&mut self, body: &str) -> Result<DeviceEvent, &'static str> {
        let fields: Vec<&str> = body.split_whitespace().collect();
        if fields.is_empty() || fields.len() > 4 {
            return Err("expected one to four status fields");
        }

        let mut status = self.status;
        status.a = fields[0].parse().map_err(|_| "bad axial position")?;
        if let Some(b) = fields.get(1) {
            status.b = b.parse().map_err(|_| "bad horizontal position")?;
        }
        if let Some(c) = fields.get(2) {
            status.c = c.parse().map_err(|_| "bad lateral steps")?;
        }
        if let Some(p) = fields.get(3) {
            let pressure: f64 = p.parse().map_err(|_| "bad pressure")?;
            if !pressure.is_finite() {
                return Err("bad pressure");
            }
            status.pressure = pressure;
        }

        self.status = status;
        self.steps.insert(Actuator::C, status.c);

        Ok(DeviceEvent::StatusReport {
            a: status.a,
            b: status.b,
            c: status.c,
            pressure: status.pressure,
        })
    }
}
