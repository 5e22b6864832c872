//! Duty overrides read from the control file.
//!
//! The file is plain text, one `key value` pair per line:
//!
//! ```text
//! offset_cpu 5
//! min_gpu 30
//! force_cpu 100
//! ```
//!
//! Keys are `offset_*`, `min_*` and `force_*` for `cpu` and `gpu`. A key
//! that's absent leaves its tunable as it was; `force_* -1` clears a
//! forced duty. Unknown lines are ignored.

use std::io;
use std::path::Path;

use tokio::fs;

use crate::error::Result;
use crate::telemetry::{Zone, ZonePair};
use crate::tracing::prelude::*;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overrides {
    pub offset: ZonePair<i32>,
    pub min: ZonePair<i32>,
    pub force: ZonePair<Option<i32>>,
}

impl Overrides {
    /// Apply the overrides to a computed duty: offset, then floor, then
    /// the forced value, clamped to 0-100.
    pub fn apply(&self, zone: Zone, duty: i32) -> u8 {
        let mut duty = duty.saturating_add(self.offset[zone]);
        duty = duty.max(self.min[zone]);
        if let Some(forced) = self.force[zone] {
            duty = forced;
        }
        duty.clamp(0, 100) as u8
    }

    /// Update tunables from control file text. Returns how many lines were
    /// applied.
    pub fn update_from_str(&mut self, text: &str) -> usize {
        let mut applied = 0;
        for line in text.lines() {
            let mut fields = line.split_whitespace();
            let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
                continue;
            };
            let Some((kind, zone)) = parse_key(key) else {
                trace!(line, "Ignoring unknown control line");
                continue;
            };
            let Ok(value) = value.parse::<i32>() else {
                warn!(line, "Ignoring malformed control line");
                continue;
            };

            match kind {
                Tunable::Offset => self.offset[zone] = value,
                Tunable::Min => self.min[zone] = value,
                Tunable::Force if value < 0 => self.force[zone] = None,
                Tunable::Force => self.force[zone] = Some(value),
            }
            applied += 1;
        }
        applied
    }

    /// Re-read the control file. A missing file leaves everything as is
    /// and returns `Ok(false)`.
    pub async fn reload(&mut self, path: &Path) -> Result<bool> {
        let text = match fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let applied = self.update_from_str(&text);
        debug!(path = %path.display(), applied, overrides = ?self, "Reloaded control file");
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy)]
enum Tunable {
    Offset,
    Min,
    Force,
}

fn parse_key(key: &str) -> Option<(Tunable, Zone)> {
    let (kind, zone) = key.split_once('_')?;
    let kind = match kind {
        "offset" => Tunable::Offset,
        "min" => Tunable::Min,
        "force" => Tunable::Force,
        _ => return None,
    };
    let zone = match zone {
        "cpu" => Zone::Cpu,
        "gpu" => Zone::Gpu,
        _ => return None,
    };
    Some((kind, zone))
}
