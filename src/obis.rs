//! OBIS identifier codec and display-name mapping
//!
//! The gateway tags every measured quantity with a 64-bit packed identifier:
//! six unsigned byte-sized fields packed big-endian into the low 48 bits
//! (the top 16 bits are reserved). The canonical text form is
//! `"{media}-{channel}:{indicator}.{mode}.{quantity}*{storage}"`, which is
//! also the lookup key into the static display-name table.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;

/// Decoded form of a packed OBIS identifier.
///
/// Decoding is total and lossless over the 48-bit domain:
/// `ObisId::from_raw(id.to_raw()) == id` for every possible field tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObisId {
    pub media: u8,
    pub channel: u8,
    pub indicator: u8,
    pub mode: u8,
    pub quantity: u8,
    pub storage: u8,
}

impl ObisId {
    /// Decode a packed identifier. The top 16 bits are ignored, so any
    /// 64-bit input produces a well-formed (if possibly meaningless) id.
    pub fn from_raw(raw: u64) -> Self {
        Self {
            media: (raw >> 40) as u8,
            channel: (raw >> 32) as u8,
            indicator: (raw >> 24) as u8,
            mode: (raw >> 16) as u8,
            quantity: (raw >> 8) as u8,
            storage: raw as u8,
        }
    }

    /// Pack the six fields back into the low 48 bits.
    pub fn to_raw(self) -> u64 {
        (self.media as u64) << 40
            | (self.channel as u64) << 32
            | (self.indicator as u64) << 24
            | (self.mode as u64) << 16
            | (self.quantity as u64) << 8
            | self.storage as u64
    }

    /// Canonical dotted/dashed key, e.g. `"1-0:1.8.0*255"`.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ObisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}:{}.{}.{}*{}",
            self.media, self.channel, self.indicator, self.mode, self.quantity, self.storage
        )
    }
}

/// Resolve a canonical key to its human-readable name.
///
/// Unknown keys resolve to themselves, unchanged.
pub fn resolve(key: &str) -> &str {
    OBIS_NAMES.get(key).copied().unwrap_or(key)
}

/// Decode a packed identifier straight to its display name.
pub fn display_name(raw: u64) -> String {
    let key = ObisId::from_raw(raw).canonical();
    match OBIS_NAMES.get(key.as_str()) {
        Some(name) => (*name).to_string(),
        None => key,
    }
}

/// Display names for the OBIS keys the smart-meter bridge is known to emit.
static OBIS_NAMES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("1-0:1.8.0*255", "Total active energy import"),
        ("1-0:2.8.0*255", "Total active energy export"),
        ("1-0:3.8.0*255", "Total reactive energy import"),
        ("1-0:4.8.0*255", "Total reactive energy export"),
        ("1-0:1.4.0*255", "Tariff 1 active energy import"),
        ("1-0:2.4.0*255", "Tariff 1 active energy export"),
        ("1-0:3.4.0*255", "Tariff 1 reactive energy import"),
        ("1-0:4.4.0*255", "Tariff 1 reactive energy export"),
        ("1-0:9.4.0*255", "Current L1 active power import"),
        ("1-0:9.8.0*255", "Current L1 reactive power import"),
        ("1-0:10.4.0*255", "Current L2 active power import"),
        ("1-0:10.8.0*255", "Current L2 reactive power import"),
        ("1-0:13.4.0*255", "Current L3 active power import"),
        ("1-0:14.4.0*255", "Current L3 reactive power import"),
        ("1-0:21.4.0*255", "Tariff 2 active energy import"),
        ("1-0:21.8.0*255", "Tariff 2 reactive energy import"),
        ("1-0:22.4.0*255", "Tariff 2 active energy export"),
        ("1-0:22.8.0*255", "Tariff 2 reactive energy export"),
        ("1-0:23.4.0*255", "Tariff 3 active energy import"),
        ("1-0:23.8.0*255", "Tariff 3 reactive energy import"),
        ("1-0:24.4.0*255", "Tariff 3 active energy export"),
        ("1-0:24.8.0*255", "Tariff 3 reactive energy export"),
        ("1-0:29.4.0*255", "L1 voltage"),
        ("1-0:29.8.0*255", "L1 current"),
        ("1-0:30.4.0*255", "L2 voltage"),
        ("1-0:30.8.0*255", "L2 current"),
        ("1-0:31.4.0*255", "L3 voltage"),
        ("1-0:32.4.0*255", "L3 current"),
        ("1-0:33.4.0*255", "Neutral current"),
        ("1-0:41.4.0*255", "Frequency"),
        ("1-0:41.8.0*255", "Power factor"),
        ("1-0:42.4.0*255", "Phase angle L1"),
        ("1-0:42.8.0*255", "Phase angle L2"),
        ("1-0:43.4.0*255", "Phase angle L3"),
        ("1-0:43.8.0*255", "Phase angle N"),
        ("1-0:44.4.0*255", "Reactive power L1"),
        ("1-0:44.8.0*255", "Reactive power L2"),
        ("1-0:49.4.0*255", "Apparent power L1"),
        ("1-0:49.8.0*255", "Apparent power L2"),
        ("1-0:50.4.0*255", "Apparent power L3"),
        ("1-0:50.8.0*255", "Apparent power N"),
        ("1-0:51.4.0*255", "Active power L1"),
        ("1-0:52.4.0*255", "Active power L2"),
        ("1-0:53.4.0*255", "Active power L3"),
        ("1-0:61.4.0*255", "Reactive power total"),
        ("1-0:61.8.0*255", "Reactive power import total"),
        ("1-0:62.4.0*255", "Reactive power export total"),
        ("1-0:62.8.0*255", "Reactive power total L1"),
        ("1-0:63.4.0*255", "Reactive power total L2"),
        ("1-0:63.8.0*255", "Reactive power total L3"),
        ("1-0:64.4.0*255", "Apparent power total"),
        ("1-0:64.8.0*255", "Apparent power total L1"),
        ("1-0:69.4.0*255", "Total harmonic distortion L1"),
        ("1-0:69.8.0*255", "Total harmonic distortion L2"),
        ("1-0:70.4.0*255", "Total harmonic distortion L3"),
        ("1-0:70.8.0*255", "Total harmonic distortion N"),
        ("1-0:71.4.0*255", "Max demand L1"),
        ("1-0:72.4.0*255", "Max demand L2"),
        ("1-0:73.4.0*255", "Max demand L3"),
    ])
});
