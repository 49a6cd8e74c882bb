// ── Diagnostics decoding ──
//
// Allow-list over the registrator's diagnostics bitmask. Bits not listed
// here are reserved or vendor-specific and are ignored.

/// One decoded diagnostics flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticFlag {
    pub bit: u32,
    pub code: &'static str,
    pub description: &'static str,
}

pub const KNOWN_FLAGS: [DiagnosticFlag; 2] = [
    DiagnosticFlag {
        bit: 0x04,
        code: "EEPROM",
        description: "EEPROM write fail",
    },
    DiagnosticFlag {
        bit: 0x08,
        code: "CHAN_ERR",
        description: "A Channel has a negative value",
    },
];

/// Decode the known bits set in `flags`, in bit order.
pub fn decode(flags: u32) -> Vec<DiagnosticFlag> {
    KNOWN_FLAGS
        .iter()
        .filter(|flag| flags & flag.bit != 0)
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_bits() {
        let codes: Vec<_> = decode(0x0c).iter().map(|f| f.code).collect();
        assert_eq!(codes, ["EEPROM", "CHAN_ERR"]);
    }

    #[test]
    fn ignores_unknown_bits() {
        assert!(decode(0).is_empty());
        assert!(decode(0x01 | 0x02 | 0x10 | 0x8000_0000).is_empty());
        let only_chan = decode(0xf3 | 0x08);
        assert_eq!(only_chan.len(), 1);
        assert_eq!(only_chan[0].description, "A Channel has a negative value");
    }
}
