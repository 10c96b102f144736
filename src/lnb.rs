//! # LNB Frequency Math
//!
//! Ported from `original_source/trunk/src/lnb.c` (itself adapted from
//! linuxtv.org's `szap`): the handful of standard Ku/C-band LNB profiles
//! and the low/high-band intermediate-frequency conversion `channels.conf`
//! import needs, even though this crate never drives a tuner itself
//! (SPEC_FULL.md §10.4).

/// One LNB profile: local oscillator frequencies in kHz, matching the
/// units `original_source/include/lnb.h` uses throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LnbInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub low_frequency: u32,
    pub high_frequency: u32,
    pub switch_frequency: u32,
}

/// The standard profiles `lnb.c` ships, in enumeration order.
pub const STANDARD_LNBS: &[LnbInfo] = &[
    LnbInfo {
        name: "UNIVERSAL",
        description: "Europe, 10800 to 11800 MHz and 11600 to 12700 MHz, dual LO (9750/10600 MHz)",
        low_frequency: 9_750_000,
        high_frequency: 10_600_000,
        switch_frequency: 11_700_000,
    },
    LnbInfo {
        name: "DBS",
        description: "Expressvu, North America, 12200 to 12700 MHz, single LO (11250 MHz)",
        low_frequency: 11_250_000,
        high_frequency: 0,
        switch_frequency: 0,
    },
    LnbInfo {
        name: "STANDARD",
        description: "10945 to 11450 MHz, single LO (10000 MHz)",
        low_frequency: 10_000_000,
        high_frequency: 0,
        switch_frequency: 0,
    },
    LnbInfo {
        name: "ENHANCED",
        description: "Astra, 10700 to 11700 MHz, single LO (9750 MHz)",
        low_frequency: 9_750_000,
        high_frequency: 0,
        switch_frequency: 0,
    },
    LnbInfo {
        name: "C-BAND",
        description: "Big Dish, 3700 to 4200 MHz, single LO (5150 MHz)",
        low_frequency: 5_150_000,
        high_frequency: 0,
        switch_frequency: 0,
    },
];

/// Looks up a standard profile by name, case-insensitively, as
/// `LNBDecode` does for its alphabetic branch.
pub fn find_standard(name: &str) -> Option<LnbInfo> {
    STANDARD_LNBS.iter().copied().find(|lnb| lnb.name.eq_ignore_ascii_case(name))
}

/// Parses either a standard profile name or a `low[,high[,switch]]` triple,
/// matching `LNBDecode`'s two branches.
pub fn parse(input: &str) -> Option<LnbInfo> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if input.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return find_standard(input);
    }

    let mut parts = input.split(|c: char| c == ',' || c.is_whitespace()).filter(|s| !s.is_empty());
    let low_frequency: u32 = parts.next()?.parse().ok()?;
    if low_frequency == 0 {
        return None;
    }
    let high_frequency: u32 = match parts.next() {
        Some(part) => part.parse().ok()?,
        None => 0,
    };
    let switch_frequency: u32 = match parts.next() {
        Some(part) => part.parse().ok()?,
        None => 0,
    };

    Some(LnbInfo {
        name: "",
        description: "",
        low_frequency,
        high_frequency,
        switch_frequency,
    })
}

/// Converts a transponder frequency to the LNB's intermediate frequency,
/// and reports whether the 22kHz tone must be enabled to select the high
/// band. Mirrors `LNBTransponderToIntermediateFreq` exactly.
pub fn transponder_to_intermediate(lnb: &LnbInfo, frequency: u32) -> (u32, bool) {
    let hiband = lnb.switch_frequency != 0 && lnb.high_frequency != 0 && frequency >= lnb.switch_frequency;

    if hiband {
        (frequency.saturating_sub(lnb.high_frequency), true)
    } else if frequency < lnb.low_frequency {
        (lnb.low_frequency - frequency, false)
    } else {
        (frequency - lnb.low_frequency, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_universal_case_insensitively() {
        let lnb = find_standard("universal").unwrap();
        assert_eq!(lnb.low_frequency, 9_750_000);
        assert_eq!(lnb.switch_frequency, 11_700_000);
    }

    #[test]
    fn parses_custom_low_high_switch_triple() {
        let lnb = parse("9750,10600,11700").unwrap();
        assert_eq!(lnb.low_frequency, 9_750_000);
        assert_eq!(lnb.high_frequency, 10_600_000);
        assert_eq!(lnb.switch_frequency, 11_700_000);
    }

    #[test]
    fn loband_transponder_stays_below_switch_point() {
        let lnb = find_standard("UNIVERSAL").unwrap();
        let (ifreq, tone) = transponder_to_intermediate(&lnb, 11_000_000);
        assert_eq!(ifreq, 11_000_000 - 9_750_000);
        assert!(!tone);
    }

    #[test]
    fn hiband_transponder_enables_22khz_tone() {
        let lnb = find_standard("UNIVERSAL").unwrap();
        let (ifreq, tone) = transponder_to_intermediate(&lnb, 12_000_000);
        assert_eq!(ifreq, 12_000_000 - 10_600_000);
        assert!(tone);
    }

    #[test]
    fn single_lo_profile_never_switches_bands() {
        let lnb = find_standard("C-BAND").unwrap();
        let (_, tone) = transponder_to_intermediate(&lnb, 4_100_000);
        assert!(!tone);
    }
}
