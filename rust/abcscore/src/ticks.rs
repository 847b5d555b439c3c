//! Tick arithmetic shared by the parsers and the layout builder.
//!
//! Every duration in the data tree is an integer number of ticks. The tick
//! resolution is derived from the default note length (`L:`) so that halves,
//! quarters, eighths, sixteenths and thirds of that length are all whole
//! numbers; note values themselves are exact fractions of a whole note.

use num_rational::Ratio;
use serde::{Deserialize, Serialize};

use crate::error::TickError;
use crate::model::TimeSignature;

/// Smallest indivisible unit of musical time.
pub type Ticks = u32;

/// A note value as an exact fraction of a whole note (1/4 = quarter note).
pub type NoteValue = Ratio<u32>;

/// Ticks assigned to one default note length. 12 divides by 2, 3 and 4,
/// which keeps halves, quarters and triplet thirds exact.
pub const TICKS_PER_DEFAULT_NOTE: u32 = 12;

/// Upper bound on dots honored by [`dot_factor`].
const MAX_DOTS: u32 = 8;

/// Largest numerator or denominator accepted in a duration suffix or in an
/// `L:`/`M:` field. Products of such terms stay well inside `u64`.
pub const MAX_FRACTION_TERM: u32 = 256;

/// Most slashes in a `C///` style suffix; `1 << 8` is [`MAX_FRACTION_TERM`].
const MAX_SLASHES: u32 = 8;

/// Tick resolution in effect for a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeUnit {
    /// Ticks in one whole note
    pub ticks_per_whole: Ticks,
    /// Ticks in one beat (one time-signature denominator unit)
    pub ticks_per_beat: Ticks,
}

impl TimeUnit {
    /// Derive the time unit from a default note length and, when known, the
    /// governing time signature. Without a time signature a quarter-note beat
    /// is assumed.
    pub fn new(note_length: NoteValue, time_signature: Option<&TimeSignature>) -> Self {
        let ticks_per_whole = ticks_per_whole_for(note_length);
        let denominator = time_signature.map_or(4, |ts| ts.denominator.max(1));
        Self {
            ticks_per_whole,
            ticks_per_beat: ticks_per_whole / denominator,
        }
    }

    /// Same resolution, beat recomputed for a new time signature.
    pub fn with_time_signature(self, time_signature: &TimeSignature) -> Self {
        Self {
            ticks_per_whole: self.ticks_per_whole,
            ticks_per_beat: self.ticks_per_whole / time_signature.denominator.max(1),
        }
    }

    /// Ticks in one quarter note.
    pub fn quarter(&self) -> Ticks {
        self.ticks_per_whole / 4
    }
}

impl Default for TimeUnit {
    fn default() -> Self {
        Self::new(Ratio::new(1, 8), None)
    }
}

/// `round((1 / note_length) × 12)` computed without floating point.
pub fn ticks_per_whole_for(note_length: NoteValue) -> Ticks {
    let (n, d) = (*note_length.numer(), *note_length.denom());
    if n == 0 {
        return TICKS_PER_DEFAULT_NOTE;
    }
    let scaled = u64::from(TICKS_PER_DEFAULT_NOTE) * u64::from(d);
    saturate((2 * scaled + u64::from(n)) / (2 * u64::from(n)))
}

fn saturate(ticks: u64) -> Ticks {
    Ticks::try_from(ticks).unwrap_or(Ticks::MAX)
}

/// Exact product of note values, `None` once the result no longer fits.
pub fn scale_note_value(factors: &[NoteValue]) -> Option<NoteValue> {
    let (mut numer, mut denom) = (1u64, 1u64);
    for factor in factors {
        numer = numer.checked_mul(u64::from(*factor.numer()))?;
        denom = denom.checked_mul(u64::from(*factor.denom()))?;
    }
    let wide = Ratio::new(numer, denom);
    let numer = u32::try_from(*wide.numer()).ok()?;
    let denom = u32::try_from(*wide.denom()).ok()?;
    Some(Ratio::new(numer, denom))
}

fn wide_ticks(value: NoteValue, unit: &TimeUnit) -> Ratio<u64> {
    Ratio::new(
        u64::from(*value.numer()) * u64::from(unit.ticks_per_whole),
        u64::from(*value.denom()),
    )
}

/// ABC default note length: 1/16 when the meter is shorter than 3/4, else 1/8.
pub fn default_note_length(time_signature: Option<&TimeSignature>) -> NoteValue {
    match time_signature {
        Some(ts) if ts.denominator > 0 => {
            let ratio = Ratio::new(ts.numerator, ts.denominator);
            if ratio < Ratio::new(3, 4) {
                Ratio::new(1, 16)
            } else {
                Ratio::new(1, 8)
            }
        }
        _ => Ratio::new(1, 8),
    }
}

/// Exact conversion of a note value to ticks.
pub fn note_value_to_duration(value: NoteValue, unit: &TimeUnit) -> Result<Ticks, TickError> {
    let ticks = wide_ticks(value, unit);
    if !ticks.is_integer() {
        return Err(TickError::Inexact {
            numerator: *value.numer(),
            denominator: *value.denom(),
            ticks_per_whole: unit.ticks_per_whole,
        });
    }
    Ticks::try_from(ticks.to_integer()).map_err(|_| TickError::TooLong {
        numerator: *value.numer(),
        denominator: *value.denom(),
        ticks_per_whole: unit.ticks_per_whole,
    })
}

/// Nearest-tick conversion for values the resolution cannot represent.
pub fn round_to_ticks(value: NoteValue, unit: &TimeUnit) -> Ticks {
    saturate(wide_ticks(value, unit).round().to_integer())
}

/// Inverse of [`note_value_to_duration`].
pub fn duration_to_note_value(ticks: Ticks, unit: &TimeUnit) -> NoteValue {
    if unit.ticks_per_whole == 0 {
        return Ratio::from_integer(0);
    }
    Ratio::new(ticks, unit.ticks_per_whole)
}

/// Parse a duration suffix into a multiplier of the default note length.
///
/// Accepts `""` (1), `"4"`, `"3/2"`, `"3/"` (3/2), `"/"` (1/2), `"/4"` and
/// repeated slashes (`"//"` = 1/4). Returns `None` for anything else.
pub fn parse_duration_multiplier(text: &str) -> Option<NoteValue> {
    if text.is_empty() {
        return Some(Ratio::from_integer(1));
    }
    if !text.chars().all(|c| c.is_ascii_digit() || c == '/') {
        return None;
    }

    let (num_part, rest) = match text.find('/') {
        Some(pos) => (&text[..pos], Some(&text[pos..])),
        None => (text, None),
    };
    let numerator: u32 = if num_part.is_empty() {
        1
    } else {
        num_part.parse().ok()?
    };
    if numerator > MAX_FRACTION_TERM {
        return None;
    }

    let denominator: u32 = match rest {
        None => 1,
        Some(slashes) if slashes.chars().all(|c| c == '/') => {
            let count = slashes.len() as u32;
            if count > MAX_SLASHES {
                return None;
            }
            1u32 << count
        }
        Some(fraction) => {
            let digits = &fraction[1..];
            if digits.contains('/') {
                return None;
            }
            digits.parse().ok()?
        }
    };

    if numerator == 0 || denominator == 0 || denominator > MAX_FRACTION_TERM {
        return None;
    }
    Some(Ratio::new(numerator, denominator))
}

/// Dot multiplier `1 + 0.5 × (1 − 0.5^dots)` as an exact fraction.
pub fn dot_factor(dots: u32) -> NoteValue {
    let dots = dots.min(MAX_DOTS);
    if dots == 0 {
        return Ratio::from_integer(1);
    }
    let scale = 1u32 << (dots + 1);
    Ratio::new(scale + (1u32 << dots) - 1, scale)
}

/// Expected ticks of a full measure under a time signature.
pub fn measure_duration(time_signature: &TimeSignature, unit: &TimeUnit) -> Ticks {
    if time_signature.denominator == 0 {
        return 0;
    }
    let whole = u64::from(time_signature.numerator) * u64::from(unit.ticks_per_whole);
    saturate(whole / u64::from(time_signature.denominator))
}

/// Outcome of checking a measure's tick total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureValidation {
    pub valid: bool,
    pub expected: Ticks,
    pub actual: Ticks,
    pub error: Option<String>,
}

/// Compare a measure's tick total with what the time signature requires.
pub fn validate_measure_duration(
    actual: Ticks,
    time_signature: &TimeSignature,
    unit: &TimeUnit,
) -> MeasureValidation {
    let expected = measure_duration(time_signature, unit);
    let error = if actual == expected {
        None
    } else {
        Some(format!(
            "measure has {actual} ticks but {}/{} requires {expected}",
            time_signature.numerator, time_signature.denominator
        ))
    };
    MeasureValidation {
        valid: error.is_none(),
        expected,
        actual,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common_time() -> TimeSignature {
        TimeSignature { numerator: 4, denominator: 4 }
    }

    #[test]
    fn quarter_note_length_gives_48_per_whole() {
        let unit = TimeUnit::new(Ratio::new(1, 4), Some(&common_time()));
        assert_eq!(unit.ticks_per_whole, 48);
        assert_eq!(unit.ticks_per_beat, 12);
        assert_eq!(unit.quarter(), 12);
    }

    #[test]
    fn supported_suffixes_are_exact_for_multiples_of_twelve() {
        for ticks_per_whole in [12u32, 24, 48, 96, 192] {
            let unit = TimeUnit { ticks_per_whole, ticks_per_beat: ticks_per_whole / 4 };
            let default_len = Ratio::new(TICKS_PER_DEFAULT_NOTE, ticks_per_whole);
            for suffix in ["4", "/2", "3/2", "/"] {
                let multiplier = parse_duration_multiplier(suffix).unwrap();
                let ticks = note_value_to_duration(default_len * multiplier, &unit)
                    .unwrap_or_else(|e| panic!("{suffix} at {ticks_per_whole}: {e}"));
                assert!(ticks > 0);
            }
        }
    }

    #[test]
    fn round_trip_for_representable_values() {
        let unit = TimeUnit::new(Ratio::new(1, 8), Some(&common_time()));
        for value in [Ratio::new(1, 1), Ratio::new(1, 4), Ratio::new(3, 16), Ratio::new(1, 24)] {
            let ticks = note_value_to_duration(value, &unit).unwrap();
            assert_eq!(duration_to_note_value(ticks, &unit), value);
        }
    }

    #[test]
    fn inexact_value_is_an_error_not_a_float() {
        let unit = TimeUnit::new(Ratio::new(1, 4), None);
        assert!(note_value_to_duration(Ratio::new(1, 64), &unit).is_err());
        assert_eq!(round_to_ticks(Ratio::new(1, 64), &unit), 1);
    }

    #[test]
    fn duration_multiplier_forms() {
        assert_eq!(parse_duration_multiplier(""), Some(Ratio::from_integer(1)));
        assert_eq!(parse_duration_multiplier("4"), Some(Ratio::from_integer(4)));
        assert_eq!(parse_duration_multiplier("3/2"), Some(Ratio::new(3, 2)));
        assert_eq!(parse_duration_multiplier("3/"), Some(Ratio::new(3, 2)));
        assert_eq!(parse_duration_multiplier("/"), Some(Ratio::new(1, 2)));
        assert_eq!(parse_duration_multiplier("/4"), Some(Ratio::new(1, 4)));
        assert_eq!(parse_duration_multiplier("//"), Some(Ratio::new(1, 4)));
        assert_eq!(parse_duration_multiplier("0"), None);
        assert_eq!(parse_duration_multiplier("2/0"), None);
        assert_eq!(parse_duration_multiplier("x"), None);
    }

    #[test]
    fn oversized_multipliers_are_rejected() {
        assert_eq!(parse_duration_multiplier("256"), Some(Ratio::from_integer(256)));
        assert_eq!(parse_duration_multiplier("257"), None);
        assert_eq!(parse_duration_multiplier("4294967295"), None);
        assert_eq!(parse_duration_multiplier("99999999999"), None);
        assert_eq!(parse_duration_multiplier("1/4294967295"), None);
        assert_eq!(parse_duration_multiplier("////////"), Some(Ratio::new(1, 256)));
        assert_eq!(parse_duration_multiplier("/////////"), None);
    }

    #[test]
    fn huge_values_saturate_or_fail_instead_of_wrapping() {
        assert_eq!(ticks_per_whole_for(Ratio::new(1, u32::MAX)), Ticks::MAX);
        let unit = TimeUnit { ticks_per_whole: u32::MAX, ticks_per_beat: u32::MAX / 4 };
        let wide = TimeSignature { numerator: u32::MAX, denominator: 1 };
        assert_eq!(measure_duration(&wide, &unit), Ticks::MAX);
        assert!(matches!(
            note_value_to_duration(Ratio::from_integer(2), &unit),
            Err(TickError::TooLong { .. })
        ));
        assert_eq!(round_to_ticks(Ratio::from_integer(2), &unit), Ticks::MAX);
    }

    #[test]
    fn scaled_values_stay_exact_or_report_overflow() {
        let eighth = Ratio::new(1, 8);
        assert_eq!(scale_note_value(&[eighth, Ratio::from_integer(3), dot_factor(1)]), Some(Ratio::new(15, 32)));
        let big = Ratio::from_integer(u32::MAX);
        assert_eq!(scale_note_value(&[big, big]), None);
    }

    #[test]
    fn dot_factor_follows_half_rule() {
        assert_eq!(dot_factor(0), Ratio::from_integer(1));
        assert_eq!(dot_factor(1), Ratio::new(5, 4));
        assert_eq!(dot_factor(2), Ratio::new(11, 8));
    }

    #[test]
    fn default_length_depends_on_meter() {
        let two_four = TimeSignature { numerator: 2, denominator: 4 };
        assert_eq!(default_note_length(Some(&two_four)), Ratio::new(1, 16));
        assert_eq!(default_note_length(Some(&common_time())), Ratio::new(1, 8));
        assert_eq!(default_note_length(None), Ratio::new(1, 8));
    }

    #[test]
    fn validation_reports_mismatch_without_panicking() {
        let unit = TimeUnit::new(Ratio::new(1, 4), Some(&common_time()));
        let ok = validate_measure_duration(48, &common_time(), &unit);
        assert!(ok.valid);
        let short = validate_measure_duration(36, &common_time(), &unit);
        assert!(!short.valid);
        assert_eq!(short.expected, 48);
        assert!(short.error.unwrap().contains("36"));
    }
}
