use crate::runtime::SimError;
use std::fmt::Display;

// Unit strings are interned so that values holding them can compare by
// pointer and outlive any parameter object.
static UNITS: spin::Mutex<Vec<&'static str>> = spin::Mutex::new(Vec::new());

///
/// An interned measurement unit of a numeric parameter.
///
/// Two units compare equal iff they intern to the same string; the
/// comparison is a pointer check.
///
#[derive(Debug, Clone, Copy)]
pub struct Unit(&'static str);

impl Unit {
    /// The interned unit string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0.as_ptr(), other.0.as_ptr())
    }
}
impl Eq for Unit {}

impl Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

///
/// Interns a unit string, returning its canonical [`Unit`] instance.
///
#[must_use]
pub fn unit(name: &str) -> Unit {
    let mut pool = UNITS.lock();
    if let Some(interned) = pool.iter().find(|u| **u == name) {
        return Unit(interned);
    }
    let leaked: &'static str = Box::leak(name.to_string().into_boxed_str());
    pool.push(leaked);
    Unit(leaked)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Time,
    Data,
    DataRate,
    Length,
    Frequency,
}

/// The linear conversion table: `(unit, dimension, factor to base unit)`.
const FACTORS: [(&str, Dimension, f64); 29] = [
    ("s", Dimension::Time, 1.0),
    ("ms", Dimension::Time, 1e-3),
    ("us", Dimension::Time, 1e-6),
    ("ns", Dimension::Time, 1e-9),
    ("ps", Dimension::Time, 1e-12),
    ("min", Dimension::Time, 60.0),
    ("h", Dimension::Time, 3600.0),
    ("d", Dimension::Time, 86400.0),
    ("b", Dimension::Data, 1.0),
    ("B", Dimension::Data, 8.0),
    ("Kb", Dimension::Data, 1e3),
    ("KB", Dimension::Data, 8e3),
    ("Mb", Dimension::Data, 1e6),
    ("MB", Dimension::Data, 8e6),
    ("Gb", Dimension::Data, 1e9),
    ("GB", Dimension::Data, 8e9),
    ("bps", Dimension::DataRate, 1.0),
    ("Kbps", Dimension::DataRate, 1e3),
    ("Mbps", Dimension::DataRate, 1e6),
    ("Gbps", Dimension::DataRate, 1e9),
    ("m", Dimension::Length, 1.0),
    ("mm", Dimension::Length, 1e-3),
    ("cm", Dimension::Length, 1e-2),
    ("km", Dimension::Length, 1e3),
    ("Hz", Dimension::Frequency, 1.0),
    ("kHz", Dimension::Frequency, 1e3),
    ("MHz", Dimension::Frequency, 1e6),
    ("GHz", Dimension::Frequency, 1e9),
    ("THz", Dimension::Frequency, 1e9 * 1e3),
];

fn factor(unit: Unit) -> Option<(Dimension, f64)> {
    FACTORS
        .iter()
        .find(|(name, _, _)| *name == unit.as_str())
        .map(|(_, dim, f)| (*dim, *f))
}

///
/// Converts a value between two units of the same dimension.
///
/// Units outside the fixed conversion table form their own dimension and
/// only convert to themselves.
///
/// # Errors
///
/// Fails with [`SimError::UnitMismatch`] for conversions across dimensions.
///
pub fn convert_unit(value: f64, from: Unit, to: Unit) -> Result<f64, SimError> {
    if from == to {
        return Ok(value);
    }
    let mismatch = || SimError::UnitMismatch {
        from: from.as_str(),
        to: to.as_str(),
    };
    let (from_dim, from_factor) = factor(from).ok_or_else(mismatch)?;
    let (to_dim, to_factor) = factor(to).ok_or_else(mismatch)?;
    if from_dim == to_dim {
        Ok(value * from_factor / to_factor)
    } else {
        Err(mismatch())
    }
}
