/// Kubernetes CPU and memory quantities as they appear in manifests
use std::fmt;

const KI: u64 = 1024;
const MI: u64 = KI * 1024;
const GI: u64 = MI * 1024;
const TI: u64 = GI * 1024;
const PI: u64 = TI * 1024;
const EI: u64 = PI * 1024;

/// Reasons a quantity string cannot be understood
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,

    #[error("invalid number in quantity: {0}")]
    InvalidNumber(String),

    #[error("unsupported suffix in quantity: {0}")]
    UnknownSuffix(String),
}

/// Split `"500m"` into `(500.0, "m")`, treating `1e3` style exponents as part of the number
fn split_quantity(raw: &str) -> Result<(f64, &str), QuantityError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(QuantityError::Empty);
    }

    let mut split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    if let Some(exponent) = exponent_len(&raw[split..]) {
        split += exponent;
    }
    let (number, suffix) = raw.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| QuantityError::InvalidNumber(raw.to_string()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(QuantityError::InvalidNumber(raw.to_string()));
    }

    Ok((value, suffix))
}

/// Length of a decimal exponent (`e3`, `E-2`) covering the whole of `rest`
fn exponent_len(rest: &str) -> Option<usize> {
    let digits = rest.strip_prefix(['e', 'E'])?;
    let digits = digits.strip_prefix(['+', '-']).unwrap_or(digits);
    (!digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())).then_some(rest.len())
}

/// CPU quantity in millicores
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cpu(pub u64);

impl Cpu {
    pub fn parse(raw: &str) -> Result<Self, QuantityError> {
        let (value, suffix) = split_quantity(raw)?;
        let millis = match suffix {
            "m" => value,
            "" => value * 1000.0,
            other => return Err(QuantityError::UnknownSuffix(other.to_string())),
        };
        Ok(Cpu(millis.round() as u64))
    }

    /// Scale by `factor`, never going below `floor` millicores
    pub fn scale(self, factor: f64, floor: u64) -> Self {
        let scaled = (self.0 as f64 * factor).round() as u64;
        Cpu(scaled.max(floor).max(1))
    }
}

impl fmt::Display for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.0)
    }
}

/// Memory quantity in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Memory(pub u64);

impl Memory {
    pub fn parse(raw: &str) -> Result<Self, QuantityError> {
        let (value, suffix) = split_quantity(raw)?;
        let multiplier = match suffix {
            "" => 1,
            "Ki" => KI,
            "Mi" => MI,
            "Gi" => GI,
            "Ti" => TI,
            "Pi" => PI,
            "Ei" => EI,
            "k" => 1_000,
            "M" => 1_000_000,
            "G" => 1_000_000_000,
            "T" => 1_000_000_000_000,
            "P" => 1_000_000_000_000_000,
            "E" => 1_000_000_000_000_000_000,
            other => return Err(QuantityError::UnknownSuffix(other.to_string())),
        };
        Ok(Memory((value * multiplier as f64).round() as u64))
    }

    /// Whole MiB, saturating at the largest representable quantity
    pub fn from_mib(mib: u64) -> Self {
        Memory(mib.saturating_mul(MI))
    }

    /// Scale by `factor`, rounding up to whole MiB and never below `floor_mib`
    pub fn scale(self, factor: f64, floor_mib: u64) -> Self {
        let scaled = (self.0 as f64 * factor).round() as u64;
        let mib = scaled.div_ceil(MI);
        Memory::from_mib(mib.max(floor_mib).max(1))
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            bytes if bytes > 0 && bytes % EI == 0 => write!(f, "{}Ei", bytes / EI),
            bytes if bytes > 0 && bytes % PI == 0 => write!(f, "{}Pi", bytes / PI),
            bytes if bytes > 0 && bytes % TI == 0 => write!(f, "{}Ti", bytes / TI),
            bytes if bytes > 0 && bytes % GI == 0 => write!(f, "{}Gi", bytes / GI),
            bytes if bytes > 0 && bytes % MI == 0 => write!(f, "{}Mi", bytes / MI),
            bytes if bytes > 0 && bytes % KI == 0 => write!(f, "{}Ki", bytes / KI),
            bytes => write!(f, "{}", bytes),
        }
    }
}
