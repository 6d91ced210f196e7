//! RRP identifiers: `L001`, `F042T3`.
//!
//! The base code names the supplier origin (`L` local, `F` foreign) and a
//! three digit sequence. A `T<n>` suffix marks the n-th correction of the base.
use crate::error::{LedgerError, Result};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([LF])([0-9]{3})(?:T([0-9]+))?$").expect("static pattern"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupplierOrigin {
    Local,
    Foreign,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RrpNumber {
    origin: SupplierOrigin,
    sequence: String,
    correction: Option<u32>,
}

impl RrpNumber {
    pub fn parse(text: &str) -> Result<Self> {
        let caps = pattern().captures(text.trim()).ok_or_else(|| {
            LedgerError::Validation(format!(
                "RRP number {text:?} must look like L001, F001 or L001T2"
            ))
        })?;

        let origin = match &caps[1] {
            "L" => SupplierOrigin::Local,
            _ => SupplierOrigin::Foreign,
        };
        let correction = match caps.get(3) {
            Some(m) => {
                let n = m.as_str().parse::<u32>().map_err(|_| {
                    LedgerError::Validation(format!("correction index in {text:?} is too large"))
                })?;
                if n == 0 {
                    return Err(LedgerError::Validation(format!(
                        "correction index in {text:?} starts at T1"
                    )));
                }
                Some(n)
            }
            None => None,
        };

        Ok(Self {
            origin,
            sequence: caps[2].to_string(),
            correction,
        })
    }

    pub fn origin(&self) -> SupplierOrigin {
        self.origin
    }

    pub fn correction(&self) -> Option<u32> {
        self.correction
    }

    /// The base code without any correction suffix.
    pub fn base(&self) -> String {
        let prefix = match self.origin {
            SupplierOrigin::Local => 'L',
            SupplierOrigin::Foreign => 'F',
        };
        format!("{prefix}{}", self.sequence)
    }

    pub fn with_correction(&self, n: u32) -> Self {
        Self {
            correction: Some(n),
            ..self.clone()
        }
    }
}

impl FromStr for RrpNumber {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for RrpNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.correction {
            Some(n) => write!(f, "{}T{n}", self.base()),
            None => f.write_str(&self.base()),
        }
    }
}
