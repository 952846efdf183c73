use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Optimisation level a code unit is compiled at.
///
/// Every level produces code that behaves exactly like the interpreter; the
/// levels differ only in which IR passes run after lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OptLevel {
    O0,
    O1,
    #[default]
    O2,
    O3,
}

impl OptLevel {
    pub const ALL: [OptLevel; 4] = [OptLevel::O0, OptLevel::O1, OptLevel::O2, OptLevel::O3];

    pub fn as_flag(&self) -> &'static str {
        match self {
            OptLevel::O0 => "-O0",
            OptLevel::O1 => "-O1",
            OptLevel::O2 => "-O2",
            OptLevel::O3 => "-O3",
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptLevel::O0 => write!(f, "O0"),
            OptLevel::O1 => write!(f, "O1"),
            OptLevel::O2 => write!(f, "O2"),
            OptLevel::O3 => write!(f, "O3"),
        }
    }
}

impl TryFrom<u8> for OptLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(OptLevel::O0),
            1 => Ok(OptLevel::O1),
            2 => Ok(OptLevel::O2),
            3 => Ok(OptLevel::O3),
            other => Err(format!("optimization level must be between 0 and 3, got {other}")),
        }
    }
}

impl From<OptLevel> for u8 {
    fn from(level: OptLevel) -> Self {
        level.as_u8()
    }
}

impl FromStr for OptLevel {
    type Err = String;

    /// Accepts `2`, `O2` and `-O2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("-O")
            .or_else(|| trimmed.strip_prefix('O'))
            .or_else(|| trimmed.strip_prefix('o'))
            .unwrap_or(trimmed);
        let value: u8 = digits
            .parse()
            .map_err(|_| format!("invalid optimization level '{trimmed}'"))?;
        OptLevel::try_from(value)
    }
}
