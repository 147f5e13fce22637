//! Instrument identification from the `*IDN?` response.

use std::{fmt::Display, sync::LazyLock};

use regex::Regex;

use crate::SmuError;

/// The query every supported instrument answers with its identity.
pub(crate) const IDN_QUERY: &str = "*IDN?";

/// Instrument families, each with its own command dialect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Family {
    /// Model 2400 and its siblings: SCPI, one channel.
    K2400,
    /// Graphical 2450 series: SCPI in 2400 compatibility mode, one channel.
    K2400G,
    /// 2600 series: TSP, one or two named channels.
    K2600,
    /// 2600B series: TSP, one or two named channels.
    K2600B,
}

impl Family {
    /// Bit positions of the status word for this family.
    pub fn status_bits(&self) -> StatusBits {
        match self {
            Family::K2400 | Family::K2400G => StatusBits {
                compliance: 3,
                remote_sense: 22,
            },
            Family::K2600 | Family::K2600B => StatusBits {
                compliance: 6,
                remote_sense: 4,
            },
        }
    }
}

impl Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Family::K2400 => "2400",
            Family::K2400G => "2400G",
            Family::K2600 => "2600",
            Family::K2600B => "2600B",
        };
        write!(f, "{name}")
    }
}

/// Bit positions in a measurement's status word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusBits {
    /// Set while the source is in compliance.
    pub compliance: u32,
    /// Set while remote (4-wire) sense is active.
    pub remote_sense: u32,
}

/// The model tag an instrument is treated as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Model {
    /// 2400, 2401, 2410, 2420, 2440
    M2400,
    /// 2450, 2460, 2461, 2470
    M2450,
    /// 2601, 2611, 2635
    M2601,
    /// 2602, 2612, 2636
    M2602,
    /// 2601B, 2611B, 2635B
    M2601B,
    /// 2602B, 2604B, 2612B, 2614B, 2634B, 2636B
    M2602B,
}

impl Model {
    /// Number of source-measure channels.
    pub fn num_channels(&self) -> usize {
        match self {
            Model::M2602 | Model::M2602B => 2,
            _ => 1,
        }
    }
}

impl Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Model::M2400 => "2400",
            Model::M2450 => "2450",
            Model::M2601 => "2601",
            Model::M2602 => "2602",
            Model::M2601B => "2601B",
            Model::M2602B => "2602B",
        };
        write!(f, "{name}")
    }
}

static IDN_TABLE: LazyLock<Vec<(Regex, Family, Model)>> = LazyLock::new(|| {
    [
        (r"model 24(00|01|10|20|40),", Family::K2400, Model::M2400),
        (r"model 24(50|60|61|70),", Family::K2400G, Model::M2450),
        (r"model 26(01|11|35),", Family::K2600, Model::M2601),
        (r"model 26(02|12|36),", Family::K2600, Model::M2602),
        (r"model 26(01|11|35)b,", Family::K2600B, Model::M2601B),
        (
            r"model 26(02|04|12|14|34|36)b,",
            Family::K2600B,
            Model::M2602B,
        ),
    ]
    .into_iter()
    .filter_map(|(model, family, tag)| {
        Regex::new(&format!(r"(?i)^.*keithley.*{model}.*$"))
            .ok()
            .map(|re| (re, family, tag))
    })
    .collect()
});

/// Who we are talking to, as determined once during connect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstrumentIdentity {
    raw: String,
    family: Family,
    model: Model,
}

impl InstrumentIdentity {
    /// Match an identity response against the known instruments.
    ///
    /// Matching is case insensitive and tolerates anything after the model number, such as
    /// serial numbers and firmware revisions.
    pub fn detect(idn: &str) -> Result<Self, SmuError> {
        let raw = idn.trim();
        IDN_TABLE
            .iter()
            .find(|(re, _, _)| re.is_match(raw))
            .map(|(_, family, model)| Self {
                raw: raw.to_string(),
                family: *family,
                model: *model,
            })
            .ok_or_else(|| SmuError::UnsupportedInstrument(raw.to_string()))
    }

    /// The identity string as received, trimmed.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The instrument family.
    pub fn family(&self) -> Family {
        self.family
    }

    /// The model tag.
    pub fn model(&self) -> Model {
        self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every pattern compiles, so no model silently drops out of the table.
    #[test]
    fn test_idn_table_complete() {
        assert_eq!(IDN_TABLE.len(), 6);
    }

    #[test]
    fn test_num_channels() {
        assert_eq!(Model::M2400.num_channels(), 1);
        assert_eq!(Model::M2602B.num_channels(), 2);
    }
}
