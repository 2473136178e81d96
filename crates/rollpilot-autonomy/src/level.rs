use rollpilot_core::RiskLevel;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Six autonomy levels, from hands-off to fully self-directed:
///
/// - **A0 (Manual)**: Goals are generated and queued, never executed autonomously.
/// - **A1 (Dry Run)**: Plans run in dry-run only; nothing touches live infrastructure.
/// - **A2 (Low Risk)**: Live writes allowed for low-risk plans.
/// - **A3 (Medium Risk)**: Live writes up to medium risk.
/// - **A4 (High Risk)**: Live writes up to high risk.
/// - **A5 (Full Auto)**: Live writes at any risk, critical included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AutonomyLevel {
    #[serde(rename = "A0")]
    Manual = 0,
    #[serde(rename = "A1")]
    DryRun = 1,
    #[default]
    #[serde(rename = "A2")]
    LowRisk = 2,
    #[serde(rename = "A3")]
    MediumRisk = 3,
    #[serde(rename = "A4")]
    HighRisk = 4,
    #[serde(rename = "A5")]
    FullAuto = 5,
}

impl AutonomyLevel {
    pub const ALL: [AutonomyLevel; 6] = [
        Self::Manual,
        Self::DryRun,
        Self::LowRisk,
        Self::MediumRisk,
        Self::HighRisk,
        Self::FullAuto,
    ];

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    /// Parse "A0".."A5" (case-insensitive) or a bare digit.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let digits = s.strip_prefix(['A', 'a']).unwrap_or(s);
        digits.parse::<u8>().ok().and_then(Self::from_u8)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "A0",
            Self::DryRun => "A1",
            Self::LowRisk => "A2",
            Self::MediumRisk => "A3",
            Self::HighRisk => "A4",
            Self::FullAuto => "A5",
        }
    }

    /// Whether goals may be dispatched at all.
    pub fn allows_execution(&self) -> bool {
        *self >= Self::DryRun
    }

    /// Whether any live write is allowed.
    pub fn allows_writes(&self) -> bool {
        *self >= Self::LowRisk
    }

    /// Highest plan risk that may run live at this level.
    pub fn max_write_risk(&self) -> Option<RiskLevel> {
        match self {
            Self::Manual | Self::DryRun => None,
            Self::LowRisk => Some(RiskLevel::Low),
            Self::MediumRisk => Some(RiskLevel::Medium),
            Self::HighRisk => Some(RiskLevel::High),
            Self::FullAuto => Some(RiskLevel::Critical),
        }
    }

    pub fn permits_write_risk(&self, risk: RiskLevel) -> bool {
        self.max_write_risk().is_some_and(|max| risk <= max)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Manual => "Goals are queued but never executed autonomously",
            Self::DryRun => "Plans run in dry-run only",
            Self::LowRisk => "Live writes for low-risk plans",
            Self::MediumRisk => "Live writes up to medium risk",
            Self::HighRisk => "Live writes up to high risk",
            Self::FullAuto => "Live writes at any risk",
        }
    }
}

impl fmt::Display for AutonomyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), match self {
            Self::Manual => "Manual",
            Self::DryRun => "Dry Run",
            Self::LowRisk => "Low Risk",
            Self::MediumRisk => "Medium Risk",
            Self::HighRisk => "High Risk",
            Self::FullAuto => "Full Auto",
        })
    }
}
