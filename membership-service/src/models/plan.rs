//! Membership plans and the gym settings document that prices them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Membership plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Basic,
    Intermediate,
    Full,
    Crossfit,
}

impl Plan {
    pub const ALL: [Plan; 4] = [Plan::Basic, Plan::Intermediate, Plan::Full, Plan::Crossfit];

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Basic => "basic",
            Plan::Intermediate => "intermediate",
            Plan::Full => "full",
            Plan::Crossfit => "crossfit",
        }
    }

    /// Parse a stored plan code. Only the exact lowercase codes match;
    /// anything else (e.g. a retired "trial" plan or "Full") is `None`.
    pub fn from_code(code: &str) -> Option<Self> {
        Plan::ALL.into_iter().find(|plan| plan.as_str() == code)
    }
}

/// Monthly price of every plan. Each plan has a field, so the mapping is total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPrices {
    #[serde(default)]
    pub basic: Decimal,
    #[serde(default)]
    pub intermediate: Decimal,
    #[serde(default)]
    pub full: Decimal,
    #[serde(default)]
    pub crossfit: Decimal,
}

impl PlanPrices {
    pub fn price(&self, plan: Plan) -> Decimal {
        match plan {
            Plan::Basic => self.basic,
            Plan::Intermediate => self.intermediate,
            Plan::Full => self.full,
            Plan::Crossfit => self.crossfit,
        }
    }

    /// Price for a raw plan code; unknown codes cost zero.
    pub fn resolve(&self, code: &str) -> Decimal {
        Plan::from_code(code)
            .map(|plan| self.price(plan))
            .unwrap_or(Decimal::ZERO)
    }
}

/// The single gym settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GymSettings {
    pub name: String,
    #[serde(default)]
    pub plan_prices: PlanPrices,
}

impl Default for GymSettings {
    fn default() -> Self {
        Self {
            name: "GymFlow Fitness".to_string(),
            plan_prices: PlanPrices::default(),
        }
    }
}
