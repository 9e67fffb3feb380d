// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Budgets, thresholds and status evaluation.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CostRecord, Currency, DateRange, ProviderKind};
use crate::error::CoreError;

text_enum! {
    /// Budget period.
    pub enum BudgetPeriod {
        /// Calendar month.
        Monthly => "monthly",
        /// Calendar quarter.
        Quarterly => "quarterly",
        /// Calendar year.
        Yearly => "yearly",
    }
}

impl BudgetPeriod {
    /// The period containing `date`, as a half-open range.
    pub fn range_containing(&self, date: NaiveDate) -> DateRange {
        let (start, months) = match self {
            Self::Monthly => (first_of(date.year(), date.month()), 1),
            Self::Quarterly => (first_of(date.year(), (date.month0() / 3) * 3 + 1), 3),
            Self::Yearly => (first_of(date.year(), 1), 12),
        };
        let end = start
            .checked_add_months(chrono::Months::new(months))
            .unwrap_or(NaiveDate::MAX);
        DateRange { start, end }
    }
}

fn first_of(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

text_enum! {
    /// Budget status.
    pub enum BudgetStatus {
        /// Spend below every threshold.
        Active => "active",
        /// A threshold is crossed but spend is under the amount.
        Warning => "warning",
        /// Spend reached the budget amount.
        Exceeded => "exceeded",
        /// Disabled by the user.
        Inactive => "inactive",
    }
}

/// One alert threshold as a percentage of the budget amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetThreshold {
    /// Percentage of the amount, e.g. `80.0`.
    pub percentage: f64,
    /// Set once a notification has been sent for this threshold.
    #[serde(default)]
    pub notified: bool,
    /// When the threshold was first crossed.
    #[serde(default)]
    pub triggered_at: Option<DateTime<Utc>>,
}

impl BudgetThreshold {
    /// A threshold that has not fired yet.
    pub fn at(percentage: f64) -> Self {
        Self {
            percentage,
            notified: false,
            triggered_at: None,
        }
    }
}

/// Scope filters applied when computing spend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetFilters {
    /// Restrict to these providers.
    pub providers: Vec<ProviderKind>,
    /// Restrict to these services.
    pub services: Vec<String>,
    /// Restrict to these accounts.
    pub accounts: Vec<String>,
    /// Restrict to these regions.
    pub regions: Vec<String>,
}

impl BudgetFilters {
    /// Whether a cost record falls inside the budget scope.
    pub fn accepts(&self, record: &CostRecord) -> bool {
        (self.providers.is_empty() || self.providers.contains(&record.provider))
            && (self.services.is_empty() || self.services.contains(&record.service))
            && (self.accounts.is_empty() || self.accounts.contains(&record.account_id))
            && (self.regions.is_empty() || self.regions.contains(&record.region))
    }
}

/// A spending limit for a tenant over a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    /// Row identifier.
    pub id: Uuid,
    /// Owning tenant.
    pub organization_id: Uuid,
    /// Display name.
    pub name: String,
    /// Limit for the period.
    pub amount: f64,
    /// Currency of `amount`.
    pub currency: Currency,
    /// Period the limit applies to.
    pub period: BudgetPeriod,
    /// Spend scope.
    pub filters: BudgetFilters,
    /// Thresholds, ascending by percentage.
    pub thresholds: Vec<BudgetThreshold>,
    /// Spend so far in the current period.
    pub current_spend: f64,
    /// Projected spend at period end.
    pub forecasted_spend: f64,
    /// Derived status.
    pub status: BudgetStatus,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Outcome of [`Budget::evaluate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BudgetEvaluation {
    /// Percentages of thresholds crossed by this evaluation.
    pub newly_crossed: Vec<f64>,
    /// True when this evaluation moved the budget into `exceeded`.
    pub newly_exceeded: bool,
}

impl Budget {
    /// A new active budget with thresholds sorted ascending.
    pub fn new(
        organization_id: Uuid,
        name: impl Into<String>,
        amount: f64,
        period: BudgetPeriod,
        thresholds: impl IntoIterator<Item = f64>,
    ) -> Result<Self, CoreError> {
        if amount.is_nan() || amount <= 0.0 {
            return Err(CoreError::validation("budget amount must be positive"));
        }
        let mut thresholds: Vec<BudgetThreshold> =
            thresholds.into_iter().map(BudgetThreshold::at).collect();
        if thresholds
            .iter()
            .any(|t| t.percentage.is_nan() || t.percentage <= 0.0)
        {
            return Err(CoreError::validation("threshold percentage must be positive"));
        }
        thresholds.sort_by(|a, b| a.percentage.total_cmp(&b.percentage));
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            organization_id,
            name: name.into(),
            amount,
            currency: Currency::default(),
            period,
            filters: BudgetFilters::default(),
            thresholds,
            current_spend: 0.0,
            forecasted_spend: 0.0,
            status: BudgetStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    /// Spend as a percentage of the amount.
    pub fn utilization(&self) -> f64 {
        if self.amount > 0.0 {
            self.current_spend / self.amount * 100.0
        } else {
            0.0
        }
    }

    /// Record `spend`, recompute the status and stamp newly crossed thresholds.
    ///
    /// Inactive budgets keep their status. Thresholds already notified are not
    /// reported again.
    pub fn evaluate(&mut self, spend: f64) -> BudgetEvaluation {
        let was_exceeded = self.status == BudgetStatus::Exceeded;
        self.current_spend = spend;
        self.updated_at = Utc::now();

        let utilization = self.utilization();
        let mut outcome = BudgetEvaluation::default();
        for threshold in &mut self.thresholds {
            if utilization >= threshold.percentage && !threshold.notified {
                threshold.notified = true;
                threshold.triggered_at = Some(self.updated_at);
                outcome.newly_crossed.push(threshold.percentage);
            }
        }

        if self.status == BudgetStatus::Inactive {
            return outcome;
        }

        let crossed = self
            .thresholds
            .iter()
            .any(|t| utilization >= t.percentage);
        self.status = if spend >= self.amount {
            BudgetStatus::Exceeded
        } else if crossed {
            BudgetStatus::Warning
        } else {
            BudgetStatus::Active
        };
        outcome.newly_exceeded = !was_exceeded && self.status == BudgetStatus::Exceeded;
        outcome
    }
}

/// Partial update for a budget.
#[derive(Debug, Clone, Default)]
pub struct BudgetUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New amount.
    pub amount: Option<f64>,
    /// New thresholds (percentages); resets notification flags.
    pub thresholds: Option<Vec<f64>>,
    /// New filters.
    pub filters: Option<BudgetFilters>,
    /// Enable (`true`) or deactivate (`false`).
    pub active: Option<bool>,
}

impl Budget {
    /// Apply a partial update. Changing the amount or thresholds re-derives
    /// the status from the current spend.
    pub fn apply(&mut self, update: &BudgetUpdate) -> Result<(), CoreError> {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(amount) = update.amount {
            if amount.is_nan() || amount <= 0.0 {
                return Err(CoreError::validation("budget amount must be positive"));
            }
            self.amount = amount;
        }
        if let Some(percentages) = &update.thresholds {
            let rebuilt = Budget::new(
                self.organization_id,
                self.name.clone(),
                self.amount,
                self.period,
                percentages.iter().copied(),
            )?;
            self.thresholds = rebuilt.thresholds;
        }
        if let Some(filters) = &update.filters {
            self.filters = filters.clone();
        }
        match update.active {
            Some(false) => self.status = BudgetStatus::Inactive,
            Some(true) if self.status == BudgetStatus::Inactive => {
                self.status = BudgetStatus::Active
            }
            _ => {}
        }
        if self.status != BudgetStatus::Inactive {
            let spend = self.current_spend;
            self.evaluate(spend);
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Aggregate view of a tenant's budgets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetSummary {
    /// Number of budgets.
    pub total_budgets: i64,
    /// Sum of amounts.
    pub total_amount: f64,
    /// Sum of current spend.
    pub total_spend: f64,
    /// Budgets in `exceeded`.
    pub exceeded: i64,
    /// Budgets in `warning`.
    pub warning: i64,
}

impl BudgetSummary {
    /// Fold a set of budgets into a summary.
    pub fn from_budgets<'a>(budgets: impl IntoIterator<Item = &'a Budget>) -> Self {
        budgets.into_iter().fold(Self::default(), |mut acc, b| {
            acc.total_budgets += 1;
            acc.total_amount += b.amount;
            acc.total_spend += b.current_spend;
            match b.status {
                BudgetStatus::Exceeded => acc.exceeded += 1,
                BudgetStatus::Warning => acc.warning += 1,
                _ => {}
            }
            acc
        })
    }
}
