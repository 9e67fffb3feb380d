// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Helpers shared by provider implementations to produce normalized costs:
//! decimal amounts, UTC day alignment and positional group keys.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use super::{CostItem, GroupBy};

/// Parse a provider amount. Unparseable input yields `0.0` and a
/// `PartialParse` warning instead of failing the response.
pub fn parse_amount(raw: &str, context: &str, warnings: &mut Vec<String>) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => value,
        _ => {
            warnings.push(format!("PartialParse: {}: invalid amount {:?}", context, raw));
            0.0
        }
    }
}

/// Parse a provider date into the UTC day it falls on.
///
/// Accepts `YYYY-MM-DD`, `YYYYMMDD`, RFC 3339 timestamps (converted to UTC
/// first) and offset-less timestamps, which are taken as UTC.
pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if raw.len() == 8
        && let Ok(date) = NaiveDate::parse_from_str(raw, "%Y%m%d")
    {
        return Some(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc).date_naive());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|ts| ts.date())
}

/// Build an item whose dimension fields come from `keys`, where `keys[i]`
/// belongs to `group_by[i]`. Missing or empty keys leave the field unset.
pub fn grouped_item(date: NaiveDate, amount: f64, keys: &[String], group_by: &[GroupBy]) -> CostItem {
    let mut item = CostItem {
        date,
        amount,
        service: None,
        account_id: None,
        region: None,
    };
    for (axis, key) in group_by.iter().zip(keys) {
        if key.is_empty() {
            continue;
        }
        let slot = match axis {
            GroupBy::Service => &mut item.service,
            GroupBy::Account => &mut item.account_id,
            GroupBy::Region => &mut item.region,
        };
        *slot = Some(key.clone());
    }
    item
}

/// Sum of item amounts.
pub fn total(costs: &[CostItem]) -> f64 {
    costs.iter().map(|c| c.amount).sum()
}
