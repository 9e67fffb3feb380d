// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Canonical data model.
//!
//! Every entity carries an opaque id, a tenant (organization) id and
//! created/updated timestamps. Enumerations round-trip through the lowercase
//! text stored in the database and used on the wire.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Declares a closed, text-backed enumeration with `as_str`, `Display` and
/// `FromStr` that agree with the serde representation.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident => $text:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The stored text form.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::error::CoreError::Validation(format!(
                        "unknown {}: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

pub mod anomaly;
pub mod budget;
pub mod cost;
pub mod credential;
pub mod forecast;
pub mod organization;
pub mod recommendation;
pub mod remediation;

pub use anomaly::*;
pub use budget::*;
pub use cost::*;
pub use credential::*;
pub use forecast::*;
pub use organization::*;
pub use recommendation::*;
pub use remediation::*;

text_enum! {
    /// Cloud provider kind.
    pub enum ProviderKind {
        /// Amazon Web Services.
        Aws => "aws",
        /// Microsoft Azure.
        Azure => "azure",
        /// Google Cloud (modelled, no provider implementation).
        Gcp => "gcp",
    }
}

text_enum! {
    /// ISO currency codes handled by the control plane.
    pub enum Currency {
        /// US dollar.
        Usd => "USD",
        /// Euro.
        Eur => "EUR",
        /// Pound sterling.
        Gbp => "GBP",
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::Usd
    }
}

text_enum! {
    /// Time bucket size for cost queries and forecasts.
    pub enum Granularity {
        /// One bucket per hour.
        Hourly => "hourly",
        /// One bucket per UTC day.
        Daily => "daily",
        /// One bucket per ISO week.
        Weekly => "weekly",
        /// One bucket per calendar month.
        Monthly => "monthly",
    }
}

impl Default for Granularity {
    fn default() -> Self {
        Self::Daily
    }
}

/// Page request for list queries. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// 1-based page number.
    pub page: u32,
    /// Rows per page (1..=100).
    pub page_size: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
        }
    }
}

impl Pagination {
    /// Largest accepted page size.
    pub const MAX_PAGE_SIZE: u32 = 100;

    /// Build a validated page request.
    pub fn new(page: u32, page_size: u32) -> Result<Self, CoreError> {
        if page == 0 {
            return Err(CoreError::validation("page must be >= 1"));
        }
        if page_size == 0 || page_size > Self::MAX_PAGE_SIZE {
            return Err(CoreError::validation("page_size must be within 1..=100"));
        }
        Ok(Self { page, page_size })
    }

    /// SQL `LIMIT`.
    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    /// SQL `OFFSET`.
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.page_size)
    }
}

/// A page of results with the unpaginated total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// Rows on this page.
    pub items: Vec<T>,
    /// Total matching rows.
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_text_enum_round_trip() {
        for kind in ProviderKind::ALL {
            assert_eq!(ProviderKind::from_str(kind.as_str()).unwrap(), *kind);
        }
        assert_eq!(Currency::Usd.to_string(), "USD");
        assert_eq!(
            serde_json::to_string(&Granularity::Monthly).unwrap(),
            "\"monthly\""
        );
    }

    #[test]
    fn test_text_enum_unknown_is_validation() {
        let err = ProviderKind::from_str("oracle").unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(err.to_string().contains("oracle"));
    }

    #[test]
    fn test_pagination() {
        let page = Pagination::new(3, 25).unwrap();
        assert_eq!(page.limit(), 25);
        assert_eq!(page.offset(), 50);
        assert!(Pagination::new(0, 10).is_err());
        assert!(Pagination::new(1, 101).is_err());
        assert_eq!(Pagination::default().offset(), 0);
    }
}
