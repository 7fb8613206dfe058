//!
//! Checkout status
//!
use serde::{Deserialize, Serialize};

/// Relation of a cache lookup result to the stored state.
///
/// `checkout` computes the status without mutating the cache;
/// `update` consumes it and applies the corresponding mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum CheckoutStatus {
    Unchanged,
    NeedUpdate,
    Removed,
    NotFound,
    New,
    Updated,
}

impl From<CheckoutStatus> for i64 {
    fn from(status: CheckoutStatus) -> i64 {
        match status {
            CheckoutStatus::Unchanged => 0,
            CheckoutStatus::NeedUpdate => 1,
            CheckoutStatus::Removed => 2,
            CheckoutStatus::NotFound => 3,
            CheckoutStatus::New => 4,
            CheckoutStatus::Updated => 5,
        }
    }
}

impl TryFrom<i64> for CheckoutStatus {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CheckoutStatus::Unchanged),
            1 => Ok(CheckoutStatus::NeedUpdate),
            2 => Ok(CheckoutStatus::Removed),
            3 => Ok(CheckoutStatus::NotFound),
            4 => Ok(CheckoutStatus::New),
            5 => Ok(CheckoutStatus::Updated),
            n => Err(format!("invalid checkout status {n}")),
        }
    }
}

impl std::fmt::Display for CheckoutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CheckoutStatus::Unchanged => "UNCHANGED",
            CheckoutStatus::NeedUpdate => "NEEDUPDATE",
            CheckoutStatus::Removed => "REMOVED",
            CheckoutStatus::NotFound => "NOTFOUND",
            CheckoutStatus::New => "NEW",
            CheckoutStatus::Updated => "UPDATED",
        })
    }
}
