use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use lazy_static::lazy_static;
use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::time::now_msec;

/// Ownership of a `Pending` record by one invocation.
///
/// The token carries the instant its lease started, so a record's
/// `ClaimedAt` is always the `claimed_at` of its `ClaimToken`. `owner`
/// is drawn once per process and `seq` counts the claims it issued:
/// two invocations never hold the same token, even when they claim
/// within the same millisecond.
///
/// Text form: `<claimed_at>-<owner>-<seq>`, lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClaimToken {
    /// ms since epoch
    pub claimed_at: u64,
    pub owner: u64,
    pub seq: u32,
}

lazy_static! {
    static ref OWNER: u64 = thread_rng().gen::<u64>();
}
static SEQ: AtomicU32 = AtomicU32::new(0);

/// A new claim whose lease starts now.
pub fn gen_claim() -> ClaimToken {
    ClaimToken::issued_at(now_msec())
}

impl ClaimToken {
    pub fn issued_at(claimed_at: u64) -> Self {
        Self {
            claimed_at,
            owner: *OWNER,
            seq: SEQ.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for ClaimToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}-{:016x}-{:x}", self.claimed_at, self.owner, self.seq)
    }
}

impl FromStr for ClaimToken {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<ClaimToken, &'static str> {
        let mut parts = s.split('-');
        let (Some(claimed_at), Some(owner), Some(seq), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err("expected three fields");
        };
        Ok(ClaimToken {
            claimed_at: u64::from_str_radix(claimed_at, 16).map_err(|_| "bad claim time")?,
            owner: u64::from_str_radix(owner, 16).map_err(|_| "bad owner")?,
            seq: u32::from_str_radix(seq, 16).map_err(|_| "bad sequence number")?,
        })
    }
}

impl TryFrom<String> for ClaimToken {
    type Error = &'static str;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ClaimToken> for String {
    fn from(claim: ClaimToken) -> String {
        claim.to_string()
    }
}
