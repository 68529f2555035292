//! What a queue does with items that do not fit.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// Overflow strategy of a [`Queue`](super::Queue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Suspend the offering fiber until space frees up.
    BackPressure,
    /// Discard the surplus; the offer reports `false`.
    Dropping,
    /// Evict the oldest buffered items to make room.
    Sliding,
    /// No capacity limit.
    Unbounded,
}

/// Outcome of handing the surplus of an offer to the strategy.
pub(crate) enum Surplus<A> {
    /// Everything fits now.
    Accepted,
    /// Some items were discarded.
    Dropped,
    /// The offer has to wait for these items.
    Suspend(VecDeque<A>),
}

impl Strategy {
    /// Deal with `surplus` that did not fit into `buffer`.
    pub(crate) fn handle_surplus<A>(
        self,
        buffer: &mut VecDeque<A>,
        capacity: usize,
        surplus: VecDeque<A>,
    ) -> Surplus<A> {
        if surplus.is_empty() {
            return Surplus::Accepted;
        }
        match self {
            Strategy::BackPressure => Surplus::Suspend(surplus),
            Strategy::Dropping => Surplus::Dropped,
            Strategy::Sliding => {
                for item in surplus {
                    if buffer.len() >= capacity {
                        buffer.pop_front();
                    }
                    buffer.push_back(item);
                }
                Surplus::Accepted
            }
            Strategy::Unbounded => {
                buffer.extend(surplus);
                Surplus::Accepted
            }
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(match self {
            Strategy::BackPressure => "back-pressure",
            Strategy::Dropping => "dropping",
            Strategy::Sliding => "sliding",
            Strategy::Unbounded => "unbounded",
        })
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bounded" | "back-pressure" | "backpressure" => Ok(Strategy::BackPressure),
            "dropping" => Ok(Strategy::Dropping),
            "sliding" => Ok(Strategy::Sliding),
            "unbounded" => Ok(Strategy::Unbounded),
            other => Err(format!("unknown queue strategy '{}'", other)),
        }
    }
}
