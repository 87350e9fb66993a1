//! The step/cursor state machine. A full sync is a chain of bounded units of
//! work; each invocation processes exactly one unit and hands the caller the
//! pointer to invoke next. The fixed order is:
//!
//! ```text
//! 0 (reference data) -> 1 (alerts) -> 2 x sectors (equipment)
//!   -> 2b x sectors (visit history) -> 3 x periods (faults)
//!   -> 4 (derived backfill) -> done
//! ```
//!
//! Step 5 (quotes) is invocable on its own but sits outside the chain.

use crate::catalog::{PERIODS, SECTORS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Step 0: planning-type reference table, wiped and repopulated.
    Reference,
    /// Step 1: currently-stopped devices, wiped and repopulated.
    Alerts,
    /// Step 2: equipment records for one sector.
    Equipment(usize),
    /// Step 2b: visit-history fields merged into existing equipment rows.
    VisitHistory(usize),
    /// Step 3: fault history for one period boundary.
    Faults(usize),
    /// Step 4: planning-code to annual-visit-count denormalization.
    Backfill,
    /// Step 5: quotes, manual extension outside the canonical chain.
    Quotes,
}

impl Step {
    /// Resolves the inbound `step`/`sector`/`period` parameters. Unknown
    /// step identifiers are `None` (the caller answers with the
    /// documentation payload, not an error).
    pub fn parse(step: &str, sector: usize, period: usize) -> Option<Step> {
        match step {
            "0" => Some(Step::Reference),
            "1" => Some(Step::Alerts),
            "2" => Some(Step::Equipment(sector)),
            "2b" => Some(Step::VisitHistory(sector)),
            "3" => Some(Step::Faults(period)),
            "4" => Some(Step::Backfill),
            "5" => Some(Step::Quotes),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Step::Reference => "0",
            Step::Alerts => "1",
            Step::Equipment(_) => "2",
            Step::VisitHistory(_) => "2b",
            Step::Faults(_) => "3",
            Step::Backfill => "4",
            Step::Quotes => "5",
        }
    }

    pub fn cursor(&self) -> Option<usize> {
        match self {
            Step::Equipment(index) | Step::VisitHistory(index) | Step::Faults(index) => {
                Some(*index)
            }
            _ => None,
        }
    }

    /// True when the cursor already points past its list; the unit is a
    /// no-op and the response should just carry the next step.
    pub fn exhausted(&self) -> bool {
        match self {
            Step::Equipment(index) | Step::VisitHistory(index) => *index >= SECTORS.len(),
            Step::Faults(index) => *index >= PERIODS.len(),
            _ => false,
        }
    }

    /// The pointer to hand back after processing this unit: the same step
    /// with the cursor advanced, or the following step with the cursor reset
    /// once the list is finished. `None` means the chain is complete.
    pub fn next(&self) -> Option<Step> {
        match *self {
            Step::Reference => Some(Step::Alerts),
            Step::Alerts => Some(Step::Equipment(0)),
            Step::Equipment(index) if index + 1 < SECTORS.len() => {
                Some(Step::Equipment(index + 1))
            }
            Step::Equipment(_) => Some(Step::VisitHistory(0)),
            Step::VisitHistory(index) if index + 1 < SECTORS.len() => {
                Some(Step::VisitHistory(index + 1))
            }
            Step::VisitHistory(_) => Some(Step::Faults(0)),
            Step::Faults(index) if index + 1 < PERIODS.len() => Some(Step::Faults(index + 1)),
            Step::Faults(_) => Some(Step::Backfill),
            Step::Backfill => None,
            Step::Quotes => None,
        }
    }

    /// Query string the caller re-invokes with, e.g. `?step=2&sector=3`.
    pub fn query(&self) -> String {
        match self {
            Step::Equipment(index) | Step::VisitHistory(index) => {
                format!("?step={}&sector={index}", self.label())
            }
            Step::Faults(index) => format!("?step=3&period={index}"),
            _ => format!("?step={}", self.label()),
        }
    }
}
