//! Pipeline stage derivation for quotes and orders.
//!
//! Each deal kind has a [`StageMachine`]: an ordered list of rules evaluated
//! first-match-wins against flags read from the ERP record, plus the
//! classification of every stage token the guard needs.
//!
//! The guard decides whether a freshly derived stage may replace the stage a
//! deal currently holds in the CRM:
//!
//! 1. No current stage (new deal): apply.
//! 2. Current stage is permanent terminal: keep it.
//! 3. Derived stage is terminal (permanent or reversible): apply.
//! 4. Both open: apply only if the derived stage sits at the same or a later
//!    position than the current one.

use crate::record::SourceRecord;

pub const QUOTE_CREATED: &str = "quote_created";
pub const TECHNICAL_REVIEW: &str = "technical_review";
pub const QUOTE_SENT: &str = "quote_sent";
pub const FOLLOW_UP: &str = "follow_up";
pub const QUOTE_EXPIRED: &str = "quote_expired";
pub const CLOSED_WON: &str = "closedwon";
pub const CLOSED_LOST: &str = "closedlost";

pub const ORDER_RECEIVED: &str = "order_received";
pub const ORDER_HELD: &str = "order_held";
pub const PARTIALLY_SHIPPED: &str = "partially_shipped";
pub const COMPLETED: &str = "completed";
pub const CANCELLED: &str = "cancelled";

/// How the guard treats a stage token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageCategory {
    /// Never left once reached.
    PermanentTerminal,
    /// Terminal-looking, but superseded by any later derived stage.
    ReversibleTerminal,
    /// Working stage, only moves forward.
    Open,
}

/// Why the guard kept the current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepReason {
    /// The deal already sits in a permanent terminal stage.
    PermanentTerminal,
    /// The derived open stage is behind the current open stage.
    Regression,
}

/// Outcome of running the guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageDecision {
    /// Write the derived stage.
    Apply(&'static str),
    /// Leave the deal's stage untouched.
    Keep {
        current: String,
        derived: &'static str,
        reason: KeepReason,
    },
}

impl StageDecision {
    /// Stage to write to the CRM, if any.
    #[must_use]
    pub fn stage_to_write(&self) -> Option<&'static str> {
        match self {
            Self::Apply(stage) => Some(*stage),
            Self::Keep { .. } => None,
        }
    }

    /// The stage the ERP data maps to, whether or not it is written.
    #[must_use]
    pub fn derived(&self) -> &'static str {
        match self {
            Self::Apply(stage) => *stage,
            Self::Keep { derived, .. } => *derived,
        }
    }
}

/// One rule: when `matches` holds for the flags, the stage is `stage`.
pub struct StageRule<F> {
    pub name: &'static str,
    pub matches: fn(&F) -> bool,
    pub stage: &'static str,
}

/// First-match-wins rule list plus the stage classification for one deal kind.
pub struct StageMachine<F: 'static> {
    rules: &'static [StageRule<F>],
    default: &'static str,
    permanent: &'static [&'static str],
    reversible: &'static [&'static str],
    /// Open stages and their position in the forward ordering.
    open_positions: &'static [(&'static str, u8)],
}

impl<F: 'static> StageMachine<F> {
    /// Map source flags to a stage token.
    #[must_use]
    pub fn derive(&self, flags: &F) -> &'static str {
        self.rules
            .iter()
            .find(|rule| (rule.matches)(flags))
            .map_or(self.default, |rule| rule.stage)
    }

    /// Classify a stage token. Unknown tokens are open stages.
    #[must_use]
    pub fn category(&self, stage: &str) -> StageCategory {
        let stage = normalize(stage);
        if self.permanent.contains(&stage.as_str()) {
            StageCategory::PermanentTerminal
        } else if self.reversible.contains(&stage.as_str()) {
            StageCategory::ReversibleTerminal
        } else {
            StageCategory::Open
        }
    }

    /// Position of an open stage. Unknown stages sit at 0.
    #[must_use]
    pub fn position(&self, stage: &str) -> u8 {
        let stage = normalize(stage);
        self.open_positions
            .iter()
            .find(|(name, _)| *name == stage)
            .map_or(0, |(_, pos)| *pos)
    }

    /// Decide whether `derived` may replace `current`.
    ///
    /// A blank current stage counts as absent.
    #[must_use]
    pub fn guard(&self, derived: &'static str, current: Option<&str>) -> StageDecision {
        let Some(current) = current.map(str::trim).filter(|s| !s.is_empty()) else {
            return StageDecision::Apply(derived);
        };

        if self.category(current) == StageCategory::PermanentTerminal {
            return StageDecision::Keep {
                current: current.to_string(),
                derived,
                reason: KeepReason::PermanentTerminal,
            };
        }

        if self.category(derived) != StageCategory::Open {
            return StageDecision::Apply(derived);
        }

        // A reversible terminal current stage has no open position, so any
        // open stage moves forward from it.
        let current_position = match self.category(current) {
            StageCategory::ReversibleTerminal => 0,
            _ => self.position(current),
        };

        if self.position(derived) >= current_position {
            StageDecision::Apply(derived)
        } else {
            StageDecision::Keep {
                current: current.to_string(),
                derived,
                reason: KeepReason::Regression,
            }
        }
    }

    /// Derive from flags and run the guard in one step.
    #[must_use]
    pub fn decide(&self, flags: &F, current: Option<&str>) -> StageDecision {
        self.guard(self.derive(flags), current)
    }
}

fn normalize(stage: &str) -> String {
    stage.trim().to_ascii_lowercase()
}

// ─── Quotes ──────────────────────────────────────────────────────────────────

/// Quote status flags as reported by the ERP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuoteFlags {
    /// Converted to a sales order.
    pub ordered: bool,
    pub expired: bool,
    /// Closed without an order.
    pub closed: bool,
    /// Sent to the customer.
    pub quoted: bool,
}

impl QuoteFlags {
    #[must_use]
    pub fn from_record(record: &SourceRecord) -> Self {
        Self {
            ordered: record.flag("Ordered"),
            expired: record.flag("Expired"),
            closed: record.flag("QuoteClosed"),
            quoted: record.flag("Quoted"),
        }
    }
}

pub static QUOTE_STAGES: StageMachine<QuoteFlags> = StageMachine {
    rules: &[
        StageRule {
            name: "converted to order",
            matches: |f| f.ordered,
            stage: CLOSED_WON,
        },
        StageRule {
            name: "expired",
            matches: |f| f.expired,
            stage: QUOTE_EXPIRED,
        },
        StageRule {
            name: "closed without order",
            matches: |f| f.closed,
            stage: CLOSED_LOST,
        },
        StageRule {
            name: "sent to customer",
            matches: |f| f.quoted,
            stage: QUOTE_SENT,
        },
    ],
    default: QUOTE_CREATED,
    permanent: &[CLOSED_WON, CLOSED_LOST],
    reversible: &[QUOTE_EXPIRED],
    open_positions: &[
        (QUOTE_CREATED, 1),
        (TECHNICAL_REVIEW, 2),
        (QUOTE_SENT, 3),
        (FOLLOW_UP, 4),
    ],
};

// ─── Orders ──────────────────────────────────────────────────────────────────

/// Order status flags as reported by the ERP.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderFlags {
    pub void: bool,
    pub open: bool,
    pub held: bool,
    pub total_shipped: f64,
}

impl Default for OrderFlags {
    fn default() -> Self {
        Self {
            void: false,
            open: true,
            held: false,
            total_shipped: 0.0,
        }
    }
}

impl OrderFlags {
    /// Missing `OpenOrder` means open, missing `TotalShipped` means nothing shipped.
    #[must_use]
    pub fn from_record(record: &SourceRecord) -> Self {
        Self {
            void: record.flag("VoidOrder"),
            open: record.flag_or("OpenOrder", true),
            held: record.flag("OrderHeld"),
            total_shipped: record.float("TotalShipped").unwrap_or(0.0),
        }
    }
}

pub static ORDER_STAGES: StageMachine<OrderFlags> = StageMachine {
    rules: &[
        StageRule {
            name: "void",
            matches: |f| f.void,
            stage: CANCELLED,
        },
        StageRule {
            name: "closed",
            matches: |f| !f.open,
            stage: COMPLETED,
        },
        StageRule {
            name: "on hold",
            matches: |f| f.held,
            stage: ORDER_HELD,
        },
        StageRule {
            name: "partially shipped",
            matches: |f| f.open && f.total_shipped > 0.0,
            stage: PARTIALLY_SHIPPED,
        },
    ],
    default: ORDER_RECEIVED,
    permanent: &[COMPLETED, CANCELLED],
    reversible: &[],
    open_positions: &[(ORDER_RECEIVED, 1), (ORDER_HELD, 1), (PARTIALLY_SHIPPED, 2)],
};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quote(ordered: bool, expired: bool, closed: bool, quoted: bool) -> QuoteFlags {
        QuoteFlags {
            ordered,
            expired,
            closed,
            quoted,
        }
    }

    fn order(value: serde_json::Value) -> OrderFlags {
        let record: SourceRecord = serde_json::from_value(value).expect("record");
        OrderFlags::from_record(&record)
    }

    #[test]
    fn quote_rules_are_first_match_wins() {
        assert_eq!(QUOTE_STAGES.derive(&quote(true, true, true, true)), CLOSED_WON);
        assert_eq!(QUOTE_STAGES.derive(&quote(false, true, true, true)), QUOTE_EXPIRED);
        assert_eq!(QUOTE_STAGES.derive(&quote(false, false, true, true)), CLOSED_LOST);
        assert_eq!(QUOTE_STAGES.derive(&quote(false, false, false, true)), QUOTE_SENT);
        assert_eq!(QUOTE_STAGES.derive(&QuoteFlags::default()), QUOTE_CREATED);
    }

    #[test]
    fn order_stage_examples() {
        let completed = order(json!({
            "VoidOrder": false, "OpenOrder": false, "OrderHeld": false, "TotalShipped": 0
        }));
        assert_eq!(ORDER_STAGES.derive(&completed), COMPLETED);

        let held = order(json!({"VoidOrder": false, "OpenOrder": true, "OrderHeld": true}));
        assert_eq!(ORDER_STAGES.derive(&held), ORDER_HELD);

        let void = order(json!({"VoidOrder": true, "OpenOrder": true}));
        assert_eq!(ORDER_STAGES.derive(&void), CANCELLED);
    }

    #[test]
    fn order_defaults_to_open_and_unshipped() {
        let bare = order(json!({}));
        assert!(bare.open);
        assert_eq!(bare.total_shipped, 0.0);
        assert_eq!(ORDER_STAGES.derive(&bare), ORDER_RECEIVED);

        let shipping = order(json!({"OpenOrder": true, "TotalShipped": "3"}));
        assert_eq!(ORDER_STAGES.derive(&shipping), PARTIALLY_SHIPPED);
    }

    #[test]
    fn categories() {
        assert_eq!(QUOTE_STAGES.category("closedwon"), StageCategory::PermanentTerminal);
        assert_eq!(QUOTE_STAGES.category(" ClosedLost "), StageCategory::PermanentTerminal);
        assert_eq!(QUOTE_STAGES.category("quote_expired"), StageCategory::ReversibleTerminal);
        assert_eq!(QUOTE_STAGES.category("technical_review"), StageCategory::Open);
        assert_eq!(QUOTE_STAGES.category("something_custom"), StageCategory::Open);
        assert_eq!(ORDER_STAGES.category("cancelled"), StageCategory::PermanentTerminal);
        assert_eq!(ORDER_STAGES.category("completed"), StageCategory::PermanentTerminal);
    }

    #[test]
    fn positions_are_case_insensitive_and_unknown_is_zero() {
        assert_eq!(QUOTE_STAGES.position("QUOTE_SENT"), 3);
        assert_eq!(QUOTE_STAGES.position("follow_up"), 4);
        assert_eq!(QUOTE_STAGES.position("appointmentscheduled"), 0);
        assert_eq!(ORDER_STAGES.position("order_held"), ORDER_STAGES.position("order_received"));
    }

    #[test]
    fn new_deal_takes_any_derived_stage() {
        assert_eq!(QUOTE_STAGES.guard(QUOTE_CREATED, None), StageDecision::Apply(QUOTE_CREATED));
        assert_eq!(QUOTE_STAGES.guard(CLOSED_LOST, Some("  ")), StageDecision::Apply(CLOSED_LOST));
    }

    #[test]
    fn permanent_terminal_is_never_left() {
        for derived in [QUOTE_CREATED, QUOTE_SENT, QUOTE_EXPIRED, CLOSED_LOST] {
            let decision = QUOTE_STAGES.guard(derived, Some(CLOSED_WON));
            assert!(
                matches!(
                    decision,
                    StageDecision::Keep {
                        reason: KeepReason::PermanentTerminal,
                        ..
                    }
                ),
                "{derived} replaced closedwon"
            );
        }
        assert_eq!(
            ORDER_STAGES.guard(ORDER_RECEIVED, Some("completed")).stage_to_write(),
            None
        );
    }

    #[test]
    fn terminal_derived_stage_overrides_open_stages() {
        assert_eq!(QUOTE_STAGES.guard(CLOSED_WON, Some(QUOTE_SENT)), StageDecision::Apply(CLOSED_WON));
        assert_eq!(QUOTE_STAGES.guard(QUOTE_EXPIRED, Some(FOLLOW_UP)), StageDecision::Apply(QUOTE_EXPIRED));
        assert_eq!(ORDER_STAGES.guard(CANCELLED, Some(PARTIALLY_SHIPPED)), StageDecision::Apply(CANCELLED));
    }

    #[test]
    fn reversible_terminal_can_be_superseded() {
        assert_eq!(
            QUOTE_STAGES.guard(QUOTE_CREATED, Some(QUOTE_EXPIRED)),
            StageDecision::Apply(QUOTE_CREATED)
        );
    }

    #[test]
    fn open_stages_only_move_forward() {
        let decision = QUOTE_STAGES.guard(QUOTE_CREATED, Some(QUOTE_SENT));
        assert_eq!(
            decision,
            StageDecision::Keep {
                current: QUOTE_SENT.to_string(),
                derived: QUOTE_CREATED,
                reason: KeepReason::Regression,
            }
        );
        assert_eq!(decision.derived(), QUOTE_CREATED);

        // destination-only stages are respected
        assert!(QUOTE_STAGES.guard(QUOTE_CREATED, Some(TECHNICAL_REVIEW)).stage_to_write().is_none());
        assert!(QUOTE_STAGES.guard(QUOTE_SENT, Some(FOLLOW_UP)).stage_to_write().is_none());

        // equal position re-applies, later position advances
        assert_eq!(QUOTE_STAGES.guard(QUOTE_SENT, Some(QUOTE_SENT)), StageDecision::Apply(QUOTE_SENT));
        assert_eq!(
            QUOTE_STAGES.guard(QUOTE_SENT, Some(TECHNICAL_REVIEW)),
            StageDecision::Apply(QUOTE_SENT)
        );
        assert_eq!(
            ORDER_STAGES.guard(ORDER_RECEIVED, Some(ORDER_HELD)),
            StageDecision::Apply(ORDER_RECEIVED)
        );
        assert!(ORDER_STAGES.guard(ORDER_RECEIVED, Some(PARTIALLY_SHIPPED)).stage_to_write().is_none());
    }

    #[test]
    fn unknown_current_stage_is_behind_every_known_open_stage() {
        assert_eq!(
            QUOTE_STAGES.guard(QUOTE_CREATED, Some("appointmentscheduled")),
            StageDecision::Apply(QUOTE_CREATED)
        );
    }

    #[test]
    fn decide_combines_derivation_and_guard() {
        let flags = quote(false, false, false, false);
        assert_eq!(QUOTE_STAGES.decide(&flags, Some(QUOTE_SENT)).stage_to_write(), None);
        let flags = quote(true, false, false, false);
        assert_eq!(QUOTE_STAGES.decide(&flags, Some(QUOTE_SENT)).stage_to_write(), Some(CLOSED_WON));
    }
}
