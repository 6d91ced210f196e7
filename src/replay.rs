//! Stock card replay.
//!
//! Issues are recorded as they happen, even when the store is short, so the
//! raw movement history can run below zero. Replaying it produces the card a
//! store keeper prints: every row carries a non-negative running balance,
//! and issues that could not be met at the time are held back and settled,
//! oldest first, against later receipts.
use crate::error::{LedgerError, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MovementKind {
    Receive,
    Issue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Movement {
    pub kind: MovementKind,
    pub date: NaiveDate,
    pub quantity: Decimal,
    pub reference: String,
    pub counterpart: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opening {
    pub date: NaiveDate,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Opening,
    Receive,
    Issue,
    /// Settlement of an earlier issue against a later receipt.
    DeferredIssue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRow {
    pub date: NaiveDate,
    pub kind: RowKind,
    pub reference: String,
    pub counterpart: String,
    pub received: Decimal,
    pub issued: Decimal,
    pub balance: Decimal,
}

/// Issue quantity still waiting for stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortfall {
    pub issued_on: NaiveDate,
    pub quantity: Decimal,
    pub reference: String,
    pub counterpart: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockCard {
    pub opening: Opening,
    pub rows: Vec<LedgerRow>,
    pub outstanding: Vec<Shortfall>,
}

impl StockCard {
    /// Balance after the last row, net of issues still outstanding.
    pub fn closing_balance(&self) -> Decimal {
        let running = self
            .rows
            .last()
            .map(|r| r.balance)
            .unwrap_or(self.opening.quantity);
        let owed: Decimal = self.outstanding.iter().map(|s| s.quantity).sum();
        running - owed
    }

    pub fn total_received(&self) -> Decimal {
        self.rows.iter().map(|r| r.received).sum()
    }

    pub fn total_issued(&self) -> Decimal {
        let shown: Decimal = self.rows.iter().map(|r| r.issued).sum();
        let owed: Decimal = self.outstanding.iter().map(|s| s.quantity).sum();
        shown + owed
    }
}

struct Replay {
    balance: Decimal,
    rows: Vec<LedgerRow>,
    pending: VecDeque<Shortfall>,
}

impl Replay {
    fn row(&mut self, date: NaiveDate, kind: RowKind, from: &Movement, received: Decimal, issued: Decimal) {
        self.push_row(date, kind, &from.reference, &from.counterpart, received, issued);
    }

    fn push_row(
        &mut self,
        date: NaiveDate,
        kind: RowKind,
        reference: &str,
        counterpart: &str,
        received: Decimal,
        issued: Decimal,
    ) {
        self.rows.push(LedgerRow {
            date,
            kind,
            reference: reference.to_string(),
            counterpart: counterpart.to_string(),
            received,
            issued,
            balance: self.balance,
        });
    }

    fn receive(&mut self, m: &Movement) {
        self.balance += m.quantity;
        self.row(m.date, RowKind::Receive, m, m.quantity, Decimal::ZERO);
        self.settle(m.date);
    }

    /// Pay queued shortfalls out of the balance, oldest first.
    fn settle(&mut self, date: NaiveDate) {
        while self.balance > Decimal::ZERO {
            let Some(mut head) = self.pending.pop_front() else {
                break;
            };
            let settled = head.quantity.min(self.balance);
            self.balance -= settled;
            self.push_row(
                date,
                RowKind::DeferredIssue,
                &head.reference,
                &head.counterpart,
                Decimal::ZERO,
                settled,
            );
            head.quantity -= settled;
            if !head.quantity.is_zero() {
                // strict FIFO: a partly settled head blocks the rest
                self.pending.push_front(head);
                break;
            }
        }
    }

    fn issue(&mut self, m: &Movement) {
        if self.balance >= m.quantity {
            self.balance -= m.quantity;
            self.row(m.date, RowKind::Issue, m, Decimal::ZERO, m.quantity);
            return;
        }

        let mut short = m.quantity;
        if self.balance > Decimal::ZERO {
            let available = self.balance;
            self.balance = Decimal::ZERO;
            self.row(m.date, RowKind::Issue, m, Decimal::ZERO, available);
            short -= available;
        }
        if short.is_zero() {
            return;
        }
        self.pending.push_back(Shortfall {
            issued_on: m.date,
            quantity: short,
            reference: m.reference.clone(),
            counterpart: m.counterpart.clone(),
        });
    }
}

fn is_negative(q: Decimal) -> bool {
    q.is_sign_negative() && !q.is_zero()
}

/// Replay movements for one NAC code on top of an opening balance.
///
/// Movements are stably ordered by date, receipts ahead of issues on the same
/// day. Zero quantity movements still produce a row.
pub fn replay(opening: Opening, movements: Vec<Movement>) -> Result<StockCard> {
    replay_from(opening, Vec::new(), movements)
}

/// Replay continuing an earlier card: `owed` are the shortfalls still
/// outstanding at the opening date, settled first against available stock.
pub fn replay_from(opening: Opening, owed: Vec<Shortfall>, mut movements: Vec<Movement>) -> Result<StockCard> {
    if is_negative(opening.quantity) {
        return Err(LedgerError::Validation(format!(
            "opening balance {} is negative, carry the deficit as shortfalls",
            opening.quantity
        )));
    }
    if let Some(bad) = owed.iter().find(|s| is_negative(s.quantity)) {
        return Err(LedgerError::Validation(format!(
            "shortfall {} has negative quantity {}",
            bad.reference, bad.quantity
        )));
    }
    if let Some(bad) = movements.iter().find(|m| is_negative(m.quantity)) {
        return Err(LedgerError::Validation(format!(
            "movement {} has negative quantity {}",
            bad.reference, bad.quantity
        )));
    }
    movements.sort_by_key(|m| (m.date, m.kind));

    let mut state = Replay {
        balance: opening.quantity,
        rows: Vec::with_capacity(movements.len() + 1),
        pending: owed.into_iter().filter(|s| !s.quantity.is_zero()).collect(),
    };
    state.push_row(
        opening.date,
        RowKind::Opening,
        "Opening balance",
        "",
        Decimal::ZERO,
        Decimal::ZERO,
    );
    state.settle(opening.date);

    for m in &movements {
        match m.kind {
            MovementKind::Receive => state.receive(m),
            MovementKind::Issue => state.issue(m),
        }
    }

    Ok(StockCard {
        opening,
        rows: state.rows,
        outstanding: state.pending.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn mv(kind: MovementKind, d: u32, q: Decimal, reference: &str) -> Movement {
        Movement {
            kind,
            date: day(d),
            quantity: q,
            reference: reference.into(),
            counterpart: String::new(),
        }
    }

    fn opening(q: Decimal) -> Opening {
        Opening {
            date: day(1),
            quantity: q,
        }
    }

    #[test]
    fn deferred_issue_settles_fifo() {
        let card = replay(
            opening(dec!(0)),
            vec![
                mv(MovementKind::Issue, 2, dec!(10), "ISS-1"),
                mv(MovementKind::Receive, 3, dec!(6), "RCV-1"),
                mv(MovementKind::Receive, 4, dec!(10), "RCV-2"),
            ],
        )
        .unwrap();

        let shape: Vec<(RowKind, Decimal, Decimal, Decimal)> = card
            .rows
            .iter()
            .map(|r| (r.kind, r.received, r.issued, r.balance))
            .collect();
        assert_eq!(
            shape,
            vec![
                (RowKind::Opening, dec!(0), dec!(0), dec!(0)),
                (RowKind::Receive, dec!(6), dec!(0), dec!(6)),
                (RowKind::DeferredIssue, dec!(0), dec!(6), dec!(0)),
                (RowKind::Receive, dec!(10), dec!(0), dec!(10)),
                (RowKind::DeferredIssue, dec!(0), dec!(4), dec!(6)),
            ]
        );
        assert_eq!(card.rows[2].date, day(3));
        assert_eq!(card.rows[4].reference, "ISS-1");
        assert!(card.outstanding.is_empty());
        assert_eq!(card.closing_balance(), dec!(6));
    }

    #[test]
    fn partial_issue_emits_satisfiable_part() {
        let card = replay(
            opening(dec!(3)),
            vec![mv(MovementKind::Issue, 2, dec!(5), "ISS-1")],
        )
        .unwrap();

        assert_eq!(card.rows.len(), 2);
        assert_eq!(card.rows[1].issued, dec!(3));
        assert_eq!(card.rows[1].balance, dec!(0));
        assert_eq!(card.outstanding[0].quantity, dec!(2));
        assert_eq!(card.closing_balance(), dec!(-2));
    }

    #[test]
    fn head_of_queue_blocks_later_shortfalls() {
        let card = replay(
            opening(dec!(0)),
            vec![
                mv(MovementKind::Issue, 2, dec!(8), "ISS-1"),
                mv(MovementKind::Issue, 2, dec!(1), "ISS-2"),
                mv(MovementKind::Receive, 3, dec!(5), "RCV-1"),
            ],
        )
        .unwrap();

        assert_eq!(card.outstanding.len(), 2);
        assert_eq!(card.outstanding[0].reference, "ISS-1");
        assert_eq!(card.outstanding[0].quantity, dec!(3));
        assert_eq!(card.outstanding[1].quantity, dec!(1));
        assert_eq!(card.closing_balance(), dec!(-4));
    }

    #[test]
    fn same_day_receipts_come_first() {
        let card = replay(
            opening(dec!(0)),
            vec![
                mv(MovementKind::Issue, 5, dec!(2), "ISS-1"),
                mv(MovementKind::Receive, 5, dec!(2), "RCV-1"),
            ],
        )
        .unwrap();

        assert_eq!(card.rows[1].kind, RowKind::Receive);
        assert_eq!(card.rows[2].kind, RowKind::Issue);
        assert!(card.outstanding.is_empty());
    }

    #[test]
    fn carried_shortfalls_settle_against_later_receipts() {
        let owed = vec![Shortfall {
            issued_on: day(2),
            quantity: dec!(10),
            reference: "ISS-1".into(),
            counterpart: "Crane 4".into(),
        }];
        let card = replay_from(
            opening(dec!(0)),
            owed,
            vec![mv(MovementKind::Receive, 5, dec!(25), "RCV-2")],
        )
        .unwrap();

        let shape: Vec<(RowKind, Decimal)> = card.rows.iter().map(|r| (r.kind, r.balance)).collect();
        assert_eq!(
            shape,
            vec![
                (RowKind::Opening, dec!(0)),
                (RowKind::Receive, dec!(25)),
                (RowKind::DeferredIssue, dec!(15)),
            ]
        );
        assert_eq!(card.rows[2].issued, dec!(10));
        assert_eq!(card.total_issued(), dec!(10));
        assert_eq!(card.closing_balance(), dec!(15));
    }

    #[test]
    fn negative_opening_is_rejected() {
        let err = replay(opening(dec!(-3)), Vec::new());
        assert!(matches!(err, Err(LedgerError::Validation(_))));
    }

    #[test]
    fn negative_quantity_is_rejected() {
        let err = replay(opening(dec!(0)), vec![mv(MovementKind::Receive, 2, dec!(-1), "R")]);
        assert!(matches!(err, Err(LedgerError::Validation(_))));
    }
}
