//! Stock card queries built on the replay engine.
use crate::error::{LedgerError, Result};
use crate::replay::{Movement, MovementKind, Opening, StockCard, replay, replay_from};
use crate::service::ProcurementService;
use crate::types::ApprovalStatus;
use chrono::NaiveDate;
use tracing::{debug, instrument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockCardReport {
    pub nac_code: String,
    pub item_name: String,
    pub unit: String,
    pub card_number: String,
    pub card: StockCard,
}

impl ProcurementService {
    /// Approved movements of one NAC code, oldest first.
    pub fn approved_movements(&self, nac_code: &str) -> Result<Vec<Movement>> {
        let mut movements = Vec::new();

        for receive in self.store.receives_for(nac_code)? {
            if receive.approval_status != ApprovalStatus::Approved {
                continue;
            }
            let reference = match self.store.request(&receive.request_ref)? {
                Some(request) => request.request_number,
                None => receive.request_ref.clone(),
            };
            movements.push(Movement {
                kind: MovementKind::Receive,
                date: receive.receive_date.date(),
                quantity: receive.received_quantity.value(),
                reference,
                counterpart: receive.location,
            });
        }

        for issue in self.store.issues_for(nac_code)? {
            if issue.approval_status != ApprovalStatus::Approved {
                continue;
            }
            movements.push(Movement {
                kind: MovementKind::Issue,
                date: issue.issue_date.date(),
                quantity: issue.quantity.value(),
                reference: issue.issue_number,
                counterpart: issue.issued_for,
            });
        }

        movements.sort_by_key(|m| (m.date, m.kind));
        Ok(movements)
    }

    /// Replay the card of a NAC code. With `since`, movements dated before
    /// it are replayed first; their closing running balance opens the card
    /// and issues still short at the cutoff carry over as shortfalls.
    #[instrument(skip(self))]
    pub fn stock_card(&self, nac_code: &str, since: Option<NaiveDate>) -> Result<StockCardReport> {
        let Some(item) = self.store.stock_item(nac_code)? else {
            return Err(LedgerError::not_found("stock item", nac_code));
        };
        let movements = self.approved_movements(nac_code)?;
        let open_quantity = item.open_quantity.value();

        let (earlier, shown): (Vec<Movement>, Vec<Movement>) = match since {
            Some(cutoff) => movements.into_iter().partition(|m| m.date < cutoff),
            None => (Vec::new(), movements),
        };

        let (opening, owed) = match since {
            Some(cutoff) => {
                let first = earlier.first().map(|m| m.date).unwrap_or(cutoff);
                let before = replay(
                    Opening {
                        date: first,
                        quantity: open_quantity,
                    },
                    earlier,
                )?;
                let running = before
                    .rows
                    .last()
                    .map(|r| r.balance)
                    .unwrap_or(open_quantity);
                let opening = Opening {
                    date: cutoff,
                    quantity: running,
                };
                (opening, before.outstanding)
            }
            None => {
                let date = shown
                    .first()
                    .map(|m| m.date)
                    .unwrap_or_else(|| item.updated_at.to_datetime_utc().date_naive());
                let opening = Opening {
                    date,
                    quantity: open_quantity,
                };
                (opening, Vec::new())
            }
        };

        debug!(opening = %opening.quantity, owed = owed.len(), movements = shown.len(), "replaying stock card");
        let card = replay_from(opening, owed, shown)?;

        Ok(StockCardReport {
            nac_code: item.nac_code,
            item_name: item.item_names.first().cloned().unwrap_or_default(),
            unit: item.unit,
            card_number: item.card_number,
            card,
        })
    }
}
