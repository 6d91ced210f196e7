//! RRP costing: batch submission, approval, rejection and editing
use crate::allocation::{
    self, Allocation, CostingSubmission, ExistingCorrection, check_correction_date,
    resolve_rrp_number,
};
use crate::effects;
use crate::error::{LedgerError, Result};
use crate::records::RrpLine;
use crate::rrp_number::RrpNumber;
use crate::service::{ProcurementService, ensure_pending, required};
use crate::store::{Tx, TxResult, keys};
use crate::types::{Amount, ApprovalStatus, Day, TimeStamp};
use crate::utils::new_uuid_to_bech32;
use chrono::NaiveDate;
use sled::transaction::abort;
use tracing::{info, instrument, warn};

/// Identifiers of a persisted RRP batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RrpBatch {
    pub rrp_number: String,
    pub line_ids: Vec<String>,
}

type Corrections = Vec<(u32, Vec<RrpLine>)>;

fn batch_status(lines: &[RrpLine]) -> ApprovalStatus {
    // lines of a batch always move together
    lines
        .first()
        .map(|l| l.approval_status)
        .unwrap_or(ApprovalStatus::Rejected)
}

fn existing_of(groups: &Corrections) -> Vec<ExistingCorrection> {
    groups
        .iter()
        .map(|(correction, lines)| ExistingCorrection {
            correction: *correction,
            status: batch_status(lines),
        })
        .collect()
}

/// Dates of every other correction of the base, rejected ones included.
fn correction_dates(groups: &Corrections, skip: u32) -> Vec<(u32, NaiveDate)> {
    groups
        .iter()
        .filter(|(n, _)| *n != skip)
        .filter_map(|(n, lines)| lines.first().map(|l| (*n, l.date.date())))
        .collect()
}

fn exact_number(rrp_number: &str) -> Result<(RrpNumber, u32)> {
    let number = RrpNumber::parse(rrp_number)?;
    match number.correction() {
        Some(n) => Ok((number, n)),
        None => Err(LedgerError::Validation(format!(
            "{rrp_number} names a base, a full number such as {}T1 is needed",
            number.base()
        ))),
    }
}

/// Drop an RRP line and its index entries, freeing the receive it costed.
fn remove_line(tx: &Tx<'_>, fiscal_year: &str, line: &RrpLine) -> TxResult<()> {
    tx.remove_rrp_line(&line.id)?;
    tx.index_remove(&format!(
        "{}{}",
        keys::rrp_batch(fiscal_year, &line.rrp_number),
        line.id
    ))?;
    tx.index_remove(&format!("{}{}", keys::nac_rrp(&line.nac_code), line.id))?;

    if let Some(mut receive) = tx.receive(&line.receive_ref)? {
        if receive.rrp_ref.as_deref() == Some(line.id.as_str()) {
            receive.rrp_ref = None;
            tx.put_receive(&receive)?;
        }
    }
    Ok(())
}

struct BatchWrite<'s> {
    fiscal_year: &'s str,
    rrp_number: &'s str,
    submission: &'s CostingSubmission,
    allocation: &'s Allocation,
    line_ids: &'s [String],
}

/// Insert the priced lines and link each receive to its line. A receive may
/// only be costed once: an existing link must point at a rejected line.
fn write_batch(tx: &Tx<'_>, batch: &BatchWrite<'_>) -> TxResult<()> {
    let sub = batch.submission;
    for (allocated, id) in batch.allocation.lines.iter().zip(batch.line_ids) {
        let Some(mut receive) = tx.receive(&allocated.receive_id)? else {
            return abort(LedgerError::not_found("receive", allocated.receive_id.clone()));
        };
        if receive.approval_status != ApprovalStatus::Approved {
            return abort(LedgerError::Conflict(format!(
                "receive {} is {}, only approved receives can be costed",
                receive.id, receive.approval_status
            )));
        }
        if let Some(current) = &receive.rrp_ref {
            if let Some(line) = tx.rrp_line(current)? {
                if line.approval_status != ApprovalStatus::Rejected {
                    return abort(LedgerError::Conflict(format!(
                        "receive {} is already costed on RRP {}",
                        receive.id, line.rrp_number
                    )));
                }
            }
        }

        let priced = allocated.rounded();
        let line = RrpLine {
            id: id.clone(),
            receive_ref: receive.id.clone(),
            rrp_number: batch.rrp_number.to_string(),
            supplier_name: sub.supplier_name.trim().to_string(),
            date: Day(sub.date),
            currency: sub.currency.trim().to_uppercase(),
            forex_rate: Amount(batch.allocation.factor),
            item_price: Amount(priced.converted_price),
            customs_charge: Amount(priced.customs_charge),
            customs_service_charge: Amount(priced.customs_service_share),
            vat_percentage: Amount(sub.vat_rate_percent),
            vat_amount: Amount(priced.vat_amount),
            freight_charge_allocated: Amount(priced.freight_share),
            total_amount: Amount(priced.total_amount),
            approval_status: ApprovalStatus::Pending,
            created_by: sub.created_by.clone(),
            fiscal_year: batch.fiscal_year.to_string(),
            nac_code: receive.nac_code.clone(),
            quantity: receive.received_quantity,
            decided_by: None,
            rejection_reason: None,
            created_at: TimeStamp::new(),
        };
        tx.put_rrp_line(&line)?;
        tx.index_insert(&format!(
            "{}{}",
            keys::rrp_batch(batch.fiscal_year, batch.rrp_number),
            id
        ))?;
        tx.index_insert(&format!("{}{}", keys::nac_rrp(&line.nac_code), id))?;

        receive.rrp_ref = Some(id.clone());
        tx.put_receive(&receive)?;
    }
    Ok(())
}

impl ProcurementService {
    fn check_supplier(&self, supplier_name: &str) -> Result<()> {
        let known = self.config.suppliers()?;
        if known.is_empty() || known.iter().any(|s| s.eq_ignore_ascii_case(supplier_name.trim())) {
            return Ok(());
        }
        Err(LedgerError::Validation(format!("unknown supplier {supplier_name}")))
    }

    /// Validation and pricing shared by submission and editing.
    fn price(&self, submission: &CostingSubmission) -> Result<Allocation> {
        allocation::validate(submission)?;
        self.check_supplier(&submission.supplier_name)?;
        let local = self.config.local_currency()?;
        allocation::allocate(submission, &local)
    }

    fn new_line_ids(count: usize) -> Result<Vec<String>> {
        (0..count).map(|_| new_uuid_to_bech32("rrp")).collect()
    }

    /// Cost one or more approved receives under a supplier invoice
    #[instrument(skip(self, submission), fields(rrp_number = %submission.rrp_number))]
    pub fn submit_rrp(&self, submission: CostingSubmission) -> Result<RrpBatch> {
        let requested = RrpNumber::parse(&submission.rrp_number)?;
        let allocation = self.price(&submission)?;
        let fiscal_year = self.config.current_fiscal_year()?;

        let groups = self.store.rrp_corrections(&fiscal_year, &requested.base())?;
        let resolved = resolve_rrp_number(&requested, &existing_of(&groups))?;
        let correction = resolved.number.correction().unwrap_or(1);
        check_correction_date(correction, submission.date, &correction_dates(&groups, correction))?;

        let replaced: Vec<String> = if resolved.replaces_rejected {
            groups
                .iter()
                .filter(|(n, _)| *n == correction)
                .flat_map(|(_, lines)| lines.iter().map(|l| l.id.clone()))
                .collect()
        } else {
            Vec::new()
        };

        let rrp_number = resolved.number.to_string();
        let line_ids = Self::new_line_ids(allocation.lines.len())?;
        let live_key = keys::rrp_live(&fiscal_year, &requested.base());

        self.store.transaction(|tx| {
            if let Some(holder) = tx.claim(&live_key)? {
                return abort(LedgerError::Conflict(format!(
                    "{holder} is still live for base {}",
                    requested.base()
                )));
            }
            for id in &replaced {
                let Some(old) = tx.rrp_line(id)? else {
                    continue;
                };
                if old.approval_status != ApprovalStatus::Rejected {
                    return abort(LedgerError::Conflict(format!(
                        "RRP number {rrp_number} already exists and is not rejected"
                    )));
                }
                remove_line(tx, &fiscal_year, &old)?;
            }

            write_batch(
                tx,
                &BatchWrite {
                    fiscal_year: &fiscal_year,
                    rrp_number: &rrp_number,
                    submission: &submission,
                    allocation: &allocation,
                    line_ids: &line_ids,
                },
            )?;
            tx.set_claim(&live_key, &rrp_number)
        })?;

        info!(%rrp_number, lines = line_ids.len(), replaced = replaced.len(), "RRP submitted");
        Ok(RrpBatch {
            rrp_number,
            line_ids,
        })
    }

    fn batch_ids(&self, fiscal_year: &str, rrp_number: &str) -> Result<Vec<String>> {
        let lines = self.store.rrp_batch(fiscal_year, rrp_number)?;
        if lines.is_empty() {
            return Err(LedgerError::not_found("RRP", rrp_number));
        }
        Ok(lines.into_iter().map(|l| l.id).collect())
    }

    /// Lines of an RRP batch in the current fiscal year.
    pub fn rrp_batch(&self, rrp_number: &str) -> Result<Vec<RrpLine>> {
        let fiscal_year = self.config.current_fiscal_year()?;
        self.store.rrp_batch(&fiscal_year, rrp_number)
    }

    #[instrument(skip(self))]
    pub fn approve_rrp(&self, rrp_number: &str, approver: &str) -> Result<Vec<String>> {
        required(approver, "approver")?;
        let (number, _) = exact_number(rrp_number)?;
        let rrp_number = number.to_string();
        let fiscal_year = self.config.current_fiscal_year()?;
        let ids = self.batch_ids(&fiscal_year, &rrp_number)?;

        self.store.transaction(|tx| {
            for id in &ids {
                let Some(mut line) = tx.rrp_line(id)? else {
                    return abort(LedgerError::not_found("RRP line", id.clone()));
                };
                ensure_pending(line.approval_status, &format!("RRP {rrp_number}"))?;
                line.approval_status = ApprovalStatus::Approved;
                line.decided_by = Some(approver.to_string());
                tx.put_rrp_line(&line)?;
            }
            Ok(())
        })?;

        info!("RRP approved");
        Ok(ids)
    }

    /// Reject a pending batch, freeing its receives for re-costing.
    #[instrument(skip(self))]
    pub fn reject_rrp(&self, rrp_number: &str, rejected_by: &str, reason: &str) -> Result<Vec<String>> {
        required(rejected_by, "rejected_by")?;
        required(reason, "rejection reason")?;
        let (number, _) = exact_number(rrp_number)?;
        let rrp_number = number.to_string();
        let fiscal_year = self.config.current_fiscal_year()?;
        let ids = self.batch_ids(&fiscal_year, &rrp_number)?;
        let live_key = keys::rrp_live(&fiscal_year, &number.base());

        self.store.transaction(|tx| {
            let mut lines = Vec::with_capacity(ids.len());
            for id in &ids {
                let Some(mut line) = tx.rrp_line(id)? else {
                    return abort(LedgerError::not_found("RRP line", id.clone()));
                };
                ensure_pending(line.approval_status, &format!("RRP {rrp_number}"))?;
                line.approval_status = ApprovalStatus::Rejected;
                line.decided_by = Some(rejected_by.to_string());
                line.rejection_reason = Some(reason.to_string());
                tx.put_rrp_line(&line)?;
                lines.push(line);
            }
            effects::apply(tx, &effects::rrp_rejection(&rrp_number, &lines, reason))?;

            if tx.claim(&live_key)?.as_deref() == Some(rrp_number.as_str()) {
                tx.release_claim(&live_key)?;
            }
            Ok(())
        })?;

        warn!("RRP rejected");
        Ok(ids)
    }

    /// Replace the lines of a pending batch and recompute every total.
    #[instrument(skip(self, submission))]
    pub fn update_rrp(&self, rrp_number: &str, submission: CostingSubmission) -> Result<RrpBatch> {
        let (number, correction) = exact_number(rrp_number)?;
        let rrp_number = number.to_string();
        if RrpNumber::parse(&submission.rrp_number)? != number {
            return Err(LedgerError::Validation(format!(
                "submission names RRP {}, the edit targets {rrp_number}",
                submission.rrp_number
            )));
        }
        let allocation = self.price(&submission)?;
        let fiscal_year = self.config.current_fiscal_year()?;

        let groups = self.store.rrp_corrections(&fiscal_year, &number.base())?;
        check_correction_date(correction, submission.date, &correction_dates(&groups, correction))?;
        let old_ids = self.batch_ids(&fiscal_year, &rrp_number)?;
        let line_ids = Self::new_line_ids(allocation.lines.len())?;

        self.store.transaction(|tx| {
            for id in &old_ids {
                let Some(old) = tx.rrp_line(id)? else {
                    return abort(LedgerError::not_found("RRP line", id.clone()));
                };
                ensure_pending(old.approval_status, &format!("RRP {rrp_number}"))?;
                remove_line(tx, &fiscal_year, &old)?;
            }
            write_batch(
                tx,
                &BatchWrite {
                    fiscal_year: &fiscal_year,
                    rrp_number: &rrp_number,
                    submission: &submission,
                    allocation: &allocation,
                    line_ids: &line_ids,
                },
            )
        })?;

        info!(lines = line_ids.len(), removed = old_ids.len(), "RRP updated");
        Ok(RrpBatch {
            rrp_number,
            line_ids,
        })
    }

    /// Check a number and date before a costing clerk submits, returning the
    /// number the submission would land on.
    #[instrument(skip(self))]
    pub fn verify_rrp_number(&self, rrp_number: &str, date: NaiveDate) -> Result<RrpNumber> {
        let requested = RrpNumber::parse(rrp_number)?;
        let fiscal_year = self.config.current_fiscal_year()?;
        let groups = self.store.rrp_corrections(&fiscal_year, &requested.base())?;

        let resolved = resolve_rrp_number(&requested, &existing_of(&groups))?;
        let correction = resolved.number.correction().unwrap_or(1);
        check_correction_date(correction, date, &correction_dates(&groups, correction))?;
        Ok(resolved.number)
    }
}
