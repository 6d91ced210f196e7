//! Landed cost allocation for RRP batches.
//!
//! A supplier invoice covering several receipts carries batch level freight
//! and customs service charges. Both are spread over the lines in proportion
//! to each line's converted price; customs duty is per line; VAT applies per
//! line on the landed subtotal. Everything here is pure.
use crate::error::{LedgerError, Result};
use crate::rrp_number::RrpNumber;
use crate::types::ApprovalStatus;
use crate::utils::round_money;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostingItem {
    pub receive_id: String,
    pub unit_price: Decimal,
    pub customs_charge: Decimal,
    pub vat_applicable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostingSubmission {
    pub rrp_number: String,
    pub items: Vec<CostingItem>,
    pub supplier_name: String,
    pub date: NaiveDate,
    pub currency: String,
    pub forex_rate: Option<Decimal>,
    pub freight_charge_total: Decimal,
    pub custom_service_charge_total: Decimal,
    pub vat_rate_percent: Decimal,
    pub created_by: String,
}

/// Per line result at full precision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedLine {
    pub receive_id: String,
    pub converted_price: Decimal,
    pub freight_share: Decimal,
    pub customs_charge: Decimal,
    pub customs_service_share: Decimal,
    pub vat_amount: Decimal,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub factor: Decimal,
    pub lines: Vec<AllocatedLine>,
}

impl AllocatedLine {
    /// The line as persisted, every amount at two places. The total is the
    /// sum of the rounded parts so a stored line always adds up.
    pub fn rounded(&self) -> AllocatedLine {
        let converted_price = round_money(self.converted_price);
        let freight_share = round_money(self.freight_share);
        let customs_charge = round_money(self.customs_charge);
        let customs_service_share = round_money(self.customs_service_share);
        let vat_amount = round_money(self.vat_amount);
        AllocatedLine {
            receive_id: self.receive_id.clone(),
            converted_price,
            freight_share,
            customs_charge,
            customs_service_share,
            vat_amount,
            total_amount: converted_price + freight_share + customs_charge + customs_service_share + vat_amount,
        }
    }
}

fn non_negative(value: Decimal, field: &str) -> Result<()> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(LedgerError::Validation(format!("{field} must not be negative")));
    }
    Ok(())
}

/// Input checks that need no storage.
pub fn validate(sub: &CostingSubmission) -> Result<()> {
    if sub.items.is_empty() {
        return Err(LedgerError::Validation("costing needs at least one item".into()));
    }
    if sub.supplier_name.trim().is_empty() {
        return Err(LedgerError::Validation("supplier name is required".into()));
    }
    if sub.currency.trim().is_empty() {
        return Err(LedgerError::Validation("currency is required".into()));
    }
    if sub.created_by.trim().is_empty() {
        return Err(LedgerError::Validation("created_by is required".into()));
    }
    non_negative(sub.freight_charge_total, "freight charge")?;
    non_negative(sub.custom_service_charge_total, "customs service charge")?;
    non_negative(sub.vat_rate_percent, "VAT rate")?;
    if sub.vat_rate_percent > Decimal::ONE_HUNDRED {
        return Err(LedgerError::Validation("VAT rate must not exceed 100%".into()));
    }

    let mut seen = HashSet::new();
    for item in &sub.items {
        if !seen.insert(item.receive_id.as_str()) {
            return Err(LedgerError::Validation(format!(
                "receive {} appears twice in one costing",
                item.receive_id
            )));
        }
        non_negative(item.unit_price, "unit price")?;
        non_negative(item.customs_charge, "customs charge")?;
    }
    Ok(())
}

/// Forex factor: the submitted rate for foreign currency, one for local.
pub fn conversion_factor(currency: &str, forex_rate: Option<Decimal>, local_currency: &str) -> Result<Decimal> {
    if currency.trim().eq_ignore_ascii_case(local_currency.trim()) {
        return Ok(Decimal::ONE);
    }
    match forex_rate {
        Some(rate) if rate > Decimal::ZERO => Ok(rate),
        Some(_) => Err(LedgerError::Validation(format!(
            "forex rate for {currency} must be positive"
        ))),
        None => Err(LedgerError::Validation(format!(
            "forex rate is required for {currency}"
        ))),
    }
}

fn checked(value: Option<Decimal>, what: &str) -> Result<Decimal> {
    value.ok_or_else(|| LedgerError::Computation(format!("overflow computing {what}")))
}

/// Spread batch charges over the submission's items.
///
/// Freight share is multiplied by the forex factor on top of the value
/// weighting even though freight is entered in local currency.
// TODO: confirm with procurement whether freight is quoted in the invoice currency.
pub fn allocate(sub: &CostingSubmission, local_currency: &str) -> Result<Allocation> {
    let factor = conversion_factor(&sub.currency, sub.forex_rate, local_currency)?;

    let converted: Vec<Decimal> = sub
        .items
        .iter()
        .map(|item| checked(item.unit_price.checked_mul(factor), "converted price"))
        .collect::<Result<_>>()?;

    let mut price_total = Decimal::ZERO;
    for price in &converted {
        price_total = checked(price_total.checked_add(*price), "total item price")?;
    }
    if price_total.is_zero() {
        return Err(LedgerError::Computation(
            "total item price is zero, charges cannot be apportioned".into(),
        ));
    }

    let vat_rate = sub.vat_rate_percent / Decimal::ONE_HUNDRED;
    let mut lines = Vec::with_capacity(sub.items.len());
    for (item, price) in sub.items.iter().zip(converted) {
        let weight = checked(price.checked_div(price_total), "price weight")?;
        let freight_share = checked(
            weight
                .checked_mul(sub.freight_charge_total)
                .and_then(|v| v.checked_mul(factor)),
            "freight share",
        )?;
        let customs_service_share = checked(
            weight.checked_mul(sub.custom_service_charge_total),
            "customs service share",
        )?;

        let subtotal = checked(
            price
                .checked_add(freight_share)
                .and_then(|v| v.checked_add(item.customs_charge))
                .and_then(|v| v.checked_add(customs_service_share)),
            "landed subtotal",
        )?;
        let vat_amount = if item.vat_applicable {
            checked(subtotal.checked_mul(vat_rate), "VAT")?
        } else {
            Decimal::ZERO
        };
        let total_amount = checked(subtotal.checked_add(vat_amount), "total amount")?;

        lines.push(AllocatedLine {
            receive_id: item.receive_id.clone(),
            converted_price: price,
            freight_share,
            customs_charge: item.customs_charge,
            customs_service_share,
            vat_amount,
            total_amount,
        });
    }

    Ok(Allocation { factor, lines })
}

/// State of an existing correction of a base number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistingCorrection {
    pub correction: u32,
    pub status: ApprovalStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNumber {
    pub number: RrpNumber,
    /// A rejected batch with this exact number exists and will be replaced.
    pub replaces_rejected: bool,
}

/// Decide which number a submission lands on.
///
/// A bare base takes the next correction index. An explicit correction is a
/// resubmission and only reuses a rejected or unused slot. Either way at most
/// one correction of a base stays live.
pub fn resolve_rrp_number(requested: &RrpNumber, existing: &[ExistingCorrection]) -> Result<ResolvedNumber> {
    let live = |skip: Option<u32>| {
        existing
            .iter()
            .find(|e| e.status != ApprovalStatus::Rejected && Some(e.correction) != skip)
    };

    match requested.correction() {
        None => {
            if let Some(e) = live(None) {
                return Err(LedgerError::Conflict(format!(
                    "{} is still live for base {}",
                    requested.with_correction(e.correction),
                    requested.base()
                )));
            }
            let next = existing.iter().map(|e| e.correction).max().unwrap_or(0) + 1;
            Ok(ResolvedNumber {
                number: requested.with_correction(next),
                replaces_rejected: false,
            })
        }
        Some(n) => {
            if let Some(same) = existing.iter().find(|e| e.correction == n) {
                if same.status != ApprovalStatus::Rejected {
                    return Err(LedgerError::Conflict(format!(
                        "RRP number {requested} already exists and is not rejected"
                    )));
                }
            }
            if let Some(e) = live(Some(n)) {
                return Err(LedgerError::Conflict(format!(
                    "{} is still live for base {}",
                    requested.with_correction(e.correction),
                    requested.base()
                )));
            }
            Ok(ResolvedNumber {
                number: requested.clone(),
                replaces_rejected: existing.iter().any(|e| e.correction == n),
            })
        }
    }
}

/// Correction dates must not decrease with the T index. `dated` lists the
/// live corrections of the base with their dates.
pub fn check_correction_date(correction: u32, date: NaiveDate, dated: &[(u32, NaiveDate)]) -> Result<()> {
    let before = dated
        .iter()
        .filter(|(n, _)| *n < correction)
        .max_by_key(|(n, _)| *n);
    if let Some((n, prev)) = before {
        if date < *prev {
            return Err(LedgerError::Validation(format!(
                "date {date} is before correction T{n} dated {prev}"
            )));
        }
    }

    let after = dated
        .iter()
        .filter(|(n, _)| *n > correction)
        .min_by_key(|(n, _)| *n);
    if let Some((n, next)) = after {
        if date > *next {
            return Err(LedgerError::Validation(format!(
                "date {date} is after correction T{n} dated {next}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(id: &str, price: Decimal, customs: Decimal, vat: bool) -> CostingItem {
        CostingItem {
            receive_id: id.into(),
            unit_price: price,
            customs_charge: customs,
            vat_applicable: vat,
        }
    }

    fn submission(items: Vec<CostingItem>) -> CostingSubmission {
        CostingSubmission {
            rrp_number: "L001".into(),
            items,
            supplier_name: "Himal Traders".into(),
            date: NaiveDate::from_ymd_opt(2024, 8, 1).unwrap(),
            currency: "NPR".into(),
            forex_rate: None,
            freight_charge_total: dec!(0),
            custom_service_charge_total: dec!(0),
            vat_rate_percent: dec!(13),
            created_by: "hari".into(),
        }
    }

    #[test]
    fn single_line_with_freight_and_vat() {
        let mut sub = submission(vec![item("r1", dec!(100), dec!(0), true)]);
        sub.freight_charge_total = dec!(20);

        let alloc = allocate(&sub, "NPR").unwrap();
        let line = alloc.lines[0].rounded();

        assert_eq!(line.freight_share, dec!(20));
        assert_eq!(line.vat_amount, dec!(15.60));
        assert_eq!(line.total_amount, dec!(135.60));
    }

    #[test]
    fn foreign_freight_is_converted_twice() {
        let mut sub = submission(vec![
            item("r1", dec!(30), dec!(5), true),
            item("r2", dec!(10), dec!(0), false),
        ]);
        sub.currency = "USD".into();
        sub.forex_rate = Some(dec!(2));
        sub.freight_charge_total = dec!(8);
        sub.custom_service_charge_total = dec!(4);

        let alloc = allocate(&sub, "NPR").unwrap();
        assert_eq!(alloc.factor, dec!(2));

        // converted 60 and 20, weights 0.75 and 0.25
        let a = alloc.lines[0].rounded();
        assert_eq!(a.converted_price, dec!(60));
        assert_eq!(a.freight_share, dec!(12));
        assert_eq!(a.customs_service_share, dec!(3));
        assert_eq!(a.vat_amount, dec!(10.40)); // (60 + 12 + 5 + 3) * 0.13
        assert_eq!(a.total_amount, dec!(90.40));

        let b = alloc.lines[1].rounded();
        assert_eq!(b.freight_share, dec!(4));
        assert_eq!(b.customs_service_share, dec!(1));
        assert_eq!(b.vat_amount, dec!(0));
        assert_eq!(b.total_amount, dec!(25));
    }

    #[test]
    fn stored_total_is_sum_of_rounded_parts() {
        let mut sub = submission(vec![item("r1", dec!(45614.49), dec!(300.91), true)]);
        sub.currency = "USD".into();
        sub.forex_rate = Some(dec!(102.91));
        sub.freight_charge_total = dec!(3767.30);
        sub.custom_service_charge_total = dec!(4484.82);

        let alloc = allocate(&sub, "NPR").unwrap();
        let line = alloc.lines[0].rounded();
        assert_eq!(line.converted_price, dec!(4694187.17));
        assert_eq!(line.freight_share, dec!(387692.84));
        assert_eq!(line.vat_amount, dec!(661266.55));
        assert_eq!(line.total_amount, dec!(5747932.29));

        // batch formula with unrounded freight, off by the freight rounding only
        let expected = line.converted_price
            + sub.freight_charge_total * alloc.factor
            + line.customs_charge
            + sub.custom_service_charge_total
            + line.vat_amount;
        assert!((line.total_amount - expected).abs() <= dec!(0.01));
    }

    #[test]
    fn zero_price_total_is_a_computation_error() {
        let sub = submission(vec![item("r1", dec!(0), dec!(10), true)]);
        assert!(matches!(
            allocate(&sub, "NPR"),
            Err(LedgerError::Computation(_))
        ));
    }

    #[test]
    fn foreign_currency_needs_rate() {
        assert!(conversion_factor("USD", None, "NPR").is_err());
        assert!(conversion_factor("USD", Some(dec!(0)), "NPR").is_err());
        assert_eq!(conversion_factor("npr", None, "NPR").unwrap(), Decimal::ONE);
    }

    #[test]
    fn validation_catches_duplicates_and_negatives() {
        let dup = submission(vec![
            item("r1", dec!(1), dec!(0), true),
            item("r1", dec!(1), dec!(0), true),
        ]);
        assert!(matches!(validate(&dup), Err(LedgerError::Validation(_))));

        let neg = submission(vec![item("r1", dec!(-1), dec!(0), true)]);
        assert!(matches!(validate(&neg), Err(LedgerError::Validation(_))));

        assert!(validate(&submission(vec![])).is_err());
    }

    fn existing(pairs: &[(u32, ApprovalStatus)]) -> Vec<ExistingCorrection> {
        pairs
            .iter()
            .map(|(correction, status)| ExistingCorrection {
                correction: *correction,
                status: *status,
            })
            .collect()
    }

    #[test]
    fn bare_base_takes_next_index() {
        let base = RrpNumber::parse("L001").unwrap();

        let first = resolve_rrp_number(&base, &[]).unwrap();
        assert_eq!(first.number.to_string(), "L001T1");

        let after_rejects = existing(&[(1, ApprovalStatus::Rejected), (2, ApprovalStatus::Rejected)]);
        let next = resolve_rrp_number(&base, &after_rejects).unwrap();
        assert_eq!(next.number.to_string(), "L001T3");
        assert!(!next.replaces_rejected);
    }

    #[test]
    fn bare_base_conflicts_with_live_correction() {
        let base = RrpNumber::parse("L001").unwrap();
        let live = existing(&[(1, ApprovalStatus::Approved), (2, ApprovalStatus::Pending)]);

        assert!(matches!(
            resolve_rrp_number(&base, &live),
            Err(LedgerError::Conflict(_))
        ));
    }

    #[test]
    fn resubmission_reuses_rejected_slot_only() {
        let t2 = RrpNumber::parse("L001T2").unwrap();

        let rejected = existing(&[(1, ApprovalStatus::Rejected), (2, ApprovalStatus::Rejected)]);
        let resolved = resolve_rrp_number(&t2, &rejected).unwrap();
        assert_eq!(resolved.number, t2);
        assert!(resolved.replaces_rejected);

        let pending = existing(&[(2, ApprovalStatus::Pending)]);
        assert!(matches!(
            resolve_rrp_number(&t2, &pending),
            Err(LedgerError::Conflict(_))
        ));

        let other_live = existing(&[(1, ApprovalStatus::Approved)]);
        assert!(resolve_rrp_number(&t2, &other_live).is_err());
    }

    #[test]
    fn correction_dates_are_monotonic() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 5, day).unwrap();
        let dated = vec![(1, d(3)), (3, d(20))];

        assert!(check_correction_date(2, d(10), &dated).is_ok());
        assert!(check_correction_date(2, d(3), &dated).is_ok());
        assert!(check_correction_date(2, d(2), &dated).is_err());
        assert!(check_correction_date(2, d(21), &dated).is_err());
        assert!(check_correction_date(4, d(19), &dated).is_err());
    }
}
