//! Side effects of a rejection.
//!
//! A rejection is a valid terminal transition, but it always drags linkage
//! cleanup and an inbox entry with it. The workflow first computes the list
//! of intents for the rejected records, then applies them inside the same
//! transaction as the status change, so either all happen or none do.
use crate::error::LedgerError;
use crate::records::{Notification, ReceiveLine, ReferenceType, RequestLine, RrpLine};
use crate::store::{AbortExt, Tx, TxResult};
use crate::types::TimeStamp;
use crate::utils::new_uuid_to_bech32;
use sled::transaction::abort;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    /// Free a request line so it can be received again.
    UnlinkRequest { request_id: String, receive_id: String },
    /// Free a receive line so it can be costed again.
    ClearRrpRef { receive_id: String, rrp_line_id: String },
    Notify {
        username: String,
        reference_type: ReferenceType,
        reference_id: String,
        message: String,
    },
}

fn notify(username: &str, reference_type: ReferenceType, reference_id: &str, message: String) -> SideEffect {
    SideEffect::Notify {
        username: username.to_string(),
        reference_type,
        reference_id: reference_id.to_string(),
        message,
    }
}

pub fn request_rejection(request_number: &str, lines: &[RequestLine], reason: &str) -> Vec<SideEffect> {
    let mut effects = Vec::new();
    let mut notified: Vec<&str> = Vec::new();
    for line in lines {
        if notified.contains(&line.requested_by.as_str()) {
            continue;
        }
        notified.push(&line.requested_by);
        effects.push(notify(
            &line.requested_by,
            ReferenceType::Request,
            request_number,
            format!("Your request {request_number} was rejected: {reason}"),
        ));
    }
    effects
}

pub fn receive_rejection(line: &ReceiveLine, reason: &str) -> Vec<SideEffect> {
    vec![
        SideEffect::UnlinkRequest {
            request_id: line.request_ref.clone(),
            receive_id: line.id.clone(),
        },
        notify(
            &line.received_by,
            ReferenceType::Receive,
            &line.id,
            format!(
                "Your receive of {} ({}) was rejected: {reason}",
                line.item_name, line.nac_code
            ),
        ),
    ]
}

pub fn rrp_rejection(rrp_number: &str, lines: &[RrpLine], reason: &str) -> Vec<SideEffect> {
    let mut effects: Vec<SideEffect> = lines
        .iter()
        .map(|line| SideEffect::ClearRrpRef {
            receive_id: line.receive_ref.clone(),
            rrp_line_id: line.id.clone(),
        })
        .collect();

    let mut notified: Vec<&str> = Vec::new();
    for line in lines {
        if notified.contains(&line.created_by.as_str()) {
            continue;
        }
        notified.push(&line.created_by);
        effects.push(notify(
            &line.created_by,
            ReferenceType::Rrp,
            rrp_number,
            format!("Your RRP {rrp_number} was rejected: {reason}"),
        ));
    }
    effects
}

/// Apply intents inside a transaction. Links that already point elsewhere
/// are left alone; an unknown user aborts the whole transaction.
pub fn apply(tx: &Tx<'_>, effects: &[SideEffect]) -> TxResult<()> {
    for effect in effects {
        match effect {
            SideEffect::UnlinkRequest {
                request_id,
                receive_id,
            } => {
                let Some(mut request) = tx.request(request_id)? else {
                    return abort(LedgerError::not_found("request", request_id.clone()));
                };
                if request.receive_ref.as_deref() == Some(receive_id.as_str()) {
                    request.is_received = false;
                    request.receive_ref = None;
                    tx.put_request(&request)?;
                }
            }
            SideEffect::ClearRrpRef {
                receive_id,
                rrp_line_id,
            } => {
                let Some(mut receive) = tx.receive(receive_id)? else {
                    return abort(LedgerError::not_found("receive", receive_id.clone()));
                };
                if receive.rrp_ref.as_deref() == Some(rrp_line_id.as_str()) {
                    receive.rrp_ref = None;
                    tx.put_receive(&receive)?;
                }
            }
            SideEffect::Notify {
                username,
                reference_type,
                reference_id,
                message,
            } => {
                let Some(user) = tx.user(username)? else {
                    return abort(LedgerError::not_found("user", username.clone()));
                };
                let notification = Notification {
                    id: new_uuid_to_bech32("ntf").or_abort()?,
                    user_id: user.id,
                    reference_type: *reference_type,
                    reference_id: reference_id.clone(),
                    message: message.clone(),
                    is_read: false,
                    created_at: TimeStamp::new(),
                };
                tx.put_notification(&notification)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Amount, ApprovalStatus, Day};
    use rust_decimal_macros::dec;

    fn request(id: &str, by: &str) -> RequestLine {
        RequestLine {
            id: id.into(),
            request_number: "RQ-7".into(),
            request_date: Day::ymd(2024, 1, 2).unwrap(),
            nac_code: "GT 00000".into(),
            part_number: "P-1".into(),
            item_name: "Filter".into(),
            unit: "pcs".into(),
            requested_quantity: Amount(dec!(4)),
            equipment_number: "12".into(),
            balance_snapshot: Amount(dec!(0)),
            previous_rate_snapshot: None,
            approval_status: ApprovalStatus::Pending,
            requested_by: by.into(),
            is_received: false,
            receive_ref: None,
            decided_by: None,
            rejection_reason: None,
            created_at: TimeStamp::new(),
        }
    }

    #[test]
    fn request_rejection_notifies_each_requester_once() {
        let lines = vec![request("a", "sita"), request("b", "sita"), request("c", "ram")];
        let effects = request_rejection("RQ-7", &lines, "duplicate");

        assert_eq!(effects.len(), 2);
        assert!(effects.iter().all(|e| matches!(e, SideEffect::Notify { .. })));
    }
}
