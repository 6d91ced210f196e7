//! Service layer API for the request, receive and issue workflow
use crate::config::ConfigStore;
use crate::effects::{self, SideEffect};
use crate::equipment::{EquipmentSet, merge_alias};
use crate::error::{LedgerError, Result};
use crate::records::{IssueLine, Notification, ReceiveLine, ReferenceType, RequestLine, StockItem};
use crate::store::{AbortExt, LedgerStore, Tx, TxResult, keys};
use crate::types::{Amount, ApprovalStatus, Day, TimeStamp};
use crate::utils::new_uuid_to_bech32;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sled::transaction::abort;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct ProcurementService {
    pub(crate) store: Arc<LedgerStore>,
    pub(crate) config: Arc<dyn ConfigStore>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRequestLine {
    pub nac_code: String,
    pub part_number: String,
    pub item_name: String,
    pub unit: String,
    pub requested_quantity: Decimal,
    pub equipment_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSubmission {
    pub request_number: String,
    pub request_date: NaiveDate,
    pub requested_by: String,
    pub lines: Vec<NewRequestLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveItem {
    pub request_id: String,
    pub received_quantity: Decimal,
    pub location: String,
    pub card_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIssue {
    pub issue_number: String,
    pub issue_date: NaiveDate,
    pub nac_code: String,
    pub quantity: Decimal,
    pub issued_for: String,
    pub issued_by: String,
}

pub(crate) fn required(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(LedgerError::Validation(format!("{field} is required")));
    }
    Ok(())
}

/// Values that end up inside index keys must be present and free of
/// control characters, the key separator among them.
pub(crate) fn key_part(value: &str, field: &str) -> Result<()> {
    required(value, field)?;
    if value.chars().any(char::is_control) {
        return Err(LedgerError::Validation(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}

fn positive(value: Decimal, field: &str) -> Result<()> {
    if value <= Decimal::ZERO {
        return Err(LedgerError::Validation(format!("{field} must be positive")));
    }
    Ok(())
}

/// Status guard for a transition out of PENDING.
pub(crate) fn ensure_pending(status: ApprovalStatus, what: &str) -> TxResult<()> {
    if status != ApprovalStatus::Pending {
        return abort(LedgerError::Conflict(format!("{what} is already {status}")));
    }
    Ok(())
}

impl ProcurementService {
    pub fn new(store: Arc<LedgerStore>, config: Arc<dyn ConfigStore>) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    /// Submit one or more request lines under a single request number
    #[instrument(skip(self, submission), fields(request_number = %submission.request_number))]
    pub fn submit_request(&self, submission: RequestSubmission) -> Result<Vec<String>> {
        key_part(&submission.request_number, "request number")?;
        required(&submission.requested_by, "requested_by")?;
        if submission.lines.is_empty() {
            return Err(LedgerError::Validation("request needs at least one line".into()));
        }
        for line in &submission.lines {
            key_part(&line.nac_code, "NAC code")?;
            required(&line.item_name, "item name")?;
            positive(line.requested_quantity, "requested quantity")?;
            EquipmentSet::parse(&line.equipment_number)?;
        }

        // rate history is a scan, so it is read ahead of the transaction
        let mut rates = Vec::with_capacity(submission.lines.len());
        let mut ids = Vec::with_capacity(submission.lines.len());
        for line in &submission.lines {
            rates.push(self.store.latest_approved_unit_cost(&line.nac_code)?);
            ids.push(new_uuid_to_bech32("req")?);
        }

        let number = submission.request_number.trim().to_string();
        self.store.transaction(|tx| {
            let claim = keys::request_claim(&number);
            if tx.claim(&claim)?.is_some() {
                return abort(LedgerError::Conflict(format!(
                    "request number {number} is already in use"
                )));
            }
            tx.set_claim(&claim, &number)?;

            for ((line, id), rate) in submission.lines.iter().zip(&ids).zip(&rates) {
                let balance = tx
                    .stock_item(&line.nac_code)?
                    .map(|item| item.current_balance)
                    .unwrap_or_default();
                let record = RequestLine {
                    id: id.clone(),
                    request_number: number.clone(),
                    request_date: Day(submission.request_date),
                    nac_code: line.nac_code.trim().to_string(),
                    part_number: line.part_number.trim().to_string(),
                    item_name: line.item_name.trim().to_string(),
                    unit: line.unit.trim().to_string(),
                    requested_quantity: Amount(line.requested_quantity),
                    equipment_number: line.equipment_number.trim().to_string(),
                    balance_snapshot: balance,
                    previous_rate_snapshot: rate.map(Amount),
                    approval_status: ApprovalStatus::Pending,
                    requested_by: submission.requested_by.clone(),
                    is_received: false,
                    receive_ref: None,
                    decided_by: None,
                    rejection_reason: None,
                    created_at: TimeStamp::new(),
                };
                tx.put_request(&record)?;
                tx.index_insert(&format!("{}{}", keys::request_group(&number), id))?;
            }
            Ok(())
        })?;

        info!(lines = ids.len(), "request submitted");
        Ok(ids)
    }

    fn request_ids(&self, request_number: &str) -> Result<Vec<String>> {
        let lines = self.store.requests_by_number(request_number)?;
        if lines.is_empty() {
            return Err(LedgerError::not_found("request", request_number));
        }
        Ok(lines.into_iter().map(|l| l.id).collect())
    }

    /// Move every line of a PENDING request to APPROVED or REJECTED.
    fn decide_request(
        &self,
        request_number: &str,
        decided_by: &str,
        rejection: Option<&str>,
    ) -> Result<Vec<String>> {
        let ids = self.request_ids(request_number)?;
        self.store.transaction(|tx| {
            let mut lines = Vec::with_capacity(ids.len());
            for id in &ids {
                let Some(mut line) = tx.request(id)? else {
                    return abort(LedgerError::not_found("request line", id.clone()));
                };
                ensure_pending(line.approval_status, &format!("request {request_number}"))?;
                line.approval_status = match rejection {
                    Some(_) => ApprovalStatus::Rejected,
                    None => ApprovalStatus::Approved,
                };
                line.decided_by = Some(decided_by.to_string());
                line.rejection_reason = rejection.map(str::to_string);
                tx.put_request(&line)?;
                lines.push(line);
            }
            if let Some(reason) = rejection {
                effects::apply(tx, &effects::request_rejection(request_number, &lines, reason))?;
            }
            Ok(())
        })?;
        Ok(ids)
    }

    #[instrument(skip(self))]
    pub fn approve_request(&self, request_number: &str, approver: &str) -> Result<Vec<String>> {
        required(approver, "approver")?;
        let ids = self.decide_request(request_number, approver, None)?;
        info!("request approved");
        Ok(ids)
    }

    #[instrument(skip(self))]
    pub fn reject_request(&self, request_number: &str, approver: &str, reason: &str) -> Result<Vec<String>> {
        required(approver, "approver")?;
        required(reason, "rejection reason")?;
        let ids = self.decide_request(request_number, approver, Some(reason))?;
        warn!("request rejected");
        Ok(ids)
    }

    /// Record physical arrival of approved request lines
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub fn create_receive(
        &self,
        items: Vec<ReceiveItem>,
        received_by: &str,
        receive_date: NaiveDate,
    ) -> Result<Vec<String>> {
        required(received_by, "received_by")?;
        if items.is_empty() {
            return Err(LedgerError::Validation("receive needs at least one item".into()));
        }
        let mut seen = HashSet::new();
        for item in &items {
            positive(item.received_quantity, "received quantity")?;
            if !seen.insert(item.request_id.as_str()) {
                return Err(LedgerError::Validation(format!(
                    "request line {} is received twice",
                    item.request_id
                )));
            }
        }

        let ids = items
            .iter()
            .map(|_| new_uuid_to_bech32("rcv"))
            .collect::<Result<Vec<_>>>()?;

        self.store.transaction(|tx| {
            for (item, id) in items.iter().zip(&ids) {
                let Some(mut request) = tx.request(&item.request_id)? else {
                    return abort(LedgerError::not_found("request line", item.request_id.clone()));
                };
                if request.approval_status != ApprovalStatus::Approved {
                    return abort(LedgerError::Conflict(format!(
                        "request line {} is {}, only approved lines can be received",
                        request.id, request.approval_status
                    )));
                }
                if request.is_received {
                    return abort(LedgerError::Conflict(format!(
                        "request line {} is already received",
                        request.id
                    )));
                }

                let receive = ReceiveLine {
                    id: id.clone(),
                    request_ref: request.id.clone(),
                    nac_code: request.nac_code.clone(),
                    part_number: request.part_number.clone(),
                    item_name: request.item_name.clone(),
                    unit: request.unit.clone(),
                    received_quantity: Amount(item.received_quantity),
                    receive_date: Day(receive_date),
                    approval_status: ApprovalStatus::Pending,
                    received_by: received_by.to_string(),
                    location: item.location.trim().to_string(),
                    card_number: item.card_number.trim().to_string(),
                    rrp_ref: None,
                    decided_by: None,
                    rejection_reason: None,
                    created_at: TimeStamp::new(),
                };
                tx.put_receive(&receive)?;
                tx.index_insert(&format!("{}{}", keys::nac_receive(&receive.nac_code), id))?;

                request.is_received = true;
                request.receive_ref = Some(id.clone());
                tx.put_request(&request)?;
            }
            Ok(())
        })?;

        info!("receive recorded");
        Ok(ids)
    }

    /// Approve a receive and bring its quantity onto the stock item.
    #[instrument(skip(self))]
    pub fn approve_receive(&self, receive_id: &str, approver: &str) -> Result<StockItem> {
        required(approver, "approver")?;
        let item = self.store.transaction(|tx| {
            let Some(mut receive) = tx.receive(receive_id)? else {
                return abort(LedgerError::not_found("receive", receive_id));
            };
            ensure_pending(receive.approval_status, &format!("receive {receive_id}"))?;
            receive.approval_status = ApprovalStatus::Approved;
            receive.decided_by = Some(approver.to_string());
            tx.put_receive(&receive)?;

            let equipment = match tx.request(&receive.request_ref)? {
                Some(request) => EquipmentSet::parse(&request.equipment_number).or_abort()?,
                None => EquipmentSet::new(),
            };
            let item = upsert_stock(tx, &receive, &equipment)?;
            Ok(item)
        })?;

        info!(nac_code = %item.nac_code, balance = %item.current_balance, "receive approved");
        Ok(item)
    }

    #[instrument(skip(self))]
    pub fn reject_receive(&self, receive_id: &str, rejected_by: &str, reason: &str) -> Result<()> {
        required(rejected_by, "rejected_by")?;
        required(reason, "rejection reason")?;
        self.store.transaction(|tx| {
            let Some(mut receive) = tx.receive(receive_id)? else {
                return abort(LedgerError::not_found("receive", receive_id));
            };
            ensure_pending(receive.approval_status, &format!("receive {receive_id}"))?;
            receive.approval_status = ApprovalStatus::Rejected;
            receive.decided_by = Some(rejected_by.to_string());
            receive.rejection_reason = Some(reason.to_string());
            tx.put_receive(&receive)?;

            effects::apply(tx, &effects::receive_rejection(&receive, reason))
        })?;

        warn!("receive rejected");
        Ok(())
    }

    /// Record stock leaving the store. The balance moves on approval.
    #[instrument(skip(self, issue), fields(issue_number = %issue.issue_number))]
    pub fn record_issue(&self, issue: NewIssue) -> Result<String> {
        key_part(&issue.issue_number, "issue number")?;
        key_part(&issue.nac_code, "NAC code")?;
        required(&issue.issued_by, "issued_by")?;
        positive(issue.quantity, "issued quantity")?;

        let id = new_uuid_to_bech32("iss")?;
        self.store.transaction(|tx| {
            let line = IssueLine {
                id: id.clone(),
                issue_number: issue.issue_number.trim().to_string(),
                issue_date: Day(issue.issue_date),
                nac_code: issue.nac_code.trim().to_string(),
                quantity: Amount(issue.quantity),
                issued_for: issue.issued_for.trim().to_string(),
                issued_by: issue.issued_by.clone(),
                approval_status: ApprovalStatus::Pending,
                decided_by: None,
                created_at: TimeStamp::new(),
            };
            tx.put_issue(&line)?;
            tx.index_insert(&format!("{}{}", keys::nac_issue(&line.nac_code), id))
        })?;
        Ok(id)
    }

    /// Approve an issue, taking its quantity off the balance. The balance
    /// may go negative; the stock card replay settles such back-orders.
    #[instrument(skip(self))]
    pub fn approve_issue(&self, issue_id: &str, approver: &str) -> Result<StockItem> {
        required(approver, "approver")?;
        let item = self.store.transaction(|tx| {
            let Some(mut issue) = tx.issue(issue_id)? else {
                return abort(LedgerError::not_found("issue", issue_id));
            };
            ensure_pending(issue.approval_status, &format!("issue {issue_id}"))?;
            let Some(mut item) = tx.stock_item(&issue.nac_code)? else {
                return abort(LedgerError::not_found("stock item", issue.nac_code.clone()));
            };
            issue.approval_status = ApprovalStatus::Approved;
            issue.decided_by = Some(approver.to_string());
            tx.put_issue(&issue)?;

            item.current_balance = Amount(item.current_balance.0 - issue.quantity.0);
            item.updated_at = TimeStamp::new();
            tx.put_stock_item(&item)?;
            Ok(item)
        })?;

        if item.current_balance.0.is_sign_negative() && !item.current_balance.0.is_zero() {
            warn!(nac_code = %item.nac_code, balance = %item.current_balance, "issue approved against insufficient stock");
        }
        Ok(item)
    }

    #[instrument(skip(self))]
    pub fn reject_issue(&self, issue_id: &str, rejected_by: &str, reason: &str) -> Result<()> {
        required(rejected_by, "rejected_by")?;
        required(reason, "rejection reason")?;
        self.store.transaction(|tx| {
            let Some(mut issue) = tx.issue(issue_id)? else {
                return abort(LedgerError::not_found("issue", issue_id));
            };
            ensure_pending(issue.approval_status, &format!("issue {issue_id}"))?;
            issue.approval_status = ApprovalStatus::Rejected;
            issue.decided_by = Some(rejected_by.to_string());
            tx.put_issue(&issue)?;

            let notify = SideEffect::Notify {
                username: issue.issued_by.clone(),
                reference_type: ReferenceType::Issue,
                reference_id: issue.id.clone(),
                message: format!("Your issue {} was rejected: {reason}", issue.issue_number),
            };
            effects::apply(tx, &[notify])
        })?;
        warn!("issue rejected");
        Ok(())
    }

    /// Inbox of a user, oldest first.
    pub fn notifications_for(&self, username: &str) -> Result<Vec<Notification>> {
        let user = self
            .store
            .user(username)?
            .ok_or_else(|| LedgerError::not_found("user", username))?;
        let mut inbox = self.store.notifications_for(&user.id)?;
        inbox.sort_by_key(|n| n.created_at.to_datetime_utc());
        Ok(inbox)
    }

    pub fn mark_notification_read(&self, notification_id: &str) -> Result<()> {
        self.store.transaction(|tx| {
            let Some(mut notification) = tx.notification(notification_id)? else {
                return abort(LedgerError::not_found("notification", notification_id));
            };
            notification.is_read = true;
            tx.put_notification(&notification)
        })
    }
}

/// Create the stock item on first receipt, otherwise merge aliases and
/// equipment and add the quantity.
fn upsert_stock(tx: &Tx<'_>, receive: &ReceiveLine, equipment: &EquipmentSet) -> TxResult<StockItem> {
    let mut item = match tx.stock_item(&receive.nac_code)? {
        Some(item) => item,
        None => StockItem {
            nac_code: receive.nac_code.clone(),
            item_names: Vec::new(),
            part_numbers: Vec::new(),
            equipment: EquipmentSet::new(),
            current_balance: Amount::default(),
            unit: receive.unit.clone(),
            location: receive.location.clone(),
            card_number: receive.card_number.clone(),
            open_quantity: Amount::default(),
            open_amount: Amount::default(),
            updated_at: TimeStamp::new(),
        },
    };

    for part in receive.part_number.split(',') {
        merge_alias(&mut item.part_numbers, part);
    }
    merge_alias(&mut item.item_names, &receive.item_name);
    item.equipment.merge(equipment);
    if item.location.is_empty() {
        item.location = receive.location.clone();
    }
    if item.card_number.is_empty() {
        item.card_number = receive.card_number.clone();
    }
    item.current_balance = Amount(item.current_balance.0 + receive.received_quantity.0);
    item.updated_at = TimeStamp::new();

    tx.put_stock_item(&item)?;
    Ok(item)
}
