//! Persistent record types.
//!
//! Every record is CBOR encoded with stable field tags; new fields get new
//! tags, existing tags are never reused.
use crate::equipment::EquipmentSet;
use crate::types::{Amount, ApprovalStatus, Day, TimeStamp};
use chrono::Utc;
use rust_decimal::Decimal;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub request_number: String,
    #[n(2)]
    pub request_date: Day,
    #[n(3)]
    pub nac_code: String,
    #[n(4)]
    pub part_number: String,
    #[n(5)]
    pub item_name: String,
    #[n(6)]
    pub unit: String,
    #[n(7)]
    pub requested_quantity: Amount,
    #[n(8)]
    pub equipment_number: String,
    #[n(9)]
    pub balance_snapshot: Amount,
    #[n(10)]
    pub previous_rate_snapshot: Option<Amount>, // None when the code was never costed
    #[n(11)]
    pub approval_status: ApprovalStatus,
    #[n(12)]
    pub requested_by: String,
    #[n(13)]
    pub is_received: bool,
    #[n(14)]
    pub receive_ref: Option<String>,
    #[n(15)]
    pub decided_by: Option<String>,
    #[n(16)]
    pub rejection_reason: Option<String>,
    #[n(17)]
    pub created_at: TimeStamp<Utc>,
}

impl RequestLine {
    /// Previous rate as printed on the requisition form.
    pub fn previous_rate_display(&self) -> String {
        match &self.previous_rate_snapshot {
            Some(rate) => rate.to_string(),
            None => "N/A".to_string(),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ReceiveLine {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub request_ref: String,
    #[n(2)]
    pub nac_code: String,
    #[n(3)]
    pub part_number: String,
    #[n(4)]
    pub item_name: String,
    #[n(5)]
    pub unit: String,
    #[n(6)]
    pub received_quantity: Amount,
    #[n(7)]
    pub receive_date: Day,
    #[n(8)]
    pub approval_status: ApprovalStatus,
    #[n(9)]
    pub received_by: String,
    #[n(10)]
    pub location: String,
    #[n(11)]
    pub card_number: String,
    #[n(12)]
    pub rrp_ref: Option<String>, // id of the RRP line costing this receipt
    #[n(13)]
    pub decided_by: Option<String>,
    #[n(14)]
    pub rejection_reason: Option<String>,
    #[n(15)]
    pub created_at: TimeStamp<Utc>,
}

/// One priced line of an RRP batch.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct RrpLine {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub receive_ref: String,
    #[n(2)]
    pub rrp_number: String,
    #[n(3)]
    pub supplier_name: String,
    #[n(4)]
    pub date: Day,
    #[n(5)]
    pub currency: String,
    #[n(6)]
    pub forex_rate: Amount,
    #[n(7)]
    pub item_price: Amount,
    #[n(8)]
    pub customs_charge: Amount,
    #[n(9)]
    pub customs_service_charge: Amount,
    #[n(10)]
    pub vat_percentage: Amount,
    #[n(11)]
    pub vat_amount: Amount,
    #[n(12)]
    pub freight_charge_allocated: Amount,
    #[n(13)]
    pub total_amount: Amount,
    #[n(14)]
    pub approval_status: ApprovalStatus,
    #[n(15)]
    pub created_by: String,
    #[n(16)]
    pub fiscal_year: String,
    #[n(17)]
    pub nac_code: String,
    #[n(18)]
    pub quantity: Amount,
    #[n(19)]
    pub decided_by: Option<String>,
    #[n(20)]
    pub rejection_reason: Option<String>,
    #[n(21)]
    pub created_at: TimeStamp<Utc>,
}

impl RrpLine {
    /// Landed cost per unit, `None` for a zero quantity line.
    pub fn unit_cost(&self) -> Option<Decimal> {
        self.total_amount.0.checked_div(self.quantity.0)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct StockItem {
    #[n(0)]
    pub nac_code: String,
    #[n(1)]
    pub item_names: Vec<String>,
    #[n(2)]
    pub part_numbers: Vec<String>,
    #[n(3)]
    pub equipment: EquipmentSet,
    #[n(4)]
    pub current_balance: Amount,
    #[n(5)]
    pub unit: String,
    #[n(6)]
    pub location: String,
    #[n(7)]
    pub card_number: String,
    #[n(8)]
    pub open_quantity: Amount,
    #[n(9)]
    pub open_amount: Amount,
    #[n(10)]
    pub updated_at: TimeStamp<Utc>,
}

/// Stock leaving the store against equipment.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct IssueLine {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub issue_number: String,
    #[n(2)]
    pub issue_date: Day,
    #[n(3)]
    pub nac_code: String,
    #[n(4)]
    pub quantity: Amount,
    #[n(5)]
    pub issued_for: String,
    #[n(6)]
    pub issued_by: String,
    #[n(7)]
    pub approval_status: ApprovalStatus,
    #[n(8)]
    pub decided_by: Option<String>,
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceType {
    #[n(0)]
    Request,
    #[n(1)]
    Receive,
    #[n(2)]
    Rrp,
    #[n(3)]
    Issue,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub reference_type: ReferenceType,
    #[n(3)]
    pub reference_id: String,
    #[n(4)]
    pub message: String,
    #[n(5)]
    pub is_read: bool,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct User {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub username: String,
}
