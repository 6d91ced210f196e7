//! sled backed ledger storage.
//!
//! One tree per record kind plus an `index` tree holding group membership
//! (`req_no`, `rrp_no`, per NAC code movements) and claim keys. All writes go
//! through [`LedgerStore::transaction`], which stages them across every tree
//! and commits or discards them together.
use crate::config::EngineSettings;
use crate::error::{LedgerError, Result};
use crate::records::{IssueLine, Notification, ReceiveLine, RequestLine, RrpLine, StockItem, User};
use crate::types::ApprovalStatus;
use crate::utils::new_uuid_to_bech32;
use rust_decimal::Decimal;
use sled::Tree;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree, Transactional,
};

pub type TxResult<T> = ConflictableTransactionResult<T, LedgerError>;

// index keys never contain the unit separator, ids and numbers may contain '/'
const SEP: char = '\x1f';

pub mod keys {
    use super::SEP;

    pub fn request_group(request_number: &str) -> String {
        format!("req_no{SEP}{request_number}{SEP}")
    }
    pub fn request_claim(request_number: &str) -> String {
        format!("req_claim{SEP}{request_number}")
    }
    pub fn rrp_batch(fiscal_year: &str, rrp_number: &str) -> String {
        format!("rrp_no{SEP}{fiscal_year}{SEP}{rrp_number}{SEP}")
    }
    /// Prefix of every correction of a base, `L001` matches `L001T1..`.
    pub fn rrp_base(fiscal_year: &str, base: &str) -> String {
        format!("rrp_no{SEP}{fiscal_year}{SEP}{base}T")
    }
    pub fn rrp_live(fiscal_year: &str, base: &str) -> String {
        format!("rrp_live{SEP}{fiscal_year}{SEP}{base}")
    }
    pub fn nac_rrp(nac_code: &str) -> String {
        format!("nac_rrp{SEP}{nac_code}{SEP}")
    }
    pub fn nac_receive(nac_code: &str) -> String {
        format!("nac_rcv{SEP}{nac_code}{SEP}")
    }
    pub fn nac_issue(nac_code: &str) -> String {
        format!("nac_iss{SEP}{nac_code}{SEP}")
    }
    pub fn user_notifications(user_id: &str) -> String {
        format!("ntf_user{SEP}{user_id}{SEP}")
    }
}

pub trait AbortExt<T> {
    fn or_abort(self) -> TxResult<T>;
}

impl<T> AbortExt<T> for Result<T> {
    fn or_abort(self) -> TxResult<T> {
        self.map_err(ConflictableTransactionError::Abort)
    }
}

fn decode<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    Ok(minicbor::decode(bytes)?)
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>> {
    Ok(minicbor::to_vec(value)?)
}

pub struct LedgerStore {
    db: sled::Db,
    requests: Tree,
    receives: Tree,
    rrps: Tree,
    issues: Tree,
    stock: Tree,
    notifications: Tree,
    users: Tree,
    index: Tree,
}

/// Transactional view handed to workflow closures.
pub struct Tx<'a> {
    requests: &'a TransactionalTree,
    receives: &'a TransactionalTree,
    rrps: &'a TransactionalTree,
    issues: &'a TransactionalTree,
    stock: &'a TransactionalTree,
    notifications: &'a TransactionalTree,
    users: &'a TransactionalTree,
    index: &'a TransactionalTree,
}

impl LedgerStore {
    pub fn new(db: sled::Db) -> Result<Self> {
        Ok(Self {
            requests: db.open_tree("requests")?,
            receives: db.open_tree("receives")?,
            rrps: db.open_tree("rrps")?,
            issues: db.open_tree("issues")?,
            stock: db.open_tree("stock")?,
            notifications: db.open_tree("notifications")?,
            users: db.open_tree("users")?,
            index: db.open_tree("index")?,
            db,
        })
    }

    pub fn open(settings: &EngineSettings) -> Result<Self> {
        Self::new(sled::open(&settings.data_dir)?)
    }

    /// Tree for the sled backed configuration store.
    pub fn config_tree(&self) -> Result<Tree> {
        Ok(self.db.open_tree("config")?)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Run `f` atomically across all trees.
    ///
    /// sled may re-run `f` when a concurrent transaction touched the same
    /// keys, so `f` must derive everything from what it reads through `Tx`.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: Fn(&Tx<'_>) -> TxResult<T>,
    {
        let trees = (
            &self.requests,
            &self.receives,
            &self.rrps,
            &self.issues,
            &self.stock,
            &self.notifications,
            &self.users,
            &self.index,
        );
        let out = trees.transaction(
            |(requests, receives, rrps, issues, stock, notifications, users, index)| {
                let tx = Tx {
                    requests,
                    receives,
                    rrps,
                    issues,
                    stock,
                    notifications,
                    users,
                    index,
                };
                f(&tx)
            },
        )?;
        Ok(out)
    }

    fn load<T>(tree: &Tree, key: &str) -> Result<Option<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        tree.get(key.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Ids stored under an index prefix, in key order.
    fn scan_ids(&self, prefix: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in self.index.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|_| LedgerError::Dependency("index key is not utf-8".into()))?;
            if let Some(id) = key.rsplit(SEP).next() {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    fn load_all<T>(tree: &Tree, ids: &[String]) -> Result<Vec<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = Self::load(tree, id)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    pub fn request(&self, id: &str) -> Result<Option<RequestLine>> {
        Self::load(&self.requests, id)
    }

    pub fn requests_by_number(&self, request_number: &str) -> Result<Vec<RequestLine>> {
        let ids = self.scan_ids(&keys::request_group(request_number))?;
        Self::load_all(&self.requests, &ids)
    }

    pub fn receive(&self, id: &str) -> Result<Option<ReceiveLine>> {
        Self::load(&self.receives, id)
    }

    pub fn receives_for(&self, nac_code: &str) -> Result<Vec<ReceiveLine>> {
        let ids = self.scan_ids(&keys::nac_receive(nac_code))?;
        Self::load_all(&self.receives, &ids)
    }

    pub fn issue(&self, id: &str) -> Result<Option<IssueLine>> {
        Self::load(&self.issues, id)
    }

    pub fn issues_for(&self, nac_code: &str) -> Result<Vec<IssueLine>> {
        let ids = self.scan_ids(&keys::nac_issue(nac_code))?;
        Self::load_all(&self.issues, &ids)
    }

    pub fn rrp_line(&self, id: &str) -> Result<Option<RrpLine>> {
        Self::load(&self.rrps, id)
    }

    pub fn rrp_batch(&self, fiscal_year: &str, rrp_number: &str) -> Result<Vec<RrpLine>> {
        let ids = self.scan_ids(&keys::rrp_batch(fiscal_year, rrp_number))?;
        Self::load_all(&self.rrps, &ids)
    }

    /// Every correction of `base` in the fiscal year, grouped by T index.
    pub fn rrp_corrections(&self, fiscal_year: &str, base: &str) -> Result<Vec<(u32, Vec<RrpLine>)>> {
        let mut groups: Vec<(u32, Vec<RrpLine>)> = Vec::new();
        let prefix = keys::rrp_base(fiscal_year, base);
        for entry in self.index.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|_| LedgerError::Dependency("index key is not utf-8".into()))?;
            let rest = &key[prefix.len()..];
            let Some((suffix, id)) = rest.split_once(SEP) else {
                continue;
            };
            let Ok(correction) = suffix.parse::<u32>() else {
                continue;
            };
            let Some(line) = Self::load::<RrpLine>(&self.rrps, id)? else {
                continue;
            };
            match groups.iter_mut().find(|(n, _)| *n == correction) {
                Some((_, lines)) => lines.push(line),
                None => groups.push((correction, vec![line])),
            }
        }
        groups.sort_by_key(|(n, _)| *n);
        Ok(groups)
    }

    /// Most recent approved landed unit cost for a NAC code.
    pub fn latest_approved_unit_cost(&self, nac_code: &str) -> Result<Option<Decimal>> {
        let ids = self.scan_ids(&keys::nac_rrp(nac_code))?;
        let lines: Vec<RrpLine> = Self::load_all(&self.rrps, &ids)?;
        Ok(lines
            .into_iter()
            .filter(|l| l.approval_status == ApprovalStatus::Approved)
            .max_by(|a, b| {
                (a.date, a.created_at.to_datetime_utc())
                    .cmp(&(b.date, b.created_at.to_datetime_utc()))
            })
            .and_then(|l| l.unit_cost()))
    }

    pub fn stock_item(&self, nac_code: &str) -> Result<Option<StockItem>> {
        Self::load(&self.stock, nac_code)
    }

    pub fn user(&self, username: &str) -> Result<Option<User>> {
        Self::load(&self.users, username)
    }

    /// Add a user to the directory, returning the existing record if present.
    pub fn register_user(&self, username: &str) -> Result<User> {
        if username.trim().is_empty() {
            return Err(LedgerError::Validation("username must not be empty".into()));
        }
        let id = new_uuid_to_bech32("usr")?;
        self.transaction(|tx| {
            if let Some(existing) = tx.user(username)? {
                return Ok(existing);
            }
            let user = User {
                id: id.clone(),
                username: username.to_string(),
            };
            tx.put_user(&user)?;
            Ok(user)
        })
    }

    pub fn remove_user(&self, username: &str) -> Result<()> {
        self.users.remove(username.as_bytes())?;
        Ok(())
    }

    pub fn notification(&self, id: &str) -> Result<Option<Notification>> {
        Self::load(&self.notifications, id)
    }

    pub fn notifications_for(&self, user_id: &str) -> Result<Vec<Notification>> {
        let ids = self.scan_ids(&keys::user_notifications(user_id))?;
        Self::load_all(&self.notifications, &ids)
    }

    pub fn count_rrp_lines(&self) -> usize {
        self.rrps.len()
    }
}

impl<'a> Tx<'a> {
    fn get<T>(&self, tree: &TransactionalTree, key: &str) -> TxResult<Option<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match tree.get(key.as_bytes())? {
            Some(bytes) => decode(&bytes).map(Some).or_abort(),
            None => Ok(None),
        }
    }

    fn put<T: minicbor::Encode<()>>(
        &self,
        tree: &TransactionalTree,
        key: &str,
        value: &T,
    ) -> TxResult<()> {
        let bytes = encode(value).or_abort()?;
        tree.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn request(&self, id: &str) -> TxResult<Option<RequestLine>> {
        self.get(self.requests, id)
    }

    pub fn put_request(&self, line: &RequestLine) -> TxResult<()> {
        self.put(self.requests, &line.id, line)
    }

    pub fn receive(&self, id: &str) -> TxResult<Option<ReceiveLine>> {
        self.get(self.receives, id)
    }

    pub fn put_receive(&self, line: &ReceiveLine) -> TxResult<()> {
        self.put(self.receives, &line.id, line)
    }

    pub fn rrp_line(&self, id: &str) -> TxResult<Option<RrpLine>> {
        self.get(self.rrps, id)
    }

    pub fn put_rrp_line(&self, line: &RrpLine) -> TxResult<()> {
        self.put(self.rrps, &line.id, line)
    }

    pub fn remove_rrp_line(&self, id: &str) -> TxResult<()> {
        self.rrps.remove(id.as_bytes())?;
        Ok(())
    }

    pub fn issue(&self, id: &str) -> TxResult<Option<IssueLine>> {
        self.get(self.issues, id)
    }

    pub fn put_issue(&self, line: &IssueLine) -> TxResult<()> {
        self.put(self.issues, &line.id, line)
    }

    pub fn stock_item(&self, nac_code: &str) -> TxResult<Option<StockItem>> {
        self.get(self.stock, nac_code)
    }

    pub fn put_stock_item(&self, item: &StockItem) -> TxResult<()> {
        self.put(self.stock, &item.nac_code, item)
    }

    pub fn user(&self, username: &str) -> TxResult<Option<User>> {
        self.get(self.users, username)
    }

    pub fn put_user(&self, user: &User) -> TxResult<()> {
        self.put(self.users, &user.username, user)
    }

    pub fn notification(&self, id: &str) -> TxResult<Option<Notification>> {
        self.get(self.notifications, id)
    }

    pub fn put_notification(&self, notification: &Notification) -> TxResult<()> {
        self.put(self.notifications, &notification.id, notification)?;
        self.index_insert(&format!(
            "{}{}",
            keys::user_notifications(&notification.user_id),
            notification.id
        ))
    }

    /// Current holder of a claim key.
    pub fn claim(&self, key: &str) -> TxResult<Option<String>> {
        match self.index.get(key.as_bytes())? {
            Some(raw) => String::from_utf8(raw.to_vec())
                .map(Some)
                .map_err(|_| LedgerError::Dependency("claim value is not utf-8".into()))
                .or_abort(),
            None => Ok(None),
        }
    }

    pub fn set_claim(&self, key: &str, holder: &str) -> TxResult<()> {
        self.index.insert(key.as_bytes(), holder.as_bytes())?;
        Ok(())
    }

    pub fn release_claim(&self, key: &str) -> TxResult<()> {
        self.index.remove(key.as_bytes())?;
        Ok(())
    }

    pub fn index_insert(&self, key: &str) -> TxResult<()> {
        self.index.insert(key.as_bytes(), &[] as &[u8])?;
        Ok(())
    }

    pub fn index_remove(&self, key: &str) -> TxResult<()> {
        self.index.remove(key.as_bytes())?;
        Ok(())
    }
}
