//! Equipment applicability sets and alias lists.
//!
//! Stock items record which vehicles or machines a part fits. Applicability
//! arrives as comma separated text mixing single numbers (`7`), numeric
//! ranges (`1-5`) and free-text fleet descriptions (`All Tata buses`). Once
//! parsed it lives as an [`EquipmentSet`]; ranges are only re-compressed when
//! rendering.
use crate::error::{LedgerError, Result};
use std::collections::BTreeSet;
use std::fmt;

/// Widest range accepted in one token, guards against `1-4000000000`.
pub const MAX_RANGE_SPAN: u32 = 10_000;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct EquipmentSet {
    #[n(0)]
    numbers: BTreeSet<u32>,
    #[n(1)]
    descriptions: BTreeSet<String>,
}

impl EquipmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse comma separated applicability text, expanding ranges.
    pub fn parse(text: &str) -> Result<Self> {
        let mut set = Self::new();
        for token in text.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            set.insert_token(token)?;
        }
        Ok(set)
    }

    fn insert_token(&mut self, token: &str) -> Result<()> {
        if let Ok(n) = token.parse::<u32>() {
            self.numbers.insert(n);
            return Ok(());
        }

        if let Some((lo, hi)) = token.split_once('-') {
            if let (Ok(lo), Ok(hi)) = (lo.trim().parse::<u32>(), hi.trim().parse::<u32>()) {
                let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                if hi - lo > MAX_RANGE_SPAN {
                    return Err(LedgerError::Validation(format!(
                        "equipment range {token} spans more than {MAX_RANGE_SPAN} units"
                    )));
                }
                self.numbers.extend(lo..=hi);
                return Ok(());
            }
        }

        self.descriptions.insert(token.to_string());
        Ok(())
    }

    /// Union of both sets, duplicates collapse.
    pub fn merge(&mut self, other: &EquipmentSet) {
        self.numbers.extend(other.numbers.iter().copied());
        self.descriptions.extend(other.descriptions.iter().cloned());
    }

    pub fn contains(&self, number: u32) -> bool {
        self.numbers.contains(&number)
    }

    pub fn numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.numbers.iter().copied()
    }

    pub fn descriptions(&self) -> impl Iterator<Item = &str> {
        self.descriptions.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty() && self.descriptions.is_empty()
    }

    /// Runs of two or more consecutive numbers become `lo-hi`.
    pub fn compressed_ranges(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut iter = self.numbers.iter().copied();
        let Some(first) = iter.next() else {
            return out;
        };

        let (mut start, mut end) = (first, first);
        for n in iter {
            if n == end + 1 {
                end = n;
                continue;
            }
            out.push(render_run(start, end));
            start = n;
            end = n;
        }
        out.push(render_run(start, end));
        out
    }
}

fn render_run(start: u32, end: u32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    }
}

impl fmt::Display for EquipmentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .compressed_ranges()
            .into_iter()
            .chain(self.descriptions.iter().cloned())
            .collect();
        f.write_str(&parts.join(","))
    }
}

/// Merge an alias (part number or item name) into a list, newest first.
///
/// Matching ignores surrounding whitespace and case; an existing alias keeps
/// its position.
pub fn merge_alias(list: &mut Vec<String>, alias: &str) {
    let alias = alias.trim();
    if alias.is_empty() {
        return;
    }
    if list.iter().any(|a| a.eq_ignore_ascii_case(alias)) {
        return;
    }
    list.insert(0, alias.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numbers_ranges_and_descriptions() {
        let set = EquipmentSet::parse("3, 1-2 ,Tata buses, 10").unwrap();

        assert_eq!(set.numbers().collect::<Vec<_>>(), vec![1, 2, 3, 10]);
        assert_eq!(set.descriptions().collect::<Vec<_>>(), vec!["Tata buses"]);
    }

    #[test]
    fn reversed_range_is_normalised() {
        let set = EquipmentSet::parse("9-7").unwrap();
        assert_eq!(set.numbers().collect::<Vec<_>>(), vec![7, 8, 9]);
    }

    #[test]
    fn oversized_range_is_rejected() {
        assert!(EquipmentSet::parse("1-99999").is_err());
    }

    #[test]
    fn renders_compressed() {
        let set = EquipmentSet::parse("1,2,3,5,7,8,Dozers").unwrap();
        assert_eq!(set.to_string(), "1-3,5,7-8,Dozers");
    }

    #[test]
    fn merge_deduplicates() {
        let mut a = EquipmentSet::parse("1-3,Graders").unwrap();
        let b = EquipmentSet::parse("3-5,Graders,Loaders").unwrap();
        a.merge(&b);

        assert_eq!(a.to_string(), "1-5,Graders,Loaders");
    }

    #[test]
    fn empty_text_gives_empty_set() {
        assert!(EquipmentSet::parse(" , ").unwrap().is_empty());
    }

    #[test]
    fn aliases_prepend_without_duplicates() {
        let mut list = vec!["P-100".to_string()];
        merge_alias(&mut list, "P-200");
        merge_alias(&mut list, "p-100");
        merge_alias(&mut list, "  ");

        assert_eq!(list, vec!["P-200".to_string(), "P-100".to_string()]);
    }
}
