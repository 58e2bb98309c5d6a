use std::collections::BTreeMap;

use dbpool_middleware::prelude::{ResultSet, RowValues};

/// Rows the database must hold once every committed step is applied.
#[derive(Debug, Default)]
pub(crate) struct LedgerModel {
    rows: BTreeMap<i64, String>,
}

impl LedgerModel {
    pub(crate) fn insert(&mut self, id: i64, memo: String) {
        self.rows.insert(id, memo);
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    /// Compare a `SELECT id, memo FROM ledger ORDER BY id` result against the model.
    pub(crate) fn diff(&self, actual: &ResultSet) -> Option<String> {
        if actual.len() != self.rows.len() {
            return Some(format!(
                "row count mismatch: model {} vs database {}",
                self.rows.len(),
                actual.len()
            ));
        }
        for ((id, memo), row) in self.rows.iter().zip(actual.iter()) {
            let got_id = row.get("id").and_then(RowValues::as_int).copied();
            let got_memo = row.get("memo").and_then(RowValues::as_text);
            if got_id != Some(*id) || got_memo != Some(memo.as_str()) {
                return Some(format!(
                    "row mismatch at id {id}: expected {memo:?}, got {got_id:?}/{got_memo:?}"
                ));
            }
        }
        None
    }
}
