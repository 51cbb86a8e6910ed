//! Caller-supplied ordered table substituting small-integer codes for
//! symbols/strings that would otherwise be spelled out on the wire.

use crate::symbols::SymbolTable;
use crate::value::Value;

pub enum IndexItem {
    Str(String),
    Symbol(crate::symbols::Symbol),
}

impl From<&str> for IndexItem {
    fn from(s: &str) -> Self {
        IndexItem::Str(s.to_string())
    }
}

impl From<String> for IndexItem {
    fn from(s: String) -> Self {
        IndexItem::Str(s)
    }
}

impl From<crate::symbols::Symbol> for IndexItem {
    fn from(s: crate::symbols::Symbol) -> Self {
        IndexItem::Symbol(s)
    }
}

pub struct IndexTable {
    values: Vec<Value>,
}

impl IndexTable {
    /// Builds the table from an ordered sequence of items. String items are
    /// auto-promoted to keyword symbols.
    pub fn new(symbols: &SymbolTable, items: impl IntoIterator<Item = IndexItem>) -> Self {
        let values = items
            .into_iter()
            .map(|item| match item {
                IndexItem::Str(s) => Value::keyword(symbols, &s),
                IndexItem::Symbol(s) => Value::Symbol(s),
            })
            .collect();
        Self { values }
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.values.iter().any(|v| v == value)
    }

    pub fn position_of(&self, value: &Value) -> Option<u64> {
        self.values
            .iter()
            .position(|v| v == value)
            .map(|i| i as u64)
    }

    pub fn value_at(&self, index: u64) -> Option<Value> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.values.get(i))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_promote_to_keywords_and_round_trip_position() {
        let symbols = SymbolTable::new();
        let table = IndexTable::new(&symbols, ["foo", "bar"].map(IndexItem::from));
        let foo = Value::keyword(&symbols, "foo");
        assert!(table.contains(&foo));
        assert_eq!(table.position_of(&foo), Some(0));
        assert_eq!(table.value_at(1), Some(Value::keyword(&symbols, "bar")));
        assert_eq!(table.value_at(2), None);
    }
}
