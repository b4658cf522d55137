//! Multi-key sorting and type filtering over record lists.
//!
//! Pure functions, no I/O. Records expose their fields through
//! [`SortRecord`].
//!
//! # Ordering rules
//!
//! - Keys are compared in `sort_by` order.
//! - `order[i]` applies to `sort_by[i]`; missing entries default to `"desc"`.
//!   Any string other than `"desc"` means ascending.
//! - `desc` only reverses numeric fields. Text fields always compare
//!   ascending, whatever the order says.
//! - A missing field reads as the number 0.
//! - Under one key, numbers order before text.
//! - The sort is stable.

use serde_json::Value;
use std::borrow::Cow;
use std::cmp::Ordering;

use crate::model::{Instrument, InstrumentDetail, Theme};

/// Direction applied when `order` is shorter than `sort_by`.
pub const DEFAULT_ORDER: &str = "desc";

/// A field value as seen by the sorter.
#[derive(Debug, Clone, PartialEq)]
pub enum SortValue<'a> {
    Number(f64),
    Text(Cow<'a, str>),
}

/// A record the sorter can read fields from.
pub trait SortRecord {
    /// Value of a named field, `None` if the record has no such field.
    fn field(&self, name: &str) -> Option<SortValue<'_>>;

    /// Value of the `type` field used by [`filter_by_type`].
    fn record_type(&self) -> Option<Cow<'_, str>> {
        match self.field("type")? {
            SortValue::Text(t) => Some(t),
            SortValue::Number(_) => None,
        }
    }
}

#[derive(Debug)]
enum KeyPart {
    Number(f64),
    Text(String),
}

impl KeyPart {
    /// `total_cmp` orders -0.0 before 0.0; a negated zero must still tie.
    fn number(n: f64) -> Self {
        Self::Number(if n == 0.0 { 0.0 } else { n })
    }

    fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Number(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Number(_)) => Ordering::Greater,
        }
    }
}

fn is_desc(order: &[&str], index: usize) -> bool {
    order.get(index).copied().unwrap_or(DEFAULT_ORDER) == "desc"
}

fn sort_key<T: SortRecord>(record: &T, sort_by: &[&str], order: &[&str]) -> Vec<KeyPart> {
    sort_by
        .iter()
        .enumerate()
        .map(|(i, field)| match record.field(field) {
            Some(SortValue::Text(text)) => KeyPart::Text(text.into_owned()),
            Some(SortValue::Number(n)) if is_desc(order, i) => KeyPart::number(-n),
            Some(SortValue::Number(n)) => KeyPart::number(n),
            None => KeyPart::number(0.0),
        })
        .collect()
}

/// Sort records by composite key.
pub fn sort<T: SortRecord>(records: Vec<T>, sort_by: &[&str], order: &[&str]) -> Vec<T> {
    if sort_by.is_empty() {
        return records;
    }

    let mut keyed: Vec<(Vec<KeyPart>, T)> = records
        .into_iter()
        .map(|record| (sort_key(&record, sort_by, order), record))
        .collect();

    keyed.sort_by(|(a, _), (b, _)| {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| x.compare(y))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    });

    keyed.into_iter().map(|(_, record)| record).collect()
}

/// Keep records whose `type` field equals `record_type`, in order.
pub fn filter_by_type<T: SortRecord + Clone>(records: &[T], record_type: &str) -> Vec<T> {
    records
        .iter()
        .filter(|record| record.record_type().as_deref() == Some(record_type))
        .cloned()
        .collect()
}

// ============================================================================
// SortRecord Implementations
// ============================================================================

fn number(n: impl Into<f64>) -> Option<SortValue<'static>> {
    Some(SortValue::Number(n.into()))
}

fn text(s: &str) -> Option<SortValue<'_>> {
    Some(SortValue::Text(Cow::Borrowed(s)))
}

impl SortRecord for Theme {
    fn field(&self, name: &str) -> Option<SortValue<'_>> {
        match name {
            "id" => number(self.id as f64),
            "code" => text(&self.code),
            "name" => text(&self.name),
            "trading_volume" => number(self.trading_volume as f64),
            "surge_stock_count" => number(self.surge_stock_count),
            _ => None,
        }
    }
}

impl SortRecord for Instrument {
    fn field(&self, name: &str) -> Option<SortValue<'_>> {
        match name {
            "code" => text(&self.code),
            "name" => text(&self.name),
            "price" => number(self.price),
            "trading_volume" => number(self.trading_volume as f64),
            "market_cap" => number(self.market_cap as f64),
            "type" => text(self.instrument_type.as_str()),
            _ => None,
        }
    }
}

impl SortRecord for InstrumentDetail {
    fn field(&self, name: &str) -> Option<SortValue<'_>> {
        match name {
            "foreign_trading" => number(self.foreign_trading as f64),
            "institution_trading" => number(self.institution_trading as f64),
            "individual_trading" => number(self.individual_trading as f64),
            "per" => self.per.and_then(number),
            "pbr" => self.pbr.and_then(number),
            "industry_per" => self.industry_per.and_then(number),
            "dividend_yield" => self.dividend_yield.and_then(number),
            _ => self.instrument.field(name),
        }
    }
}

impl SortRecord for Value {
    fn field(&self, name: &str) -> Option<SortValue<'_>> {
        match self.get(name)? {
            Value::Number(n) => n.as_f64().and_then(number),
            Value::String(s) => text(s),
            Value::Bool(b) => number(u8::from(*b)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn volumes(records: &[Value]) -> Vec<i64> {
        records.iter().map(|r| r["volume"].as_i64().unwrap()).collect()
    }

    #[test]
    fn test_sort_numeric_desc() {
        let records = vec![json!({"volume": 10}), json!({"volume": 50}), json!({"volume": 30})];
        let sorted = sort(records, &["volume"], &["desc"]);
        assert_eq!(volumes(&sorted), vec![50, 30, 10]);
    }

    #[test]
    fn test_sort_numeric_asc() {
        let records = vec![json!({"volume": 10}), json!({"volume": 50}), json!({"volume": 30})];
        let sorted = sort(records, &["volume"], &["asc"]);
        assert_eq!(volumes(&sorted), vec![10, 30, 50]);
    }

    #[test]
    fn test_missing_order_defaults_to_desc() {
        let records = vec![
            json!({"a": 1, "b": 1}),
            json!({"a": 1, "b": 3}),
            json!({"a": 2, "b": 2}),
        ];
        let sorted = sort(records, &["a", "b"], &["desc"]);
        let pairs: Vec<(i64, i64)> = sorted
            .iter()
            .map(|r| (r["a"].as_i64().unwrap(), r["b"].as_i64().unwrap()))
            .collect();
        assert_eq!(pairs, vec![(2, 2), (1, 3), (1, 1)]);
    }

    #[test]
    fn test_text_desc_stays_ascending() {
        let records = vec![json!({"name": "b"}), json!({"name": "c"}), json!({"name": "a"})];
        let sorted = sort(records, &["name"], &["desc"]);
        let names: Vec<&str> = sorted.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_missing_field_reads_as_zero() {
        let records = vec![json!({"volume": -5}), json!({}), json!({"volume": 5})];
        let sorted = sort(records, &["volume"], &["desc"]);
        assert_eq!(sorted[0]["volume"], 5);
        assert_eq!(sorted[1], json!({}));
        assert_eq!(sorted[2]["volume"], -5);
    }

    #[test]
    fn test_numbers_before_text() {
        let records = vec![json!({"k": "x"}), json!({"k": 3}), json!({"k": "a"})];
        let sorted = sort(records, &["k"], &["asc"]);
        assert_eq!(sorted, vec![json!({"k": 3}), json!({"k": "a"}), json!({"k": "x"})]);
    }

    #[test]
    fn test_sort_is_stable() {
        let records = vec![
            json!({"v": 1, "tag": "first"}),
            json!({"v": 2, "tag": "top"}),
            json!({"v": 1, "tag": "second"}),
        ];
        let sorted = sort(records, &["v"], &["desc"]);
        let tags: Vec<&str> = sorted.iter().map(|r| r["tag"].as_str().unwrap()).collect();
        assert_eq!(tags, vec!["top", "first", "second"]);
    }

    #[test]
    fn test_unknown_order_means_ascending() {
        let records = vec![json!({"v": 2}), json!({"v": 1})];
        let sorted = sort(records, &["v"], &["DESC"]);
        assert_eq!(sorted, vec![json!({"v": 1}), json!({"v": 2})]);
    }

    #[test]
    fn test_filter_by_type() {
        let records = vec![
            json!({"code": "1", "type": "stock"}),
            json!({"code": "2", "type": "ETF"}),
            json!({"code": "3"}),
            json!({"code": "4", "type": "ETF"}),
        ];
        let etfs = filter_by_type(&records, "ETF");
        let codes: Vec<&str> = etfs.iter().map(|r| r["code"].as_str().unwrap()).collect();
        assert_eq!(codes, vec!["2", "4"]);
    }

    #[test]
    fn test_instrument_fields() {
        let mut etf = Instrument::new("069500", "KODEX 200 ETF");
        etf.trading_volume = 700;
        let mut stock = Instrument::new("005930", "삼성전자");
        stock.trading_volume = 900;

        let sorted = sort(vec![etf.clone(), stock.clone()], &["trading_volume"], &[]);
        assert_eq!(sorted[0].code, "005930");

        assert_eq!(filter_by_type(&[etf, stock], "stock").len(), 1);
    }

    #[test]
    fn test_nan_price_keeps_total_order() {
        let priced = |code: &str, price: f64| {
            let mut instrument = Instrument::new(code, code);
            instrument.price = price;
            instrument
        };
        let records = vec![
            priced("a", 10.0),
            priced("b", f64::NAN),
            priced("c", 30.0),
            priced("d", 20.0),
        ];

        let sorted = sort(records, &["price"], &["asc"]);
        let codes: Vec<&str> = sorted.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["a", "d", "c", "b"]);
    }

    #[test]
    fn test_negated_zero_ties_with_missing_field() {
        let records = vec![json!({"name": "x"}), json!({"volume": 0, "name": "y"})];
        let sorted = sort(records, &["volume", "name"], &["desc", "asc"]);
        assert_eq!(sorted[0]["name"], "x");
        assert_eq!(sorted[1]["name"], "y");
    }

    #[test]
    fn test_detail_optional_fields() {
        let detail = InstrumentDetail {
            instrument: Instrument::new("005930", "삼성전자"),
            foreign_trading: 0,
            institution_trading: 0,
            individual_trading: 0,
            per: None,
            pbr: Some(1.2),
            industry_per: None,
            dividend_yield: None,
        };
        assert_eq!(detail.field("per"), None);
        assert_eq!(detail.field("pbr"), Some(SortValue::Number(1.2)));
        assert_eq!(detail.field("name"), Some(SortValue::Text("삼성전자".into())));
    }
}
