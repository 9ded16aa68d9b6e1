//! Argument template resolution.
//!
//! A string argument that is exactly `{{tool.field}}` or `{{tool.field+Nd}}`
//! is replaced with `field` from the most recent result of `tool` in the
//! run's tool log. A day offset requires the field to be an ISO date.

use std::sync::LazyLock;

use chrono::{DateTime, Days, NaiveDate};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::context::ToolRecord;

static TEMPLATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\{\{\s*([^{}.]+?)\s*\.\s*(\w+)\s*(?:([+-])\s*(\d+)\s*[dD])?\s*\}\}\s*$")
        .unwrap()
});

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Resolve templates in `args` against `records`. Only values present in
/// `args` are inspected; substituted values are not resolved again.
pub fn resolve(tool_name: &str, args: &Value, records: &[ToolRecord]) -> Value {
    match args {
        Value::String(s) => resolve_string(tool_name, s, records),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve(tool_name, item, records))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(tool_name, v, records)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(tool_name: &str, raw: &str, records: &[ToolRecord]) -> Value {
    let Some(caps) = TEMPLATE.captures(raw) else {
        return Value::String(raw.to_string());
    };
    let source = normalize(&caps[1]);
    let field = &caps[2];

    let Some(value) = records
        .iter()
        .rev()
        .filter(|r| normalize(&r.tool_name) == source)
        .find_map(|r| r.result.get(field))
    else {
        debug!(tool = tool_name, template = raw, "no matching tool record, keeping literal");
        return Value::String(raw.to_string());
    };

    let Some(days) = caps.get(4) else {
        return value.clone();
    };
    let negative = caps.get(3).is_some_and(|sign| sign.as_str() == "-");
    match days.as_str().parse::<u64>().ok().and_then(|n| shift_date(value, n, negative)) {
        Some(shifted) => Value::String(shifted),
        None => {
            debug!(tool = tool_name, template = raw, "date offset could not be applied");
            Value::Null
        }
    }
}

/// Lowercase and drop all whitespace so `Weather Lookup` matches `weatherlookup`.
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Shift a `YYYY-MM-DD` date, or the date part of an RFC 3339 timestamp,
/// keeping the rest of the string as it was.
fn shift_date(value: &Value, days: u64, negative: bool) -> Option<String> {
    let s = value.as_str()?.trim();
    let shift = |date: NaiveDate| {
        if negative {
            date.checked_sub_days(Days::new(days))
        } else {
            date.checked_add_days(Days::new(days))
        }
    };

    if let Ok(date) = NaiveDate::parse_from_str(s, DATE_FORMAT) {
        return shift(date).map(|d| d.format(DATE_FORMAT).to_string());
    }

    DateTime::parse_from_rfc3339(s).ok()?;
    let (date_part, rest) = (s.get(..10)?, s.get(10..)?);
    let date = NaiveDate::parse_from_str(date_part, DATE_FORMAT).ok()?;
    shift(date).map(|d| format!("{}{rest}", d.format(DATE_FORMAT)))
}
