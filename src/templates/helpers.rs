//! Filters and functions available to every message template.

use chrono::DateTime;
use chrono_tz::Tz;
use std::collections::HashMap;
use std::fmt::Write;
use tera::{Error, Filter, Result, Tera, Value};

/// Display format used by the `local_time` filter unless overridden.
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Registers `local_time`, `eq` and `sub` on a template instance.
pub fn register(tera: &mut Tera, timezone: Tz) {
    tera.register_filter("local_time", LocalTime { timezone });
    tera.register_function("eq", eq);
    tera.register_function("sub", sub);
}

/// Formats an RFC3339 timestamp in the configured time-zone.
///
/// `{{ alert.starts_at | local_time }}` renders `2024-01-01 08:00:00` for
/// `2024-01-01T00:00:00Z` in `Asia/Shanghai`. A `null` timestamp renders as
/// an empty string. An explicit `format` argument takes a chrono format string.
pub struct LocalTime {
    timezone: Tz,
}

impl Filter for LocalTime {
    fn filter(&self, value: &Value, args: &HashMap<String, Value>) -> Result<Value> {
        let raw = match value {
            Value::Null => return Ok(Value::String(String::new())),
            Value::String(raw) => raw,
            other => {
                return Err(Error::msg(format!(
                    "local_time expects a timestamp string, got {other}"
                )))
            }
        };
        let format = match args.get("format") {
            Some(Value::String(format)) => format.as_str(),
            Some(other) => {
                return Err(Error::msg(format!(
                    "local_time format must be a string, got {other}"
                )))
            }
            None => DEFAULT_TIME_FORMAT,
        };

        let timestamp = DateTime::parse_from_rfc3339(raw)
            .map_err(|e| Error::msg(format!("invalid timestamp '{raw}': {e}")))?;
        let mut rendered = String::new();
        write!(rendered, "{}", timestamp.with_timezone(&self.timezone).format(format))
            .map_err(|_| Error::msg(format!("invalid time format '{format}'")))?;
        Ok(Value::String(rendered))
    }
}

fn required<'a>(args: &'a HashMap<String, Value>, name: &str, function: &str) -> Result<&'a Value> {
    args.get(name)
        .ok_or_else(|| Error::msg(format!("{function}() requires argument '{name}'")))
}

/// `eq(a=x, b=y)`: structural equality of two values.
fn eq(args: &HashMap<String, Value>) -> Result<Value> {
    let a = required(args, "a", "eq")?;
    let b = required(args, "b", "eq")?;
    Ok(Value::Bool(a == b))
}

/// `sub(a=x, b=y)`: integer subtraction, handy for `loop.index` arithmetic.
fn sub(args: &HashMap<String, Value>) -> Result<Value> {
    let as_int = |name: &str| -> Result<i64> {
        required(args, name, "sub")?
            .as_i64()
            .ok_or_else(|| Error::msg(format!("sub() argument '{name}' must be an integer")))
    };
    let a = as_int("a")?;
    let b = as_int("b")?;
    a.checked_sub(b)
        .map(Value::from)
        .ok_or_else(|| Error::msg("sub() overflowed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_local_time_converts_to_zone() {
        let filter = LocalTime {
            timezone: chrono_tz::Asia::Shanghai,
        };
        let rendered = filter
            .filter(&json!("2024-01-01T00:00:00Z"), &HashMap::new())
            .unwrap();
        assert_eq!(rendered, json!("2024-01-01 08:00:00"));
    }

    #[test]
    fn test_local_time_custom_format_and_null() {
        let filter = LocalTime {
            timezone: chrono_tz::UTC,
        };
        let rendered = filter
            .filter(
                &json!("2024-03-05T10:20:30+02:00"),
                &args(&[("format", json!("%H:%M"))]),
            )
            .unwrap();
        assert_eq!(rendered, json!("08:20"));

        let empty = filter.filter(&Value::Null, &HashMap::new()).unwrap();
        assert_eq!(empty, json!(""));
        assert!(filter.filter(&json!("yesterday"), &HashMap::new()).is_err());
    }

    #[test]
    fn test_eq_and_sub() {
        assert_eq!(
            eq(&args(&[("a", json!("firing")), ("b", json!("firing"))])).unwrap(),
            json!(true)
        );
        assert_eq!(
            eq(&args(&[("a", json!(1)), ("b", json!("1"))])).unwrap(),
            json!(false)
        );
        assert_eq!(sub(&args(&[("a", json!(5)), ("b", json!(1))])).unwrap(), json!(4));
        assert!(sub(&args(&[("a", json!("5")), ("b", json!(1))])).is_err());
        assert!(sub(&args(&[("a", json!(5))])).is_err());
    }
}
