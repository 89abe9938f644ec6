//! JSON rendering of extracted rows.

use crate::error::Result;
use crate::row::Row;

/// JSON output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JsonFormat {
    /// Compact single-line JSON
    Compact,
    /// Pretty-printed with 2-space indentation
    #[default]
    Pretty,
}

/// Convert rows to a JSON array of objects.
///
/// Keys keep header order and cells without a value become `null`.
pub fn to_json(rows: &[Row], format: JsonFormat) -> Result<String> {
    let json = match format {
        JsonFormat::Compact => serde_json::to_string(rows)?,
        JsonFormat::Pretty => serde_json::to_string_pretty(rows)?,
    };
    Ok(json)
}

/// Convert rows to JSON with default formatting.
pub fn to_json_default(rows: &[Row]) -> Result<String> {
    to_json(rows, JsonFormat::Pretty)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Row> {
        let mut first = Row::with_columns(["Name", "Age"]);
        first.set("Name", Some("Alice".to_string()));
        first.set("Age", Some("30".to_string()));

        let mut second = Row::with_columns(["Name", "Age"]);
        second.set("Name", Some("Bob".to_string()));
        vec![first, second]
    }

    #[test]
    fn test_to_json_compact() {
        let json = to_json(&sample(), JsonFormat::Compact).unwrap();
        assert!(!json.contains('\n')); // Compact has no newlines
        assert_eq!(
            json,
            r#"[{"Name":"Alice","Age":"30"},{"Name":"Bob","Age":null}]"#
        );
    }

    #[test]
    fn test_to_json_pretty() {
        let json = to_json(&sample(), JsonFormat::Pretty).unwrap();
        assert!(json.contains("\"Name\": \"Alice\""));
        assert!(json.contains("\"Age\": null"));
    }

    #[test]
    fn test_to_json_default() {
        let json = to_json_default(&sample()).unwrap();
        assert!(json.contains('\n')); // Default is pretty-printed
        assert_eq!(to_json_default(&[]).unwrap(), "[]");
    }
}
