//! JSON output for scripts.

use serde::Serialize;

use crate::error::Result;

/// # Errors
///
/// Returns an error if `output` cannot be serialized.
pub fn render<T: Serialize + ?Sized>(output: &T, pretty: bool) -> Result<String> {
    if pretty {
        Ok(serde_json::to_string_pretty(output)?)
    } else {
        Ok(serde_json::to_string(output)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compact_and_pretty() {
        let value = json!({"a": [1, 2]});
        assert_eq!(render(&value, false).unwrap(), r#"{"a":[1,2]}"#);
        assert!(render(&value, true).unwrap().contains("\n  \"a\""));
    }
}
