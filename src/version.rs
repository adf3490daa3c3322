//! Version labels derived from template file names.

use once_cell::sync::Lazy;
use regex::Regex;

static VERSION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)_v(\d+)_").expect("version pattern is valid")
});

/// Tag assigned when a file name carries no `_v<digits>_` marker.
pub const DEFAULT_VERSION: &str = "v1";

/// Extracts the version tag from a template file name.
///
/// `sample_v2_form.xlsx` yields `v2`; names without a `_v<digits>_`
/// segment yield [`DEFAULT_VERSION`].
pub fn version_tag(filename: &str) -> String {
    VERSION_PATTERN
        .captures(filename)
        .and_then(|caps| caps.get(1))
        .map(|digits| format!("v{}", digits.as_str()))
        .unwrap_or_else(|| DEFAULT_VERSION.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_embedded_version() {
        assert_eq!(version_tag("sample_v2_form.xlsx"), "v2");
    }

    #[test]
    fn defaults_to_v1() {
        assert_eq!(version_tag("plain.xlsx"), "v1");
        assert_eq!(version_tag("form_v2.xlsx"), "v1");
    }

    #[test]
    fn marker_is_case_insensitive() {
        assert_eq!(version_tag("a_V10_b.xlsx"), "v10");
    }

    #[test]
    fn first_marker_wins() {
        assert_eq!(version_tag("x_v3_y_v4_z.xlsx"), "v3");
    }
}
