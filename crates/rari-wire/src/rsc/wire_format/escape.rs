/// Prefix reserved for wire markers. Text that starts with it is doubled.
pub const MARKER_PREFIX: char = '$';

pub fn escape_rsc_string(value: &str) -> String {
    if value.starts_with(MARKER_PREFIX) { format!("${value}") } else { value.to_string() }
}

pub fn unescape_rsc_string(value: &str) -> String {
    if value.starts_with("$$") { value[1..].to_string() } else { value.to_string() }
}

/// True when a wire string is a marker rather than escaped text.
pub fn is_marker(value: &str) -> bool {
    value.starts_with(MARKER_PREFIX) && !value.starts_with("$$")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_strings_pass_through() {
        assert_eq!(escape_rsc_string("hello"), "hello");
        assert_eq!(unescape_rsc_string("hello"), "hello");
        assert_eq!(escape_rsc_string(""), "");
    }

    #[test]
    fn test_dollar_prefixed_text_is_doubled() {
        assert_eq!(escape_rsc_string("$100"), "$$100");
        assert_eq!(escape_rsc_string("$@1"), "$$@1");
        assert_eq!(escape_rsc_string("$"), "$$");
        assert_eq!(unescape_rsc_string("$$@1"), "$@1");
        assert_eq!(unescape_rsc_string("$$"), "$");
    }

    #[test]
    fn test_marker_detection() {
        assert!(is_marker("$@3"));
        assert!(is_marker("$Suspense"));
        assert!(!is_marker("$$@3"));
        assert!(!is_marker("text"));
        assert!(!is_marker(&escape_rsc_string("$Fragment")));
    }
}
