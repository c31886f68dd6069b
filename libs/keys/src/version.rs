/// Parse a Kubernetes `resourceVersion` string into an unsigned integer for cheap
/// comparison. `resourceVersion` is an opaque string per the API contract, but
/// every in-tree implementation emits monotonically increasing decimal integers, so
/// the engine uses this to cheaply detect "no-op" updates
pub fn parse_resource_version(rv: &str) -> Option<u64> {
    rv.parse().ok()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_decimal_versions() {
        assert_eq!(parse_resource_version("12345"), Some(12345));
    }

    #[test]
    fn rejects_non_numeric_versions() {
        assert_eq!(parse_resource_version("abc"), None);
        assert_eq!(parse_resource_version(""), None);
    }
}
