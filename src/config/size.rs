//! Parses the `N[K|M|G]` size suffix grammar used by `client_max_body_size`
//! (spec.md §3.1), case-insensitive, ×1024 / 1024² / 1024³.

pub fn parse_size(raw: &str) -> Result<usize, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty size value".to_string());
    }

    let (digits, multiplier) = match raw.as_bytes()[raw.len() - 1] {
        b'k' | b'K' => (&raw[..raw.len() - 1], 1024),
        b'm' | b'M' => (&raw[..raw.len() - 1], 1024 * 1024),
        b'g' | b'G' => (&raw[..raw.len() - 1], 1024 * 1024 * 1024),
        _ => (raw, 1),
    };

    let value: usize = digits
        .parse()
        .map_err(|_| format!("invalid size value '{}'", raw))?;

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size value '{}' overflows", raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_number() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
    }

    #[test]
    fn parses_suffixes_case_insensitively() {
        assert_eq!(parse_size("10k").unwrap(), 10 * 1024);
        assert_eq!(parse_size("10K").unwrap(), 10 * 1024);
        assert_eq!(parse_size("2M").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("1g").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("abc").is_err());
        assert!(parse_size("12x").is_err());
    }
}
