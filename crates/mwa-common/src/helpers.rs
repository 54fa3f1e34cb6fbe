//! Common helper functions for MWA.

/// Constant-time comparison of two byte slices. Only the length is
/// compared in variable time.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (lhs, rhs) in a.iter().zip(b.iter()) {
        diff |= lhs ^ rhs;
    }
    diff == 0
}

/// Returns true if `uri` carries a scheme, i.e. is an absolute URI.
///
/// A scheme is one ASCII letter followed by letters, digits, `+`, `-` or
/// `.`, terminated by `:`. Nothing after the scheme is checked.
pub fn is_absolute_uri(uri: &str) -> bool {
    let Some((scheme, _)) = uri.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq_identical() {
        assert!(constant_time_eq(b"token123", b"token123"));
        assert!(constant_time_eq(b"", b""));
        assert!(constant_time_eq(&[0xff], &[0xff]));
    }

    #[test]
    fn test_constant_time_eq_different() {
        assert!(!constant_time_eq(b"token123", b"token124"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"", b"a"));
    }

    #[test]
    fn test_constant_time_eq_different_lengths() {
        assert!(!constant_time_eq(b"short", b"much_longer_string"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[test]
    fn test_absolute_uri() {
        assert!(is_absolute_uri("https://example.com"));
        assert!(is_absolute_uri("solana-wallet:/v1/associate"));
        assert!(!is_absolute_uri("favicon.ico"));
        assert!(!is_absolute_uri("/icons/app.png"));
        assert!(!is_absolute_uri("1http://bad"));
        assert!(!is_absolute_uri(""));
    }
}
