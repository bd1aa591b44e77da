//! Display-name sanitization for uploaded files.

use crate::MAX_FILE_NAME_LEN;

/// Sanitize a client-supplied file name into a safe display name.
///
/// Path separators are stripped by keeping only the final component, every
/// character outside a conservative set is replaced with `_`, and the result
/// is truncated to [`MAX_FILE_NAME_LEN`] bytes on a character boundary.
///
/// Returns an error if nothing displayable remains.
pub fn sanitize_file_name(name: &str) -> crate::Result<String> {
    // Keep only the final path component; clients sometimes send full paths.
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let mut sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ' ' | '(' | ')') {
                c
            } else {
                '_'
            }
        })
        .collect();

    while sanitized.len() > MAX_FILE_NAME_LEN {
        sanitized.pop();
    }

    // A name of only dots or underscores carries no information and the
    // dot-only forms collide with directory navigation.
    let meaningless = sanitized.chars().all(|c| matches!(c, '.' | '_' | ' '));
    if sanitized.is_empty() || meaningless {
        return Err(crate::Error::InvalidFileName(format!(
            "no displayable characters in {:?}",
            name
        )));
    }

    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_pass_through() {
        assert_eq!(sanitize_file_name("report.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize_file_name("My File (1).bin").unwrap(), "My File (1).bin");
    }

    #[test]
    fn test_path_components_stripped() {
        assert_eq!(sanitize_file_name("/etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_file_name("..\\..\\boot.ini").unwrap(), "boot.ini");
        assert_eq!(sanitize_file_name("a/b/c.txt").unwrap(), "c.txt");
    }

    #[test]
    fn test_unsafe_characters_replaced() {
        assert_eq!(sanitize_file_name("a:b*c?.txt").unwrap(), "a_b_c_.txt");
        assert_eq!(sanitize_file_name("naïve.txt").unwrap(), "na_ve.txt");
    }

    #[test]
    fn test_empty_and_meaningless_rejected() {
        assert!(sanitize_file_name("").is_err());
        assert!(sanitize_file_name("   ").is_err());
        assert!(sanitize_file_name("..").is_err());
        assert!(sanitize_file_name("///").is_err());
        assert!(sanitize_file_name("***").is_err());
    }

    #[test]
    fn test_long_names_truncated() {
        let long = "a".repeat(400);
        let sanitized = sanitize_file_name(&long).unwrap();
        assert_eq!(sanitized.len(), crate::MAX_FILE_NAME_LEN);
    }
}
