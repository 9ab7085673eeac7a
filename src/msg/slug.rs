use sha2::{Digest, Sha256};

/// Lowercase, collapse runs of anything outside [a-z0-9] to `-`, trim the
/// ends. An input that sanitizes to nothing becomes `"unknown"`.
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_dash = false;
    for c in input.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }
    if out.is_empty() {
        "unknown".to_string()
    } else {
        out
    }
}

/// Whether a string can appear as a directory entry name.
pub fn valid_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\0')
        && name.len() <= 255
}

/// Decimal digit count of the largest message index, used as the zero-pad
/// width so lexicographic listing order matches numeric order.
pub fn pad_width(max_index: u64) -> usize {
    let mut width = 1;
    let mut n = max_index;
    while n >= 10 {
        width += 1;
        n /= 10;
    }
    width
}

/// `{index}-{slug}`, index zero-padded to `width`.
pub fn message_dir_name(index: u64, slug: &str, width: usize) -> String {
    format!("{index:0width$}-{slug}")
}

/// Split a `{index}-{slug}` directory name back into its parts.
pub fn parse_message_dir_name(name: &str) -> Option<(u64, &str)> {
    let (digits, slug) = name.split_once('-')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index = digits.parse().ok()?;
    Some((index, slug))
}

/// Deterministic non-zero inode number for content-derived nodes. Each part
/// is fed NUL-terminated so `("a", "bc")` and `("ab", "c")` hash apart.
pub fn stable_inode(parts: &[&str]) -> u64 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    let ino = u64::from_be_bytes(bytes);
    if ino == 0 { 1 } else { ino }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_collapses_and_trims() {
        assert_eq!(sanitize("Hello, World!"), "hello-world");
        assert_eq!(sanitize("  --Weird__name--  "), "weird-name");
        assert_eq!(sanitize("bash"), "bash");
        assert_eq!(sanitize("!!!"), "unknown");
        assert_eq!(sanitize(""), "unknown");
        assert_eq!(sanitize("a..b..c"), "a-b-c");
    }

    #[test]
    fn filename_validity() {
        assert!(valid_filename("server-A"));
        assert!(valid_filename("alpha"));
        assert!(!valid_filename(""));
        assert!(!valid_filename("."));
        assert!(!valid_filename(".."));
        assert!(!valid_filename("a/b"));
        assert!(!valid_filename(&"x".repeat(256)));
    }

    #[test]
    fn pad_width_matches_digit_count() {
        assert_eq!(pad_width(0), 1);
        assert_eq!(pad_width(9), 1);
        assert_eq!(pad_width(10), 2);
        assert_eq!(pad_width(99), 2);
        assert_eq!(pad_width(100), 3);
    }

    #[test]
    fn dir_name_round_trips() {
        let name = message_dir_name(7, "bash-tool", 3);
        assert_eq!(name, "007-bash-tool");
        let (index, slug) = parse_message_dir_name(&name).unwrap();
        assert_eq!(index, 7);
        assert_eq!(slug, "bash-tool");
    }

    #[test]
    fn dir_name_rejects_garbage() {
        assert!(parse_message_dir_name("nodash").is_none());
        assert!(parse_message_dir_name("-slug").is_none());
        assert!(parse_message_dir_name("1x-slug").is_none());
    }

    #[test]
    fn inode_hash_is_stable_and_distinct() {
        let a = stable_inode(&["msg-dir", "conv-1", "4"]);
        let b = stable_inode(&["msg-dir", "conv-1", "4"]);
        let c = stable_inode(&["msg-dir", "conv-1", "5"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, 0);
        // Concatenation boundaries matter.
        assert_ne!(
            stable_inode(&["ab", "c"]),
            stable_inode(&["a", "bc"])
        );
    }
}
