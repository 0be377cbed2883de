//! Password authentication mechanisms

mod scram;

pub use scram::{ScramClient, ScramError, ScramState};

/// Hash a password for `AuthenticationMD5Password`:
/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`
pub fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let inner = md5::compute(format!("{}{}", password, user));
    let mut outer_input = format!("{:x}", inner).into_bytes();
    outer_input.extend_from_slice(&salt);
    format!("md5{:x}", md5::compute(outer_input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_password_format() {
        let hash = md5_password("postgres", "mysecretpassword", *b"abcd");
        assert!(hash.starts_with("md5"));
        assert_eq!(hash.len(), 35);
        assert!(hash[3..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_md5_password_depends_on_salt() {
        let a = md5_password("u", "p", [0, 0, 0, 0]);
        let b = md5_password("u", "p", [0, 0, 0, 1]);
        assert_ne!(a, b);
    }
}
