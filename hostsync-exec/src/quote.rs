//! POSIX shell quoting for commands sent over ssh.

/// Single-quote `s` for `sh`, escaping embedded single quotes.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        return s.to_owned();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("plain", "plain")]
    #[case("/.snapshots/hostsync", "/.snapshots/hostsync")]
    #[case("", "''")]
    #[case("a b", "'a b'")]
    #[case("echo 'hi'", r"'echo '\''hi'\'''")]
    #[case("$(rm -rf /)", "'$(rm -rf /)'")]
    fn quoting(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(shell_quote(input), expected);
    }
}
