use std::ascii;
use std::fmt::{self, Display};

/// Displays a byte string with non-printable bytes escaped
#[derive(Debug)]
pub struct DisplayBytes<'a>(pub &'a [u8]);

impl Display for DisplayBytes<'_> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b\"")?;
        for &b in self.0 {
            for c in ascii::escape_default(b) {
                write!(f, "{}", char::from(c))?;
            }
        }
        write!(f, "\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes() {
        assert_eq!(DisplayBytes(b"a/b").to_string(), "b\"a/b\"");
        assert_eq!(DisplayBytes(b"\0\n").to_string(), "b\"\\x00\\n\"");
    }
}
