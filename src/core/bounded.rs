//! Capacity-checked strings for fields fed by untrusted input.
//!
//! Capture identifiers, labels and error messages arrive from the server
//! or are built from variable-length text. They are stored with a fixed
//! byte capacity and truncated on a character boundary when too long.

use serde::{Serialize, Serializer};
use std::fmt;

/// Capture identifier capacity in bytes.
pub const CAPTURE_ID_CAPACITY: usize = 64;

/// Capture label capacity in bytes.
pub const LABEL_CAPACITY: usize = 64;

/// Heater profile name capacity in bytes.
pub const PROFILE_NAME_CAPACITY: usize = 32;

/// Error message capacity in bytes.
pub const ERROR_CAPACITY: usize = 128;

/// A UTF-8 string holding at most `N` bytes.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct BoundedString<const N: usize> {
    inner: heapless::String<N>,
}

impl<const N: usize> BoundedString<N> {
    pub fn new() -> Self {
        Self {
            inner: heapless::String::new(),
        }
    }

    /// Build from `value`, truncating to capacity.
    pub fn truncated(value: &str) -> Self {
        let mut s = Self::new();
        s.set(value);
        s
    }

    /// Replace the contents. Returns true if `value` had to be truncated.
    pub fn set(&mut self, value: &str) -> bool {
        self.inner.clear();
        self.push_str(value)
    }

    /// Append as much of `value` as fits. Returns true if anything was cut.
    pub fn push_str(&mut self, value: &str) -> bool {
        let room = N - self.inner.len();
        let fitting = floor_char_boundary(value, room);
        // Cannot fail: `fitting` is at most `room` bytes
        let _ = self.inner.push_str(&value[..fitting]);
        fitting < value.len()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn as_str(&self) -> &str {
        self.inner.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

/// Largest byte index `<= max` that falls on a char boundary of `s`.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

impl<const N: usize> fmt::Display for BoundedString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<const N: usize> fmt::Debug for BoundedString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl<const N: usize> From<&str> for BoundedString<N> {
    fn from(value: &str) -> Self {
        Self::truncated(value)
    }
}

impl<const N: usize> Serialize for BoundedString<N> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

pub type CaptureId = BoundedString<CAPTURE_ID_CAPACITY>;
pub type Label = BoundedString<LABEL_CAPACITY>;
pub type ProfileName = BoundedString<PROFILE_NAME_CAPACITY>;
pub type ErrorMessage = BoundedString<ERROR_CAPACITY>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_value_is_kept() {
        let mut s: BoundedString<8> = BoundedString::new();
        assert!(!s.set("abc"));
        assert_eq!(s.as_str(), "abc");
        assert_eq!(s.capacity(), 8);
    }

    #[test]
    fn test_long_value_is_truncated() {
        let mut s: BoundedString<4> = BoundedString::new();
        assert!(s.set("abcdefgh"));
        assert_eq!(s.as_str(), "abcd");
        assert_eq!(s.len(), 4);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        // 'é' is two bytes; only one byte of room remains after "abc"
        let s: BoundedString<4> = BoundedString::truncated("abcé");
        assert_eq!(s.as_str(), "abc");

        let s: BoundedString<5> = BoundedString::truncated("abcé");
        assert_eq!(s.as_str(), "abcé");
    }

    #[test]
    fn test_push_appends_until_full() {
        let mut s: BoundedString<6> = BoundedString::truncated("ab");
        assert!(!s.push_str("cd"));
        assert!(s.push_str("efgh"));
        assert_eq!(s.as_str(), "abcdef");

        s.clear();
        assert!(s.is_empty());
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let s = ErrorMessage::truncated("stopped by user");
        assert_eq!(serde_json::to_string(&s).unwrap(), "\"stopped by user\"");
        assert_eq!(format!("{s}"), "stopped by user");
    }
}
