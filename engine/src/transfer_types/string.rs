use super::slice::Slice;
use crate::errors::InvalidEncoding;
use static_assertions::{assert_eq_align, assert_eq_size};
use std::{
    borrow::Borrow,
    char::decode_utf16,
    fmt,
    hash::{Hash, Hasher},
    ops::Deref,
};

/// Growable UTF-8 string owned by this side of the boundary.
///
/// Every constructor that accepts raw bytes validates them and fails with
/// [`InvalidEncoding`] instead of accepting invalid text; the `_lossy`
/// constructors are the only way to get U+FFFD substitution.
///
/// The C side sees three opaque words and only touches the string through
/// the exported functions.
#[derive(Default, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct BridgeString(String);

assert_eq_size!(BridgeString, [usize; 3]);
assert_eq_align!(BridgeString, usize);

impl BridgeString {
    pub const fn new() -> Self {
        BridgeString(String::new())
    }

    pub fn from_utf8(bytes: &[u8]) -> Result<Self, InvalidEncoding> {
        let s = std::str::from_utf8(bytes)?;
        Ok(BridgeString(s.to_owned()))
    }

    pub fn from_utf8_lossy(bytes: &[u8]) -> Self {
        BridgeString(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn from_utf16(units: &[u16]) -> Result<Self, InvalidEncoding> {
        let mut s = String::with_capacity(units.len());
        let mut index = 0;
        for ch in decode_utf16(units.iter().copied()) {
            match ch {
                Ok(ch) => {
                    index += ch.len_utf16();
                    s.push(ch);
                }
                Err(_) => return Err(InvalidEncoding::Utf16 { index }),
            }
        }
        Ok(BridgeString(s))
    }

    pub fn from_utf16_lossy(units: &[u16]) -> Self {
        BridgeString(String::from_utf16_lossy(units))
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.0.capacity()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.0.reserve(additional)
    }

    pub fn push_str(&mut self, s: &str) {
        self.0.push_str(s)
    }

    pub fn clear(&mut self) {
        self.0.clear()
    }

    /// # Panics
    ///
    /// Panics if `new_len` does not lie on a char boundary.
    pub fn truncate(&mut self, new_len: usize) {
        self.0.truncate(new_len)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Pointer to the first byte.
    ///
    /// The bytes are NOT NUL-terminated; use [`Self::c_str`] when a
    /// terminator is needed.
    pub fn data(&self) -> *const u8 {
        self.0.as_ptr()
    }

    /// Returns a NUL-terminated pointer to the contents.
    ///
    /// The terminator is written into spare capacity so `len()` does not
    /// change. Any mutation of the string invalidates the pointer. Interior
    /// NUL bytes are not rejected.
    pub fn c_str(&mut self) -> *const libc::c_char {
        let len = self.0.len();
        self.0.reserve(1);
        unsafe {
            let bytes = self.0.as_mut_vec();
            bytes.as_mut_ptr().add(len).write(0);
            bytes.as_ptr().cast()
        }
    }

    pub fn as_view(&self) -> StringView<'_> {
        StringView(Slice::new(self.as_bytes()))
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Deref for BridgeString {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for BridgeString {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Hash for BridgeString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl From<String> for BridgeString {
    fn from(s: String) -> Self {
        BridgeString(s)
    }
}

impl From<&str> for BridgeString {
    fn from(s: &str) -> Self {
        BridgeString(s.to_owned())
    }
}

impl From<BridgeString> for String {
    fn from(s: BridgeString) -> Self {
        s.0
    }
}

impl<'a> From<StringView<'a>> for BridgeString {
    fn from(view: StringView<'a>) -> Self {
        BridgeString(view.as_str().to_owned())
    }
}

impl PartialEq<str> for BridgeString {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for BridgeString {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for BridgeString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for BridgeString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

/// Borrowed UTF-8 text: a byte [`Slice`] whose contents are known to be
/// valid UTF-8. Not NUL-terminated.
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct StringView<'a>(Slice<'a, u8>);

assert_eq_size!(StringView<'static>, [usize; 2]);

impl<'a> StringView<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self, InvalidEncoding> {
        std::str::from_utf8(bytes)?;
        Ok(StringView(Slice::new(bytes)))
    }

    /// # Safety
    ///
    /// `bytes` must be valid UTF-8.
    pub unsafe fn from_utf8_unchecked(bytes: Slice<'a, u8>) -> Self {
        StringView(bytes)
    }

    pub fn as_str(&self) -> &'a str {
        unsafe { std::str::from_utf8_unchecked(self.0.as_slice()) }
    }

    pub fn as_bytes(&self) -> Slice<'a, u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> From<&'a str> for StringView<'a> {
    fn from(s: &'a str) -> Self {
        StringView(Slice::new(s.as_bytes()))
    }
}

impl PartialEq for StringView<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for StringView<'_> {}

impl fmt::Debug for StringView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for StringView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.as_str(), f)
    }
}

#[cfg(test)]
mod string_test {
    use super::*;

    const SAMPLES: &[&[u8]] = &[
        b"",
        b"plain ascii",
        "caf\u{e9} \u{1f980}".as_bytes(),
        b"bad \xff byte",
        b"truncated \xe2\x82",
        b"\xc0\x80 overlong",
        b"\xed\xa0\x80 surrogate",
    ];

    #[test]
    fn test_validating_constructor_rejects_invalid_utf8() {
        assert_eq!(
            BridgeString::from_utf8(b"ok\xffno"),
            Err(InvalidEncoding::Utf8 {
                valid_up_to: 2,
                error_len: Some(1)
            })
        );
        assert_eq!(
            BridgeString::from_utf8(b"ok\xe2\x82"),
            Err(InvalidEncoding::Utf8 {
                valid_up_to: 2,
                error_len: None
            })
        );
    }

    #[test]
    fn test_lossy_agrees_with_validating_constructor() {
        for &bytes in SAMPLES {
            let lossy = BridgeString::from_utf8_lossy(bytes);
            match BridgeString::from_utf8(bytes) {
                Ok(strict) => {
                    assert_eq!(strict, lossy);
                    assert_eq!(strict.as_bytes(), bytes);
                    assert!(!lossy.contains('\u{fffd}'));
                }
                Err(_) => assert!(lossy.contains('\u{fffd}')),
            }
        }
    }

    #[test]
    fn test_lossy_replaces_only_invalid_sequences() {
        let s = BridgeString::from_utf8_lossy(b"a\xffb\xe2\x82");
        assert_eq!(s, "a\u{fffd}b\u{fffd}");
    }

    /// Bytes around every UTF-8 lead/continuation boundary.
    const EDGE_BYTES: &[u8] = &[
        0x00, 0x41, 0x7f, 0x80, 0xbf, 0xc0, 0xc1, 0xc2, 0xdf, 0xe0, 0xe2, 0xed, 0xef, 0xf0, 0xf4,
        0xf5, 0xff,
    ];

    const EDGE_UNITS: &[u16] = &[
        0x0041, 0x00e9, 0xd7ff, 0xd800, 0xdbff, 0xdc00, 0xdfff, 0xe000, 0xfffd, 0xffff,
    ];

    /// Every maximal invalid sequence becomes one U+FFFD. Returns whether
    /// the input was valid.
    fn expected_utf8_lossy(mut bytes: &[u8]) -> (String, bool) {
        let mut out = String::new();
        let mut valid = true;
        loop {
            match std::str::from_utf8(bytes) {
                Ok(s) => {
                    out.push_str(s);
                    return (out, valid);
                }
                Err(err) => {
                    valid = false;
                    let (good, rest) = bytes.split_at(err.valid_up_to());
                    out.push_str(std::str::from_utf8(good).unwrap());
                    out.push('\u{fffd}');
                    match err.error_len() {
                        Some(len) => bytes = &rest[len..],
                        None => return (out, valid),
                    }
                }
            }
        }
    }

    /// Returns the index of the first unpaired surrogate, if any.
    fn expected_utf16_lossy(units: &[u16]) -> (String, Option<usize>) {
        let mut out = String::new();
        let mut first_bad = None;
        let mut i = 0;
        while i < units.len() {
            let unit = units[i];
            let next = units.get(i + 1).copied();
            match (unit, next) {
                (0xd800..=0xdbff, Some(low @ 0xdc00..=0xdfff)) => {
                    let code = 0x10000 + ((u32::from(unit) - 0xd800) << 10) + (u32::from(low) - 0xdc00);
                    out.push(char::from_u32(code).unwrap());
                    i += 2;
                }
                (0xd800..=0xdfff, _) => {
                    first_bad.get_or_insert(i);
                    out.push('\u{fffd}');
                    i += 1;
                }
                _ => {
                    out.push(char::from_u32(u32::from(unit)).unwrap());
                    i += 1;
                }
            }
        }
        (out, first_bad)
    }

    fn check_utf8(bytes: &[u8]) {
        let (expected, valid) = expected_utf8_lossy(bytes);
        let lossy = BridgeString::from_utf8_lossy(bytes);
        assert_eq!(lossy, expected.as_str(), "{bytes:x?}");
        match BridgeString::from_utf8(bytes) {
            Ok(strict) => {
                assert!(valid, "{bytes:x?}");
                assert_eq!(strict.as_bytes(), bytes);
                assert_eq!(lossy.as_bytes(), bytes);
            }
            Err(_) => assert!(!valid, "{bytes:x?}"),
        }
    }

    fn check_utf16(units: &[u16]) {
        let (expected, first_bad) = expected_utf16_lossy(units);
        assert_eq!(BridgeString::from_utf16_lossy(units), expected.as_str(), "{units:x?}");
        match (BridgeString::from_utf16(units), first_bad) {
            (Ok(strict), None) => {
                let again: Vec<u16> = strict.encode_utf16().collect();
                assert_eq!(again, units);
            }
            (Err(err), Some(index)) => assert_eq!(err, InvalidEncoding::Utf16 { index }),
            (other, first_bad) => panic!("{units:x?}: {other:?} vs {first_bad:?}"),
        }
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_utf8_lossy_exhaustive_short_sequences() {
        for a in 0..=u8::MAX {
            check_utf8(&[a]);
            for b in 0..=u8::MAX {
                check_utf8(&[a, b]);
            }
        }
        for &a in EDGE_BYTES {
            for &b in EDGE_BYTES {
                for &c in EDGE_BYTES {
                    check_utf8(&[a, b, c]);
                    for &d in EDGE_BYTES {
                        check_utf8(&[a, b, c, d]);
                    }
                }
            }
        }
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_utf16_lossy_exhaustive_short_sequences() {
        for unit in 0..=u16::MAX {
            check_utf16(&[unit]);
            check_utf16(&[0x61, unit, 0x62]);
        }
        for &a in EDGE_UNITS {
            for &b in EDGE_UNITS {
                check_utf16(&[a, b]);
                for &c in EDGE_UNITS {
                    check_utf16(&[a, b, c]);
                }
            }
        }
    }

    #[test]
    fn test_view_round_trip_is_identity() {
        for &bytes in SAMPLES {
            if let Ok(s) = BridgeString::from_utf8(bytes) {
                assert_eq!(s.len(), bytes.len());
                let again = BridgeString::from(s.as_view());
                assert_eq!(again, s);
            }
        }
    }

    #[test]
    fn test_utf16() {
        let units: Vec<u16> = "h\u{e9}\u{1f980}".encode_utf16().collect();
        assert_eq!(
            BridgeString::from_utf16(&units).unwrap(),
            "h\u{e9}\u{1f980}"
        );

        let bad = [0x68, 0xd800, 0x69];
        assert_eq!(
            BridgeString::from_utf16(&bad),
            Err(InvalidEncoding::Utf16 { index: 1 })
        );
        assert_eq!(BridgeString::from_utf16_lossy(&bad), "h\u{fffd}i");
    }

    #[test]
    fn test_c_str_keeps_length() {
        let mut s = BridgeString::from("abc");
        let ptr = s.c_str();
        let c = unsafe { std::ffi::CStr::from_ptr(ptr) };
        assert_eq!(c.to_bytes(), b"abc");
        assert_eq!(s.len(), 3);
        assert!(s.capacity() > 3);
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let mut v = vec![
            BridgeString::from("b"),
            BridgeString::from("B"),
            BridgeString::from("\u{e9}"),
            BridgeString::from("a"),
        ];
        v.sort();
        let sorted: Vec<&str> = v.iter().map(|s| s.as_str()).collect();
        assert_eq!(sorted, ["B", "a", "b", "\u{e9}"]);
    }

    #[test]
    fn test_view_rejects_invalid_utf8() {
        assert!(StringView::new(b"\xff").is_err());
        assert_eq!(StringView::new(b"fine").unwrap().as_str(), "fine");
    }
}
