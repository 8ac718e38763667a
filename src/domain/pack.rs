//! Register payload codec.
//!
//! Formats are space-separated tags, little-endian:
//!
//! | Tag             | Meaning                                  |
//! |-----------------|------------------------------------------|
//! | `u8 u16 u32`    | unsigned integers                        |
//! | `i8 i16 i32`    | signed integers                          |
//! | `s`             | UTF-8 string up to the end of the buffer |
//! | `z`             | NUL-terminated UTF-8 string              |
//! | `b`             | raw bytes up to the end of the buffer    |
//! | `s[N]` / `b[N]` | fixed width string / bytes               |
//!
//! [`Packable`] maps Rust values (integers, `bool`, `String`, `Vec<u8>`
//! and tuples of those) onto [`Value`] lists so register handlers stay
//! strongly typed.

use crate::error::CodecError;

/// A single decoded field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Any integer tag.
    Int(i64),
    /// `s`, `z` or `s[N]`.
    Text(String),
    /// `b` or `b[N]`.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns the integer, if this is an [`Value::Int`].
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string, if this is a [`Value::Text`].
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the bytes, if this is a [`Value::Bytes`].
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
    Rest,
    Fixed(usize),
    NulTerminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Int { bytes: usize, signed: bool },
    Text(Width),
    Bytes(Width),
}

impl Tag {
    fn parse(token: &str) -> Result<Self, CodecError> {
        let unknown = || CodecError::UnknownTag(token.to_string());
        let tag = match token {
            "u8" => Self::Int { bytes: 1, signed: false },
            "u16" => Self::Int { bytes: 2, signed: false },
            "u32" => Self::Int { bytes: 4, signed: false },
            "i8" => Self::Int { bytes: 1, signed: true },
            "i16" => Self::Int { bytes: 2, signed: true },
            "i32" => Self::Int { bytes: 4, signed: true },
            "s" => Self::Text(Width::Rest),
            "z" => Self::Text(Width::NulTerminated),
            "b" => Self::Bytes(Width::Rest),
            _ => {
                let (kind, rest) = token.split_at_checked(1).ok_or_else(unknown)?;
                let n = rest
                    .strip_prefix('[')
                    .and_then(|r| r.strip_suffix(']'))
                    .and_then(|n| n.parse::<usize>().ok())
                    .ok_or_else(unknown)?;
                match kind {
                    "s" => Self::Text(Width::Fixed(n)),
                    "b" => Self::Bytes(Width::Fixed(n)),
                    _ => return Err(unknown()),
                }
            }
        };
        Ok(tag)
    }

    fn int_range(bytes: usize, signed: bool) -> (i64, i64) {
        match (bytes, signed) {
            (1, false) => (0, i64::from(u8::MAX)),
            (2, false) => (0, i64::from(u16::MAX)),
            (1, true) => (i64::from(i8::MIN), i64::from(i8::MAX)),
            (2, true) => (i64::from(i16::MIN), i64::from(i16::MAX)),
            (_, true) => (i64::from(i32::MIN), i64::from(i32::MAX)),
            (_, false) => (0, i64::from(u32::MAX)),
        }
    }
}

fn parse_format(format: &str) -> Result<Vec<(Tag, &str)>, CodecError> {
    format
        .split_whitespace()
        .map(|token| Tag::parse(token).map(|tag| (tag, token)))
        .collect()
}

/// Encodes `values` according to `format`.
///
/// # Errors
///
/// Returns a [`CodecError`] if the format is invalid, the number of values
/// does not match, a value has the wrong kind or does not fit its tag.
pub fn pack(format: &str, values: &[Value]) -> Result<Vec<u8>, CodecError> {
    let tags = parse_format(format)?;
    if tags.len() != values.len() {
        return Err(CodecError::Arity {
            expected: tags.len(),
            actual: values.len(),
        });
    }

    let mut out = Vec::new();
    for ((tag, token), value) in tags.iter().zip(values) {
        match (tag, value) {
            (Tag::Int { bytes, signed }, Value::Int(v)) => {
                let (min, max) = Tag::int_range(*bytes, *signed);
                if *v < min || *v > max {
                    return Err(CodecError::OutOfRange {
                        tag: (*token).to_string(),
                        value: *v,
                    });
                }
                out.extend(v.to_le_bytes().iter().take(*bytes));
            }
            (Tag::Text(width), Value::Text(s)) => write_field(&mut out, s.as_bytes(), *width, token)?,
            (Tag::Bytes(width), Value::Bytes(b)) => write_field(&mut out, b, *width, token)?,
            _ => return Err(CodecError::Mismatch((*token).to_string())),
        }
    }
    Ok(out)
}

fn write_field(out: &mut Vec<u8>, data: &[u8], width: Width, token: &str) -> Result<(), CodecError> {
    match width {
        Width::Rest => out.extend_from_slice(data),
        Width::NulTerminated => {
            out.extend_from_slice(data);
            out.push(0);
        }
        Width::Fixed(n) => {
            if data.len() > n {
                return Err(CodecError::OutOfRange {
                    tag: token.to_string(),
                    value: i64::try_from(data.len()).unwrap_or(i64::MAX),
                });
            }
            out.extend_from_slice(data);
            out.resize(out.len() + (n - data.len()), 0);
        }
    }
    Ok(())
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize, token: &str) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n);
        let chunk = end
            .and_then(|end| self.data.get(self.pos..end))
            .ok_or_else(|| CodecError::Truncated {
                tag: token.to_string(),
            })?;
        self.pos += n;
        Ok(chunk)
    }

    fn rest(&mut self) -> &'a [u8] {
        let chunk = self.data.get(self.pos..).unwrap_or_default();
        self.pos = self.data.len();
        chunk
    }

    fn until_nul(&mut self) -> &'a [u8] {
        let rest = self.data.get(self.pos..).unwrap_or_default();
        match rest.iter().position(|b| *b == 0) {
            Some(end) => {
                self.pos += end + 1;
                rest.get(..end).unwrap_or_default()
            }
            None => self.rest(),
        }
    }

    fn field(&mut self, width: Width, token: &str) -> Result<&'a [u8], CodecError> {
        match width {
            Width::Rest => Ok(self.rest()),
            Width::NulTerminated => Ok(self.until_nul()),
            Width::Fixed(n) => self.take(n, token),
        }
    }
}

/// Decodes `data` according to `format`.
///
/// Trailing bytes beyond the last field are ignored.
///
/// # Errors
///
/// Returns a [`CodecError`] if the format is invalid, the payload is too
/// short or a string field is not valid UTF-8.
pub fn unpack(format: &str, data: &[u8]) -> Result<Vec<Value>, CodecError> {
    let tags = parse_format(format)?;
    let mut reader = Reader { data, pos: 0 };
    let mut values = Vec::with_capacity(tags.len());

    for (tag, token) in tags {
        let value = match tag {
            Tag::Int { bytes, signed } => {
                let raw = reader.take(bytes, token)?;
                let mut buf = [0u8; 8];
                for (dst, src) in buf.iter_mut().zip(raw) {
                    *dst = *src;
                }
                let mut v = i64::from_le_bytes(buf);
                let bits = bytes * 8;
                if signed && (v >> (bits - 1)) & 1 == 1 {
                    v -= 1i64 << bits;
                }
                Value::Int(v)
            }
            Tag::Text(width) => {
                let mut raw = reader.field(width, token)?;
                if let Width::Fixed(_) = width {
                    while let Some((0, head)) = raw.split_last() {
                        raw = head;
                    }
                }
                let text = std::str::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8)?;
                Value::Text(text.to_string())
            }
            Tag::Bytes(width) => Value::Bytes(reader.field(width, token)?.to_vec()),
        };
        values.push(value);
    }
    Ok(values)
}

/// Rust types that map onto one or more codec fields.
pub trait Packable: Sized {
    /// Appends this value's fields to `out`.
    fn write_values(&self, out: &mut Vec<Value>);

    /// Reads this value's fields from `values`.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] when fields are missing or of the wrong kind.
    fn read_values(values: &mut std::vec::IntoIter<Value>) -> Result<Self, CodecError>;
}

/// Encodes a [`Packable`] value with `format`.
///
/// # Errors
///
/// See [`pack`].
pub fn pack_as<T: Packable>(format: &str, value: &T) -> Result<Vec<u8>, CodecError> {
    let mut values = Vec::new();
    value.write_values(&mut values);
    pack(format, &values)
}

/// Decodes a [`Packable`] value with `format`.
///
/// # Errors
///
/// See [`unpack`]; also fails when the decoded fields do not fit `T`.
pub fn unpack_as<T: Packable>(format: &str, data: &[u8]) -> Result<T, CodecError> {
    let mut values = unpack(format, data)?.into_iter();
    T::read_values(&mut values)
}

fn next_value(values: &mut std::vec::IntoIter<Value>) -> Result<Value, CodecError> {
    values.next().ok_or(CodecError::Arity {
        expected: 1,
        actual: 0,
    })
}

macro_rules! packable_int {
    ($($ty:ty),*) => {$(
        impl Packable for $ty {
            fn write_values(&self, out: &mut Vec<Value>) {
                out.push(Value::Int(i64::from(*self)));
            }

            fn read_values(values: &mut std::vec::IntoIter<Value>) -> Result<Self, CodecError> {
                match next_value(values)? {
                    Value::Int(v) => <$ty>::try_from(v).map_err(|_| CodecError::OutOfRange {
                        tag: stringify!($ty).to_string(),
                        value: v,
                    }),
                    _ => Err(CodecError::Mismatch(stringify!($ty).to_string())),
                }
            }
        }
    )*};
}

packable_int!(u8, u16, u32, i8, i16, i32);

impl Packable for bool {
    fn write_values(&self, out: &mut Vec<Value>) {
        out.push(Value::Int(i64::from(*self)));
    }

    fn read_values(values: &mut std::vec::IntoIter<Value>) -> Result<Self, CodecError> {
        match next_value(values)? {
            Value::Int(v) => Ok(v != 0),
            _ => Err(CodecError::Mismatch("bool".to_string())),
        }
    }
}

impl Packable for String {
    fn write_values(&self, out: &mut Vec<Value>) {
        out.push(Value::Text(self.clone()));
    }

    fn read_values(values: &mut std::vec::IntoIter<Value>) -> Result<Self, CodecError> {
        match next_value(values)? {
            Value::Text(s) => Ok(s),
            _ => Err(CodecError::Mismatch("string".to_string())),
        }
    }
}

impl Packable for Vec<u8> {
    fn write_values(&self, out: &mut Vec<Value>) {
        out.push(Value::Bytes(self.clone()));
    }

    fn read_values(values: &mut std::vec::IntoIter<Value>) -> Result<Self, CodecError> {
        match next_value(values)? {
            Value::Bytes(b) => Ok(b),
            _ => Err(CodecError::Mismatch("bytes".to_string())),
        }
    }
}

macro_rules! packable_tuple {
    ($($name:ident),+) => {
        impl<$($name: Packable),+> Packable for ($($name,)+) {
            #[allow(non_snake_case)]
            fn write_values(&self, out: &mut Vec<Value>) {
                let ($($name,)+) = self;
                $($name.write_values(out);)+
            }

            fn read_values(values: &mut std::vec::IntoIter<Value>) -> Result<Self, CodecError> {
                Ok(($($name::read_values(values)?,)+))
            }
        }
    };
}

packable_tuple!(A, B);
packable_tuple!(A, B, C);
packable_tuple!(A, B, C, D);
