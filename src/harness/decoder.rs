//! Fuzz input decoder over `arbitrary::Unstructured`.
//!
//! The byte stream is consumed front to back and never rewound. Every failure
//! here is "discard the iteration", never a finding.

use std::collections::BTreeMap;

use arbitrary::{Arbitrary, Unstructured};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("fuzz input exhausted")]
    Exhausted,
    #[error("fuzz input cannot populate this structure")]
    Unsupported,
}

impl From<arbitrary::Error> for DecodeError {
    fn from(e: arbitrary::Error) -> Self {
        match e {
            arbitrary::Error::NotEnoughData => DecodeError::Exhausted,
            _ => DecodeError::Unsupported,
        }
    }
}

#[derive(Debug)]
pub struct Decoder<'a> {
    u: Unstructured<'a>,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Decoder { u: Unstructured::new(data) }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.u.len()
    }

    /// Consumes exactly one byte.
    pub fn next_int(&mut self) -> Result<usize, DecodeError> {
        match self.u.bytes(1) {
            Ok([b]) => Ok(usize::from(*b)),
            _ => Err(DecodeError::Exhausted),
        }
    }

    /// Fills a `T` from the remaining bytes. Fails up front on an empty
    /// remainder so a fully consumed stream never yields zero values.
    pub fn populate<T: Arbitrary<'a>>(&mut self) -> Result<T, DecodeError> {
        if self.u.is_empty() {
            return Err(DecodeError::Exhausted);
        }
        Ok(T::arbitrary(&mut self.u)?)
    }

    pub fn populate_map<K, V>(&mut self) -> Result<BTreeMap<K, V>, DecodeError>
    where
        K: Arbitrary<'a> + Ord,
        V: Arbitrary<'a>,
    {
        self.populate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_int_consumes_one_byte() {
        let mut d = Decoder::new(&[7, 200]);
        assert_eq!(d.next_int(), Ok(7));
        assert_eq!(d.remaining(), 1);
        assert_eq!(d.next_int(), Ok(200));
        assert_eq!(d.next_int(), Err(DecodeError::Exhausted));
    }

    #[test]
    fn populate_on_empty_remainder_is_exhausted() {
        let mut d = Decoder::new(&[]);
        assert_eq!(d.populate::<u32>(), Err(DecodeError::Exhausted));
        assert_eq!(d.populate_map::<u8, u8>(), Err(DecodeError::Exhausted));
    }

    #[test]
    fn populate_is_deterministic() {
        let data = [3u8, 1, 4, 1, 5, 9, 2, 6, 5, 3, 5];
        let a: (u16, Vec<u8>) = Decoder::new(&data).populate().unwrap();
        let b: (u16, Vec<u8>) = Decoder::new(&data).populate().unwrap();
        assert_eq!(a, b);
    }
}
