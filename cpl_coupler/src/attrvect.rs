//! Attribute vectors: dense per-field columns over the local points.

use cpl_common::field_code::FieldCode;

/// `nfields × lsize` values addressed by field code.
///
/// Column `f` holds field `f` at every local position of the segment map.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrVect {
    codes: Vec<FieldCode>,
    lsize: usize,
    data: Vec<f64>,
}

impl AttrVect {
    /// Zeroed vector for `codes` over `lsize` points.
    pub fn new(codes: Vec<FieldCode>, lsize: usize) -> Self {
        let data = vec![0.0; codes.len() * lsize];
        Self { codes, lsize, data }
    }

    /// Number of fields.
    #[inline]
    pub fn nfields(&self) -> usize {
        self.codes.len()
    }

    /// Number of local points.
    #[inline]
    pub fn lsize(&self) -> usize {
        self.lsize
    }

    /// Field codes in column order.
    pub fn codes(&self) -> &[FieldCode] {
        &self.codes
    }

    /// Column index of `code`.
    pub fn index_of(&self, code: &FieldCode) -> Option<usize> {
        self.codes.iter().position(|c| c == code)
    }

    /// Column of field number `field`.
    #[inline]
    pub fn column(&self, field: usize) -> &[f64] {
        &self.data[field * self.lsize..(field + 1) * self.lsize]
    }

    /// Mutable column of field number `field`.
    #[inline]
    pub fn column_mut(&mut self, field: usize) -> &mut [f64] {
        &mut self.data[field * self.lsize..(field + 1) * self.lsize]
    }

    /// Column of `code`.
    pub fn column_by_code(&self, code: &FieldCode) -> Option<&[f64]> {
        self.index_of(code).map(|f| self.column(f))
    }

    /// Set every value to zero.
    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }

    /// Fingerprint of the field list (codes and order).
    ///
    /// Both sides of a pairing compare fingerprints before trusting a
    /// message's layout.
    pub fn fingerprint(&self) -> u32 {
        codes_fingerprint(&self.codes)
    }
}

/// Order-sensitive hash of a code list.
pub fn codes_fingerprint(codes: &[FieldCode]) -> u32 {
    codes.iter().fold(codes.len() as u32, |hash, code| {
        let code_hash = code
            .as_str()
            .bytes()
            .fold(0x811C_9DC5_u32, |h, b| (h ^ u32::from(b)).wrapping_mul(0x0100_0193));
        hash.rotate_left(5).wrapping_mul(0x9E37_79B9) ^ code_hash
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(list: &[&str]) -> Vec<FieldCode> {
        list.iter().map(|c| FieldCode::new(c).unwrap()).collect()
    }

    #[test]
    fn columns_are_addressed_by_code() {
        let mut av = AttrVect::new(codes(&["SST", "SSS"]), 3);
        assert_eq!(av.nfields(), 2);
        assert!(av.column(1).iter().all(|&v| v == 0.0));
        av.column_mut(1).copy_from_slice(&[1.0, 2.0, 3.0]);
        let sss = FieldCode::new("SSS").unwrap();
        assert_eq!(av.column_by_code(&sss), Some(&[1.0, 2.0, 3.0][..]));
        av.zero();
        assert_eq!(av.column(1), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn fingerprint_depends_on_order() {
        let a = codes_fingerprint(&codes(&["SST", "SSS"]));
        let b = codes_fingerprint(&codes(&["SSS", "SST"]));
        assert_ne!(a, b);
        assert_eq!(a, codes_fingerprint(&codes(&["SST", "SSS"])));
        assert_ne!(codes_fingerprint(&[]), codes_fingerprint(&codes(&["A"])));
    }
}
