//! Binary weights blob.
//!
//! Layout (little endian): magic `DKT1`, `u32` num_skills, `u32` hidden_size,
//! `f64` dropout, then five tensors (`w_ih`, `w_hh`, `bias`, `out_w`, `out_b`),
//! each as a `u64` element count followed by that many `f64` values. Values are
//! stored bit-for-bit, so a decoded model reproduces the encoded one exactly.

use thiserror::Error;

use crate::lstm::LstmLayer;
use crate::matrix::Matrix;
use crate::model::DktModel;
use crate::types::DktConfig;

const MAGIC: &[u8; 4] = b"DKT1";
const TENSOR_NAMES: [&str; 5] = ["w_ih", "w_hh", "bias", "out_w", "out_b"];

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CodecError {
    #[error("not a DKT weights blob")]
    BadMagic,
    #[error("weights blob truncated at byte {0}")]
    Truncated(usize),
    #[error("tensor {tensor}: expected {expected} values, found {actual}")]
    ShapeMismatch {
        tensor: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{0} trailing bytes after the last tensor")]
    TrailingBytes(usize),
    #[error("header dimensions overflow: {num_skills} skills, hidden size {hidden_size}")]
    Oversized { num_skills: usize, hidden_size: usize },
}

impl DktModel {
    pub fn to_bytes(&self) -> Vec<u8> {
        let tensors = [
            &self.lstm.w_ih.data,
            &self.lstm.w_hh.data,
            &self.lstm.bias,
            &self.out_w.data,
            &self.out_b,
        ];
        let payload: usize = tensors.iter().map(|t| 8 + t.len() * 8).sum();
        let mut out = Vec::with_capacity(4 + 4 + 4 + 8 + payload);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&(self.config.num_skills as u32).to_le_bytes());
        out.extend_from_slice(&(self.config.hidden_size as u32).to_le_bytes());
        out.extend_from_slice(&self.config.dropout.to_le_bytes());
        for t in tensors {
            out.extend_from_slice(&(t.len() as u64).to_le_bytes());
            for v in t.iter() {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = Reader { bytes, pos: 0 };
        if reader.take(4)? != MAGIC {
            return Err(CodecError::BadMagic);
        }
        let num_skills = reader.u32()? as usize;
        let hidden_size = reader.u32()? as usize;
        let dropout = reader.f64()?;
        let config = DktConfig {
            num_skills,
            hidden_size,
            dropout,
        };

        let oversized = CodecError::Oversized {
            num_skills,
            hidden_size,
        };
        let input = num_skills.checked_mul(2).ok_or(oversized.clone())?;
        let gates = hidden_size.checked_mul(4).ok_or(oversized.clone())?;
        let expected = [
            gates.checked_mul(input),
            gates.checked_mul(hidden_size),
            Some(gates),
            num_skills.checked_mul(hidden_size),
            Some(num_skills),
        ];

        let mut tensors: Vec<Vec<f64>> = Vec::with_capacity(5);
        for (name, want) in TENSOR_NAMES.iter().zip(expected) {
            let want = want.ok_or(oversized.clone())?;
            let at = reader.pos;
            let len = usize::try_from(reader.u64()?).map_err(|_| CodecError::Truncated(at))?;
            if len != want {
                return Err(CodecError::ShapeMismatch {
                    tensor: name,
                    expected: want,
                    actual: len,
                });
            }
            // every value needs 8 bytes; check before allocating
            if len.checked_mul(8).map_or(true, |n| n > reader.remaining()) {
                return Err(CodecError::Truncated(reader.pos));
            }
            let mut values = Vec::with_capacity(len);
            for _ in 0..len {
                values.push(reader.f64()?);
            }
            tensors.push(values);
        }
        if reader.remaining() > 0 {
            return Err(CodecError::TrailingBytes(reader.remaining()));
        }

        let mut it = tensors.into_iter();
        let mut next = || it.next().unwrap_or_default();
        let lstm = LstmLayer {
            input_size: input,
            hidden_size,
            w_ih: Matrix {
                rows: gates,
                cols: input,
                data: next(),
            },
            w_hh: Matrix {
                rows: gates,
                cols: hidden_size,
                data: next(),
            },
            bias: next(),
        };
        let out_w = Matrix {
            rows: num_skills,
            cols: hidden_size,
            data: next(),
        };
        let out_b = next();

        Ok(DktModel::from_parts(config, lstm, out_w, out_b))
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).ok_or(CodecError::Truncated(self.pos))?;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(CodecError::Truncated(self.pos))?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Interaction;

    fn model() -> DktModel {
        DktModel::new(
            DktConfig {
                num_skills: 4,
                hidden_size: 6,
                dropout: 0.1,
            },
            21,
        )
    }

    #[test]
    fn decoded_model_predicts_bit_identically() {
        let original = model();
        let restored = DktModel::from_bytes(&original.to_bytes()).unwrap();
        assert_eq!(original, restored);

        let seq = [
            Interaction::new(3, true),
            Interaction::new(1, false),
            Interaction::new(0, true),
        ];
        let a = original.predict(&seq);
        let b = restored.predict(&seq);
        for (ra, rb) in a.iter().zip(&b) {
            for (x, y) in ra.iter().zip(rb) {
                assert_eq!(x.to_bits(), y.to_bits());
            }
        }
    }

    #[test]
    fn rejects_corrupt_blobs() {
        let bytes = model().to_bytes();
        assert_eq!(DktModel::from_bytes(b"NOPE").unwrap_err(), CodecError::BadMagic);
        assert!(matches!(
            DktModel::from_bytes(&bytes[..bytes.len() - 3]),
            Err(CodecError::Truncated(_))
        ));
        let mut extended = bytes.clone();
        extended.push(0);
        assert_eq!(
            DktModel::from_bytes(&extended).unwrap_err(),
            CodecError::TrailingBytes(1)
        );
    }

    fn header(num_skills: u32, hidden_size: u32) -> Vec<u8> {
        let mut out = MAGIC.to_vec();
        out.extend_from_slice(&num_skills.to_le_bytes());
        out.extend_from_slice(&hidden_size.to_le_bytes());
        out.extend_from_slice(&0.2f64.to_le_bytes());
        out
    }

    #[test]
    fn huge_header_dimensions_fail_without_allocating() {
        let err = DktModel::from_bytes(&header(u32::MAX, u32::MAX)).unwrap_err();
        assert!(matches!(err, CodecError::Oversized { .. }));

        // declared w_ih length matches the header but the values are missing
        let mut bytes = header(1_000, 1_000);
        bytes.extend_from_slice(&(4_000u64 * 2_000).to_le_bytes());
        assert_eq!(
            DktModel::from_bytes(&bytes).unwrap_err(),
            CodecError::Truncated(bytes.len())
        );
    }
}
