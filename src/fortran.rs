//! Fortran sequential unformatted files: every record is framed by its
//! byte length as a little-endian `i32`, before and after the payload.
use num_complex::Complex64;
use std::io::{Read, Write};

use crate::error::{Result, TbError};

pub struct FortranReader<R: Read> {
    reader: R,
    name: String,
    nrecord: usize,
}

impl<R: Read> FortranReader<R> {
    pub fn new(reader: R, name: &str) -> Self {
        FortranReader {
            reader,
            name: name.to_string(),
            nrecord: 0,
        }
    }

    fn error(&self, message: String) -> TbError {
        TbError::FileParse {
            file: self.name.clone(),
            message: format!("record {}: {}", self.nrecord, message),
        }
    }

    fn read_marker(&mut self) -> Result<usize> {
        let mut bytes = [0u8; 4];
        self.reader.read_exact(&mut bytes).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                self.error("unexpected end of file".to_string())
            } else {
                TbError::Io(e)
            }
        })?;
        let n = i32::from_le_bytes(bytes);
        usize::try_from(n).map_err(|_| self.error(format!("negative record length {}", n)))
    }

    /// The raw payload of the next record.
    pub fn read_record(&mut self) -> Result<Vec<u8>> {
        let head = self.read_marker()?;
        let mut payload = vec![0u8; head];
        self.reader.read_exact(&mut payload).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                self.error(format!("record of {} bytes is truncated", head))
            } else {
                TbError::Io(e)
            }
        })?;
        let tail = self.read_marker()?;
        if head != tail {
            return Err(self.error(format!("record markers differ: {} != {}", head, tail)));
        }
        self.nrecord += 1;
        Ok(payload)
    }

    fn read_chunks<const N: usize>(&mut self) -> Result<Vec<[u8; N]>> {
        let payload = self.read_record()?;
        if payload.len() % N != 0 {
            return Err(self.error(format!(
                "record of {} bytes is not a multiple of {}",
                payload.len(),
                N
            )));
        }
        Ok(payload
            .chunks_exact(N)
            .map(|c| {
                let mut bytes = [0u8; N];
                bytes.copy_from_slice(c);
                bytes
            })
            .collect())
    }

    pub fn read_i32s(&mut self) -> Result<Vec<i32>> {
        Ok(self.read_chunks::<4>()?.into_iter().map(i32::from_le_bytes).collect())
    }

    pub fn read_f64s(&mut self) -> Result<Vec<f64>> {
        Ok(self.read_chunks::<8>()?.into_iter().map(f64::from_le_bytes).collect())
    }

    /// Complex numbers stored as interleaved `(re, im)` pairs of `f64`.
    pub fn read_complex(&mut self) -> Result<Vec<Complex64>> {
        let values = self.read_f64s()?;
        if values.len() % 2 != 0 {
            return Err(self.error("odd number of reals in a complex record".to_string()));
        }
        Ok(values.chunks_exact(2).map(|c| Complex64::new(c[0], c[1])).collect())
    }

    pub fn read_string(&mut self) -> Result<String> {
        let payload = self.read_record()?;
        Ok(String::from_utf8_lossy(&payload).trim().to_string())
    }

    /// A record that must hold exactly `n` integers.
    pub fn read_i32s_exact(&mut self, n: usize) -> Result<Vec<i32>> {
        let v = self.read_i32s()?;
        if v.len() != n {
            return Err(self.error(format!("expected {} integers, found {}", n, v.len())));
        }
        Ok(v)
    }

    pub fn read_f64s_exact(&mut self, n: usize) -> Result<Vec<f64>> {
        let v = self.read_f64s()?;
        if v.len() != n {
            return Err(self.error(format!("expected {} reals, found {}", n, v.len())));
        }
        Ok(v)
    }

    pub fn read_complex_exact(&mut self, n: usize) -> Result<Vec<Complex64>> {
        let v = self.read_complex()?;
        if v.len() != n {
            return Err(self.error(format!("expected {} complex numbers, found {}", n, v.len())));
        }
        Ok(v)
    }

    pub fn read_usize(&mut self) -> Result<usize> {
        let n = self.read_i32s_exact(1)?[0];
        usize::try_from(n).map_err(|_| self.error(format!("expected a non-negative integer, found {}", n)))
    }
}

/// Writes records in the same framing, for producing test inputs and
/// converted files.
pub struct FortranWriter<W: Write> {
    writer: W,
}

impl<W: Write> FortranWriter<W> {
    pub fn new(writer: W) -> Self {
        FortranWriter { writer }
    }

    pub fn write_record(&mut self, payload: &[u8]) -> Result<()> {
        let n = i32::try_from(payload.len())
            .map_err(|_| TbError::InvalidOption(format!("record of {} bytes is too long", payload.len())))?;
        self.writer.write_all(&n.to_le_bytes())?;
        self.writer.write_all(payload)?;
        self.writer.write_all(&n.to_le_bytes())?;
        Ok(())
    }

    pub fn write_i32s(&mut self, values: &[i32]) -> Result<()> {
        let payload: Vec<u8> = values.iter().flat_map(|x| x.to_le_bytes()).collect();
        self.write_record(&payload)
    }

    pub fn write_f64s(&mut self, values: &[f64]) -> Result<()> {
        let payload: Vec<u8> = values.iter().flat_map(|x| x.to_le_bytes()).collect();
        self.write_record(&payload)
    }

    pub fn write_complex(&mut self, values: &[Complex64]) -> Result<()> {
        let payload: Vec<u8> = values
            .iter()
            .flat_map(|x| x.re.to_le_bytes().into_iter().chain(x.im.to_le_bytes()))
            .collect();
        self.write_record(&payload)
    }

    /// Fixed-width, blank padded, like a Fortran `character(len=width)`.
    pub fn write_string(&mut self, s: &str, width: usize) -> Result<()> {
        let mut payload = s.as_bytes().to_vec();
        payload.resize(width.max(payload.len()), b' ');
        self.write_record(&payload)
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn records_round_trip() {
        let mut w = FortranWriter::new(Vec::new());
        w.write_string("header", 33).unwrap();
        w.write_i32s(&[3, -1, 7]).unwrap();
        w.write_f64s(&[0.5, -2.25]).unwrap();
        w.write_complex(&[Complex64::new(1.0, -1.0)]).unwrap();
        let bytes = w.into_inner();
        assert_eq!(&bytes[..4], &33i32.to_le_bytes());

        let mut r = FortranReader::new(Cursor::new(bytes), "test");
        assert_eq!(r.read_string().unwrap(), "header");
        assert_eq!(r.read_i32s().unwrap(), vec![3, -1, 7]);
        assert_eq!(r.read_f64s_exact(2).unwrap(), vec![0.5, -2.25]);
        assert_eq!(r.read_complex().unwrap(), vec![Complex64::new(1.0, -1.0)]);
        assert!(matches!(r.read_i32s(), Err(TbError::FileParse { .. })));
    }

    #[test]
    fn broken_records() {
        let mut bytes = Vec::new();
        bytes.extend(8i32.to_le_bytes());
        bytes.extend(1.0f64.to_le_bytes());
        bytes.extend(4i32.to_le_bytes());
        let mut r = FortranReader::new(Cursor::new(bytes), "test");
        assert!(matches!(r.read_f64s(), Err(TbError::FileParse { .. })));

        let mut w = FortranWriter::new(Vec::new());
        w.write_i32s(&[1, 2]).unwrap();
        let mut r = FortranReader::new(Cursor::new(w.into_inner()), "test");
        assert!(r.read_i32s_exact(3).is_err());

        let mut w = FortranWriter::new(Vec::new());
        w.write_i32s(&[-4]).unwrap();
        let mut r = FortranReader::new(Cursor::new(w.into_inner()), "test");
        assert!(r.read_usize().is_err());
    }
}
