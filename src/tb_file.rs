//! The plain-text `_tb.dat` format.
//!
//! ```text
//! comment
//! a1x a1y a1z            (%.18e)
//! a2x a2y a2z
//! a3x a3y a3z
//! num_wann
//! nRvec
//! Ndegen ... (15 per line)
//!
//!   R1  R2  R3
//!   m   n  Re(H) Im(H)   (num_wann² lines, m fastest, times Ndegen)
//! ...
//! ```
//! followed, when the position operator is present, by the same blocks
//! with three `Re Im` pairs per line.
use log::info;
use ndarray::prelude::*;
use num_complex::Complex64;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::consts::TB_DEGENERACY_LINE;
use crate::error::{Result, TbError};
use crate::io::{collect_lines, fmt_e, fmt_e_width, open_file, parse_first, parse_tokens};
use crate::lattice::LatticeVectors;
use crate::system::{OperatorKind, System, SystemBuilder};

const FILE: &str = "_tb.dat";

impl System {
    pub fn write_tb<W: Write>(&self, w: &mut W) -> Result<()> {
        let nw = self.num_wann();
        let ndegen = self.Ndegen();
        writeln!(w, "written by wannier_tb from the chk file")?;
        for row in self.real_lattice().outer_iter() {
            let line: Vec<String> = row.iter().map(|x| fmt_e(*x, 18)).collect();
            writeln!(w, "{}", line.join(" "))?;
        }
        writeln!(w, "{}", nw)?;
        writeln!(w, "{}", self.nRvec())?;
        let degen = ndegen.to_vec();
        for chunk in degen.chunks(TB_DEGENERACY_LINE) {
            let line: Vec<String> = chunk.iter().map(|d| format!("{:2}", d)).collect();
            writeln!(w, "{}", line.join("  "))?;
        }
        let hh = &self.operators.HH_R;
        for (ir, r) in self.iRvec().outer_iter().enumerate() {
            write!(w, "\n  {:3}  {:3}  {:3}\n", r[0], r[1], r[2])?;
            let d = ndegen[ir] as f64;
            for n in 0..nw {
                for m in 0..nw {
                    let h = hh[[m, n, ir]] * d;
                    writeln!(w, "{:3} {:3} {} {}", m + 1, n + 1, fmt_e_width(h.re, 15, 8), fmt_e_width(h.im, 15, 8))?;
                }
            }
        }
        if let Some(aa) = &self.operators.AA_R {
            for (ir, r) in self.iRvec().outer_iter().enumerate() {
                write!(w, "\n  {:3}  {:3}  {:3}\n", r[0], r[1], r[2])?;
                let d = ndegen[ir] as f64;
                for n in 0..nw {
                    for m in 0..nw {
                        let values: Vec<String> = (0..3)
                            .map(|a| {
                                let x = aa[[m, n, ir, a]] * d;
                                format!("{} {}", fmt_e_width(x.re, 15, 8), fmt_e_width(x.im, 15, 8))
                            })
                            .collect();
                        writeln!(w, "{:3} {:3} {}", m + 1, n + 1, values.join(" "))?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn write_tb_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!("writing TB file {}", path.display());
        let mut w = BufWriter::new(File::create(path)?);
        self.write_tb(&mut w)?;
        w.flush()?;
        Ok(())
    }

    /// Read a model written by [`System::write_tb`] (or by wannier90 with
    /// `write_tb = true`). The matrix elements are divided by Ndegen again.
    #[allow(non_snake_case)]
    pub fn from_tb<R: BufRead>(reader: R) -> Result<System> {
        let reads = collect_lines(reader)?;
        let mut lines = TbLines { iter: reads.iter() };
        lines.next_nonblank("the comment line")?;
        let mut real = Array2::<f64>::zeros((3, 3));
        for i in 0..3 {
            let row: Vec<f64> = parse_first(lines.next_nonblank("the lattice")?, 3, FILE)?;
            real.row_mut(i).assign(&Array1::from(row));
        }
        let num_wann = parse_first::<usize>(lines.next_nonblank("num_wann")?, 1, FILE)?[0];
        let nRvec = parse_first::<usize>(lines.next_nonblank("nRvec")?, 1, FILE)?[0];
        let mut ndegen = Vec::with_capacity(nRvec);
        while ndegen.len() < nRvec {
            ndegen.extend(parse_tokens::<usize>(lines.next_nonblank("the degeneracies")?, FILE)?);
        }
        if ndegen.len() != nRvec {
            return Err(TbError::DimensionMismatch {
                context: "degeneracies of the _tb.dat file".to_string(),
                expected: nRvec,
                found: ndegen.len(),
            });
        }

        let mut iRvec = Array2::<isize>::zeros((nRvec, 3));
        let mut hh = Array3::<Complex64>::zeros((num_wann, num_wann, nRvec));
        for ir in 0..nRvec {
            let r: Vec<isize> = parse_first(lines.next_nonblank("an R-vector")?, 3, FILE)?;
            iRvec.row_mut(ir).assign(&Array1::from(r));
            let d = ndegen[ir] as f64;
            for _ in 0..num_wann * num_wann {
                let (m, n, values) = matrix_line(lines.next_nonblank("the Hamiltonian")?, 2, num_wann)?;
                hh[[m, n, ir]] = Complex64::new(values[0], values[1]) / d;
            }
        }

        let mut aa: Option<Array4<Complex64>> = None;
        if let Ok(first) = lines.next_nonblank("the position operator") {
            let mut block = Array4::<Complex64>::zeros((num_wann, num_wann, nRvec, 3));
            let mut header = first;
            for ir in 0..nRvec {
                if ir > 0 {
                    header = lines.next_nonblank("an R-vector")?;
                }
                let r: Vec<isize> = parse_first(header, 3, FILE)?;
                if r.as_slice() != iRvec.row(ir).to_vec().as_slice() {
                    return Err(TbError::FileParse {
                        file: FILE.to_string(),
                        message: format!("R-vector {:?} of the position block does not match the Hamiltonian", r),
                    });
                }
                let d = ndegen[ir] as f64;
                for _ in 0..num_wann * num_wann {
                    let (m, n, values) = matrix_line(lines.next_nonblank("the position operator")?, 6, num_wann)?;
                    for a in 0..3 {
                        block[[m, n, ir, a]] = Complex64::new(values[2 * a], values[2 * a + 1]) / d;
                    }
                }
            }
            aa = Some(block);
        }

        let lattice = LatticeVectors::from_real(real)?;
        let mut builder = SystemBuilder::new()
            .set_lattice(lattice, iRvec, Array1::from(ndegen))?
            .load_operator(OperatorKind::HH, hh.into_dyn())?;
        if let Some(aa) = aa {
            builder = builder.load_operator(OperatorKind::AA, aa.into_dyn())?;
        }
        builder.finalize()
    }

    pub fn from_tb_file<P: AsRef<Path>>(path: P) -> Result<System> {
        let path = path.as_ref();
        info!("reading TB file {}", path.display());
        System::from_tb(BufReader::new(open_file(path)?))
    }
}

struct TbLines<'a> {
    iter: std::slice::Iter<'a, String>,
}

impl<'a> TbLines<'a> {
    // 跳过空行
    fn next_nonblank(&mut self, what: &str) -> Result<&'a str> {
        for line in self.iter.by_ref() {
            if !line.trim().is_empty() {
                return Ok(line.as_str());
            }
        }
        Err(TbError::FileParse {
            file: FILE.to_string(),
            message: format!("unexpected end of file while reading {}", what),
        })
    }
}

/// `m n v1 v2 ...` with 1-based orbitals.
fn matrix_line(line: &str, nvalues: usize, num_wann: usize) -> Result<(usize, usize, Vec<f64>)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 2 + nvalues {
        return Err(TbError::FileParse {
            file: FILE.to_string(),
            message: format!("expected {} values in line '{}'", 2 + nvalues, line.trim()),
        });
    }
    let mn: Vec<usize> = parse_tokens(&tokens[..2].join(" "), FILE)?;
    if mn[0] == 0 || mn[1] == 0 || mn[0] > num_wann || mn[1] > num_wann {
        return Err(TbError::FileParse {
            file: FILE.to_string(),
            message: format!("orbital index out of range in line '{}'", line.trim()),
        });
    }
    let values: Vec<f64> = parse_tokens(&tokens[2..2 + nvalues].join(" "), FILE)?;
    Ok((mn[0] - 1, mn[1] - 1, values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, IxDyn};
    use ndarray::ArrayD;
    use std::io::Cursor;

    fn model(with_aa: bool) -> System {
        let lattice = LatticeVectors::from_real(array![
            [1.0, 0.0, 0.0],
            [-0.5, 3_f64.sqrt() / 2.0, 0.0],
            [0.0, 0.0, 4.0]
        ])
        .unwrap();
        let nr = 17;
        let irvec = Array2::from_shape_fn((nr, 3), |(i, a)| if a == 0 { i as isize - 8 } else { (i % 3) as isize - 1 });
        let ndegen = Array1::from_shape_fn(nr, |i| 1 + i % 3);
        let mut n: f64 = 0.0;
        let hh = ArrayD::from_shape_simple_fn(IxDyn(&[2, 2, nr]), || {
            n += 1.0;
            Complex64::new((0.3 * n).sin(), -(0.7 * n).cos())
        });
        let mut builder = SystemBuilder::new()
            .set_lattice(lattice, irvec, ndegen)
            .unwrap()
            .load_operator(OperatorKind::HH, hh)
            .unwrap();
        if with_aa {
            let aa = ArrayD::from_shape_fn(IxDyn(&[2, 2, nr, 3]), |ix| {
                Complex64::new(0.1 * ix[3] as f64 - 0.05 * ix[2] as f64, 0.01 * (ix[0] + 2 * ix[1]) as f64)
            });
            builder = builder.load_operator(OperatorKind::AA, aa).unwrap();
        }
        builder.finalize().unwrap()
    }

    #[test]
    fn header_layout() {
        let system = model(false);
        let mut buf = Vec::new();
        system.write_tb(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "1.000000000000000000e+00 0.000000000000000000e+00 0.000000000000000000e+00");
        assert_eq!(lines[4], "2");
        assert_eq!(lines[5], "17");
        assert_eq!(lines[6], " 1   2   3   1   2   3   1   2   3   1   2   3   1   2   3");
        assert_eq!(lines[7], " 1   2");
        assert_eq!(lines[8], "");
        assert_eq!(lines[9], "   -8   -1   -1");
        assert!(lines[10].starts_with("  1   1 "));
        assert_eq!(lines[10].len(), 3 + 1 + 3 + 1 + 15 + 1 + 15);
        assert!(lines[11].starts_with("  2   1 "));
    }

    #[test]
    fn round_trip() {
        for with_aa in [false, true] {
            let system = model(with_aa);
            let mut buf = Vec::new();
            system.write_tb(&mut buf).unwrap();
            let back = System::from_tb(Cursor::new(buf)).unwrap();
            assert_eq!(back.iRvec(), system.iRvec());
            assert_eq!(back.Ndegen(), system.Ndegen());
            for (a, b) in back.real_lattice().iter().zip(system.real_lattice().iter()) {
                assert!((a - b).abs() < 1e-15);
            }
            for (a, b) in back.operators.HH_R.iter().zip(system.operators.HH_R.iter()) {
                assert!((a - b).norm() < 1e-8);
            }
            assert_eq!(back.has(OperatorKind::AA), with_aa);
            if let (Some(a), Some(b)) = (&back.operators.AA_R, &system.operators.AA_R) {
                for (x, y) in a.iter().zip(b.iter()) {
                    assert!((x - y).norm() < 1e-8);
                }
            }
        }
    }

    #[test]
    fn truncated_file() {
        let system = model(false);
        let mut buf = Vec::new();
        system.write_tb(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let cut: String = text.lines().take(30).collect::<Vec<_>>().join("\n");
        assert!(matches!(System::from_tb(Cursor::new(cut)), Err(TbError::FileParse { .. })));
    }
}
