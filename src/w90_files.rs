//! Readers for the wannier90 / pw2wannier90 data files.
//!
//! | file              | content                                          |
//! |-------------------|--------------------------------------------------|
//! | `.chk`            | lattice, k-mesh, gauge matrices, Wannier centres |
//! | `.eig`            | band energies                                    |
//! | `.mmn`            | overlaps $\braket{u_{m\bm k}\|u_{n\bm k+\bm b}}$ |
//! | `.spn`            | spin matrices                                    |
//! | `.uHu`, `.uIu`    | $\braket{u_{m\bm k+\bm b_1}\|H\|u_{n\bm k+\bm b_2}}$ |
//! | `.sHu`, `.sIu`    | $\braket{u_{m\bm k}\|\sigma H\|u_{n\bm k+\bm b}}$ |
use log::{debug, info};
use ndarray::prelude::*;
use ndarray_linalg::SVD;
use num_complex::Complex64;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::consts::{BVECTOR_COMPLETENESS_TOLERANCE, SHELL_LENGTH_TOLERANCE, SPN_DIAGONAL_TOLERANCE, SVD_CUTOFF};
use crate::error::{Result, TbError};
use crate::fortran::FortranReader;
use crate::fourier::kpt_mp_grid_from_latt;
use crate::gauge::GaugeRotation;
use crate::io::{collect_lines, open_file, parse_first};
use crate::lattice::LatticeVectors;

fn parse_error(file: &str, message: String) -> TbError {
    TbError::FileParse {
        file: file.to_string(),
        message,
    }
}

/// Text cursor used by the formatted readers.
struct TextRecords<'a> {
    lines: std::slice::Iter<'a, String>,
    file: &'a str,
}

impl<'a> TextRecords<'a> {
    fn next_line(&mut self) -> Result<&'a str> {
        self.lines
            .next()
            .map(|s| s.as_str())
            .ok_or_else(|| parse_error(self.file, "unexpected end of file".to_string()))
    }

    /// `n` lines of `re im`.
    fn complex(&mut self, n: usize) -> Result<Vec<Complex64>> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let v: Vec<f64> = parse_first(self.next_line()?, 2, self.file)?;
            out.push(Complex64::new(v[0], v[1]));
        }
        Ok(out)
    }
}

fn to_usize(file: &str, what: &str, x: i32) -> Result<usize> {
    usize::try_from(x).map_err(|_| parse_error(file, format!("negative {}: {}", what, x)))
}

// ---------------------------------------------------------------------------
// .chk
// ---------------------------------------------------------------------------

/// Contents of the binary wannier90 checkpoint.
#[derive(Debug, Clone)]
pub struct CheckPoint {
    pub comment: String,
    pub num_bands: usize,
    pub exclude_bands: Vec<i32>,
    pub lattice: LatticeVectors,
    pub num_kpts: usize,
    pub mp_grid: [usize; 3],
    /// k-points in reduced coordinates, one per row.
    pub kpt_latt: Array2<f64>,
    pub nntot: usize,
    pub num_wann: usize,
    pub checkpoint: String,
    pub have_disentangled: bool,
    pub omega_invariant: Option<f64>,
    /// `(num_kpts, nntot, num_wann, num_wann)`
    pub m_matrix: Array4<Complex64>,
    /// Cartesian, one per row.
    pub wannier_centres: Array2<f64>,
    pub wannier_spreads: Array1<f64>,
    pub gauge: GaugeRotation,
}

impl CheckPoint {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Reading restart information from file {}", path.display());
        let reader = BufReader::new(open_file(path)?);
        CheckPoint::from_reader(reader, &path.display().to_string())
    }

    pub fn from_reader<R: Read>(reader: R, name: &str) -> Result<Self> {
        let mut f = FortranReader::new(reader, name);
        let comment = f.read_string()?;
        let num_bands = f.read_usize()?;
        let num_exclude_bands = f.read_usize()?;
        let exclude_bands = f.read_i32s_exact(num_exclude_bands)?;
        // stored column by column
        let real = Array2::from_shape_vec((3, 3).f(), f.read_f64s_exact(9)?)?.as_standard_layout().into_owned();
        let recip = Array2::from_shape_vec((3, 3).f(), f.read_f64s_exact(9)?)?.as_standard_layout().into_owned();
        let lattice = LatticeVectors::new(real, recip)?;
        let num_kpts = f.read_usize()?;
        let mp: Vec<usize> = f
            .read_i32s_exact(3)?
            .into_iter()
            .map(|x| to_usize(name, "mp_grid", x))
            .collect::<Result<_>>()?;
        let mp_grid = [mp[0], mp[1], mp[2]];
        if num_kpts != mp_grid.iter().product::<usize>() {
            return Err(TbError::DimensionMismatch {
                context: format!("k-points of the {:?} mesh in {}", mp_grid, name),
                expected: mp_grid.iter().product(),
                found: num_kpts,
            });
        }
        let kpt_latt = Array2::from_shape_vec((num_kpts, 3), f.read_f64s_exact(3 * num_kpts)?)?;
        let nntot = f.read_usize()?;
        let num_wann = f.read_usize()?;
        let checkpoint = f.read_string()?;
        let have_disentangled = f.read_i32s_exact(1)?[0] != 0;

        let (omega_invariant, win_min, win_max, u_opt) = if have_disentangled {
            let omega = f.read_f64s_exact(1)?[0];
            let lwindow = f.read_i32s_exact(num_kpts * num_bands)?;
            let ndimwin = f.read_i32s_exact(num_kpts)?;
            let u_opt = Array3::from_shape_vec(
                (num_kpts, num_wann, num_bands),
                f.read_complex_exact(num_kpts * num_wann * num_bands)?,
            )?;
            let mut win_min = Vec::with_capacity(num_kpts);
            let mut win_max = Vec::with_capacity(num_kpts);
            for ik in 0..num_kpts {
                let lwin = &lwindow[ik * num_bands..(ik + 1) * num_bands];
                let first = lwin
                    .iter()
                    .position(|&x| x != 0)
                    .ok_or_else(|| parse_error(name, format!("empty disentanglement window at k-point {}", ik)))?;
                let nd = to_usize(name, "ndimwin", ndimwin[ik])?;
                win_min.push(first);
                win_max.push(first + nd);
            }
            (Some(omega), win_min, win_max, Some(u_opt))
        } else {
            (None, vec![0; num_kpts], vec![num_wann; num_kpts], None)
        };

        let u_matrix = Array3::from_shape_vec(
            (num_kpts, num_wann, num_wann),
            f.read_complex_exact(num_kpts * num_wann * num_wann)?,
        )?;
        let m_matrix = Array4::from_shape_vec(
            (num_kpts, nntot, num_wann, num_wann),
            f.read_complex_exact(num_kpts * nntot * num_wann * num_wann)?,
        )?;
        let mut v_matrix = Vec::with_capacity(num_kpts);
        for ik in 0..num_kpts {
            let u = u_matrix.index_axis(Axis(0), ik);
            let v = match &u_opt {
                Some(u_opt) => {
                    let nd = win_max[ik] - win_min[ik];
                    if nd > num_bands {
                        return Err(parse_error(name, format!("window of k-point {} is wider than num_bands", ik)));
                    }
                    u.dot(&u_opt.slice(s![ik, .., ..nd]))
                }
                None => u.to_owned(),
            };
            v_matrix.push(v);
        }
        let wannier_centres = Array2::from_shape_vec((num_wann, 3), f.read_f64s_exact(3 * num_wann)?)?;
        let wannier_spreads = Array1::from(f.read_f64s_exact(num_wann)?);
        let gauge = GaugeRotation::new(num_bands, win_min, win_max, v_matrix)?;
        debug!(
            "{}: {} bands, {} Wannier functions, {} k-points, disentangled: {}",
            name, num_bands, num_wann, num_kpts, have_disentangled
        );
        Ok(CheckPoint {
            comment,
            num_bands,
            exclude_bands,
            lattice,
            num_kpts,
            mp_grid,
            kpt_latt,
            nntot,
            num_wann,
            checkpoint,
            have_disentangled,
            omega_invariant,
            m_matrix,
            wannier_centres,
            wannier_spreads,
            gauge,
        })
    }

    /// Integer coordinates of the k-points on the mesh.
    pub fn kpt_mp_grid(&self) -> Vec<[usize; 3]> {
        kpt_mp_grid_from_latt(&self.kpt_latt, self.mp_grid)
    }
}

// ---------------------------------------------------------------------------
// .eig
// ---------------------------------------------------------------------------

/// Band energies, `(num_kpts, num_bands)`.
#[derive(Debug, Clone)]
pub struct Eig {
    pub data: Array2<f64>,
}

impl Eig {
    pub fn num_kpts(&self) -> usize {
        self.data.nrows()
    }

    pub fn num_bands(&self) -> usize {
        self.data.ncols()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("reading {}", path.display());
        Eig::from_reader(BufReader::new(open_file(path)?), &path.display().to_string())
    }

    /// Rows `band kpoint energy`, bands running fastest.
    pub fn from_reader<R: BufRead>(reader: R, name: &str) -> Result<Self> {
        let mut rows = Vec::new();
        for line in collect_lines(reader)? {
            if line.trim().is_empty() {
                continue;
            }
            let tokens: Vec<f64> = parse_first(&line, 3, name)?;
            rows.push((tokens[0].round() as usize, tokens[1].round() as usize, tokens[2]));
        }
        let nb = rows.iter().map(|r| r.0).max().unwrap_or(0);
        let nk = rows.iter().map(|r| r.1).max().unwrap_or(0);
        if rows.len() != nb * nk {
            return Err(TbError::DimensionMismatch {
                context: format!("energies in {}", name),
                expected: nb * nk,
                found: rows.len(),
            });
        }
        let mut data = Array2::<f64>::zeros((nk, nb));
        for (i, (ib, ik, e)) in rows.into_iter().enumerate() {
            if ib != i % nb + 1 || ik != i / nb + 1 {
                return Err(parse_error(
                    name,
                    format!("line {} holds band {} of k-point {}, out of order", i + 1, ib, ik),
                ));
            }
            data[[ik - 1, ib - 1]] = e;
        }
        Ok(Eig { data })
    }
}

// ---------------------------------------------------------------------------
// .mmn
// ---------------------------------------------------------------------------

/// Overlap matrices `(num_kpts, nnb, num_bands, num_bands)` together with
/// the neighbour table.
#[derive(Debug, Clone)]
pub struct Mmn {
    pub data: Array4<Complex64>,
    /// Index of the b-th neighbour of every k-point.
    pub neighbours: Array2<usize>,
    /// Reciprocal lattice vector bringing the neighbour back, `(nk, nnb, 3)`.
    pub g: Array3<isize>,
}

impl Mmn {
    pub fn num_kpts(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn nnb(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn num_bands(&self) -> usize {
        self.data.shape()[2]
    }

    pub fn from_file<P: AsRef<Path>>(path: P, pool: Option<&ThreadPool>) -> Result<Self> {
        let path = path.as_ref();
        Mmn::from_reader(BufReader::new(open_file(path)?), &path.display().to_string(), pool)
    }

    /// The (k, b) blocks are independent and are parsed on `pool`.
    pub fn from_reader<R: BufRead>(reader: R, name: &str, pool: Option<&ThreadPool>) -> Result<Self> {
        let reads = collect_lines(reader)?;
        let header = reads.first().ok_or_else(|| parse_error(name, "empty file".to_string()))?;
        info!("reading {}: {}", name, header.trim());
        let dims: Vec<usize> = parse_first(reads.get(1).map(|s| s.as_str()).unwrap_or(""), 3, name)?;
        let (nb, nk, nnb) = (dims[0], dims[1], dims[2]);
        let block = 1 + nb * nb;
        if reads.len() < 2 + nk * nnb * block {
            return Err(parse_error(
                name,
                format!("expected {} lines, found {}", 2 + nk * nnb * block, reads.len()),
            ));
        }
        let blocks: Vec<&[String]> = (0..nk * nnb)
            .map(|j| &reads[2 + j * block..2 + (j + 1) * block])
            .collect();
        let parse = || -> Result<Vec<(Vec<isize>, Array2<Complex64>)>> {
            blocks
                .par_iter()
                .map(|lines| parse_mmn_block(lines, nb, name))
                .collect()
        };
        let parsed = match pool {
            Some(pool) => pool.install(parse),
            None => parse(),
        }?;

        let mut data = Array4::<Complex64>::zeros((nk, nnb, nb, nb));
        let mut neighbours = Array2::<usize>::zeros((nk, nnb));
        let mut g = Array3::<isize>::zeros((nk, nnb, 3));
        for (j, (head, m)) in parsed.into_iter().enumerate() {
            let (ik, ib) = (j / nnb, j % nnb);
            if head[0] - 1 != ik as isize {
                return Err(parse_error(
                    name,
                    format!("block {} belongs to k-point {}, expected {}", j, head[0], ik + 1),
                ));
            }
            if head[1] < 1 || head[1] as usize > nk {
                return Err(parse_error(name, format!("neighbour index {} out of range", head[1])));
            }
            neighbours[[ik, ib]] = head[1] as usize - 1;
            for a in 0..3 {
                g[[ik, ib, a]] = head[2 + a];
            }
            data.slice_mut(s![ik, ib, .., ..]).assign(&m);
        }
        Ok(Mmn { data, neighbours, g })
    }
}

/// Header `ik iknb G1 G2 G3` and `nb²` lines `re im`, first band index fastest.
fn parse_mmn_block(lines: &[String], nb: usize, name: &str) -> Result<(Vec<isize>, Array2<Complex64>)> {
    let head: Vec<isize> = parse_first(&lines[0], 5, name)?;
    let mut m = Array2::<Complex64>::zeros((nb, nb));
    for (l, line) in lines[1..].iter().enumerate() {
        let v: Vec<f64> = parse_first(line, 2, name)?;
        m[[l % nb, l / nb]] = Complex64::new(v[0], v[1]);
    }
    Ok((head, m))
}

// ---------------------------------------------------------------------------
// b-vectors
// ---------------------------------------------------------------------------

/// Finite-difference vectors $\bm b$ and weights $w_b$ with
/// $\sum_b w_b\, b_\alpha b_\beta = \delta_{\alpha\beta}$.
#[derive(Debug, Clone)]
pub struct BVectors {
    /// Cartesian `b` of every (k, neighbour), `(nk, nnb, 3)`.
    pub bk_cart: Array3<f64>,
    /// `(nk, nnb)`
    pub wk: Array2<f64>,
    /// Weight of each shell, shortest first.
    pub shell_weights: Vec<f64>,
}

impl BVectors {
    pub fn from_mmn(mmn: &Mmn, chk: &CheckPoint) -> Result<Self> {
        BVectors::new(&mmn.neighbours, &mmn.g, &chk.kpt_latt, chk.mp_grid, &chk.lattice)
    }

    pub fn new(
        neighbours: &Array2<usize>,
        g: &Array3<isize>,
        kpt_latt: &Array2<f64>,
        mp_grid: [usize; 3],
        lattice: &LatticeVectors,
    ) -> Result<Self> {
        let (nk, nnb) = neighbours.dim();
        let mut bk_latt = Array3::<isize>::zeros((nk, nnb, 3));
        for ik in 0..nk {
            for ib in 0..nnb {
                let nbr = neighbours[[ik, ib]];
                for a in 0..3 {
                    let db = kpt_latt[[nbr, a]] - kpt_latt[[ik, a]] + g[[ik, ib, a]] as f64;
                    bk_latt[[ik, ib, a]] = (db * mp_grid[a] as f64).round() as isize;
                }
            }
        }
        let to_cart = |b: &[isize; 3]| -> Array1<f64> {
            let mut c = Array1::<f64>::zeros(3);
            for a in 0..3 {
                c.scaled_add(b[a] as f64 / mp_grid[a] as f64, &lattice.recip.row(a));
            }
            c
        };

        let mut unique: Vec<[isize; 3]> = Vec::new();
        for b in bk_latt.rows() {
            let b = [b[0], b[1], b[2]];
            if !unique.contains(&b) {
                unique.push(b);
            }
        }
        if unique.len() != nnb {
            return Err(TbError::BVectorShells(format!(
                "found {} distinct b-vectors, expected {}",
                unique.len(),
                nnb
            )));
        }
        let mut cart: Vec<([isize; 3], Array1<f64>, f64)> = unique
            .iter()
            .map(|b| {
                let c = to_cart(b);
                let len = c.dot(&c).sqrt();
                (*b, c, len)
            })
            .collect();
        cart.sort_by(|x, y| x.2.total_cmp(&y.2));

        // 按长度分壳层
        let mut borders = vec![0];
        for i in 1..cart.len() {
            if cart[i].2 - cart[i - 1].2 > SHELL_LENGTH_TOLERANCE {
                borders.push(i);
            }
        }
        borders.push(cart.len());
        let shell_mats: Vec<Array2<f64>> = borders
            .windows(2)
            .map(|w| {
                let mut m = Array2::<f64>::zeros((3, 3));
                for (_, c, _) in &cart[w[0]..w[1]] {
                    for i in 0..3 {
                        for j in 0..3 {
                            m[[i, j]] += c[i] * c[j];
                        }
                    }
                }
                m
            })
            .collect();

        // least squares Σ_s w_s M_s = I through the pseudo-inverse of the
        // (ns, 9) shell matrix: w = U Σ⁻¹ Vᵀ vec(I)
        let ns = shell_mats.len();
        let eye = Array2::<f64>::eye(3);
        let shell_line = Array2::from_shape_fn((ns, 9), |(s, c)| shell_mats[s][[c / 3, c % 3]]);
        let (u, sigma, vt) = shell_line.svd(true, true)?;
        let (u, vt) = match (u, vt) {
            (Some(u), Some(vt)) => (u, vt),
            _ => return Err(TbError::BVectorShells("SVD of the shell matrix returned no vectors".to_string())),
        };
        let e = Array1::from_iter(eye.iter().cloned());
        let cutoff = sigma.iter().cloned().fold(0.0, f64::max) * SVD_CUTOFF;
        let mut weights = Array1::<f64>::zeros(ns);
        for (i, &sv) in sigma.iter().enumerate() {
            if sv > cutoff {
                weights.scaled_add(vt.row(i).dot(&e) / sv, &u.column(i));
            }
        }
        let shell_weights = weights.to_vec();
        let mut completeness = -eye;
        for (w, m) in shell_weights.iter().zip(shell_mats.iter()) {
            completeness.scaled_add(*w, m);
        }
        let deviation = completeness.iter().map(|x| x * x).sum::<f64>().sqrt();
        if deviation > BVECTOR_COMPLETENESS_TOLERANCE {
            return Err(TbError::BVectorShells(format!(
                "shells do not satisfy the completeness relation, deviation {:e}",
                deviation
            )));
        }

        let mut lookup: BTreeMap<[isize; 3], (Array1<f64>, f64)> = BTreeMap::new();
        for (s, w) in borders.windows(2).enumerate() {
            for (b, c, _) in &cart[w[0]..w[1]] {
                lookup.insert(*b, (c.clone(), shell_weights[s]));
            }
        }
        let mut bk_cart = Array3::<f64>::zeros((nk, nnb, 3));
        let mut wk = Array2::<f64>::zeros((nk, nnb));
        for ik in 0..nk {
            for ib in 0..nnb {
                let key = [bk_latt[[ik, ib, 0]], bk_latt[[ik, ib, 1]], bk_latt[[ik, ib, 2]]];
                if let Some((c, w)) = lookup.get(&key) {
                    bk_cart.slice_mut(s![ik, ib, ..]).assign(c);
                    wk[[ik, ib]] = *w;
                }
            }
        }
        debug!("b-vector shells: {}, weights {:?}", ns, shell_weights);
        Ok(BVectors {
            bk_cart,
            wk,
            shell_weights,
        })
    }
}

// ---------------------------------------------------------------------------
// .spn
// ---------------------------------------------------------------------------

/// Spin matrices `(num_kpts, num_bands, num_bands, 3)`.
#[derive(Debug, Clone)]
pub struct Spn {
    pub data: Array4<Complex64>,
}

impl Spn {
    pub fn num_kpts(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn num_bands(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn from_file<P: AsRef<Path>>(path: P, formatted: bool) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let reader = BufReader::new(open_file(path)?);
        if formatted {
            Spn::from_formatted(reader, &name)
        } else {
            Spn::from_binary(reader, &name)
        }
    }

    pub fn from_binary<R: Read>(reader: R, name: &str) -> Result<Self> {
        let mut f = FortranReader::new(reader, name);
        let header = f.read_string()?;
        info!("reading {} : {}", name, header);
        let dims = f.read_i32s_exact(2)?;
        let nb = to_usize(name, "number of bands", dims[0])?;
        let nk = to_usize(name, "number of k-points", dims[1])?;
        let npair = nb * (nb + 1) / 2;
        let mut data = Array4::<Complex64>::zeros((nk, nb, nb, 3));
        for ik in 0..nk {
            let packed = f.read_complex_exact(3 * npair)?;
            data.index_axis_mut(Axis(0), ik).assign(&unpack_spin(&packed, nb, name)?);
        }
        Ok(Spn { data })
    }

    pub fn from_formatted<R: BufRead>(reader: R, name: &str) -> Result<Self> {
        let reads = collect_lines(reader)?;
        let mut text = TextRecords { lines: reads.iter(), file: name };
        let header = text.next_line()?.trim().to_string();
        info!("reading {} : {}", name, header);
        let dims: Vec<usize> = parse_first(text.next_line()?, 2, name)?;
        let (nb, nk) = (dims[0], dims[1]);
        let npair = nb * (nb + 1) / 2;
        let mut data = Array4::<Complex64>::zeros((nk, nb, nb, 3));
        for ik in 0..nk {
            let packed = text.complex(3 * npair)?;
            data.index_axis_mut(Axis(0), ik).assign(&unpack_spin(&packed, nb, name)?);
        }
        Ok(Spn { data })
    }
}

/// Element `s + 3p` of `packed` is $\sigma_s$ on the p-th pair `(n, m)`,
/// `n <= m`, pairs enumerated as `m = 0.., n = 0..=m`.
fn unpack_spin(packed: &[Complex64], nb: usize, name: &str) -> Result<Array3<Complex64>> {
    let mut a = Array3::<Complex64>::zeros((nb, nb, 3));
    let mut p = 0;
    for m in 0..nb {
        for n in 0..=m {
            for s in 0..3 {
                a[[n, m, s]] = packed[s + 3 * p];
            }
            p += 1;
        }
    }
    let check: f64 = (0..nb).flat_map(|i| (0..3).map(move |s| (i, s))).map(|(i, s)| a[[i, i, s]].im.abs()).sum();
    if check > SPN_DIAGONAL_TOLERANCE {
        return Err(TbError::NotHermitian {
            context: format!("diagonal of the spin matrices in {}", name),
            deviation: check,
        });
    }
    for m in 0..nb {
        for n in 0..m {
            for s in 0..3 {
                a[[m, n, s]] = a[[n, m, s]].conj();
            }
        }
    }
    Ok(a)
}

// ---------------------------------------------------------------------------
// .uHu / .uIu and .sHu / .sIu
// ---------------------------------------------------------------------------

/// One `nb × nb` record: pair `p` is element `[p / nb][p % nb]`.
fn record_to_matrix(values: Vec<Complex64>, nb: usize) -> Result<Array2<Complex64>> {
    Ok(Array2::from_shape_vec((nb, nb), values)?)
}

/// Header, then `NB NK NNB`, as the first two records (binary) or lines (text).
fn read_uxu_header_binary<R: Read>(f: &mut FortranReader<R>, name: &str) -> Result<(usize, usize, usize)> {
    let header = f.read_string()?;
    info!("reading {} : <{}>", name, header);
    let d = f.read_i32s_exact(3)?;
    Ok((
        to_usize(name, "NB", d[0])?,
        to_usize(name, "NK", d[1])?,
        to_usize(name, "NNB", d[2])?,
    ))
}

fn read_uxu_header_text(text: &mut TextRecords, name: &str) -> Result<(usize, usize, usize)> {
    let header = text.next_line()?.trim().to_string();
    info!("reading {} : <{}>", name, header);
    let d: Vec<usize> = parse_first(text.next_line()?, 3, name)?;
    Ok((d[0], d[1], d[2]))
}

/// $\braket{u_{m\bm k+\bm b_1}|X|u_{n\bm k+\bm b_2}}$, `(nk, nnb, nnb, nb, nb)`,
/// with X = H (`.uHu`) or the identity (`.uIu`).
#[derive(Debug, Clone)]
pub struct Uxu {
    pub data: Array5<Complex64>,
}

impl Uxu {
    pub fn nnb(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn from_file<P: AsRef<Path>>(path: P, formatted: bool) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let reader = BufReader::new(open_file(path)?);
        if formatted {
            Uxu::from_formatted(reader, &name)
        } else {
            Uxu::from_binary(reader, &name)
        }
    }

    pub fn from_binary<R: Read>(reader: R, name: &str) -> Result<Self> {
        let mut f = FortranReader::new(reader, name);
        let (nb, nk, nnb) = read_uxu_header_binary(&mut f, name)?;
        let mut data = Array5::<Complex64>::zeros((nk, nnb, nnb, nb, nb));
        for ik in 0..nk {
            for ib2 in 0..nnb {
                for ib1 in 0..nnb {
                    let m = record_to_matrix(f.read_complex_exact(nb * nb)?, nb)?;
                    data.slice_mut(s![ik, ib1, ib2, .., ..]).assign(&m);
                }
            }
        }
        Ok(Uxu { data })
    }

    pub fn from_formatted<R: BufRead>(reader: R, name: &str) -> Result<Self> {
        let reads = collect_lines(reader)?;
        let mut text = TextRecords { lines: reads.iter(), file: name };
        let (nb, nk, nnb) = read_uxu_header_text(&mut text, name)?;
        let mut data = Array5::<Complex64>::zeros((nk, nnb, nnb, nb, nb));
        for ik in 0..nk {
            for ib2 in 0..nnb {
                for ib1 in 0..nnb {
                    let m = record_to_matrix(text.complex(nb * nb)?, nb)?;
                    data.slice_mut(s![ik, ib1, ib2, .., ..]).assign(&m);
                }
            }
        }
        Ok(Uxu { data })
    }
}

/// $\braket{u_{m\bm k}|\sigma_s X|u_{n\bm k+\bm b}}$, `(nk, nnb, 3, nb, nb)`,
/// with X = H (`.sHu`) or the identity (`.sIu`).
#[derive(Debug, Clone)]
pub struct Sxu {
    pub data: Array5<Complex64>,
}

impl Sxu {
    pub fn nnb(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn from_file<P: AsRef<Path>>(path: P, formatted: bool) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let reader = BufReader::new(open_file(path)?);
        if formatted {
            Sxu::from_formatted(reader, &name)
        } else {
            Sxu::from_binary(reader, &name)
        }
    }

    pub fn from_binary<R: Read>(reader: R, name: &str) -> Result<Self> {
        let mut f = FortranReader::new(reader, name);
        let (nb, nk, nnb) = read_uxu_header_binary(&mut f, name)?;
        let mut data = Array5::<Complex64>::zeros((nk, nnb, 3, nb, nb));
        for ik in 0..nk {
            for ib2 in 0..nnb {
                for ipol in 0..3 {
                    let m = record_to_matrix(f.read_complex_exact(nb * nb)?, nb)?;
                    data.slice_mut(s![ik, ib2, ipol, .., ..]).assign(&m);
                }
            }
        }
        Ok(Sxu { data })
    }

    pub fn from_formatted<R: BufRead>(reader: R, name: &str) -> Result<Self> {
        let reads = collect_lines(reader)?;
        let mut text = TextRecords { lines: reads.iter(), file: name };
        let (nb, nk, nnb) = read_uxu_header_text(&mut text, name)?;
        let mut data = Array5::<Complex64>::zeros((nk, nnb, 3, nb, nb));
        for ik in 0..nk {
            for ib2 in 0..nnb {
                for ipol in 0..3 {
                    let m = record_to_matrix(text.complex(nb * nb)?, nb)?;
                    data.slice_mut(s![ik, ib2, ipol, .., ..]).assign(&m);
                }
            }
        }
        Ok(Sxu { data })
    }
}
