use crate::consts::HERMITICITY_TOLERANCE;
use crate::error::{Result, TbError};
use crate::fortran::FortranReader;
use crate::fourier::FourierInterpolator;
use crate::io::{line_at, open_file, parse_first, read_lines, str2bool};
use crate::lattice::LatticeVectors;
use crate::math::{ALPHA_A, BETA_A};
use crate::operators::{aa_q, cc_q, hh_q, sa_q, sha_q, ss_q};
use crate::options::{RFileOptions, W90Options};
use crate::system::{OperatorKind, System, SystemBuilder};
use crate::w90_files::{BVectors, CheckPoint, Eig, Mmn, Spn, Sxu, Uxu};
use crate::wigner_seitz::wigner_seitz_with;
use crate::ws_dist::WsDistMap;
use log::{debug, info};
use ndarray::prelude::*;
use ndarray::{ArrayD, IxDyn};
use num_complex::Complex64;
use std::io::BufReader;
use std::path::Path;
use std::time::{Duration, Instant};

const I: Complex64 = Complex64::new(0.0, 1.0);

impl System {
    #[allow(non_snake_case)]
    pub fn from_w90(seedname: &str, options: &W90Options) -> Result<System> {
        //! 从 wannier90 的输出直接构造实空间模型.
        //!
        //! 需要 seedname.chk 和 seedname.eig; 根据 options 还会读取
        //! seedname.mmn (berry, morb, shc), seedname.uHu (morb),
        //! seedname.spn (spin, shc), seedname.sIu 和 seedname.sHu (shc).
        //!
        //! 所有算符先在 k 空间的 Wannier 规范下构造, 再 Fourier 变换到
        //! Wigner-Seitz 的 R 点上. 如果 use_ws=true, 最后按照 Wannier 中心之间的
        //! 最短距离重新分配 R 点, 与 wannier90 的 use_ws_distance 一致.
        //! 除了 BB 以外的算符在 k 空间已经厄米化, 构造完成后检查 O(R) 的厄米性.
        let pool = options.parallelism.build_pool()?;
        let chk = CheckPoint::from_file(format!("{}.chk", seedname))?;
        let (iRvec, Ndegen) = wigner_seitz_with(chk.mp_grid, &chk.lattice, options.ws_metric);
        info!("Number of R-vectors in the Wigner-Seitz cell: {}", iRvec.nrows());
        let eig = Eig::from_file(format!("{}.eig", seedname))?;

        let need_mmn = options.need_aa() || options.need_bb() || options.need_cc() || options.need_sa() || options.need_sha();
        let overlaps = if need_mmn {
            let mmn = Mmn::from_file(format!("{}.mmn", seedname), Some(&pool))?;
            let bvec = BVectors::from_mmn(&mmn, &chk)?;
            Some((mmn, bvec))
        } else {
            None
        };
        let overlap_data = || {
            overlaps
                .as_ref()
                .ok_or_else(|| TbError::InvalidOption("overlaps were not read".to_string()))
        };

        let fourier = FourierInterpolator::new(
            chk.mp_grid,
            chk.kpt_mp_grid(),
            iRvec.clone(),
            Ndegen.clone(),
            options.fft,
            Some(&pool),
        )?;
        let mut time_fft = Duration::ZERO;
        let mut to_r = |q: ArrayD<Complex64>| -> Result<ArrayD<Complex64>> {
            let t0 = Instant::now();
            let r = fourier.q_to_r(&q)?;
            time_fft += t0.elapsed();
            Ok(r)
        };

        let mut builder = SystemBuilder::new()
            .set_lattice(chk.lattice.clone(), iRvec.clone(), Ndegen)?
            .load_operator(OperatorKind::HH, to_r(hh_q(&chk.gauge, &eig)?)?)?;
        if options.need_aa() {
            let (mmn, bvec) = overlap_data()?;
            let q = aa_q(&chk.gauge, mmn, bvec, None, options.transl_inv)?;
            builder = builder.load_operator(OperatorKind::AA, to_r(q)?)?;
        }
        if options.need_bb() {
            let (mmn, bvec) = overlap_data()?;
            let q = aa_q(&chk.gauge, mmn, bvec, Some(&eig), false)?;
            builder = builder.load_operator(OperatorKind::BB, to_r(q)?)?;
        }
        if options.need_cc() {
            let (mmn, bvec) = overlap_data()?;
            let uhu = Uxu::from_file(format!("{}.uHu", seedname), options.formatted_uxu)?;
            let q = cc_q(&chk.gauge, &uhu, mmn, bvec)?;
            builder = builder.load_operator(OperatorKind::CC, to_r(q)?)?;
        }
        if options.need_ss() {
            let spn = Spn::from_file(format!("{}.spn", seedname), options.formatted_spn)?;
            builder = builder.load_operator(OperatorKind::SS, to_r(ss_q(&chk.gauge, &spn)?)?)?;
        }
        if options.need_sa() {
            let (mmn, bvec) = overlap_data()?;
            let siu = Sxu::from_file(format!("{}.sIu", seedname), options.formatted_uxu)?;
            let q = sa_q(&chk.gauge, &siu, mmn, bvec)?;
            builder = builder.load_operator(OperatorKind::SA, to_r(q)?)?;
        }
        if options.need_sha() {
            let (mmn, bvec) = overlap_data()?;
            let shu = Sxu::from_file(format!("{}.sHu", seedname), options.formatted_uxu)?;
            let q = sha_q(&chk.gauge, &shu, mmn, bvec)?;
            builder = builder.load_operator(OperatorKind::SHA, to_r(q)?)?;
        }
        info!("time for FFT_q_to_R : {:.3} s", time_fft.as_secs_f64());

        if options.use_ws {
            info!("using ws_distance");
            let map = WsDistMap::generate(&iRvec, &chk.wannier_centres, chk.mp_grid, &chk.lattice, options.conservation)?;
            builder = builder.apply_ws_map(&map)?;
        }
        let system = finalize_hermitian(builder)?;
        log_summary(&system)?;
        Ok(system)
    }

    /// Read a model whose operators wannier90 (or postw90) has already
    /// written in real space: `seedname_R.info` plus one binary file
    /// `seedname_XX_R` per operator.
    ///
    /// With `old_format` the files are `seedname_HH_save.info` and
    /// `seedname_XX_R.dat`.
    #[allow(non_snake_case)]
    pub fn from_r_files(seedname: &str, options: &RFileOptions) -> Result<System> {
        let info_name = if options.old_format {
            format!("{}_HH_save.info", seedname)
        } else {
            format!("{}_R.info", seedname)
        };
        info!("Reading from {}", info_name);
        let reads = read_lines(Path::new(&info_name))?;
        let head: Vec<usize> = parse_first(line_at(&reads, 0, &info_name)?, 2, &info_name)?;
        let (num_wann, nRvec) = (head[0], head[1]);
        let mut real = Array2::<f64>::zeros((3, 3));
        for i in 0..3 {
            let row: Vec<f64> = parse_first(line_at(&reads, 1 + i, &info_name)?, 3, &info_name)?;
            real.row_mut(i).assign(&Array1::from(row));
        }
        let lattice = LatticeVectors::from_real(real)?;
        let mut iRvec = Array2::<isize>::zeros((nRvec, 3));
        let mut Ndegen = Array1::<usize>::zeros(nRvec);
        for ir in 0..nRvec {
            let row: Vec<isize> = parse_first(line_at(&reads, 4 + ir, &info_name)?, 4, &info_name)?;
            for a in 0..3 {
                iRvec[[ir, a]] = row[a];
            }
            Ndegen[ir] = usize::try_from(row[3]).map_err(|_| TbError::FileParse {
                file: info_name.clone(),
                message: format!("negative degeneracy {} of R-vector {}", row[3], ir),
            })?;
        }
        let flag_line = line_at(&reads, 4 + nRvec, &info_name)?;
        let has_ws = flag_line
            .split_once('=')
            .and_then(|(_, v)| str2bool(v))
            .ok_or_else(|| TbError::FileParse {
                file: info_name.clone(),
                message: format!("expected 'key = T/F', found '{}'", flag_line.trim()),
            })?;
        info!("Number of wannier functions: {}", num_wann);

        let suffix = if options.old_format { "_R.dat" } else { "_R" };
        let get_mat = |name: &str| -> Result<ArrayD<Complex64>> {
            read_r_matrix(&format!("{}_{}{}", seedname, name, suffix), num_wann, &Ndegen)
        };
        // 先试 XXab, 找不到文件再读 XX 并反对称化
        let get_antisymmetric = |kind: OperatorKind| -> Result<ArrayD<Complex64>> {
            match get_mat(&format!("{}ab", kind.suffix())) {
                Ok(mat) => Ok(mat.mapv(|x| x * I)),
                Err(TbError::MissingResource { path }) => {
                    info!("{} not found, antisymmetrizing {}", path, kind.suffix());
                    antisymmetrize(&get_mat(kind.suffix())?)
                }
                Err(e) => Err(e),
            }
        };

        let mut builder = SystemBuilder::new()
            .set_lattice(lattice, iRvec.clone(), Ndegen.clone())?
            .load_operator(OperatorKind::HH, get_mat("HH")?)?;
        if options.aa {
            builder = builder.load_operator(OperatorKind::AA, get_mat("AA")?)?;
        }
        if options.bb || options.cc {
            builder = builder.load_operator(OperatorKind::BB, get_mat("BB")?)?;
        }
        if options.cc {
            builder = builder.load_operator(OperatorKind::CC, get_antisymmetric(OperatorKind::CC)?)?;
        }
        if options.ff {
            builder = builder.load_operator(OperatorKind::FF, get_antisymmetric(OperatorKind::FF)?)?;
        }
        if options.ss {
            builder = builder.load_operator(OperatorKind::SS, get_mat("SS")?)?;
        }
        if options.sa {
            builder = builder.load_operator(OperatorKind::SA, get_mat("SA")?)?;
        }
        if options.sha {
            builder = builder.load_operator(OperatorKind::SHA, get_mat("SHA")?)?;
        }

        if has_ws && options.use_ws {
            info!("using ws_dist");
            let map = WsDistMap::from_lines(&iRvec, num_wann, &reads[5 + nRvec..], options.conservation)?;
            builder = builder.apply_ws_map(&map)?;
        }
        let system = builder.finalize()?;
        log_summary(&system)?;
        info!("Reading the system finished successfully");
        Ok(system)
    }
}

/// Finalize a model whose Hermitian operators were hermitized before the
/// Fourier transform; any deviation beyond round-off is an error.
fn finalize_hermitian(builder: SystemBuilder) -> Result<System> {
    let system = builder.finalize()?;
    for kind in OperatorKind::ALL {
        if kind.is_hermitian() && system.has(kind) {
            debug!("{}_R deviates from Hermiticity by {:e}", kind, system.hermiticity_deviation(kind)?);
        }
    }
    system.check_hermiticity(HERMITICITY_TOLERANCE)?;
    Ok(system)
}

fn log_summary(system: &System) -> Result<()> {
    info!("Number of wannier functions: {}", system.num_wann());
    info!("Number of R points: {}", system.nRvec());
    info!("Minimal Number of K points: {:?}", system.nk_fft_min()?);
    info!("Real-space lattice:\n{}", system.real_lattice());
    Ok(())
}

/// One record per orbital pair `(n, m)`, `m` running fastest, each holding
/// `ncomp · nRvec` complex numbers with the R index fastest. The result is
/// `(num_wann, num_wann, nRvec)` followed by one axis of 3 for `ncomp = 3`
/// or two for `ncomp = 9`, and is divided by the degeneracies.
fn read_r_matrix(name: &str, num_wann: usize, ndegen: &Array1<usize>) -> Result<ArrayD<Complex64>> {
    let file = open_file(Path::new(name))?;
    let mut f = FortranReader::new(BufReader::new(file), name);
    let nrvec = ndegen.len();
    let mut records = Vec::with_capacity(num_wann * num_wann);
    for _ in 0..num_wann * num_wann {
        records.push(f.read_complex()?);
    }
    let len = records.first().map(|r| r.len()).unwrap_or(0);
    if nrvec == 0 || len % nrvec != 0 || records.iter().any(|r| r.len() != len) {
        return Err(TbError::FileParse {
            file: name.to_string(),
            message: format!("records do not hold a whole number of components for {} R-vectors", nrvec),
        });
    }
    let ncomp = len / nrvec;
    let mut shape = vec![num_wann, num_wann, nrvec];
    match ncomp {
        1 => {}
        3 => shape.push(3),
        9 => shape.extend([3, 3]),
        _ => {
            return Err(TbError::InvalidComponentCount {
                file: name.to_string(),
                ncomp,
            });
        }
    }
    let mut mat = ArrayD::<Complex64>::zeros(IxDyn(&shape));
    let mut index = vec![0; shape.len()];
    for (p, record) in records.iter().enumerate() {
        index[0] = p / num_wann;
        index[1] = p % num_wann;
        for (i, x) in record.iter().enumerate() {
            let (comp, ir) = (i / nrvec, i % nrvec);
            index[2] = ir;
            match ncomp {
                3 => index[3] = comp,
                9 => {
                    index[3] = comp % 3;
                    index[4] = comp / 3;
                }
                _ => {}
            }
            mat[IxDyn(&index)] = *x / ndegen[ir] as f64;
        }
    }
    Ok(mat)
}

/// $i(X_{\alpha\beta} - X_{\beta\alpha})$ as a pseudo-vector over the last two axes.
fn antisymmetrize(x: &ArrayD<Complex64>) -> Result<ArrayD<Complex64>> {
    let x = x.view().into_dimensionality::<Ix5>()?;
    let (nw1, nw2, nr, _, _) = x.dim();
    let mut out = Array4::<Complex64>::zeros((nw1, nw2, nr, 3));
    for c in 0..3 {
        let (al, be) = (ALPHA_A[c], BETA_A[c]);
        let diff = &x.slice(s![.., .., .., al, be]) - &x.slice(s![.., .., .., be, al]);
        out.slice_mut(s![.., .., .., c]).assign(&diff.mapv(|v| v * I));
    }
    Ok(out.into_dyn())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fortran::FortranWriter;
    use approx::assert_abs_diff_eq;
    use std::fs;
    use std::io::Write;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    /// A single orbital on a chain with three R-vectors.
    fn write_info(dir: &Path, seed: &str, ws_table: Option<&str>) {
        let mut text = String::from("1 3\n2.0 0.0 0.0\n0.0 10.0 0.0\n0.0 0.0 10.0\n");
        text.push_str("-1 0 0 2\n0 0 0 1\n1 0 0 2\n");
        match ws_table {
            Some(table) => {
                text.push_str("use_ws_distance = T\n");
                text.push_str(table);
            }
            None => text.push_str("use_ws_distance = F\n"),
        }
        let mut f = fs::File::create(dir.join(format!("{}_R.info", seed))).unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    fn write_mat(dir: &Path, seed: &str, suffix: &str, values: &[Complex64]) {
        let mut w = FortranWriter::new(Vec::new());
        w.write_complex(values).unwrap();
        fs::write(dir.join(format!("{}_{}_R", seed, suffix)), w.into_inner()).unwrap();
    }

    fn hopping() -> Vec<Complex64> {
        vec![c(-2.0, 0.0), c(0.5, 0.0), c(-2.0, 0.0)]
    }

    #[test]
    fn r_files_are_read_and_divided() {
        let dir = tempfile::tempdir().unwrap();
        let seed = dir.path().join("chain");
        let seed = seed.to_str().unwrap();
        write_info(dir.path(), "chain", None);
        write_mat(dir.path(), "chain", "HH", &hopping());
        // x, y, z blocks of three R-vectors each
        let aa: Vec<Complex64> = (0..9).map(|i| c(i as f64, 0.0)).collect();
        write_mat(dir.path(), "chain", "AA", &aa);
        write_mat(dir.path(), "chain", "BB", &aa);
        // X[.., R, a, b] sits at (b * 3 + a) * nR + R
        let mut cc = vec![c(0.0, 0.0); 27];
        cc[3 * 3 + 1] = c(1.0, 0.0); // X[R=1][0][1]
        write_mat(dir.path(), "chain", "CC", &cc);

        let opts = RFileOptions::default().with_aa(true).with_cc(true).with_use_ws(false);
        let sys = System::from_r_files(seed, &opts).unwrap();
        assert_eq!(sys.num_wann(), 1);
        assert_eq!(sys.nRvec(), 3);
        assert_eq!(sys.operators.HH_R[[0, 0, 0]], c(-1.0, 0.0));
        assert_eq!(sys.operators.HH_R[[0, 0, 1]], c(0.5, 0.0));
        let aa_r = sys.operators.AA_R.as_ref().unwrap();
        assert_eq!(aa_r[[0, 0, 1, 0]], c(1.0, 0.0));
        assert_eq!(aa_r[[0, 0, 2, 2]], c(4.0, 0.0));
        assert!(sys.has(OperatorKind::BB));
        // i (X_xy - X_yx) is the z component
        let cc_r = sys.operators.CC_R.as_ref().unwrap();
        assert_eq!(cc_r[[0, 0, 1, 2]], c(0.0, 1.0));
        assert_eq!(cc_r[[0, 0, 1, 0]], c(0.0, 0.0));
        assert_abs_diff_eq!(sys.gen_ham(&array![0.5, 0.0, 0.0]).unwrap()[[0, 0]].re, 2.5, epsilon = 1e-12);

        // CCab takes precedence over CC
        let ccab: Vec<Complex64> = (0..9).map(|i| c(0.0, -(i as f64))).collect();
        write_mat(dir.path(), "chain", "CCab", &ccab);
        let sys = System::from_r_files(seed, &opts).unwrap();
        assert_eq!(sys.operators.CC_R.as_ref().unwrap()[[0, 0, 1, 2]], c(7.0, 0.0));
    }

    #[test]
    fn r_files_with_distance_table() {
        let dir = tempfile::tempdir().unwrap();
        let seed = dir.path().join("chain");
        write_info(dir.path(), "chain", Some("0\n0\n0\n"));
        write_mat(dir.path(), "chain", "HH", &hopping());
        let sys = System::from_r_files(seed.to_str().unwrap(), &RFileOptions::default()).unwrap();
        assert_eq!(sys.Ndegen(), &Array1::<usize>::ones(3));
        assert_eq!(sys.iRvec(), &array![[-1isize, 0, 0], [0, 0, 0], [1, 0, 0]]);
        let i0 = sys.index_R([1, 0, 0]).unwrap();
        assert_eq!(sys.operators.HH_R[[0, 0, i0]], c(-1.0, 0.0));
    }

    #[test]
    fn non_hermitian_hamiltonian_is_fatal() {
        let lattice = LatticeVectors::from_real(Array2::<f64>::eye(3)).unwrap();
        let irvec = array![[-1isize, 0, 0], [0, 0, 0], [1, 0, 0]];
        let build = |right: Complex64| {
            let hh = Array3::from_shape_vec((1, 1, 3), vec![c(-1.0, 0.0), c(0.0, 0.0), right]).unwrap();
            SystemBuilder::new()
                .set_lattice(lattice.clone(), irvec.clone(), Array1::ones(3))
                .unwrap()
                .load_operator(OperatorKind::HH, hh.into_dyn())
                .unwrap()
        };
        assert!(finalize_hermitian(build(c(-1.0, 1e-12))).is_ok());
        assert!(matches!(
            finalize_hermitian(build(c(-1.0, 0.1))),
            Err(TbError::NotHermitian { .. })
        ));
    }

    #[test]
    fn broken_r_files() {
        let dir = tempfile::tempdir().unwrap();
        let seed = dir.path().join("chain");
        let seed = seed.to_str().unwrap();
        write_info(dir.path(), "chain", None);
        let opts = RFileOptions::default();
        assert!(matches!(
            System::from_r_files(seed, &opts),
            Err(TbError::MissingResource { .. })
        ));
        write_mat(dir.path(), "chain", "HH", &[c(1.0, 0.0); 6]);
        assert!(matches!(
            System::from_r_files(seed, &opts),
            Err(TbError::InvalidComponentCount { ncomp: 2, .. })
        ));
    }
}
