//! A single s orbital on a chain, written as the files Wannier90 and
//! pw2wannier90 would produce, and read back with `System::from_w90`.
use approx::assert_abs_diff_eq;
use ndarray::array;
use num_complex::Complex64;
use std::f64::consts::PI;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use wannier_tb::fortran::FortranWriter;
use wannier_tb::{FftMethod, OperatorKind, System, TbError, W90Options};

const NK: usize = 8;
const NNB: usize = 6;
const CENTRE: f64 = 0.1;
const HOPPING: f64 = -1.0;

fn energy(ik: usize) -> f64 {
    2.0 * HOPPING * (2.0 * PI * ik as f64 / NK as f64).cos()
}

/// Neighbour, G-vector and Cartesian b of the six finite-difference vectors.
fn neighbour(ik: usize, ib: usize) -> (usize, [i32; 3], [f64; 3]) {
    let bx = 2.0 * PI / NK as f64;
    let by = 2.0 * PI / 10.0;
    match ib {
        0 => ((ik + 1) % NK, [(ik + 1 == NK) as i32, 0, 0], [bx, 0.0, 0.0]),
        1 => ((ik + NK - 1) % NK, [-((ik == 0) as i32), 0, 0], [-bx, 0.0, 0.0]),
        2 => (ik, [0, 1, 0], [0.0, by, 0.0]),
        3 => (ik, [0, -1, 0], [0.0, -by, 0.0]),
        4 => (ik, [0, 0, 1], [0.0, 0.0, by]),
        _ => (ik, [0, 0, -1], [0.0, 0.0, -by]),
    }
}

fn write_chk(path: &Path) {
    let mut w = FortranWriter::new(Vec::new());
    w.write_string("synthetic chain", 33).unwrap();
    w.write_i32s(&[1]).unwrap();
    w.write_i32s(&[0]).unwrap();
    w.write_i32s(&[]).unwrap();
    w.write_f64s(&[1.0, 0.0, 0.0, 0.0, 10.0, 0.0, 0.0, 0.0, 10.0]).unwrap();
    let (b1, b2) = (2.0 * PI, 2.0 * PI / 10.0);
    w.write_f64s(&[b1, 0.0, 0.0, 0.0, b2, 0.0, 0.0, 0.0, b2]).unwrap();
    w.write_i32s(&[NK as i32]).unwrap();
    w.write_i32s(&[NK as i32, 1, 1]).unwrap();
    let kpt: Vec<f64> = (0..NK).flat_map(|ik| [ik as f64 / NK as f64, 0.0, 0.0]).collect();
    w.write_f64s(&kpt).unwrap();
    w.write_i32s(&[NNB as i32]).unwrap();
    w.write_i32s(&[1]).unwrap();
    w.write_string("postwann", 20).unwrap();
    w.write_i32s(&[0]).unwrap();
    w.write_complex(&vec![Complex64::new(1.0, 0.0); NK]).unwrap();
    w.write_complex(&vec![Complex64::new(1.0, 0.0); NK * NNB]).unwrap();
    w.write_f64s(&[CENTRE, 0.0, 0.0]).unwrap();
    w.write_f64s(&[1.5]).unwrap();
    fs::write(path, w.into_inner()).unwrap();
}

fn write_eig(path: &Path) {
    let mut text = String::new();
    for ik in 0..NK {
        writeln!(text, "{:5}{:5}{:24.16e}", 1, ik + 1, energy(ik)).unwrap();
    }
    fs::write(path, text).unwrap();
}

/// $M_{\bm k,\bm b} = e^{-i\bm b\cdot\bm x_0}$ for a Wannier function centred at $\bm x_0$.
fn write_mmn(path: &Path) {
    let mut text = String::from("synthetic overlaps\n");
    writeln!(text, "{:12}{:12}{:12}", 1, NK, NNB).unwrap();
    for ik in 0..NK {
        for ib in 0..NNB {
            let (nbr, g, b) = neighbour(ik, ib);
            writeln!(text, "{:5}{:5}{:5}{:5}{:5}", ik + 1, nbr + 1, g[0], g[1], g[2]).unwrap();
            let m = Complex64::from_polar(1.0, -b[0] * CENTRE);
            writeln!(text, "{:24.16e} {:24.16e}", m.re, m.im).unwrap();
        }
    }
    fs::write(path, text).unwrap();
}

/// Spin up everywhere.
fn write_spn(path: &Path) {
    let mut text = String::from("synthetic spin\n");
    writeln!(text, "{} {}", 1, NK).unwrap();
    for _ in 0..NK {
        text.push_str("0.0 0.0\n0.0 0.0\n1.0 0.0\n");
    }
    fs::write(path, text).unwrap();
}

fn write_all(dir: &Path) -> String {
    let seed = dir.join("chain");
    write_chk(&seed.with_extension("chk"));
    write_eig(&seed.with_extension("eig"));
    write_mmn(&seed.with_extension("mmn"));
    write_spn(&seed.with_extension("spn"));
    seed.to_str().unwrap().to_string()
}

fn check_bands(system: &System) {
    for k in [0.0, 0.125, 0.3, 0.5, 0.77] {
        let h = system.gen_ham(&array![k, 0.0, 0.0]).unwrap();
        assert_abs_diff_eq!(h[[0, 0]].re, 2.0 * HOPPING * (2.0 * PI * k).cos(), epsilon = 1e-10);
        assert_abs_diff_eq!(h[[0, 0]].im, 0.0, epsilon = 1e-10);
    }
}

#[test]
fn chain_from_w90_files() {
    let dir = tempfile::tempdir().unwrap();
    let seed = write_all(dir.path());
    let opts = W90Options::default()
        .with_berry(true)
        .with_spin(true)
        .with_use_ws(false)
        .with_formatted(true, false)
        .with_num_threads(2);
    let system = System::from_w90(&seed, &opts).unwrap();

    assert_eq!(system.num_wann(), 1);
    assert_eq!(system.nRvec(), 9);
    assert_eq!(system.Ndegen()[system.index_R([4, 0, 0]).unwrap()], 2);
    assert_eq!(system.nk_fft_min().unwrap(), [9, 1, 1]);
    check_bands(&system);

    let r0 = system.index_R([0, 0, 0]).unwrap();
    let r1 = system.index_R([1, 0, 0]).unwrap();
    assert_abs_diff_eq!(system.operators.HH_R[[0, 0, r1]].re, HOPPING, epsilon = 1e-12);
    // with transl_inv the diagonal of A is the Wannier centre
    let aa = system.operators.AA_R.as_ref().unwrap();
    assert_abs_diff_eq!(aa[[0, 0, r0, 0]].re, CENTRE, epsilon = 1e-12);
    assert_abs_diff_eq!(aa[[0, 0, r1, 0]].norm(), 0.0, epsilon = 1e-12);
    let ss = system.operators.SS_R.as_ref().unwrap();
    assert_abs_diff_eq!(ss[[0, 0, r0, 2]].re, 1.0, epsilon = 1e-12);
    assert!(!system.has(OperatorKind::BB));
    system.check_hermiticity(1e-10).unwrap();
}

#[test]
fn minimal_distance_keeps_the_bands() {
    let dir = tempfile::tempdir().unwrap();
    let seed = write_all(dir.path());
    let opts = W90Options::default().with_fft(FftMethod::Direct).with_num_threads(1);
    let system = System::from_w90(&seed, &opts).unwrap();
    assert!(system.Ndegen().iter().all(|&d| d == 1));
    check_bands(&system);

    // writing and reading the tb file gives the same model
    let tb = dir.path().join("chain_tb.dat");
    system.write_tb_file(&tb).unwrap();
    let back = System::from_tb_file(&tb).unwrap();
    assert_eq!(back.nRvec(), system.nRvec());
    check_bands(&back);
}

#[test]
fn missing_inputs_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let seed = write_all(dir.path());
    fs::remove_file(dir.path().join("chain.mmn")).unwrap();
    let opts = W90Options::default().with_berry(true);
    assert!(matches!(
        System::from_w90(&seed, &opts),
        Err(TbError::MissingResource { .. })
    ));
    // the Hamiltonian alone does not need the overlaps
    assert!(System::from_w90(&seed, &W90Options::default()).is_ok());
}
