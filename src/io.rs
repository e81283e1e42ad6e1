//! Small text helpers shared by the readers and writers of this crate.
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use crate::error::{Result, TbError};

/// C-style `%.{prec}e` formatting, i.e. a signed two digit exponent
/// (`1.50000000e+00`) instead of Rust's `1.50000000e0`.
pub fn fmt_e(x: f64, prec: usize) -> String {
    let s = format!("{:.*e}", prec, x);
    match s.split_once('e') {
        Some((mantissa, exp)) => match exp.parse::<i32>() {
            Ok(exp) => {
                let sign = if exp < 0 { '-' } else { '+' };
                format!("{}e{}{:02}", mantissa, sign, exp.abs())
            }
            Err(_) => s,
        },
        None => s,
    }
}

/// `fmt_e` right-aligned in a field of `width` characters.
pub fn fmt_e_width(x: f64, width: usize, prec: usize) -> String {
    format!("{:>width$}", fmt_e(x, prec), width = width)
}

/// Fortran-flavoured boolean parsing (`T`, `.true.`, `true`, `1`, ...).
pub fn str2bool(s: &str) -> Option<bool> {
    let s = s.trim().trim_matches('.').to_lowercase();
    match s.as_str() {
        "t" | "true" | "y" | "yes" | "1" => Some(true),
        "f" | "false" | "n" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Open a file, turning "not found" into [`TbError::MissingResource`] so that
/// callers can tell a missing input apart from a broken one.
pub fn open_file(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            TbError::MissingResource {
                path: path.display().to_string(),
            }
        } else {
            TbError::Io(e)
        }
    })
}

pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    collect_lines(BufReader::new(open_file(path)?))
}

pub fn collect_lines<R: BufRead>(reader: R) -> Result<Vec<String>> {
    let mut reads = Vec::new();
    for line in reader.lines() {
        reads.push(line?);
    }
    Ok(reads)
}

/// Parse every whitespace separated token of `line` as `T`.
pub fn parse_tokens<T: FromStr>(line: &str, file: &str) -> Result<Vec<T>>
where
    T::Err: std::fmt::Display,
{
    line.split_whitespace()
        .map(|x| {
            x.parse::<T>().map_err(|e| TbError::FileParse {
                file: file.to_string(),
                message: format!("cannot parse '{}' in line '{}': {}", x, line.trim(), e),
            })
        })
        .collect()
}

/// Parse the first `n` tokens of `line`, failing if the line is shorter.
pub fn parse_first<T: FromStr>(line: &str, n: usize, file: &str) -> Result<Vec<T>>
where
    T::Err: std::fmt::Display,
{
    let tokens: Vec<&str> = line.split_whitespace().take(n).collect();
    if tokens.len() < n {
        return Err(TbError::FileParse {
            file: file.to_string(),
            message: format!("expected {} values in line '{}'", n, line.trim()),
        });
    }
    parse_tokens(&tokens.join(" "), file)
}

pub fn line_at<'a>(reads: &'a [String], i: usize, file: &str) -> Result<&'a str> {
    reads.get(i).map(|s| s.as_str()).ok_or_else(|| TbError::FileParse {
        file: file.to_string(),
        message: format!("unexpected end of file at line {}", i + 1),
    })
}
