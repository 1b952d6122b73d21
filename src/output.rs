//! Whitespace-separated numeric tables, the format of the engine's files.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use faer::Mat;

pub const POST_EQUAL_WEIGHTS: &str = "post_equal_weights.dat";
pub const DEAD_POINTS: &str = "ev.dat";
pub const LIVE_POINTS: &str = "live.points";
pub const PHYSICAL_LIVE_POINTS: &str = "phys_live.points";
pub const RESUME: &str = "resume.dat";
pub const STATS: &str = "stats.dat";

/// Every file the reference engine leaves in its output directory.
pub const OUTPUT_FILES: [&str; 6] = [
    POST_EQUAL_WEIGHTS,
    DEAD_POINTS,
    LIVE_POINTS,
    PHYSICAL_LIVE_POINTS,
    RESUME,
    STATS,
];

/// Write one row per entry, values separated by a single space.
pub fn write_table<'a, I>(path: &Path, rows: I) -> Result<()>
where
    I: IntoIterator<Item = &'a [f64]>,
{
    let file =
        File::create(path).with_context(|| format!("Failed to create file: {:?}", path))?;
    let mut writer = BufWriter::new(file);
    for row in rows {
        let mut first = true;
        for value in row {
            if !first {
                write!(writer, " ")?;
            }
            write!(writer, "{:e}", value)?;
            first = false;
        }
        writeln!(writer)?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write file: {:?}", path))?;
    Ok(())
}

/// Read a table written by `write_table`. Blank lines are skipped.
pub fn read_table(path: &Path) -> Result<Vec<Vec<f64>>> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;
    let mut rows = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read file: {:?}", path))?;
        if line.trim().is_empty() {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|value| value.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Invalid number on line {} of {:?}", number + 1, path))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Build a draws × parameters matrix from equally long rows.
pub fn rows_to_matrix(rows: &[Vec<f64>], ncols: usize) -> Mat<f64> {
    Mat::from_fn(rows.len(), ncols, |i, j| rows[i][j])
}

/// Load the equally weighted posterior and split off the trailing
/// log-likelihood column.
pub fn load_post_equal_weights(outputfiles_basename: &Path) -> Result<(Mat<f64>, Vec<f64>)> {
    let path = outputfiles_basename.join(POST_EQUAL_WEIGHTS);
    let rows = read_table(&path)?;
    let Some(first) = rows.first() else {
        bail!("No samples in {:?}", path);
    };
    let ncols = first.len();
    if ncols < 2 {
        bail!("Expected parameters and a log-likelihood column in {:?}", path);
    }
    if let Some(row) = rows.iter().position(|row| row.len() != ncols) {
        bail!(
            "Row {} of {:?} has {} columns, expected {}",
            row + 1,
            path,
            rows[row].len(),
            ncols
        );
    }

    let samples = rows_to_matrix(&rows, ncols - 1);
    let log_likelihood = rows.iter().map(|row| row[ncols - 1]).collect();
    Ok((samples, log_likelihood))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn load_splits_log_likelihood() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<Vec<f64>> = vec![
            vec![0.5, 1e-22, -3.25],
            vec![-0.125, 2e-22, f64::NEG_INFINITY],
        ];
        write_table(
            &dir.path().join(POST_EQUAL_WEIGHTS),
            rows.iter().map(Vec::as_slice),
        )
        .unwrap();

        let (samples, log_likelihood) = load_post_equal_weights(dir.path()).unwrap();
        assert_eq!(samples.nrows(), 2);
        assert_eq!(samples.ncols(), 2);
        assert_eq!(samples[(0, 0)], 0.5);
        assert_eq!(samples[(1, 1)], 2e-22);
        assert_eq!(log_likelihood, vec![-3.25, f64::NEG_INFINITY]);
    }

    #[test]
    fn ragged_table_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(POST_EQUAL_WEIGHTS), "1 2 3\n4 5\n").unwrap();
        let err = load_post_equal_weights(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Row 2"));
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_post_equal_weights(dir.path()).is_err());
    }
}
