//! Tab-separated result files.
//!
//! Layout: one header row with three columns per cycle
//! (`{i}_Time (s)`, `{i}_Wavelength (nm)`, `{i}_Power (dBm)`), then one row per
//! sample index up to the longest cycle. Numbers carry four decimals; a cycle
//! that has run out of samples leaves its three fields empty.
//!
//! The same format serves saved results, the recovery file rewritten after
//! every cycle, and previous-session overlays loaded back in.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::error::{AppResult, SweepError};
use crate::sweep::processor::wavelength_axis;
use crate::sweep::session::{Cycle, Sample, SweepSession};

/// Column suffixes of one cycle, in file order
pub const COLUMN_SUFFIXES: [&str; 3] = ["Time (s)", "Wavelength (nm)", "Power (dBm)"];

/// Misspelled wavelength header accepted when loading older files
const LEGACY_WAVELENGTH_SUFFIX: &str = "Wavlength (nm)";

/// Header row for `cycles` cycles
pub fn header(cycles: usize) -> Vec<String> {
    (0..cycles)
        .flat_map(|i| COLUMN_SUFFIXES.iter().map(move |suffix| format!("{i}_{suffix}")))
        .collect()
}

/// Wavelengths to write for `cycle`, interpolating when it has not been processed yet
fn wavelengths_for(cycle: &Cycle) -> Vec<f64> {
    if cycle.is_processed() {
        cycle.wavelengths_nm.clone()
    } else {
        wavelength_axis(
            cycle.launch_wavelength_nm,
            cycle.stop_wavelength_nm,
            cycle.duration_s,
            cycle.times(),
        )
    }
}

/// Data rows for `cycles`, padded to the longest cycle
pub fn rows(cycles: &[Cycle]) -> Vec<Vec<String>> {
    let wavelengths: Vec<Vec<f64>> = cycles.iter().map(wavelengths_for).collect();
    let longest = cycles.iter().map(Cycle::len).max().unwrap_or(0);

    (0..longest)
        .map(|row| {
            cycles
                .iter()
                .zip(&wavelengths)
                .flat_map(|(cycle, wl)| match cycle.samples.get(row) {
                    Some(sample) => [
                        format!("{:.4}", sample.t_s),
                        format!("{:.4}", wl.get(row).copied().unwrap_or(f64::NAN)),
                        format!("{:.4}", sample.power_dbm),
                    ],
                    None => [String::new(), String::new(), String::new()],
                })
                .collect()
        })
        .collect()
}

/// Write the finalized cycles of `session` to `path`, replacing the file.
pub fn persist(session: &SweepSession, path: &Path) -> AppResult<()> {
    #[cfg(not(feature = "storage_csv"))]
    {
        let _ = (session, path);
        Err(SweepError::FeatureNotEnabled("storage_csv".to_string()))
    }

    #[cfg(feature = "storage_csv")]
    {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let cycles = session.cycles();
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .quote_style(csv::QuoteStyle::Never)
            .flexible(true)
            .from_path(path)?;
        if !cycles.is_empty() {
            writer.write_record(header(cycles.len()))?;
            for row in rows(cycles) {
                writer.write_record(row)?;
            }
        }
        writer.flush()?;

        debug!(
            path = %path.display(),
            cycles = cycles.len(),
            samples = session.total_samples(),
            "Result file written"
        );
        Ok(())
    }
}

/// Read cycles back from a result file.
///
/// Each cycle's wavelengths come from the file; launch and stop wavelength and
/// duration are taken from its first and last rows.
pub fn load(path: &Path) -> AppResult<Vec<Cycle>> {
    #[cfg(not(feature = "storage_csv"))]
    {
        let _ = path;
        Err(SweepError::FeatureNotEnabled("storage_csv".to_string()))
    }

    #[cfg(feature = "storage_csv")]
    {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_path(path)?;

        let mut records = reader.records();
        let header = match records.next() {
            Some(record) => record?,
            // A session without finalized cycles is written as an empty file
            None => {
                debug!(path = %path.display(), "Empty result file");
                return Ok(Vec::new());
            }
        };
        let n_cycles = check_header(&header)?;

        let mut cycles: Vec<Cycle> = (0..n_cycles).map(Cycle::new).collect();
        let mut exhausted = vec![false; n_cycles];

        for record in records {
            let record = record?;
            let line = record
                .position()
                .map_or(0, |p| usize::try_from(p.line()).unwrap_or(usize::MAX));
            if record.len() > n_cycles * 3 {
                return Err(SweepError::malformed(
                    line,
                    format!("{} fields for {} cycles", record.len(), n_cycles),
                ));
            }

            for (i, cycle) in cycles.iter_mut().enumerate() {
                let field = |k: usize| record.get(i * 3 + k).unwrap_or("").trim();
                let triple = [field(0), field(1), field(2)];

                if triple.iter().all(|f| f.is_empty()) {
                    exhausted[i] = true;
                    continue;
                }
                if exhausted[i] {
                    return Err(SweepError::malformed(
                        line,
                        format!("cycle {i} resumes after running out of samples"),
                    ));
                }

                let [t_s, nm, dbm] = parse_triple(triple, line, i)?;
                cycle.samples.push(Sample { t_s, power_dbm: dbm });
                cycle.wavelengths_nm.push(nm);
            }
        }

        for cycle in &mut cycles {
            cycle.launch_wavelength_nm = cycle.wavelengths_nm.first().copied().unwrap_or(0.0);
            cycle.stop_wavelength_nm = cycle.wavelengths_nm.last().copied().unwrap_or(0.0);
            cycle.duration_s = cycle.samples.last().map_or(0.0, |s| s.t_s);
        }

        info!(path = %path.display(), cycles = cycles.len(), "Result file loaded");
        Ok(cycles)
    }
}

#[cfg(feature = "storage_csv")]
fn check_header(header: &csv::StringRecord) -> AppResult<usize> {
    if header.is_empty() || header.len() % 3 != 0 {
        return Err(SweepError::malformed(
            1,
            format!("expected three columns per cycle, found {}", header.len()),
        ));
    }
    for (j, name) in header.iter().enumerate() {
        let expected = COLUMN_SUFFIXES[j % 3];
        let name = name.trim();
        let accepted =
            name.ends_with(expected) || (j % 3 == 1 && name.ends_with(LEGACY_WAVELENGTH_SUFFIX));
        if !accepted {
            return Err(SweepError::malformed(
                1,
                format!("column {} is '{}', expected '*_{}'", j + 1, name, expected),
            ));
        }
    }
    Ok(header.len() / 3)
}

#[cfg(feature = "storage_csv")]
fn parse_triple(fields: [&str; 3], line: usize, cycle: usize) -> AppResult<[f64; 3]> {
    let mut values = [0.0; 3];
    for (value, (field, suffix)) in values.iter_mut().zip(fields.iter().zip(COLUMN_SUFFIXES)) {
        *value = field.parse::<f64>().map_err(|_| {
            SweepError::malformed(
                line,
                format!("cycle {cycle} {suffix}: '{field}' is not a number"),
            )
        })?;
    }
    Ok(values)
}

/// Resolve a user-supplied save name.
///
/// Appends `.txt` unless the name already ends in `.txt` or `.TXT`. An empty
/// name becomes `lost_measurement_{unix seconds}.txt` inside `fallback_dir`.
pub fn normalize_save_path(name: &str, fallback_dir: &Path) -> PathBuf {
    let name = name.trim();
    if name.is_empty() {
        return fallback_dir.join(format!("lost_measurement_{}.txt", Utc::now().timestamp()));
    }
    if name.ends_with(".txt") || name.ends_with(".TXT") {
        PathBuf::from(name)
    } else {
        PathBuf::from(format!("{name}.txt"))
    }
}

/// Place a relative `path` in the directory of the last saved or loaded result.
///
/// Absolute paths, and any path when no last directory is known, are returned unchanged.
pub fn resolve_in_last_dir(path: PathBuf, storage: &StorageConfig) -> PathBuf {
    match &storage.last_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path,
    }
}

/// Directory for results saved without a name: the home directory, else the output directory
pub fn fallback_dir(storage: &StorageConfig) -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| storage.output_dir.clone())
}

/// Save `session` under a user-supplied name and return the path written
pub fn save(session: &SweepSession, name: &str, storage: &StorageConfig) -> AppResult<PathBuf> {
    let path = resolve_in_last_dir(normalize_save_path(name, &fallback_dir(storage)), storage);
    persist(session, &path)?;
    info!(path = %path.display(), "Measurement saved");
    Ok(path)
}
