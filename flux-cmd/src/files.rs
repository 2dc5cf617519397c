//! Small file-naming helpers shared by the commands.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// A `CC-XXX` site code is always six characters with a dash third.
pub fn looks_like_site(code: &str) -> bool {
    code.len() == 6 && code.as_bytes().get(2) == Some(&b'-')
}

/// Collect the CSV files under a path: the file itself, or the sorted
/// `*.csv` entries of a directory.
pub fn collect_csv_files(path: &str) -> Result<Vec<PathBuf>> {
    let path = Path::new(path);
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut out = Vec::new();
    for entry in std::fs::read_dir(path)
        .with_context(|| format!("unable to read {}", path.display()))?
    {
        let entry = entry?;
        let p = entry.path();
        if p.extension().and_then(|e| e.to_str()) == Some("csv") {
            out.push(p);
        }
    }
    out.sort();
    Ok(out)
}

/// Parse `<SITE>_qca_meteo_<YEAR>.csv`.
pub fn parse_qca_meteo_name(name: &str) -> Option<(String, i32)> {
    let stem = name.strip_suffix(".csv")?;
    let rest = stem.get(6..)?.strip_prefix("_qca_meteo_")?;
    let site = &stem[..6];
    if !looks_like_site(site) {
        return None;
    }
    Some((site.to_string(), rest.parse().ok()?))
}

/// Parse `<SITE>_<YEAR>.csv` (the ERA naming).
pub fn parse_era_name(name: &str) -> Option<(String, i32)> {
    let stem = name.strip_suffix(".csv")?;
    if stem.len() != 11 {
        return None;
    }
    let site = &stem[..6];
    if !looks_like_site(site) || stem.as_bytes()[6] != b'_' {
        return None;
    }
    Some((site.to_string(), stem[7..].parse().ok()?))
}

/// Parse `<SITE>_<YEAR>_<AUTHOR>_<TYPE>.csv`.
pub fn parse_ure_name(name: &str) -> Option<(String, i32, String, String)> {
    let stem = name.strip_suffix(".csv")?;
    let site = stem.get(..6)?;
    if !looks_like_site(site) {
        return None;
    }
    let mut parts = stem.get(7..)?.split('_');
    let year: i32 = parts.next()?.parse().ok()?;
    let author = parts.next()?.to_string();
    let flux_type = parts.next()?.to_string();
    if parts.next().is_some() {
        return None;
    }
    Some((site.to_string(), year, author, flux_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qca_meteo_name() {
        assert_eq!(
            parse_qca_meteo_name("US-TST_qca_meteo_2010.csv"),
            Some(("US-TST".into(), 2010))
        );
        assert_eq!(parse_qca_meteo_name("US-TST_2010.csv"), None);
        assert_eq!(parse_qca_meteo_name("USTST1_qca_meteo_2010.csv"), None);
    }

    #[test]
    fn test_era_name() {
        assert_eq!(parse_era_name("US-TST_2010.csv"), Some(("US-TST".into(), 2010)));
        assert_eq!(parse_era_name("US-TST_qca_meteo_2010.csv"), None);
    }

    #[test]
    fn test_ure_name() {
        assert_eq!(
            parse_ure_name("US-TST_2010_NT_GPP.csv"),
            Some(("US-TST".into(), 2010, "NT".into(), "GPP".into()))
        );
        assert_eq!(parse_ure_name("US-TST_2010_NT.csv"), None);
    }
}
