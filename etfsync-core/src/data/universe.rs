//! Instrument list loading.
//!
//! The list is an `etf.txt`-style file: one code per line, an optional
//! `code` header, blank lines and `#` comments ignored. Only the first
//! comma-separated column is read, so exported spreadsheets work as-is.

use crate::domain::{CodeError, InstrumentCode, InstrumentList};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UniverseError {
    #[error("instrument list not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("instrument list {} contains no codes", .0.display())]
    Empty(PathBuf),

    #[error("line {line}: {source}")]
    InvalidCode {
        line: usize,
        #[source]
        source: CodeError,
    },

    #[error("read instrument list {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Load, normalize and deduplicate the instrument list at `path`.
pub fn load_codes(path: &Path) -> Result<InstrumentList, UniverseError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(UniverseError::Missing(path.to_path_buf()))
        }
        Err(source) => {
            return Err(UniverseError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let list = parse_codes(&content)?;
    if list.is_empty() {
        return Err(UniverseError::Empty(path.to_path_buf()));
    }
    Ok(list)
}

/// Parse list content. An empty result is not an error here.
pub fn parse_codes(content: &str) -> Result<InstrumentList, UniverseError> {
    let mut codes = Vec::new();
    let mut seen_data = false;

    for (i, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim().trim_start_matches('\u{feff}');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let first = line.split(',').next().unwrap_or_default().trim();
        if !seen_data && first.eq_ignore_ascii_case("code") {
            continue;
        }
        seen_data = true;

        let code = InstrumentCode::parse(first).map_err(|source| UniverseError::InvalidCode {
            line: i + 1,
            source,
        })?;
        codes.push(code);
    }

    Ok(InstrumentList::new(codes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_header_comments_and_blank_lines() {
        let list = parse_codes("code\n510300\n\n# bond funds\n511010\n").unwrap();
        let codes: Vec<&str> = list.iter().map(|c| c.as_str()).collect();
        assert_eq!(codes, vec!["510300", "511010"]);
    }

    #[test]
    fn first_column_only_and_normalized() {
        let list = parse_codes("code,name\n1,平安银行\n159915,创业板ETF\n000001,dup\n").unwrap();
        let codes: Vec<&str> = list.iter().map(|c| c.as_str()).collect();
        assert_eq!(codes, vec!["000001", "159915"]);
    }

    #[test]
    fn invalid_code_reports_line() {
        let err = parse_codes("code\n510300\nABC\n").unwrap_err();
        assert!(matches!(err, UniverseError::InvalidCode { line: 3, .. }));
    }

    #[test]
    fn header_only_after_data_is_invalid() {
        assert!(parse_codes("510300\ncode\n").is_err());
    }

    #[test]
    fn missing_file_is_reported() {
        let path = std::env::temp_dir().join("etfsync_definitely_missing_list.txt");
        assert!(matches!(load_codes(&path), Err(UniverseError::Missing(_))));
    }

    #[test]
    fn empty_file_is_reported() {
        let path = std::env::temp_dir().join(format!(
            "etfsync_empty_list_{}.txt",
            std::process::id()
        ));
        std::fs::write(&path, "code\n\n").unwrap();
        assert!(matches!(load_codes(&path), Err(UniverseError::Empty(_))));
        let _ = std::fs::remove_file(&path);
    }
}
