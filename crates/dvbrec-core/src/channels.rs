//! Channel list resolution from a dvbv5 zap-format channel file.
//!
//! Each non-empty line describes one channel; the channel name is everything
//! before the first `:`.

use std::path::Path;

use crate::error::Result;

/// Extract channel names from the contents of a channel file, preserving
/// file order.
pub fn parse_channels(content: &str) -> Vec<String> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.split(':').next().unwrap_or(line).to_string())
        .collect()
}

/// Read and parse the channel file at `path`.
pub fn load_channels(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    let channels = parse_channels(&content);
    tracing::debug!(path = %path.display(), count = channels.len(), "channel list loaded");
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use std::io::Write;

    #[test]
    fn name_is_text_before_first_colon() {
        let channels = parse_channels("TF1:586000000:INVERSION_AUTO:BANDWIDTH_8_MHZ\n");
        assert_eq!(channels, vec!["TF1"]);
    }

    #[test]
    fn order_is_preserved_and_blank_lines_skipped() {
        let content = "France 2:1:2\n\nFrance 3:4:5\n   \nArte:6\n";
        assert_eq!(parse_channels(content), vec!["France 2", "France 3", "Arte"]);
    }

    #[test]
    fn line_without_colon_is_whole_name() {
        assert_eq!(parse_channels("LCP\n"), vec!["LCP"]);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "TF1:1").unwrap();
        writeln!(file, "M6:2").unwrap();
        let channels = load_channels(file.path()).unwrap();
        assert_eq!(channels, vec!["TF1", "M6"]);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_channels(Path::new("/nonexistent/channels.conf")).unwrap_err();
        assert!(matches!(err, CoreError::Io(_)));
    }
}
