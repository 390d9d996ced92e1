//! Data-item catalog parsing.
//!
//! A catalog arrives as CSV text, one item per line:
//! `key;description;value;units`. Only the key is used.

/// Extract the keys from a `;`-separated catalog. Blank lines and lines
/// with an empty first field are skipped.
pub fn parse_catalog_csv(csv: &str) -> Vec<String> {
    csv.lines()
        .filter_map(|line| line.split(';').next())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_owned)
        .collect()
}
