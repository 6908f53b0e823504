use std::path::Path;
use serde::de::DeserializeOwned;

/// Deserialize with JSON-path context in error messages, so a bad schema
/// points at e.g. `messages[2].fields[0].rule`.
pub fn from_str_with_path<T: DeserializeOwned>(src: &str) -> Result<T, String> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize::<_, T>(de).map_err(|err| {
        let path = err.path().to_string();
        format!("at JSON path {path} → {}", err.into_inner())
    })
}

/// Read and deserialize a JSON file; the error names both the file and the path.
pub fn from_file_with_path<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let src = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    from_str_with_path(&src).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))
}
