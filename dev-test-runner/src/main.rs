//! Round-trips every fixture case under `demos/` (or the given patterns):
//! resolve the schema, build the value from JSON, encode, compare against
//! the expected bytes when given, decode, compare against the value.
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use colored::Colorize;
use serde::Deserialize;

use protoplan::{FramingMode, RawSchema, SchemaCodec};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Case {
    /// Schema file, relative to the case file.
    schema: PathBuf,
    message: String,
    value: serde_json::Value,
    #[serde(default)]
    expected: Option<Vec<u8>>,
    #[serde(default)]
    length_delimited: bool,
}

fn main() -> anyhow::Result<()> {
    let patterns = std::env::args().skip(1).collect::<Vec<_>>();
    let patterns = if patterns.is_empty() {
        vec!["demos/*.case.json".to_string()]
    } else {
        patterns
    };

    let mut failed = 0usize;
    let mut total = 0usize;
    for pattern in &patterns {
        for entry in glob::glob(pattern)? {
            let path = entry?;
            total += 1;
            match run_case(&path) {
                Ok(len) => println!("{} {} ({len} bytes)", "✅ pass".green().bold(), path.display()),
                Err(error) => {
                    failed += 1;
                    println!("{} {}: {error:#}", "❌ fail".red().bold(), path.display());
                }
            }
        }
    }

    println!("{} / {} cases passed", total - failed, total);
    if failed > 0 {
        bail!("{failed} case(s) failed");
    }
    Ok(())
}

fn run_case(path: &Path) -> anyhow::Result<usize> {
    let case: Case = protoplan::path_de::from_file_with_path(path)?;
    let schema_path = path.parent().unwrap_or(Path::new(".")).join(&case.schema);
    let raw: RawSchema = protoplan::path_de::from_file_with_path(&schema_path)?;
    let schema = protoplan::resolve(&raw)
        .with_context(|| format!("resolving {}", schema_path.display()))?;
    let id = schema
        .find_message(&case.message)
        .with_context(|| format!("no message `{}`", case.message))?;

    let framing = if case.length_delimited {
        FramingMode::LengthDelimited
    } else {
        FramingMode::Unbounded
    };
    let codec = SchemaCodec::with_framing(&schema, framing);
    let value = protoplan::value::from_json(&schema, id, &case.value)?;
    let mut bytes = Vec::new();
    if case.length_delimited {
        codec.encode_length_delimited(&value, &mut bytes)?;
    } else {
        codec.encode(&value, &mut bytes)?;
    }

    if let Some(expected) = &case.expected {
        if &bytes != expected {
            bail!("encoded {bytes:?}, expected {expected:?}");
        }
    }

    let decoded = codec.decode_message(id, &bytes)?;
    if decoded != value {
        let got = protoplan::value::to_json(&schema, &decoded);
        bail!("round trip changed the value: {got}");
    }
    Ok(bytes.len())
}
