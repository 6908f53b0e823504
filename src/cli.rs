//! CLI: schema JSON → (plan dump | encode | decode)
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use rayon::prelude::*;
use serde_json::{Map, Value as Json, json};

use crate::assemble::{FramingMode, assemble_encoder};
use crate::codec::SchemaCodec;
use crate::raw::RawSchema;
use crate::schema::{MessageId, Schema};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// resolve protobuf-style schemas, print their wire codec plans, and encode/decode messages
#[derive(Parser, Debug)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// resolve and print every message's codec plans as JSON
    Plan(PlanOut),
    /// encode a JSON value as a binary message
    Encode(EncodeOut),
    /// decode a binary message and print it as JSON
    Decode(DecodeOut),
}

#[derive(Args, Debug, Clone)]
struct InputSettings {
    /// One or more schema JSON files. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

#[derive(clap::Parser, Debug)]
struct PlanOut {
    #[command(flatten)]
    input_settings: InputSettings,

    /// output .json file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(clap::Parser, Debug)]
struct EncodeOut {
    #[command(flatten)]
    input_settings: InputSettings,

    /// dotted full name of the message, e.g. `Outer.Inner`
    #[arg(long)]
    message: String,

    /// JSON file holding the value
    #[arg(long)]
    value: PathBuf,

    /// prefix the output with its varint byte length
    #[arg(long, default_value_t = false)]
    length_delimited: bool,

    /// output binary file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(clap::Parser, Debug)]
struct DecodeOut {
    #[command(flatten)]
    input_settings: InputSettings,

    /// dotted full name of the message, e.g. `Outer.Inner`
    #[arg(long)]
    message: String,

    /// binary input file
    #[arg(long)]
    data: PathBuf,

    #[arg(long, value_enum, default_value_t = Framing::Unbounded)]
    framing: Framing,

    /// output .json file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Unbounded,
    LengthDelimited,
}

impl From<Framing> for FramingMode {
    fn from(f: Framing) -> Self {
        match f {
            Framing::Unbounded => FramingMode::Unbounded,
            Framing::LengthDelimited => FramingMode::LengthDelimited,
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl InputSettings {
    /// Resolve every input in parallel; results keep the input order.
    fn load_schemas(&self) -> anyhow::Result<Vec<(PathBuf, Schema)>> {
        let source_paths = resolve_file_path_patterns(&self.input)
            .context("failed to resolve input file paths")?;
        let results = source_paths
            .par_iter()
            .map(|path| load_schema(path).map(|schema| (path.clone(), schema)))
            .collect::<Vec<_>>();
        let mut out = Vec::with_capacity(results.len());
        for result in results {
            let (path, schema) = result?;
            eprintln!("{} {}", "resolved".green().bold(), path.display());
            out.push((path, schema));
        }
        Ok(out)
    }

    /// First schema, in input order, that declares `message`.
    fn find_message<'a>(
        schemas: &'a [(PathBuf, Schema)],
        message: &str,
    ) -> anyhow::Result<(&'a Schema, MessageId)> {
        schemas
            .iter()
            .find_map(|(_, s)| s.find_message(message).map(|id| (s, id)))
            .with_context(|| format!("no input declares message `{message}`"))
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }
    pub fn run(&self) -> anyhow::Result<()> {
        match &self.cmd {
            Command::Plan(target) => {
                let schemas = target.input_settings.load_schemas()?;
                let mut doc = Map::new();
                for (path, schema) in &schemas {
                    doc.insert(path.to_string_lossy().to_string(), plans_json(schema));
                }
                let src = serde_json::to_string_pretty(&Json::Object(doc))?;
                write_output(target.out.as_deref(), src.as_bytes())
            }
            Command::Encode(target) => {
                let schemas = target.input_settings.load_schemas()?;
                let (schema, id) = InputSettings::find_message(&schemas, &target.message)?;
                let source = crate::path_de::from_file_with_path::<Json>(&target.value)?;
                let value = crate::value::from_json(schema, id, &source)
                    .with_context(|| format!("invalid value in {}", target.value.display()))?;

                let codec = SchemaCodec::new(schema);
                let mut bytes = Vec::new();
                if target.length_delimited {
                    codec.encode_length_delimited(&value, &mut bytes)?;
                } else {
                    codec.encode(&value, &mut bytes)?;
                }
                eprintln!(
                    "{} {} ({} bytes)",
                    "encoded".green().bold(),
                    target.message,
                    bytes.len()
                );
                write_output(target.out.as_deref(), &bytes)
            }
            Command::Decode(target) => {
                let schemas = target.input_settings.load_schemas()?;
                let (schema, id) = InputSettings::find_message(&schemas, &target.message)?;
                let data = std::fs::read(&target.data)
                    .with_context(|| format!("failed to read {}", target.data.display()))?;

                let codec = SchemaCodec::with_framing(schema, target.framing.into());
                let value = match codec.decode_message(id, &data) {
                    Ok(x) => x,
                    Err(error) => {
                        eprintln!("{} {}: {error}", "failed".red().bold(), target.data.display());
                        bail!(error);
                    }
                };
                let src = serde_json::to_string_pretty(&crate::value::to_json(schema, &value))?;
                write_output(target.out.as_deref(), src.as_bytes())
            }
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn load_schema(path: &Path) -> anyhow::Result<Schema> {
    let raw = crate::path_de::from_file_with_path::<RawSchema>(path)?;
    crate::resolve::resolve(&raw).with_context(|| format!("failed to resolve {}", path.display()))
}

/// Per message: options plus the encoder's field plans, in declaration order.
fn plans_json(schema: &Schema) -> Json {
    let mut messages = Map::new();
    for (id, m) in schema.messages() {
        let encoder = assemble_encoder(schema, id);
        let fields = encoder
            .plans
            .iter()
            .map(|p| crate::plan::to_json(schema, p))
            .collect::<Vec<_>>();
        messages.insert(m.full_name.clone(), json!({
            "ident": m.ident,
            "kind": m.options.kind,
            "external": m.options.external,
            "preserve_unknown": m.options.preserve_unknown,
            "fields": fields,
        }));
    }
    Json::Object(messages)
}

fn write_output(out: Option<&Path>, bytes: &[u8]) -> anyhow::Result<()> {
    match out {
        Some(out) => {
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(out, bytes).with_context(|| format!("failed to write {}", out.display()))
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(bytes)?;
            if !bytes.ends_with(b"\n") && std::str::from_utf8(bytes).is_ok() {
                stdout.write_all(b"\n")?;
            }
            Ok(())
        }
    }
}

fn resolve_file_path_patterns<I>(patterns: I) -> anyhow::Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'['))
    }

    let mut out = Vec::<PathBuf>::new();

    for raw in patterns {
        let pattern = raw.as_ref();

        if has_glob_chars(pattern) {
            let mut matched_any = false;
            for entry in glob::glob(pattern)? {
                out.push(entry?);
                matched_any = true;
            }
            if !matched_any {
                bail!("glob pattern matched no files: {pattern}");
            }
        } else {
            out.push(PathBuf::from(pattern));
        }
    }

    Ok(out)
}
