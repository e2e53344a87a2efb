use clap::Parser;
use record_review_lib::commands::{get_field_suggestions, FieldSuggestionsPayload};
use record_review_lib::logging::init_logging;
use record_review_lib::types::{CandidateSet, TableExtraction};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "Rank cell values for one field of an extracted record", long_about = None)]
struct Args {
    /// Table extraction JSON for the page
    table: PathBuf,

    /// Record candidates JSON for the page
    candidates: PathBuf,

    /// Candidate position in the candidates file
    record: usize,

    /// Field to suggest values for, e.g. deceased_name
    field: String,

    /// Values already used by other fields
    #[arg(long = "used")]
    used: Vec<String>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    serde_json::from_str(&raw).map_err(|e| format!("{}: {}", path.display(), e))
}

fn run(args: Args) -> Result<(), String> {
    let table: TableExtraction = read_json(&args.table)?;
    let candidates: CandidateSet = read_json(&args.candidates)?;
    let candidate = candidates
        .candidates
        .get(args.record)
        .ok_or_else(|| format!("No candidate {} (file has {})", args.record, candidates.candidates.len()))?;

    let result = get_field_suggestions(FieldSuggestionsPayload {
        field_key: args.field,
        record_type: candidate.record_type,
        table_extraction: table,
        source_row_index: candidate.source_row_index,
        column_mapping: candidates.column_mapping.clone(),
        used_values: args.used,
    })?;
    let out = serde_json::to_string_pretty(&result).map_err(|e| e.to_string())?;
    println!("{}", out);
    Ok(())
}

fn main() {
    init_logging("warn,record_review_lib=info");
    if let Err(e) = run(Args::parse()) {
        tracing::error!(error = %e, "suggest_fields failed");
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
