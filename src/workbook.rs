use anyhow::Context;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
pub const WORKBOOK_FORMAT_V1: &str = "peereval-workbook-v1";
const SHEET_NAME_MAX: usize = 31;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }

    fn to_csv(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => csv_quote(s),
            Cell::Number(v) => v.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        for row in &self.rows {
            let line: Vec<String> = row.iter().map(Cell::to_csv).collect();
            out.push_str(&line.join(","));
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    /// Adds a sheet, adjusting the name to spreadsheet rules and keeping it
    /// unique within the workbook.
    pub fn push_sheet(&mut self, name: &str, rows: Vec<Vec<Cell>>) -> &Sheet {
        let taken: HashSet<String> = self
            .sheets
            .iter()
            .map(|s| s.name.to_ascii_lowercase())
            .collect();
        let name = unique_sheet_name(&sanitize_sheet_name(name), &taken);
        self.sheets.push(Sheet { name, rows });
        &self.sheets[self.sheets.len() - 1]
    }
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn sanitize_sheet_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('\'').trim();
    let cleaned: String = cleaned.chars().take(SHEET_NAME_MAX).collect();
    if cleaned.is_empty() {
        "Sheet".to_string()
    } else {
        cleaned
    }
}

fn unique_sheet_name(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(&base.to_ascii_lowercase()) {
        return base.to_string();
    }
    let mut n = 2usize;
    loop {
        let suffix = format!(" ({})", n);
        let keep = SHEET_NAME_MAX.saturating_sub(suffix.chars().count());
        let stem: String = base.chars().take(keep).collect();
        let candidate = format!("{}{}", stem.trim_end(), suffix);
        if !taken.contains(&candidate.to_ascii_lowercase()) {
            return candidate;
        }
        n += 1;
    }
}

fn entry_file_name(idx: usize, sheet_name: &str) -> String {
    let slug: String = sheet_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("sheets/{:02}-{}.csv", idx + 1, slug)
}

#[derive(Debug, Clone)]
pub struct WriteSummary {
    pub format: String,
    pub sheet_count: usize,
}

/// Writes the workbook as a zip of CSV sheets with a manifest carrying each
/// sheet's SHA-256.
pub fn write_workbook(workbook: &Workbook, out_path: &Path) -> anyhow::Result<WriteSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut sheet_entries = Vec::new();
    let mut payloads = Vec::new();
    for (i, sheet) in workbook.sheets.iter().enumerate() {
        let csv = sheet.to_csv();
        let digest = Sha256::digest(csv.as_bytes());
        let entry = entry_file_name(i, &sheet.name);
        sheet_entries.push(json!({
            "name": sheet.name,
            "entry": entry,
            "rows": sheet.rows.len(),
            "sha256": format!("{:x}", digest),
        }));
        payloads.push((entry, csv));
    }

    let manifest = json!({
        "format": WORKBOOK_FORMAT_V1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "sheets": sheet_entries,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    for (entry, csv) in payloads {
        zip.start_file(entry.as_str(), opts)
            .with_context(|| format!("failed to start entry {}", entry))?;
        zip.write_all(csv.as_bytes())
            .with_context(|| format!("failed to write entry {}", entry))?;
    }

    zip.finish().context("failed to finalize workbook")?;

    Ok(WriteSummary {
        format: WORKBOOK_FORMAT_V1.to_string(),
        sheet_count: workbook.sheets.len(),
    })
}
