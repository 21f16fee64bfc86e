//! Batch splitting: one received blob may hold thousands of independent
//! clinical items. HL7 batch files carry multiple `MSH` segments inside
//! optional `FHS`/`BHS`…`BTS`/`FTS` framing; FHIR inputs are
//! newline-delimited bundles.

use reportrelay_core::ReportFormat;

/// Splits raw blob content into independent items for per-item decoding.
/// Splitting never fails: content that cannot be framed comes back as one
/// item so the decoder can report a proper item-scoped error.
pub fn split_items(bytes: &[u8], format: ReportFormat) -> Vec<Vec<u8>> {
    match format {
        ReportFormat::Hl7 => split_hl7_batch(bytes),
        ReportFormat::Fhir => split_ndjson(bytes),
    }
}

fn split_hl7_batch(bytes: &[u8]) -> Vec<Vec<u8>> {
    let text = String::from_utf8_lossy(bytes);
    let mut items: Vec<Vec<String>> = Vec::new();
    let mut current: Option<Vec<String>> = None;

    for line in text.split(['\r', '\n']) {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let segment = &line[..line.len().min(3)];
        match segment {
            // Batch/file framing segments delimit, never belong to, items.
            "FHS" | "BHS" | "BTS" | "FTS" => {
                if let Some(item) = current.take() {
                    items.push(item);
                }
            }
            "MSH" => {
                if let Some(item) = current.take() {
                    items.push(item);
                }
                current = Some(vec![line.to_string()]);
            }
            _ => {
                if let Some(item) = current.as_mut() {
                    item.push(line.to_string());
                } else {
                    // Content before any MSH: surface it as its own item so
                    // the decode error names it.
                    items.push(vec![line.to_string()]);
                }
            }
        }
    }
    if let Some(item) = current.take() {
        items.push(item);
    }

    items
        .into_iter()
        .map(|segments| segments.join("\r").into_bytes())
        .collect()
}

fn split_ndjson(bytes: &[u8]) -> Vec<Vec<u8>> {
    let text = String::from_utf8_lossy(bytes);
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.as_bytes().to_vec())
        .collect()
}
