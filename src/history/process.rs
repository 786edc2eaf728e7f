//! One provenance-bearing processing step extracted from a `history_*`
//! attribute, plus the JSON-serializable record produced from it (spec
//! §4.11). Grounded on the Python prototype's `history.py::Process`.

use super::parser::{type_for_name, Dialect, Parser};
use chrono::NaiveDateTime;
use serde::Serialize;

/// One input dependency of a process, resolved either to another
/// process's `identifier` or to a bare `name` (with an optional
/// diagnostic message when the named process could not be found).
#[derive(Debug, Clone, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct InputRef {
    pub identifier: Option<String>,
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A provenance step parsed out of one `history_*`/`history_*_output`
/// attribute pair.
#[derive(Debug, Clone)]
pub struct Process {
    pub identifier: String,
    time: Option<NaiveDateTime>,
    parser_time: Option<NaiveDateTime>,
    name: Option<String>,
    pub text: String,
    pub output: Option<String>,
    pub parser_process: Option<String>,
    pub parser_name: Option<String>,
    pub parser_user: Option<String>,
    pub format: Dialect,
    pub data: Vec<(String, String)>,
    pub inputs: Vec<InputRef>,
    pub errors: Vec<String>,
    pub domain: Option<std::collections::BTreeMap<String, serde_json::Value>>,
    pub data_file: Option<DataFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataFile {
    pub name: String,
    pub date: String,
    pub fingerprint: String,
}

impl Process {
    pub fn new(
        timestamp: Option<NaiveDateTime>,
        name: Option<String>,
        identifier: String,
        text: String,
        output: Option<String>,
    ) -> Process {
        let parsed = Parser::parse(&text);
        let mut errors = parsed.errors.clone();
        let inputs = collect_inputs(&output, &parsed.inputs, &mut errors);

        Process {
            identifier,
            time: timestamp,
            parser_time: parsed.time,
            name,
            text,
            output,
            parser_process: parsed.process,
            parser_name: parsed.name,
            parser_user: parsed.user,
            format: parsed.format,
            data: parsed.data,
            inputs,
            errors,
            domain: None,
            data_file: None,
        }
    }

    /// The process's effective name: the one derived from the attribute
    /// key if present, else whatever the parsed text implies.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().or(self.parser_name.as_deref())
    }

    pub fn set_name(&mut self, name: String) {
        self.name = Some(name);
    }

    pub fn time(&self) -> Option<String> {
        self.time.or(self.parser_time).map(|t| format_time(&t))
    }

    /// The name-derived result type (e.g. `"Segmented_Data"`), used both
    /// to rank candidate processes and to sort the total order.
    pub fn result_type(&self) -> Option<String> {
        type_for_name(self.name())
    }

    pub fn log_error(&mut self, text: impl Into<String>) {
        self.errors.push(text.into());
    }

    /// Produces the serializable record for this process (one entry of
    /// the output provenance JSON array).
    pub fn record(&self) -> ProcessRecord {
        ProcessRecord {
            process: self.parser_process.clone(),
            data_type: self.result_type(),
            name: self.name().map(str::to_string),
            date: self.time(),
            identifier: self.identifier.clone(),
            run_by: self.parser_user.clone(),
            parameters: self.data.iter().cloned().collect(),
            predecessors: self.inputs.clone(),
            source_text: self.text.clone(),
            output_log: self.output.clone(),
            parse_errors: self.errors.clone(),
            domain: self.domain.clone(),
            data_file: self.data_file.clone(),
        }
    }
}

/// Total order matching the prototype's `Process.__cmp__`: compares, in
/// order, `(time, identifier, name, result_type, text, output)`.
impl PartialEq for Process {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}
impl Eq for Process {}

impl PartialOrd for Process {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Process {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl Process {
    fn sort_key(
        &self,
    ) -> (
        Option<NaiveDateTime>,
        String,
        Option<String>,
        Option<String>,
        String,
        Option<String>,
    ) {
        (
            self.time,
            self.identifier.clone(),
            self.name().map(str::to_string),
            self.result_type(),
            self.text.clone(),
            self.output.clone(),
        )
    }
}

fn format_time(t: &NaiveDateTime) -> String {
    t.and_utc().format("%Y/%m/%d %H:%M:%S UTC").to_string()
}

/// Scans a process's captured stdout/stderr for `input dataset ID:`
/// lines (referencing another process by its log identifier, excluding
/// the synthetic `UTC_`-prefixed ones) and combines them with the
/// name-based inputs the text parser found (spec §4.11's
/// `collect_inputs`).
fn collect_inputs(output: &Option<String>, parser_inputs: &[String], _errors: &mut [String]) -> Vec<InputRef> {
    let mut res = Vec::new();
    if let Some(output) = output {
        for line in output.lines() {
            let trimmed = line.trim_start();
            if let Some(rest) = trimmed.strip_prefix("input dataset ID: ") {
                if let Some(identifier) = rest.split_whitespace().next() {
                    if !identifier.starts_with("UTC_") {
                        res.push(InputRef {
                            identifier: Some(identifier.to_string()),
                            name: None,
                            message: None,
                        });
                    }
                }
            }
        }
    }
    for name in parser_inputs {
        res.push(InputRef {
            identifier: None,
            name: Some(name.clone()),
            message: None,
        });
    }
    res
}

/// The JSON shape of one process entry in the output provenance document.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessRecord {
    pub process: Option<String>,
    pub data_type: Option<String>,
    pub name: Option<String>,
    pub date: Option<String>,
    pub identifier: String,
    pub run_by: Option<String>,
    pub parameters: std::collections::BTreeMap<String, String>,
    pub predecessors: Vec<InputRef>,
    pub source_text: String,
    pub output_log: Option<String>,
    pub parse_errors: Vec<String>,
    pub domain: Option<std::collections::BTreeMap<String, serde_json::Value>>,
    pub data_file: Option<DataFile>,
}

/// Parses a `history_*` attribute key into `(timestamp, derived_name)`,
/// following the prototype's `%Y%m%d_%H%M%S`-style embedded identifier
/// convention.
pub fn parse_history_key_suffix(fields: &[&str]) -> (Option<NaiveDateTime>, Option<String>) {
    if fields.is_empty() {
        return (None, None);
    }
    if fields[0].chars().all(|c| c.is_ascii_digit()) && fields.len() >= 2 {
        let combined = format!("{}_{}", fields[0], fields[1]);
        let timestamp = NaiveDateTime::parse_from_str(&combined, "%Y%m%d_%H%M%S").ok();
        let rest = &fields[2..];
        let name = if rest.is_empty() {
            None
        } else {
            Some(strip_nc_suffix(&rest.join("_")))
        };
        (timestamp, name)
    } else {
        let name = if fields.is_empty() {
            None
        } else {
            Some(strip_nc_suffix(&fields.join("_")))
        };
        (None, name)
    }
}

fn strip_nc_suffix(s: &str) -> String {
    for suffix in ["_nc", ".nc", "?nc"] {
        if let Some(stripped) = s.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_inputs_ignores_utc_prefixed_identifiers() {
        let output = Some(
            "line one\ninput dataset ID: abc123 more text\ninput dataset ID: UTC_99999 skip\n"
                .to_string(),
        );
        let inputs = collect_inputs(&output, &[], &mut Vec::new());
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].identifier.as_deref(), Some("abc123"));
    }

    #[test]
    fn process_ordering_uses_time_then_identifier() {
        let p1 = Process::new(None, None, "a".into(), "".into(), None);
        let p2 = Process::new(None, None, "b".into(), "".into(), None);
        assert!(p1 < p2);
    }

    #[test]
    fn key_suffix_parses_embedded_timestamp() {
        let fields = ["20240102", "030405", "tomo", "recon"];
        let (time, name) = parse_history_key_suffix(&fields);
        assert!(time.is_some());
        assert_eq!(name.as_deref(), Some("tomo_recon"));
    }
}
