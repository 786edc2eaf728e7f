//! Free-form provenance text parsing. The same `history_*` attribute text
//! can be written in one of two dialects — a block-structured form used by
//! the Mango reconstruction pipeline (`BeginSection`/`EndSection`), or a
//! flat `key: value` form used by standalone acquisition tools — and this
//! parser auto-detects which one it is looking at as it scans (spec
//! §4.10). Grounded on the Python prototype's `history.py::Parser`.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// A parsed value: either a leaf string, or a nested block (a Mango
/// section), preserving the order fields were first seen.
#[derive(Debug, Clone)]
pub enum Value {
    Text(String),
    Section(OrderedMap),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Section(_) => None,
        }
    }

    pub fn as_section(&self) -> Option<&OrderedMap> {
        match self {
            Value::Section(m) => Some(m),
            Value::Text(_) => None,
        }
    }
}

/// A string-keyed map that remembers insertion order, standing in for the
/// prototype's `OrderedDict` subclass.
#[derive(Debug, Clone, Default)]
pub struct OrderedMap {
    keys: Vec<String>,
    values: HashMap<String, Value>,
}

impl OrderedMap {
    pub fn new() -> OrderedMap {
        OrderedMap::default()
    }

    /// Inserts `value` at `key`, appending multiple same-key occurrences'
    /// text with a newline join (the prototype keeps them in a list and
    /// only joins in `post_process`; folding here keeps the model simple
    /// since every consumer eventually treats repeats as one blob of text).
    pub fn push(&mut self, key: String, value: Value) {
        if let Some(existing) = self.values.get_mut(&key) {
            if let (Value::Text(old), Value::Text(new)) = (existing, &value) {
                let joined = format!("{old}\n{new}");
                self.values.insert(key.clone(), Value::Text(joined));
                return;
            }
            self.values.insert(key, value);
        } else {
            self.keys.push(key.clone());
            self.values.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.keys.iter().map(move |k| (k.as_str(), &self.values[k]))
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Flattens nested sections into dotted keys, mirroring the
    /// prototype's `flatten()` helper used when descending into a
    /// selected Mango process block.
    pub fn flatten(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        self.flatten_into(None, &mut out);
        out
    }

    fn flatten_into(&self, prefix: Option<&str>, out: &mut Vec<(String, String)>) {
        for (key, value) in self.iter() {
            let key = key.replace('.', "_");
            let full = match prefix {
                Some(p) => format!("{p}.{key}"),
                None => key,
            };
            match value {
                Value::Text(s) => out.push((full, s.clone())),
                Value::Section(m) => m.flatten_into(Some(&full), out),
            }
        }
    }
}

/// Which text dialect a `Parser` ended up classifying its input as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Mango,
    Acquisition,
    Mixed,
}

static SECTION_START: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*BeginSection\b").unwrap());
static SECTION_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*EndSection\b").unwrap());
static MODULE_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*#+\s+Results\s+from\s+(module\s+)?<(.*)>\s*:").unwrap());
static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*(\w+)\s*[:=](.*)").unwrap());
static ASSIGNMENT_BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([-_.A-Z\s]*)([\(\[].+[\)\]])?\s*[:=](.+)").unwrap());
static ASSIGNMENT_EXPREM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*exprem\[\d+\]\s*:(.*)").unwrap());
static NAME_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z_]*[a-z]").unwrap());
static RUN_SECTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^Run(_\d+)?$").unwrap());
static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\W_]+").unwrap());

fn type_prefix_table() -> &'static [(&'static str, &'static str)] {
    &[
        ("Projection_Set", "proj"),
        ("Tomographic_Data", "tomo"),
        ("Tomographic_Data_Floating_Point", "tomo_float"),
        ("Tomographic_Data_Container", "cntr_tomo"),
        ("Segmented_Data", "segmented"),
        ("Distance_Map_Data", "distance_map"),
        ("Medial_Axis_Data", "medial_axis"),
        ("Label_Data", "labels"),
    ]
}

pub fn type_for_prefix(type_name: &str) -> Option<&'static str> {
    type_prefix_table()
        .iter()
        .find(|(k, _)| *k == type_name)
        .map(|(_, v)| *v)
}

pub fn prefix_for_type(prefix: &str) -> Option<&'static str> {
    type_prefix_table()
        .iter()
        .find(|(_, v)| *v == prefix)
        .map(|(k, _)| *k)
}

/// Resolves a result type (e.g. `"Segmented_Data"`) from a dataset name by
/// matching its lowercase-letter prefix against `PREFIX2TYPE`, falling
/// back to the raw matched prefix if it is unknown (spec §4.11's
/// `type_for_name`).
pub fn type_for_name(name: Option<&str>) -> Option<String> {
    let name = name?;
    let m = NAME_PREFIX.find(name)?;
    let prefix = m.as_str();
    Some(prefix_for_type(prefix).map(str::to_string).unwrap_or_else(|| prefix.to_string()))
}

/// Strips a trailing `_header` and `[._?]nc` shard suffix off a dataset
/// basename (spec §4.11's `stripped_name`).
pub fn stripped_name(path: &str) -> String {
    let base = std::path::Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path);
    let without_nc = Regex::new(r"[_.?]nc$").unwrap().replace(base, "");
    Regex::new(r"_header$")
        .unwrap()
        .replace(&without_nc, "")
        .into_owned()
}

/// The result of parsing one `history_*` attribute's text: the detected
/// dialect, the process-relevant fields extracted from it (`process`,
/// `name`, `user`, `inputs`, `data`), and any non-fatal parse errors
/// collected along the way.
pub struct Parser {
    pub format: Dialect,
    pub process: Option<String>,
    pub name: Option<String>,
    pub user: Option<String>,
    pub time: Option<chrono::NaiveDateTime>,
    pub inputs: Vec<String>,
    pub data: Vec<(String, String)>,
    pub errors: Vec<String>,
}

struct Scanner<'a> {
    lines: std::str::Lines<'a>,
}

impl Parser {
    pub fn parse(text: &str) -> Parser {
        let mut scanner = Scanner {
            lines: text.lines(),
        };
        let mut errors = Vec::new();
        let mut is_mango = false;
        let mut is_acquisition = false;

        let raw = parse_block(&mut scanner, true, &mut is_mango, &mut is_acquisition, &mut errors);

        let format = if is_mango {
            if is_acquisition {
                Dialect::Mixed
            } else {
                Dialect::Mango
            }
        } else {
            Dialect::Acquisition
        };

        let mut parser = Parser {
            format,
            process: None,
            name: None,
            user: None,
            time: None,
            inputs: Vec::new(),
            data: Vec::new(),
            errors,
        };

        if matches!(format, Dialect::Mango) {
            parser.analyse_mango(&raw);
        } else {
            parser.analyse_acquisition(&raw);
        }

        parser
    }

    fn analyse_mango(&mut self, raw: &OrderedMap) {
        let mut candidates: Vec<(&str, &OrderedMap)> = raw
            .iter()
            .filter_map(|(k, v)| v.as_section().map(|s| (k, s)))
            .filter(|(k, v)| {
                RUN_SECTION.is_match(k)
                    && v.get("enabled")
                        .and_then(Value::as_text)
                        .map(|s| s.to_lowercase() != "false")
                        .unwrap_or(true)
                    && v.get("Grid_Of_Images").is_none()
            })
            .collect();

        if candidates.is_empty() {
            let exclude = Regex::new(r"^(MPI|Input_Data_File|Output_Data_File)$").unwrap();
            candidates = raw
                .iter()
                .filter_map(|(k, v)| v.as_section().map(|s| (k, s)))
                .filter(|(k, _)| !exclude.is_match(k))
                .collect();
        }

        let run_section = match candidates.last() {
            Some((_, section)) => *section,
            None => {
                self.errors.push("No Mango run section found.".to_string());
                return;
            }
        };
        let run_section_name = candidates.last().unwrap().0;

        let data_type = run_section.get("input_data_type").and_then(Value::as_text);
        let prefix: Option<String> = if let Some(data_type) = data_type {
            match type_for_prefix(data_type) {
                Some(p) => Some(p.to_string()),
                None => {
                    self.errors
                        .push(format!("Unknown Mango type {data_type}."));
                    None
                }
            }
        } else {
            let nested = raw
                .iter()
                .filter_map(|(_, v)| v.as_section())
                .filter_map(|section| section.get("Input_Data_File").and_then(Value::as_section))
                .filter_map(|input| input.get("file_name_base").and_then(Value::as_text))
                .next()
                .map(str::to_string);
            if nested.is_some() {
                nested
            } else if RUN_SECTION.is_match(run_section_name) {
                self.errors
                    .push("No input prefix found in Mango section.".to_string());
                None
            } else {
                type_for_prefix(run_section_name).map(str::to_string)
            }
        };

        let mut inputs = Vec::new();
        if let Some(prefix) = &prefix {
            let suffix = run_section
                .get("suffix")
                .and_then(Value::as_text)
                .or_else(|| raw.get("file_name_suffix").and_then(Value::as_text))
                .unwrap_or("");
            inputs.push(format!("{prefix}{suffix}"));
        }

        let exclude = Regex::new(r"^(Input_Data_File|Output_Data_File)$").unwrap();
        let processes: Vec<&str> = run_section
            .iter()
            .filter(|(k, v)| v.as_section().is_some() && !exclude.is_match(k))
            .map(|(k, _)| k)
            .collect();
        if processes.is_empty() {
            self.errors.push("No Mango module name.".to_string());
        } else if processes.len() > 1 {
            self.errors.push("Multiple Mango module names.".to_string());
        }
        self.process = processes.first().map(|s| s.to_string());

        let empty = OrderedMap::new();
        let process_section = self
            .process
            .as_deref()
            .and_then(|p| run_section.get(p))
            .and_then(Value::as_section)
            .unwrap_or(&empty);

        let mut result = Vec::new();
        for (key, val) in process_section.flatten() {
            if key.ends_with("_file_name") {
                let base = std::path::Path::new(&val)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(&val)
                    .to_string();
                inputs.push(base);
            } else if key != "Input_Data_File.format" && key != "Output_Data_File.format" {
                result.push((key, val));
            }
        }

        let strip_nc = Regex::new(r"[_.?]nc$").unwrap();
        self.inputs = inputs
            .into_iter()
            .map(|n| strip_nc.replace(&n, "").into_owned())
            .collect();
        self.data = coerce_values(result);
    }

    fn analyse_acquisition(&mut self, raw: &OrderedMap) {
        let command = raw.get("COMMAND").and_then(Value::as_text).unwrap_or("");
        let args: Vec<&str> = command.split_whitespace().collect();
        self.process = args.first().map(|s| {
            std::path::Path::new(s)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(s)
                .to_string()
        });

        let nc_suffix = Regex::new(r"[._]nc/*$").unwrap();
        let files: Vec<String> = args[1.min(args.len())..]
            .iter()
            .filter(|name| nc_suffix.is_match(name))
            .map(|name| {
                let stripped = nc_suffix.replace(name, "");
                std::path::Path::new(stripped.as_ref())
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(&stripped)
                    .to_string()
            })
            .collect();
        self.inputs = if files.len() > 1 {
            files[..files.len() - 1].to_vec()
        } else {
            Vec::new()
        };
        self.name = files.last().cloned();
        self.user = raw.get("USER").and_then(Value::as_text).map(str::to_string);
        self.time = raw
            .get("DATE")
            .and_then(Value::as_text)
            .and_then(|date| chrono::NaiveDateTime::parse_from_str(date, "%a %b %e %H:%M:%S %Y").ok());

        let skip_keys = Regex::new(r"^(DATE|TIME|COMMAND|VERSION|USER|FUNCTION|RELEASE)$").unwrap();
        let skip_suffix = Regex::new(r"\.(DATE|TIME|VERSION|FAST_LOOPS)$").unwrap();
        let angle_quote = Regex::new(r"<([^<>]+)>").unwrap();
        let prog_prefix = self.process.as_ref().map(|p| format!("{p}."));

        let mut result = Vec::new();
        for (key, value) in raw.iter() {
            if skip_keys.is_match(key) || skip_suffix.is_match(key) {
                continue;
            }
            match value {
                Value::Section(section) => {
                    for (k, v) in flatten_with_prefix(key, section) {
                        result.push((k, v));
                    }
                }
                Value::Text(text) => {
                    let cleaned = angle_quote.replace_all(text, "'$1'").into_owned();
                    let final_key = match &prog_prefix {
                        Some(prefix) if key.starts_with(prefix.as_str()) => {
                            key[prefix.len()..].to_string()
                        }
                        _ => key.to_string(),
                    };
                    result.push((final_key, cleaned));
                }
            }
        }
        self.data = coerce_values(result);
    }
}

fn flatten_with_prefix(prefix: &str, section: &OrderedMap) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for (k, v) in section.flatten() {
        out.push((format!("{prefix}.{k}"), v));
    }
    out
}

/// Applies the prototype's `post_process` leaf-value coercion: a trailing
/// `.` is stripped, then the value is tried in order as sedecimal (`0x`
/// hex), octal (leading `0`), decimal integer, float, and single-quoted
/// string; anything that matches none of those is kept as plain text.
/// Empty results are dropped.
fn coerce_values(pairs: Vec<(String, String)>) -> Vec<(String, String)> {
    pairs
        .into_iter()
        .filter_map(|(key, val)| {
            let trimmed = val.strip_suffix('.').unwrap_or(&val);
            let coerced = coerce_one(trimmed);
            if coerced.is_empty() {
                None
            } else {
                Some((key, coerced))
            }
        })
        .collect()
}

fn coerce_one(s: &str) -> String {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if let Ok(v) = i64::from_str_radix(hex, 16) {
            return v.to_string();
        }
    }
    if s.starts_with('0') && s.len() > 1 && s.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(v) = i64::from_str_radix(&s[1..], 8) {
            return v.to_string();
        }
    }
    if let Ok(v) = s.parse::<i64>() {
        return v.to_string();
    }
    if let Ok(v) = s.parse::<f64>() {
        return v.to_string();
    }
    if s.len() >= 2 && s.starts_with('\'') && s.ends_with('\'') {
        return s[1..s.len() - 1].trim().to_string();
    }
    s.to_string()
}

/// Recursively parses a block of lines. `within_section` is true when
/// parsing inside a `BeginSection`/`EndSection` pair (the Mango form);
/// false at the top level, where an assignment line instead starts a new
/// "current" context that subsequent indented lines attach to.
fn parse_block(
    scanner: &mut Scanner,
    top_level: bool,
    is_mango: &mut bool,
    is_acquisition: &mut bool,
    errors: &mut Vec<String>,
) -> OrderedMap {
    let mut map = OrderedMap::new();
    let mut current: Option<String> = None;
    let mut in_messages = false;

    while let Some(line) = scanner.lines.next() {
        if line.trim().is_empty() {
            continue;
        }

        if SECTION_END.is_match(line) && !top_level {
            return map;
        }

        if SECTION_START.is_match(line) {
            *is_mango = true;
            let name = line.split_whitespace().nth(1).unwrap_or("section").to_string();
            let section = parse_block(scanner, false, is_mango, is_acquisition, errors);
            map.push(name, Value::Section(section));
            continue;
        }

        let first_non_space = line.trim_start();
        if first_non_space.starts_with('#') {
            if in_messages {
                if let Some(caps) = MODULE_START.captures(line) {
                    *is_acquisition = true;
                    let raw_name = caps.get(2).map(|m| m.as_str()).unwrap_or("");
                    current = Some(NON_WORD.replace_all(raw_name, "_").into_owned());
                }
            }
            continue;
        }

        if first_non_space.starts_with('-') && first_non_space == line.trim_start() && line.starts_with('-') {
            *is_acquisition = true;
            continue;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            let trimmed = line.trim();
            if let Some(current_key) = &current {
                if in_messages {
                    if let Some((k, v)) = parse_assignment(trimmed, is_acquisition, *is_mango) {
                        map.push(format!("{current_key}.{k}"), Value::Text(v));
                    } else {
                        map.push(format!("{current_key}.COMMENTS"), Value::Text(trimmed.to_string()));
                    }
                } else {
                    map.push(current_key.clone(), Value::Text(trimmed.to_string()));
                }
            } else {
                map.push("__COMMENTS__".to_string(), Value::Text(trimmed.to_string()));
            }
            continue;
        }

        if let Some((key, val)) = parse_assignment(line, is_acquisition, *is_mango) {
            let key = key.replace(' ', "_");
            in_messages = key == "MESSAGES";
            current = Some(key.clone());
            map.push(key, Value::Text(val));
        }
    }

    if !top_level {
        errors.push("Matching 'EndSection' is missing.".to_string());
    }
    map
}

/// Tries the acquisition-style `key: value` / `key = value` assignment
/// forms; falls back to whitespace-splitting (the Mango leaf-assignment
/// form) only once the dialect has already been pinned as acquisition.
fn parse_assignment(line: &str, is_acquisition: &mut bool, is_mango: bool) -> Option<(String, String)> {
    if let Some(caps) = ASSIGNMENT.captures(line) {
        *is_acquisition = true;
        let key = caps.get(1)?.as_str().to_uppercase();
        let val = caps.get(2)?.as_str().trim().to_string();
        return Some((key, val));
    }

    if let Some(caps) = ASSIGNMENT_BRACKETED.captures(line) {
        *is_acquisition = true;
        let raw_key = caps.get(1).map(|m| m.as_str()).unwrap_or("").trim();
        let key = NON_WORD.replace_all(raw_key, "_").into_owned();
        let bracket = caps
            .get(2)
            .map(|m| m.as_str().trim())
            .unwrap_or("");
        let body = caps.get(3)?.as_str();
        let val = format!("{body} {bracket}").trim().to_string();
        return Some((key, val));
    }

    if let Some(caps) = ASSIGNMENT_EXPREM.captures(line) {
        *is_acquisition = true;
        let val = caps.get(1)?.as_str().trim().to_string();
        return Some(("COMMENTS".to_string(), val));
    }

    if !*is_acquisition || is_mango {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            return None;
        }
        return Some((fields[0].to_string(), fields[1..].join(" ")));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_mango_dialect_from_sections() {
        let text = "BeginSection Run\n  enabled yes\n  BeginSection Segment\n    suffix _seg\n  EndSection\nEndSection\n";
        let parser = Parser::parse(text);
        assert_eq!(parser.format, Dialect::Mango);
    }

    #[test]
    fn detects_acquisition_dialect_from_key_value_lines() {
        let text = "COMMAND: recon tomo_data.nc output_vol.nc\nUSER: alice\nDATE: Mon Jan  1 00:00:00 2024\n";
        let parser = Parser::parse(text);
        assert_eq!(parser.format, Dialect::Acquisition);
        assert_eq!(parser.process.as_deref(), Some("recon"));
        assert_eq!(parser.name.as_deref(), Some("output_vol"));
        assert_eq!(parser.inputs, vec!["tomo_data".to_string()]);
        assert_eq!(parser.user.as_deref(), Some("alice"));
        assert_eq!(
            parser.time,
            Some(
                chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            )
        );
    }

    #[test]
    fn parse_assignment_tries_bracketed_key_pattern() {
        let mut is_acquisition = false;
        let result = parse_assignment("X-RAY ENERGY (keV): 30", &mut is_acquisition, false);
        assert_eq!(result, Some(("X_RAY_ENERGY".to_string(), "30 (keV)".to_string())));
        assert!(is_acquisition);
    }

    #[test]
    fn parse_assignment_tries_exprem_comment_pattern() {
        let mut is_acquisition = false;
        let result = parse_assignment("exprem[3]: operator note", &mut is_acquisition, false);
        assert_eq!(result, Some(("COMMENTS".to_string(), "operator note".to_string())));
        assert!(is_acquisition);
    }

    #[test]
    fn post_process_coerces_hex_octal_int_float_and_quoted_string() {
        assert_eq!(coerce_one("0x1F"), "31");
        assert_eq!(coerce_one("010"), "8");
        assert_eq!(coerce_one("42"), "42");
        assert_eq!(coerce_one("3.5"), "3.5");
        assert_eq!(coerce_one("'hello world'"), "hello world");
        assert_eq!(coerce_one("plain text"), "plain text");
    }

    #[test]
    fn stripped_name_removes_header_and_nc_suffixes() {
        assert_eq!(stripped_name("/data/tomo_vol_header.nc"), "tomo_vol");
        assert_eq!(stripped_name("tomo_vol.nc"), "tomo_vol");
    }

    #[test]
    fn type_for_name_resolves_known_prefix() {
        assert_eq!(type_for_name(Some("segmented_data")), Some("Segmented_Data".to_string()));
        assert_eq!(type_for_name(None), None);
    }
}
