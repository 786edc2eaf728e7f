//! C11: provenance assembly — collects every `history_*` attribute off a
//! parsed header into a totally ordered list of `Process` records, links
//! each process's inputs to its predecessors, picks the "main" process the
//! dataset itself represents, and attaches domain geometry to it (spec
//! §4.11). Grounded on the Python prototype's `history.py::History`.

use super::parser::{stripped_name, type_for_name};
use super::process::{parse_history_key_suffix, DataFile, Process};
use crate::error::Result;
use crate::nc3::types::{AttributeValue, Header};
use regex::Regex;
use std::collections::HashMap;

pub struct History {
    pub name: Option<String>,
    pub processes: Vec<Process>,
    name_index: HashMap<Option<String>, usize>,
    id_index: HashMap<String, usize>,
}

impl History {
    /// Builds the full provenance graph for `header`, whose dataset is
    /// named `name` (the path the shard was read from) with file
    /// modification time `creation_time` and content `fingerprint`.
    pub fn build(
        header: &Header,
        name: Option<&str>,
        creation_time: chrono::NaiveDateTime,
        fingerprint: &str,
    ) -> History {
        let attributes = extract_attributes(header);
        let mut processes = extract_processes(&attributes);
        resolve_inputs(&mut processes);

        let name_index = build_name_index(&mut processes);
        let id_index = build_id_index(&mut processes);

        let mut history = History {
            name: name.map(str::to_string),
            processes,
            name_index,
            id_index,
        };

        if let Some(main_idx) = history.main_process_index() {
            let domain = extract_domain(&attributes);
            let data_file = name.map(|n| DataFile {
                name: stripped_name(n),
                date: creation_time.and_utc().format("%Y/%m/%d %H:%M:%S UTC").to_string(),
                fingerprint: fingerprint.to_string(),
            });
            let main = &mut history.processes[main_idx];
            main.domain = Some(domain);
            if main.name().is_none() {
                if let Some(df) = &data_file {
                    main.set_name(df.name.clone());
                }
            }
            main.data_file = data_file;
        }

        history
    }

    /// Looks `name` up in the name index built once in [`History::build`]
    /// (spec §4.11 step 4: duplicate names are flagged on the owning
    /// process at index-build time, not re-checked on every lookup).
    fn process_by_name(&self, name: &str) -> Option<usize> {
        self.name_index.get(&Some(name.to_string())).copied()
    }

    fn process_by_id(&self, identifier: &str) -> Option<usize> {
        self.id_index.get(identifier).copied()
    }

    fn find_process(&self, input: &super::process::InputRef) -> Option<usize> {
        if let Some(id) = &input.identifier {
            self.process_by_id(id)
        } else if let Some(name) = &input.name {
            self.process_by_name(name)
        } else {
            None
        }
    }

    /// Selects the process that best represents this dataset itself,
    /// following the prototype's `main_process`: prefer a process whose
    /// name matches the dataset's own stripped name; otherwise pick the
    /// most recent process not referenced as another process's input,
    /// preferring one whose result type matches the dataset name's
    /// implied type.
    fn main_process_index(&self) -> Option<usize> {
        if let Some(name) = &self.name {
            let stripped = stripped_name(name);
            if let Some(idx) = self.process_by_name(&stripped) {
                return Some(idx);
            }
        }

        let mut used = vec![false; self.processes.len()];
        for p in &self.processes {
            for q in &p.inputs {
                if let Some(r_idx) = self.find_process(q) {
                    if self.processes[r_idx].identifier != p.identifier {
                        used[r_idx] = true;
                    }
                }
            }
        }

        let mut eligible: Vec<usize> = (0..self.processes.len()).filter(|&i| !used[i]).collect();
        eligible.sort_by(|&a, &b| self.processes[a].cmp(&self.processes[b]));
        eligible.reverse();

        let target_type = self.name.as_deref().map(stripped_name).and_then(|n| type_for_name(Some(&n)));
        if let Some(&idx) = eligible
            .iter()
            .find(|&&i| self.processes[i].result_type() == target_type)
        {
            return Some(idx);
        }
        eligible.first().copied()
    }

    pub fn as_records(&self) -> Vec<super::process::ProcessRecord> {
        self.processes.iter().map(Process::record).collect()
    }

    /// Serializes every process record as the output provenance document:
    /// a JSON array, keys sorted, 4-space indented (spec §4.11).
    pub fn to_json(&self) -> Result<String> {
        let records = self.as_records();
        let values: Vec<serde_json::Value> = records
            .iter()
            .map(|r| serde_json::to_value(r).map(sort_keys))
            .collect::<std::result::Result<_, _>>()?;
        Ok(serde_json::to_string_pretty(&values)?)
    }
}

fn sort_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: std::collections::BTreeMap<String, serde_json::Value> =
                map.into_iter().map(|(k, v)| (k, sort_keys(v))).collect();
            serde_json::json!(sorted)
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Collects every attribute visible to provenance extraction: global
/// attributes plus the attributes of any 3-D, non-degenerate variable,
/// first occurrence wins (spec §4.11's `extract_attributes`).
fn extract_attributes(header: &Header) -> HashMap<String, AttributeValue> {
    let mut result = HashMap::new();
    for attr in &header.attributes {
        result.entry(attr.name.clone()).or_insert_with(|| attr.value.clone());
    }
    for var in &header.variables {
        if var.dimensions.len() == 3 && var.dimensions[0].value > 1 {
            for attr in &var.attributes {
                result.entry(attr.name.clone()).or_insert_with(|| attr.value.clone());
            }
        }
    }
    result
}

/// Scans `attributes` for `history_*` keys (skipping their paired
/// `*_output` companions, which are consumed alongside the main key) and
/// builds one `Process` per match, returned in the prototype's total
/// order (spec §4.11's `extract_processes`).
fn extract_processes(attributes: &HashMap<String, AttributeValue>) -> Vec<Process> {
    let history_key = Regex::new(r"^history_").unwrap();
    let identifier_strip = Regex::new(r"^history_+(UTC_+)?").unwrap();

    let mut result = Vec::new();
    let mut keys: Vec<&String> = attributes.keys().collect();
    keys.sort();

    for key in keys {
        if !history_key.is_match(key) {
            continue;
        }
        let trimmed = key.trim();
        let fields: Vec<&str> = trimmed.split('_').filter(|s| !s.is_empty()).collect();
        if fields.last() == Some(&"output") {
            continue;
        }

        let identifier = identifier_strip.replace(key, "").into_owned();

        let rest = if fields.len() > 1 && fields[1] == "UTC" {
            &fields[2..]
        } else {
            &fields[1..]
        };

        let (timestamp, name) = parse_history_key_suffix(rest);

        let text = attributes
            .get(key)
            .and_then(AttributeValue::as_text)
            .unwrap_or_default();
        let output = attributes
            .get(&format!("{key}_output"))
            .and_then(AttributeValue::as_text);

        result.push(Process::new(timestamp, name, identifier, text, output));
    }

    result.sort();
    result
}

/// Builds the name → process-index lookup used by [`History::process_by_name`],
/// logging a "Duplicate name within history." error on every process
/// whose name collides with one already indexed (spec §4.11 step 4).
fn build_name_index(processes: &mut [Process]) -> HashMap<Option<String>, usize> {
    let mut index: HashMap<Option<String>, usize> = HashMap::new();
    for i in 0..processes.len() {
        let name = processes[i].name().map(str::to_string);
        if index.contains_key(&name) {
            processes[i].log_error("Duplicate name within history.");
        } else {
            index.insert(name, i);
        }
    }
    index
}

/// Builds the identifier → process-index lookup used by
/// [`History::process_by_id`], logging a "Duplicate identifier within
/// history." error on every process whose identifier collides with one
/// already indexed (spec §4.11 step 4).
fn build_id_index(processes: &mut [Process]) -> HashMap<String, usize> {
    let mut index: HashMap<String, usize> = HashMap::new();
    for i in 0..processes.len() {
        let id = processes[i].identifier.clone();
        if index.contains_key(&id) {
            processes[i].log_error("Duplicate identifier within history.");
        } else {
            index.insert(id, i);
        }
    }
    index
}

/// For every process, resolves its raw `inputs` (bare names or captured
/// log identifiers) against the other processes in the set: a name that
/// matches another process becomes that process's identifier instead; a
/// name with no match is kept as a name with a diagnostic `message` (spec
/// §4.11's `resolve_inputs`).
fn resolve_inputs(processes: &mut Vec<Process>) {
    let snapshot: Vec<(String, Option<String>, Vec<super::process::InputRef>)> = processes
        .iter()
        .map(|p| (p.identifier.clone(), p.name().map(str::to_string), p.inputs.clone()))
        .collect();

    let find = |entry: &super::process::InputRef| -> Option<(String, Option<String>)> {
        if let Some(id) = &entry.identifier {
            snapshot
                .iter()
                .find(|(pid, _, _)| pid == id)
                .map(|(pid, pname, _)| (pid.clone(), pname.clone()))
        } else if let Some(name) = &entry.name {
            snapshot
                .iter()
                .find(|(_, pname, _)| pname.as_deref() == Some(name.as_str()))
                .map(|(pid, pname, _)| (pid.clone(), pname.clone()))
        } else {
            None
        }
    };

    for (idx, process) in processes.iter_mut().enumerate() {
        let own_id = snapshot[idx].0.clone();
        let mut names: Vec<String> = Vec::new();
        let mut idents: Vec<String> = Vec::new();

        for entry in &snapshot[idx].2 {
            if let Some(id) = &entry.identifier {
                if !idents.contains(id) {
                    idents.push(id.clone());
                }
            } else if let Some(name) = &entry.name {
                match find(entry) {
                    None => {
                        if !names.contains(name) {
                            names.push(name.clone());
                        }
                    }
                    Some((pred_id, _)) if pred_id != own_id => {
                        if !idents.contains(&pred_id) {
                            idents.push(pred_id);
                        }
                    }
                    _ => {}
                }
            }
        }

        let mut resolved: Vec<super::process::InputRef> = names
            .into_iter()
            .map(|name| super::process::InputRef {
                identifier: None,
                name: Some(name),
                message: Some("History entry missing".to_string()),
            })
            .collect();
        resolved.extend(idents.into_iter().map(|id| super::process::InputRef {
            identifier: Some(id),
            name: None,
            message: None,
        }));
        process.inputs = resolved;
    }
}

fn set_xyz(result: &mut std::collections::BTreeMap<String, serde_json::Value>, name: &str, vec: &[f64]) {
    if vec.len() >= 3 {
        for (i, axis) in ["x", "y", "z"].iter().enumerate() {
            result.insert(format!("{name}_{axis}"), serde_json::json!(vec[i]));
        }
    }
}

/// Extracts a dataset's physical domain geometry (size, origin, voxel
/// size/unit) from its collected attributes, normalizing millimeter and
/// micrometer unit spellings down to `"micron"` (spec §4.11's
/// `extract_domain`).
fn extract_domain(attributes: &HashMap<String, AttributeValue>) -> std::collections::BTreeMap<String, serde_json::Value> {
    let mut result = std::collections::BTreeMap::new();

    let floats = |key: &str| attributes.get(key).and_then(AttributeValue::as_floats);

    if let Some(t) = floats("total_grid_size").or_else(|| floats("total_grid_size_xyz")) {
        set_xyz(&mut result, "domain_size", &t);
    }
    if let Some(t) = floats("coordinate_origin").or_else(|| floats("coordinate_origin_xyz")) {
        set_xyz(&mut result, "domain_origin", &t);
    }

    let mut voxel_size = floats("voxel_size").or_else(|| floats("voxel_size_xyz"));
    let mut voxel_unit = attributes
        .get("voxel_unit")
        .and_then(AttributeValue::as_text)
        .unwrap_or_default();

    let mm = Regex::new(r"^(mm|millimet(re|er))$").unwrap();
    let micron = Regex::new(r"^micro(metre|meter|n)$").unwrap();
    if mm.is_match(&voxel_unit) {
        voxel_unit = "micron".to_string();
        voxel_size = voxel_size.map(|v| v.into_iter().map(|x| x * 1000.0).collect());
    } else if micron.is_match(&voxel_unit) {
        voxel_unit = "micron".to_string();
    }

    if let Some(v) = voxel_size {
        set_xyz(&mut result, "voxel_size", &v);
    }
    if !voxel_unit.is_empty() {
        result.insert("voxel_unit".to_string(), serde_json::json!(voxel_unit));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nc3::types::{Attribute, Dimension, NcType, Variable};
    use std::rc::Rc;

    fn header_with_history(entries: &[(&str, &str)]) -> Header {
        let attributes = entries
            .iter()
            .map(|(k, v)| Attribute {
                name: k.to_string(),
                value: AttributeValue::Text(v.as_bytes().to_vec()),
            })
            .collect();
        Header {
            num_records: 0,
            dimensions: vec![],
            attributes,
            variables: vec![],
            header_size: 0,
            fingerprint: "abc".into(),
        }
    }

    #[test]
    fn single_process_becomes_main() {
        let header = header_with_history(&[(
            "history_20240102_030405_recon",
            "COMMAND: recon tomo_sample.nc out_sample.nc\n",
        )]);
        let history = History::build(
            &header,
            Some("out_sample.nc"),
            chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(3, 4, 5)
                .unwrap(),
            "fingerprint123",
        );
        assert_eq!(history.processes.len(), 1);
        assert!(history.processes[0].domain.is_some());
    }

    #[test]
    fn domain_extraction_normalizes_millimeter_unit() {
        let header = Header {
            num_records: 0,
            dimensions: vec![],
            attributes: vec![
                Attribute {
                    name: "voxel_size_xyz".into(),
                    value: AttributeValue::Numeric {
                        nc_type: NcType::Float,
                        values: vec![0.001, 0.001, 0.001],
                    },
                },
                Attribute {
                    name: "voxel_unit".into(),
                    value: AttributeValue::Text(b"mm".to_vec()),
                },
            ],
            variables: vec![],
            header_size: 0,
            fingerprint: String::new(),
        };
        let attrs = extract_attributes(&header);
        let domain = extract_domain(&attrs);
        assert_eq!(domain.get("voxel_unit").unwrap(), "micron");
        assert_eq!(domain.get("voxel_size_x").unwrap(), &serde_json::json!(1.0));
    }

    #[test]
    fn extract_attributes_includes_3d_variable_attributes() {
        let dim = Rc::new(Dimension {
            name: "z".into(),
            value: 4,
        });
        let var = Variable {
            name: "tomo".into(),
            dimensions: vec![Rc::clone(&dim), Rc::clone(&dim), Rc::clone(&dim)],
            attributes: vec![Attribute {
                name: "voxel_unit".into(),
                value: AttributeValue::Text(b"micron".to_vec()),
            }],
            nc_type: NcType::Short,
            data_size: 0,
            data_start: 0,
        };
        let header = Header {
            num_records: 0,
            dimensions: vec![dim],
            attributes: vec![],
            variables: vec![var],
            header_size: 0,
            fingerprint: String::new(),
        };
        let attrs = extract_attributes(&header);
        assert!(attrs.contains_key("voxel_unit"));
    }

    #[test]
    fn duplicate_process_name_is_flagged() {
        let header = header_with_history(&[
            ("history_recon_a", "COMMAND: recon tomo_a.nc out_sample.nc\n"),
            ("history_recon_b", "COMMAND: recon tomo_b.nc out_sample.nc\n"),
        ]);
        let history = History::build(&header, None, chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(), "fp");
        assert_eq!(history.processes.len(), 2);
        let duplicate_flagged = history
            .processes
            .iter()
            .any(|p| p.errors.iter().any(|e| e.contains("Duplicate name within history.")));
        assert!(duplicate_flagged);
    }
}
