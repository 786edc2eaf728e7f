//! Supplemented feature: a textual CDL-style rendering of a parsed
//! `Header`, matching the `__main__` blocks of the Python prototype's
//! `nc3header.py` and `nc3files.py` (the `netcdf NAME { ... }` dump used
//! for diagnostics). Rendering is pure and deterministic, so repeated
//! calls on the same `Header` are byte-stable (spec §8 testable property
//! #2).

use crate::nc3::types::{AttributeValue, Header};

fn format_value(value: &AttributeValue) -> String {
    match value {
        AttributeValue::Text(_) => {
            let text = value.as_text().unwrap_or_default();
            format!("\"{}\"", text.replace('"', "\\\""))
        }
        AttributeValue::Numeric { values, .. } => values
            .iter()
            .map(|v| {
                if v.fract() == 0.0 {
                    format!("{}", *v as i64)
                } else {
                    format!("{v}")
                }
            })
            .collect::<Vec<_>>()
            .join(", "),
    }
}

/// Renders `header` in the prototype's CDL-ish dump format, naming the
/// top-level group `name`.
pub fn render(header: &Header, name: &str) -> String {
    let mut lines = Vec::new();
    lines.push(format!("netcdf {name} {{"));

    lines.push("dimensions:".to_string());
    for dim in &header.dimensions {
        lines.push(format!("\t{} = {} ;", dim.name, dim.value));
    }

    lines.push("variables:".to_string());
    for var in &header.variables {
        let dim_names: Vec<&str> = var.dimensions.iter().map(|d| d.name.as_str()).collect();
        lines.push(format!(
            "\t{:?} {}({}) ;",
            var.nc_type,
            var.name,
            dim_names.join(", ")
        ));
        for attr in &var.attributes {
            lines.push(format!(
                "\t\t{}:{} = {} ;",
                var.name,
                attr.name,
                format_value(&attr.value)
            ));
        }
    }

    lines.push(String::new());
    lines.push("// global attributes:".to_string());
    for attr in &header.attributes {
        lines.push(format!("\t\t:{} = {} ;", attr.name, format_value(&attr.value)));
    }

    lines.push("}".to_string());
    lines.join("\n") + "\n"
}
