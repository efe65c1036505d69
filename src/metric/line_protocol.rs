//! InfluxDB line protocol encoding.
//!
//! `measurement[,tag=value...] field=value[,field=value...] timestamp_ns`

use std::fmt::Write;

use crate::metric::types::{FieldValue, Measurement};

impl Measurement {
    /// Encode this measurement as a single line of line protocol.
    ///
    /// Tags and fields are written in key order, so equal measurements always
    /// encode to identical bytes. Non-finite floats are not representable and
    /// are omitted. Returns `None` when no field is left, since a line without
    /// a field set is rejected by the store.
    pub fn to_line_protocol(&self) -> Option<String> {
        let mut line = String::with_capacity(64 + self.fields.len() * 24);
        escape_into(&mut line, &self.name, &[',', ' ']);

        for (key, value) in &self.tags {
            if value.is_empty() {
                continue;
            }
            line.push(',');
            escape_into(&mut line, key, &[',', '=', ' ']);
            line.push('=');
            escape_into(&mut line, value, &[',', '=', ' ']);
        }

        let mut first = true;
        for (key, value) in &self.fields {
            if matches!(value, FieldValue::Float(f) if !f.is_finite()) {
                continue;
            }
            line.push(if first { ' ' } else { ',' });
            first = false;
            escape_into(&mut line, key, &[',', '=', ' ']);
            line.push('=');
            write_field_value(&mut line, value);
        }
        if first {
            return None;
        }

        let _ = write!(line, " {}", self.timestamp_ns);
        Some(line)
    }
}

/// Encode a batch as newline-separated line protocol, skipping measurements
/// that have no encodable field.
pub fn encode_batch(measurements: &[Measurement]) -> String {
    let mut lines = Vec::with_capacity(measurements.len());
    for m in measurements {
        match m.to_line_protocol() {
            Some(line) => lines.push(line),
            None => tracing::warn!(
                measurement = %m.name,
                timestamp_ns = m.timestamp_ns,
                "Skipping measurement with no encodable fields"
            ),
        }
    }
    lines.join("\n")
}

fn write_field_value(out: &mut String, value: &FieldValue) {
    match value {
        FieldValue::Float(f) => {
            let _ = write!(out, "{f}");
        }
        FieldValue::Int(i) => {
            let _ = write!(out, "{i}i");
        }
        FieldValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        FieldValue::Str(s) => {
            out.push('"');
            escape_into(out, s, &['"', '\\']);
            out.push('"');
        }
    }
}

fn escape_into(out: &mut String, raw: &str, special: &[char]) {
    for c in raw.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}
