//! Deterministic canonical encoding of activity records.
//!
//! The encoding is the MAC input, so it must be byte-identical for
//! semantically identical records no matter how their property maps were
//! built. Fields are written in a fixed order, every value is
//! length-prefixed (no separator can be forged by embedding it in a value),
//! and JSON object keys are sorted at every nesting level.

use vigil_core::ActivityRecord;

/// Encodes a record (excluding its signature) to canonical bytes.
///
/// Pure function; the record is not modified.
pub fn canonical_bytes(record: &ActivityRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);

    put_opt(&mut out, Some(record.id.to_string().as_bytes()));
    put_opt(&mut out, Some(record.activity_type.as_bytes()));
    put_opt(&mut out, Some(record.module.as_bytes()));
    put_opt(&mut out, Some(record.description.as_bytes()));
    put_opt(
        &mut out,
        record.user_id.map(|v| v.to_string()).as_deref().map(str::as_bytes),
    );
    put_opt(
        &mut out,
        record
            .subject
            .as_ref()
            .map(|s| s.subject_type.as_bytes()),
    );
    put_opt(
        &mut out,
        record
            .subject
            .as_ref()
            .map(|s| s.subject_id.to_string())
            .as_deref()
            .map(str::as_bytes),
    );
    put_opt(&mut out, record.ip_address.as_deref().map(str::as_bytes));
    put_opt(&mut out, record.user_agent.as_deref().map(str::as_bytes));

    let mut properties = Vec::new();
    write_canonical_json(
        &serde_json::Value::Object(record.properties.clone()),
        &mut properties,
    );
    put_opt(&mut out, Some(properties.as_slice()));

    put_opt(&mut out, Some(record.risk_level.to_string().as_bytes()));
    put_opt(
        &mut out,
        Some(
            record
                .created_at
                .format("%Y-%m-%dT%H:%M:%SZ")
                .to_string()
                .as_bytes(),
        ),
    );

    out
}

/// Writes a presence byte, then a big-endian length prefix and the value.
///
/// Absent (null) values write only the presence byte, which keeps null
/// distinct from the empty string.
fn put_opt(out: &mut Vec<u8>, value: Option<&[u8]>) {
    match value {
        Some(bytes) => {
            out.push(1);
            out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(bytes);
        }
        None => out.push(0),
    }
}

/// Serializes a JSON value with object keys sorted lexicographically at
/// every level. Scalars use `serde_json`'s compact forms, so escaping and
/// number formatting stay consistent with the rest of the system.
fn write_canonical_json(value: &serde_json::Value, out: &mut Vec<u8>) {
    match value {
        serde_json::Value::Object(map) => {
            out.push(b'{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(
                    serde_json::to_string(key)
                        .unwrap_or_else(|_| String::from("\"\""))
                        .as_bytes(),
                );
                out.push(b':');
                write_canonical_json(&map[*key], out);
            }
            out.push(b'}');
        }
        serde_json::Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical_json(item, out);
            }
            out.push(b']');
        }
        scalar => {
            out.extend_from_slice(
                serde_json::to_string(scalar)
                    .unwrap_or_else(|_| String::from("null"))
                    .as_bytes(),
            );
        }
    }
}
