//! In-place revision updates.
//!
//! Only the two revision cells of targeted rows change. Every other row is
//! copied from the original bytes, so quoting, line endings and unrelated
//! columns survive the rewrite exactly.

use std::collections::HashSet;
use std::path::Path;

use tracing::debug;

use crate::persistence::write_atomic;

use super::{
    CLUSTER_NAME, InventoryError, PLATFORM_REVISION, Result, WORKLOAD_REVISION,
    find_field_indices, read_file, reader,
};

/// A parsed record and the byte range it occupies in the source file,
/// including its line terminator.
struct RawRecord {
    record: csv::ByteRecord,
    start: usize,
    end: usize,
}

/// Sets the platform and/or workload revision of every row whose
/// `cluster_name` is in `cluster_names`.
///
/// Empty revisions are skipped, so this is a partial update. The file is
/// replaced atomically; a read or parse failure leaves it untouched.
pub fn update_revisions(
    path: &Path,
    cluster_names: &[String],
    platform_revision: &str,
    workload_revision: &str,
) -> Result<()> {
    let bytes = read_file(path)?;
    let records = read_raw_records(path, &bytes)?;

    let header: Vec<String> = records
        .first()
        .map(|r| r.record.iter().map(|f| String::from_utf8_lossy(f).into_owned()).collect())
        .unwrap_or_default();
    let indices = find_field_indices(
        &header,
        &[CLUSTER_NAME, PLATFORM_REVISION, WORKLOAD_REVISION],
    )?;
    let (name_idx, platform_idx, workload_idx) = (indices[0], indices[1], indices[2]);

    let targets: HashSet<&[u8]> = cluster_names.iter().map(|n| n.as_bytes()).collect();
    let mut replacements: Vec<(usize, &[u8])> = Vec::with_capacity(2);
    if !platform_revision.is_empty() {
        replacements.push((platform_idx, platform_revision.as_bytes()));
    }
    if !workload_revision.is_empty() {
        replacements.push((workload_idx, workload_revision.as_bytes()));
    }

    let mut output = Vec::with_capacity(bytes.len());
    let mut updated = 0usize;

    for (i, raw) in records.iter().enumerate() {
        let original = &bytes[raw.start..raw.end];
        let is_target = i > 0
            && raw
                .record
                .get(name_idx)
                .is_some_and(|name| targets.contains(name));
        let changes_value = replacements
            .iter()
            .any(|(idx, value)| raw.record.get(*idx) != Some(*value));

        if !is_target || !changes_value {
            output.extend_from_slice(original);
            continue;
        }

        let fields: Vec<&[u8]> = raw
            .record
            .iter()
            .enumerate()
            .map(|(col, field)| {
                replacements
                    .iter()
                    .find(|(idx, _)| *idx == col)
                    .map_or(field, |(_, value)| *value)
            })
            .collect();
        output.extend_from_slice(&serialize_record(path, &fields)?);
        output.extend_from_slice(line_ending(original));
        updated += 1;
    }

    if updated == 0 {
        debug!(path = %path.display(), "no inventory rows needed a revision change");
        return Ok(());
    }

    write_atomic(path, &output).map_err(|source| InventoryError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), updated, "updated inventory revisions");
    Ok(())
}

fn read_raw_records(path: &Path, bytes: &[u8]) -> Result<Vec<RawRecord>> {
    let mut rdr = reader(bytes);
    let mut records: Vec<RawRecord> = Vec::new();
    let mut record = csv::ByteRecord::new();

    loop {
        let more = rdr
            .read_byte_record(&mut record)
            .map_err(|source| InventoryError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if !more {
            break;
        }
        let start = record
            .position()
            .map_or(0, |p| usize::try_from(p.byte()).unwrap_or(bytes.len()));
        if let Some(prev) = records.last_mut() {
            prev.end = start;
        }
        records.push(RawRecord {
            record: record.clone(),
            start,
            end: bytes.len(),
        });
    }

    Ok(records)
}

/// Writes one record without a terminator, quoting only where necessary.
fn serialize_record(path: &Path, fields: &[&[u8]]) -> Result<Vec<u8>> {
    let write_err = |source| InventoryError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer
        .write_record(fields)
        .map_err(|e| write_err(std::io::Error::other(e)))?;
    let mut line = writer.into_inner().map_err(|e| write_err(e.into_error()))?;
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    Ok(line)
}

/// Returns the trailing run of `\r`/`\n` bytes of a raw record.
fn line_ending(raw: &[u8]) -> &[u8] {
    let content_len = raw
        .iter()
        .rposition(|b| *b != b'\n' && *b != b'\r')
        .map_or(0, |i| i + 1);
    &raw[content_len..]
}
