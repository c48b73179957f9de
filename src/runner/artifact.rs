//! Writing produced artifacts to disk

use crate::evidence::{OWNER_FIELDS, STATUS_FIELD, SUCCESS_STATUS};
use crate::layout::ArtifactPaths;
use crate::state::write_atomic;
use chrono::Utc;
use serde_json::{Map, Value};
use std::io;

/// Write the sidecar, then the primary artifact
///
/// The primary file is the commit point: a crash before it lands leaves only a
/// sidecar, which is never taken as evidence of processing.
pub(crate) fn write_artifact(
    paths: &ArtifactPaths,
    unit: &str,
    item_id: &str,
    text: &str,
    metadata: &Map<String, Value>,
) -> io::Result<()> {
    let mut meta = metadata.clone();
    meta.insert("item_id".to_string(), Value::from(item_id));
    meta.insert(OWNER_FIELDS[0].to_string(), Value::from(unit));
    meta.insert(STATUS_FIELD.to_string(), Value::from(SUCCESS_STATUS));
    meta.insert(
        "written_at".to_string(),
        Value::from(Utc::now().to_rfc3339()),
    );

    let mut meta_bytes = serde_json::to_vec_pretty(&Value::Object(meta))?;
    meta_bytes.push(b'\n');
    write_atomic(&paths.meta, &meta_bytes)?;
    write_atomic(&paths.primary, text.as_bytes())
}
