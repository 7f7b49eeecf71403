//! Update detection: is a newer consolidation available for a source?

use crate::error::CorpusError;
use crate::manifest::parse_date;
use crate::store::VersionStore;

/// True when `remote_date` is strictly newer than `local_date`, or when
/// no local date is known. Both dates are ISO `YYYY-MM-DD`.
pub fn needs_update(local_date: Option<&str>, remote_date: &str) -> Result<bool, CorpusError> {
    let remote = parse_date(remote_date)?;
    match local_date {
        None => Ok(true),
        Some(local) => Ok(remote > parse_date(local)?),
    }
}

/// Consolidation date of `source` in the current version: the source's
/// own date if recorded, otherwise the version's.
pub fn local_consolidation_date(
    store: &VersionStore,
    source: &str,
) -> Result<Option<String>, CorpusError> {
    let Some(manifest) = store.current_manifest()? else {
        return Ok(None);
    };
    Ok(manifest
        .sources
        .get(source)
        .and_then(|entry| entry.consolidation_date.clone())
        .or(manifest.consolidation_date))
}
