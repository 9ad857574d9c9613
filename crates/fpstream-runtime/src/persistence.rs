//! Persisted engine state: a line-oriented text file.
//!
//! Line 1 is a JSON metadata object (version, current quarter, window
//! definition). Every following line is one pattern with its serialized
//! tilted time window. Two reserved pattern names at the end carry the
//! engine-level per-batch transaction and event windows. Saves are atomic:
//! the file is written to a temporary sibling and renamed into place.

use crate::engine::FpStream;
use crate::pattern_tree::PatternTree;
use fpstream_core::{CoreError, ItemIdList, TiltedTimeWindow, TtwDefinition};
use serde_json::{json, Value};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Current format version. Version 1 predates the embedded window
/// definition and implies `LEGACY_DEFINITION`.
const FORMAT_VERSION: u64 = 2;

/// The definition every v1 file was written with.
const LEGACY_DEFINITION: &str =
    "900:QQQQHHHHHHHHHHHHHHHHHHHHHHHHDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDMMMMMMMMMMMMY";

const METADATA_VERSION_KEY: &str = "v";
const METADATA_QUARTER_KEY: &str = "currentQuarter";
const METADATA_DEFINITION_KEY: &str = "tilted time window definition";
const PATTERN_KEY: &str = "pattern";
const WINDOW_KEY: &str = "tilted time window";

/// Reserved pattern names marking the engine-level windows.
const TRANSACTIONS_PER_BATCH_MARKER: &str = "::transactions per batch::";
const EVENTS_PER_BATCH_MARKER: &str = "::events per batch::";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed state file: {0}")]
    Deserialization(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

fn malformed(reason: impl Into<String>) -> StoreError {
    StoreError::Deserialization(reason.into())
}

/// Writes the engine's summarized state to `path` atomically.
pub fn save(engine: &FpStream, path: &Path) -> Result<(), StoreError> {
    let tmp_path = path.with_extension("tmp");
    {
        let file = File::create(&tmp_path)?;
        let mut out = BufWriter::new(file);
        write_state(engine, &mut out)?;
        out.flush()?;
    }
    fs::rename(&tmp_path, path)?;
    info!(path = %path.display(), patterns = engine.pattern_tree().node_count(), "state saved");
    Ok(())
}

fn write_state(engine: &FpStream, out: &mut impl Write) -> Result<(), StoreError> {
    let tree = engine.pattern_tree();
    let metadata = json!({
        METADATA_VERSION_KEY: FORMAT_VERSION,
        METADATA_QUARTER_KEY: tree.current_quarter(),
        METADATA_DEFINITION_KEY: tree.definition().serialize(),
    });
    writeln!(out, "{metadata}")?;

    let mut write_error = None;
    tree.visit_patterns(|pattern, window| {
        if write_error.is_some() {
            return;
        }
        let names = match engine.catalog().names_for(pattern) {
            Some(names) => names,
            None => {
                write_error = Some(malformed(format!("pattern {pattern:?} has unknown items")));
                return;
            }
        };
        let line = json!({
            PATTERN_KEY: names,
            WINDOW_KEY: window.to_variant_map(),
        });
        if let Err(e) = writeln!(out, "{line}") {
            write_error = Some(e.into());
        }
    });
    if let Some(e) = write_error {
        return Err(e);
    }

    for (marker, window) in [
        (TRANSACTIONS_PER_BATCH_MARKER, engine.transactions_per_batch()),
        (EVENTS_PER_BATCH_MARKER, engine.events_per_batch()),
    ] {
        let line = json!({
            PATTERN_KEY: [marker],
            WINDOW_KEY: window.to_variant_map(),
        });
        writeln!(out, "{line}")?;
    }
    Ok(())
}

/// Loads engine state from `path`. All parsing happens against staging
/// structures; the engine is only mutated once the whole file has been
/// accepted.
pub fn load(engine: &mut FpStream, path: &Path) -> Result<(), StoreError> {
    let file = File::open(path)?;
    let mut lines = BufReader::new(file).lines();

    let first = lines
        .next()
        .ok_or_else(|| malformed("empty state file"))??;
    let metadata: Value =
        serde_json::from_str(&first).map_err(|e| malformed(format!("metadata line: {e}")))?;

    let version = metadata
        .get(METADATA_VERSION_KEY)
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed("metadata missing version"))?;
    if version == 0 || version > FORMAT_VERSION {
        return Err(malformed(format!("unsupported version {version}")));
    }
    let current_quarter = metadata
        .get(METADATA_QUARTER_KEY)
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed("metadata missing current quarter"))? as u32;
    let definition = match metadata.get(METADATA_DEFINITION_KEY) {
        Some(value) => value
            .as_str()
            .ok_or_else(|| malformed("window definition is not a string"))?,
        // Version 1 files predate the definition field.
        None => LEGACY_DEFINITION,
    };
    let def = Arc::new(TtwDefinition::parse(definition)?);

    let mut catalog = engine.catalog().clone();
    let mut tree = PatternTree::new(def.clone());
    let mut transactions_per_batch = None;
    let mut events_per_batch = None;

    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value =
            serde_json::from_str(&line).map_err(|e| malformed(format!("pattern line: {e}")))?;
        let names = value
            .get(PATTERN_KEY)
            .and_then(Value::as_array)
            .ok_or_else(|| malformed("pattern line missing pattern"))?;
        let window_map = value
            .get(WINDOW_KEY)
            .ok_or_else(|| malformed("pattern line missing window"))?;
        let window = TiltedTimeWindow::from_variant_map(def.clone(), window_map)?;

        if let [Value::String(marker)] = names.as_slice() {
            match marker.as_str() {
                TRANSACTIONS_PER_BATCH_MARKER => {
                    transactions_per_batch = Some(window);
                    continue;
                }
                EVENTS_PER_BATCH_MARKER => {
                    events_per_batch = Some(window);
                    continue;
                }
                _ => {}
            }
        }

        let mut itemset: ItemIdList = Vec::with_capacity(names.len());
        for name in names {
            let name = name
                .as_str()
                .ok_or_else(|| malformed("pattern item is not a string"))?;
            let (id, _) = catalog.intern(name);
            itemset.push(id);
        }
        tree.add_pattern(&itemset, 0, 0);
        *tree
            .get_pattern_support_mut(&itemset)
            .expect("pattern was just added") = window;
    }
    tree.set_current_quarter(current_quarter);

    let transactions_per_batch =
        transactions_per_batch.unwrap_or_else(|| TiltedTimeWindow::new(def.clone()));
    let events_per_batch = events_per_batch.unwrap_or_else(|| TiltedTimeWindow::new(def.clone()));
    if transactions_per_batch.is_empty() && tree.node_count() > 0 {
        warn!("state file has patterns but no per-batch windows");
    }

    let patterns = tree.node_count();
    engine.restore(catalog, tree, transactions_per_batch, events_per_batch);
    info!(path = %path.display(), patterns, "state loaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::RawTransaction;
    use crate::engine::EngineConfig;
    use fpstream_core::ItemName;
    use std::io::Read;

    fn names(items: &[&str]) -> RawTransaction {
        items.iter().map(|&s| ItemName::from(s)).collect()
    }

    fn populated_engine() -> FpStream {
        let def = Arc::new(TtwDefinition::parse("900:QQQQHH").unwrap());
        let mut engine = FpStream::new(
            def,
            EngineConfig {
                min_support: 0.1,
                max_support_error: 0.05,
                tail_tie_break: Default::default(),
            },
        );
        let batch: Vec<RawTransaction> =
            vec![names(&["a", "b"]), names(&["a", "b"]), names(&["a", "c"])];
        engine.process_chunk(&batch, 1.0, true, true).unwrap();
        let batch: Vec<RawTransaction> = vec![names(&["a", "b"])];
        engine.process_chunk(&batch, 1.0, true, true).unwrap();
        engine
    }

    fn fresh_engine() -> FpStream {
        let def = Arc::new(TtwDefinition::parse("900:QQQQHH").unwrap());
        FpStream::new(def, EngineConfig::default())
    }

    #[test]
    fn save_then_load_restores_patterns_and_counters() {
        let engine = populated_engine();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.fps");
        save(&engine, &path).unwrap();

        let mut restored = fresh_engine();
        load(&mut restored, &path).unwrap();

        assert_eq!(
            restored.pattern_tree().node_count(),
            engine.pattern_tree().node_count()
        );
        assert_eq!(
            restored.pattern_tree().current_quarter(),
            engine.pattern_tree().current_quarter()
        );
        assert_eq!(restored.current_update_id(), engine.current_update_id());

        let a = restored.catalog().id_of("a").unwrap();
        let b = restored.catalog().id_of("b").unwrap();
        let ab = if a < b { vec![a, b] } else { vec![b, a] };
        assert_eq!(
            restored.pattern_tree().get_pattern_support(&ab).unwrap(),
            engine
                .pattern_tree()
                .get_pattern_support(&[
                    engine.catalog().id_of("a").unwrap(),
                    engine.catalog().id_of("b").unwrap()
                ])
                .unwrap()
        );
        assert_eq!(restored.events_in_range(0, 5), engine.events_in_range(0, 5));
    }

    #[test]
    fn serialize_load_serialize_is_stable() {
        let engine = populated_engine();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.fps");
        save(&engine, &path).unwrap();
        let mut first = String::new();
        File::open(&path).unwrap().read_to_string(&mut first).unwrap();

        let mut restored = fresh_engine();
        load(&mut restored, &path).unwrap();
        let path2 = dir.path().join("state2.fps");
        save(&restored, &path2).unwrap();
        let mut second = String::new();
        File::open(&path2)
            .unwrap()
            .read_to_string(&mut second)
            .unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn failed_load_leaves_the_engine_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.fps");
        std::fs::write(&path, "{\"v\":2,\"currentQuarter\":0}\nnot json\n").unwrap();

        let mut engine = populated_engine();
        let before = engine.pattern_tree().node_count();
        assert!(load(&mut engine, &path).is_err());
        assert_eq!(engine.pattern_tree().node_count(), before);
        assert!(engine.catalog().id_of("a").is_some());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let mut engine = fresh_engine();
        let err = load(&mut engine, Path::new("/nonexistent/state.fps")).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }

    #[test]
    fn version_1_falls_back_to_the_legacy_definition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.fps");
        std::fs::write(&path, "{\"v\":1,\"currentQuarter\":2}\n").unwrap();

        let mut engine = fresh_engine();
        load(&mut engine, &path).unwrap();
        assert_eq!(
            engine.pattern_tree().definition().serialize(),
            LEGACY_DEFINITION
        );
        assert_eq!(engine.pattern_tree().current_quarter(), 2);
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.fps");
        std::fs::write(&path, "{\"v\":7,\"currentQuarter\":0}\n").unwrap();

        let mut engine = fresh_engine();
        assert!(matches!(
            load(&mut engine, &path),
            Err(StoreError::Deserialization(_))
        ));
    }

    #[test]
    fn save_is_atomic_under_rename() {
        let engine = populated_engine();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.fps");
        save(&engine, &path).unwrap();
        // No temporary residue next to the state file.
        let residue: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|n| n != "state.fps")
            .collect();
        assert!(residue.is_empty(), "leftover files: {residue:?}");
    }
}
