use chrono::{TimeZone, Utc};
use taxistar_core::registry::{content_hash, RegistryEntry, RegistryError, SourceRegistry};
use tempfile::tempdir;

fn entry(source_id: &str, fact_rows: usize) -> RegistryEntry {
    RegistryEntry {
        source_id: source_id.to_string(),
        processed_at: Some(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()),
        content_hash: Some(content_hash(source_id.as_bytes())),
        fact_rows: Some(fact_rows),
    }
}

#[test]
fn missing_registry_file_is_empty() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let registry = SourceRegistry::load(dir.path().join("stored_files.json"))?;
    assert!(registry.entries().is_empty());
    assert!(!registry.contains("yellow_tripdata_2025-01.parquet"));
    Ok(())
}

#[test]
fn entries_survive_save_and_load() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("nested/stored_files.json");

    let mut registry = SourceRegistry::load(&path)?;
    registry.record(entry("yellow_tripdata_2025-01.parquet", 10));
    registry.record(entry("yellow_tripdata_2025-02.parquet", 20));
    registry.save()?;

    let reloaded = SourceRegistry::load(&path)?;
    assert_eq!(reloaded.entries(), registry.entries());
    assert!(reloaded.contains("yellow_tripdata_2025-02.parquet"));
    assert_eq!(
        reloaded
            .get("yellow_tripdata_2025-01.parquet")
            .and_then(|e| e.fact_rows),
        Some(10)
    );
    Ok(())
}

#[test]
fn recording_twice_replaces_the_entry() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let mut registry = SourceRegistry::load(dir.path().join("stored_files.json"))?;

    registry.record(entry("yellow_tripdata_2025-01.parquet", 10));
    registry.record(entry("yellow_tripdata_2025-01.parquet", 12));

    assert_eq!(registry.entries().len(), 1);
    assert_eq!(registry.entries()[0].fact_rows, Some(12));
    Ok(())
}

#[test]
fn forget_removes_an_entry() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let mut registry = SourceRegistry::load(dir.path().join("stored_files.json"))?;
    registry.record(entry("yellow_tripdata_2025-01.parquet", 10));

    assert!(registry.forget("yellow_tripdata_2025-01.parquet"));
    assert!(!registry.forget("yellow_tripdata_2025-01.parquet"));
    assert!(!registry.contains("yellow_tripdata_2025-01.parquet"));
    Ok(())
}

#[test]
fn plain_list_of_file_names_loads_and_upgrades_on_save() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("stored_files.json");
    std::fs::write(
        &path,
        r#"["yellow_tripdata_2025-01.parquet", "yellow_tripdata_2025-02.parquet"]"#,
    )?;

    let mut registry = SourceRegistry::load(&path)?;
    assert!(registry.contains("yellow_tripdata_2025-01.parquet"));
    assert_eq!(
        registry.get("yellow_tripdata_2025-02.parquet"),
        Some(&RegistryEntry::name_only("yellow_tripdata_2025-02.parquet"))
    );

    registry.record(entry("yellow_tripdata_2025-03.parquet", 7));
    registry.save()?;

    let reloaded = SourceRegistry::load(&path)?;
    assert_eq!(reloaded.entries(), registry.entries());
    assert_eq!(reloaded.entries().len(), 3);
    Ok(())
}

#[test]
fn corrupt_registry_is_reported() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("stored_files.json");
    std::fs::write(&path, "[\"yellow_tripdata_2025-01.parquet\"")?;

    assert!(matches!(
        SourceRegistry::load(&path),
        Err(RegistryError::Json { .. })
    ));
    Ok(())
}

#[test]
fn content_hash_is_stable_blake3_hex() {
    let hash = content_hash(b"trip bytes");
    assert_eq!(hash.len(), 64);
    assert_eq!(hash, content_hash(b"trip bytes"));
    assert_ne!(hash, content_hash(b"other bytes"));
}
