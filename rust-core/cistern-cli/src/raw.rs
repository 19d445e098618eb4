// SPDX-License-Identifier: PMPL-1.0-or-later
//! Raw collection maintenance: direct key/value access to one `.lm2` file.

use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use cistern_storage::{Collection, CollectionOptions, WriteBatch};
use tracing::info;

fn open(file: &Path, options: CollectionOptions) -> Result<Collection> {
    Collection::open(file, options).with_context(|| format!("opening {}", file.display()))
}

pub fn create(file: &Path, options: CollectionOptions) -> Result<()> {
    if file.exists() {
        bail!("{} already exists", file.display());
    }
    let collection = Collection::create(file, options)
        .with_context(|| format!("creating {}", file.display()))?;
    info!(path = %file.display(), "Created collection");
    collection.close()?;
    Ok(())
}

pub fn get(file: &Path, options: CollectionOptions, key: &str) -> Result<()> {
    let collection = open(file, options)?;
    let value = match collection.cursor()?.get(key.as_bytes()) {
        Ok(value) => value,
        Err(err) if err.is_not_found() => bail!("key {key:?} not found"),
        Err(err) => return Err(err.into()),
    };
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&value)?;
    writeln!(stdout)?;
    Ok(())
}

pub fn set(
    file: &Path,
    options: CollectionOptions,
    key: &str,
    value: &str,
    allow_overwrite: bool,
) -> Result<()> {
    let collection = open(file, options)?;
    let mut batch = WriteBatch::new();
    batch.set(key, value).allow_overwrite(allow_overwrite);
    let version = match collection.update(batch) {
        Ok(version) => version,
        Err(err) if err.is_duplicate_key() => bail!("key {key:?} already exists"),
        Err(err) => return Err(err.into()),
    };
    info!(key, version, "Set");
    Ok(())
}

pub fn delete(file: &Path, options: CollectionOptions, key: &str) -> Result<()> {
    let collection = open(file, options)?;
    let mut batch = WriteBatch::new();
    batch.delete(key);
    let version = collection.update(batch)?;
    info!(key, version, "Deleted");
    Ok(())
}

pub fn scan(
    file: &Path,
    options: CollectionOptions,
    from: Option<&str>,
    limit: Option<usize>,
) -> Result<()> {
    let collection = open(file, options)?;
    let mut cursor = collection.cursor()?;
    if let Some(from) = from {
        cursor.seek(from.as_bytes())?;
    }

    let mut stdout = std::io::stdout().lock();
    let mut printed = 0usize;
    while limit.map_or(true, |limit| printed < limit) && cursor.advance()? {
        writeln!(
            stdout,
            "{}\t{}",
            String::from_utf8_lossy(cursor.key()),
            String::from_utf8_lossy(cursor.value())
        )?;
        printed += 1;
    }
    info!(records = printed, snapshot = cursor.snapshot(), "Scan finished");
    Ok(())
}

pub fn stats(file: &Path, options: CollectionOptions) -> Result<()> {
    let collection = open(file, options)?;
    let version = collection.version()?;
    let records = collection.cursor()?.count();
    let size = std::fs::metadata(file)?.len();
    let stats = collection.stats();
    println!("path:          {}", file.display());
    println!("version:       {version}");
    println!("live records:  {records}");
    println!("file size:     {size}");
    println!("records read:  {}", stats.records_read);
    println!("cache hits:    {}", stats.cache_hits);
    println!("cache misses:  {}", stats.cache_misses);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_set_delete() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("raw.lm2");
        let options = CollectionOptions::default();

        create(&file, options).unwrap();
        assert!(create(&file, options).is_err(), "Create refuses to clobber");

        set(&file, options, "k", "v1", true).unwrap();
        set(&file, options, "k", "v2", true).unwrap();
        assert!(set(&file, options, "k", "v3", false).is_err());

        {
            let collection = open(&file, options).unwrap();
            assert_eq!(collection.cursor().unwrap().get(b"k").unwrap(), b"v2".to_vec());
        }

        delete(&file, options, "k").unwrap();
        assert!(get(&file, options, "k").is_err());
        scan(&file, options, None, Some(10)).unwrap();
        stats(&file, options).unwrap();
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let err = get(&dir.path().join("none.lm2"), CollectionOptions::default(), "k").unwrap_err();
        assert!(err.to_string().contains("opening"));
    }
}
