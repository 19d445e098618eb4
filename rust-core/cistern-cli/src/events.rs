// SPDX-License-Identifier: PMPL-1.0-or-later
//! Event collection commands: ingest, query, retention compaction.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cistern_events::{CollectionRegistry, Event, EventCollection};
use cistern_query::{MetricKind, MetricRegistry, QueryDesc, QueryEngine};
use tracing::{error, info};

fn input_reader(path: Option<&Path>) -> Result<Box<dyn BufRead>> {
    Ok(match path {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    })
}

/// Replace each counter in `fields` with its per-second rate since the
/// previous event carrying the same tag. A counter's first sample only sets
/// the baseline, so the field is dropped from that event.
fn derive_rates(metrics: &mut MetricRegistry, event: &mut Event, fields: &[String]) -> Result<()> {
    if fields.is_empty() {
        return Ok(());
    }
    let at = event.timestamp()?;
    let tag = event.tag().unwrap_or_default().to_string();
    for field in fields {
        let Some(sample) = event.remove(field.as_str()) else {
            continue;
        };
        let name = format!("{tag}/{field}");
        if let Some(rate) = metrics.update(&name, MetricKind::Derivative, &sample, at) {
            event.insert(field.clone(), rate.into());
        }
    }
    Ok(())
}

/// Store JSON-lines events from `reader`, `batch_size` events per batch.
/// Blank lines are skipped. Fields named in `rates` are converted from
/// counters to rates first. Returns the number of events stored.
pub fn ingest_lines(
    collection: &EventCollection,
    reader: impl BufRead,
    batch_size: usize,
    rates: &[String],
) -> Result<usize> {
    if batch_size == 0 {
        bail!("batch size must be positive");
    }

    let mut metrics = MetricRegistry::new();
    let mut pending = Vec::with_capacity(batch_size);
    let mut stored = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut event: Event = serde_json::from_str(&line)
            .with_context(|| format!("line {}: not a JSON object", index + 1))?;
        derive_rates(&mut metrics, &mut event, rates)
            .with_context(|| format!("line {}", index + 1))?;
        pending.push(event);
        if pending.len() == batch_size {
            stored += pending.len();
            collection
                .store_events(pending.drain(..))
                .with_context(|| format!("storing batch ending at line {}", index + 1))?;
        }
    }
    if !pending.is_empty() {
        stored += pending.len();
        collection.store_events(pending)?;
    }
    Ok(stored)
}

pub fn ingest(
    registry: &CollectionRegistry,
    name: &str,
    input: Option<&Path>,
    batch_size: usize,
    rates: &[String],
) -> Result<()> {
    let collection = registry.open_or_create(name)?;
    let stored = ingest_lines(&collection, input_reader(input)?, batch_size, rates)?;
    info!(collection = name, events = stored, version = collection.version()?, "Ingest finished");
    Ok(())
}

pub fn query(
    registry: &CollectionRegistry,
    name: &str,
    desc: Option<&Path>,
    pretty: bool,
) -> Result<()> {
    let mut text = String::new();
    input_reader(desc)?.read_to_string(&mut text)?;
    let desc: QueryDesc = serde_json::from_str(&text).context("parsing query description")?;

    let collection = registry.open(name)?;
    let result = QueryEngine::new().execute(&collection, desc)?;
    let output = if pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{output}");
    Ok(())
}

pub fn compact(registry: &CollectionRegistry, name: Option<&str>) -> Result<()> {
    match name {
        Some(name) => registry.open(name)?.compact()?,
        None => {
            registry.open_configured()?;
            registry.compact_all()?;
        }
    }
    Ok(())
}

/// Compact every configured collection each `compaction_interval_secs`
/// until Ctrl-C. A failed round is logged and retried on the next tick.
pub async fn watch(registry: CollectionRegistry) -> Result<()> {
    let registry = Arc::new(registry);
    let opened = registry.open_configured()?;
    let period = Duration::from_secs(registry.config().compaction_interval_secs);
    info!(
        collections = opened.len(),
        interval_secs = period.as_secs(),
        "Watching collections"
    );

    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately; compaction starts one period in.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let registry = Arc::clone(&registry);
                match tokio::task::spawn_blocking(move || registry.compact_all()).await {
                    Ok(Ok(())) => info!("Compaction round finished"),
                    Ok(Err(err)) => error!(error = %err, "Compaction round failed"),
                    Err(err) => error!(error = %err, "Compaction task panicked"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("listening for Ctrl-C")?;
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cistern_events::CisternConfig;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> CollectionRegistry {
        CollectionRegistry::new(CisternConfig {
            data_dir: dir.path().to_path_buf(),
            ..CisternConfig::default()
        })
        .unwrap()
    }

    fn lines(n: usize) -> String {
        (0..n)
            .map(|i| {
                format!(
                    "{{\"_ts\": \"2020-01-01T00:00:{:02}.{:06}Z\", \"_tag\": \"cli\", \"n\": {i}}}\n",
                    i / 1_000_000,
                    i % 1_000_000
                )
            })
            .collect()
    }

    #[test]
    fn test_ingest_in_batches() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let collection = registry.open_or_create("cli").unwrap();

        let input = format!("{}\n\n", lines(2_500));
        let stored = ingest_lines(&collection, input.as_bytes(), 1_000, &[]).unwrap();
        assert_eq!(stored, 2_500);

        let count = collection
            .with_collection(|c| c.cursor().unwrap().count())
            .unwrap();
        assert_eq!(count, 2_500);
    }

    #[test]
    fn test_ingest_rejects_bad_line() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let collection = registry.open_or_create("cli").unwrap();

        let input = format!("{}not json\n", lines(3));
        let err = ingest_lines(&collection, input.as_bytes(), 10, &[]).unwrap_err();
        assert!(err.to_string().contains("line 4"));
        assert!(ingest_lines(&collection, lines(1).as_bytes(), 0, &[]).is_err());
    }

    #[test]
    fn test_ingest_converts_counters_to_rates() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let collection = registry.open_or_create("cli").unwrap();

        let input = [
            r#"{"_ts": "2020-01-01T00:00:00Z", "_tag": "sw1", "rx": 100, "load": 1}"#,
            r#"{"_ts": "2020-01-01T00:00:00Z", "_tag": "sw2", "rx": 7}"#,
            r#"{"_ts": "2020-01-01T00:00:10Z", "_tag": "sw1", "rx": 600, "load": 2}"#,
            r#"{"_ts": "2020-01-01T00:00:20Z", "_tag": "sw1", "rx": 50, "load": 3}"#,
        ]
        .join("\n");
        let rates = ["rx".to_string()];
        assert_eq!(ingest_lines(&collection, input.as_bytes(), 10, &rates).unwrap(), 4);

        let events: Vec<Event> = collection
            .with_collection(|c| {
                c.cursor()
                    .unwrap()
                    .map(|item| serde_json::from_slice(&item.unwrap().1).unwrap())
                    .collect()
            })
            .unwrap();
        let sw1: Vec<&Event> = events.iter().filter(|e| e.tag() == Some("sw1")).collect();
        assert_eq!(sw1.len(), 3);
        assert!(sw1[0].get("rx").is_none(), "First sample only sets the baseline");
        assert_eq!(sw1[1]["rx"].as_f64(), Some(50.0));
        assert_eq!(sw1[2]["rx"].as_f64(), Some(0.0), "Counter rollover reports zero");
        assert_eq!(sw1[2]["load"], 3, "Other fields are stored as given");
    }

    #[test]
    fn test_compact_named_collection() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let collection = registry.open_or_create("cli").unwrap();
        ingest_lines(&collection, lines(5).as_bytes(), 2, &[]).unwrap();

        compact(&registry, Some("cli")).unwrap();
        compact(&registry, None).unwrap();
        assert!(compact(&registry, Some("missing")).is_err());
    }
}
