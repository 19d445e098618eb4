// SPDX-License-Identifier: PMPL-1.0-or-later
//! Query execution.
//!
//! A query is one forward range scan over the event key space between the
//! resolved start and end timestamps. Each stored event is decoded, its
//! reserved fields are restored from the key, and filters run before the
//! event is either collected raw or folded into a group accumulator.
//!
//! Every grouped event updates the overall summary table and, when a bucket
//! width is set, the table of its time bucket. Groups are kept in ordered
//! maps so output is deterministic for a given store.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use cistern_events::key::{format_timestamp, from_micros, range_end, range_start, to_micros};
use cistern_events::{Event, EventCollection, EventKey, HASH_FIELD, ID_FIELD, TAG_FIELD, TIMESTAMP_FIELD};
use cistern_storage::Collection;
use md5::{Digest, Md5};
use serde_json::Value;
use tracing::{debug, warn};

use crate::aggregate::{to_json, Accumulator};
use crate::compare::total_order;
use crate::desc::{ColumnDesc, QueryDesc, TimeRange};
use crate::error::QueryResult;
use crate::filter::{compile_all, Filter};
use crate::result::{ResultSet, GROUP_ID_FIELD};

/// Executes [`QueryDesc`]s against event collections.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryEngine {
    now: Option<DateTime<Utc>>,
}

impl QueryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine that resolves an open-ended time range against a fixed `now`.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Some(now) }
    }

    /// Run `desc` against `collection`.
    ///
    /// The description is validated and every filter compiled before the
    /// scan starts, so malformed queries fail without reading the store.
    pub fn execute(&self, collection: &EventCollection, mut desc: QueryDesc) -> QueryResult<ResultSet> {
        desc.validate()?;
        let filters = compile_all(&desc.filters)?;
        desc.time_range = self.resolve(desc.time_range);

        let mut scan = Scan::new(&desc, filters);
        collection.with_collection(|c| scan.run(c))??;
        let (summary, series, events) = scan.finish();

        Ok(ResultSet {
            summary,
            series,
            events,
            query: desc,
        })
    }

    fn resolve(&self, range: TimeRange) -> TimeRange {
        let epoch = from_micros(0);
        let now = self.now.unwrap_or_else(Utc::now);
        TimeRange {
            start: Some(range.start.unwrap_or(epoch).max(epoch)),
            end: Some(range.end.unwrap_or(now).max(epoch)),
        }
    }
}

#[derive(Debug)]
struct Group {
    values: Vec<Value>,
    accumulator: Accumulator,
}

struct Scan<'q> {
    desc: &'q QueryDesc,
    filters: Vec<Filter>,
    raw: bool,
    events: Vec<Event>,
    summary: BTreeMap<String, Group>,
    buckets: BTreeMap<i64, BTreeMap<String, Group>>,
}

impl<'q> Scan<'q> {
    fn new(desc: &'q QueryDesc, filters: Vec<Filter>) -> Self {
        Self {
            desc,
            filters,
            raw: desc.is_raw(),
            events: Vec::new(),
            summary: BTreeMap::new(),
            buckets: BTreeMap::new(),
        }
    }

    fn run(&mut self, collection: &Collection) -> QueryResult<()> {
        let start = self.desc.time_range.start.map_or(0, |t| to_micros(&t));
        let end = self.desc.time_range.end.map_or(0, |t| to_micros(&t));
        let end_key = range_end(end);

        let mut cursor = collection.cursor()?;
        cursor.seek(&range_start(start))?;

        let mut scanned = 0u64;
        let mut matched = 0u64;
        while cursor.advance()? {
            if cursor.key() > end_key.as_slice() {
                break;
            }
            let key = match EventKey::decode(cursor.key()) {
                Ok(key) => key,
                Err(err) => {
                    warn!(error = %err, "Skipping record with undecodable event key");
                    continue;
                }
            };
            if key.timestamp < start {
                continue;
            }
            scanned += 1;

            let mut event: Event = match serde_json::from_slice(cursor.value()) {
                Ok(event) => event,
                Err(err) => {
                    warn!(id = %key.id(), error = %err, "Skipping undecodable event");
                    continue;
                }
            };
            restore_reserved_fields(&mut event, &key);
            if !self.filters.iter().all(|f| f.matches(&event)) {
                continue;
            }
            matched += 1;

            if self.raw {
                let event = self.project(event);
                self.events.push(event);
                if self.desc.limit > 0 && self.events.len() >= self.desc.limit {
                    break;
                }
            } else {
                self.fold(&event, key.timestamp)?;
            }
        }

        debug!(
            scanned,
            matched,
            snapshot = cursor.snapshot(),
            raw = self.raw,
            "Query scan finished"
        );
        Ok(())
    }

    /// Keep only the requested columns plus the reserved fields.
    fn project(&self, event: Event) -> Event {
        if self.desc.columns.is_empty() {
            return event;
        }
        event
            .into_map()
            .into_iter()
            .filter(|(field, _)| {
                field.starts_with('_') || self.desc.columns.iter().any(|c| &c.name == field)
            })
            .collect::<serde_json::Map<_, _>>()
            .into()
    }

    fn fold(&mut self, event: &Event, timestamp: i64) -> QueryResult<()> {
        // Events missing any group-by column belong to no group.
        let mut values = Vec::with_capacity(self.desc.group_by.len());
        for column in &self.desc.group_by {
            match event.get(&column.name) {
                Some(value) if !value.is_null() => values.push(value.clone()),
                _ => return Ok(()),
            }
        }
        let group_key = serde_json::to_string(&values)?;

        let columns = &self.desc.columns;
        if self.desc.point_size > 0 {
            let bucket = timestamp.div_euclid(self.desc.point_size);
            let groups = self.buckets.entry(bucket).or_default();
            accumulate(groups, group_key.clone(), values.clone(), columns, event);
        }
        accumulate(&mut self.summary, group_key, values, columns, event);
        Ok(())
    }

    fn finish(self) -> (Vec<Event>, Vec<Event>, Vec<Event>) {
        let desc = self.desc;

        let mut summary: Vec<Event> = self
            .summary
            .iter()
            .map(|(key, group)| group_row(desc, key, group))
            .collect();
        sort_rows(desc, &mut summary);
        if desc.limit > 0 {
            summary.truncate(desc.limit);
        }

        let mut series = Vec::new();
        for (bucket, groups) in &self.buckets {
            let ts = format_timestamp(&from_micros(bucket.saturating_mul(desc.point_size)));
            for (key, group) in groups {
                let mut row = group_row(desc, key, group);
                row.insert(TIMESTAMP_FIELD.to_string(), Value::String(ts.clone()));
                series.push(row);
            }
        }

        (summary, series, self.events)
    }
}

fn accumulate(
    groups: &mut BTreeMap<String, Group>,
    group_key: String,
    values: Vec<Value>,
    columns: &[ColumnDesc],
    event: &Event,
) {
    groups
        .entry(group_key)
        .or_insert_with(|| Group {
            values,
            accumulator: Accumulator::new(columns.len()),
        })
        .accumulator
        .update(columns, event);
}

/// Put `_ts`, `_tag`, `_hash` and `_id` back from the key. The key is
/// authoritative; stored copies of these fields are overwritten.
fn restore_reserved_fields(event: &mut Event, key: &EventKey) {
    event.insert(
        TIMESTAMP_FIELD.to_string(),
        Value::String(format_timestamp(&from_micros(key.timestamp))),
    );
    event.insert(TAG_FIELD.to_string(), Value::String(key.tag.clone()));
    if key.hash.is_empty() {
        event.remove(HASH_FIELD);
    } else {
        event.insert(HASH_FIELD.to_string(), Value::String(key.hash.clone()));
    }
    event.insert(ID_FIELD.to_string(), Value::String(key.id()));
}

fn group_row(desc: &QueryDesc, group_key: &str, group: &Group) -> Event {
    let mut row = Event::new();
    for (column, value) in desc.group_by.iter().zip(&group.values) {
        row.insert(column.name.clone(), value.clone());
    }
    for (column, value) in desc.columns.iter().zip(group.accumulator.values()) {
        if column.aggregate.is_some() {
            row.insert(column.field_name(), to_json(*value));
        }
    }
    row.insert(GROUP_ID_FIELD.to_string(), Value::String(group_id(group_key)));
    row
}

/// First 8 bytes of the MD5 of the group key, hex encoded.
pub fn group_id(group_key: &str) -> String {
    let digest = Md5::digest(group_key.as_bytes());
    hex::encode(&digest[..8])
}

fn sort_rows(desc: &QueryDesc, rows: &mut [Event]) {
    if desc.order_by.is_empty() {
        return;
    }
    let fields: Vec<String> = desc.order_by.iter().map(|c| c.field_name()).collect();
    rows.sort_by(|a, b| {
        let ordering = fields
            .iter()
            .map(|field| total_order(a.get(field), b.get(field)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal);
        if desc.descending {
            ordering.reverse()
        } else {
            ordering
        }
    });
}
