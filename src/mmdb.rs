//! Reading back generated MMDB files.
//!
//! Validation, entry counting, and the optional CSV sample export all walk
//! the database with `maxminddb`.

use crate::error::SerializationError;
use ipnetwork::IpNetwork;
use maxminddb::{MaxMindDBError, Reader};
use serde::de::IgnoredAny;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Log counting progress every this many entries.
const PROGRESS_INTERVAL: u64 = 100_000;

/// Entries inspected when collecting CSV columns.
const HEADER_SAMPLE_SIZE: usize = 1000;

const BASE_HEADERS: [&str; 3] = ["network", "network_start", "network_end"];

const MAX_LIST_ITEM_CHARS: usize = 50;
const MAX_KEY_CHARS: usize = 10;
const MAX_CELL_CHARS: usize = 200;

/// Facts about a generated database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmdbSummary {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub database_type: String,
    pub build_epoch: u64,
    pub ip_version: u16,
    /// Networks carrying data.
    pub entries: u64,
}

/// Open a database, failing if the file is not a valid MMDB.
pub fn open(path: &Path) -> Result<Reader<Vec<u8>>, MaxMindDBError> {
    Reader::open_readfile(path)
}

/// Open a database and count its entries.
pub fn summarize(path: &Path) -> Result<MmdbSummary, MaxMindDBError> {
    let reader = open(path)?;
    let size_bytes = std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| MaxMindDBError::IoError(e.to_string()))?;

    info!(
        path = %path.display(),
        database_type = %reader.metadata.database_type,
        build_epoch = reader.metadata.build_epoch,
        "MMDB file validation successful"
    );
    info!("Counting entries in MMDB file");

    let mut entries = 0u64;
    for item in reader.within::<IgnoredAny>(root_network(reader.metadata.ip_version))? {
        item?;
        entries += 1;
        if entries % PROGRESS_INTERVAL == 0 {
            info!(entries, "Counting entries");
        }
    }

    info!(entries, size_bytes, "MMDB entries counted");

    Ok(MmdbSummary {
        path: path.to_path_buf(),
        size_bytes,
        database_type: reader.metadata.database_type.clone(),
        build_epoch: reader.metadata.build_epoch,
        ip_version: reader.metadata.ip_version,
        entries,
    })
}

/// Network covering the whole address space of a database.
fn root_network(ip_version: u16) -> IpNetwork {
    if ip_version == 4 {
        IpNetwork::V4(
            ipnetwork::Ipv4Network::new(std::net::Ipv4Addr::UNSPECIFIED, 0).expect("valid prefix"),
        )
    } else {
        IpNetwork::V6(
            ipnetwork::Ipv6Network::new(std::net::Ipv6Addr::UNSPECIFIED, 0).expect("valid prefix"),
        )
    }
}

/// Path of the CSV sample written next to a database.
pub fn csv_sample_path(mmdb_path: &Path) -> PathBuf {
    let stem = mmdb_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    mmdb_path.with_file_name(format!("{}-SAMPLE.csv", stem))
}

/// Export a human-readable CSV sample of a database.
///
/// Returns the CSV path and the number of rows written.
pub fn export_csv_sample(
    mmdb_path: &Path,
    max_rows: Option<usize>,
) -> Result<(PathBuf, usize), SerializationError> {
    let read_err = |e: MaxMindDBError| SerializationError::Database {
        path: mmdb_path.to_path_buf(),
        reason: e.to_string(),
    };

    let csv_path = csv_sample_path(mmdb_path);
    info!(
        mmdb = %mmdb_path.display(),
        csv = %csv_path.display(),
        "Converting MMDB to CSV"
    );

    let reader = open(mmdb_path).map_err(read_err)?;
    let root = root_network(reader.metadata.ip_version);

    // Collect columns from the first entries carrying data
    let mut keys = BTreeSet::new();
    let mut sampled = 0;
    for item in reader.within::<Value>(root).map_err(read_err)? {
        let item = item.map_err(read_err)?;
        if !is_truthy(&item.info) {
            continue;
        }
        if let Value::Object(map) = &item.info {
            keys.extend(map.keys().cloned());
        }
        sampled += 1;
        if sampled >= HEADER_SAMPLE_SIZE {
            break;
        }
    }
    let data_headers: Vec<String> = keys.into_iter().collect();
    debug!(columns = data_headers.len(), "CSV columns collected");

    let mut out = csv::Writer::from_path(&csv_path)
        .map_err(|e| SerializationError::io(&csv_path, e.into()))?;
    let write_err = |e: csv::Error| SerializationError::io(&csv_path, e.into());

    let header = BASE_HEADERS
        .iter()
        .copied()
        .chain(data_headers.iter().map(String::as_str));
    out.write_record(header).map_err(write_err)?;

    let mut rows = 0usize;
    for item in reader.within::<Value>(root).map_err(read_err)? {
        if max_rows.is_some_and(|max| rows >= max) {
            info!(max_rows = rows, "Reached maximum CSV row limit");
            break;
        }
        let item = item.map_err(read_err)?;
        if !is_truthy(&item.info) {
            continue;
        }
        out.write_record(csv_row(&item.ip_net, &item.info, &data_headers))
            .map_err(write_err)?;
        rows += 1;
        if rows % 50_000 == 0 {
            info!(rows, "Exporting rows to CSV");
        }
    }
    out.flush().map_err(|e| SerializationError::io(&csv_path, e))?;

    info!(rows, csv = %csv_path.display(), "CSV export completed");
    Ok((csv_path, rows))
}

fn csv_row(network: &IpNetwork, data: &Value, headers: &[String]) -> Vec<String> {
    let mut row = vec![
        network.to_string(),
        network.network().to_string(),
        network.broadcast().to_string(),
    ];
    for key in headers {
        let cell = match data {
            Value::Object(map) => render_cell(map.get(key).unwrap_or(&Value::Null)),
            _ => String::new(),
        };
        row.push(cell);
    }
    row
}

/// Render one attribute as a CSV-safe cell.
fn render_cell(value: &Value) -> String {
    match value {
        Value::Array(items) => match items.as_slice() {
            [] => "EMPTY_LIST".to_string(),
            [item] => format!(
                "LIST_1_ITEM_{}",
                truncate(&clean(&display(item)), MAX_LIST_ITEM_CHARS)
            ),
            _ => format!("LIST_{}_ITEMS", items.len()),
        },
        Value::Object(map) if map.is_empty() => "EMPTY_DICT".to_string(),
        Value::Object(map) => {
            let preview: Vec<String> = map
                .keys()
                .take(3)
                .map(|k| truncate(&clean(k), MAX_KEY_CHARS))
                .collect();
            format!("DICT_{}_KEYS_{}", map.len(), preview.join("_"))
        }
        Value::Null => "NULL".to_string(),
        Value::String(s) if s.is_empty() => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        other => truncate(&clean(&display(other)), MAX_CELL_CHARS),
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn clean(s: &str) -> String {
    s.replace(',', ";")
        .replace('"', "'")
        .replace('\r', "")
        .replace('\n', " ")
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
