use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};

use crate::notice::{CatalogNotice, NoticeContainer, NoticeKind};
use shape_planner_model::{parse_coordinate, Stop};

pub const STOPS_FILE: &str = "stops.txt";

const STOP_ID: &str = "stop_id";
const STOP_NAME: &str = "stop_name";
const STOP_LAT: &str = "stop_lat";
const STOP_LON: &str = "stop_lon";
const STOP_CODE: &str = "stop_code";

const REQUIRED_COLUMNS: &[&str] = &[STOP_ID, STOP_NAME, STOP_LAT, STOP_LON];

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("read stop catalog: {0}")]
    Read(#[from] std::io::Error),
    #[error("invalid header row: {0}")]
    Header(#[from] csv::Error),
    #[error("stop catalog is missing required column {0}")]
    MissingColumn(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogOrder {
    /// File order, used by the stop map.
    #[default]
    Source,
    /// Case-insensitive by name, used for the planner's selection lists.
    ByName,
}

#[derive(Debug, Clone, Default)]
pub struct StopCatalog {
    stops: Vec<Stop>,
    index: HashMap<String, usize>,
    notices: NoticeContainer,
}

impl StopCatalog {
    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    pub fn get(&self, stop_id: &str) -> Option<&Stop> {
        self.index.get(stop_id).map(|&pos| &self.stops[pos])
    }

    pub fn notices(&self) -> &NoticeContainer {
        &self.notices
    }

    pub fn selectable(&self) -> impl Iterator<Item = &Stop> {
        self.stops.iter().filter(|stop| stop.is_selectable())
    }

    /// Rows left out of the catalog entirely (malformed, no id, duplicate id).
    /// They are on neither the map nor the planner lists.
    pub fn dropped_count(&self) -> usize {
        self.notices
            .iter()
            .filter(|notice| notice.kind.drops_row())
            .count()
    }

    /// Rows that the planner cannot offer: dropped while loading, or kept
    /// with an incomplete record.
    pub fn skipped_count(&self) -> usize {
        self.dropped_count() + self.stops.iter().filter(|stop| !stop.is_selectable()).count()
    }

    pub fn reorder(&mut self, order: CatalogOrder) {
        if order == CatalogOrder::ByName {
            self.stops.sort_by(compare_by_name);
        }
        self.index = build_index(&self.stops);
    }
}

fn build_index(stops: &[Stop]) -> HashMap<String, usize> {
    stops
        .iter()
        .enumerate()
        .map(|(pos, stop)| (stop.stop_id.clone(), pos))
        .collect()
}

fn compare_by_name(a: &Stop, b: &Stop) -> std::cmp::Ordering {
    let key = |stop: &Stop| {
        let name = stop.stop_name.as_deref();
        (name.is_none(), name.map(str::to_lowercase))
    };
    key(a)
        .cmp(&key(b))
        .then_with(|| a.stop_name.cmp(&b.stop_name))
        .then_with(|| a.stop_id.cmp(&b.stop_id))
}

pub fn load_catalog_from_path(
    path: impl AsRef<Path>,
    order: CatalogOrder,
) -> Result<StopCatalog, CatalogError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let catalog = load_catalog_from_bytes(&data, order)?;
    tracing::info!(
        "loaded {} stops from {} ({} skipped)",
        catalog.len(),
        path.display(),
        catalog.skipped_count()
    );
    Ok(catalog)
}

pub fn load_catalog<R: Read>(
    mut reader: R,
    order: CatalogOrder,
) -> Result<StopCatalog, CatalogError> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    load_catalog_from_bytes(&data, order)
}

pub fn load_catalog_from_bytes(
    data: &[u8],
    order: CatalogOrder,
) -> Result<StopCatalog, CatalogError> {
    let data = strip_utf8_bom(data);
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::None)
        .from_reader(data);

    let headers = reader.headers()?.clone();
    let columns = Columns::resolve(&headers)?;

    let mut stops: Vec<Stop> = Vec::new();
    let mut seen: HashMap<String, u64> = HashMap::new();
    let mut notices = NoticeContainer::new();

    for (index, result) in reader.records().enumerate() {
        let row = index as u64 + 2;
        let record = match result {
            Ok(record) => record,
            Err(err) => {
                notices.push(CatalogNotice::new(
                    NoticeKind::MalformedRecord,
                    err.to_string(),
                    row,
                ));
                continue;
            }
        };
        if record.iter().all(|value| value.trim().is_empty()) {
            continue;
        }

        let stop_id = columns.value(&record, columns.stop_id).unwrap_or_default();
        let stop_name = columns.value(&record, columns.stop_name);
        if stop_id.is_empty() {
            notices.push(
                CatalogNotice::new(NoticeKind::MissingStopId, "stop has no stop_id", row)
                    .with_stop("", stop_name)
                    .with_field(STOP_ID),
            );
            continue;
        }
        if let Some(first_row) = seen.get(stop_id) {
            notices.push(
                CatalogNotice::new(
                    NoticeKind::DuplicateStopId,
                    format!("stop_id already defined on row {}", first_row),
                    row,
                )
                .with_stop(stop_id, stop_name)
                .with_field(STOP_ID),
            );
            continue;
        }
        seen.insert(stop_id.to_string(), row);

        if stop_name.is_none() {
            notices.push(
                CatalogNotice::new(NoticeKind::MissingField, "stop has no stop_name", row)
                    .with_stop(stop_id, None)
                    .with_field(STOP_NAME),
            );
        }
        let stop_lat = read_axis(
            &columns,
            &record,
            (columns.stop_lat, STOP_LAT, 90.0),
            row,
            stop_id,
            stop_name,
            &mut notices,
        );
        let stop_lon = read_axis(
            &columns,
            &record,
            (columns.stop_lon, STOP_LON, 180.0),
            row,
            stop_id,
            stop_name,
            &mut notices,
        );

        stops.push(Stop {
            stop_id: stop_id.to_string(),
            stop_code: columns
                .stop_code
                .and_then(|pos| columns.value(&record, pos))
                .map(str::to_string),
            stop_name: stop_name.map(str::to_string),
            stop_lat,
            stop_lon,
        });
    }

    let mut catalog = StopCatalog {
        index: HashMap::new(),
        stops,
        notices,
    };
    catalog.reorder(order);
    Ok(catalog)
}

/// Reads one coordinate column given as (position, field name, absolute limit).
fn read_axis(
    columns: &Columns,
    record: &StringRecord,
    (pos, field, limit): (usize, &'static str, f64),
    row: u64,
    stop_id: &str,
    stop_name: Option<&str>,
    notices: &mut NoticeContainer,
) -> Option<f64> {
    let Some(raw) = columns.value(record, pos) else {
        notices.push(
            CatalogNotice::new(NoticeKind::MissingField, format!("stop has no {}", field), row)
                .with_stop(stop_id, stop_name)
                .with_field(field),
        );
        return None;
    };
    match parse_coordinate(raw) {
        Ok(value) if value.abs() <= limit => Some(value),
        _ => {
            tracing::warn!(
                "invalid coordinates for stop {}: {} = {:?}",
                stop_name.unwrap_or(stop_id),
                field,
                raw
            );
            notices.push(
                CatalogNotice::new(
                    NoticeKind::InvalidCoordinates,
                    format!("{} is not a valid coordinate: {:?}", field, raw),
                    row,
                )
                .with_stop(stop_id, stop_name)
                .with_field(field),
            );
            None
        }
    }
}

struct Columns {
    stop_id: usize,
    stop_name: usize,
    stop_lat: usize,
    stop_lon: usize,
    stop_code: Option<usize>,
}

impl Columns {
    fn resolve(headers: &StringRecord) -> Result<Self, CatalogError> {
        let header_index: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(index, value)| (value.trim().to_ascii_lowercase(), index))
            .collect();
        let required = |name: &'static str| {
            header_index
                .get(name)
                .copied()
                .ok_or(CatalogError::MissingColumn(name))
        };
        for name in REQUIRED_COLUMNS {
            required(name)?;
        }
        Ok(Self {
            stop_id: required(STOP_ID)?,
            stop_name: required(STOP_NAME)?,
            stop_lat: required(STOP_LAT)?,
            stop_lon: required(STOP_LON)?,
            stop_code: header_index.get(STOP_CODE).copied(),
        })
    }

    fn value<'r>(&self, record: &'r StringRecord, pos: usize) -> Option<&'r str> {
        record
            .get(pos)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

fn strip_utf8_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STOPS: &str = "stop_id,stop_code,stop_name,stop_lat,stop_lon\n\
        S2,200,market square,51.50,-0.10\n\
        S1,100,Abbey Road,51.53,-0.18\n\
        S3,,Broken,north,-0.12\n\
        S4,400,Central,51.51,-0.13\n";

    #[test]
    fn keeps_source_order() {
        let catalog = load_catalog(STOPS.as_bytes(), CatalogOrder::Source).unwrap();
        let ids: Vec<&str> = catalog.stops().iter().map(|s| s.stop_id.as_str()).collect();
        assert_eq!(ids, vec!["S2", "S1", "S3", "S4"]);
    }

    #[test]
    fn sorts_by_name_case_insensitively() {
        let catalog = load_catalog(STOPS.as_bytes(), CatalogOrder::ByName).unwrap();
        let names: Vec<&str> = catalog.selectable().map(|s| s.display_name()).collect();
        assert_eq!(names, vec!["Abbey Road", "Central", "market square"]);
        assert_eq!(catalog.get("S2").unwrap().stop_code.as_deref(), Some("200"));
    }

    #[test]
    fn non_numeric_latitude_does_not_abort_loading() {
        let catalog = load_catalog(STOPS.as_bytes(), CatalogOrder::Source).unwrap();
        assert_eq!(catalog.len(), 4);
        let broken = catalog.get("S3").unwrap();
        assert_eq!(broken.stop_lat, None);
        assert_eq!(broken.stop_lon, Some(-0.12));
        assert_eq!(broken.stop_code, None);
        assert_eq!(catalog.notices().count_kind(NoticeKind::InvalidCoordinates), 1);
        assert_eq!(catalog.skipped_count(), 1);
    }

    #[test]
    fn drops_rows_without_id_and_duplicates() {
        let data = "stop_id,stop_name,stop_lat,stop_lon\n\
            ,Nameless,1.0,1.0\n\
            A,First,1.0,1.0\n\
            A,Second,2.0,2.0\n\
            B,,3.0,3.0\n";
        let catalog = load_catalog(data.as_bytes(), CatalogOrder::Source).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("A").unwrap().display_name(), "First");
        assert_eq!(catalog.notices().count_kind(NoticeKind::MissingStopId), 1);
        assert_eq!(catalog.notices().count_kind(NoticeKind::DuplicateStopId), 1);
        assert_eq!(catalog.notices().count_kind(NoticeKind::MissingField), 1);
        assert_eq!(catalog.skipped_count(), 3);
        assert_eq!(catalog.selectable().count(), 1);
        assert_eq!(catalog.dropped_count(), 2);
    }

    #[test]
    fn accepts_bom_and_padded_headers() {
        let data = "\u{feff} Stop_ID , stop_name,stop_lat,stop_lon\nX, Depot ,1.5,2.5\n";
        let catalog = load_catalog(data.as_bytes(), CatalogOrder::Source).unwrap();
        let stop = catalog.get("X").unwrap();
        assert_eq!(stop.display_name(), "Depot");
        assert_eq!(stop.stop_lat, Some(1.5));
    }

    #[test]
    fn rejects_missing_required_column() {
        let data = "stop_id,stop_name,stop_lat\nX,Depot,1.5\n";
        let err = load_catalog(data.as_bytes(), CatalogOrder::Source).unwrap_err();
        assert!(matches!(err, CatalogError::MissingColumn("stop_lon")));
    }

    #[test]
    fn out_of_range_latitude_is_invalid() {
        let data = "stop_id,stop_name,stop_lat,stop_lon\nX,Depot,95.0,2.5\n";
        let catalog = load_catalog(data.as_bytes(), CatalogOrder::Source).unwrap();
        assert_eq!(catalog.get("X").unwrap().stop_lat, None);
        assert_eq!(catalog.notices().count_kind(NoticeKind::InvalidCoordinates), 1);
    }

    #[test]
    fn empty_catalog_is_not_an_error() {
        let data = "stop_id,stop_name,stop_lat,stop_lon\n";
        let catalog = load_catalog(data.as_bytes(), CatalogOrder::ByName).unwrap();
        assert!(catalog.is_empty());
        assert_eq!(catalog.skipped_count(), 0);
    }
}
