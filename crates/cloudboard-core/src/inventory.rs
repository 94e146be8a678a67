//! Static S3 bucket inventory behind the `s3-buckets` and `pie-chart`
//! widgets, plus the per-widget filterable table over it.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::OnceLock;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::error::{DashboardError, StorageError};
use crate::filter::{FilterElement, FilterExpression, FilterRow, NOT_AVAILABLE};
use crate::storage::{Storage, filters_key};

const FIXTURE_JSON: &str = include_str!("../fixtures/buckets.json");

const BYTE_UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

pub const BUCKET_FIELDS: [&str; 9] = [
    "name",
    "account",
    "accountId",
    "region",
    "size",
    "weeklyGrowth",
    "lifecycleRule",
    "lifecycleStatus",
    "storageClass",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lifecycle {
    pub rule: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub name: String,
    pub account: Account,
    pub region: String,
    pub size_bytes: u64,
    pub weekly_growth_bytes: u64,
    #[serde(default)]
    pub lifecycle: Option<Lifecycle>,
    pub storage_class: String,
    pub created_at: DateTime<Utc>,
}

impl FilterRow for Bucket {
    fn field_names() -> &'static [&'static str] {
        &BUCKET_FIELDS
    }

    fn field_value(&self, field: &str) -> Option<String> {
        let value = match field {
            "name" => self.name.clone(),
            "account" => self.account.name.clone(),
            "accountId" => self.account.id.clone(),
            "region" => self.region.clone(),
            "size" => format_bytes(self.size_bytes),
            "weeklyGrowth" => format_bytes(self.weekly_growth_bytes),
            "lifecycleRule" => self
                .lifecycle
                .as_ref()
                .map(|lc| lc.rule.clone())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            "lifecycleStatus" => self
                .lifecycle
                .as_ref()
                .map(|lc| lc.status.clone())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            "storageClass" => self.storage_class.clone(),
            _ => return None,
        };
        Some(value)
    }
}

/// The embedded fixture dataset. Parsed once.
pub fn fixture_buckets() -> &'static [Bucket] {
    static BUCKETS: OnceLock<Vec<Bucket>> = OnceLock::new();
    BUCKETS.get_or_init(|| match serde_json::from_str(FIXTURE_JSON) {
        Ok(buckets) => buckets,
        Err(err) => {
            error!(error = %err, "embedded bucket fixture is invalid");
            Vec::new()
        }
    })
}

/// `0 -> "0 Bytes"`, otherwise the largest unit that keeps the value at or
/// above one, rounded to two decimals with trailing zeros dropped.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut unit = 0;
    let mut scale: u64 = 1;
    while unit + 1 < BYTE_UNITS.len() && bytes / scale >= 1024 {
        scale *= 1024;
        unit += 1;
    }

    let value = bytes as f64 / scale as f64;
    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded} {}", BYTE_UNITS[unit])
}

fn size_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\s*(?P<num>\d+(?:\.\d+)?)\s*(?P<unit>Bytes|KB|MB|GB|TB)\s*$").ok())
        .as_ref()
}

/// Reverses `format_bytes` back to an approximate byte count so formatted
/// sizes compare correctly across units.
pub fn parse_formatted_bytes(text: &str) -> Option<f64> {
    let caps = size_pattern()?.captures(text)?;
    let num: f64 = caps.name("num")?.as_str().parse().ok()?;
    let unit = caps.name("unit")?.as_str();
    let exponent = BYTE_UNITS.iter().position(|candidate| *candidate == unit)?;
    Some(num * 1024f64.powi(exponent as i32))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Asc),
            "desc" | "descending" => Ok(SortDirection::Desc),
            other => Err(anyhow!("invalid sort direction: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    pub direction: SortDirection,
}

fn is_byte_column(column: &str) -> bool {
    matches!(column, "size" | "weeklyGrowth")
}

fn compare_column(a: &Bucket, b: &Bucket, column: &str) -> Ordering {
    let left = a.field_value(column).unwrap_or_default();
    let right = b.field_value(column).unwrap_or_default();

    if is_byte_column(column) {
        let left = parse_formatted_bytes(&left).unwrap_or(0.0);
        let right = parse_formatted_bytes(&right).unwrap_or(0.0);
        return left.partial_cmp(&right).unwrap_or(Ordering::Equal);
    }

    left.to_lowercase().cmp(&right.to_lowercase())
}

pub fn sort_buckets(rows: &mut [Bucket], sort: &SortSpec) {
    rows.sort_by(|a, b| {
        let ord = compare_column(a, b, &sort.column).then_with(|| a.name.cmp(&b.name));
        match sort.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
}

/// One `s3-buckets` widget instance. Its token list is persisted under the
/// widget id and written through on every edit.
#[derive(Debug)]
pub struct InventoryTable {
    widget_id: String,
    storage: Storage,
    expression: FilterExpression,
    sort: Option<SortSpec>,
}

impl InventoryTable {
    #[instrument(skip(storage))]
    pub fn open(storage: Storage, widget_id: &str) -> Result<Self, StorageError> {
        let expression = storage
            .get_json::<FilterExpression>(&filters_key(widget_id))?
            .unwrap_or_default();
        debug!(widget_id, tokens = expression.len(), "opened inventory table");

        Ok(Self {
            widget_id: widget_id.to_string(),
            storage,
            expression,
            sort: None,
        })
    }

    pub fn widget_id(&self) -> &str {
        &self.widget_id
    }

    pub fn expression(&self) -> &FilterExpression {
        &self.expression
    }

    pub fn sort(&self) -> Option<&SortSpec> {
        self.sort.as_ref()
    }

    pub fn push(&mut self, element: FilterElement) -> Result<(), StorageError> {
        self.edit(|expr| expr.push(element))
    }

    pub fn remove_at(&mut self, index: usize) -> Result<Option<FilterElement>, StorageError> {
        self.edit(|expr| expr.remove_at(index))
    }

    pub fn move_item(&mut self, from: usize, to: usize) -> Result<bool, StorageError> {
        self.edit(|expr| expr.move_item(from, to))
    }

    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.edit(FilterExpression::clear)
    }

    pub fn sort_by(&mut self, column: &str, direction: SortDirection) -> Result<(), DashboardError> {
        if !BUCKET_FIELDS.contains(&column) {
            return Err(DashboardError::validation(format!(
                "cannot sort by unknown column `{column}`"
            )));
        }
        self.sort = Some(SortSpec {
            column: column.to_string(),
            direction,
        });
        Ok(())
    }

    pub fn rows(&self) -> Vec<Bucket> {
        self.rows_from(fixture_buckets())
    }

    pub fn rows_from(&self, data: &[Bucket]) -> Vec<Bucket> {
        let mut rows = self.expression.apply(data);
        if let Some(sort) = &self.sort {
            sort_buckets(&mut rows, sort);
        }
        rows
    }

    /// Applies the edit to a copy and keeps it only once it is stored.
    fn edit<T, F>(&mut self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut FilterExpression) -> T,
    {
        let mut next = self.expression.clone();
        let out = f(&mut next);
        self.storage.set_json(&filters_key(&self.widget_id), &next)?;
        self.expression = next;
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub series: Vec<u64>,
}

/// Total bucket size per distinct value of `field`.
pub fn chart_data(rows: &[Bucket], field: &str) -> Result<ChartData, DashboardError> {
    if !BUCKET_FIELDS.contains(&field) || is_byte_column(field) {
        return Err(DashboardError::validation(format!(
            "cannot group chart by `{field}`"
        )));
    }

    let mut totals: BTreeMap<String, u64> = BTreeMap::new();
    for row in rows {
        let label = row
            .field_value(field)
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());
        *totals.entry(label).or_insert(0) += row.size_bytes;
    }

    let (labels, series) = totals.into_iter().unzip();
    Ok(ChartData { labels, series })
}
