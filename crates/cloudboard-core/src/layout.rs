use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::error::StorageError;
use crate::storage::{Storage, layout_key};

pub const DEFAULT_COLUMNS: u32 = 20;
pub const DEFAULT_WIDGET_WIDTH: u32 = 6;
pub const DEFAULT_WIDGET_HEIGHT: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSettings {
    pub columns: u32,
    pub default_w: u32,
    pub default_h: u32,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            columns: DEFAULT_COLUMNS,
            default_w: DEFAULT_WIDGET_WIDTH,
            default_h: DEFAULT_WIDGET_HEIGHT,
        }
    }
}

/// Position and size of one widget, in grid columns and rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutItem {
    pub i: String,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl LayoutItem {
    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.h)
    }

    pub fn clamp_to_grid(&mut self, columns: u32) {
        let columns = columns.max(1);
        self.x = self.x.min(columns - 1);
        self.w = self.w.clamp(1, columns - self.x);
        self.h = self.h.max(1);
    }
}

/// A layout record as it arrives from outside the store. `y` is `None` when
/// the item asks to be appended below everything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLayoutItem {
    pub i: String,
    pub x: u32,
    #[serde(default, deserialize_with = "deserialize_row")]
    pub y: Option<u32>,
    pub w: u32,
    pub h: u32,
}

impl From<LayoutItem> for PendingLayoutItem {
    fn from(item: LayoutItem) -> Self {
        Self {
            i: item.i,
            x: item.x,
            y: Some(item.y),
            w: item.w,
            h: item.h,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RowSpec {
    Row(u32),
    Keyword(String),
}

fn deserialize_row<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RowSpec>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RowSpec::Row(row)) => Ok(Some(row)),
        Some(RowSpec::Keyword(word)) if word.eq_ignore_ascii_case("append") => Ok(None),
        Some(RowSpec::Keyword(word)) => Err(serde::de::Error::custom(format!(
            "invalid row `{word}`; expected a number or `append`"
        ))),
    }
}

/// First row below every item in the layout.
pub fn next_free_row(layout: &[LayoutItem]) -> u32 {
    layout.iter().map(LayoutItem::bottom).max().unwrap_or(0)
}

/// Slot for a newly added widget: columns step by two per existing item and
/// wrap at the grid width; the row is always appended.
pub fn default_slot(layout: &[LayoutItem], grid: &GridSettings, widget_id: &str) -> LayoutItem {
    let columns = grid.columns.max(1);
    let x = ((layout.len() as u64 * 2) % u64::from(columns)) as u32;
    LayoutItem {
        i: widget_id.to_string(),
        x,
        y: next_free_row(layout),
        w: grid.default_w.max(1),
        h: grid.default_h.max(1),
    }
}

/// Resolves append sentinels in order: each appended item lands below every
/// concrete item and every item appended before it.
pub fn resolve_append_rows(items: Vec<PendingLayoutItem>) -> Vec<LayoutItem> {
    let mut bottom = items
        .iter()
        .filter_map(|item| item.y.map(|y| y.saturating_add(item.h)))
        .max()
        .unwrap_or(0);

    items
        .into_iter()
        .map(|item| {
            let y = match item.y {
                Some(y) => y,
                None => {
                    let y = bottom;
                    bottom = bottom.saturating_add(item.h);
                    y
                }
            };
            LayoutItem {
                i: item.i,
                x: item.x,
                y,
                w: item.w,
                h: item.h,
            }
        })
        .collect()
}

/// Per-view grid layouts for views that are not custom pages. The cache is
/// what renders; storage is overwritten on every change.
#[derive(Debug)]
pub struct LayoutStore {
    storage: Storage,
    cache: HashMap<String, Vec<LayoutItem>>,
}

impl LayoutStore {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            cache: HashMap::new(),
        }
    }

    #[tracing::instrument(skip(self, default))]
    pub fn load(
        &mut self,
        view_id: &str,
        default: Vec<LayoutItem>,
    ) -> Result<Vec<LayoutItem>, StorageError> {
        let layout = self
            .storage
            .get_json::<Vec<LayoutItem>>(&layout_key(view_id))?
            .unwrap_or_else(|| {
                debug!(view_id, "no stored layout; using default");
                default
            });
        self.cache.insert(view_id.to_string(), layout.clone());
        Ok(layout)
    }

    #[tracing::instrument(skip(self, layout), fields(items = layout.len()))]
    pub fn save(&mut self, view_id: &str, layout: Vec<LayoutItem>) -> Result<(), StorageError> {
        self.storage.set_json(&layout_key(view_id), &layout)?;
        self.cache.insert(view_id.to_string(), layout);
        Ok(())
    }

    pub fn cached(&self, view_id: &str) -> Option<&[LayoutItem]> {
        self.cache.get(view_id).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(i: &str, x: u32, y: u32, w: u32, h: u32) -> LayoutItem {
        LayoutItem {
            i: i.to_string(),
            x,
            y,
            w,
            h,
        }
    }

    #[test]
    fn default_slot_steps_columns_and_appends() {
        let grid = GridSettings::default();
        let mut layout = Vec::new();
        for n in 0..11 {
            let slot = default_slot(&layout, &grid, &format!("w{n}"));
            layout.push(slot);
        }

        let xs: Vec<u32> = layout.iter().map(|item| item.x).collect();
        assert_eq!(xs, vec![0, 2, 4, 6, 8, 10, 12, 14, 16, 18, 0]);
        assert_eq!(layout[0].y, 0);
        assert_eq!(layout[1].y, 4);
        assert_eq!(layout[10].y, 40);
        assert!(layout.iter().all(|item| item.w == 6 && item.h == 4));
    }

    #[test]
    fn append_rows_stack_below_concrete_items() {
        let pending = vec![
            PendingLayoutItem {
                i: "a".into(),
                x: 0,
                y: None,
                w: 6,
                h: 2,
            },
            PendingLayoutItem::from(item("b", 6, 3, 6, 4)),
            PendingLayoutItem {
                i: "c".into(),
                x: 0,
                y: None,
                w: 6,
                h: 5,
            },
        ];

        let resolved = resolve_append_rows(pending);
        assert_eq!(resolved[0].y, 7);
        assert_eq!(resolved[1].y, 3);
        assert_eq!(resolved[2].y, 9);
    }

    #[test]
    fn row_accepts_null_missing_and_append_keyword() {
        let parsed: Vec<PendingLayoutItem> = serde_json::from_str(
            r#"[
                {"i":"a","x":0,"y":null,"w":1,"h":1},
                {"i":"b","x":0,"w":1,"h":1},
                {"i":"c","x":0,"y":"append","w":1,"h":1},
                {"i":"d","x":0,"y":5,"w":1,"h":1}
            ]"#,
        )
        .unwrap();
        let rows: Vec<Option<u32>> = parsed.iter().map(|item| item.y).collect();
        assert_eq!(rows, vec![None, None, None, Some(5)]);

        let bad = serde_json::from_str::<PendingLayoutItem>(r#"{"i":"a","x":0,"y":"top","w":1,"h":1}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn clamp_keeps_items_inside_the_grid() {
        let mut wide = item("a", 25, 0, 0, 0);
        wide.clamp_to_grid(20);
        assert_eq!((wide.x, wide.w, wide.h), (19, 1, 1));

        let mut overflowing = item("b", 16, 0, 6, 2);
        overflowing.clamp_to_grid(20);
        assert_eq!((overflowing.x, overflowing.w), (16, 4));
    }

    #[test]
    fn layout_store_caches_and_overwrites() {
        let storage = Storage::in_memory();
        let mut layouts = LayoutStore::new(storage.clone());

        let default = vec![item("chart", 0, 0, 10, 4)];
        let loaded = layouts.load("inventory", default.clone()).unwrap();
        assert_eq!(loaded, default);
        assert!(storage.get_raw("layout-inventory").unwrap().is_none());

        let moved = vec![item("chart", 4, 2, 10, 4)];
        layouts.save("inventory", moved.clone()).unwrap();
        assert_eq!(layouts.cached("inventory"), Some(moved.as_slice()));

        let mut reopened = LayoutStore::new(storage);
        assert_eq!(reopened.load("inventory", default).unwrap(), moved);
    }
}
