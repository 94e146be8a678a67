use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::layout::LayoutItem;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WidgetType {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "inventory")]
    Inventory,
    #[serde(rename = "pie-chart")]
    PieChart,
    #[serde(rename = "s3-buckets")]
    S3Buckets,
}

impl WidgetType {
    pub const ALL: [WidgetType; 4] = [
        WidgetType::Text,
        WidgetType::Inventory,
        WidgetType::PieChart,
        WidgetType::S3Buckets,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WidgetType::Text => "text",
            WidgetType::Inventory => "inventory",
            WidgetType::PieChart => "pie-chart",
            WidgetType::S3Buckets => "s3-buckets",
        }
    }

    /// Widgets of this type keep filter tokens under their own storage key.
    pub fn has_filter_state(self) -> bool {
        matches!(self, WidgetType::S3Buckets)
    }
}

impl fmt::Display for WidgetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WidgetType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        WidgetType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = WidgetType::ALL.iter().map(|kind| kind.as_str()).collect();
                anyhow!("unknown widget type `{s}`; expected one of {}", known.join(", "))
            })
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Widget {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: WidgetType,
    #[serde(rename = "isHeart", default, skip_serializing_if = "is_false")]
    pub is_heart: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub widgets: Vec<Widget>,
    #[serde(default)]
    pub layout: Vec<LayoutItem>,
}

impl Page {
    pub fn new(id: String, title: String) -> Self {
        Self {
            id,
            title,
            widgets: vec![],
            layout: vec![],
        }
    }

    pub fn widget(&self, widget_id: &str) -> Option<&Widget> {
        self.widgets.iter().find(|widget| widget.id == widget_id)
    }

    pub fn layout_item(&self, widget_id: &str) -> Option<&LayoutItem> {
        self.layout.iter().find(|item| item.i == widget_id)
    }

    /// Every widget must own exactly one layout entry and every layout entry
    /// must point at a widget. Returns one message per violation.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut widget_ids = BTreeSet::new();

        for widget in &self.widgets {
            if !widget_ids.insert(widget.id.as_str()) {
                problems.push(format!("duplicate widget id {}", widget.id));
            }
            let entries = self.layout.iter().filter(|item| item.i == widget.id).count();
            if entries != 1 {
                problems.push(format!(
                    "widget {} has {entries} layout entries",
                    widget.id
                ));
            }
        }

        for item in &self.layout {
            if !widget_ids.contains(item.i.as_str()) {
                problems.push(format!("layout entry {} has no widget", item.i));
            }
        }

        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widget_json_uses_browser_field_names() {
        let widget = Widget {
            id: "w1".into(),
            title: "Buckets".into(),
            kind: WidgetType::S3Buckets,
            is_heart: true,
        };
        let json = serde_json::to_value(&widget).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": "w1", "title": "Buckets", "type": "s3-buckets", "isHeart": true})
        );

        let plain: Widget =
            serde_json::from_str(r#"{"id":"w2","title":"Notes","type":"pie-chart"}"#).unwrap();
        assert_eq!(plain.kind, WidgetType::PieChart);
        assert!(!plain.is_heart);
        assert!(!serde_json::to_string(&plain).unwrap().contains("isHeart"));
    }

    #[test]
    fn widget_type_parses_case_insensitively() {
        assert_eq!("S3-Buckets".parse::<WidgetType>().unwrap(), WidgetType::S3Buckets);
        assert!("table".parse::<WidgetType>().is_err());
    }

    #[test]
    fn violations_report_orphans_on_both_sides() {
        let mut page = Page::new("p".into(), "P".into());
        page.widgets.push(Widget {
            id: "a".into(),
            title: "A".into(),
            kind: WidgetType::Text,
            is_heart: false,
        });
        page.layout.push(LayoutItem {
            i: "b".into(),
            x: 0,
            y: 0,
            w: 1,
            h: 1,
        });

        let problems = page.invariant_violations();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("widget a has 0"));
        assert!(problems[1].contains("layout entry b"));
    }
}
