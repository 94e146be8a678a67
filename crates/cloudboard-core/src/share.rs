//! Shareable page documents: commented YAML out, validated YAML (or JSON)
//! in.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::debug;

use crate::error::DashboardError;
use crate::filter::FilterExpression;
use crate::layout::{LayoutItem, PendingLayoutItem};
use crate::page::{Page, WidgetType};
use crate::storage::{Storage, filters_key};

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WidgetConfig {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: WidgetType,
    #[serde(rename = "isHeart", default, skip_serializing_if = "is_false")]
    pub is_heart: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<FilterExpression>,
}

/// A page definition that passed shape validation. Ids inside are the
/// exporter's and are replaced on import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageConfig {
    pub title: String,
    pub widgets: Vec<WidgetConfig>,
    pub layout: Vec<PendingLayoutItem>,
}

#[tracing::instrument(skip(text), fields(bytes = text.len()))]
pub fn parse_page_config(text: &str) -> Result<PageConfig, DashboardError> {
    let doc: Value = serde_yaml::from_str(text)?;
    if !doc.is_mapping() {
        return Err(DashboardError::validation(
            "configuration must be a mapping with title, widgets and layout",
        ));
    }

    let title = match doc.get("title") {
        Some(Value::String(title)) if !title.trim().is_empty() => title.trim().to_string(),
        _ => {
            return Err(DashboardError::validation(
                "configuration needs a non-empty `title` string",
            ));
        }
    };

    let Some(Value::Sequence(widget_values)) = doc.get("widgets") else {
        return Err(DashboardError::validation("`widgets` must be a sequence"));
    };
    let Some(Value::Sequence(layout_values)) = doc.get("layout") else {
        return Err(DashboardError::validation("`layout` must be a sequence"));
    };

    let widgets = widget_values
        .iter()
        .enumerate()
        .map(|(idx, value)| {
            serde_yaml::from_value::<WidgetConfig>(value.clone()).map_err(|err| {
                DashboardError::validation(format!("widget #{}: {err}", idx + 1))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let layout = layout_values
        .iter()
        .enumerate()
        .map(|(idx, value)| {
            serde_yaml::from_value::<PendingLayoutItem>(value.clone()).map_err(|err| {
                DashboardError::validation(format!("layout entry #{}: {err}", idx + 1))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    debug!(title = %title, widgets = widgets.len(), layout = layout.len(), "parsed page config");
    Ok(PageConfig {
        title,
        widgets,
        layout,
    })
}

#[derive(Serialize)]
struct TitleSection<'a> {
    title: &'a str,
}

#[derive(Serialize)]
struct WidgetsSection<'a> {
    widgets: &'a [WidgetConfig],
}

#[derive(Serialize)]
struct LayoutSection<'a> {
    layout: &'a [LayoutItem],
}

pub fn export_page(page: &Page, storage: &Storage, columns: u32) -> Result<String, DashboardError> {
    export_page_at(page, storage, columns, Utc::now())
}

#[tracing::instrument(skip(page, storage, now), fields(page_id = %page.id))]
pub fn export_page_at(
    page: &Page,
    storage: &Storage,
    columns: u32,
    now: DateTime<Utc>,
) -> Result<String, DashboardError> {
    let mut widgets = Vec::with_capacity(page.widgets.len());
    for widget in &page.widgets {
        let filters = if widget.kind.has_filter_state() {
            storage.get_json::<FilterExpression>(&filters_key(&widget.id))?
        } else {
            None
        };
        widgets.push(WidgetConfig {
            id: widget.id.clone(),
            title: widget.title.clone(),
            kind: widget.kind,
            is_heart: widget.is_heart,
            filters,
        });
    }

    let kinds: Vec<&str> = WidgetType::ALL.iter().map(|kind| kind.as_str()).collect();

    let mut out = String::new();
    out.push_str("# Cloudboard custom page\n");
    out.push_str(&format!(
        "# Exported {}\n",
        now.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));
    out.push_str("#\n");
    out.push_str("# Import this document on any dashboard to recreate the page.\n");
    out.push_str("# Widget ids are reassigned on import.\n\n");

    out.push_str("# Page title shown in the navigation menu.\n");
    out.push_str(&serde_yaml::to_string(&TitleSection { title: &page.title })?);

    out.push_str(&format!(
        "\n# Widgets on the page. `type` is one of: {}.\n",
        kinds.join(", ")
    ));
    out.push_str("# s3-buckets widgets carry their table filters.\n");
    out.push_str(&serde_yaml::to_string(&WidgetsSection { widgets: &widgets })?);

    out.push_str(&format!(
        "\n# Grid positions. `i` is a widget id; x and w count columns ({columns} per row),\n"
    ));
    out.push_str("# y and h count rows.\n");
    out.push_str(&serde_yaml::to_string(&LayoutSection {
        layout: &page.layout,
    })?);

    Ok(out)
}
