use std::io::{self, IsTerminal, Write};

use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::filter::{FilterElement, FilterExpression};
use crate::inventory::{Bucket, ChartData, format_bytes};
use crate::layout::LayoutItem;
use crate::page::Page;

const CHART_BAR_WIDTH: u64 = 30;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg.color_enabled()?;
        Ok(Self {
            color: color && io::stdout().is_terminal(),
        })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip_all, fields(pages = pages.len()))]
    pub fn print_pages(&self, pages: &[Page]) -> anyhow::Result<()> {
        self.write_pages(io::stdout().lock(), pages)
    }

    pub fn write_pages<W: Write>(&self, out: W, pages: &[Page]) -> anyhow::Result<()> {
        let headers = vec!["ID".to_string(), "Title".to_string(), "Widgets".to_string()];
        let rows = pages
            .iter()
            .map(|page| {
                vec![
                    self.paint(&page.id, "33"),
                    page.title.clone(),
                    page.widgets.len().to_string(),
                ]
            })
            .collect();
        write_table(out, headers, rows)
    }

    #[tracing::instrument(skip_all, fields(page_id = %page.id))]
    pub fn print_page(&self, page: &Page) -> anyhow::Result<()> {
        self.write_page(io::stdout().lock(), page)
    }

    pub fn write_page<W: Write>(&self, mut out: W, page: &Page) -> anyhow::Result<()> {
        writeln!(out, "{} ({})", self.paint(&page.title, "1"), page.id)?;
        if page.widgets.is_empty() {
            writeln!(out, "No widgets.")?;
            return Ok(());
        }
        writeln!(out)?;

        let headers = ["ID", "Type", "Title", "", "X", "Y", "W", "H"]
            .map(str::to_string)
            .to_vec();
        let rows = page
            .widgets
            .iter()
            .map(|widget| {
                let slot = page.layout_item(&widget.id);
                let coord = |pick: fn(&LayoutItem) -> u32| {
                    slot.map(|item| pick(item).to_string())
                        .unwrap_or_else(|| "-".to_string())
                };
                vec![
                    self.paint(&widget.id, "33"),
                    widget.kind.to_string(),
                    widget.title.clone(),
                    if widget.is_heart {
                        self.paint("♥", "31")
                    } else {
                        String::new()
                    },
                    coord(|item| item.x),
                    coord(|item| item.y),
                    coord(|item| item.w),
                    coord(|item| item.h),
                ]
            })
            .collect();
        write_table(out, headers, rows)
    }

    #[tracing::instrument(skip_all, fields(items = layout.len()))]
    pub fn print_layout(&self, layout: &[LayoutItem]) -> anyhow::Result<()> {
        let headers = ["Item", "X", "Y", "W", "H"].map(str::to_string).to_vec();
        let rows = layout
            .iter()
            .map(|item| {
                vec![
                    item.i.clone(),
                    item.x.to_string(),
                    item.y.to_string(),
                    item.w.to_string(),
                    item.h.to_string(),
                ]
            })
            .collect();
        write_table(io::stdout().lock(), headers, rows)
    }

    #[tracing::instrument(skip_all, fields(rows = buckets.len()))]
    pub fn print_buckets(&self, buckets: &[Bucket]) -> anyhow::Result<()> {
        self.write_buckets(io::stdout().lock(), buckets)
    }

    pub fn write_buckets<W: Write>(&self, mut out: W, buckets: &[Bucket]) -> anyhow::Result<()> {
        let headers = [
            "Name",
            "Account",
            "Region",
            "Size",
            "Weekly growth",
            "Lifecycle",
            "Class",
        ]
        .map(str::to_string)
        .to_vec();

        let rows = buckets
            .iter()
            .map(|bucket| {
                let lifecycle = match &bucket.lifecycle {
                    Some(lc) => format!("{} ({})", lc.rule, lc.status),
                    None => self.paint("N/A", "2"),
                };
                vec![
                    bucket.name.clone(),
                    bucket.account.name.clone(),
                    bucket.region.clone(),
                    format_bytes(bucket.size_bytes),
                    format_bytes(bucket.weekly_growth_bytes),
                    lifecycle,
                    bucket.storage_class.clone(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)?;
        writeln!(out, "{} bucket(s)", buckets.len())?;
        Ok(())
    }

    pub fn print_filter(&self, expression: &FilterExpression) -> anyhow::Result<()> {
        self.write_filter(io::stdout().lock(), expression)
    }

    pub fn write_filter<W: Write>(&self, mut out: W, expression: &FilterExpression) -> anyhow::Result<()> {
        if expression.is_empty() {
            writeln!(out, "No filters; every row is shown.")?;
            return Ok(());
        }

        for (idx, element) in expression.elements().iter().enumerate() {
            let token = match element {
                FilterElement::Filter(_) => self.paint(&element.to_string(), "36"),
                _ => self.paint(&element.to_string(), "35"),
            };
            writeln!(out, "{idx:>3}  {token}")?;
        }
        Ok(())
    }

    pub fn print_chart(&self, chart: &ChartData) -> anyhow::Result<()> {
        self.write_chart(io::stdout().lock(), chart)
    }

    pub fn write_chart<W: Write>(&self, out: W, chart: &ChartData) -> anyhow::Result<()> {
        let peak = chart.series.iter().copied().max().unwrap_or(0).max(1);
        let headers = ["Label", "Total", ""].map(str::to_string).to_vec();
        let rows = chart
            .labels
            .iter()
            .zip(&chart.series)
            .map(|(label, total)| {
                let len = total.saturating_mul(CHART_BAR_WIDTH) / peak;
                let bar = "█".repeat(usize::try_from(len).unwrap_or(0));
                vec![label.clone(), format_bytes(*total), self.paint(&bar, "34")]
            })
            .collect();
        write_table(out, headers, rows)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    let header_line: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(header, width)| pad(header, *width))
        .collect();
    writeln!(writer, "{}", header_line.join(" ").trim_end())?;

    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    writeln!(writer, "{}", rule.join(" ").trim_end())?;

    for row in rows {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| pad(cell, *width))
            .collect();
        writeln!(writer, "{}", cells.join(" ").trim_end())?;
    }

    Ok(())
}

fn pad(cell: &str, width: usize) -> String {
    let visible = UnicodeWidthStr::width(strip_ansi(cell).as_str());
    format!("{cell}{}", " ".repeat(width.saturating_sub(visible)))
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterTerm, Operator};
    use crate::inventory::fixture_buckets;
    use crate::page::{Widget, WidgetType};

    fn render<F>(f: F) -> String
    where
        F: FnOnce(&mut Vec<u8>) -> anyhow::Result<()>,
    {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn color_setting_comes_from_config() {
        let mut cfg = Config::default();
        cfg.apply_overrides([("color".to_string(), "off".to_string())]);
        assert!(!Renderer::new(&cfg).unwrap().color);

        cfg.apply_overrides([("color".to_string(), "loud".to_string())]);
        assert!(Renderer::new(&cfg).is_err());
    }

    #[test]
    fn strip_ansi_removes_escape_sequences() {
        assert_eq!(strip_ansi("\x1b[33mid-1\x1b[0m"), "id-1");
    }

    #[test]
    fn painted_cells_align_by_visible_width() {
        let renderer = Renderer { color: true };
        let mut page = Page::new("id-1".into(), "Ops".into());
        page.widgets.push(Widget {
            id: "id-2".into(),
            title: "Buckets".into(),
            kind: WidgetType::S3Buckets,
            is_heart: true,
        });
        page.layout.push(LayoutItem {
            i: "id-2".into(),
            x: 0,
            y: 0,
            w: 6,
            h: 4,
        });

        let text = render(|buf| renderer.write_page(buf, &page));
        let lines: Vec<String> = text.lines().map(strip_ansi).collect();
        assert_eq!(lines[0], "Ops (id-1)");
        assert!(lines[2].starts_with("ID   Type       Title"), "{}", lines[2]);
        assert!(lines[4].starts_with("id-2 s3-buckets Buckets ♥ 0 0 6 4"), "{}", lines[4]);
    }

    #[test]
    fn bucket_table_shows_formatted_sizes() {
        let text = render(|buf| Renderer::plain().write_buckets(buf, fixture_buckets()));
        assert!(text.contains("analytics-reports"));
        assert!(text.contains("1.5 KB"));
        assert!(text.contains("0 Bytes"));
        assert!(text.trim_end().ends_with("10 bucket(s)"));
    }

    #[test]
    fn filter_tokens_are_indexed() {
        let expression = FilterExpression::new(vec![
            FilterElement::Filter(FilterTerm::new("name", Operator::Contains, "prod")),
            FilterElement::and(),
        ]);
        let text = render(|buf| Renderer::plain().write_filter(buf, &expression));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("  0  name contains"));
        assert_eq!(lines[1], "  1  AND");
    }

    #[test]
    fn chart_bars_scale_to_peak() {
        let chart = ChartData {
            labels: vec!["a".into(), "b".into()],
            series: vec![2048, 1024],
        };
        let text = render(|buf| Renderer::plain().write_chart(buf, &chart));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[2].matches('█').count(), 30);
        assert_eq!(lines[3].matches('█').count(), 15);
    }
}
