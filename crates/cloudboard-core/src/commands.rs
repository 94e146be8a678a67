use std::fs;
use std::io::{self, Read};

use anyhow::{Context, anyhow, bail};
use tracing::{debug, info, instrument, warn};

use crate::cli::Invocation;
use crate::filter::{FilterElement, FilterTerm, Operator};
use crate::inventory::{BUCKET_FIELDS, Bucket, InventoryTable, SortDirection, chart_data, fixture_buckets};
use crate::layout::{LayoutItem, LayoutStore};
use crate::page::{Page, WidgetType};
use crate::render::Renderer;
use crate::store::PageStore;
use crate::view::{Intent, Level, PageView, Router, custom_page_path};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "pages",
        "show",
        "page-add",
        "page-remove",
        "page-rename",
        "widget-add",
        "widget-remove",
        "widget-copy",
        "widget-rename",
        "layout",
        "export",
        "import",
        "reset",
        "inventory",
        "filter",
        "chart",
        "view-layout",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

/// Router for a terminal session: remembers the last path and reports
/// navigation on stdout.
#[derive(Debug, Clone)]
pub struct ConsoleRouter {
    path: String,
}

impl ConsoleRouter {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Router for ConsoleRouter {
    fn current_path(&self) -> String {
        self.path.clone()
    }

    fn navigate(&mut self, path: &str) {
        debug!(from = %self.path, to = %path, "navigating");
        self.path = path.to_string();
        println!("Now viewing {path}");
    }
}

#[instrument(skip(store, layouts, renderer, inv))]
pub fn dispatch(
    store: &mut PageStore,
    layouts: &mut LayoutStore,
    renderer: &Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let command = inv.command.as_str();
    let args = inv.args.as_slice();
    debug!(command, ?args, "dispatching command");

    match command {
        "pages" => renderer.print_pages(store.pages()),
        "show" => cmd_show(store, renderer, args),
        "page-add" => cmd_page_add(store, args),
        "page-remove" => cmd_page_remove(store, args),
        "page-rename" => cmd_page_rename(store, args),
        "widget-add" => cmd_widget_add(store, args),
        "widget-remove" => cmd_widget_remove(store, args),
        "widget-copy" => cmd_widget_copy(store, args),
        "widget-rename" => cmd_widget_rename(store, args),
        "layout" => cmd_layout(store, args),
        "export" => cmd_export(store, args),
        "import" => cmd_import(store, args),
        "reset" => cmd_reset(store),
        "inventory" => cmd_inventory(store, renderer, args),
        "filter" => cmd_filter(store, renderer, args),
        "chart" => cmd_chart(store, renderer, args),
        "view-layout" => cmd_view_layout(layouts, renderer, args),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

fn cmd_show(store: &PageStore, renderer: &Renderer, args: &[String]) -> anyhow::Result<()> {
    let page_id = resolve_page(store, arg(args, 0, "page")?)?;
    let page = store
        .page(&page_id)
        .ok_or_else(|| anyhow!("page {page_id} disappeared"))?;
    renderer.print_page(page)
}

#[instrument(skip(store, args))]
fn cmd_page_add(store: &mut PageStore, args: &[String]) -> anyhow::Result<()> {
    info!("command page-add");
    let title = args.join(" ");
    let page_id = store
        .add_page(&title)?
        .ok_or_else(|| anyhow!("page-add: a page title is required"))?;
    println!("Created page {page_id} ({}).", custom_page_path(&page_id));
    Ok(())
}

#[instrument(skip(store, args))]
fn cmd_page_remove(store: &mut PageStore, args: &[String]) -> anyhow::Result<()> {
    info!("command page-remove");
    let page_id = resolve_page(store, arg(args, 0, "page")?)?;
    store.remove_page(&page_id)?;
    println!("Removed page {page_id}.");
    Ok(())
}

#[instrument(skip(store, args))]
fn cmd_page_rename(store: &mut PageStore, args: &[String]) -> anyhow::Result<()> {
    info!("command page-rename");
    let page_id = resolve_page(store, arg(args, 0, "page")?)?;
    let title = args[1..].join(" ");

    run_intent(store, &page_id, Intent::RenamePage { title })?;
    println!("Renamed page {page_id}.");
    Ok(())
}

#[instrument(skip(store, args))]
fn cmd_widget_add(store: &mut PageStore, args: &[String]) -> anyhow::Result<()> {
    info!("command widget-add");
    let page_id = resolve_page(store, arg(args, 0, "page")?)?;
    let kind: WidgetType = arg(args, 1, "widget type")?.parse()?;

    let mut is_heart = false;
    let mut words = Vec::new();
    for word in &args[2..] {
        if word == "--heart" {
            is_heart = true;
        } else {
            words.push(word.as_str());
        }
    }

    let created = run_intent(
        store,
        &page_id,
        Intent::AddWidget {
            kind,
            title: words.join(" "),
            is_heart,
        },
    )?;
    if let Some(widget_id) = created {
        println!("Added widget {widget_id} to page {page_id}.");
    }
    Ok(())
}

#[instrument(skip(store, args))]
fn cmd_widget_remove(store: &mut PageStore, args: &[String]) -> anyhow::Result<()> {
    info!("command widget-remove");
    let (page_id, widget_id) = resolve_widget(store, args)?;
    run_intent(store, &page_id, Intent::RemoveWidget {
        widget_id: widget_id.clone(),
    })?;
    println!("Removed widget {widget_id}.");
    Ok(())
}

#[instrument(skip(store, args))]
fn cmd_widget_copy(store: &mut PageStore, args: &[String]) -> anyhow::Result<()> {
    info!("command widget-copy");
    let (page_id, widget_id) = resolve_widget(store, args)?;
    if let Some(copy_id) = run_intent(store, &page_id, Intent::CopyWidget { widget_id })? {
        println!("Copied widget as {copy_id}.");
    }
    Ok(())
}

#[instrument(skip(store, args))]
fn cmd_widget_rename(store: &mut PageStore, args: &[String]) -> anyhow::Result<()> {
    info!("command widget-rename");
    let (page_id, widget_id) = resolve_widget(store, args)?;
    let title = args[2..].join(" ");
    run_intent(store, &page_id, Intent::RenameWidget {
        widget_id: widget_id.clone(),
        title,
    })?;
    println!("Renamed widget {widget_id}.");
    Ok(())
}

#[instrument(skip(store, args))]
fn cmd_layout(store: &mut PageStore, args: &[String]) -> anyhow::Result<()> {
    info!("command layout");
    let page_id = resolve_page(store, arg(args, 0, "page")?)?;
    let layout = parse_layout_json(&args[1..].join(" "))?;
    run_intent(store, &page_id, Intent::LayoutChanged { layout })?;
    println!("Updated layout of page {page_id}.");
    Ok(())
}

#[instrument(skip(store, args))]
fn cmd_export(store: &mut PageStore, args: &[String]) -> anyhow::Result<()> {
    info!("command export");
    let page_id = resolve_page(store, arg(args, 0, "page")?)?;

    let mut router = ConsoleRouter::new(custom_page_path(&page_id));
    let mut view = PageView::new(page_id);
    view.dispatch(store, &mut router, Intent::Export);
    surface(&view)?;

    let text = view
        .share_text()
        .ok_or_else(|| anyhow!("export produced no document"))?;
    print!("{text}");
    Ok(())
}

#[instrument(skip(store, args))]
fn cmd_import(store: &mut PageStore, args: &[String]) -> anyhow::Result<()> {
    info!("command import");

    let text = match args.first().map(String::as_str) {
        None | Some("-") => {
            let mut stdin = String::new();
            io::stdin()
                .read_to_string(&mut stdin)
                .context("failed reading stdin")?;
            stdin
        }
        Some(path) => fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?,
    };
    if text.trim().is_empty() {
        bail!("import: empty input");
    }

    // Import creates a new page, so the view is not bound to an existing one.
    let mut router = ConsoleRouter::new("/");
    let mut view = PageView::new("");
    let created = view.dispatch(store, &mut router, Intent::Import { text });
    surface(&view)?;

    let page_id = created.ok_or_else(|| anyhow!("import did not create a page"))?;
    println!("Imported page {page_id}.");
    Ok(())
}

#[instrument(skip(store))]
fn cmd_reset(store: &mut PageStore) -> anyhow::Result<()> {
    info!("command reset");
    store.reset_all_pages()?;
    println!("All custom pages and saved layouts removed.");
    Ok(())
}

#[instrument(skip(store, renderer, args))]
fn cmd_inventory(store: &PageStore, renderer: &Renderer, args: &[String]) -> anyhow::Result<()> {
    info!("command inventory");
    let mut table = open_table(store, arg(args, 0, "widget")?)?;

    match args.get(1).map(String::as_str) {
        None => {}
        Some("sort") => {
            let column = arg(args, 2, "sort column")?;
            let direction = match args.get(3) {
                Some(raw) => raw.parse::<SortDirection>()?,
                None => SortDirection::Asc,
            };
            table.sort_by(column, direction)?;
        }
        Some(other) => bail!("inventory: unexpected argument `{other}`; expected `sort`"),
    }

    warn_on_broken_filter(&table);
    renderer.print_buckets(&table.rows())
}

#[instrument(skip(store, renderer, args))]
fn cmd_filter(store: &PageStore, renderer: &Renderer, args: &[String]) -> anyhow::Result<()> {
    info!("command filter");
    let mut table = open_table(store, arg(args, 0, "widget")?)?;
    let action = args.get(1).map(String::as_str).unwrap_or("show");

    match action {
        "show" => {}
        "add" => table.push(parse_filter_term(&args[2..])?)?,
        "and" | "AND" => table.push(FilterElement::and())?,
        "or" | "OR" => table.push(FilterElement::or())?,
        "(" => table.push(FilterElement::open())?,
        ")" => table.push(FilterElement::close())?,
        "remove" => {
            let idx = parse_index(arg(args, 2, "token index")?)?;
            if table.remove_at(idx)?.is_none() {
                bail!("filter: no token at index {idx}");
            }
        }
        "move" => {
            let from = parse_index(arg(args, 2, "source index")?)?;
            let to = parse_index(arg(args, 3, "target index")?)?;
            if !table.move_item(from, to)? {
                bail!("filter: cannot move token {from} to {to}");
            }
        }
        "clear" => table.clear()?,
        other => bail!("filter: unknown action `{other}`"),
    }

    warn_on_broken_filter(&table);
    renderer.print_filter(table.expression())
}

#[instrument(skip(store, renderer, args))]
fn cmd_chart(store: &PageStore, renderer: &Renderer, args: &[String]) -> anyhow::Result<()> {
    info!("command chart");
    let field = arg(args, 0, "field")?;

    let rows = match args.get(1) {
        Some(widget) => {
            let table = open_table(store, widget)?;
            warn_on_broken_filter(&table);
            table.rows()
        }
        None => fixture_buckets().to_vec(),
    };

    let chart = chart_data(&rows, field)?;
    renderer.print_chart(&chart)
}

#[instrument(skip(layouts, renderer, args))]
fn cmd_view_layout(layouts: &mut LayoutStore, renderer: &Renderer, args: &[String]) -> anyhow::Result<()> {
    info!("command view-layout");
    let view_id = arg(args, 0, "view")?;

    let layout = if args.len() > 1 {
        let layout = parse_layout_json(&args[1..].join(" "))?;
        layouts.save(view_id, layout)?;
        println!("Saved layout for view {view_id}.");
        layouts.cached(view_id).map(<[LayoutItem]>::to_vec).unwrap_or_default()
    } else {
        layouts.load(view_id, Vec::new())?
    };

    renderer.print_layout(&layout)
}

fn cmd_help() -> anyhow::Result<()> {
    println!("Commands (unique prefixes work):");
    println!("  pages | show <page>");
    println!("  page-add <title..> | page-remove <page> | page-rename <page> <title..>");
    println!("  widget-add <page> <type> <title..> [--heart]");
    println!("  widget-remove|widget-copy <page> <widget> | widget-rename <page> <widget> <title..>");
    println!("  layout <page> <json> | view-layout <view> [json]");
    println!("  export <page> | import [file|-] | reset");
    println!("  inventory <widget> [sort <column> [asc|desc]]");
    println!("  filter <widget> add <field> <op> [value..] | and | or | ( | ) | remove <i> | move <from> <to> | clear | show");
    println!("  chart <field> [widget]");
    let kinds: Vec<&str> = WidgetType::ALL.iter().map(|kind| kind.as_str()).collect();
    println!("Widget types: {}", kinds.join(", "));
    println!("Filter fields: {}", BUCKET_FIELDS.join(", "));
    let ops: Vec<&str> = Operator::ALL.iter().map(|op| op.as_str()).collect();
    println!("Filter operators: {}", ops.join(", "));
    Ok(())
}

/// Runs one intent through a page view and turns an error notification back
/// into an error for the terminal.
fn run_intent(store: &mut PageStore, page_id: &str, intent: Intent) -> anyhow::Result<Option<String>> {
    let mut router = ConsoleRouter::new(custom_page_path(page_id));
    let mut view = PageView::new(page_id);
    let created = view.dispatch(store, &mut router, intent);
    surface(&view)?;
    Ok(created)
}

fn surface(view: &PageView) -> anyhow::Result<()> {
    match view.notification() {
        Some(note) if note.level == Level::Error => Err(anyhow!("{}", note.message)),
        Some(note) => {
            debug!(message = %note.message, "notification");
            Ok(())
        }
        None => Ok(()),
    }
}

fn arg<'a>(args: &'a [String], idx: usize, what: &str) -> anyhow::Result<&'a str> {
    args.get(idx)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing {what}"))
}

/// Accepts a page id, or a title that names exactly one page.
fn resolve_page(store: &PageStore, token: &str) -> anyhow::Result<String> {
    if let Some(page) = store.page(token) {
        return Ok(page.id.clone());
    }

    let by_title: Vec<&Page> = store
        .pages()
        .iter()
        .filter(|page| page.title.eq_ignore_ascii_case(token))
        .collect();
    match by_title.as_slice() {
        [page] => Ok(page.id.clone()),
        [] => Err(anyhow!("no page matches `{token}`")),
        _ => Err(anyhow!("several pages are titled `{token}`; use the page id")),
    }
}

fn resolve_widget(store: &PageStore, args: &[String]) -> anyhow::Result<(String, String)> {
    let page_id = resolve_page(store, arg(args, 0, "page")?)?;
    let widget_id = arg(args, 1, "widget")?;
    if store.widget(&page_id, widget_id).is_none() {
        bail!("page {page_id} has no widget {widget_id}");
    }
    Ok((page_id, widget_id.to_string()))
}

fn open_table(store: &PageStore, widget_id: &str) -> anyhow::Result<InventoryTable> {
    let widget = store
        .pages()
        .iter()
        .find_map(|page| page.widget(widget_id))
        .ok_or_else(|| anyhow!("no widget {widget_id} on any page"))?;
    if !widget.kind.has_filter_state() {
        bail!("widget {widget_id} is a {} widget, not a bucket table", widget.kind);
    }

    InventoryTable::open(store.storage().clone(), widget_id)
        .with_context(|| format!("failed to load filters for widget {widget_id}"))
}

fn warn_on_broken_filter(table: &InventoryTable) {
    if let Err(err) = table.expression().check::<Bucket>() {
        warn!(widget_id = table.widget_id(), %err, "filter is incomplete");
        eprintln!("warning: {err}; rows are not filtered out until the expression is fixed");
    }
}

fn parse_filter_term(args: &[String]) -> anyhow::Result<FilterElement> {
    let field = arg(args, 0, "filter field")?;
    if !BUCKET_FIELDS.contains(&field) {
        bail!("unknown filter field `{field}`; expected one of {}", BUCKET_FIELDS.join(", "));
    }

    let raw_op = arg(args, 1, "filter operator")?;
    let operator = Operator::parse(raw_op).ok_or_else(|| anyhow!("unknown filter operator `{raw_op}`"))?;

    let value = args[2..].join(" ");
    if operator.takes_value() && value.trim().is_empty() {
        bail!("operator {} needs a value", operator.as_str());
    }

    Ok(FilterElement::Filter(FilterTerm::new(field, operator, value)))
}

fn parse_index(raw: &str) -> anyhow::Result<usize> {
    raw.parse::<usize>()
        .with_context(|| format!("invalid token index `{raw}`"))
}

fn parse_layout_json(raw: &str) -> anyhow::Result<Vec<LayoutItem>> {
    if raw.trim().is_empty() {
        bail!("missing layout JSON");
    }
    serde_json::from_str(raw).context("layout must be a JSON array of {i, x, y, w, h} items")
}
