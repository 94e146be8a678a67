//! Page/widget state store.
//!
//! The store owns every custom page and is the only writer of the
//! `customPages` blob. Each mutation is applied to a copy of the page list,
//! written through to storage, and only then committed and announced to
//! subscribers, so a failed write leaves the in-memory state untouched.
//! Unknown page or widget ids make a mutation a no-op.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, error, info, instrument, warn};

use crate::error::DashboardError;
use crate::filter::FilterExpression;
use crate::ids::{IdGenerator, fresh_id};
use crate::layout::{GridSettings, LayoutItem, default_slot, resolve_append_rows};
use crate::page::{Page, Widget, WidgetType};
use crate::share::{PageConfig, parse_page_config};
use crate::storage::{CUSTOM_PAGES_KEY, ID_COUNTER_KEY, Storage, filters_key, is_reset_sweep_key};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    PageAdded { page_id: String },
    PageRemoved { page_id: String },
    PageRenamed { page_id: String },
    PageImported { page_id: String },
    WidgetAdded { page_id: String, widget_id: String },
    WidgetCopied { page_id: String, source_id: String, widget_id: String },
    WidgetRemoved { page_id: String, widget_id: String },
    WidgetRenamed { page_id: String, widget_id: String },
    LayoutUpdated { page_id: String },
    Reset,
}

pub type SubscriptionId = u64;

type Listener = Box<dyn FnMut(&StoreEvent)>;

pub struct PageStore {
    storage: Storage,
    ids: Box<dyn IdGenerator>,
    grid: GridSettings,
    pages: Vec<Page>,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: SubscriptionId,
}

impl std::fmt::Debug for PageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageStore")
            .field("grid", &self.grid)
            .field("pages", &self.pages)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl PageStore {
    /// Loads the persisted pages. A blob that no longer parses is logged and
    /// replaced by an empty collection on the next write.
    #[instrument(skip(storage, ids))]
    pub fn open(
        storage: Storage,
        mut ids: Box<dyn IdGenerator>,
        grid: GridSettings,
    ) -> Result<Self, DashboardError> {
        let pages = storage
            .get_json::<Vec<Page>>(CUSTOM_PAGES_KEY)?
            .unwrap_or_default();
        if let Some(next) = storage.get_json::<u64>(ID_COUNTER_KEY)? {
            ids.resume_from(next);
        }

        for page in &pages {
            ids.observe(&page.id);
            for widget in &page.widgets {
                ids.observe(&widget.id);
            }
            let problems = page.invariant_violations();
            if !problems.is_empty() {
                error!(page_id = %page.id, ?problems, "stored page violates widget/layout pairing");
            }
        }

        info!(pages = pages.len(), "opened page store");
        Ok(Self {
            storage,
            ids,
            grid,
            pages,
            listeners: Vec::new(),
            next_subscription: 1,
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn grid(&self) -> &GridSettings {
        &self.grid
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page(&self, page_id: &str) -> Option<&Page> {
        self.pages.iter().find(|page| page.id == page_id)
    }

    pub fn widget(&self, page_id: &str, widget_id: &str) -> Option<&Widget> {
        self.page(page_id)?.widget(widget_id)
    }

    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&StoreEvent) + 'static,
    {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    #[instrument(skip(self))]
    pub fn add_page(&mut self, title: &str) -> Result<Option<String>, DashboardError> {
        let title = title.trim();
        if title.is_empty() {
            debug!("ignoring add_page with blank title");
            return Ok(None);
        }

        let taken = self.taken_ids();
        let page_id = fresh_id(self.ids.as_mut(), &taken);
        let mut next = self.pages.clone();
        next.push(Page::new(page_id.clone(), title.to_string()));

        self.commit(next, StoreEvent::PageAdded {
            page_id: page_id.clone(),
        })?;
        Ok(Some(page_id))
    }

    #[instrument(skip(self))]
    pub fn remove_page(&mut self, page_id: &str) -> Result<(), DashboardError> {
        let Some(page) = self.page(page_id) else {
            debug!("remove_page: no such page");
            return Ok(());
        };
        let filtered: Vec<String> = page
            .widgets
            .iter()
            .filter(|widget| widget.kind.has_filter_state())
            .map(|widget| widget.id.clone())
            .collect();

        let mut next = self.pages.clone();
        next.retain(|page| page.id != page_id);
        self.commit(next, StoreEvent::PageRemoved {
            page_id: page_id.to_string(),
        })?;

        for widget_id in &filtered {
            self.drop_filters(widget_id);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn add_widget_to_page(
        &mut self,
        page_id: &str,
        kind: WidgetType,
        title: &str,
        is_heart: bool,
    ) -> Result<Option<String>, DashboardError> {
        let title = title.trim();
        if title.is_empty() {
            debug!("ignoring add_widget_to_page with blank title");
            return Ok(None);
        }

        let taken = self.taken_ids();
        let widget_id = fresh_id(self.ids.as_mut(), &taken);
        let grid = self.grid;
        let mut next = self.pages.clone();
        let Some(page) = next.iter_mut().find(|page| page.id == page_id) else {
            debug!("add_widget_to_page: no such page");
            return Ok(None);
        };

        let slot = default_slot(&page.layout, &grid, &widget_id);
        page.widgets.push(Widget {
            id: widget_id.clone(),
            title: title.to_string(),
            kind,
            is_heart,
        });
        page.layout.push(slot);

        self.commit(next, StoreEvent::WidgetAdded {
            page_id: page_id.to_string(),
            widget_id: widget_id.clone(),
        })?;
        Ok(Some(widget_id))
    }

    #[instrument(skip(self))]
    pub fn remove_widget_from_page(&mut self, page_id: &str, widget_id: &str) -> Result<(), DashboardError> {
        let mut next = self.pages.clone();
        let Some(page) = next.iter_mut().find(|page| page.id == page_id) else {
            debug!("remove_widget_from_page: no such page");
            return Ok(());
        };
        if page.widget(widget_id).is_none() {
            debug!("remove_widget_from_page: no such widget");
            return Ok(());
        }

        page.widgets.retain(|widget| widget.id != widget_id);
        page.layout.retain(|item| item.i != widget_id);

        self.commit(next, StoreEvent::WidgetRemoved {
            page_id: page_id.to_string(),
            widget_id: widget_id.to_string(),
        })?;
        self.drop_filters(widget_id);
        Ok(())
    }

    /// Replaces the whole layout as reported by the grid surface. No
    /// collision or bounds checks happen here.
    #[instrument(skip(self, layout), fields(items = layout.len()))]
    pub fn update_page_layout(&mut self, page_id: &str, layout: Vec<LayoutItem>) -> Result<(), DashboardError> {
        let mut next = self.pages.clone();
        let Some(page) = next.iter_mut().find(|page| page.id == page_id) else {
            debug!("update_page_layout: no such page");
            return Ok(());
        };
        page.layout = layout;

        self.commit(next, StoreEvent::LayoutUpdated {
            page_id: page_id.to_string(),
        })
    }

    /// Duplicates a widget under a fresh id and slot. Persisted table filters
    /// are copied along with it.
    #[instrument(skip(self))]
    pub fn copy_widget(&mut self, page_id: &str, widget_id: &str) -> Result<Option<String>, DashboardError> {
        let Some(source) = self.widget(page_id, widget_id).cloned() else {
            debug!("copy_widget: no such page or widget");
            return Ok(None);
        };

        let taken = self.taken_ids();
        let copy_id = fresh_id(self.ids.as_mut(), &taken);
        let grid = self.grid;
        let mut next = self.pages.clone();
        let Some(page) = next.iter_mut().find(|page| page.id == page_id) else {
            return Ok(None);
        };

        let slot = default_slot(&page.layout, &grid, &copy_id);
        page.widgets.push(Widget {
            id: copy_id.clone(),
            ..source.clone()
        });
        page.layout.push(slot);

        let filters = if source.kind.has_filter_state() {
            self.storage.get_json::<FilterExpression>(&filters_key(widget_id))?
        } else {
            None
        };

        self.commit(next, StoreEvent::WidgetCopied {
            page_id: page_id.to_string(),
            source_id: widget_id.to_string(),
            widget_id: copy_id.clone(),
        })?;

        if let Some(filters) = filters {
            self.store_filters(&copy_id, &filters);
        }
        Ok(Some(copy_id))
    }

    /// Renames without validating the title; callers trim and reject blanks.
    #[instrument(skip(self))]
    pub fn update_page_title(&mut self, page_id: &str, title: &str) -> Result<(), DashboardError> {
        let mut next = self.pages.clone();
        let Some(page) = next.iter_mut().find(|page| page.id == page_id) else {
            debug!("update_page_title: no such page");
            return Ok(());
        };
        page.title = title.to_string();

        self.commit(next, StoreEvent::PageRenamed {
            page_id: page_id.to_string(),
        })
    }

    #[instrument(skip(self))]
    pub fn update_widget_title(&mut self, page_id: &str, widget_id: &str, title: &str) -> Result<(), DashboardError> {
        let mut next = self.pages.clone();
        let Some(widget) = next
            .iter_mut()
            .find(|page| page.id == page_id)
            .and_then(|page| page.widgets.iter_mut().find(|widget| widget.id == widget_id))
        else {
            debug!("update_widget_title: no such page or widget");
            return Ok(());
        };
        widget.title = title.to_string();

        self.commit(next, StoreEvent::WidgetRenamed {
            page_id: page_id.to_string(),
            widget_id: widget_id.to_string(),
        })
    }

    /// Drops every page and sweeps all layout, widget and position state from
    /// storage, including keys owned by the grid surface itself.
    #[instrument(skip(self))]
    pub fn reset_all_pages(&mut self) -> Result<(), DashboardError> {
        self.commit(Vec::new(), StoreEvent::Reset)?;
        let removed = self.storage.remove_matching(is_reset_sweep_key)?;
        info!(removed = removed.len(), "swept dashboard storage keys");
        Ok(())
    }

    /// Parses a shared document and imports it.
    pub fn import_page_text(&mut self, text: &str) -> Result<String, DashboardError> {
        let config = parse_page_config(text)?;
        self.import_page(config)
    }

    /// Adds a page built from `config` with every page and widget id
    /// replaced. Layout entries are rewritten through the old-to-new id map;
    /// entries with no matching widget are dropped and widgets with no entry
    /// get a default slot, so the new page always pairs widgets and layout
    /// one to one.
    #[instrument(skip(self, config), fields(title = %config.title))]
    pub fn import_page(&mut self, config: PageConfig) -> Result<String, DashboardError> {
        let title = config.title.trim();
        if title.is_empty() {
            return Err(DashboardError::validation("imported page needs a non-empty title"));
        }

        let mut taken = self.taken_ids();
        let page_id = fresh_id(self.ids.as_mut(), &taken);
        taken.insert(page_id.clone());

        let mut remap: HashMap<String, VecDeque<String>> = HashMap::new();
        let mut widgets = Vec::with_capacity(config.widgets.len());
        let mut imported_filters = Vec::new();

        for widget in config.widgets {
            let new_id = fresh_id(self.ids.as_mut(), &taken);
            taken.insert(new_id.clone());
            remap
                .entry(widget.id.clone())
                .or_default()
                .push_back(new_id.clone());

            if widget.kind.has_filter_state()
                && let Some(filters) = widget.filters
            {
                imported_filters.push((new_id.clone(), filters));
            }

            widgets.push(Widget {
                id: new_id,
                title: widget.title,
                kind: widget.kind,
                is_heart: widget.is_heart,
            });
        }

        let mut pending = Vec::with_capacity(config.layout.len());
        for mut item in config.layout {
            match remap.get_mut(&item.i).and_then(VecDeque::pop_front) {
                Some(new_id) => {
                    item.i = new_id;
                    pending.push(item);
                }
                None => {
                    warn!(old_id = %item.i, "dropping layout entry without a matching widget");
                }
            }
        }

        let mut layout = resolve_append_rows(pending);
        for widget in &widgets {
            if !layout.iter().any(|item| item.i == widget.id) {
                debug!(widget_id = %widget.id, "imported widget had no layout entry; using default slot");
                let slot = default_slot(&layout, &self.grid, &widget.id);
                layout.push(slot);
            }
        }
        for item in &mut layout {
            item.clamp_to_grid(self.grid.columns);
        }

        let page = Page {
            id: page_id.clone(),
            title: title.to_string(),
            widgets,
            layout,
        };

        let mut next = self.pages.clone();
        next.push(page);
        self.commit(next, StoreEvent::PageImported {
            page_id: page_id.clone(),
        })?;

        for (widget_id, filters) in &imported_filters {
            self.store_filters(widget_id, filters);
        }
        Ok(page_id)
    }

    /// Filter state lives outside `customPages` and is written after the
    /// page commit, so failures here are logged and not returned.
    fn store_filters(&self, widget_id: &str, filters: &FilterExpression) {
        if let Err(error) = self.storage.set_json(&filters_key(widget_id), filters) {
            warn!(widget_id, %error, "failed writing widget filters");
        }
    }

    fn drop_filters(&self, widget_id: &str) {
        if let Err(error) = self.storage.remove(&filters_key(widget_id)) {
            warn!(widget_id, %error, "failed removing widget filters");
        }
    }

    fn taken_ids(&self) -> HashSet<String> {
        let mut taken = HashSet::new();
        for page in &self.pages {
            taken.insert(page.id.clone());
            for widget in &page.widgets {
                taken.insert(widget.id.clone());
            }
        }
        taken
    }

    fn commit(&mut self, next: Vec<Page>, event: StoreEvent) -> Result<(), DashboardError> {
        if let Some(mark) = self.ids.high_water() {
            self.storage.set_json(ID_COUNTER_KEY, &mark)?;
        }
        self.storage.set_json(CUSTOM_PAGES_KEY, &next)?;
        self.pages = next;
        info!(?event, pages = self.pages.len(), "committed page store change");

        for (_, listener) in &mut self.listeners {
            listener(&event);
        }
        Ok(())
    }
}
