//! Controller for one custom page. Turns user intents into store calls and
//! keeps the transient state a page screen needs (open dialog, drafts, the
//! notification banner). None of that state is persisted.

use tracing::{debug, error, info};

use crate::error::DashboardError;
use crate::layout::LayoutItem;
use crate::page::{Page, WidgetType};
use crate::share::export_page;
use crate::store::PageStore;

const CUSTOM_PAGE_ROUTE: &str = "/custom/";

pub trait Router {
    fn current_path(&self) -> String;
    fn navigate(&mut self, path: &str);
}

pub fn custom_page_path(page_id: &str) -> String {
    format!("{CUSTOM_PAGE_ROUTE}{page_id}")
}

pub fn page_id_from_path(path: &str) -> Option<&str> {
    path.strip_prefix(CUSTOM_PAGE_ROUTE)
        .map(|rest| rest.trim_end_matches('/'))
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialog {
    AddWidget,
    Rename,
    Share,
    Import,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: Level,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    AddWidget {
        kind: WidgetType,
        title: String,
        is_heart: bool,
    },
    RemoveWidget {
        widget_id: String,
    },
    CopyWidget {
        widget_id: String,
    },
    RenameWidget {
        widget_id: String,
        title: String,
    },
    RenamePage {
        title: String,
    },
    LayoutChanged {
        layout: Vec<LayoutItem>,
    },
    Export,
    Import {
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageView {
    page_id: String,
    dialog: Option<Dialog>,
    title_draft: String,
    import_draft: String,
    share_text: Option<String>,
    notification: Option<Notification>,
}

impl PageView {
    pub fn new(page_id: impl Into<String>) -> Self {
        Self {
            page_id: page_id.into(),
            dialog: None,
            title_draft: String::new(),
            import_draft: String::new(),
            share_text: None,
            notification: None,
        }
    }

    /// Binds to the page named by the router's current path, if any.
    pub fn for_route(router: &dyn Router) -> Option<Self> {
        let path = router.current_path();
        page_id_from_path(&path).map(Self::new)
    }

    pub fn page_id(&self) -> &str {
        &self.page_id
    }

    pub fn page<'a>(&self, store: &'a PageStore) -> Option<&'a Page> {
        store.page(&self.page_id)
    }

    pub fn dialog(&self) -> Option<Dialog> {
        self.dialog
    }

    pub fn open_dialog(&mut self, dialog: Dialog) {
        self.dialog = Some(dialog);
    }

    pub fn close_dialog(&mut self) {
        self.dialog = None;
    }

    pub fn title_draft(&self) -> &str {
        &self.title_draft
    }

    pub fn set_title_draft(&mut self, draft: impl Into<String>) {
        self.title_draft = draft.into();
    }

    pub fn import_draft(&self) -> &str {
        &self.import_draft
    }

    pub fn set_import_draft(&mut self, draft: impl Into<String>) {
        self.import_draft = draft.into();
    }

    pub fn share_text(&self) -> Option<&str> {
        self.share_text.as_deref()
    }

    pub fn notification(&self) -> Option<&Notification> {
        self.notification.as_ref()
    }

    pub fn dismiss_notification(&mut self) {
        self.notification = None;
    }

    /// Applies one intent. Returns the id of whatever the intent created
    /// (a widget, or the imported page). Failures never escape: they land in
    /// the notification slot.
    #[tracing::instrument(skip(self, store, router), fields(page_id = %self.page_id))]
    pub fn dispatch(
        &mut self,
        store: &mut PageStore,
        router: &mut dyn Router,
        intent: Intent,
    ) -> Option<String> {
        match self.apply(store, router, intent) {
            Ok(created) => created,
            Err(err) => {
                error!(%err, "page intent failed");
                self.notify(Level::Error, err.to_string());
                None
            }
        }
    }

    fn apply(
        &mut self,
        store: &mut PageStore,
        router: &mut dyn Router,
        intent: Intent,
    ) -> Result<Option<String>, DashboardError> {
        match intent {
            Intent::AddWidget {
                kind,
                title,
                is_heart,
            } => {
                let title = required_title(&title, "Widget title is required")?;
                let created = store.add_widget_to_page(&self.page_id, kind, title, is_heart)?;
                if created.is_some() {
                    self.close_dialog();
                    self.notify(Level::Success, format!("Added {kind} widget \"{title}\""));
                }
                Ok(created)
            }
            Intent::RemoveWidget { widget_id } => {
                store.remove_widget_from_page(&self.page_id, &widget_id)?;
                Ok(None)
            }
            Intent::CopyWidget { widget_id } => {
                let created = store.copy_widget(&self.page_id, &widget_id)?;
                if created.is_some() {
                    self.notify(Level::Info, "Widget copied");
                }
                Ok(created)
            }
            Intent::RenameWidget { widget_id, title } => {
                let title = required_title(&title, "Widget title is required")?;
                store.update_widget_title(&self.page_id, &widget_id, title)?;
                Ok(None)
            }
            Intent::RenamePage { title } => {
                let title = required_title(&title, "Page title is required")?;
                store.update_page_title(&self.page_id, title)?;
                self.title_draft.clear();
                self.close_dialog();
                Ok(None)
            }
            Intent::LayoutChanged { layout } => {
                store.update_page_layout(&self.page_id, layout)?;
                Ok(None)
            }
            Intent::Export => {
                let Some(page) = store.page(&self.page_id) else {
                    debug!("export requested for a page that no longer exists");
                    return Ok(None);
                };
                let text = export_page(page, store.storage(), store.grid().columns)?;
                self.share_text = Some(text);
                self.open_dialog(Dialog::Share);
                Ok(None)
            }
            Intent::Import { text } => {
                self.import_draft = text;
                self.open_dialog(Dialog::Import);

                let page_id = store.import_page_text(&self.import_draft)?;
                self.import_draft.clear();
                self.close_dialog();

                let path = custom_page_path(&page_id);
                info!(%path, "imported page; navigating");
                router.navigate(&path);
                self.notify(Level::Success, "Page imported");
                Ok(Some(page_id))
            }
        }
    }

    fn notify(&mut self, level: Level, message: impl Into<String>) {
        self.notification = Some(Notification {
            level,
            message: message.into(),
        });
    }
}

fn required_title<'a>(title: &'a str, message: &str) -> Result<&'a str, DashboardError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(DashboardError::validation(message));
    }
    Ok(title)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequentialIds;
    use crate::layout::GridSettings;
    use crate::storage::Storage;

    #[derive(Default)]
    struct MemoryRouter {
        path: String,
        visited: Vec<String>,
    }

    impl Router for MemoryRouter {
        fn current_path(&self) -> String {
            self.path.clone()
        }

        fn navigate(&mut self, path: &str) {
            self.path = path.to_string();
            self.visited.push(path.to_string());
        }
    }

    fn setup() -> (PageStore, MemoryRouter, PageView) {
        let mut store = PageStore::open(
            Storage::in_memory(),
            Box::new(SequentialIds::new("id")),
            GridSettings::default(),
        )
        .unwrap();
        let page_id = store.add_page("Home").unwrap().unwrap();
        let router = MemoryRouter {
            path: custom_page_path(&page_id),
            visited: vec![],
        };
        let view = PageView::for_route(&router).unwrap();
        (store, router, view)
    }

    #[test]
    fn route_parsing() {
        assert_eq!(page_id_from_path("/custom/abc"), Some("abc"));
        assert_eq!(page_id_from_path("/custom/abc/"), Some("abc"));
        assert_eq!(page_id_from_path("/custom/"), None);
        assert_eq!(page_id_from_path("/inventory"), None);
    }

    #[test]
    fn add_widget_trims_and_closes_dialog() {
        let (mut store, mut router, mut view) = setup();
        view.open_dialog(Dialog::AddWidget);

        let id = view
            .dispatch(
                &mut store,
                &mut router,
                Intent::AddWidget {
                    kind: WidgetType::PieChart,
                    title: "  Spend  ".into(),
                    is_heart: false,
                },
            )
            .unwrap();

        assert_eq!(view.dialog(), None);
        assert_eq!(store.widget(view.page_id(), &id).unwrap().title, "Spend");
        assert_eq!(view.notification().unwrap().level, Level::Success);
    }

    #[test]
    fn blank_titles_become_error_notifications() {
        let (mut store, mut router, mut view) = setup();
        view.open_dialog(Dialog::AddWidget);
        let before = view.page(&store).unwrap().clone();

        let created = view.dispatch(
            &mut store,
            &mut router,
            Intent::AddWidget {
                kind: WidgetType::Text,
                title: "   ".into(),
                is_heart: false,
            },
        );
        assert_eq!(created, None);
        assert_eq!(view.page(&store).unwrap(), &before);
        assert_eq!(view.dialog(), Some(Dialog::AddWidget));
        assert_eq!(
            view.notification(),
            Some(&Notification {
                level: Level::Error,
                message: "Widget title is required".into(),
            })
        );

        view.dispatch(&mut store, &mut router, Intent::RenamePage { title: "".into() });
        assert_eq!(view.page(&store).unwrap().title, "Home");

        view.dismiss_notification();
        assert!(view.notification().is_none());
    }

    #[test]
    fn rename_page_clears_draft() {
        let (mut store, mut router, mut view) = setup();
        view.open_dialog(Dialog::Rename);
        view.set_title_draft(" Budget ");

        let title = view.title_draft().to_string();
        view.dispatch(&mut store, &mut router, Intent::RenamePage { title });

        assert_eq!(view.page(&store).unwrap().title, "Budget");
        assert_eq!(view.title_draft(), "");
        assert_eq!(view.dialog(), None);
    }

    #[test]
    fn export_opens_share_dialog() {
        let (mut store, mut router, mut view) = setup();
        view.dispatch(
            &mut store,
            &mut router,
            Intent::AddWidget {
                kind: WidgetType::Text,
                title: "Notes".into(),
                is_heart: false,
            },
        );

        view.dispatch(&mut store, &mut router, Intent::Export);
        assert_eq!(view.dialog(), Some(Dialog::Share));
        let text = view.share_text().unwrap();
        assert!(text.contains("title: Home"));
        assert!(text.contains("title: Notes"));
    }

    #[test]
    fn failed_import_keeps_draft_and_does_not_navigate() {
        let (mut store, mut router, mut view) = setup();
        let bad = "title: T\nwidgets: 3\nlayout: []\n";

        let created = view.dispatch(&mut store, &mut router, Intent::Import { text: bad.into() });

        assert_eq!(created, None);
        assert_eq!(view.import_draft(), bad);
        assert_eq!(view.dialog(), Some(Dialog::Import));
        assert_eq!(view.notification().unwrap().level, Level::Error);
        assert!(router.visited.is_empty());
        assert_eq!(store.pages().len(), 1);
    }

    #[test]
    fn successful_import_navigates_to_new_page() {
        let (mut store, mut router, mut view) = setup();
        let doc = "title: Shared\nwidgets:\n  - {id: a, type: text, title: W}\nlayout:\n  - {i: a, x: 0, y: 0, w: 6, h: 4}\n";

        let page_id = view
            .dispatch(&mut store, &mut router, Intent::Import { text: doc.into() })
            .unwrap();

        assert_eq!(router.visited, vec![custom_page_path(&page_id)]);
        assert_eq!(view.import_draft(), "");
        assert_eq!(store.page(&page_id).unwrap().title, "Shared");
        assert_eq!(PageView::for_route(&router).unwrap().page_id(), page_id);
    }
}
