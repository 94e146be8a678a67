use cloudboard_core::filter::{FilterElement, FilterTerm, Operator};
use cloudboard_core::ids::{IdStrategy, SequentialIds};
use cloudboard_core::inventory::{InventoryTable, fixture_buckets, format_bytes};
use cloudboard_core::layout::{GridSettings, LayoutItem, LayoutStore};
use cloudboard_core::page::WidgetType;
use cloudboard_core::share::export_page;
use cloudboard_core::storage::{CUSTOM_PAGES_KEY, FileBackend, Storage, filters_key, is_reset_sweep_key};
use cloudboard_core::store::PageStore;
use tempfile::tempdir;

fn open_store(storage: &Storage) -> PageStore {
    PageStore::open(
        storage.clone(),
        Box::new(SequentialIds::new("id")),
        GridSettings::default(),
    )
    .expect("open page store")
}

fn file_storage(dir: &std::path::Path) -> Storage {
    Storage::new(FileBackend::open(dir).expect("open file backend"))
}

#[test]
fn pages_widgets_and_filters_survive_reopen() {
    let temp = tempdir().expect("tempdir");

    let (page_id, table_id) = {
        let storage = file_storage(temp.path());
        let mut store = open_store(&storage);
        let page_id = store.add_page("Storage").expect("add page").expect("page id");
        store
            .add_widget_to_page(&page_id, WidgetType::Text, "Notes", false)
            .expect("add text widget");
        let table_id = store
            .add_widget_to_page(&page_id, WidgetType::S3Buckets, "Prod buckets", true)
            .expect("add table widget")
            .expect("table id");

        let mut table = InventoryTable::open(storage.clone(), &table_id).expect("open table");
        table
            .push(FilterElement::Filter(FilterTerm::new("name", Operator::Contains, "prod")))
            .expect("push filter");
        (page_id, table_id)
    };

    let storage = file_storage(temp.path());
    let store = open_store(&storage);
    let page = store.page(&page_id).expect("page reloaded");
    assert_eq!(page.widgets.len(), 2);
    assert!(page.invariant_violations().is_empty());
    assert!(store.widget(&page_id, &table_id).expect("table widget").is_heart);

    let table = InventoryTable::open(storage, &table_id).expect("reopen table");
    let names: Vec<String> = table.rows().into_iter().map(|bucket| bucket.name).collect();
    assert_eq!(names, vec!["prod-app-logs", "prod-static-assets", "prod-db-backups"]);
}

#[test]
fn export_reset_import_round_trip() {
    let temp = tempdir().expect("tempdir");
    let storage = file_storage(temp.path());
    let mut store = open_store(&storage);

    let page_id = store.add_page("Shared").expect("add page").expect("page id");
    let table_id = store
        .add_widget_to_page(&page_id, WidgetType::S3Buckets, "Buckets", false)
        .expect("add widget")
        .expect("widget id");
    let mut table = InventoryTable::open(storage.clone(), &table_id).expect("open table");
    table
        .push(FilterElement::Filter(FilterTerm::new("region", Operator::Equals, "us-west-2")))
        .expect("push filter");
    store
        .update_page_layout(&page_id, vec![LayoutItem {
            i: table_id.clone(),
            x: 3,
            y: 1,
            w: 10,
            h: 5,
        }])
        .expect("move widget");

    let page = store.page(&page_id).expect("page").clone();
    let document = export_page(&page, &storage, store.grid().columns).expect("export");

    LayoutStore::new(storage.clone())
        .save("inventory", vec![])
        .expect("save view layout");
    storage.set_raw("rgl-2", "{}").expect("grid key");

    store.reset_all_pages().expect("reset");
    let stored: Vec<serde_json::Value> = storage
        .get_json(CUSTOM_PAGES_KEY)
        .expect("read pages")
        .expect("pages key present");
    assert!(stored.is_empty());
    let leftovers: Vec<String> = storage
        .keys()
        .expect("keys")
        .into_iter()
        .filter(|key| is_reset_sweep_key(key))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");

    let imported = store.import_page_text(&document).expect("import");
    let page = store.page(&imported).expect("imported page");
    assert_eq!(page.title, "Shared");
    let new_table = &page.widgets[0].id;
    assert_ne!(new_table, &table_id);
    assert_eq!(page.layout[0].i, *new_table);
    assert_eq!((page.layout[0].x, page.layout[0].y, page.layout[0].w), (3, 1, 10));

    let table = InventoryTable::open(storage.clone(), new_table).expect("open imported table");
    let rows = table.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, "prod-db-backups");
    assert!(storage.get_raw(&filters_key(&table_id)).expect("read").is_none());
}

#[test]
fn uuid_ids_never_repeat_across_removals() {
    let storage = Storage::in_memory();
    let mut store = PageStore::open(storage, IdStrategy::Uuid.build(), GridSettings::default())
        .expect("open page store");
    let page_id = store.add_page("P").expect("add page").expect("page id");

    let mut seen = std::collections::HashSet::from([page_id.clone()]);
    for _ in 0..20 {
        let widget_id = store
            .add_widget_to_page(&page_id, WidgetType::Text, "W", false)
            .expect("add widget")
            .expect("widget id");
        assert!(seen.insert(widget_id.clone()));
        store.remove_widget_from_page(&page_id, &widget_id).expect("remove widget");
    }
}

#[test]
fn byte_formatting_examples() {
    assert_eq!(format_bytes(0), "0 Bytes");
    assert_eq!(format_bytes(1024), "1 KB");
    assert_eq!(format_bytes(1536), "1.5 KB");
    assert_eq!(fixture_buckets().len(), 10);
}
