mod common;

use common::{open_context, stored_rows, Widget};
use entity_store::{
    ErrorKind, Filter, Service, ServiceBase, SortDirection, StoreError, StoreResult,
};

fn widget_service() -> ServiceBase<Widget> {
    ServiceBase::new(open_context())
}

fn seed(service: &ServiceBase<Widget>, count: i64) -> Vec<Widget> {
    let items = (1..=count)
        .map(|index| Widget::new(&format!("widget-{index}"), index))
        .collect();
    service.add_range(items).unwrap()
}

#[test]
fn add_then_get_roundtrip() {
    let service = widget_service();

    let added = service.add(Widget::new("bolt", 3)).unwrap();
    assert!(added.id > 0);
    assert!(added.row_version.is_some());

    let loaded = service.get(added.id).unwrap().unwrap();
    assert_eq!(loaded, added);
}

#[test]
fn add_with_explicit_id_keeps_it() {
    let service = widget_service();
    let mut widget = Widget::new("nut", 1);
    widget.id = 42;

    let added = service.add(widget).unwrap();
    assert_eq!(added.id, 42);
    assert!(service.get(42).unwrap().is_some());
}

#[test]
fn get_missing_returns_none() {
    let service = widget_service();
    assert!(service.get(7).unwrap().is_none());
    assert!(service
        .get_where(&Filter::eq("name", "ghost".to_string()))
        .unwrap()
        .is_none());
}

#[test]
fn add_range_assigns_ids_in_input_order() {
    let service = widget_service();
    let added = seed(&service, 3);

    assert_eq!(added.len(), 3);
    assert!(added.windows(2).all(|pair| pair[0].id < pair[1].id));
    assert_eq!(added[2].name, "widget-3");
    assert_eq!(stored_rows(service.context()), 3);
}

#[test]
fn add_range_is_atomic_when_one_item_fails() {
    let service = widget_service();
    let items = vec![
        Widget::new("gear", 1),
        Widget::new("spring", 2),
        Widget::new("gear", 3),
    ];

    let error = service.add_range(items).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::ProviderFailure);
    assert_eq!(stored_rows(service.context()), 0);
    assert_eq!(service.context().pending_changes(), 0);
}

#[test]
fn empty_add_range_is_a_no_op() {
    let service = widget_service();
    assert!(service.add_range(Vec::new()).unwrap().is_empty());
    assert_eq!(stored_rows(service.context()), 0);
}

#[test]
fn update_persists_and_refreshes_token() {
    let service = widget_service();
    let mut widget = service.add(Widget::new("cog", 1)).unwrap();
    let first_token = widget.row_version.clone();

    widget.quantity = 10;
    let updated = service.update(widget).unwrap();
    assert_ne!(updated.row_version, first_token);

    let loaded = service.get(updated.id).unwrap().unwrap();
    assert_eq!(loaded.quantity, 10);
    assert_eq!(loaded.row_version, updated.row_version);
}

#[test]
fn failed_update_leaves_stored_row_unchanged() {
    let service = widget_service();
    let mut widget = service.add(Widget::new("washer", 3)).unwrap();

    widget.quantity = -1;
    let error = service.update(widget.clone()).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::ProviderFailure);

    let loaded = service.get(widget.id).unwrap().unwrap();
    assert_eq!(loaded.quantity, 3);
    assert_eq!(service.context().pending_changes(), 0);
}

#[test]
fn update_range_rolls_back_every_item_on_failure() {
    let service = widget_service();
    let mut widgets = seed(&service, 2);

    widgets[0].quantity = 50;
    widgets[1].quantity = -5;
    assert!(service.update_range(widgets.clone()).is_err());

    let loaded = service.get(widgets[0].id).unwrap().unwrap();
    assert_eq!(loaded.quantity, 1);
}

#[test]
fn stale_token_update_is_a_concurrency_conflict() {
    let service = widget_service();
    let mut fresh = service.add(Widget::new("pin", 1)).unwrap();
    let mut stale = fresh.clone();

    fresh.quantity = 5;
    service.update(fresh.clone()).unwrap();

    stale.quantity = 9;
    let error = service.update(stale).unwrap_err();
    assert!(error.is_concurrency_conflict());
    assert!(matches!(
        error,
        StoreError::ConcurrencyConflict {
            table: "widgets",
            ..
        }
    ));

    assert_eq!(service.get(fresh.id).unwrap().unwrap().quantity, 5);
}

#[test]
fn update_of_missing_row_is_not_found() {
    let service = widget_service();
    let mut ghost = Widget::new("ghost", 1);
    ghost.id = 404;

    let error = service.update(ghost).unwrap_err();
    assert!(error.is_not_found());
}

#[test]
fn delete_saves_soft_delete_flag_and_keeps_row() {
    let service = widget_service();
    let mut widget = service.add(Widget::new("clip", 2)).unwrap();

    widget.is_deleted = true;
    service.delete(&widget).unwrap();

    let loaded = service.get(widget.id).unwrap().unwrap();
    assert!(loaded.is_deleted);
    assert_eq!(stored_rows(service.context()), 1);
    assert_eq!(service.count(&Filter::eq("is_deleted", 0)).unwrap(), 0);
}

#[test]
fn delete_by_id_updates_without_removing() {
    let service = widget_service();
    let widget = service.add(Widget::new("rivet", 2)).unwrap();

    service.delete_by_id(widget.id).unwrap();

    let loaded = service.get(widget.id).unwrap().unwrap();
    assert_eq!(loaded.quantity, 2);
    assert_ne!(loaded.row_version, widget.row_version);
    assert_eq!(stored_rows(service.context()), 1);
}

#[test]
fn delete_by_missing_id_fails_before_any_write() {
    let service = widget_service();
    seed(&service, 2);

    let error = service.delete_by_id(999).unwrap_err();
    assert!(matches!(
        error,
        StoreError::NotFound {
            table: "widgets",
            id: 999
        }
    ));
    assert_eq!(service.context().pending_changes(), 0);
    assert_eq!(stored_rows(service.context()), 2);
}

#[test]
fn delete_where_is_invisible_until_save_changes() {
    let service = widget_service();
    let widget = service.add(Widget::new("hinge", 4)).unwrap();

    service.delete_where(&Filter::eq("name", "hinge".to_string())).unwrap();
    assert_eq!(service.context().pending_changes(), 1);
    let before_save = service.get(widget.id).unwrap().unwrap();
    assert_eq!(before_save.row_version, widget.row_version);

    assert_eq!(service.save_changes().unwrap(), 1);
    assert_eq!(service.context().pending_changes(), 0);
    let after_save = service.get(widget.id).unwrap().unwrap();
    assert_ne!(after_save.row_version, widget.row_version);
    assert_eq!(stored_rows(service.context()), 1);
}

#[test]
fn delete_where_without_match_stages_nothing() {
    let service = widget_service();
    seed(&service, 1);

    service.delete_where(&Filter::eq("name", "nothing".to_string())).unwrap();
    assert_eq!(service.context().pending_changes(), 0);
    assert_eq!(service.save_changes().unwrap(), 0);
}

#[test]
fn query_get_list_and_count_agree() {
    let service = widget_service();
    seed(&service, 5);

    let busy = Filter::gt("quantity", 2);
    let listed = service.get_list(&busy).unwrap();
    assert_eq!(listed.len(), 3);
    assert_eq!(service.count(&busy).unwrap(), 3);
    assert!(service.query(&busy).unwrap());
    assert!(listed.iter().all(|widget| busy.matches(widget).unwrap()));

    let none = Filter::gt("quantity", 10);
    assert!(service.get_list(&none).unwrap().is_empty());
    assert_eq!(service.count(&none).unwrap(), 0);
    assert!(!service.query(&none).unwrap());

    assert_eq!(service.count(&Filter::all()).unwrap(), 5);
}

#[test]
fn compound_filters_run_in_sql() {
    let service = widget_service();
    seed(&service, 6);

    let filter = Filter::like("name", "WIDGET-%")
        .and(Filter::in_list("quantity", [1_i64, 4, 6]))
        .and(!Filter::eq("quantity", 4));
    let names: Vec<String> = service
        .get_list(&filter)
        .unwrap()
        .into_iter()
        .map(|widget| widget.name)
        .collect();
    assert_eq!(names, vec!["widget-1", "widget-6"]);
}

#[test]
fn unknown_filter_column_is_rejected() {
    let service = widget_service();
    seed(&service, 1);

    let error = service.get_list(&Filter::eq("colour", "red".to_string())).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidArgument);
    assert!(matches!(error, StoreError::UnknownColumn { .. }));
}

#[test]
fn paged_slices_are_disjoint_and_cover_all_rows() {
    let service = widget_service();
    let all_ids: Vec<i64> = seed(&service, 7).into_iter().map(|w| w.id).collect();

    let mut collected = Vec::new();
    for page in 1..=3 {
        let items = service
            .get_paged_queryable(page, 3, Filter::all())
            .unwrap()
            .to_list()
            .unwrap();
        assert_eq!(items.len(), if page < 3 { 3 } else { 1 });
        collected.extend(items.into_iter().map(|w| w.id));
    }
    assert_eq!(collected, all_ids);

    let beyond = service
        .get_paged_queryable(4, 3, Filter::all())
        .unwrap()
        .to_list()
        .unwrap();
    assert!(beyond.is_empty());
}

#[test]
fn paging_counts_only_matching_rows() {
    let service = widget_service();
    seed(&service, 7);

    let page = service
        .get_paged_queryable(2, 2, Filter::ge("quantity", 3))
        .unwrap()
        .to_list()
        .unwrap();
    let quantities: Vec<i64> = page.iter().map(|w| w.quantity).collect();
    assert_eq!(quantities, vec![5, 6]);
}

#[test]
fn zero_page_is_rejected_and_zero_page_size_is_empty() {
    let service = widget_service();
    seed(&service, 3);

    let error = service
        .get_paged_queryable(0, 10, Filter::all())
        .unwrap_err();
    assert!(matches!(
        error,
        StoreError::InvalidPage {
            page: 0,
            page_size: 10
        }
    ));

    let empty = service.get_paged_queryable(1, 0, Filter::all()).unwrap();
    assert!(empty.to_list().unwrap().is_empty());
    assert_eq!(empty.count().unwrap(), 0);
}

#[test]
fn composing_onto_a_page_never_leaves_the_page() {
    let service = widget_service();
    seed(&service, 6);
    let first_page = || service.get_paged_queryable(1, 2, Filter::all()).unwrap();

    let narrowed = first_page()
        .filter(Filter::eq("quantity", 5))
        .to_list()
        .unwrap();
    assert!(narrowed.is_empty());

    let kept: Vec<i64> = first_page()
        .filter(Filter::eq("quantity", 2))
        .to_list()
        .unwrap()
        .iter()
        .map(|w| w.quantity)
        .collect();
    assert_eq!(kept, vec![2]);

    let resorted: Vec<i64> = first_page()
        .order_by("quantity", SortDirection::Descending)
        .to_list()
        .unwrap()
        .iter()
        .map(|w| w.quantity)
        .collect();
    assert_eq!(resorted, vec![2, 1]);

    let second_page = service
        .get_paged_queryable(2, 2, Filter::all())
        .unwrap()
        .filter(Filter::gt("quantity", 3));
    assert_eq!(second_page.count().unwrap(), 1);
    assert!(second_page.any().unwrap());
    assert_eq!(second_page.first().unwrap().unwrap().quantity, 4);
}

#[test]
fn enumerable_and_queryable_views_read_lazily() {
    let service = widget_service();
    let rows = service.as_enumerable();
    let queryable = service.as_queryable();

    seed(&service, 3);

    let enumerated: StoreResult<Vec<Widget>> = rows.collect();
    assert_eq!(enumerated.unwrap().len(), 3);
    assert_eq!(queryable.count().unwrap(), 3);
}

#[test]
fn failed_add_keeps_changes_staged_before_it() {
    let service = widget_service();
    service.as_collection().add(&Widget::new("staged", 1));
    assert_eq!(service.context().pending_changes(), 1);

    let error = service.add(Widget::new("bad", -1)).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::ProviderFailure);
    assert_eq!(service.context().pending_changes(), 1);
    assert_eq!(stored_rows(service.context()), 0);

    assert_eq!(service.save_changes().unwrap(), 1);
    let staged = service
        .get_where(&Filter::eq("name", "staged".to_string()))
        .unwrap();
    assert!(staged.is_some());
    assert!(service
        .get_where(&Filter::eq("name", "bad".to_string()))
        .unwrap()
        .is_none());
}

#[test]
fn failed_update_keeps_staged_delete_where() {
    let service = widget_service();
    let mut widgets = seed(&service, 2);

    service
        .delete_where(&Filter::eq("name", "widget-1".to_string()))
        .unwrap();
    widgets[1].quantity = -3;
    assert!(service.update(widgets[1].clone()).is_err());
    assert_eq!(service.context().pending_changes(), 1);

    assert_eq!(service.save_changes().unwrap(), 1);
    let touched = service.get(widgets[0].id).unwrap().unwrap();
    assert_ne!(touched.row_version, widgets[0].row_version);
}

#[test]
fn as_collection_stages_until_save() {
    let service = widget_service();
    let collection = service.as_collection();

    collection.add(&Widget::new("staged", 1));
    assert_eq!(stored_rows(service.context()), 0);

    assert_eq!(service.save_changes().unwrap(), 1);
    assert_eq!(
        service
            .get_where(&Filter::eq("name", "staged".to_string()))
            .unwrap()
            .unwrap()
            .quantity,
        1
    );
}
