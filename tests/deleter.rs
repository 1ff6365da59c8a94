mod support;

use dmsvr::{CascadingDeleter, DeleteOutcome, LinkRecord};
use support::{file_row, folder_row, FakeGateway, State};

fn prop<'p>(props: &'p [(String, String)], name: &str) -> Option<&'p str> {
    props
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

#[tokio::test]
async fn plain_delete_reports_conflicts_instead_of_cascading() {
    let mut state = State::default();
    state.conflicting.insert("1771600".into());
    let gateway = FakeGateway::new(state);

    let outcome = CascadingDeleter::new(&gateway)
        .delete(&FakeGateway::session(), "1771600", false)
        .await
        .unwrap();

    assert!(matches!(outcome, DeleteOutcome::Conflict(_)));
    assert!(gateway.state.lock().unwrap().deletes.is_empty());
}

#[tokio::test]
async fn plain_delete_of_a_missing_object_is_a_noop() {
    let mut state = State::default();
    state.missing.insert("1771601".into());
    let gateway = FakeGateway::new(state);

    let outcome = CascadingDeleter::new(&gateway)
        .delete(&FakeGateway::session(), "1771601", false)
        .await
        .unwrap();
    assert_eq!(outcome, DeleteOutcome::NotFound);
}

#[tokio::test]
async fn forced_delete_removes_children_before_parents() {
    let mut state = State::default();
    state.folders.insert(
        "5000000".into(),
        vec![
            folder_row("5000001", "Subfolder"),
            file_row("5000010", "root-file.pdf", "pdf"),
        ],
    );
    state
        .folders
        .insert("5000001".into(), vec![file_row("5000011", "leaf.jpg", "jpg")]);
    let gateway = FakeGateway::new(state);

    let outcome = CascadingDeleter::new(&gateway)
        .delete(&FakeGateway::session(), "5000000", true)
        .await
        .unwrap();
    assert_eq!(outcome, DeleteOutcome::Deleted);

    let state = gateway.state.lock().unwrap();
    let profile_order: Vec<&str> = state
        .deletes
        .iter()
        .filter(|(ty, _)| ty == "DEF_PROF")
        .filter_map(|(_, props)| prop(props, "%OBJECT_IDENTIFIER"))
        .collect();
    assert_eq!(profile_order, vec!["5000011", "5000001", "5000010", "5000000"]);
}

#[tokio::test]
async fn forced_delete_unlinks_with_a_reresolved_parent_version() {
    let mut state = State::default();
    state
        .folders
        .insert("5000100".into(), vec![file_row("5000110", "linked.doc", "doc")]);
    state.links.insert(
        "5000110".into(),
        vec![LinkRecord {
            link_id: "L-77".into(),
            parent_id: Some("5000200".into()),
            parent_version: Some("0".into()),
        }],
    );
    state.versions.insert("5000200".into(), "3".into());
    let gateway = FakeGateway::new(state);

    CascadingDeleter::new(&gateway)
        .delete(&FakeGateway::session(), "5000100", true)
        .await
        .unwrap();

    let state = gateway.state.lock().unwrap();
    let link_delete = state
        .deletes
        .iter()
        .find(|(ty, _)| ty == "ContentItem")
        .map(|(_, props)| props.clone())
        .unwrap();
    assert_eq!(prop(&link_delete, "SYSTEM_ID"), Some("L-77"));
    assert_eq!(prop(&link_delete, "PARENT"), Some("5000200"));
    assert_eq!(prop(&link_delete, "PARENT_VERSION"), Some("3"));
}

#[tokio::test]
async fn rerunning_a_forced_delete_is_a_noop() {
    let mut state = State::default();
    state
        .folders
        .insert("5000300".into(), vec![file_row("5000310", "only.pdf", "pdf")]);
    let gateway = FakeGateway::new(state);
    let deleter = CascadingDeleter::new(&gateway);

    let first = deleter
        .delete(&FakeGateway::session(), "5000300", true)
        .await
        .unwrap();
    assert_eq!(first, DeleteOutcome::Deleted);

    let second = deleter
        .delete(&FakeGateway::session(), "5000300", true)
        .await
        .unwrap();
    assert_eq!(second, DeleteOutcome::NotFound);
}
