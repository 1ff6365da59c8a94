mod support;

use dmsvr::content::ContentTransfer;
use dmsvr::types::DocumentProfile;
use support::{ChunkStep, FakeGateway, State};

#[tokio::test]
async fn download_concatenates_chunks_and_names_by_extension() {
    let mut state = State::default();
    state
        .content_names
        .insert("1771234".into(), r"c:\docs\report.PDF".into());
    state.chunks = vec![
        ChunkStep::Data(b"hello ".to_vec()),
        ChunkStep::Data(b"world".to_vec()),
        ChunkStep::Eof,
    ];
    let gateway = FakeGateway::new(state);

    let doc = ContentTransfer::new(&gateway)
        .download(&FakeGateway::session(), "1771234")
        .await
        .unwrap();

    assert_eq!(doc.bytes, b"hello world");
    assert_eq!(doc.file_name, "1771234.PDF");

    let state = gateway.state.lock().unwrap();
    // Stream released before its content handle.
    assert_eq!(
        state.released,
        vec!["stream-content-1771234", "content-1771234"]
    );
}

#[tokio::test]
async fn download_without_server_file_name_uses_the_bare_id() {
    let mut state = State::default();
    state.chunks = vec![ChunkStep::Eof];
    let gateway = FakeGateway::new(state);

    let doc = ContentTransfer::new(&gateway)
        .download(&FakeGateway::session(), "1771235")
        .await
        .unwrap();

    assert!(doc.bytes.is_empty());
    assert_eq!(doc.file_name, "1771235");
}

#[tokio::test]
async fn failed_download_still_releases_every_handle() {
    let mut state = State::default();
    state.chunks = vec![
        ChunkStep::Data(b"partial".to_vec()),
        ChunkStep::Data(b" data".to_vec()),
        ChunkStep::Fail,
    ];
    let gateway = FakeGateway::new(state);

    let result = ContentTransfer::new(&gateway)
        .download(&FakeGateway::session(), "1771236")
        .await;
    assert!(result.is_err());

    let state = gateway.state.lock().unwrap();
    assert_eq!(state.released.len(), state.acquired.len());
    let mut acquired = state.acquired.clone();
    let mut released = state.released.clone();
    acquired.sort();
    released.sort();
    assert_eq!(acquired, released);
}

#[tokio::test]
async fn upload_chunks_commits_and_unlocks() {
    let gateway = FakeGateway::new(State::default());
    let profile = DocumentProfile {
        name: "Site survey".into(),
        abstract_text: "Survey photos".into(),
        app_id: "ACROBAT".into(),
        author: Some("JSMITH".into()),
    };
    let data = vec![7u8; 100 * 1024];

    let doc_id = ContentTransfer::new(&gateway)
        .upload(&FakeGateway::session(), &profile, &data)
        .await
        .unwrap();
    assert_eq!(doc_id, "900001");

    let state = gateway.state.lock().unwrap();
    // 100 KiB splits into three chunks at the 48 KiB write size.
    assert_eq!(state.written.len(), 3);
    let total: usize = state.written.iter().map(|c| c.len()).sum();
    assert_eq!(total, data.len());
    assert_eq!(state.committed.len(), 1);
    assert_eq!(state.released.len(), state.acquired.len());
    // The new profile is unlocked after the commit.
    assert!(state.updates.iter().any(|(ty, props)| {
        ty == "DEF_PROF"
            && props
                .iter()
                .any(|(n, v)| n == "%STATUS" && v == "%UNLOCK")
    }));
}
