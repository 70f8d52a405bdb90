//! History and index writes are coalesced, and survive a restart

use super::fixtures::make_core;
use crate::config::{Config, Directories};
use crate::{CoreUpdate, LumenCore};
use lumen_types::CoreEvent;

fn web_search(t: &mut super::fixtures::TestCore, query: &str) {
    t.send(CoreEvent::LauncherOpened);
    t.send(CoreEvent::QueryChanged {
        query: query.to_string(),
    });
    t.send(CoreEvent::ItemSelected {
        id: "__web_search__".to_string(),
        action: None,
        plugin_id: None,
    });
}

#[tokio::test(start_paused = true)]
async fn test_history_write_waits_for_flush_interval() {
    let mut t = make_core(Config::default(), |_| {});
    let history_file = t.core.dirs().history_file.clone();

    web_search(&mut t, "rust lang");
    web_search(&mut t, "tokio");
    assert!(t.drain().iter().any(|u| matches!(u, CoreUpdate::Close)));
    assert!(!history_file.exists());

    t.pump_until(|core| core.dirs().history_file.exists()).await;
    let written = std::fs::read_to_string(&history_file).unwrap();
    assert!(written.contains("rust lang"));
    assert!(written.contains("tokio"));
}

#[tokio::test]
async fn test_shutdown_writes_pending_state() {
    let mut t = make_core(Config::default(), |_| {});
    web_search(&mut t, "rust lang");
    t.core.shutdown();
    assert!(t.core.dirs().history_file.exists());

    let dirs = Directories::with_base(t.dir.path().to_path_buf());
    let (reopened, _channels) = LumenCore::new(dirs, Config::default()).unwrap();
    assert_eq!(reopened.snapshot().history_entries, 1);
}
