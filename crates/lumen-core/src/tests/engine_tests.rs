//! Sessions with one-shot handlers: requests, navigation, escape, status

use serde_json::json;

use super::fixtures::{has_result, make_core, result_ids, results_line, write_plugin};
use crate::config::Config;
use crate::{CoreUpdate, Error};
use lumen_types::{CoreEvent, PluginStatus};

const NAV_SCRIPT: &str = r#"read line
case "$line" in
  *__back__*) echo '{"type":"results","results":[{"id":"root","name":"Root"}]}' ;;
  *'"step":"action"'*) echo '{"type":"results","results":[{"id":"child","name":"Child"}]}' ;;
  *) echo '{"type":"results","results":[{"id":"item","name":"Item"}]}' ;;
esac"#;

fn open(plugin_id: &str) -> CoreEvent {
    CoreEvent::OpenPlugin {
        plugin_id: plugin_id.to_string(),
    }
}

fn select(id: &str) -> CoreEvent {
    CoreEvent::ItemSelected {
        id: id.to_string(),
        action: None,
        plugin_id: None,
    }
}

#[tokio::test]
async fn test_initial_results_reach_front_end() {
    let script = format!("read line\n{}", results_line("a", "Alpha"));
    let mut t = make_core(Config::default(), |root| {
        write_plugin(root, "notes", json!({"name": "Notes"}), Some(&script));
    });

    t.send(open("notes"));
    let activated = t
        .wait_for(|u| matches!(u, CoreUpdate::PluginActivated { .. }))
        .await;
    assert!(matches!(activated, CoreUpdate::PluginActivated { id, .. } if id == "notes"));

    let update = t
        .wait_for(|u| matches!(u, CoreUpdate::Results { .. }))
        .await;
    let CoreUpdate::Results { results, .. } = update else {
        panic!("Expected Results");
    };
    assert_eq!(results[0].id, "a");
    assert_eq!(results[0].plugin_id.as_deref(), Some("notes"));

    t.wait_for(|u| matches!(u, CoreUpdate::Busy { busy: false }))
        .await;
    assert_eq!(t.core.snapshot().active_plugin.as_deref(), Some("notes"));
}

#[tokio::test]
async fn test_handler_receives_session_token() {
    let script = r#"read line
token=$(printf '%s' "$line" | sed -n 's/.*"session":"\([^"]*\)".*/\1/p')
echo "{\"type\":\"results\",\"results\":[{\"id\":\"$token\",\"name\":\"Token\"}]}""#;
    let mut t = make_core(Config::default(), |root| {
        write_plugin(root, "echo", json!({"name": "Echo"}), Some(script));
    });

    t.send(open("echo"));
    let update = t
        .wait_for(|u| matches!(u, CoreUpdate::Results { .. }))
        .await;
    let token = t.core.session_token().unwrap().to_string();
    assert_eq!(result_ids(&update), vec![token.as_str()]);
}

#[tokio::test]
async fn test_selection_and_back_track_depth() {
    let mut t = make_core(Config::default(), |root| {
        write_plugin(root, "nav", json!({"name": "Nav"}), Some(NAV_SCRIPT));
    });

    t.send(open("nav"));
    t.wait_for(|u| has_result(u, "item")).await;
    t.wait_for(|u| matches!(u, CoreUpdate::NavigationDepthChanged { depth: 0 }))
        .await;

    t.send(select("item"));
    t.wait_for(|u| has_result(u, "child")).await;
    t.wait_for(|u| matches!(u, CoreUpdate::NavigationDepthChanged { depth: 1 }))
        .await;
    assert_eq!(t.core.snapshot().navigation_depth, 1);

    t.send(CoreEvent::Back);
    t.wait_for(|u| has_result(u, "root")).await;
    t.wait_for(|u| matches!(u, CoreUpdate::NavigationDepthChanged { depth: 0 }))
        .await;

    // Back at the root closes the plugin
    t.send(CoreEvent::Back);
    t.wait_for(|u| matches!(u, CoreUpdate::PluginDeactivated))
        .await;
    assert!(t.core.snapshot().active_plugin.is_none());
}

#[tokio::test]
async fn test_escape_at_root_closes_plugin() {
    let mut t = make_core(Config::default(), |root| {
        write_plugin(root, "nav", json!({"name": "Nav"}), Some(NAV_SCRIPT));
    });

    t.send(open("nav"));
    t.wait_for(|u| has_result(u, "item")).await;

    t.send(CoreEvent::Escape);
    t.wait_for(|u| matches!(u, CoreUpdate::PluginDeactivated))
        .await;
    assert!(t.core.session_token().is_none());
}

#[tokio::test]
async fn test_double_escape_closes_from_depth() {
    let mut config = Config::default();
    config.navigation.double_escape_ms = 60_000;
    let mut t = make_core(config, |root| {
        write_plugin(root, "nav", json!({"name": "Nav"}), Some(NAV_SCRIPT));
    });

    t.send(open("nav"));
    t.wait_for(|u| has_result(u, "item")).await;
    t.send(select("item"));
    t.wait_for(|u| matches!(u, CoreUpdate::NavigationDepthChanged { depth: 1 }))
        .await;

    t.send(CoreEvent::Escape);
    t.send(CoreEvent::Escape);
    t.wait_for(|u| matches!(u, CoreUpdate::PluginDeactivated))
        .await;
    assert!(t.core.snapshot().active_plugin.is_none());
}

#[tokio::test]
async fn test_error_response_surfaces_and_clears_busy() {
    let script = r#"read line
echo '{"type":"error","message":"disk full","details":"no space"}'"#;
    let mut t = make_core(Config::default(), |root| {
        write_plugin(root, "broken", json!({"name": "Broken"}), Some(script));
    });

    t.send(open("broken"));
    let update = t
        .wait_for(|u| matches!(u, CoreUpdate::Error { .. }))
        .await;
    assert!(matches!(update, CoreUpdate::Error { message } if message == "disk full"));
    t.wait_for(|u| matches!(u, CoreUpdate::Busy { busy: false }))
        .await;
    assert_eq!(t.core.snapshot().active_plugin.as_deref(), Some("broken"));
}

#[tokio::test]
async fn test_handler_without_output_is_an_error() {
    let mut t = make_core(Config::default(), |root| {
        write_plugin(root, "mute", json!({"name": "Mute"}), Some("read line\nexit 0"));
    });

    t.send(open("mute"));
    let update = t
        .wait_for(|u| matches!(u, CoreUpdate::Error { .. }))
        .await;
    assert!(matches!(update, CoreUpdate::Error { message } if message.contains("no output")));
}

#[tokio::test]
async fn test_execute_closes_launcher() {
    let script = r#"read line
echo '{"type":"execute","copy":"hello","notify":"Copied"}'"#;
    let mut t = make_core(Config::default(), |root| {
        write_plugin(root, "clip", json!({"name": "Clip"}), Some(script));
    });

    t.send(CoreEvent::LauncherOpened);
    t.send(open("clip"));
    let copy = t
        .wait_for(|u| matches!(u, CoreUpdate::Execute { .. }))
        .await;
    assert!(matches!(
        copy,
        CoreUpdate::Execute { action: lumen_types::ExecuteAction::Copy { text } } if text == "hello"
    ));
    t.wait_for(|u| matches!(u, CoreUpdate::Close)).await;

    let snapshot = t.core.snapshot();
    assert!(!snapshot.is_open);
    assert!(snapshot.active_plugin.is_none());
}

#[tokio::test]
async fn test_status_lines_are_stored() {
    let script = r#"read line
echo '{"type":"status","status":{"badges":[{"text":"3"}]}}'
echo '{"type":"results","results":[]}'"#;
    let mut t = make_core(Config::default(), |root| {
        write_plugin(root, "mail", json!({"name": "Mail"}), Some(script));
    });

    t.send(open("mail"));
    let update = t
        .wait_for(|u| matches!(u, CoreUpdate::PluginStatusUpdate { .. }))
        .await;
    assert!(matches!(update, CoreUpdate::PluginStatusUpdate { plugin_id, .. } if plugin_id == "mail"));
    let status = t.core.status("mail").unwrap();
    assert_eq!(status.badges[0].text.as_deref(), Some("3"));
}

#[tokio::test]
async fn test_update_status_rejects_unknown_plugin() {
    let mut t = make_core(Config::default(), |_| {});
    let err = t
        .core
        .update_status("ghost", PluginStatus::default())
        .unwrap_err();
    assert!(matches!(err, Error::PluginNotFound(id) if id == "ghost"));
    assert!(t.drain().is_empty());
}

#[tokio::test]
async fn test_reload_plugins_reports_added_and_removed() {
    let mut t = make_core(Config::default(), |root| {
        write_plugin(root, "old", json!({"name": "Old"}), Some("read line"));
    });
    let root = t.core.dirs().user_plugins.clone();
    std::fs::remove_dir_all(root.join("old")).unwrap();
    write_plugin(&root, "new", json!({"name": "New"}), Some("read line"));

    let diff = t.core.reload_plugins().unwrap();
    assert_eq!(diff.added, vec!["new".to_string()]);
    assert_eq!(diff.removed, vec!["old".to_string()]);
    assert!(t.core.plugins().get("new").is_some());
}

#[tokio::test]
async fn test_bad_config_keeps_current_settings() {
    let mut t = make_core(Config::default(), |_| {});
    let path = t.core.dirs().config_file.clone();

    std::fs::write(&path, r#"{"search": {"maxDisplayedResults": 7}}"#).unwrap();
    t.core.reload_config().unwrap();
    assert_eq!(t.core.config().search.max_displayed_results, 7);

    std::fs::write(&path, "{ not json").unwrap();
    assert!(t.core.reload_config().is_err());
    assert_eq!(t.core.config().search.max_displayed_results, 7);
}
