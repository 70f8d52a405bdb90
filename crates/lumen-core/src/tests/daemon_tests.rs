//! Daemon plugins over stdio: lifecycle, session tokens, crash recovery

use std::fs;
use std::time::Duration;

use serde_json::json;

use super::fixtures::{has_result, make_core, result_ids, write_plugin};
use crate::config::Config;
use crate::supervisor::DaemonState;
use crate::CoreUpdate;
use lumen_types::CoreEvent;

const SERVE_SCRIPT: &str = r#"while read line; do
  echo '{"type":"results","results":[{"id":"served","name":"Served"}]}'
done"#;

const TOKEN_SCRIPT: &str = r#"while read line; do
  token=$(printf '%s' "$line" | sed -n 's/.*"session":"\([^"]*\)".*/\1/p')
  echo "{\"type\":\"results\",\"results\":[{\"id\":\"$token\",\"name\":\"Token\"}]}"
done"#;

fn open(plugin_id: &str) -> CoreEvent {
    CoreEvent::OpenPlugin {
        plugin_id: plugin_id.to_string(),
    }
}

const NOISY_NAV_SCRIPT: &str = r#"while read line; do
  echo 'debug: handling request'
  case "$line" in
    *'"step":"action"'*) echo '{"type":"results","results":[{"id":"child","name":"Child"}]}' ;;
    *) echo '{"type":"results","results":[{"id":"item","name":"Item"}]}' ;;
  esac
done"#;

const COUNTING_SCRIPT: &str = r#"echo started >> spawns.log
while read line; do
  echo '{"type":"results","results":[{"id":"served","name":"Served"}]}'
done"#;

fn select(id: &str) -> CoreEvent {
    CoreEvent::ItemSelected {
        id: id.to_string(),
        action: None,
        plugin_id: None,
    }
}

fn submit(query: &str) -> CoreEvent {
    CoreEvent::QuerySubmitted {
        query: query.to_string(),
        context: None,
    }
}

fn fast_restarts() -> Config {
    let mut config = Config::default();
    config.daemon.restart_delay_ms = 10;
    config
}

#[tokio::test]
async fn test_stdio_daemon_serves_and_stops_on_close() {
    let mut t = make_core(Config::default(), |root| {
        write_plugin(
            root,
            "serve",
            json!({"name": "Serve", "daemon": {"enabled": true}}),
            Some(SERVE_SCRIPT),
        );
    });

    t.send(open("serve"));
    t.wait_for(|u| has_result(u, "served")).await;
    assert_eq!(t.core.daemon_state("serve"), DaemonState::Running);
    assert_eq!(t.core.snapshot().running_daemons, vec!["serve".to_string()]);

    t.send(CoreEvent::ClosePlugin);
    t.wait_for(|u| matches!(u, CoreUpdate::PluginDeactivated))
        .await;
    assert_eq!(t.core.daemon_state("serve"), DaemonState::Stopped);
    assert!(t.core.snapshot().running_daemons.is_empty());
}

#[tokio::test]
async fn test_each_open_gets_a_fresh_session_token() {
    let mut t = make_core(Config::default(), |root| {
        write_plugin(
            root,
            "tok",
            json!({"name": "Token", "daemon": {"enabled": true}}),
            Some(TOKEN_SCRIPT),
        );
    });

    let mut tokens = Vec::new();
    for _ in 0..2 {
        t.send(open("tok"));
        let update = t
            .wait_for(|u| matches!(u, CoreUpdate::Results { .. }))
            .await;
        let token = t.core.session_token().unwrap().to_string();
        assert_eq!(result_ids(&update), vec![token.as_str()]);
        tokens.push(token);

        t.send(CoreEvent::ClosePlugin);
        t.wait_for(|u| matches!(u, CoreUpdate::PluginDeactivated))
            .await;
    }
    assert_ne!(tokens[0], tokens[1]);
}

#[tokio::test]
async fn test_crashing_daemon_goes_dead_until_reload() {
    let mut t = make_core(fast_restarts(), |root| {
        write_plugin(
            root,
            "crashy",
            json!({
                "name": "Crashy",
                "daemon": {"enabled": true, "restartOnCrash": true, "maxRestarts": 2}
            }),
            Some("exit 3"),
        );
    });

    t.send(open("crashy"));
    t.wait_for(
        |u| matches!(u, CoreUpdate::Error { message } if message == "Crashy is unavailable"),
    )
    .await;

    assert_eq!(t.core.daemon_state("crashy"), DaemonState::Dead);
    assert_eq!(t.core.restart_count("crashy"), 2);
    assert!(t.core.snapshot().active_plugin.is_none());
    assert_eq!(
        t.core.snapshot().unavailable_plugins,
        vec!["crashy".to_string()]
    );

    // Still dead on the next open
    t.drain();
    t.send(open("crashy"));
    assert!(
        t.drain()
            .iter()
            .any(|u| matches!(u, CoreUpdate::Error { .. }))
    );
    assert_eq!(t.core.daemon_state("crashy"), DaemonState::Dead);

    t.core.reload_plugins().unwrap();
    assert_eq!(t.core.daemon_state("crashy"), DaemonState::Stopped);
    assert_eq!(t.core.restart_count("crashy"), 0);
}

#[tokio::test]
async fn test_crash_without_restart_policy_is_dead_at_once() {
    let mut t = make_core(fast_restarts(), |root| {
        write_plugin(
            root,
            "fragile",
            json!({"name": "Fragile", "daemon": {"enabled": true}}),
            Some("exit 1"),
        );
    });

    t.send(open("fragile"));
    t.wait_for(
        |u| matches!(u, CoreUpdate::Error { message } if message == "Fragile is unavailable"),
    )
    .await;
    assert_eq!(t.core.restart_count("fragile"), 0);
    assert_eq!(t.core.daemon_state("fragile"), DaemonState::Dead);
}

#[tokio::test]
async fn test_background_daemon_survives_close() {
    let mut t = make_core(Config::default(), |root| {
        write_plugin(
            root,
            "bg",
            json!({"name": "Background", "daemon": {"enabled": true, "background": true}}),
            Some(SERVE_SCRIPT),
        );
    });

    t.core.start();
    assert_eq!(t.core.daemon_state("bg"), DaemonState::Running);

    t.send(open("bg"));
    t.wait_for(|u| has_result(u, "served")).await;
    t.send(CoreEvent::ClosePlugin);
    t.wait_for(|u| matches!(u, CoreUpdate::PluginDeactivated))
        .await;
    assert_eq!(t.core.daemon_state("bg"), DaemonState::Running);

    t.core.shutdown();
    assert_eq!(t.core.daemon_state("bg"), DaemonState::Stopped);
}

#[tokio::test]
async fn test_noise_lines_do_not_answer_requests() {
    let mut t = make_core(Config::default(), |root| {
        write_plugin(
            root,
            "noisy",
            json!({"name": "Noisy", "daemon": {"enabled": true}}),
            Some(NOISY_NAV_SCRIPT),
        );
    });

    t.send(open("noisy"));
    t.wait_for(|u| has_result(u, "item")).await;

    t.send(select("item"));
    t.wait_for(|u| has_result(u, "child")).await;
    assert_eq!(t.core.snapshot().navigation_depth, 1);
    assert_eq!(t.core.daemon_state("noisy"), DaemonState::Running);
}

#[tokio::test]
async fn test_unrequested_clean_exit_follows_restart_policy() {
    let script = r#"read line
echo '{"type":"results","results":[{"id":"once","name":"Once"}]}'
sleep 0.2
exit 0"#;
    let mut t = make_core(fast_restarts(), |root| {
        write_plugin(
            root,
            "quit",
            json!({
                "name": "Quit",
                "daemon": {"enabled": true, "restartOnCrash": true, "maxRestarts": 1}
            }),
            Some(script),
        );
    });

    t.send(open("quit"));
    t.wait_for(|u| has_result(u, "once")).await;

    // Restarted once and asked for its root view again
    t.wait_for(|u| has_result(u, "once")).await;
    assert_eq!(t.core.restart_count("quit"), 1);

    t.wait_for(
        |u| matches!(u, CoreUpdate::Error { message } if message == "Quit is unavailable"),
    )
    .await;
    assert_eq!(t.core.daemon_state("quit"), DaemonState::Dead);
    assert!(t.core.snapshot().active_plugin.is_none());
}

#[tokio::test]
async fn test_clean_exit_without_restart_policy_closes_session() {
    let script = r#"read line
echo '{"type":"results","results":[{"id":"once","name":"Once"}]}'
sleep 0.2
exit 0"#;
    let mut t = make_core(fast_restarts(), |root| {
        write_plugin(
            root,
            "quit",
            json!({"name": "Quit", "daemon": {"enabled": true}}),
            Some(script),
        );
    });

    t.send(open("quit"));
    t.wait_for(|u| has_result(u, "once")).await;
    t.wait_for(|u| matches!(u, CoreUpdate::PluginDeactivated))
        .await;
    t.wait_for(
        |u| matches!(u, CoreUpdate::Error { message } if message == "Quit is unavailable"),
    )
    .await;
    assert!(t.core.snapshot().active_plugin.is_none());
}

#[tokio::test]
async fn test_crash_streak_resets_after_stable_uptime() {
    let script = r#"while read line; do
  case "$line" in
    *boom*) exit 1 ;;
  esac
  echo '{"type":"results","results":[{"id":"alive","name":"Alive"}]}'
done"#;
    let mut config = fast_restarts();
    config.daemon.stable_uptime_ms = 1000;
    let mut t = make_core(config, |root| {
        write_plugin(
            root,
            "phoenix",
            json!({
                "name": "Phoenix",
                "daemon": {"enabled": true, "restartOnCrash": true, "maxRestarts": 1}
            }),
            Some(script),
        );
    });

    t.send(open("phoenix"));
    t.wait_for(|u| has_result(u, "alive")).await;

    // Two crashes, each after a healthy run, both get restarted
    for _ in 0..2 {
        tokio::time::sleep(Duration::from_millis(1100)).await;
        t.send(submit("boom"));
        t.wait_for(|u| has_result(u, "alive")).await;
        assert_eq!(t.core.restart_count("phoenix"), 1);
        assert_eq!(t.core.daemon_state("phoenix"), DaemonState::Running);
    }

    // A crash right after a restart is consecutive and uses up the budget
    t.send(submit("boom"));
    t.wait_for(
        |u| matches!(u, CoreUpdate::Error { message } if message == "Phoenix is unavailable"),
    )
    .await;
    assert_eq!(t.core.daemon_state("phoenix"), DaemonState::Dead);
}

#[tokio::test]
async fn test_one_process_across_opens_and_searches() {
    let mut t = make_core(Config::default(), |root| {
        write_plugin(
            root,
            "bg",
            json!({"name": "Background", "daemon": {"enabled": true, "background": true}}),
            Some(COUNTING_SCRIPT),
        );
        write_plugin(
            root,
            "fg",
            json!({"name": "Foreground", "daemon": {"enabled": true}}),
            Some(COUNTING_SCRIPT),
        );
    });
    t.core.start();

    for _ in 0..2 {
        t.send(open("bg"));
        t.wait_for(|u| has_result(u, "served")).await;
        t.send(submit("first"));
        t.wait_for(|u| has_result(u, "served")).await;
        t.send(CoreEvent::ClosePlugin);
        t.wait_for(|u| matches!(u, CoreUpdate::PluginDeactivated))
            .await;
    }

    t.send(open("fg"));
    t.wait_for(|u| has_result(u, "served")).await;
    for query in ["a", "ab", "abc"] {
        t.send(submit(query));
        t.wait_for(|u| has_result(u, "served")).await;
    }

    let plugins = t.core.dirs().user_plugins.clone();
    for id in ["bg", "fg"] {
        let log = fs::read_to_string(plugins.join(id).join("spawns.log")).unwrap();
        assert_eq!(log.lines().count(), 1, "{id} spawned more than once");
    }
}
