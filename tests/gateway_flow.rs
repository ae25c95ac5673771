//! End-to-end command flows through the gateway, without HTTP.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use command_gateway::config::{LoggingConfig, DEFAULT_ALERT_RECIPIENT};
use command_gateway::handlers::{CommandContext, HandlerError, HandlerOutcome, SETTINGS_OPTION};
use command_gateway::observability::LogScope;
use command_gateway::security::CommandRequest;

mod common;

use common::{admin, dispatch, editor, signed, test_config, Harness, ORIGIN};

#[test]
fn test_missing_or_invalid_token_never_reaches_handler() {
    let harness = Harness::new(test_config());
    let mut gateway = harness.gateway();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let options = gateway.default_options();
    gateway.register(
        "counted",
        move |_: &CommandContext<'_>| -> Result<HandlerOutcome, HandlerError> {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(HandlerOutcome::success(Value::Null, "ran"))
        },
        options,
    );

    let missing = CommandRequest::new("counted", json!({})).origin(ORIGIN);
    let body = dispatch(&gateway, &missing, &admin());
    assert_eq!(body["data"]["violation_type"], "missing_nonce");

    let forged = missing.clone().token("ffffffffffffffffffff");
    let body = dispatch(&gateway, &forged, &admin());
    assert_eq!(body["data"]["violation_type"], "invalid_nonce");

    // A token minted for someone else does not transfer.
    let stolen = missing.token(gateway.issue_token(&editor()));
    let body = dispatch(&gateway, &stolen, &admin());
    assert_eq!(body["data"]["violation_type"], "invalid_nonce");

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_aging_token_is_flagged_for_refresh() {
    let harness = Harness::new(test_config());
    let gateway = harness.gateway();

    let fresh = signed(&gateway, &admin(), "ping", json!({}));
    let body = dispatch(&gateway, &fresh, &admin());
    assert_eq!(body["meta"]["token_refresh"], false);

    // Half a lifetime later the same token is one tick old.
    harness.clock.advance(Duration::from_secs(43_200));
    let body = dispatch(&gateway, &fresh, &admin());
    assert_eq!(body["code"], "success");
    assert_eq!(body["meta"]["token_refresh"], true);
}

#[test]
fn test_missing_capability_envelope() {
    let harness = Harness::new(test_config());
    let gateway = harness.gateway();

    let request = signed(&gateway, &editor(), "save_settings", json!({"site_title": "x"}));
    let body = dispatch(&gateway, &request, &editor());

    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "security_error");
    assert_eq!(body["data"], json!({"violation_type": "insufficient_capability"}));
    assert!(body.get("debug").is_none());
}

#[test]
fn test_eleventh_save_is_rate_limited() {
    let harness = Harness::new(test_config());
    let gateway = harness.gateway();

    for i in 0..10 {
        let request = signed(&gateway, &admin(), "save_settings", json!({"site_title": format!("v{}", i)}));
        let body = dispatch(&gateway, &request, &admin());
        assert_eq!(body["code"], "success", "call {} should pass", i + 1);
        harness.clock.advance(Duration::from_secs(1));
    }

    let request = signed(&gateway, &admin(), "save_settings", json!({"site_title": "v11"}));
    let body = dispatch(&gateway, &request, &admin());
    assert_eq!(body["code"], "rate_limit_exceeded");
    assert_eq!(
        body["data"],
        json!({"rate_limit": 10, "window_seconds": 60, "retry_after": 60})
    );

    // 60s after the oldest call, exactly one slot has opened.
    harness.clock.advance(Duration::from_secs(50));
    let request = signed(&gateway, &admin(), "save_settings", json!({"site_title": "v12"}));
    assert_eq!(dispatch(&gateway, &request, &admin())["code"], "success");
    let request = signed(&gateway, &admin(), "save_settings", json!({"site_title": "v13"}));
    assert_eq!(dispatch(&gateway, &request, &admin())["code"], "rate_limit_exceeded");
}

#[test]
fn test_rate_limit_is_per_action() {
    let mut config = test_config();
    config.rate_limit.limit = 1;
    let harness = Harness::new(config);
    let gateway = harness.gateway();

    let save = signed(&gateway, &admin(), "save_settings", json!({"site_title": "a"}));
    assert_eq!(dispatch(&gateway, &save, &admin())["code"], "success");
    assert_eq!(dispatch(&gateway, &save, &admin())["code"], "rate_limit_exceeded");

    let get = signed(&gateway, &admin(), "get_settings", json!({}));
    assert_eq!(dispatch(&gateway, &get, &admin())["code"], "success");
}

#[test]
fn test_json_field_round_trips() {
    let harness = Harness::new(test_config());
    let gateway = harness.gateway();
    let document = json!({
        "columns": 3,
        "blocks": [{"kind": "hero", "enabled": true}, {"kind": "footer", "enabled": false}],
        "title": "Welcome"
    });

    let request = signed(
        &gateway,
        &admin(),
        "save_settings",
        json!({"settings_json": document.to_string()}),
    );
    let body = dispatch(&gateway, &request, &admin());
    assert_eq!(body["code"], "success");
    let first = body["data"]["settings"]["settings_json"].clone();
    assert_eq!(first, document);

    // Serialize what was stored and push it through again.
    let request = signed(
        &gateway,
        &admin(),
        "save_settings",
        json!({"settings_json": serde_json::to_string(&first).unwrap()}),
    );
    let body = dispatch(&gateway, &request, &admin());
    assert_eq!(body["data"]["settings"]["settings_json"], first);

    let stored = harness.services.options.get_option(SETTINGS_OPTION).unwrap().unwrap();
    assert_eq!(stored["settings_json"], document);
}

#[test]
fn test_sql_injection_is_critical_with_one_alert() {
    let harness = Harness::new(test_config());
    let gateway = harness.gateway();

    let request = signed(
        &gateway,
        &admin(),
        "save_settings",
        json!({"site_title": "x'; DROP TABLE users; --"}),
    );
    let body = dispatch(&gateway, &request, &admin());
    assert_eq!(body["code"], "security_error");
    assert_eq!(body["data"]["violation_type"], "sql_injection_attempt");

    let history = gateway.logger().violations().entries().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["severity"], "critical");

    let alerts = harness.notifier.sent();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].to, "security@example.com");
    assert!(alerts[0].subject.contains("sql_injection_attempt"));
}

#[test]
fn test_default_recipient_gets_critical_alert() {
    let mut config = test_config();
    config.logging.alert_email = LoggingConfig::default().alert_email;
    let harness = Harness::new(config);
    let gateway = harness.gateway();

    let request = signed(
        &gateway,
        &admin(),
        "save_settings",
        json!({"site_title": "1' OR 1=1 --"}),
    );
    let body = dispatch(&gateway, &request, &admin());
    assert_eq!(body["data"]["violation_type"], "sql_injection_attempt");

    let alerts = harness.notifier.sent();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].to, DEFAULT_ALERT_RECIPIENT);
}

#[test]
fn test_sanitized_payload_reaches_handler() {
    let harness = Harness::new(test_config());
    let gateway = harness.gateway();

    let request = signed(
        &gateway,
        &admin(),
        "save_settings",
        json!({
            "Site_Title!": "  <b>Bold</b>   move  ",
            "primary_color": "ABCDEF",
            "items_per_page": "25",
            "enabled": "YES",
        }),
    );
    let body = dispatch(&gateway, &request, &admin());
    assert_eq!(body["code"], "success");
    assert_eq!(
        body["data"]["settings"],
        json!({
            "site_title": "Bold move",
            "primary_color": "#abcdef",
            "items_per_page": 25,
            "enabled": true,
        })
    );
}

#[test]
fn test_secret_values_never_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("gateway-errors.log");
    let mut config = test_config();
    config.logging.file_path = log_path.to_string_lossy().into_owned();
    let harness = Harness::new(config);
    let gateway = harness.gateway();

    gateway.logger().log_ajax_error(
        "login form failed",
        json!({"user_password": "hunter2-very-secret", "nested": {"api_token": "tok-123456"}}),
        &LogScope::for_request(&admin(), "login", "cgw_test"),
    );

    let file = std::fs::read_to_string(&log_path).unwrap();
    assert!(file.contains("[REDACTED]"));
    assert!(!file.contains("hunter2-very-secret"));
    assert!(!file.contains("tok-123456"));

    let history = serde_json::to_string(&gateway.logger().errors().entries().unwrap()).unwrap();
    assert!(!history.contains("hunter2-very-secret"));
}

#[test]
fn test_origin_required_outside_local_development() {
    let harness = Harness::new(test_config());
    let gateway = harness.gateway();

    let mut request = signed(&gateway, &admin(), "ping", json!({}));
    request.origin = Some("https://attacker.example".into());
    let body = dispatch(&gateway, &request, &admin());
    assert_eq!(body["data"]["violation_type"], "invalid_referer");

    let mut local = test_config();
    local.security.local_development = true;
    let harness = Harness::new(local);
    let gateway = harness.gateway();
    let mut request = signed(&gateway, &admin(), "ping", json!({}));
    request.origin = None;
    assert_eq!(dispatch(&gateway, &request, &admin())["code"], "success");
}
