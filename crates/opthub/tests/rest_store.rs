use std::sync::Arc;
use std::time::Duration;

use opthub_core::model::{CompetitionId, MatchId, Numeric, PhaseStatus, TrialNo};
use opthub_core::poll::PollConfig;
use opthub_core::{OptHub, OptHubError, TrialStore, WorkflowConfig};
use opthub_lib::client::{OptHubClient, Order, USER_AGENT};
use opthub_lib::selection::SelectionCache;
use opthub_lib::settings::Settings;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn create_test_client(mock_server: &MockServer) -> OptHubClient {
    OptHubClient::new(reqwest::Client::new(), mock_server.uri(), "test-key")
}

fn trial_no(no: u64) -> TrialNo {
    TrialNo::new(no).unwrap()
}

#[tokio::test]
async fn test_submit_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/matches/M/trials"))
        .and(header("x-api-key", "test-key"))
        .and(header("user-agent", USER_AGENT))
        .and(body_json(json!({"variable": {"vector": [1.0, 2.0]}})))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({"trial_no": 7, "status": "evaluating"})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server);
    let submitted = client
        .submit(&MatchId::new("M"), &Numeric::Vector(vec![1.0, 2.0]))
        .await
        .expect("submit failed");

    assert_eq!(submitted.trial_no, trial_no(7));
    assert_eq!(submitted.status, "evaluating");
}

#[tokio::test]
async fn test_submit_rejected() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/matches/M/trials"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "code": "InvalidVariable",
            "message": "expected 3 variables"
        })))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server);
    let err = client
        .submit(&MatchId::new("M"), &Numeric::Scalar(1.0))
        .await
        .unwrap_err();

    match err {
        OptHubError::Submission { message } => assert_eq!(message, "expected 3 variables"),
        other => panic!("expected submission error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_trial_not_found_is_none() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/matches/M/trials/9"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"code": "TrialNotFound"})))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server);
    let res = client
        .get_trial_status(&MatchId::new("M"), trial_no(9))
        .await
        .expect("not found is not an error");
    assert!(res.is_none());
}

#[tokio::test]
async fn test_other_not_found_is_transport() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/matches/gone/trials/1"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"code": "MatchNotFound"})))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server);
    let err = client
        .get_trial_status(&MatchId::new("gone"), trial_no(1))
        .await
        .unwrap_err();
    assert!(matches!(err, OptHubError::Transport { .. }));
}

#[tokio::test]
async fn test_unauthorized_is_transport() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/matches/M/trials/1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server);
    let err = client
        .get_trial_status(&MatchId::new("M"), trial_no(1))
        .await
        .unwrap_err();

    assert!(err.is_transport());
    assert!(err.to_string().contains("OPTHUB_API_KEY"));
}

#[tokio::test]
async fn test_server_error_is_transport() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/competitions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server);
    let err = client.competitions().await.unwrap_err();
    assert!(matches!(err, OptHubError::Transport { message } if message.contains("maintenance")));
}

#[tokio::test]
async fn test_stalled_response_times_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/matches/M/trials/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"trial_no": 1, "status": "evaluating"}))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&mock_server)
        .await;

    let uri = mock_server.uri();
    let settings = Settings::from_lookup(|key| match key {
        "OPTHUB_API_KEY" => Some("test-key".to_string()),
        "OPTHUB_API_URL" => Some(uri.clone()),
        "OPTHUB_REQUEST_TIMEOUT_SECS" => Some("0.2".to_string()),
        "OPTHUB_HOME" => Some("/tmp/opthub-test".to_string()),
        _ => None,
    })
    .unwrap();
    let client = OptHubClient::from_settings(&settings).unwrap();

    let start = std::time::Instant::now();
    let err = client
        .get_trial_status(&MatchId::new("M"), trial_no(1))
        .await
        .unwrap_err();
    assert!(matches!(err, OptHubError::Transport { .. }));
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_evaluating_snapshot_skips_phase_records() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/matches/M/trials/3"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"trial_no": 3, "status": "evaluating"})),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/matches/M/trials/3/evaluation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server);
    let snapshot = client
        .get_trial_status(&MatchId::new("M"), trial_no(3))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(snapshot.status, "evaluating");
    assert!(snapshot.evaluation.is_none());
    assert!(snapshot.score.is_none());
}

#[tokio::test]
async fn test_success_snapshot_is_assembled() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/matches/M/trials/7"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"trial_no": 7, "status": "success"})),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/matches/M/trials/7/evaluation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "Success",
            "objective": {"scalar": 3.0},
            "constraint": null,
            "feasible": true,
            "info": {"seed": 1},
            "started_at": "2024-05-01T10:00:00Z",
            "finished_at": "2024-05-01T10:00:02Z"
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/matches/M/trials/7/score"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "Success", "value": 0.85})),
        )
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server);
    let snapshot = client
        .get_trial_status(&MatchId::new("M"), trial_no(7))
        .await
        .unwrap()
        .unwrap();

    let evaluation = snapshot.evaluation.expect("evaluation");
    assert_eq!(evaluation.status, Some(PhaseStatus::Success));
    assert_eq!(evaluation.objective, Some(Numeric::Scalar(3.0)));
    assert_eq!(evaluation.feasible, Some(true));
    assert_eq!(snapshot.score.expect("score").value, Some(0.85));
}

#[tokio::test]
async fn test_evaluator_failed_without_record() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/matches/M/trials/4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "trial_no": 4,
            "status": "evaluator_failed",
            "error": "constraint violated"
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/matches/M/trials/4/evaluation"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/matches/M/trials/4/score"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server);
    let snapshot = client
        .get_trial_status(&MatchId::new("M"), trial_no(4))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(snapshot.error.as_deref(), Some("constraint violated"));
    assert!(snapshot.evaluation.is_none());
}

#[tokio::test]
async fn test_trials_page_query() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/matches/M/trials"))
        .and(query_param("start", "120"))
        .and(query_param("limit", "50"))
        .and(query_param("order", "descending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "is_first": false,
            "is_last": true,
            "trials": [
                {"trial_no": 120, "status": "scoring"},
                {"trial_no": 119, "status": "success"}
            ]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server);
    let page = client
        .trials_page(&MatchId::new("M"), Some(120), 50, Order::Descending)
        .await
        .unwrap();

    assert!(page.is_last);
    assert_eq!(page.trials.len(), 2);
    assert_eq!(page.only_success().trials[0].trial_no, trial_no(119));
}

#[tokio::test]
async fn test_latest_version() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/client/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"latest": "1.2.0"})))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server);
    assert_eq!(client.latest_version().await.unwrap(), "1.2.0");
}

#[tokio::test]
async fn test_malformed_body_is_invalid_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/client/version"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server);
    let err = client.latest_version().await.unwrap_err();
    assert!(matches!(err, OptHubError::InvalidResponse { .. }));
}

#[tokio::test]
async fn test_submit_and_wait_over_http() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/matches/M/trials"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({"trial_no": 7, "status": "evaluating"})),
        )
        .mount(&mock_server)
        .await;
    // Mocks match in mount order; the first one answers twice, then the
    // trial is finished.
    Mock::given(method("GET"))
        .and(path("/matches/M/trials/7"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"trial_no": 7, "status": "evaluating"})),
        )
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/matches/M/trials/7"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"trial_no": 7, "status": "success"})),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/matches/M/trials/7/evaluation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "objective": {"scalar": 3.0},
            "feasible": true
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/matches/M/trials/7/score"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": 0.85})))
        .mount(&mock_server)
        .await;

    let config = WorkflowConfig {
        poll: PollConfig::default()
            .with_initial_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(50))
            .with_max_jitter(Duration::ZERO),
        ..Default::default()
    };
    let opthub = OptHub::new(Arc::new(create_test_client(&mock_server))).with_config(config);

    let mut trial = opthub
        .match_handle(MatchId::new("M"))
        .submit_raw("[1.0, 2.0]")
        .await
        .unwrap();
    let score = trial
        .wait_for_scoring(Some(Duration::from_secs(10)))
        .await
        .unwrap();

    assert_eq!(trial.trial_no(), trial_no(7));
    assert_eq!(score.value, Some(0.85));
}

#[tokio::test]
async fn test_selection_resolves_aliases() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/competitions"))
        .and(query_param("participating", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "c-1", "alias": "sphere"},
            {"id": "c-2", "alias": "rastrigin"}
        ])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/competitions/c-2/matches"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "m-20", "alias": "r-2d"},
            {"id": "m-21", "alias": "r-10d"}
        ])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/competitions/c-1/matches"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"id": "m-10", "alias": "s-2d"}])),
        )
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server);
    let dir = tempfile::tempdir().unwrap();
    let cache = SelectionCache::new(dir.path());

    let err = cache.resolve(&client, None, None).await.unwrap_err();
    assert!(matches!(err, OptHubError::Validation { .. }));

    let selection = cache
        .resolve(&client, Some("rastrigin"), Some("r-10d"))
        .await
        .unwrap();
    assert_eq!(selection.competition.id, CompetitionId::new("c-2"));
    assert_eq!(selection.match_.id, MatchId::new("m-21"));
    cache.save(&selection).unwrap();

    // A lone match alias is looked up in the cached competition.
    let other = cache.resolve(&client, None, Some("r-2d")).await.unwrap();
    assert_eq!(other.match_.id, MatchId::new("m-20"));

    assert_eq!(cache.resolve(&client, None, None).await.unwrap(), selection);

    let err = cache
        .resolve(&client, Some("sphere"), Some("r-2d"))
        .await
        .unwrap_err();
    assert!(matches!(err, OptHubError::Validation { reason } if reason.contains("r-2d")));
}
