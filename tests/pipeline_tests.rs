//! End-to-end extraction against mock state agency sites.

mod common;

use common::fixtures::{default_app_config, example_state_config, load_fixture};
use common::wiremock_helpers::{
    mock_error_server, mock_gemini_server, mock_state_page, mock_timeout_server, mount_encoded_page, mount_error_page, mount_html_page,
};
use statetaxfinder::config::OracleCredentials;
use statetaxfinder::deriver::{Confidence, DerivationMethod, FactStatus, PlaceholderReason};
use statetaxfinder::fetch::{FetchError, PageFetcher};
use statetaxfinder::oracle::{GeminiOracle, Oracle, OracleBackend};
use statetaxfinder::pipeline::{PipelineSettings, StateExtractionPipeline};
use statetaxfinder::section::MatchStrategy;
use std::time::Duration;
use wiremock::MockServer;

const NY_PATH: &str = "/bus/ct/def_art9a.htm";

fn pipeline_with<O: Oracle>(oracle: O) -> StateExtractionPipeline<O> {
    let config = default_app_config();
    let fetcher = PageFetcher::new(&config.http).unwrap();
    StateExtractionPipeline::new(fetcher, oracle, PipelineSettings::from_config(&config))
}

fn local_pipeline() -> StateExtractionPipeline<OracleBackend> {
    pipeline_with(OracleBackend::disabled("test run"))
}

fn gemini_oracle(server: &MockServer, model: &str, api_key: &str) -> GeminiOracle {
    let mut config = default_app_config().oracle;
    config.endpoint = server.uri();
    config.timeout_secs = 5;
    GeminiOracle::new(
        &config,
        OracleCredentials {
            api_key: api_key.to_string(),
            model: model.to_string(),
        },
    )
    .unwrap()
}

#[tokio::test]
async fn test_ny_page_resolves_every_section_locally() {
    let server = mock_state_page(NY_PATH, &load_fixture("ny_corporation_tax.html")).await;
    let url = format!("{}{}", server.uri(), NY_PATH);
    let ny = example_state_config("ny.yaml", &url, &[]);

    let outcome = local_pipeline().run_state(&ny).await;

    assert!(outcome.fetched());
    assert_eq!(outcome.source_url.as_deref(), Some(url.as_str()));
    let facts = &outcome.result.facts;
    assert_eq!(facts.iter().map(|f| f.section.as_str()).collect::<Vec<_>>(), vec!["ENI", "Capital", "FDM"]);

    let eni = outcome.result.fact("ENI").unwrap();
    assert_eq!(eni.value, "0.065");
    assert_eq!(eni.description, "General business tax rate is 0.065");
    assert_eq!(eni.method, DerivationMethod::LocalHeuristic);
    assert_eq!(eni.status, FactStatus::Resolved);

    assert_eq!(outcome.result.fact("Capital").unwrap().value, "0.001");

    let fdm = outcome.result.fact("FDM").unwrap();
    assert_eq!(fdm.value, "ranges from $25 to $200,000");
    assert_eq!(fdm.description, "Graduated by revenue, ranging from $25 to $200,000");

    assert_eq!(outcome.result.resolved_count(), 3);
    assert_eq!(outcome.oracle_calls, 0);

    let strategies: Vec<_> = outcome.raw_sections.iter().map(|r| r.strategy).collect();
    assert_eq!(
        strategies,
        vec![Some(MatchStrategy::Anchor), Some(MatchStrategy::Alias), Some(MatchStrategy::Alias)]
    );
    assert!(outcome.raw_sections[0].text.ends_with("All other general business taxpayers | 0.065"));
    assert!(outcome.audit.render().contains("--- ENI (Entire Net Income) ---\nLocal heuristic: General business tax rate is 0.065"));
}

#[tokio::test]
async fn test_boilerplate_regions_do_not_leak_into_sections() {
    let server = mock_state_page(NY_PATH, &load_fixture("ny_corporation_tax.html")).await;
    let ny = example_state_config("ny.yaml", &format!("{}{}", server.uri(), NY_PATH), &[]);

    let outcome = local_pipeline().run_state(&ny).await;

    for raw in &outcome.raw_sections {
        assert!(!raw.text.contains("filing reminders"), "{} picked up header text", raw.key);
        assert!(!raw.text.contains("Contact us"), "{} picked up footer text", raw.key);
    }
}

#[tokio::test]
async fn test_windows_1252_page_is_decoded_by_header_charset() {
    let server = MockServer::start().await;
    mount_encoded_page(
        &server,
        "/legacy",
        b"<html><body><p>All\xA0other taxpayers \xA7210</p></body></html>".to_vec(),
        "text/html; charset=windows-1252",
    )
    .await;

    let fetcher = PageFetcher::new(&default_app_config().http).unwrap();
    let html = fetcher.fetch(&format!("{}/legacy", server.uri())).await.unwrap();

    assert!(html.contains("All\u{a0}other"), "{}", html);
    assert!(html.contains("\u{a7}210"), "{}", html);
    assert!(!html.contains('\u{fffd}'));
}

#[tokio::test]
async fn test_windows_1252_ny_page_resolves_rates() {
    let page = load_fixture("ny_corporation_tax.html").replace("All other general business", "All\u{a0}other general business");
    let (body, _, _) = encoding_rs::WINDOWS_1252.encode(&page);
    let server = MockServer::start().await;
    mount_encoded_page(&server, NY_PATH, body.into_owned(), "text/html; charset=windows-1252").await;
    let ny = example_state_config("ny.yaml", &format!("{}{}", server.uri(), NY_PATH), &[]);

    let outcome = local_pipeline().run_state(&ny).await;

    let eni = outcome.result.fact("ENI").unwrap();
    assert_eq!(eni.value, "0.065");
    assert_eq!(eni.status, FactStatus::Resolved);
}

#[tokio::test]
async fn test_backup_url_used_when_primary_fails() {
    let server = MockServer::start().await;
    mount_error_page(&server, "/moved", 404).await;
    mount_html_page(&server, NY_PATH, &load_fixture("ny_corporation_tax.html")).await;

    let primary = format!("{}/moved", server.uri());
    let backup = format!("{}{}", server.uri(), NY_PATH);
    let ny = example_state_config("ny.yaml", &primary, &[&backup]);

    let outcome = local_pipeline().run_state(&ny).await;

    assert!(outcome.fetched());
    assert_eq!(outcome.source_url.as_deref(), Some(backup.as_str()));
    assert_eq!(outcome.result.resolved_count(), 3);
}

#[tokio::test]
async fn test_unreachable_state_gets_placeholders_and_batch_continues() {
    let down = mock_error_server(503).await;
    let up = mock_state_page(NY_PATH, &load_fixture("ny_corporation_tax.html")).await;

    let mut broken = example_state_config("ca.yaml", &format!("{}/index.html", down.uri()), &[]);
    broken.backup_urls = vec![format!("{}/backup.html", down.uri())];
    let ny = example_state_config("ny.yaml", &format!("{}{}", up.uri(), NY_PATH), &[]);

    let report = local_pipeline().run_batch(&[broken, ny]).await;

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.states_failed(), 1);

    let ca = &report.outcomes[0];
    assert!(!ca.fetched());
    let failure = ca.fetch_failure.as_ref().unwrap();
    assert_eq!(failure.attempts.len(), 2);
    assert!(matches!(failure.attempts[0], FetchError::Status { status: 503, .. }));
    assert!(ca
        .result
        .facts
        .iter()
        .all(|f| f.placeholder == Some(PlaceholderReason::FetchFailure) && f.value == "N/A"));
    assert!(ca.audit.render().contains("All URLs failed"));

    assert_eq!(report.outcomes[1].result.resolved_count(), 3);
    assert_eq!(report.sections_resolved(), 3);
}

#[tokio::test]
async fn test_slow_server_times_out_into_fetch_failure() {
    let server = mock_timeout_server(3_000).await;
    let mut config = default_app_config();
    config.http.request_timeout_secs = 1;
    let fetcher = PageFetcher::new(&config.http).unwrap();
    let pipeline = StateExtractionPipeline::new(fetcher, OracleBackend::disabled("test run"), PipelineSettings::from_config(&config));

    let ny = example_state_config("ny.yaml", &format!("{}/slow", server.uri()), &[]);
    let outcome = pipeline.run_state(&ny).await;

    let failure = outcome.fetch_failure.unwrap();
    assert!(matches!(failure.attempts[0], FetchError::Timeout { .. }));
    assert_eq!(outcome.result.unresolved_count(), 3);
}

#[tokio::test]
async fn test_missing_sections_become_placeholders() {
    let server = mock_state_page("/ca", &load_fixture("narrative_only.html")).await;
    let ca = example_state_config("ca.yaml", &format!("{}/ca", server.uri()), &[]);

    let outcome = local_pipeline().run_state(&ca).await;

    assert!(outcome.fetched());
    assert_eq!(outcome.result.facts.len(), 3);

    let capital = outcome.result.fact("Capital").unwrap();
    assert_eq!(capital.placeholder, Some(PlaceholderReason::SectionNotFound));
    assert_eq!(capital.method, DerivationMethod::Unavailable);

    // Located by the franchise tax hint, but the prose carries no "all other" rate
    let eni = outcome.result.fact("ENI").unwrap();
    assert_eq!(eni.status, FactStatus::Unresolved);
    assert_eq!(eni.value, "N/A");
    assert_eq!(outcome.raw_sections[0].text, "The rate for general corporations is set annually.");
}

#[tokio::test]
async fn test_runs_are_idempotent() {
    let server = mock_state_page(NY_PATH, &load_fixture("ny_corporation_tax.html")).await;
    let ny = example_state_config("ny.yaml", &format!("{}{}", server.uri(), NY_PATH), &[]);
    let pipeline = local_pipeline();

    let first = pipeline.run_state(&ny).await;
    let second = pipeline.run_state(&ny).await;

    assert_eq!(first.result, second.result);
    assert_eq!(first.raw_sections, second.raw_sections);
    assert_eq!(first.audit, second.audit);
}

#[tokio::test]
async fn test_failing_oracle_matches_disabled_oracle() {
    let page = mock_state_page(NY_PATH, &load_fixture("ny_corporation_tax.html")).await;
    let ny = example_state_config("ny.yaml", &format!("{}{}", page.uri(), NY_PATH), &[]);
    let broken_oracle = mock_error_server(500).await;

    let disabled = local_pipeline().run_state(&ny).await;
    let failing = pipeline_with(gemini_oracle(&broken_oracle, "gemini-test", "key")).run_state(&ny).await;

    assert_eq!(disabled.result, failing.result);
    assert_eq!(failing.oracle_calls, 3);
    assert_eq!(failing.oracle_fallbacks, 3);
    assert!(failing.audit.render().contains("Oracle error: oracle returned HTTP 500"));
}

#[tokio::test]
async fn test_oracle_answers_are_validated_per_section() {
    let page = mock_state_page(NY_PATH, &load_fixture("ny_corporation_tax.html")).await;
    let ny = example_state_config("ny.yaml", &format!("{}{}", page.uri(), NY_PATH), &[]);
    let answer = "```json\n{\"value\": \"0.065\", \"justification\": \"All other general business taxpayers row\", \"confidence\": \"High\"}\n```";
    let oracle_server = mock_gemini_server("gemini-test", "secret", answer).await;

    let outcome = pipeline_with(gemini_oracle(&oracle_server, "gemini-test", "secret")).run_state(&ny).await;

    assert_eq!(outcome.oracle_calls, 3);
    assert_eq!(outcome.oracle_fallbacks, 0);

    let eni = outcome.result.fact("ENI").unwrap();
    assert_eq!(eni.method, DerivationMethod::LlmDerived);
    assert_eq!(eni.status, FactStatus::Resolved);
    assert_eq!(eni.confidence, Some(Confidence::High));
    assert_eq!(eni.justification.as_deref(), Some("All other general business taxpayers row"));

    // NY expects the minimum tax answer to span $25 to $200,000
    let fdm = outcome.result.fact("FDM").unwrap();
    assert_eq!(fdm.status, FactStatus::Unresolved);
    assert_eq!(fdm.placeholder, Some(PlaceholderReason::ValidationMismatch));

    assert!(outcome.audit.render().contains("\"value\": \"0.065\""));
}

#[tokio::test]
async fn test_slow_oracle_falls_back_within_deadline() {
    let page = mock_state_page(NY_PATH, &load_fixture("ny_corporation_tax.html")).await;
    let ny = example_state_config("ny.yaml", &format!("{}{}", page.uri(), NY_PATH), &[]);

    let oracle_server = MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .respond_with(
            wiremock::ResponseTemplate::new(200)
                .set_body_json(common::wiremock_helpers::gemini_response("{\"value\": \"0.065\"}"))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&oracle_server)
        .await;

    let config = default_app_config();
    let mut settings = PipelineSettings::from_config(&config);
    settings.oracle_timeout = Duration::from_millis(200);
    let pipeline = StateExtractionPipeline::new(
        PageFetcher::new(&config.http).unwrap(),
        gemini_oracle(&oracle_server, "gemini-test", "key"),
        settings,
    );

    let outcome = pipeline.run_state(&ny).await;

    assert_eq!(outcome.oracle_fallbacks, 3);
    assert_eq!(outcome.result.fact("ENI").unwrap().method, DerivationMethod::LocalHeuristic);
    assert!(outcome.audit.render().contains("timed out"));
}
