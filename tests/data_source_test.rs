// Climate data acquisition: World Bank API with retries, then the CSV fallback
// Uses mockito for HTTP mocking

mod common;

use common::{indicator_body, FALLBACK_CSV};
use mockito::{Matcher, Server};
use nepal_climate_forecast::data_source::{ClimateDataResolver, DataError, DataOrigin};
use nepal_climate_forecast::fetch_error::FetchError;
use nepal_climate_forecast::fetcher::{WorldBankFetcher, PRECIPITATION_INDICATOR, TEMPERATURE_INDICATOR};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const TEMP_PATH: &str = "/country/NPL/indicator/AG.TMP.AVG";
const PRECIP_PATH: &str = "/country/NPL/indicator/AG.PCP.AVG";

fn fetcher(server: &Server) -> WorldBankFetcher {
    WorldBankFetcher::with_base_url(server.url(), 2000, 2004)
}

fn fallback_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_fetch_indicator_success() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", TEMP_PATH)
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("format".into(), "json".into()),
            Matcher::UrlEncoded("date".into(), "2000:2004".into()),
            Matcher::UrlEncoded("per_page".into(), "1000".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(indicator_body(
            TEMPERATURE_INDICATOR,
            &[(2000, Some(12.1)), (2001, None), (2002, Some(12.4))],
        ))
        .create_async()
        .await;

    let observations = fetcher(&server)
        .fetch_indicator(TEMPERATURE_INDICATOR)
        .await
        .unwrap();

    assert_eq!(observations, vec![(2000, 12.1), (2002, 12.4)]);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_fetch_indicator_server_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", PRECIP_PATH)
        .match_query(Matcher::Any)
        .with_status(503)
        .create_async()
        .await;

    let result = fetcher(&server).fetch_indicator(PRECIPITATION_INDICATOR).await;
    assert!(matches!(result, Err(FetchError::Status { status: 503, .. })));
}

#[tokio::test]
async fn test_resolve_merges_indicators() {
    let mut server = Server::new_async().await;
    let _temp = server
        .mock("GET", TEMP_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(indicator_body(
            TEMPERATURE_INDICATOR,
            &[(2000, Some(12.0)), (2001, Some(12.2)), (2002, Some(12.3))],
        ))
        .create_async()
        .await;
    let _precip = server
        .mock("GET", PRECIP_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(indicator_body(
            PRECIPITATION_INDICATOR,
            &[(2000, Some(1500.0)), (2001, None), (2002, Some(1450.0))],
        ))
        .create_async()
        .await;

    let resolved = ClimateDataResolver::new(fetcher(&server), "does/not/exist.csv")
        .with_retry(1, Duration::ZERO)
        .resolve()
        .await
        .unwrap();

    assert_eq!(resolved.origin, DataOrigin::WorldBank);
    assert_eq!(resolved.series.years(), vec![2000, 2002]);
    assert_eq!(resolved.series.precipitations(), vec![1500.0, 1450.0]);
}

#[tokio::test]
async fn test_retries_then_falls_back_to_csv() {
    let mut server = Server::new_async().await;
    let temp = server
        .mock("GET", TEMP_PATH)
        .match_query(Matcher::Any)
        .with_status(500)
        .expect(3)
        .create_async()
        .await;
    let precip = server
        .mock("GET", PRECIP_PATH)
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let file = fallback_file(FALLBACK_CSV);
    let resolved = ClimateDataResolver::new(fetcher(&server), file.path())
        .with_retry(3, Duration::from_millis(1))
        .resolve()
        .await
        .unwrap();

    assert_eq!(resolved.origin, DataOrigin::Fallback);
    assert_eq!(resolved.series.first_year(), Some(1990));
    assert_eq!(resolved.series.last_year(), Some(2023));
    temp.assert_async().await;
    precip.assert_async().await;
}

#[tokio::test]
async fn test_recovers_on_second_attempt() {
    let mut server = Server::new_async().await;
    // The failing mock answers first; once its single hit is used the next one takes over.
    let failing = server
        .mock("GET", TEMP_PATH)
        .match_query(Matcher::Any)
        .with_status(502)
        .expect(1)
        .create_async()
        .await;
    let _ok = server
        .mock("GET", TEMP_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(indicator_body(TEMPERATURE_INDICATOR, &[(2000, Some(12.0))]))
        .create_async()
        .await;
    let _precip = server
        .mock("GET", PRECIP_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(indicator_body(PRECIPITATION_INDICATOR, &[(2000, Some(1500.0))]))
        .create_async()
        .await;

    let resolved = ClimateDataResolver::new(fetcher(&server), "does/not/exist.csv")
        .with_retry(3, Duration::from_millis(1))
        .resolve()
        .await
        .unwrap();

    assert_eq!(resolved.origin, DataOrigin::WorldBank);
    failing.assert_async().await;
}

#[tokio::test]
async fn test_both_sources_fail() {
    let mut server = Server::new_async().await;
    let _temp = server
        .mock("GET", TEMP_PATH)
        .match_query(Matcher::Any)
        .with_status(404)
        .create_async()
        .await;

    let result = ClimateDataResolver::new(fetcher(&server), "does/not/exist.csv")
        .with_retry(2, Duration::from_millis(1))
        .resolve()
        .await;

    match result {
        Err(DataError::Unavailable { primary, fallback }) => {
            assert!(primary.contains("404"), "primary: {primary}");
            assert!(fallback.contains("does/not/exist.csv"), "fallback: {fallback}");
        }
        other => panic!("Expected Unavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unparseable_fallback_is_unavailable() {
    let mut server = Server::new_async().await;
    let _temp = server
        .mock("GET", TEMP_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("[{\"page\": 0}, null]")
        .create_async()
        .await;

    let file = fallback_file("year,temperature\n2000,12.0\n");
    let result = ClimateDataResolver::new(fetcher(&server), file.path())
        .with_retry(1, Duration::ZERO)
        .resolve()
        .await;

    assert!(matches!(result, Err(DataError::Unavailable { .. })));
}
