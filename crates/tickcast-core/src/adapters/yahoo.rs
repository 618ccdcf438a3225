use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::data_source::{BarProvider, ProviderError, RawBar};
use crate::http_client::{HttpClient, HttpRequest, ReqwestHttpClient};
use crate::{DateRange, Interval, Symbol, UtcDateTime};

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";

/// Yahoo Finance v8 chart endpoint.
#[derive(Clone)]
pub struct YahooProvider {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    request_timeout: Duration,
}

impl Default for YahooProvider {
    fn default() -> Self {
        Self::new(Arc::new(ReqwestHttpClient::new()))
    }
}

impl YahooProvider {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            base_url: String::from(DEFAULT_BASE_URL),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn chart_url(&self, symbol: &Symbol, range: DateRange, interval: Interval) -> String {
        format!(
            "{}/v8/finance/chart/{}?period1={}&period2={}&interval={}&includePrePost=false",
            self.base_url,
            urlencoding::encode(symbol.as_str()),
            range.start().unix_timestamp(),
            range.end().unix_timestamp(),
            interval.as_str(),
        )
    }

    async fn fetch_chart(
        &self,
        symbol: &Symbol,
        range: DateRange,
        interval: Interval,
    ) -> Result<Vec<RawBar>, ProviderError> {
        let request = HttpRequest::get(self.chart_url(symbol, range, interval))
            .with_header("referer", "https://finance.yahoo.com/")
            .with_timeout(self.request_timeout);

        let response = self.http_client.execute(request).await.map_err(|error| {
            if error.timed_out() {
                ProviderError::timeout(format!("yahoo request timed out: {}", error.message()))
            } else {
                ProviderError::unavailable(format!("yahoo transport error: {}", error.message()))
            }
        })?;

        match response.status {
            404 => {
                return Err(ProviderError::not_found(format!(
                    "yahoo has no chart for '{symbol}'"
                )))
            }
            429 => return Err(ProviderError::rate_limited("yahoo rate limited the request")),
            status if status >= 500 => {
                return Err(ProviderError::unavailable(format!(
                    "yahoo returned status {status}"
                )))
            }
            status if !response.is_success() => {
                return Err(ProviderError::rejected(format!(
                    "yahoo rejected the request with status {status}"
                )))
            }
            _ => {}
        }

        parse_chart(symbol, &response.body)
    }
}

impl BarProvider for YahooProvider {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    fn fetch_bars<'a>(
        &'a self,
        symbol: &'a Symbol,
        range: DateRange,
        interval: Interval,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RawBar>, ProviderError>> + Send + 'a>> {
        Box::pin(self.fetch_chart(symbol, range, interval))
    }
}

fn parse_chart(symbol: &Symbol, body: &str) -> Result<Vec<RawBar>, ProviderError> {
    let chart_response: YahooChartResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::malformed(format!("failed to parse yahoo chart: {e}")))?;

    if let Some(error) = chart_response.chart.error {
        return Err(if error.code.eq_ignore_ascii_case("Not Found") {
            ProviderError::not_found(format!("yahoo does not know '{symbol}': {}", error.description))
        } else {
            ProviderError::rejected(format!(
                "yahoo chart API error {}: {}",
                error.code, error.description
            ))
        });
    }

    let Some(result) = chart_response
        .chart
        .result
        .and_then(|results| results.into_iter().next())
    else {
        return Err(ProviderError::not_found(format!(
            "yahoo returned no chart result for '{symbol}'"
        )));
    };

    // A known symbol with nothing in range comes back without timestamps.
    let Some(timestamps) = result.timestamp else {
        return Ok(Vec::new());
    };
    let Some(quote) = result.indicators.quote.into_iter().next() else {
        return Err(ProviderError::malformed("yahoo chart has timestamps but no quote block"));
    };

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, &ts_value) in timestamps.iter().enumerate() {
        let ts = UtcDateTime::from_unix_timestamp(ts_value)
            .map_err(|e| ProviderError::malformed(format!("invalid timestamp: {e}")))?;

        // Missing OHLC means no trade in the slot; the bar is skipped and
        // surfaces later as a gap.
        if let (Some(Some(open)), Some(Some(high)), Some(Some(low)), Some(Some(close))) = (
            quote.open.get(i),
            quote.high.get(i),
            quote.low.get(i),
            quote.close.get(i),
        ) {
            let volume = quote
                .volume
                .get(i)
                .copied()
                .flatten()
                .and_then(|v| u64::try_from(v).ok());
            bars.push(RawBar {
                ts,
                open: *open,
                high: *high,
                low: *low,
                close: *close,
                volume,
            });
        }
    }

    Ok(bars)
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartResponse {
    chart: YahooChartData,
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartData {
    #[serde(default)]
    result: Option<Vec<YahooChartResult>>,
    #[serde(default)]
    error: Option<YahooChartError>,
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartError {
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartResult {
    timestamp: Option<Vec<i64>>,
    indicators: YahooChartIndicators,
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartIndicators {
    quote: Vec<YahooChartQuote>,
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<i64>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::ProviderErrorKind;
    use crate::http_client::{HttpError, HttpResponse};
    use std::sync::Mutex;

    #[derive(Debug)]
    struct RecordingHttpClient {
        response: Result<HttpResponse, HttpError>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl RecordingHttpClient {
        fn replying(response: Result<HttpResponse, HttpError>) -> Arc<Self> {
            Arc::new(Self {
                response,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn recorded_requests(&self) -> Vec<HttpRequest> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .clone()
        }
    }

    impl HttpClient for RecordingHttpClient {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .push(request);
            let response = self.response.clone();
            Box::pin(async move { response })
        }
    }

    const CHART_BODY: &str = r#"{
        "chart": {
            "result": [{
                "timestamp": [1704205800, 1704292200, 1704378600],
                "indicators": {
                    "quote": [{
                        "open":   [187.15, null, 182.15],
                        "high":   [188.44, null, 183.09],
                        "low":    [183.89, null, 180.88],
                        "close":  [185.64, null, 181.91],
                        "volume": [82488700, null, 71983600]
                    }]
                }
            }],
            "error": null
        }
    }"#;

    fn acme() -> Symbol {
        Symbol::parse("ACME").expect("symbol")
    }

    fn january() -> DateRange {
        DateRange::new(
            UtcDateTime::parse("2024-01-01T00:00:00Z").expect("start"),
            UtcDateTime::parse("2024-01-31T00:00:00Z").expect("end"),
        )
        .expect("range")
    }

    async fn fetch(response: Result<HttpResponse, HttpError>) -> Result<Vec<RawBar>, ProviderError> {
        let client = RecordingHttpClient::replying(response);
        YahooProvider::new(client)
            .fetch_bars(&acme(), january(), Interval::OneDay)
            .await
    }

    #[tokio::test]
    async fn builds_period_based_chart_url() {
        let client = RecordingHttpClient::replying(Ok(HttpResponse::ok_json(CHART_BODY)));
        let provider = YahooProvider::new(client.clone()).with_base_url("https://chart.test/");

        provider
            .fetch_bars(&acme(), january(), Interval::OneHour)
            .await
            .expect("bars");

        let requests = client.recorded_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].url,
            "https://chart.test/v8/finance/chart/ACME?period1=1704067200&period2=1706659200&interval=1h&includePrePost=false"
        );
    }

    #[tokio::test]
    async fn skips_null_ohlc_entries() {
        let bars = fetch(Ok(HttpResponse::ok_json(CHART_BODY)))
            .await
            .expect("bars");

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 185.64);
        assert_eq!(bars[1].volume, Some(71_983_600));
    }

    #[tokio::test]
    async fn maps_chart_not_found_to_not_found() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let err = fetch(Ok(HttpResponse::new(404, body)))
            .await
            .expect_err("must fail");
        assert_eq!(err.kind(), ProviderErrorKind::NotFound);

        let err = fetch(Ok(HttpResponse::ok_json(body)))
            .await
            .expect_err("must fail");
        assert_eq!(err.kind(), ProviderErrorKind::NotFound);
    }

    #[tokio::test]
    async fn classifies_status_codes_and_transport_errors() {
        let rate_limited = fetch(Ok(HttpResponse::new(429, "Too Many Requests")))
            .await
            .expect_err("429");
        assert_eq!(rate_limited.kind(), ProviderErrorKind::RateLimited);

        let unavailable = fetch(Ok(HttpResponse::new(503, "")))
            .await
            .expect_err("503");
        assert_eq!(unavailable.kind(), ProviderErrorKind::Unavailable);

        let timeout = fetch(Err(HttpError::timeout("deadline")))
            .await
            .expect_err("timeout");
        assert_eq!(timeout.kind(), ProviderErrorKind::Timeout);
        assert!(timeout.kind().is_transient());
    }

    #[tokio::test]
    async fn client_errors_other_than_rate_limits_are_not_transient() {
        for status in [400, 401, 403, 422] {
            let err = fetch(Ok(HttpResponse::new(status, "Forbidden")))
                .await
                .expect_err("client error");
            assert_eq!(err.kind(), ProviderErrorKind::Rejected, "status {status}");
            assert!(!err.kind().is_transient());
        }

        let body = r#"{"chart":{"result":null,"error":{"code":"Bad Request","description":"Invalid input - interval=7d is not supported"}}}"#;
        let err = fetch(Ok(HttpResponse::ok_json(body)))
            .await
            .expect_err("chart error");
        assert_eq!(err.kind(), ProviderErrorKind::Rejected);
        assert!(err.message().contains("Bad Request"));
    }

    #[tokio::test]
    async fn undecodable_body_is_malformed() {
        let err = fetch(Ok(HttpResponse::ok_json("<html>oops</html>")))
            .await
            .expect_err("must fail");
        assert_eq!(err.kind(), ProviderErrorKind::Malformed);
        assert!(!err.kind().is_transient());
    }

    #[tokio::test]
    async fn empty_range_yields_no_bars() {
        let body = r#"{"chart":{"result":[{"indicators":{"quote":[{}]}}],"error":null}}"#;
        let bars = fetch(Ok(HttpResponse::ok_json(body))).await.expect("empty");
        assert!(bars.is_empty());
    }
}
