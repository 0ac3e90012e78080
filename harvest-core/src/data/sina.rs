//! Sina Finance clients.
//!
//! Two public endpoints are used:
//! - `MoneyFlow.ssl_qsfx_lscjfb`: historical fund flow, paginated, newest
//!   first, served as GBK-encoded JSON.
//! - `CN_MarketDataService.getKLineData`: daily K-lines (scale 240).
//!
//! Neither has an official contract. Bodies are decoded as GBK before JSON
//! parsing; reading them as UTF-8 silently corrupts every string field.

use super::circuit_breaker::CircuitBreaker;
use super::normalize::{coerce_f64, parse_date};
use super::provider::{DataError, FlowPageSource, KdataClient, RawFlowRecord};
use crate::domain::KdataBar;
use chrono::NaiveDate;
use encoding_rs::GBK;
use log::{debug, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const FLOW_BASE_URL: &str =
    "https://vip.stock.finance.sina.com.cn/quotes_service/api/json_v2.php/MoneyFlow.ssl_qsfx_lscjfb";
pub const KLINE_BASE_URL: &str =
    "https://quotes.sina.cn/cn/api/json_v2.php/CN_MarketDataService.getKLineData";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
const REFERER: &str = "https://vip.stock.finance.sina.com.cn/";

/// Provider form of a security code: separators stripped, lowercase.
///
/// `sh.600000` → `sh600000`
pub fn api_code(code: &str) -> String {
    code.chars()
        .filter(|c| !matches!(c, '.' | '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Decode a GBK body into a list of JSON objects.
///
/// An empty body, `null`, or `[]` is an empty page.
pub fn decode_rows(body: &[u8]) -> Result<Vec<RawFlowRecord>, DataError> {
    let (text, _, had_errors) = GBK.decode(body);
    if had_errors {
        warn!("response body contained bytes outside GBK; replaced");
    }

    let text = text.trim();
    if text.is_empty() || text == "null" {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_str(text)
        .map_err(|e| DataError::ResponseFormatChanged(format!("invalid JSON body: {e}")))?;

    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                other => Err(DataError::ResponseFormatChanged(format!(
                    "expected object in array, got {other}"
                ))),
            })
            .collect(),
        other => Err(DataError::ResponseFormatChanged(format!(
            "expected JSON array, got {}",
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::blocking::Client, DataError> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))
}

/// Single GET with breaker bookkeeping. No retries: the caller decides.
///
/// Only 403 and throttling reach the breaker.
fn get_rows(
    client: &reqwest::blocking::Client,
    breaker: &CircuitBreaker,
    url: &str,
) -> Result<Vec<RawFlowRecord>, DataError> {
    if !breaker.is_allowed() {
        debug!(
            "breaker open for another {}s; refusing {url}",
            breaker.remaining_cooldown().as_secs()
        );
        return Err(DataError::CircuitBreakerTripped);
    }

    debug!("GET {url}");
    let resp = client
        .get(url)
        .header(reqwest::header::REFERER, REFERER)
        .send()
        .map_err(|e| DataError::NetworkUnreachable(e.to_string()))?;

    let status = resp.status();

    if status == reqwest::StatusCode::FORBIDDEN {
        // IP block
        breaker.trip();
        return Err(DataError::CircuitBreakerTripped);
    }

    // Sina uses 456 as well as 429 for throttling.
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 456 {
        breaker.record_failure();
        let retry_after_secs = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);
        return Err(DataError::RateLimited { retry_after_secs });
    }

    if !status.is_success() {
        return Err(DataError::Other(format!("HTTP {status}")));
    }

    let body = resp
        .bytes()
        .map_err(|e| DataError::NetworkUnreachable(format!("reading body: {e}")))?;
    let rows = decode_rows(&body)?;
    breaker.record_success();
    Ok(rows)
}

/// Fund-flow page source backed by the Sina endpoint.
pub struct SinaFlowClient {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    base_url: String,
}

impl SinaFlowClient {
    pub fn new(timeout: Duration, circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, DataError> {
        Ok(Self {
            client: build_client(timeout)?,
            circuit_breaker,
            base_url: FLOW_BASE_URL.to_string(),
        })
    }

    /// Point at a mirror or a local test server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn page_url(&self, api_code: &str, page: u32, page_size: usize) -> String {
        format!(
            "{}?page={page}&num={page_size}&sort=opendate&asc=0&daima={api_code}",
            self.base_url
        )
    }
}

impl FlowPageSource for SinaFlowClient {
    fn name(&self) -> &str {
        "sina_moneyflow"
    }

    fn fetch_page(
        &self,
        api_code: &str,
        page: u32,
        page_size: usize,
    ) -> Result<Vec<RawFlowRecord>, DataError> {
        let url = self.page_url(api_code, page, page_size);
        get_rows(&self.client, &self.circuit_breaker, &url)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

/// Daily K-line client. "Login" opens the HTTP session; without it every
/// query is refused.
pub struct SinaKlineClient {
    client: Option<reqwest::blocking::Client>,
    circuit_breaker: Arc<CircuitBreaker>,
    timeout: Duration,
    datalen: u32,
    base_url: String,
}

impl SinaKlineClient {
    pub fn new(timeout: Duration, datalen: u32, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            client: None,
            circuit_breaker,
            timeout,
            datalen,
            base_url: KLINE_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn is_logged_in(&self) -> bool {
        self.client.is_some()
    }
}

impl KdataClient for SinaKlineClient {
    fn name(&self) -> &str {
        "sina_kline"
    }

    fn login(&mut self) -> Result<(), DataError> {
        if self.client.is_none() {
            self.client = Some(build_client(self.timeout)?);
        }
        Ok(())
    }

    fn logout(&mut self) {
        self.client = None;
    }

    fn query_daily(&self, code: &str, start: NaiveDate) -> Result<Vec<KdataBar>, DataError> {
        let client = self.client.as_ref().ok_or_else(|| {
            DataError::AuthenticationRequired(format!("{} session is not open", self.name()))
        })?;
        let url = format!(
            "{}?symbol={}&scale=240&ma=no&datalen={}",
            self.base_url,
            api_code(code),
            self.datalen
        );
        let rows = get_rows(client, &self.circuit_breaker, &url)?;
        Ok(kline_rows_to_bars(code, &rows, start))
    }
}

/// Convert K-line rows (`day`, `open`, `high`, `low`, `close`, `volume`)
/// into bars on or after `start`. Rows without a parseable day are dropped.
pub fn kline_rows_to_bars(code: &str, rows: &[RawFlowRecord], start: NaiveDate) -> Vec<KdataBar> {
    let num = |row: &RawFlowRecord, key: &str| row.get(key).and_then(coerce_f64);
    rows.iter()
        .filter_map(|row| {
            let date = row.get("day").and_then(parse_date)?;
            (date >= start).then(|| KdataBar {
                date,
                code: code.to_string(),
                open: num(row, "open"),
                high: num(row, "high"),
                low: num(row, "low"),
                close: num(row, "close"),
                preclose: None,
                volume: num(row, "volume"),
                pct_change: None,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    #[test]
    fn api_code_strips_separators() {
        assert_eq!(api_code("sh.600000"), "sh600000");
        assert_eq!(api_code("SZ.000001"), "sz000001");
        assert_eq!(api_code("sz000001"), "sz000001");
    }

    #[test]
    fn decodes_gbk_body() {
        let text = r#"[{"opendate":"2024-01-02","trade":"7.40","note":"主力净流入"}]"#;
        let (bytes, _, _) = GBK.encode(text);
        let rows = decode_rows(&bytes).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["note"], json!("主力净流入"));
        assert_eq!(rows[0]["trade"], json!("7.40"));
    }

    #[test]
    fn empty_bodies_are_empty_pages() {
        assert!(decode_rows(b"").unwrap().is_empty());
        assert!(decode_rows(b"null").unwrap().is_empty());
        assert!(decode_rows(b" [] \n").unwrap().is_empty());
    }

    #[test]
    fn non_array_body_is_format_change() {
        let err = decode_rows(br#"{"error":"busy"}"#).unwrap_err();
        assert!(matches!(err, DataError::ResponseFormatChanged(_)));
        let err = decode_rows(b"<html>").unwrap_err();
        assert!(matches!(err, DataError::ResponseFormatChanged(_)));
    }

    #[test]
    fn page_url_carries_all_parameters() {
        let client = SinaFlowClient::new(
            Duration::from_secs(1),
            Arc::new(CircuitBreaker::default_provider()),
        )
        .unwrap()
        .with_base_url("http://localhost/flow");
        assert_eq!(
            client.page_url("sh600000", 3, 50),
            "http://localhost/flow?page=3&num=50&sort=opendate&asc=0&daima=sh600000"
        );
    }

    #[test]
    fn tripped_breaker_refuses_before_network() {
        let breaker = Arc::new(CircuitBreaker::default_provider());
        breaker.trip();
        let client = SinaFlowClient::new(Duration::from_secs(1), breaker)
            .unwrap()
            .with_base_url("http://127.0.0.1:9/unreachable");
        assert!(!client.is_available());
        let err = client.fetch_page("sh600000", 1, 50).unwrap_err();
        assert!(matches!(err, DataError::CircuitBreakerTripped));
    }

    /// Serves one canned response per connection, in order, then stops
    /// listening. Joining the handle yields the number of requests served.
    fn serve(responses: Vec<Vec<u8>>) -> (String, JoinHandle<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let mut served = 0;
            for response in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut buf).unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                stream.write_all(&response).unwrap();
                served += 1;
            }
            served
        });
        (format!("http://{addr}/flow"), handle)
    }

    fn http_response(status: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
        let mut head = format!(
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n",
            body.len()
        );
        for (name, value) in headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str("\r\n");
        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(body);
        bytes
    }

    fn flow_client(base_url: &str, breaker: Arc<CircuitBreaker>) -> SinaFlowClient {
        SinaFlowClient::new(Duration::from_secs(5), breaker)
            .unwrap()
            .with_base_url(base_url)
    }

    #[test]
    fn gbk_page_over_http() {
        let text = r#"[{"opendate":"2024-06-28","trade":"7.40","cate_na":"银行"}]"#;
        let body = GBK.encode(text).0.into_owned();
        let (url, server) = serve(vec![http_response(
            "200 OK",
            &[("Content-Type", "application/json; charset=gbk")],
            &body,
        )]);
        let client = flow_client(&url, Arc::new(CircuitBreaker::default_provider()));

        let rows = client.fetch_page("sh600000", 1, 50).unwrap();

        assert_eq!(server.join().unwrap(), 1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["cate_na"], json!("银行"));
        assert_eq!(rows[0]["opendate"], json!("2024-06-28"));
    }

    #[test]
    fn throttling_reports_retry_after() {
        let (url, server) = serve(vec![
            http_response("429 Too Many Requests", &[("Retry-After", "7")], b""),
            http_response("456 Unknown", &[], b""),
        ]);
        let breaker = Arc::new(CircuitBreaker::new(Duration::from_secs(60), 2));
        let client = flow_client(&url, breaker);

        let err = client.fetch_page("sh600000", 1, 50).unwrap_err();
        assert!(matches!(err, DataError::RateLimited { retry_after_secs: 7 }));
        assert!(client.is_available());

        let err = client.fetch_page("sh600000", 1, 50).unwrap_err();
        assert!(matches!(err, DataError::RateLimited { retry_after_secs: 60 }));
        assert!(!client.is_available());
        assert_eq!(server.join().unwrap(), 2);
    }

    #[test]
    fn forbidden_trips_breaker_and_stops_requests() {
        let (url, server) = serve(vec![http_response("403 Forbidden", &[], b"")]);
        let client = flow_client(&url, Arc::new(CircuitBreaker::default_provider()));

        let err = client.fetch_page("sh600000", 1, 50).unwrap_err();
        assert!(matches!(err, DataError::CircuitBreakerTripped));
        assert_eq!(server.join().unwrap(), 1);

        assert!(!client.is_available());
        let err = client.fetch_page("sz000001", 1, 50).unwrap_err();
        assert!(matches!(err, DataError::CircuitBreakerTripped));
    }

    #[test]
    fn server_errors_stay_with_their_request() {
        let mut responses = vec![http_response("502 Bad Gateway", &[], b""); 3];
        responses.push(http_response("200 OK", &[], b"[]"));
        let (url, server) = serve(responses);
        let client = flow_client(&url, Arc::new(CircuitBreaker::default_provider()));

        for code in ["sh600001", "sh600002", "sh600003"] {
            let err = client.fetch_page(code, 1, 50).unwrap_err();
            assert!(matches!(err, DataError::Other(ref m) if m.contains("502")));
        }
        assert!(client.is_available());
        assert!(client.fetch_page("sh600004", 1, 50).unwrap().is_empty());
        assert_eq!(server.join().unwrap(), 4);
    }

    #[test]
    fn kline_requires_session() {
        let mut client = SinaKlineClient::new(
            Duration::from_secs(1),
            10,
            Arc::new(CircuitBreaker::default_provider()),
        );
        let start = NaiveDate::from_ymd_opt(2005, 1, 1).unwrap();
        let err = client.query_daily("sh.600000", start).unwrap_err();
        assert!(matches!(err, DataError::AuthenticationRequired(_)));

        client.login().unwrap();
        assert!(client.is_logged_in());
        client.logout();
        assert!(!client.is_logged_in());
    }

    #[test]
    fn kline_rows_filtered_by_start() {
        let rows = decode_rows(
            br#"[{"day":"2004-12-31","open":"1","high":"2","low":"0.5","close":"1.5","volume":"100"},
                 {"day":"2005-01-04","open":"1.5","high":"2","low":"1","close":"1.8","volume":"200"},
                 {"day":"bad","open":"1","high":"1","low":"1","close":"1","volume":"1"}]"#,
        )
        .unwrap();
        let start = NaiveDate::from_ymd_opt(2005, 1, 1).unwrap();
        let bars = kline_rows_to_bars("sh.600000", &rows, start);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, Some(1.8));
        assert_eq!(bars[0].volume, Some(200.0));
        assert_eq!(bars[0].code, "sh.600000");
    }
}
