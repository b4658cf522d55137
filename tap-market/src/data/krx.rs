//! KRX data portal adapter.
//!
//! # API
//! Every statistic of the portal is served by a single form endpoint,
//! `POST /comm/bldAttendant/getJsonData.cmd`, selected by the `bld`
//! parameter. Responses are JSON objects carrying the rows under
//! `output`, `OutBlock_1` or (for finders) `block1`.
//!
//! # Quirks
//! - Numbers are strings with thousands separators; `-` or `""` means zero
//! - Dates are sent as `YYYYMMDD` and returned as `YYYY/MM/DD`
//! - Per-instrument statistics are keyed by ISIN, so short codes are
//!   resolved through the finder first
//! - Requests without a portal `Referer` are rejected

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::provider::{MarketDataProvider, ProviderError};
use super::rate_limiter::{RateLimiter, SharedRateLimiter};
use super::{DailyBar, FundamentalRow, InvestorFlows, MarketCapRow};
use tap_common::config::MarketConfig;

// ============================================================================
// Constants
// ============================================================================

/// Default portal base URL
const KRX_BASE_URL: &str = "http://data.krx.co.kr";

/// JSON statistics endpoint
const JSON_ENDPOINT: &str = "/comm/bldAttendant/getJsonData.cmd";

/// Referer the portal expects
const KRX_REFERER: &str = "http://data.krx.co.kr/contents/MDC/MDI/mdiLoader";

/// Index listing per index group
const BLD_INDEX_LIST: &str = "dbms/MDC/STAT/standard/MDCSTAT00101";

/// Index daily OHLCV
const BLD_INDEX_OHLCV: &str = "dbms/MDC/STAT/standard/MDCSTAT00301";

/// Index constituents
const BLD_INDEX_PORTFOLIO: &str = "dbms/MDC/STAT/standard/MDCSTAT00601";

/// Instrument daily OHLCV with market cap
const BLD_INSTRUMENT_OHLCV: &str = "dbms/MDC/STAT/standard/MDCSTAT01701";

/// Trading volume by investor segment
const BLD_INVESTOR_FLOWS: &str = "dbms/MDC/STAT/standard/MDCSTAT02301";

/// PER/PBR/dividend yield per instrument
const BLD_FUNDAMENTALS: &str = "dbms/MDC/STAT/standard/MDCSTAT03502";

/// Index name finder
const BLD_INDEX_FINDER: &str = "dbms/comm/finder/finder_equidx";

/// Instrument finders, tried in order (listed stocks, then ETF/ETN products)
const INSTRUMENT_FINDERS: &[&str] = &[
    "dbms/comm/finder/finder_stkisu",
    "dbms/comm/finder/finder_secuprodisu",
];

/// Row containers used by the portal
const ROW_KEYS: &[&str] = &["output", "OutBlock_1", "block1"];

/// Default rate limit: 2 requests per second
const DEFAULT_RATE_LIMIT_RPM: u32 = 120;

/// Retry delay hint after a 429
const RATE_LIMIT_RETRY_SECS: u64 = 2;

/// Investor segment labels
const SEGMENT_FOREIGN: &str = "외국인";
const SEGMENT_INSTITUTION: &str = "기관합계";
const SEGMENT_INDIVIDUAL: &str = "개인";

type Row = Map<String, Value>;

// ============================================================================
// Field Parsing
// ============================================================================

/// Parse a portal number (`"1,234.5"`, `"-"`, `""`).
fn parse_number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => {
            let cleaned: String = s.chars().filter(|c| *c != ',').collect();
            let cleaned = cleaned.trim();
            if cleaned.is_empty() || cleaned == "-" {
                0.0
            } else {
                cleaned.parse().unwrap_or(0.0)
            }
        }
        _ => 0.0,
    }
}

fn number(row: &Row, key: &str) -> f64 {
    parse_number(row.get(key))
}

fn volume(row: &Row, key: &str) -> u64 {
    number(row, key).max(0.0) as u64
}

fn text<'a>(row: &'a Row, key: &str) -> Option<&'a str> {
    row.get(key).and_then(Value::as_str).map(str::trim)
}

/// Parse a portal date (`2024/01/05`, `20240105` or `2024-01-05`).
fn parse_krx_date(raw: &str) -> Option<NaiveDate> {
    ["%Y/%m/%d", "%Y%m%d", "%Y-%m-%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw.trim(), fmt).ok())
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

fn row_date(row: &Row) -> Result<NaiveDate, ProviderError> {
    let raw = text(row, "TRD_DD").unwrap_or_default();
    parse_krx_date(raw).ok_or_else(|| ProviderError::Internal(format!("Invalid date: {raw:?}")))
}

/// Split an index ticker (`"1152"`) into the group digit and index code.
fn split_index_ticker(ticker: &str) -> Result<(&str, &str), ProviderError> {
    if ticker.len() < 2 || !ticker.is_ascii() {
        return Err(ProviderError::InvalidRequest(format!(
            "Invalid index ticker: {ticker}"
        )));
    }
    Ok(ticker.split_at(1))
}

/// Extract rows from a portal response body.
fn extract_rows(body: Value) -> Result<Vec<Row>, ProviderError> {
    let Value::Object(mut object) = body else {
        return Err(ProviderError::Internal("Response is not a JSON object".into()));
    };

    for key in ROW_KEYS {
        if let Some(Value::Array(items)) = object.remove(*key) {
            return Ok(items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(row) => Some(row),
                    _ => None,
                })
                .collect());
        }
    }

    Err(ProviderError::Internal("Response carries no rows".into()))
}

fn bars_from_rows(
    rows: &[Row],
    open: &str,
    high: &str,
    low: &str,
    close: &str,
) -> Result<Vec<DailyBar>, ProviderError> {
    let mut bars = rows
        .iter()
        .map(|row| {
            Ok(DailyBar {
                date: row_date(row)?,
                open: number(row, open),
                high: number(row, high),
                low: number(row, low),
                close: number(row, close),
                volume: volume(row, "ACC_TRDVOL"),
                change_pct: number(row, "FLUC_RT"),
            })
        })
        .collect::<Result<Vec<_>, ProviderError>>()?;

    // The portal returns newest first
    bars.sort_by_key(|bar| bar.date);
    Ok(bars)
}

fn flows_from_rows(rows: &[Row]) -> InvestorFlows {
    let mut flows = InvestorFlows::default();
    for row in rows {
        let net = number(row, "NETBID_TRDVOL") as i64;
        match text(row, "INVST_TP_NM") {
            Some(SEGMENT_FOREIGN) => flows.foreign = Some(net),
            Some(SEGMENT_INSTITUTION) => flows.institution = Some(net),
            Some(SEGMENT_INDIVIDUAL) => flows.individual = Some(net),
            _ => {}
        }
    }
    flows
}

// ============================================================================
// KRX Adapter
// ============================================================================

/// Instrument identity resolved through the finder.
#[derive(Debug, Clone)]
struct ListedInstrument {
    isin: String,
    name: String,
}

/// KRX data portal adapter.
///
/// Rate limiting is applied proactively to every request.
pub struct KrxAdapter {
    base_url: String,
    client: reqwest::Client,
    rate_limiter: SharedRateLimiter,
    /// Index group code listing the theme indices
    theme_group: String,
}

impl KrxAdapter {
    /// Create an adapter against the public portal.
    pub fn new() -> Self {
        Self::with_base_url(KRX_BASE_URL)
    }

    /// Create an adapter against a custom base URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self::with_settings(base_url, Duration::from_secs(15), DEFAULT_RATE_LIMIT_RPM, "04")
    }

    /// Create with explicit timeout, rate limit and theme group.
    pub fn with_settings(
        base_url: impl Into<String>,
        timeout: Duration,
        rate_limit_rpm: u32,
        theme_group: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            rate_limiter: Arc::new(RateLimiter::new("krx", rate_limit_rpm)),
            theme_group: theme_group.into(),
        }
    }

    /// Create from config
    pub fn from_config(config: &MarketConfig) -> Self {
        Self::with_settings(
            config.base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
            config.rate_limit_rpm,
            config.theme_index_group.clone(),
        )
    }

    /// Call a statistic and return its rows.
    async fn call_api(&self, bld: &str, params: &[(&str, String)]) -> Result<Vec<Row>, ProviderError> {
        let url = format!("{}{}", self.base_url, JSON_ENDPOINT);

        let mut form: Vec<(&str, String)> = Vec::with_capacity(params.len() + 2);
        form.push(("bld", bld.to_string()));
        form.push(("locale", "ko_KR".to_string()));
        form.extend(params.iter().cloned());

        self.rate_limiter.acquire().await;

        debug!(bld = bld, "Calling KRX data portal");

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::REFERER, KRX_REFERER)
            .form(&form)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited {
                retry_after_secs: Some(RATE_LIMIT_RETRY_SECS),
            });
        }

        if status.is_server_error() {
            return Err(ProviderError::Unavailable(format!("HTTP {}", status)));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Internal(format!("HTTP {}: {}", status, body)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Internal(format!("Failed to parse response: {}", e)))?;

        extract_rows(body)
    }

    /// Resolve a short code to its ISIN and display name.
    async fn lookup_instrument(&self, code: &str) -> Result<ListedInstrument, ProviderError> {
        for finder in INSTRUMENT_FINDERS {
            let rows = self
                .call_api(
                    finder,
                    &[("mktsel", "ALL".to_string()), ("searchText", code.to_string())],
                )
                .await?;

            let found = rows.iter().find_map(|row| {
                let short_code = text(row, "short_code")?;
                // Some finders prefix the short code with "A"
                if short_code.trim_start_matches('A') != code {
                    return None;
                }
                Some(ListedInstrument {
                    isin: text(row, "full_code")?.to_string(),
                    name: text(row, "codeName")?.to_string(),
                })
            });

            if let Some(instrument) = found {
                return Ok(instrument);
            }
        }

        Err(ProviderError::DataNotAvailable(format!("Unknown instrument: {code}")))
    }

    async fn instrument_rows(
        &self,
        code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Row>, ProviderError> {
        let listed = self.lookup_instrument(code).await?;
        self.call_api(
            BLD_INSTRUMENT_OHLCV,
            &[
                ("isuCd", listed.isin),
                ("strtDd", format_date(from)),
                ("endDd", format_date(to)),
                ("adjStkPrc", "1".to_string()),
            ],
        )
        .await
    }
}

impl Default for KrxAdapter {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MarketDataProvider Implementation
// ============================================================================

#[async_trait]
impl MarketDataProvider for KrxAdapter {
    fn name(&self) -> &'static str {
        "krx"
    }

    async fn list_theme_tickers(&self, date: NaiveDate) -> Result<Vec<String>, ProviderError> {
        let rows = self
            .call_api(
                BLD_INDEX_LIST,
                &[
                    ("idxIndMidclssCd", self.theme_group.clone()),
                    ("trdDd", format_date(date)),
                ],
            )
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let group = text(row, "IND_TP_CD")?;
                let code = text(row, "IDX_IND_CD")?;
                Some(format!("{group}{code}"))
            })
            .collect())
    }

    async fn theme_name(&self, ticker: &str) -> Result<String, ProviderError> {
        split_index_ticker(ticker)?;
        let rows = self
            .call_api(
                BLD_INDEX_FINDER,
                &[("mktsel", "ALL".to_string()), ("searchText", String::new())],
            )
            .await?;

        rows.iter()
            .find(|row| text(row, "full_code") == Some(ticker))
            .and_then(|row| text(row, "codeName"))
            .map(str::to_string)
            .ok_or_else(|| ProviderError::DataNotAvailable(format!("Unknown theme: {ticker}")))
    }

    async fn theme_daily(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBar>, ProviderError> {
        let (group, code) = split_index_ticker(ticker)?;
        let rows = self
            .call_api(
                BLD_INDEX_OHLCV,
                &[
                    ("indIdx", group.to_string()),
                    ("indIdx2", code.to_string()),
                    ("strtDd", format_date(from)),
                    ("endDd", format_date(to)),
                ],
            )
            .await?;

        bars_from_rows(&rows, "OPNPRC_IDX", "HGPRC_IDX", "LWPRC_IDX", "CLSPRC_IDX")
    }

    async fn theme_members(
        &self,
        ticker: &str,
        date: NaiveDate,
    ) -> Result<Vec<String>, ProviderError> {
        let (group, code) = split_index_ticker(ticker)?;
        let rows = self
            .call_api(
                BLD_INDEX_PORTFOLIO,
                &[
                    ("indIdx", group.to_string()),
                    ("indIdx2", code.to_string()),
                    ("trdDd", format_date(date)),
                ],
            )
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| text(row, "ISU_SRT_CD").map(str::to_string))
            .collect())
    }

    async fn instrument_name(&self, code: &str) -> Result<String, ProviderError> {
        Ok(self.lookup_instrument(code).await?.name)
    }

    async fn instrument_daily(
        &self,
        code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBar>, ProviderError> {
        let rows = self.instrument_rows(code, from, to).await?;
        bars_from_rows(&rows, "TDD_OPNPRC", "TDD_HGPRC", "TDD_LWPRC", "TDD_CLSPRC")
    }

    async fn market_cap(
        &self,
        code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<MarketCapRow>, ProviderError> {
        let rows = self.instrument_rows(code, from, to).await?;
        let mut caps = rows
            .iter()
            .map(|row| {
                Ok(MarketCapRow {
                    date: row_date(row)?,
                    market_cap: volume(row, "MKTCAP"),
                })
            })
            .collect::<Result<Vec<_>, ProviderError>>()?;
        caps.sort_by_key(|row| row.date);
        Ok(caps)
    }

    async fn investor_flows(
        &self,
        code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<InvestorFlows, ProviderError> {
        let listed = self.lookup_instrument(code).await?;
        let rows = self
            .call_api(
                BLD_INVESTOR_FLOWS,
                &[
                    ("isuCd", listed.isin),
                    ("strtDd", format_date(from)),
                    ("endDd", format_date(to)),
                    ("inqTpCd", "1".to_string()),
                    ("trdVolVal", "1".to_string()),
                    ("askBid", "3".to_string()),
                ],
            )
            .await?;

        Ok(flows_from_rows(&rows))
    }

    async fn fundamentals(
        &self,
        code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<FundamentalRow>, ProviderError> {
        let listed = self.lookup_instrument(code).await?;
        let rows = self
            .call_api(
                BLD_FUNDAMENTALS,
                &[
                    ("searchType", "2".to_string()),
                    ("mktId", "ALL".to_string()),
                    ("isuCd", listed.isin),
                    ("strtDd", format_date(from)),
                    ("endDd", format_date(to)),
                ],
            )
            .await?;

        let mut fundamentals = rows
            .iter()
            .map(|row| {
                Ok(FundamentalRow {
                    date: row_date(row)?,
                    per: number(row, "PER"),
                    pbr: number(row, "PBR"),
                    dividend_yield: number(row, "DVD_YLD"),
                })
            })
            .collect::<Result<Vec<_>, ProviderError>>()?;
        fundamentals.sort_by_key(|row| row.date);
        Ok(fundamentals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(Some(&json!("1,234,567"))), 1_234_567.0);
        assert_eq!(parse_number(Some(&json!("-2.35"))), -2.35);
        assert_eq!(parse_number(Some(&json!("-"))), 0.0);
        assert_eq!(parse_number(Some(&json!(""))), 0.0);
        assert_eq!(parse_number(Some(&json!(12.5))), 12.5);
        assert_eq!(parse_number(None), 0.0);
    }

    #[test]
    fn test_parse_krx_date() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 5);
        assert_eq!(parse_krx_date("2024/01/05"), expected);
        assert_eq!(parse_krx_date("20240105"), expected);
        assert_eq!(parse_krx_date("2024-01-05"), expected);
        assert_eq!(parse_krx_date("yesterday"), None);
    }

    #[test]
    fn test_split_index_ticker() {
        assert_eq!(split_index_ticker("1152").unwrap(), ("1", "152"));
        assert!(split_index_ticker("1").is_err());
        assert!(split_index_ticker("테마").is_err());
    }

    #[test]
    fn test_extract_rows() {
        let rows = extract_rows(json!({"output": [{"a": "1"}, 3, {"b": "2"}]})).unwrap();
        assert_eq!(rows.len(), 2);

        let rows = extract_rows(json!({"block1": []})).unwrap();
        assert!(rows.is_empty());

        assert!(extract_rows(json!({"error": "LOGOUT"})).is_err());
        assert!(extract_rows(json!([1, 2])).is_err());
    }

    #[test]
    fn test_bars_sorted_ascending() {
        let rows = vec![
            row(json!({"TRD_DD": "2024/01/05", "TDD_OPNPRC": "71,000", "TDD_HGPRC": "72,000",
                       "TDD_LWPRC": "70,500", "TDD_CLSPRC": "71,500", "ACC_TRDVOL": "12,345",
                       "FLUC_RT": "2.15"})),
            row(json!({"TRD_DD": "2024/01/04", "TDD_OPNPRC": "70,000", "TDD_HGPRC": "71,000",
                       "TDD_LWPRC": "69,000", "TDD_CLSPRC": "70,000", "ACC_TRDVOL": "9,000",
                       "FLUC_RT": "-0.5"})),
        ];

        let bars =
            bars_from_rows(&rows, "TDD_OPNPRC", "TDD_HGPRC", "TDD_LWPRC", "TDD_CLSPRC").unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 4).unwrap());
        assert_eq!(bars[1].close, 71_500.0);
        assert_eq!(bars[1].volume, 12_345);
        assert_eq!(bars[1].change_pct, 2.15);
    }

    #[test]
    fn test_bar_with_bad_date_fails() {
        let rows = vec![row(json!({"TRD_DD": "n/a"}))];
        assert!(bars_from_rows(&rows, "a", "b", "c", "d").is_err());
    }

    #[test]
    fn test_flows_from_rows() {
        let rows = vec![
            row(json!({"INVST_TP_NM": "기관합계", "NETBID_TRDVOL": "-1,200"})),
            row(json!({"INVST_TP_NM": "개인", "NETBID_TRDVOL": "3,400"})),
            row(json!({"INVST_TP_NM": "기타법인", "NETBID_TRDVOL": "10"})),
        ];
        let flows = flows_from_rows(&rows);
        assert_eq!(flows.foreign, None);
        assert_eq!(flows.institution, Some(-1_200));
        assert_eq!(flows.individual, Some(3_400));
    }

    #[tokio::test]
    #[ignore = "requires network access to data.krx.co.kr"]
    async fn test_live_instrument_name() {
        let adapter = KrxAdapter::new();
        let name = adapter.instrument_name("005930").await.unwrap();
        assert_eq!(name, "삼성전자");
    }
}
