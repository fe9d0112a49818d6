//! Company details, accounting reports, payroll and other endpoints outside
//! the resource table

use serde_json::{json, Value};

use crate::client::ApiClient;
use crate::error::{Error, Result};
use crate::output::{render_rows, render_value, OutputFormat};

const COMPANY_FIELDS: &[&str] = &[
    "url",
    "name",
    "subdomain",
    "type",
    "currency",
    "mileage_units",
    "company_start_date",
    "trading_start_date",
    "freeagent_start_date",
    "first_accounting_year_end",
    "sales_tax_registration_status",
    "sales_tax_registration_number",
    "business_type",
    "business_category",
];

const TAX_TIMELINE_FIELDS: &[&str] = &["description", "nature", "dated_on", "amount_due", "is_personal"];

const MOSS_RATE_FIELDS: &[&str] = &["percentage", "band"];

const PAYROLL_PERIOD_FIELDS: &[&str] = &["url", "period", "frequency", "dated_on", "status"];

const PAYSLIP_FIELDS: &[&str] = &[
    "user",
    "dated_on",
    "tax_code",
    "basic_pay",
    "tax_deducted",
    "employee_ni",
    "employer_ni",
    "net_pay",
];

/// Payroll periods are numbered from 0 within a tax year
pub const LAST_PAYROLL_PERIOD: u8 = 11;

/// Optional date filters shared by report endpoints
#[derive(Debug, Clone, Default)]
pub struct DateRange {
    pub from_date: Option<String>,
    pub to_date: Option<String>,
}

impl DateRange {
    fn params(&self) -> Vec<(String, String)> {
        non_empty(&[("from_date", &self.from_date), ("to_date", &self.to_date)])
    }
}

/// Keep only the parameters that carry a value.
fn non_empty(pairs: &[(&str, &Option<String>)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .filter_map(|(key, value)| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(|v| (key.to_string(), v.to_string()))
        })
        .collect()
}

/// Remove `key` from a response object; absent keys become `default`.
fn take_key(mut payload: Value, key: &str, default: Value) -> Value {
    payload
        .get_mut(key)
        .map(Value::take)
        .filter(|v| !v.is_null())
        .unwrap_or(default)
}

fn as_rows(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

pub async fn company_info(client: &ApiClient, format: OutputFormat) -> Result<String> {
    let payload = client.get_json("/company", &[]).await?;
    let company = take_key(payload, "company", json!({}));
    render_rows(&[company], COMPANY_FIELDS, format)
}

pub async fn business_categories(client: &ApiClient, format: OutputFormat) -> Result<String> {
    let payload = client.get_json("/company/business_categories", &[]).await?;
    let rows: Vec<Value> = as_rows(take_key(payload, "business_categories", json!([])))
        .into_iter()
        .map(|name| json!({ "business_category": name }))
        .collect();
    render_rows(&rows, &["business_category"], format)
}

pub async fn tax_timeline(client: &ApiClient, format: OutputFormat) -> Result<String> {
    let payload = client.get_json("/company/tax_timeline", &[]).await?;
    let items = as_rows(take_key(payload, "timeline_items", json!([])));
    render_rows(&items, TAX_TIMELINE_FIELDS, format)
}

pub async fn profit_and_loss(
    client: &ApiClient,
    range: &DateRange,
    accounting_period: Option<String>,
    format: OutputFormat,
) -> Result<String> {
    let mut params = range.params();
    params.extend(non_empty(&[("accounting_period", &accounting_period)]));
    let payload = client
        .get_json("/accounting/profit_and_loss/summary", &params)
        .await?;
    render_value(&take_key(payload, "profit_and_loss_summary", json!({})), format)
}

pub async fn balance_sheet(
    client: &ApiClient,
    as_at_date: Option<String>,
    format: OutputFormat,
) -> Result<String> {
    let params = non_empty(&[("as_at_date", &as_at_date)]);
    let payload = client.get_json("/accounting/balance_sheet", &params).await?;
    render_value(&take_key(payload, "balance_sheet", json!({})), format)
}

pub async fn trial_balance(
    client: &ApiClient,
    range: &DateRange,
    format: OutputFormat,
) -> Result<String> {
    let payload = client
        .get_json("/accounting/trial_balance/summary", &range.params())
        .await?;
    render_value(&take_key(payload, "trial_balance", json!({})), format)
}

/// Cashflow summary. Table formats show the headline figures only.
pub async fn cashflow_summary(
    client: &ApiClient,
    range: &DateRange,
    format: OutputFormat,
) -> Result<String> {
    let payload = client.get_json("/cashflow", &range.params()).await?;
    let data = take_key(payload, "cashflow", json!({}));

    match format {
        OutputFormat::Json | OutputFormat::Yaml => render_value(&data, format),
        OutputFormat::Plain | OutputFormat::Csv => {
            render_rows(&cashflow_rows(&data), &["label", "value"], format)
        }
    }
}

fn cashflow_rows(data: &Value) -> Vec<Value> {
    let field = |v: Option<&Value>| v.cloned().unwrap_or_else(|| json!(""));
    vec![
        json!({"label": "balance", "value": field(data.get("balance"))}),
        json!({"label": "incoming_total", "value": field(data.pointer("/incoming/total"))}),
        json!({"label": "outgoing_total", "value": field(data.pointer("/outgoing/total"))}),
        json!({"label": "from", "value": field(data.get("from"))}),
        json!({"label": "to", "value": field(data.get("to"))}),
    ]
}

/// EC MOSS sales tax rates for a country on a date.
pub async fn moss_rates(
    client: &ApiClient,
    country: &str,
    date: &str,
    format: OutputFormat,
) -> Result<String> {
    let params = vec![
        ("country".to_string(), country.to_string()),
        ("date".to_string(), date.to_string()),
    ];
    let payload = client.get_json("/ec_moss/sales_tax_rates", &params).await?;
    let rates = take_key(payload, "sales_tax_rates", json!([]));

    match format {
        OutputFormat::Json | OutputFormat::Yaml => render_value(&rates, format),
        OutputFormat::Plain | OutputFormat::Csv => {
            render_rows(&as_rows(rates), MOSS_RATE_FIELDS, format)
        }
    }
}

/// Payroll periods of a tax year.
pub async fn payroll_periods(client: &ApiClient, year: u16, format: OutputFormat) -> Result<String> {
    let payload = client.get_json(&format!("/payroll/{}", year), &[]).await?;
    let periods = as_rows(take_key(payload, "periods", json!([])));
    render_rows(&periods, PAYROLL_PERIOD_FIELDS, format)
}

/// Payslips of one payroll period.
pub async fn payslips(
    client: &ApiClient,
    year: u16,
    period: u8,
    format: OutputFormat,
) -> Result<String> {
    if period > LAST_PAYROLL_PERIOD {
        return Err(Error::InvalidArgument(format!(
            "payroll period must be between 0 and {}",
            LAST_PAYROLL_PERIOD
        )));
    }
    let payload = client
        .get_json(&format!("/payroll/{}/{}", year, period), &[])
        .await?;
    let period = take_key(payload, "period", json!({}));
    let slips = as_rows(take_key(period, "payslips", json!([])));
    render_rows(&slips, PAYSLIP_FIELDS, format)
}
