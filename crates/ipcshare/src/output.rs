use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use ipcshare_codec::Value;
use serde::Serialize;
use serde_json::json;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
    pub elapsed_ms: u128,
}

#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub transport: &'static str,
    pub checks: Vec<CheckResult>,
    pub overall: CheckStatus,
}

pub fn print_report(report: &CheckReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHECK", "STATUS", "TIME", "DETAIL"]);
            for check in &report.checks {
                table.add_row(vec![
                    check.name.to_string(),
                    status_text(check.status).to_string(),
                    format!("{}ms", check.elapsed_ms),
                    check.detail.clone(),
                ]);
            }
            println!("{table}");
            println!("transport: {}  overall: {}", report.transport, status_text(report.overall));
        }
        OutputFormat::Pretty => {
            println!("ipcshare selftest ({})\n", report.transport);
            for check in &report.checks {
                println!(
                    "  [{:>4}] {:<12} {:>6}ms  {}",
                    status_text(check.status),
                    check.name,
                    check.elapsed_ms,
                    check.detail
                );
            }
            match report.overall {
                CheckStatus::Pass => println!("\n  Result: all checks passed"),
                CheckStatus::Fail => println!("\n  Result: one or more checks failed"),
            }
        }
        OutputFormat::Raw => {
            println!("{}", status_text(report.overall).to_lowercase());
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
    }
}

pub fn print_value(method: &str, value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = json!({
                "method": method,
                "type": value.type_ref().to_string(),
                "value": value_json(value),
            });
            println!("{out}");
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METHOD", "TYPE", "VALUE"])
                .add_row(vec![
                    method.to_string(),
                    value.type_ref().to_string(),
                    value_text(value),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("{method} -> {} ({})", value_text(value), value.type_ref());
        }
        OutputFormat::Raw => println!("{}", value_text(value)),
    }
}

/// Strings print bare; everything else prints as JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => value_json(other).to_string(),
    }
}

pub fn value_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(v) => json!(v),
        Value::U8(v) => json!(v),
        Value::I8(v) => json!(v),
        Value::I16(v) => json!(v),
        Value::U16(v) => json!(v),
        Value::I32(v) => json!(v),
        Value::U32(v) => json!(v),
        Value::I64(v) => json!(v),
        Value::U64(v) => json!(v),
        Value::F32(v) => json!(v),
        Value::F64(v) => json!(v),
        Value::Char(v) => json!(v.to_string()),
        Value::Decimal(v) => json!(v.to_string()),
        Value::String(v) => json!(v),
        Value::Bytes(v) => json!(v.as_ref()),
        Value::DateTime(v) => json!({ "kind": format!("{:?}", v.kind), "ticks": v.ticks }),
        Value::Guid(v) => json!(v.to_string()),
        Value::TimeSpan(v) => json!({ "ticks": v.ticks }),
        Value::Type(ty) => json!(ty.to_string()),
        Value::Types(types) => json!(types.iter().map(|t| t.to_string()).collect::<Vec<_>>()),
        Value::Enum { ty, value } => json!({ "enum": ty.to_string(), "value": value_json(value) }),
        Value::Array(array) => json!(array.items.iter().map(value_json).collect::<Vec<_>>()),
        Value::Shared(_) => json!("<shared>"),
        Value::Record(record) => {
            let fields: serde_json::Map<String, serde_json::Value> = record
                .fields
                .iter()
                .map(|field| (field.name.clone(), value_json(&field.value)))
                .collect();
            json!({ "type": record.ty.to_string(), "fields": fields })
        }
    }
}
