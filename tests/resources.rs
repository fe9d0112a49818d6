//! Generic resource handlers and report endpoints

mod common;

use anyhow::Result;
use common::*;
use serde_json::json;
use wiremock::matchers::{body_json, body_string_contains, header_regex, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use freeagent_cli::output::OutputFormat;
use freeagent_cli::paginate::PageCursor;
use freeagent_cli::reports::{self, DateRange};
use freeagent_cli::resources::{self, ListOptions, Mutation, Upload};

#[tokio::test]
async fn test_list_renders_projected_csv() -> Result<()> {
    let harness = TestHarness::new().await?;
    harness.write_tokens("tok", "r1", VALID_UNTIL)?;

    Mock::given(method("GET"))
        .and(path("/bank_accounts"))
        .and(query_param("per_page", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bank_accounts": [{
                "url": "https://api/bank_accounts/1",
                "name": "Current",
                "type": "StandardBankAccount",
                "currency": "GBP",
                "current_balance": "10.5",
                "secret": "hidden"
            }]
        })))
        .expect(1)
        .mount(&harness.server)
        .await;

    let client = harness.client()?;
    let resource = resources::find("bank-accounts").expect("registered");
    let out = resources::list(
        &client,
        resource,
        Vec::new(),
        ListOptions {
            cursor: PageCursor::default(),
            max_pages: None,
            format: OutputFormat::Csv,
        },
    )
    .await?;

    assert_eq!(
        out,
        "url,name,type,currency,current_balance\r\n\
         https://api/bank_accounts/1,Current,StandardBankAccount,GBP,10.5\r\n"
    );
    Ok(())
}

#[tokio::test]
async fn test_create_and_delete() -> Result<()> {
    let harness = TestHarness::new().await?;
    harness.write_tokens("tok", "r1", VALID_UNTIL)?;

    let body = json!({"invoice": {"contact": "https://api/contacts/1"}});
    Mock::given(method("POST"))
        .and(path("/invoices"))
        .and(body_json(&body))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"invoice": {"url": "i1"}})))
        .expect(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/invoices/42"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&harness.server)
        .await;

    let client = harness.client()?;
    let invoices = resources::find("invoices").expect("registered");

    let created = Mutation::Create { body: body.clone() }
        .apply(&client, invoices)
        .await?;
    assert!(created.contains("\"url\": \"i1\""));

    let deleted = Mutation::Delete { id: "42".into() }
        .apply(&client, invoices)
        .await?;
    assert_eq!(deleted, "Deleted invoice 42");
    Ok(())
}

#[tokio::test]
async fn test_dry_run_sends_nothing() -> Result<()> {
    let harness = TestHarness::new().await?;
    harness.write_tokens("tok", "r1", VALID_UNTIL)?;

    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&harness.server)
        .await;

    let accounts = resources::find("bank-transaction-explanations").expect("registered");
    let out = Mutation::Delete { id: "7".into() }.preview(accounts)?;
    assert_eq!(out, "[dry-run] Would delete bank transaction explanation 7");

    let preview = Mutation::Update {
        id: "7".into(),
        body: json!({"a": 1}),
    }
    .preview(accounts)?;
    assert_eq!(preview, "{\n  \"a\": 1\n}");
    Ok(())
}

#[tokio::test]
async fn test_profit_and_loss_params() -> Result<()> {
    let harness = TestHarness::new().await?;
    harness.write_tokens("tok", "r1", VALID_UNTIL)?;

    Mock::given(method("GET"))
        .and(path("/accounting/profit_and_loss/summary"))
        .and(query_param("from_date", "2024-04-01"))
        .and(query_param("accounting_period", "2024/25"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "profit_and_loss_summary": {"income": "100.0"}
        })))
        .expect(1)
        .mount(&harness.server)
        .await;

    let client = harness.client()?;
    let range = DateRange {
        from_date: Some("2024-04-01".to_string()),
        to_date: None,
    };
    let out = reports::profit_and_loss(
        &client,
        &range,
        Some("2024/25".to_string()),
        OutputFormat::Json,
    )
    .await?;
    assert_eq!(serde_json::from_str::<serde_json::Value>(&out)?, json!({"income": "100.0"}));
    Ok(())
}

#[tokio::test]
async fn test_payroll_periods_and_payslips() -> Result<()> {
    let harness = TestHarness::new().await?;
    harness.write_tokens("tok", "r1", VALID_UNTIL)?;

    Mock::given(method("GET"))
        .and(path("/payroll/2024"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "periods": [{"url": "p0", "period": 0, "frequency": "Monthly", "dated_on": "2024-04-30", "status": "filed"}]
        })))
        .expect(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/payroll/2024/3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "period": {
                "period": 3,
                "payslips": [{"user": "u1", "dated_on": "2024-07-31", "tax_code": "1257L", "net_pay": "1500.0"}]
            }
        })))
        .expect(1)
        .mount(&harness.server)
        .await;

    let client = harness.client()?;
    let periods = reports::payroll_periods(&client, 2024, OutputFormat::Csv).await?;
    assert_eq!(
        periods,
        "url,period,frequency,dated_on,status\r\np0,0,Monthly,2024-04-30,filed\r\n"
    );

    let slips = reports::payslips(&client, 2024, 3, OutputFormat::Json).await?;
    let slips: serde_json::Value = serde_json::from_str(&slips)?;
    assert_eq!(slips[0]["tax_code"], "1257L");
    assert_eq!(slips[0]["net_pay"], "1500.0");

    assert!(reports::payslips(&client, 2024, 12, OutputFormat::Json).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_users_me_and_permissions() -> Result<()> {
    let harness = TestHarness::new().await?;
    harness.write_tokens("tok", "r1", VALID_UNTIL)?;

    Mock::given(method("GET"))
        .and(path("/users/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user": {"url": "u-me", "first_name": "Ada", "email": "ada@example.com", "role": "Director"}
        })))
        .expect(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user": {"url": "u5", "permission_level": 6}
        })))
        .expect(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/users/5"))
        .and(body_json(json!({"user": {"permission_level": 2}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user": {"permission_level": 2}})))
        .expect(1)
        .mount(&harness.server)
        .await;

    let client = harness.client()?;
    let users = resources::find("users").expect("registered");

    let me = resources::me(&client, users, OutputFormat::Json).await?;
    let me: serde_json::Value = serde_json::from_str(&me)?;
    assert_eq!(me[0]["email"], "ada@example.com");

    let level = resources::get_permission(&client, users, "5").await?;
    assert_eq!(level, "{\n  \"permission_level\": 6\n}");

    let updated = Mutation::SetPermission {
        id: "5".into(),
        level: 2,
    }
    .apply(&client, users)
    .await?;
    assert!(updated.contains("\"permission_level\": 2"));
    Ok(())
}

#[tokio::test]
async fn test_set_hidden_sends_flag() -> Result<()> {
    let harness = TestHarness::new().await?;
    harness.write_tokens("tok", "r1", VALID_UNTIL)?;

    Mock::given(method("PUT"))
        .and(path("/users/9"))
        .and(body_json(json!({"user": {"hidden": true}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user": {"hidden": true}})))
        .expect(1)
        .mount(&harness.server)
        .await;

    let client = harness.client()?;
    let users = resources::find("users").expect("registered");
    let out = Mutation::SetHidden {
        id: "9".into(),
        hidden: true,
    }
    .apply(&client, users)
    .await?;
    assert!(out.contains("\"hidden\": true"));
    Ok(())
}

#[tokio::test]
async fn test_final_accounts_mark_filed_and_unfiled() -> Result<()> {
    let harness = TestHarness::new().await?;
    harness.write_tokens("tok", "r1", VALID_UNTIL)?;

    Mock::given(method("PUT"))
        .and(path("/final_accounts_reports/2024-03-31/mark_as_filed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "final_accounts_report": {"filing_status": "marked_as_filed"}
        })))
        .expect(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/final_accounts_reports/2024-03-31/mark_as_unfiled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "final_accounts_report": {"filing_status": "unfiled"}
        })))
        .expect(1)
        .mount(&harness.server)
        .await;

    let client = harness.client()?;
    let reports = resources::find("final-accounts").expect("registered");

    let filed = resources::mark_filed(&client, reports, "2024-03-31", true).await?;
    assert!(filed.contains("marked_as_filed"));
    let unfiled = resources::mark_filed(&client, reports, "2024-03-31", false).await?;
    assert!(unfiled.contains("\"filing_status\": \"unfiled\""));
    Ok(())
}

#[tokio::test]
async fn test_approve_puts_each_explanation() -> Result<()> {
    let harness = TestHarness::new().await?;
    harness.write_tokens("tok", "r1", VALID_UNTIL)?;

    let body = json!({"bank_transaction_explanation": {"marked_for_review": false}});
    for id in ["11", "12"] {
        Mock::given(method("PUT"))
            .and(path(format!("/bank_transaction_explanations/{}", id)))
            .and(body_json(&body))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "bank_transaction_explanation": {"url": id, "marked_for_review": false}
            })))
            .expect(1)
            .mount(&harness.server)
            .await;
    }

    let client = harness.client()?;
    let explanations = resources::find("bank-transaction-explanations").expect("registered");
    let out = Mutation::Approve {
        ids: vec!["11".into(), "12".into()],
    }
    .apply(&client, explanations)
    .await?;
    assert!(out.contains("\"url\": \"11\""));
    assert!(out.contains("\"url\": \"12\""));
    Ok(())
}

#[tokio::test]
async fn test_journal_set_opening_balances() -> Result<()> {
    let harness = TestHarness::new().await?;
    harness.write_tokens("tok", "r1", VALID_UNTIL)?;

    Mock::given(method("GET"))
        .and(path("/journal_sets/opening_balances"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "journal_set": {
                "description": "Opening balances",
                "journal_entries": [{"category": "750", "debit_value": "100.0"}]
            }
        })))
        .expect(1)
        .mount(&harness.server)
        .await;

    let client = harness.client()?;
    let journal_sets = resources::find("journal-sets").expect("registered");
    let out = resources::opening_balances(&client, journal_sets, OutputFormat::Json).await?;
    let value: serde_json::Value = serde_json::from_str(&out)?;
    assert_eq!(value["description"], "Opening balances");
    assert_eq!(value["journal_entries"][0]["debit_value"], "100.0");
    Ok(())
}

#[tokio::test]
async fn test_attachment_upload_is_multipart() -> Result<()> {
    let harness = TestHarness::new().await?;
    harness.write_tokens("tok", "r1", VALID_UNTIL)?;

    let file = harness.dir.path().join("receipt.png");
    std::fs::write(&file, b"PNG-bytes")?;

    Mock::given(method("POST"))
        .and(path("/attachments"))
        .and(header_regex("content-type", "^multipart/form-data; boundary="))
        .and(body_string_contains("name=\"description\""))
        .and(body_string_contains("name=\"attachable_type\""))
        .and(body_string_contains("Content-Type: image/png"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "attachment": {"url": "a1", "file_name": "receipt.png"}
        })))
        .expect(1)
        .mount(&harness.server)
        .await;

    let client = harness.client()?;
    let attachments = resources::find("attachments").expect("registered");
    let upload = Upload {
        file,
        description: Some("Taxi".into()),
        attachable_type: Some("Expense".into()),
        ..Default::default()
    };
    let out = Mutation::Upload(upload).apply(&client, attachments).await?;
    assert!(out.contains("\"url\": \"a1\""));

    let received = harness.server.received_requests().await.unwrap_or_default();
    let body = String::from_utf8_lossy(&received[0].body);
    assert!(body.contains("filename=\"receipt.png\""));
    assert!(body.contains("PNG-bytes"));
    assert!(!body.contains("name=\"attachable_id\""));
    Ok(())
}

#[tokio::test]
async fn test_upload_missing_file_sends_nothing() -> Result<()> {
    let harness = TestHarness::new().await?;
    harness.write_tokens("tok", "r1", VALID_UNTIL)?;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&harness.server)
        .await;

    let client = harness.client()?;
    let attachments = resources::find("attachments").expect("registered");
    let upload = Upload {
        file: harness.dir.path().join("absent.pdf"),
        ..Default::default()
    };
    let err = tokio_test::assert_err!(Mutation::Upload(upload).apply(&client, attachments).await);
    assert_eq!(err.exit_code(), 64);
    assert!(err.to_string().contains("File not found"));
    Ok(())
}
