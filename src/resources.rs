//! Generic resource table and handlers
//!
//! Each FreeAgent collection is described once by a [`Resource`]. The
//! handlers below are generic over the descriptor, so adding an endpoint is
//! a table entry rather than new code.
//!
//! Writes are described by a [`Mutation`]. A dry run renders
//! [`Mutation::preview`] and never needs credentials.

use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::client::{ApiClient, ApiRequest, FilePart};
use crate::error::{Error, Result};
use crate::output::{render_rows, render_value, OutputFormat};
use crate::paginate::{PageCursor, Paginator};

/// Operations a resource supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    List,
    Get,
    Create,
    Update,
    Delete,
    Upload,
    Approve,
    Me,
    GetPermission,
    SetPermission,
    SetHidden,
    MarkFiled,
    MarkUnfiled,
    OpeningBalances,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Action::List => "list",
            Action::Get => "get",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Upload => "upload",
            Action::Approve => "approve",
            Action::Me => "me",
            Action::GetPermission => "get-permission",
            Action::SetPermission => "set-permission",
            Action::SetHidden => "set-hidden",
            Action::MarkFiled => "mark-filed",
            Action::MarkUnfiled => "mark-unfiled",
            Action::OpeningBalances => "opening-balances",
        }
    }
}

const READ_ONLY: &[Action] = &[Action::List, Action::Get];
const ALL: &[Action] = &[
    Action::List,
    Action::Get,
    Action::Create,
    Action::Update,
    Action::Delete,
];
const NO_CREATE: &[Action] = &[Action::List, Action::Get, Action::Update, Action::Delete];
const LIST_GET_DELETE: &[Action] = &[Action::List, Action::Get, Action::Delete];
const ATTACHMENT_ACTIONS: &[Action] = &[Action::List, Action::Get, Action::Delete, Action::Upload];
const EXPLANATION_ACTIONS: &[Action] = &[
    Action::List,
    Action::Get,
    Action::Create,
    Action::Update,
    Action::Delete,
    Action::Approve,
];
const FINAL_ACCOUNTS_ACTIONS: &[Action] = &[
    Action::List,
    Action::Get,
    Action::MarkFiled,
    Action::MarkUnfiled,
];
const JOURNAL_SET_ACTIONS: &[Action] = &[
    Action::List,
    Action::Get,
    Action::Create,
    Action::Update,
    Action::Delete,
    Action::OpeningBalances,
];
const USER_ACTIONS: &[Action] = &[
    Action::List,
    Action::Get,
    Action::Update,
    Action::Delete,
    Action::Me,
    Action::GetPermission,
    Action::SetPermission,
    Action::SetHidden,
];

/// Highest FreeAgent user permission level
pub const MAX_PERMISSION_LEVEL: u8 = 8;

/// Static description of one API collection
#[derive(Debug)]
pub struct Resource {
    /// Command-line name, e.g. `bank-accounts`
    pub name: &'static str,
    /// Collection path relative to the API base URL
    pub path: &'static str,
    /// JSON array key in list responses
    pub collection: &'static str,
    /// JSON object key in single-item responses
    pub singular: &'static str,
    /// Fields shown for list and get output
    pub fields: &'static [&'static str],
    /// Print the whole object on `get` instead of the projected fields
    pub raw_detail: bool,
    /// Whether `list` walks pages
    pub paginated: bool,
    pub actions: &'static [Action],
}

impl Resource {
    pub fn supports(&self, action: Action) -> bool {
        self.actions.contains(&action)
    }

    /// Path of one item; absolute URLs are used as-is.
    pub fn item_path(&self, id: &str) -> String {
        if id.starts_with("http://") || id.starts_with("https://") {
            id.to_string()
        } else {
            format!("{}/{}", self.path, id)
        }
    }

    /// Label used in dry-run and delete messages, e.g. `bank account`
    pub fn label(&self) -> String {
        self.singular.replace('_', " ")
    }
}

pub static RESOURCES: &[Resource] = &[
    Resource {
        name: "attachments",
        path: "/attachments",
        collection: "attachments",
        singular: "attachment",
        fields: &["url", "file_name", "content_type", "file_size", "description", "expires_at", "content_src"],
        raw_detail: false,
        paginated: true,
        actions: ATTACHMENT_ACTIONS,
    },
    Resource {
        name: "bank-accounts",
        path: "/bank_accounts",
        collection: "bank_accounts",
        singular: "bank_account",
        fields: &["url", "name", "type", "currency", "current_balance"],
        raw_detail: false,
        paginated: true,
        actions: READ_ONLY,
    },
    Resource {
        name: "bank-feeds",
        path: "/bank_feeds",
        collection: "bank_feeds",
        singular: "bank_feed",
        fields: &["url", "bank_account", "state", "feed_type", "bank_service_name", "sca_expires_at", "created_at", "updated_at"],
        raw_detail: false,
        paginated: true,
        actions: READ_ONLY,
    },
    Resource {
        name: "bank-transactions",
        path: "/bank_transactions",
        collection: "bank_transactions",
        singular: "bank_transaction",
        fields: &["url", "dated_on", "unexplained_amount", "description", "is_bank_account_transfer"],
        raw_detail: true,
        paginated: true,
        actions: LIST_GET_DELETE,
    },
    Resource {
        name: "bank-transaction-explanations",
        path: "/bank_transaction_explanations",
        collection: "bank_transaction_explanations",
        singular: "bank_transaction_explanation",
        fields: &["url", "bank_account", "bank_transaction", "category", "type", "dated_on", "description", "gross_value", "project", "marked_for_review", "is_deletable", "updated_at"],
        raw_detail: false,
        paginated: true,
        actions: EXPLANATION_ACTIONS,
    },
    Resource {
        name: "bills",
        path: "/bills",
        collection: "bills",
        singular: "bill",
        fields: &["url", "reference", "dated_on", "due_on", "total_value", "status"],
        raw_detail: true,
        paginated: true,
        actions: ALL,
    },
    Resource {
        name: "capital-assets",
        path: "/capital_assets",
        collection: "capital_assets",
        singular: "capital_asset",
        fields: &["url", "description", "asset_type", "purchased_on", "disposed_on", "asset_life_years", "depreciation_profile", "created_at", "updated_at"],
        raw_detail: false,
        paginated: true,
        actions: ALL,
    },
    Resource {
        name: "capital-asset-types",
        path: "/capital_asset_types",
        collection: "capital_asset_types",
        singular: "capital_asset_type",
        fields: &["url", "name", "system_default", "created_at", "updated_at"],
        raw_detail: false,
        paginated: true,
        actions: ALL,
    },
    Resource {
        name: "contacts",
        path: "/contacts",
        collection: "contacts",
        singular: "contact",
        fields: &["url", "first_name", "last_name", "organisation_name", "email"],
        raw_detail: true,
        paginated: true,
        actions: NO_CREATE,
    },
    Resource {
        name: "expenses",
        path: "/expenses",
        collection: "expenses",
        singular: "expense",
        fields: &["url", "dated_on", "category", "description", "gross_value", "currency"],
        raw_detail: false,
        paginated: true,
        actions: READ_ONLY,
    },
    Resource {
        name: "final-accounts",
        path: "/final_accounts_reports",
        collection: "final_accounts_reports",
        singular: "final_accounts_report",
        fields: &["url", "period_ends_on", "period_starts_on", "filing_due_on", "filing_status", "filed_at", "filed_reference"],
        raw_detail: false,
        paginated: true,
        actions: FINAL_ACCOUNTS_ACTIONS,
    },
    Resource {
        name: "invoices",
        path: "/invoices",
        collection: "invoices",
        singular: "invoice",
        fields: &["url", "reference", "contact", "status", "dated_on", "due_on", "total_value"],
        raw_detail: true,
        paginated: true,
        actions: ALL,
    },
    Resource {
        name: "journal-sets",
        path: "/journal_sets",
        collection: "journal_sets",
        singular: "journal_set",
        fields: &["url", "dated_on", "description", "updated_at", "tag", "journal_entries", "bank_accounts", "stock_items"],
        raw_detail: true,
        paginated: true,
        actions: JOURNAL_SET_ACTIONS,
    },
    Resource {
        name: "notes",
        path: "/notes",
        collection: "notes",
        singular: "note",
        fields: &["url", "note", "parent_url", "author", "created_at", "updated_at"],
        raw_detail: false,
        paginated: false,
        actions: ALL,
    },
    Resource {
        name: "projects",
        path: "/projects",
        collection: "projects",
        singular: "project",
        fields: &["url", "name", "status", "contact", "currency", "budget_units", "budget", "normal_billing_rate", "started_on", "ended_on"],
        raw_detail: false,
        paginated: true,
        actions: READ_ONLY,
    },
    Resource {
        name: "timeslips",
        path: "/timeslips",
        collection: "timeslips",
        singular: "timeslip",
        fields: &["url", "user", "project", "task", "dated_on", "hours", "billable", "billed_on", "comment"],
        raw_detail: false,
        paginated: true,
        actions: LIST_GET_DELETE,
    },
    Resource {
        name: "transactions",
        path: "/accounting/transactions",
        collection: "transactions",
        singular: "transaction",
        fields: &["url", "dated_on", "description", "category", "category_name", "nominal_code", "debit_value"],
        raw_detail: false,
        paginated: true,
        actions: READ_ONLY,
    },
    Resource {
        name: "users",
        path: "/users",
        collection: "users",
        singular: "user",
        fields: &["url", "first_name", "last_name", "email", "role", "permission_level", "opening_mileage", "created_at", "updated_at"],
        raw_detail: false,
        paginated: true,
        actions: USER_ACTIONS,
    },
];

/// Look up a resource by its command-line name.
pub fn find(name: &str) -> Option<&'static Resource> {
    RESOURCES.iter().find(|r| r.name == name)
}

/// Options shared by list handlers
#[derive(Debug, Clone, Copy)]
pub struct ListOptions {
    pub cursor: PageCursor,
    pub max_pages: Option<u32>,
    pub format: OutputFormat,
}

/// Parse a JSON request body given on the command line.
pub fn parse_json_body(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| Error::InvalidArgument(format!("Invalid JSON body: {}", e)))
}

fn ensure_supported(resource: &Resource, action: Action) -> Result<()> {
    if resource.supports(action) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "{} does not support {}",
            resource.name,
            action.name()
        )))
    }
}

/// List a collection and render the projected rows.
pub async fn list(
    client: &ApiClient,
    resource: &Resource,
    params: Vec<(String, String)>,
    options: ListOptions,
) -> Result<String> {
    ensure_supported(resource, Action::List)?;

    let rows = if resource.paginated {
        Paginator::new(client.clone(), resource.path, resource.collection)
            .params(params)
            .cursor(options.cursor)
            .max_pages(options.max_pages)
            .collect_all()
            .await?
    } else {
        let mut payload = client.get_json(resource.path, &params).await?;
        match payload.get_mut(resource.collection).map(Value::take) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        }
    };
    debug!("{} list returned {} rows", resource.name, rows.len());

    render_rows(&rows, resource.fields, options.format)
}

/// Fetch the item at `path` and unwrap its singular key.
async fn fetch_item(client: &ApiClient, resource: &Resource, path: &str) -> Result<Value> {
    let mut payload = client.get_json(path, &[]).await?;
    Ok(payload
        .get_mut(resource.singular)
        .map(Value::take)
        .unwrap_or_else(|| Value::Object(Map::new())))
}

fn render_item(resource: &Resource, item: Value, format: OutputFormat) -> Result<String> {
    if resource.raw_detail {
        render_value(&item, format)
    } else {
        render_rows(&[item], resource.fields, format)
    }
}

/// Fetch one item.
pub async fn get(
    client: &ApiClient,
    resource: &Resource,
    id: &str,
    format: OutputFormat,
) -> Result<String> {
    ensure_supported(resource, Action::Get)?;
    let item = fetch_item(client, resource, &resource.item_path(id)).await?;
    render_item(resource, item, format)
}

/// The authenticated user.
pub async fn me(client: &ApiClient, resource: &Resource, format: OutputFormat) -> Result<String> {
    ensure_supported(resource, Action::Me)?;
    let item = fetch_item(client, resource, &resource.item_path("me")).await?;
    render_rows(&[item], resource.fields, format)
}

/// A user's permission level as a JSON object.
pub async fn get_permission(client: &ApiClient, resource: &Resource, id: &str) -> Result<String> {
    ensure_supported(resource, Action::GetPermission)?;
    let item = fetch_item(client, resource, &resource.item_path(id)).await?;
    let level = item.get("permission_level").cloned().unwrap_or(Value::Null);
    render_value(&json!({ "permission_level": level }), OutputFormat::Json)
}

/// Opening balances journal set.
pub async fn opening_balances(
    client: &ApiClient,
    resource: &Resource,
    format: OutputFormat,
) -> Result<String> {
    ensure_supported(resource, Action::OpeningBalances)?;
    let path = format!("{}/opening_balances", resource.path);
    let item = fetch_item(client, resource, &path).await?;
    render_item(resource, item, format)
}

/// Mark the report for the period ending on `period_ends_on` as filed or unfiled.
pub async fn mark_filed(
    client: &ApiClient,
    resource: &Resource,
    period_ends_on: &str,
    filed: bool,
) -> Result<String> {
    let (action, suffix) = if filed {
        (Action::MarkFiled, "mark_as_filed")
    } else {
        (Action::MarkUnfiled, "mark_as_unfiled")
    };
    ensure_supported(resource, action)?;

    let path = format!("{}/{}", resource.item_path(period_ends_on), suffix);
    let response = client.execute_json(&ApiRequest::put(path)).await?;
    render_value(&response, OutputFormat::Json)
}

/// Wrap `inner` under the resource's singular key.
fn keyed(resource: &Resource, inner: Value) -> Value {
    let mut body = Map::new();
    body.insert(resource.singular.to_string(), inner);
    Value::Object(body)
}

fn approval_body(resource: &Resource) -> Value {
    keyed(resource, json!({ "marked_for_review": false }))
}

fn permission_body(resource: &Resource, level: u8) -> Value {
    keyed(resource, json!({ "permission_level": level }))
}

fn hidden_body(resource: &Resource, hidden: bool) -> Value {
    keyed(resource, json!({ "hidden": hidden }))
}

/// A file to attach, with the metadata sent alongside it
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub file: PathBuf,
    pub description: Option<String>,
    pub attachable_type: Option<String>,
    pub attachable_id: Option<String>,
    /// Overrides the type guessed from the file extension
    pub content_type: Option<String>,
    /// Overrides the file's own name
    pub file_name: Option<String>,
}

impl Upload {
    fn check_exists(&self) -> Result<()> {
        if self.file.is_file() {
            Ok(())
        } else {
            Err(Error::InvalidArgument(format!(
                "File not found: {}",
                self.file.display()
            )))
        }
    }

    fn content_type(&self) -> String {
        self.content_type
            .clone()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| guess_content_type(&self.file).to_string())
    }

    fn file_name(&self) -> String {
        self.file_name
            .clone()
            .filter(|v| !v.is_empty())
            .or_else(|| {
                self.file
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "upload".to_string())
    }

    /// Text fields sent with the file; empty values are dropped.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        [
            ("description", self.description.clone()),
            ("content_type", Some(self.content_type())),
            ("file_name", Some(self.file_name())),
            ("attachable_type", self.attachable_type.clone()),
            ("attachable_id", self.attachable_id.clone()),
        ]
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .filter(|v| !v.is_empty())
                .map(|v| (key.to_string(), v))
        })
        .collect()
    }

    fn preview(&self) -> Value {
        let form: Map<String, Value> = self
            .form_fields()
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect();
        json!({ "file": self.file.display().to_string(), "form": form })
    }

    async fn file_part(&self) -> Result<FilePart> {
        let bytes = tokio::fs::read(&self.file).await?;
        debug!("uploading {:?} ({} bytes)", self.file, bytes.len());
        Ok(FilePart {
            field: "file".to_string(),
            file_name: self.file_name(),
            content_type: self.content_type(),
            bytes,
        })
    }
}

/// Content type from the file extension, `application/octet-stream` when unknown.
fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("csv") => "text/csv",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        _ => "application/octet-stream",
    }
}

/// A write against a resource.
#[derive(Debug, Clone)]
pub enum Mutation {
    Create { body: Value },
    Update { id: String, body: Value },
    Delete { id: String },
    SetPermission { id: String, level: u8 },
    SetHidden { id: String, hidden: bool },
    /// Clear `marked_for_review` on each explanation
    Approve { ids: Vec<String> },
    Upload(Upload),
}

impl Mutation {
    pub fn action(&self) -> Action {
        match self {
            Mutation::Create { .. } => Action::Create,
            Mutation::Update { .. } => Action::Update,
            Mutation::Delete { .. } => Action::Delete,
            Mutation::SetPermission { .. } => Action::SetPermission,
            Mutation::SetHidden { .. } => Action::SetHidden,
            Mutation::Approve { .. } => Action::Approve,
            Mutation::Upload(_) => Action::Upload,
        }
    }

    fn check(&self, resource: &Resource) -> Result<()> {
        ensure_supported(resource, self.action())?;
        match self {
            Mutation::SetPermission { level, .. } if *level > MAX_PERMISSION_LEVEL => {
                Err(Error::InvalidArgument(format!(
                    "permission level must be between 0 and {}",
                    MAX_PERMISSION_LEVEL
                )))
            }
            Mutation::Approve { ids } if ids.is_empty() => Err(Error::InvalidArgument(
                "approve needs at least one id".to_string(),
            )),
            Mutation::Upload(upload) => upload.check_exists(),
            _ => Ok(()),
        }
    }

    /// What a dry run prints. Needs no credentials and sends nothing.
    pub fn preview(&self, resource: &Resource) -> Result<String> {
        self.check(resource)?;
        let body = match self {
            Mutation::Create { body } | Mutation::Update { body, .. } => body.clone(),
            Mutation::SetPermission { level, .. } => permission_body(resource, *level),
            Mutation::SetHidden { hidden, .. } => hidden_body(resource, *hidden),
            Mutation::Upload(upload) => upload.preview(),
            Mutation::Delete { id } => {
                return Ok(format!(
                    "[dry-run] Would delete {} {}",
                    resource.label(),
                    id
                ));
            }
            Mutation::Approve { ids } => {
                let previews = ids
                    .iter()
                    .map(|id| {
                        let mut entry = Map::new();
                        entry.insert("id".to_string(), Value::String(id.clone()));
                        entry.insert(
                            resource.singular.to_string(),
                            json!({ "marked_for_review": false }),
                        );
                        render_value(&Value::Object(entry), OutputFormat::Json)
                    })
                    .collect::<Result<Vec<_>>>()?;
                return Ok(previews.join("\n"));
            }
        };
        render_value(&body, OutputFormat::Json)
    }

    /// Send the mutation and render the response.
    pub async fn apply(&self, client: &ApiClient, resource: &Resource) -> Result<String> {
        self.check(resource)?;
        let request = match self {
            Mutation::Create { body } => ApiRequest::post(resource.path).json(body.clone()),
            Mutation::Update { id, body } => {
                ApiRequest::put(resource.item_path(id)).json(body.clone())
            }
            Mutation::SetPermission { id, level } => {
                ApiRequest::put(resource.item_path(id)).json(permission_body(resource, *level))
            }
            Mutation::SetHidden { id, hidden } => {
                ApiRequest::put(resource.item_path(id)).json(hidden_body(resource, *hidden))
            }
            Mutation::Upload(upload) => ApiRequest::post(resource.path)
                .multipart(upload.form_fields(), upload.file_part().await?),
            Mutation::Delete { id } => {
                client
                    .execute(&ApiRequest::delete(resource.item_path(id)))
                    .await?;
                return Ok(format!("Deleted {} {}", resource.label(), id));
            }
            Mutation::Approve { ids } => {
                let mut responses = Vec::with_capacity(ids.len());
                for id in ids {
                    let request =
                        ApiRequest::put(resource.item_path(id)).json(approval_body(resource));
                    let response = client.execute_json(&request).await?;
                    debug!("approved {} {}", resource.label(), id);
                    responses.push(render_value(&response, OutputFormat::Json)?);
                }
                return Ok(responses.join("\n"));
            }
        };

        let response = client.execute_json(&request).await?;
        render_value(&response, OutputFormat::Json)
    }
}
