//! freeagent command-line entry point

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use freeagent_cli::auth::{AuthorizationFlow, BrowserLaunch, CallbackListener, TokenStore};
use freeagent_cli::client::ApiClient;
use freeagent_cli::config::{
    process_env, AppConfig, ConfigError, ConfigOptions, Settings, API_BASE_URL,
    DEFAULT_SETTINGS_FILE,
};
use freeagent_cli::depreciation::{self, Frequency, Method, ProfileRequest};
use freeagent_cli::output::{render_rows, render_value, OutputFormat};
use freeagent_cli::paginate::{PageCursor, PAGE_MAX};
use freeagent_cli::reports::{self, DateRange};
use freeagent_cli::resources::{
    self, ListOptions, Mutation, Resource, Upload, MAX_PERMISSION_LEVEL, RESOURCES,
};
use freeagent_cli::{Error, Result};

#[derive(Parser)]
#[command(name = "freeagent", version, about = "FreeAgent accounting API command-line client")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(flatten)]
    listing: ListingArgs,

    #[command(subcommand)]
    command: Command,
}

/// Where the settings live and how requests are made
#[derive(Args)]
struct ConnectionArgs {
    /// Settings file holding OAuth client values and tokens
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_FILE)]
    env_file: PathBuf,

    /// Override the API base URL
    #[arg(long, global = true, default_value = API_BASE_URL)]
    base_url: String,

    /// Per-request timeout in seconds
    #[arg(long, global = true, default_value_t = 30)]
    timeout: u64,

    /// Show request and token endpoint detail
    #[arg(long, global = true)]
    debug: bool,
}

impl ConnectionArgs {
    /// Load the settings file and resolve the client configuration.
    fn resolve(&self) -> Result<(AppConfig, Settings)> {
        if self.timeout == 0 {
            return Err(ConfigError::InvalidValue(
                "--timeout".to_string(),
                "must be at least 1 second".to_string(),
            )
            .into());
        }

        let mut settings = Settings::load(&self.env_file, process_env())?;
        let options = ConfigOptions {
            base_url: self.base_url.clone(),
            debug: self.debug,
            request_timeout: Duration::from_secs(self.timeout),
        };
        let config = AppConfig::resolve(&mut settings, options)?;
        debug!("using settings file {:?}", config.settings_path);
        Ok((config, settings))
    }

    fn connect(&self) -> Result<ApiClient> {
        let (config, settings) = self.resolve()?;
        ApiClient::new(config, TokenStore::new(settings))
    }
}

/// Output and paging flags, accepted on every command
#[derive(Args, Clone, Copy)]
struct ListingArgs {
    /// Output format: plain, csv, json or yaml
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    /// First page to fetch
    #[arg(long, global = true, default_value_t = 1)]
    page: u32,

    /// Items per page (max 100)
    #[arg(long, global = true, default_value_t = PAGE_MAX)]
    per_page: u32,

    /// Stop after this many pages
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..))]
    max_pages: Option<u32>,
}

impl ListingArgs {
    fn options(self) -> ListOptions {
        ListOptions {
            cursor: PageCursor::new(self.page, self.per_page),
            max_pages: self.max_pages,
            format: self.format,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run the OAuth authorization flow and store tokens
    Auth(AuthArgs),

    /// Company details
    #[command(subcommand)]
    Company(CompanyCommand),

    /// Accounting reports
    #[command(subcommand)]
    Reports(ReportsCommand),

    /// Cashflow
    #[command(subcommand)]
    Cashflow(CashflowCommand),

    /// Sales tax
    #[command(subcommand)]
    SalesTax(SalesTaxCommand),

    /// Payroll periods and payslips
    #[command(subcommand)]
    Payroll(PayrollCommand),

    /// Build depreciation profile payloads for capital assets
    #[command(subcommand)]
    DepreciationProfiles(DepreciationCommand),

    /// List the resources available as commands
    Resources,

    /// `<resource> <action>`; run `freeagent resources` for the actions of each
    #[command(external_subcommand)]
    Resource(Vec<String>),
}

#[derive(Args)]
struct AuthArgs {
    /// Local port for the OAuth callback
    #[arg(long, default_value_t = 8888)]
    port: u16,

    /// Print the authorization URL instead of opening a browser
    #[arg(long)]
    no_browser: bool,

    /// Seconds to wait for the callback (0 waits forever)
    #[arg(long, default_value_t = 300)]
    callback_timeout: u64,
}

#[derive(Subcommand)]
enum CompanyCommand {
    Info,
    BusinessCategories,
    TaxTimeline,
}

#[derive(Args)]
struct DateArgs {
    #[arg(long)]
    from_date: Option<String>,
    #[arg(long)]
    to_date: Option<String>,
}

impl From<DateArgs> for DateRange {
    fn from(args: DateArgs) -> Self {
        DateRange {
            from_date: args.from_date,
            to_date: args.to_date,
        }
    }
}

#[derive(Subcommand)]
enum ReportsCommand {
    ProfitLoss {
        #[command(flatten)]
        range: DateArgs,
        #[arg(long)]
        accounting_period: Option<String>,
    },
    BalanceSheet {
        #[arg(long)]
        as_at_date: Option<String>,
    },
    TrialBalance {
        #[command(flatten)]
        range: DateArgs,
    },
}

#[derive(Subcommand)]
enum CashflowCommand {
    Summary {
        #[command(flatten)]
        range: DateArgs,
    },
}

#[derive(Subcommand)]
enum SalesTaxCommand {
    /// EC MOSS sales tax rates
    MossRates {
        #[arg(long)]
        country: String,
        #[arg(long)]
        date: String,
    },
}

#[derive(Subcommand)]
enum PayrollCommand {
    /// Payroll periods of a tax year
    ListPeriods {
        #[arg(long)]
        year: u16,
    },
    /// Payslips of one period
    ListPayslips {
        #[arg(long)]
        year: u16,
        /// Period number within the year, 0 to 11
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=reports::LAST_PAYROLL_PERIOD as i64))]
        period: u8,
    },
}

#[derive(Subcommand)]
enum DepreciationCommand {
    /// List valid methods and their parameters
    Methods,
    /// Build a depreciation_profile payload
    Build {
        #[arg(long)]
        method: Method,
        #[arg(long)]
        frequency: Option<Frequency>,
        #[arg(long)]
        asset_life_years: Option<u32>,
        #[arg(long)]
        annual_depreciation_percentage: Option<u32>,
    },
}

/// Arguments following a resource name
#[derive(Parser)]
struct ResourceCli {
    #[arg(long, global = true)]
    format: Option<OutputFormat>,
    #[arg(long, global = true)]
    page: Option<u32>,
    #[arg(long, global = true)]
    per_page: Option<u32>,
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..))]
    max_pages: Option<u32>,

    #[command(subcommand)]
    action: ResourceAction,
}

impl ResourceCli {
    /// Flags given after the resource name win over those given before it.
    fn merge_into(&self, listing: ListingArgs) -> ListingArgs {
        ListingArgs {
            format: self.format.unwrap_or(listing.format),
            page: self.page.unwrap_or(listing.page),
            per_page: self.per_page.unwrap_or(listing.per_page),
            max_pages: self.max_pages.or(listing.max_pages),
        }
    }
}

#[derive(Subcommand)]
enum ResourceAction {
    List {
        /// Query filter, repeatable
        #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    Get {
        /// Numeric id or full resource URL
        id: String,
    },
    Create {
        /// JSON request body
        #[arg(long)]
        body: String,
        #[arg(long)]
        dry_run: bool,
    },
    Update {
        id: String,
        #[arg(long)]
        body: String,
        #[arg(long)]
        dry_run: bool,
    },
    Delete {
        id: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Upload a file as an attachment
    Upload {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        attachable_type: Option<String>,
        #[arg(long)]
        attachable_id: Option<String>,
        /// Defaults to a guess from the file extension
        #[arg(long)]
        content_type: Option<String>,
        /// Defaults to the file's own name
        #[arg(long)]
        file_name: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Clear the review flag on explanations
    Approve {
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// The authenticated user
    Me,
    GetPermission {
        id: String,
    },
    SetPermission {
        id: String,
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=MAX_PERMISSION_LEVEL as i64))]
        permission_level: u8,
        #[arg(long)]
        dry_run: bool,
    },
    SetHidden {
        id: String,
        /// true or false
        #[arg(long, action = clap::ArgAction::Set)]
        hidden: bool,
        #[arg(long)]
        dry_run: bool,
    },
    MarkFiled {
        /// Period end date, YYYY-MM-DD
        period_ends_on: String,
    },
    MarkUnfiled {
        period_ends_on: String,
    },
    OpeningBalances,
}

fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{}`", raw)),
    }
}

fn init_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if debug {
            "freeagent_cli=debug,freeagent=debug,warn"
        } else {
            "warn"
        })
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.connection.debug);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let Cli {
        connection,
        listing,
        command,
    } = cli;
    let format = listing.format;

    let output = match command {
        Command::Auth(args) => {
            let (config, settings) = connection.resolve()?;
            auth_command(&args, &config, TokenStore::new(settings)).await?
        }
        Command::Company(cmd) => {
            let client = connection.connect()?;
            match cmd {
                CompanyCommand::Info => reports::company_info(&client, format).await?,
                CompanyCommand::BusinessCategories => {
                    reports::business_categories(&client, format).await?
                }
                CompanyCommand::TaxTimeline => reports::tax_timeline(&client, format).await?,
            }
        }
        Command::Reports(cmd) => {
            let client = connection.connect()?;
            match cmd {
                ReportsCommand::ProfitLoss {
                    range,
                    accounting_period,
                } => {
                    reports::profit_and_loss(&client, &range.into(), accounting_period, format)
                        .await?
                }
                ReportsCommand::BalanceSheet { as_at_date } => {
                    reports::balance_sheet(&client, as_at_date, format).await?
                }
                ReportsCommand::TrialBalance { range } => {
                    reports::trial_balance(&client, &range.into(), format).await?
                }
            }
        }
        Command::Cashflow(CashflowCommand::Summary { range }) => {
            reports::cashflow_summary(&connection.connect()?, &range.into(), format).await?
        }
        Command::SalesTax(SalesTaxCommand::MossRates { country, date }) => {
            reports::moss_rates(&connection.connect()?, &country, &date, format).await?
        }
        Command::Payroll(cmd) => {
            let client = connection.connect()?;
            match cmd {
                PayrollCommand::ListPeriods { year } => {
                    reports::payroll_periods(&client, year, format).await?
                }
                PayrollCommand::ListPayslips { year, period } => {
                    reports::payslips(&client, year, period, format).await?
                }
            }
        }
        // Offline: no credentials or tokens needed
        Command::DepreciationProfiles(cmd) => depreciation_command(&cmd, format)?,
        Command::Resources => resource_table(format)?,
        Command::Resource(args) => resource_command(&connection, args, listing).await?,
    };

    println!("{}", output);
    Ok(())
}

async fn auth_command(
    args: &AuthArgs,
    config: &AppConfig,
    mut store: TokenStore,
) -> Result<String> {
    let listener = CallbackListener::bind(args.port).await?;
    let launch = if args.no_browser {
        BrowserLaunch::Print
    } else {
        BrowserLaunch::Open
    };
    let timeout = (args.callback_timeout > 0).then(|| Duration::from_secs(args.callback_timeout));

    AuthorizationFlow::new(config)
        .run(listener, launch, timeout, &mut store)
        .await?;

    Ok(format!("Tokens saved to {}", store.path().display()))
}

fn resource_table(format: OutputFormat) -> Result<String> {
    let rows: Vec<_> = RESOURCES
        .iter()
        .map(|r| {
            let actions: Vec<&str> = r.actions.iter().map(|a| a.name()).collect();
            json!({"resource": r.name, "path": r.path, "actions": actions.join(" ")})
        })
        .collect();
    render_rows(&rows, &["resource", "path", "actions"], format)
}

fn depreciation_command(cmd: &DepreciationCommand, format: OutputFormat) -> Result<String> {
    match cmd {
        DepreciationCommand::Methods => render_rows(
            &depreciation::method_rows(),
            &["method", "required_parameters", "optional_parameters"],
            format,
        ),
        DepreciationCommand::Build {
            method,
            frequency,
            asset_life_years,
            annual_depreciation_percentage,
        } => {
            let payload = depreciation::build_profile(&ProfileRequest {
                method: Some(*method),
                frequency: *frequency,
                asset_life_years: *asset_life_years,
                annual_depreciation_percentage: *annual_depreciation_percentage,
            })?;
            render_value(&payload, format)
        }
    }
}

/// Resource arguments are parsed before any settings are read, so `--help`
/// and dry runs work without credentials.
async fn resource_command(
    connection: &ConnectionArgs,
    args: Vec<String>,
    listing: ListingArgs,
) -> Result<String> {
    let name = args.first().map(String::as_str).unwrap_or_default();
    let resource = resources::find(name).ok_or_else(|| {
        Error::InvalidArgument(format!(
            "unknown command `{}`. Run `freeagent resources` to list resources.",
            name
        ))
    })?;

    let parsed = ResourceCli::try_parse_from(&args).unwrap_or_else(|e| e.exit());
    let listing = parsed.merge_into(listing);

    match parsed.action {
        ResourceAction::List { params } => {
            resources::list(&connection.connect()?, resource, params, listing.options()).await
        }
        ResourceAction::Get { id } => {
            resources::get(&connection.connect()?, resource, &id, listing.format).await
        }
        ResourceAction::Me => resources::me(&connection.connect()?, resource, listing.format).await,
        ResourceAction::GetPermission { id } => {
            resources::get_permission(&connection.connect()?, resource, &id).await
        }
        ResourceAction::OpeningBalances => {
            resources::opening_balances(&connection.connect()?, resource, listing.format).await
        }
        ResourceAction::MarkFiled { period_ends_on } => {
            resources::mark_filed(&connection.connect()?, resource, &period_ends_on, true).await
        }
        ResourceAction::MarkUnfiled { period_ends_on } => {
            resources::mark_filed(&connection.connect()?, resource, &period_ends_on, false).await
        }
        ResourceAction::Create { body, dry_run } => {
            let body = resources::parse_json_body(&body)?;
            write(connection, resource, Mutation::Create { body }, dry_run).await
        }
        ResourceAction::Update { id, body, dry_run } => {
            let body = resources::parse_json_body(&body)?;
            write(connection, resource, Mutation::Update { id, body }, dry_run).await
        }
        ResourceAction::Delete { id, dry_run } => {
            write(connection, resource, Mutation::Delete { id }, dry_run).await
        }
        ResourceAction::SetPermission {
            id,
            permission_level,
            dry_run,
        } => {
            let mutation = Mutation::SetPermission {
                id,
                level: permission_level,
            };
            write(connection, resource, mutation, dry_run).await
        }
        ResourceAction::SetHidden {
            id,
            hidden,
            dry_run,
        } => write(connection, resource, Mutation::SetHidden { id, hidden }, dry_run).await,
        ResourceAction::Approve { ids, dry_run } => {
            write(connection, resource, Mutation::Approve { ids }, dry_run).await
        }
        ResourceAction::Upload {
            file,
            description,
            attachable_type,
            attachable_id,
            content_type,
            file_name,
            dry_run,
        } => {
            let upload = Upload {
                file,
                description,
                attachable_type,
                attachable_id,
                content_type,
                file_name,
            };
            write(connection, resource, Mutation::Upload(upload), dry_run).await
        }
    }
}

/// Dry runs render offline; anything else connects first.
async fn write(
    connection: &ConnectionArgs,
    resource: &Resource,
    mutation: Mutation,
    dry_run: bool,
) -> Result<String> {
    if dry_run {
        return mutation.preview(resource);
    }
    mutation.apply(&connection.connect()?, resource).await
}
