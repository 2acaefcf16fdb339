use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use orderly_api::{
    auth::{AuthConfig, AuthService, AuthUser, Session, SessionSnapshot, SignInRequest, SignUpRequest},
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::{OrderStatus, OrderType, PaymentMethod},
    events::{self, ChangeFeed, EventSender},
    handlers::AppServices,
    services::{
        admin::OrderFilter,
        checkout::{CartLineInput, CheckoutRequest, Receipt},
        views::OrderWithItems,
    },
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

const SESSION_FILE_ENV: &str = "ORDERLY_CLI_SESSION_FILE";
const SESSION_DIR_NAME: &str = ".orderly";
const SESSION_FILE_NAME: &str = "session.json";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut context = CliContext::initialize().await?;

    match cli.command {
        Commands::Auth(command) => handle_auth_command(&mut context, command, cli.json).await?,
        Commands::Menu(command) => handle_menu_command(&context, command, cli.json).await?,
        Commands::Checkout(args) => handle_checkout(&context, args, cli.json).await?,
        Commands::Kitchen(command) => handle_kitchen_command(&context, command, cli.json).await?,
        Commands::Admin(command) => handle_admin_command(&context, command, cli.json).await?,
        Commands::Migrate => {
            db::run_migrations(&context.db).await?;
            println!("Migrations applied");
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "orderly", about = "Orderly CLI for kiosk, kitchen and back-office tasks", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(subcommand)]
    Auth(AuthCommands),
    #[command(subcommand)]
    Menu(MenuCommands),
    /// Place an order as a kiosk would
    Checkout(CheckoutArgs),
    #[command(subcommand)]
    Kitchen(KitchenCommands),
    #[command(subcommand)]
    Admin(AdminCommands),
    /// Apply pending database migrations
    Migrate,
}

#[derive(Subcommand)]
enum AuthCommands {
    Signup(SignupArgs),
    Login(LoginArgs),
    Logout,
    Whoami,
}

#[derive(Args)]
struct SignupArgs {
    #[arg(long, help = "Email address for the new account")]
    email: String,
    #[arg(long, help = "Password (at least 6 characters)")]
    password: String,
    #[arg(long, help = "Full name shown to other staff")]
    full_name: String,
}

#[derive(Args)]
struct LoginArgs {
    #[arg(long, help = "Email address for the account")]
    email: String,
    #[arg(long, help = "Password for the account")]
    password: String,
}

#[derive(Subcommand)]
enum MenuCommands {
    Show(StoreArgs),
}

#[derive(Args)]
struct StoreArgs {
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Store identifier; defaults to the first store")]
    store_id: Option<Uuid>,
}

#[derive(Args)]
struct CheckoutArgs {
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Store identifier; defaults to the first store")]
    store_id: Option<Uuid>,
    #[arg(
        long = "item",
        value_parser = parse_cart_line,
        action = ArgAction::Append,
        required = true,
        help = "Cart line as PRODUCT_ID[:QUANTITY], repeatable"
    )]
    items: Vec<CartLineInput>,
    #[arg(long, value_parser = parse_order_type, default_value = "take_away", help = "dine_in or take_away")]
    order_type: OrderType,
    #[arg(long, value_parser = parse_payment_method, default_value = "card", help = "card, upi or cash")]
    payment_method: PaymentMethod,
    #[arg(long, value_parser = parse_decimal, default_value = "0", help = "Tip amount")]
    tip: Decimal,
    #[arg(long, help = "Name called out when the order is ready")]
    customer_name: String,
    #[arg(long, help = "Phone number for loyalty points")]
    customer_phone: Option<String>,
    #[arg(long, help = "Email for the receipt")]
    customer_email: Option<String>,
    #[arg(long, help = "Kiosk identifier recorded on the order")]
    kiosk_id: Option<String>,
}

#[derive(Subcommand)]
enum KitchenCommands {
    Queue(StoreArgs),
    Start(OrderArgs),
    Ready(OrderArgs),
    /// Reprint the queue whenever it changes
    Watch(WatchArgs),
}

#[derive(Args)]
struct OrderArgs {
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Store identifier; defaults to the first store")]
    store_id: Option<Uuid>,
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Order identifier")]
    order_id: Uuid,
}

#[derive(Args)]
struct WatchArgs {
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Store identifier; defaults to the first store")]
    store_id: Option<Uuid>,
    #[arg(long, default_value_t = 5, help = "Seconds between queue checks")]
    interval_secs: u64,
}

#[derive(Subcommand)]
enum AdminCommands {
    Dashboard(StoreArgs),
    Overview(StoreArgs),
    Analytics(StoreArgs),
    Orders(AdminOrdersArgs),
    OrderStatus(AdminOrderStatusArgs),
    Products(AdminProductsArgs),
    ToggleProduct(ToggleProductArgs),
}

#[derive(Args)]
struct AdminOrdersArgs {
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Store identifier; defaults to the first store")]
    store_id: Option<Uuid>,
    #[arg(long, value_parser = parse_status, help = "Only orders in this status")]
    status: Option<OrderStatus>,
    #[arg(long, help = "Match on order number or customer name")]
    search: Option<String>,
}

#[derive(Args)]
struct AdminOrderStatusArgs {
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Store identifier; defaults to the first store")]
    store_id: Option<Uuid>,
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Order identifier")]
    order_id: Uuid,
    #[arg(long, value_parser = parse_status, help = "New status")]
    status: OrderStatus,
}

#[derive(Args)]
struct AdminProductsArgs {
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Store identifier; defaults to the first store")]
    store_id: Option<Uuid>,
    #[arg(long, help = "Match on product name")]
    search: Option<String>,
}

#[derive(Args)]
struct ToggleProductArgs {
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Store identifier; defaults to the first store")]
    store_id: Option<Uuid>,
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Product identifier")]
    product_id: Uuid,
}

/// What the CLI remembers between invocations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredSession {
    access_token: String,
    token_type: String,
    user: SessionSnapshot,
    saved_at: DateTime<Utc>,
}

impl StoredSession {
    fn from_session(session: Session) -> Self {
        Self {
            access_token: session.access_token,
            token_type: session.token_type,
            user: session.user,
            saved_at: Utc::now(),
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.user.expires_at <= now
    }
}

/// The signed-in staff session for this process.
///
/// Restored once at start-up from the session file; after that it only
/// changes through [`SessionContext::login`] and [`SessionContext::logout`].
struct SessionContext {
    path: PathBuf,
    current: Option<StoredSession>,
}

impl SessionContext {
    fn restore(path: PathBuf) -> Result<Self> {
        let current = match read_session(&path)? {
            Some(stored) if stored.is_expired(Utc::now()) => {
                clear_session_file(&path)?;
                None
            }
            other => other,
        };
        Ok(Self { path, current })
    }

    fn snapshot(&self) -> Option<&StoredSession> {
        self.current.as_ref()
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn login(&mut self, session: Session) -> Result<&StoredSession> {
        let stored = StoredSession::from_session(session);
        save_session(&self.path, &stored)?;
        let stored = self.current.insert(stored);
        Ok(&*stored)
    }

    fn logout(&mut self) -> Result<Option<StoredSession>> {
        clear_session_file(&self.path)?;
        Ok(self.current.take())
    }

    fn require(&self) -> Result<&StoredSession> {
        self.current
            .as_ref()
            .ok_or_else(|| anyhow!("not signed in; run `orderly auth login` first"))
    }
}

struct CliContext {
    config: AppConfig,
    db: Arc<DbPool>,
    auth: Arc<AuthService>,
    services: AppServices,
    session: SessionContext,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        let db = Arc::new(db_pool);

        let auth = Arc::new(AuthService::new(
            AuthConfig::from_app_config(&config),
            db.clone(),
        ));

        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
        let change_feed = ChangeFeed::new();
        tokio::spawn(events::process_events(event_rx, change_feed.clone()));
        let services = AppServices::new(db.clone(), EventSender::new(event_tx), change_feed, &config);

        let session = SessionContext::restore(session_file_path())?;

        Ok(Self {
            config,
            db,
            auth,
            services,
            session,
        })
    }

    /// The restored session, re-checked against the signing key
    fn require_session(&self) -> Result<AuthUser> {
        let stored = self.session.require()?;
        self.auth
            .authenticate(&stored.access_token)
            .map_err(|e| anyhow!("saved session is no longer valid ({}); sign in again", e))
    }

    /// Resolves the store and checks the session holds a grant for it
    async fn staff_store(&self, user: &AuthUser, store_id: Option<Uuid>) -> Result<Uuid> {
        let store_id = self.resolve_store(store_id).await?;
        user.require_store(store_id)
            .map_err(|e| anyhow!("{}; ask a vendor admin for a role on this store", e))?;
        Ok(store_id)
    }

    async fn resolve_store(&self, store_id: Option<Uuid>) -> Result<Uuid> {
        match store_id {
            Some(id) => Ok(id),
            None => Ok(self
                .services
                .catalog
                .default_store()
                .await
                .context("no --store-id given and no default store found")?
                .id),
        }
    }
}

async fn handle_auth_command(
    context: &mut CliContext,
    command: AuthCommands,
    json: bool,
) -> Result<()> {
    match command {
        AuthCommands::Signup(args) => {
            let session = context
                .auth
                .sign_up(SignUpRequest {
                    email: args.email,
                    password: args.password,
                    full_name: args.full_name,
                })
                .await
                .map_err(|e| anyhow!("sign up failed: {}", e))?;
            if json {
                print_json(&session.user)?;
            } else {
                println!("Account created for {}", session.user.email);
                println!("Run `orderly auth login` to start a session.");
            }
        }
        AuthCommands::Login(args) => {
            let session = context
                .auth
                .sign_in(SignInRequest {
                    email: args.email,
                    password: args.password,
                })
                .await
                .map_err(|e| anyhow!("authentication failed: {}", e))?;
            let path = context.session.path().display().to_string();
            let stored = context.session.login(session)?;
            if json {
                print_json(&stored.user)?;
            } else {
                println!("Signed in as {}", stored.user.email);
                println!("Session expires at {}", stored.user.expires_at.to_rfc3339());
                println!("Session saved to: {}", path);
            }
        }
        AuthCommands::Logout => match context.session.logout()? {
            Some(stored) => {
                if let Ok(user) = context.auth.authenticate(&stored.access_token) {
                    context.auth.sign_out(&user);
                }
                println!("Signed out {}", stored.user.email);
            }
            None => println!("No active session"),
        },
        AuthCommands::Whoami => match context.session.snapshot() {
            Some(stored) if json => print_json(&stored.user)?,
            Some(stored) => {
                let user = &stored.user;
                println!("{} ({})", user.full_name.as_deref().unwrap_or("-"), user.email);
                println!("User id: {}", user.user_id);
                let roles: Vec<String> = user.roles.iter().map(ToString::to_string).collect();
                println!("Roles: {}", if roles.is_empty() { "-".to_string() } else { roles.join(", ") });
                println!("Expires at: {}", user.expires_at.to_rfc3339());
            }
            None => println!("Not signed in"),
        },
    }
    Ok(())
}

async fn handle_menu_command(context: &CliContext, command: MenuCommands, json: bool) -> Result<()> {
    match command {
        MenuCommands::Show(args) => {
            let store_id = context.resolve_store(args.store_id).await?;
            let menu = context.services.catalog.menu(store_id).await?;
            if json {
                return print_json(&menu);
            }

            println!("{}", menu.store.name);
            let symbol = &menu.store.currency_symbol;
            for category in &menu.categories {
                println!("\n[{}]", category.name);
                for product in menu
                    .products
                    .iter()
                    .filter(|p| p.category_id == Some(category.id))
                {
                    println!("  {:<32} {}{}  ({})", product.name, symbol, product.price, product.id);
                }
            }
            let uncategorized: Vec<_> = menu
                .products
                .iter()
                .filter(|p| {
                    p.category_id
                        .map_or(true, |id| !menu.categories.iter().any(|c| c.id == id))
                })
                .collect();
            if !uncategorized.is_empty() {
                println!("\n[Other]");
                for product in uncategorized {
                    println!("  {:<32} {}{}  ({})", product.name, symbol, product.price, product.id);
                }
            }
        }
    }
    Ok(())
}

async fn handle_checkout(context: &CliContext, args: CheckoutArgs, json: bool) -> Result<()> {
    let store_id = context.resolve_store(args.store_id).await?;
    let request = CheckoutRequest {
        items: args.items,
        order_type: args.order_type,
        payment_method: args.payment_method,
        tip: args.tip,
        customer_name: args.customer_name,
        customer_phone: args.customer_phone,
        customer_email: args.customer_email,
        kiosk_id: args.kiosk_id,
        table_id: None,
    };

    let receipt = context
        .services
        .checkout
        .checkout(store_id, request)
        .await
        .context("checkout failed")?;

    if json {
        print_json(&receipt)
    } else {
        render_receipt(&receipt, &context.config.default_currency_symbol);
        Ok(())
    }
}

async fn handle_kitchen_command(
    context: &CliContext,
    command: KitchenCommands,
    json: bool,
) -> Result<()> {
    let user = context.require_session()?;
    tracing::debug!(user_id = %user.user_id, "kitchen command");
    let kitchen = &context.services.kitchen;

    match command {
        KitchenCommands::Queue(args) => {
            let store_id = context.staff_store(&user, args.store_id).await?;
            let queue = kitchen.queue(store_id).await?;
            if json {
                print_json(&queue)?;
            } else {
                render_queue(&queue);
            }
        }
        KitchenCommands::Start(args) => {
            let store_id = context.staff_store(&user, args.store_id).await?;
            let order = kitchen.start_preparing(store_id, args.order_id).await?;
            if json {
                print_json(&order)?;
            } else {
                println!("Order {} is now {}", order.order_number, order.status);
            }
        }
        KitchenCommands::Ready(args) => {
            let store_id = context.staff_store(&user, args.store_id).await?;
            let order = kitchen.mark_ready(store_id, args.order_id).await?;
            if json {
                print_json(&order)?;
            } else {
                println!("Order {} is now {}", order.order_number, order.status);
            }
        }
        KitchenCommands::Watch(args) => {
            let store_id = context.staff_store(&user, args.store_id).await?;
            let mut ticker = tokio::time::interval(Duration::from_secs(args.interval_secs.max(1)));
            let mut last: Option<BTreeMap<Uuid, OrderStatus>> = None;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = tokio::signal::ctrl_c() => break,
                }
                let queue = kitchen.queue(store_id).await?;
                let current = queue_fingerprint(&queue);
                if last.as_ref() != Some(&current) {
                    if json {
                        print_json(&queue)?;
                    } else {
                        println!("--- {} ---", Utc::now().format("%H:%M:%S"));
                        render_queue(&queue);
                    }
                    last = Some(current);
                }
            }
        }
    }
    Ok(())
}

async fn handle_admin_command(
    context: &CliContext,
    command: AdminCommands,
    json: bool,
) -> Result<()> {
    let user = context.require_session()?;
    let services = &context.services;
    let symbol = context.config.default_currency_symbol.as_str();

    match command {
        AdminCommands::Dashboard(args) => {
            let store_id = context.staff_store(&user, args.store_id).await?;
            let dashboard = services.admin.dashboard(store_id).await?;
            if json {
                return print_json(&dashboard);
            }
            println!("Orders today:    {}", dashboard.today_orders);
            println!("Revenue today:   {}{}", symbol, dashboard.today_revenue);
            println!("Active products: {}", dashboard.active_products);
            println!("Pending orders:  {}", dashboard.pending_orders);
        }
        AdminCommands::Overview(args) => {
            let store_id = context.staff_store(&user, args.store_id).await?;
            let overview = services.admin.overview(store_id).await?;
            if json {
                return print_json(&overview);
            }
            println!("Orders: {}", overview.total_orders);
            println!("Products: {}", overview.total_products);
            println!("Customers: {}", overview.total_customers);
            println!("Low stock ({}):", overview.low_stock_count);
            for item in &overview.low_stock {
                println!(
                    "  {:<32} {} left (threshold {})",
                    item.product_name.as_deref().unwrap_or("-"),
                    item.current_stock,
                    item.threshold
                );
            }
            println!("Recent orders:");
            render_orders(&overview.recent_orders, symbol);
        }
        AdminCommands::Analytics(args) => {
            let store_id = context.staff_store(&user, args.store_id).await?;
            let report = services.analytics.report(store_id).await?;
            if json {
                return print_json(&report);
            }
            println!("Revenue: {}{}", symbol, report.total_revenue);
            println!("Orders: {}", report.total_orders);
            println!("Average order: {}{}", symbol, report.average_order_value);
            println!("Last days:");
            for point in &report.revenue_by_day {
                println!("  {}  {}{}  ({} orders)", point.day, symbol, point.revenue, point.orders);
            }
            println!("Top products:");
            for product in &report.top_products {
                println!("  {:<32} x{}", product.name, product.quantity);
            }
        }
        AdminCommands::Orders(args) => {
            let store_id = context.staff_store(&user, args.store_id).await?;
            let filter = OrderFilter {
                status: args.status,
                search: args.search,
            };
            let orders = services.admin.list_orders(store_id, &filter).await?;
            if json {
                return print_json(&orders);
            }
            render_orders(&orders, symbol);
        }
        AdminCommands::OrderStatus(args) => {
            let store_id = context.staff_store(&user, args.store_id).await?;
            let order = services
                .admin
                .update_order_status(store_id, args.order_id, args.status)
                .await?;
            if json {
                return print_json(&order);
            }
            println!("Order {} is now {}", order.order_number, order.status);
        }
        AdminCommands::Products(args) => {
            let store_id = context.staff_store(&user, args.store_id).await?;
            let products = services
                .catalog
                .list_products(store_id, args.search.as_deref())
                .await?;
            if json {
                return print_json(&products);
            }
            for entry in &products {
                let product = &entry.product;
                println!(
                    "- {:<32} {}{:<8} {:<10} {} ({})",
                    product.name,
                    symbol,
                    product.price,
                    if product.available() { "available" } else { "hidden" },
                    entry.category_name.as_deref().unwrap_or("-"),
                    product.id
                );
            }
        }
        AdminCommands::ToggleProduct(args) => {
            let store_id = context.staff_store(&user, args.store_id).await?;
            let product = services
                .catalog
                .toggle_availability(store_id, args.product_id)
                .await?;
            if json {
                return print_json(&product);
            }
            println!(
                "{} is now {}",
                product.name,
                if product.available() { "available" } else { "hidden" }
            );
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_receipt(receipt: &Receipt, symbol: &str) {
    let order = &receipt.order.order;
    println!("Order {} ({})", order.order_number, order.id);
    for line in &receipt.order.items {
        println!(
            "  {:>3} x {:<28} {}{}",
            line.quantity,
            line.product_name.as_deref().unwrap_or("(removed)"),
            symbol,
            line.subtotal
        );
    }
    println!("  Subtotal: {}{}", symbol, receipt.totals.subtotal);
    println!("  Tax:      {}{}", symbol, receipt.totals.tax_amount);
    println!("  Tip:      {}{}", symbol, receipt.totals.tip_amount);
    println!("  Total:    {}{}", symbol, receipt.totals.total_amount);
    println!(
        "  Paid by {} ({})",
        receipt.payment.method,
        receipt.payment.transaction_id.as_deref().unwrap_or("-")
    );
    if let Some(loyalty) = &receipt.loyalty {
        println!("  Loyalty points earned: {}", loyalty.points_earned);
    }
}

fn render_queue(queue: &[OrderWithItems]) {
    if queue.is_empty() {
        println!("Queue is empty");
        return;
    }
    for entry in queue {
        let order = &entry.order;
        println!(
            "{} [{}] {} ({})",
            order.order_number,
            order.status,
            order.customer_name.as_deref().unwrap_or("-"),
            order.id
        );
        for line in &entry.items {
            let name = line.product_name.as_deref().unwrap_or("(removed)");
            match &line.special_instructions {
                Some(note) => println!("    {} x {}  -- {}", line.quantity, name, note),
                None => println!("    {} x {}", line.quantity, name),
            }
        }
    }
}

fn render_orders(orders: &[OrderWithItems], symbol: &str) {
    for entry in orders {
        let order = &entry.order;
        println!(
            "- {} • {} • {} • {}{} • {}",
            order.order_number,
            order.status,
            order.customer_name.as_deref().unwrap_or("-"),
            symbol,
            order.total_amount,
            order.created_at.format("%Y-%m-%d %H:%M")
        );
    }
}

fn queue_fingerprint(queue: &[OrderWithItems]) -> BTreeMap<Uuid, OrderStatus> {
    queue
        .iter()
        .map(|entry| (entry.order.id, entry.order.status))
        .collect()
}

fn parse_cart_line(raw: &str) -> Result<CartLineInput, String> {
    let (id, quantity) = match raw.split_once(':') {
        Some((id, qty)) => (
            id,
            qty.trim()
                .parse::<i32>()
                .map_err(|_| format!("invalid quantity in '{raw}'"))?,
        ),
        None => (raw, 1),
    };
    if quantity < 1 {
        return Err("quantity must be at least 1".to_string());
    }
    let product_id =
        Uuid::parse_str(id.trim()).map_err(|_| format!("invalid product id in '{raw}'"))?;
    Ok(CartLineInput {
        product_id,
        quantity,
        special_instructions: None,
    })
}

fn parse_decimal(raw: &str) -> Result<Decimal, String> {
    Decimal::from_str(raw).map_err(|_| format!("invalid decimal '{raw}'"))
}

fn parse_status(raw: &str) -> Result<OrderStatus, String> {
    OrderStatus::from_str(&raw.trim().to_ascii_lowercase())
        .map_err(|_| format!("unknown order status '{raw}'"))
}

fn parse_order_type(raw: &str) -> Result<OrderType, String> {
    OrderType::from_str(&raw.trim().to_ascii_lowercase())
        .map_err(|_| format!("unknown order type '{raw}', expected dine_in or take_away"))
}

fn parse_payment_method(raw: &str) -> Result<PaymentMethod, String> {
    PaymentMethod::from_str(&raw.trim().to_ascii_lowercase())
        .map_err(|_| format!("unknown payment method '{raw}', expected card, upi or cash"))
}

fn session_file_path() -> PathBuf {
    resolve_session_path(
        std::env::var(SESSION_FILE_ENV).ok(),
        std::env::var("HOME").ok(),
    )
}

/// `$ORDERLY_CLI_SESSION_FILE`, else `$HOME/.orderly/session.json`, else
/// `.orderly/session.json` in the working directory.
fn resolve_session_path(override_path: Option<String>, home: Option<String>) -> PathBuf {
    if let Some(path) = override_path.filter(|p| !p.trim().is_empty()) {
        let mut path = PathBuf::from(path);
        if path.file_name().is_none() {
            path.push(SESSION_FILE_NAME);
        }
        return path;
    }

    let mut path = home
        .filter(|h| !h.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_default();
    path.push(SESSION_DIR_NAME);
    path.push(SESSION_FILE_NAME);
    path
}

fn save_session(path: &Path, session: &StoredSession) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_private_dir(parent)
            .with_context(|| format!("failed creating directory {}", parent.display()))?;
    }

    let payload = serde_json::to_vec_pretty(session)?;
    write_private_file(path, &payload)
        .with_context(|| format!("failed writing {}", path.display()))?;
    Ok(())
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}

/// The file holds a bearer token: owner read/write only.
#[cfg(unix)]
fn write_private_file(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies on creation
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    file.write_all(payload)
}

#[cfg(not(unix))]
fn write_private_file(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    fs::write(path, payload)
}

fn read_session(path: &Path) -> Result<Option<StoredSession>> {
    if !path.exists() {
        return Ok(None);
    }

    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read session file {}", path.display()))?;
    match serde_json::from_str(&data) {
        Ok(session) => Ok(Some(session)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable session file");
            Ok(None)
        }
    }
}

fn clear_session_file(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn session(expires_at: DateTime<Utc>) -> Session {
        Session {
            access_token: "token-abc".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: 3600,
            user: SessionSnapshot {
                user_id: Uuid::new_v4(),
                email: "cook@example.com".to_string(),
                full_name: Some("Line Cook".to_string()),
                roles: vec![],
                store_ids: vec![],
                expires_at,
            },
        }
    }

    #[test]
    fn restore_without_file_has_no_session() {
        let dir = TempDir::new().unwrap();
        let ctx = SessionContext::restore(dir.path().join("session.json")).unwrap();
        assert!(ctx.snapshot().is_none());
        assert!(ctx.require().is_err());
    }

    #[test]
    fn login_persists_and_next_start_restores() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let mut ctx = SessionContext::restore(path.clone()).unwrap();
        ctx.login(session(Utc::now() + ChronoDuration::hours(1)))
            .unwrap();
        assert!(path.exists());

        let restored = SessionContext::restore(path).unwrap();
        let stored = restored.require().unwrap();
        assert_eq!(stored.access_token, "token-abc");
        assert_eq!(stored.user.email, "cook@example.com");
    }

    #[test]
    fn expired_session_file_is_discarded_on_restore() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        let stale = StoredSession::from_session(session(Utc::now() - ChronoDuration::minutes(1)));
        save_session(&path, &stale).unwrap();

        let ctx = SessionContext::restore(path.clone()).unwrap();
        assert!(ctx.snapshot().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn logout_clears_memory_and_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        let mut ctx = SessionContext::restore(path.clone()).unwrap();
        ctx.login(session(Utc::now() + ChronoDuration::hours(1)))
            .unwrap();

        let previous = ctx.logout().unwrap();
        assert!(previous.is_some());
        assert!(ctx.snapshot().is_none());
        assert!(!path.exists());
        assert!(ctx.logout().unwrap().is_none());
    }

    #[test]
    fn session_path_prefers_override_then_home() {
        assert_eq!(
            resolve_session_path(Some("/tmp/x/cli.json".into()), Some("/home/cook".into())),
            PathBuf::from("/tmp/x/cli.json")
        );
        assert_eq!(
            resolve_session_path(Some("  ".into()), Some("/home/cook".into())),
            PathBuf::from("/home/cook/.orderly/session.json")
        );
        assert_eq!(
            resolve_session_path(None, None),
            PathBuf::from(".orderly/session.json")
        );
    }

    #[cfg(unix)]
    #[test]
    fn saved_session_is_private_to_the_owner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".orderly").join("session.json");
        let stored = StoredSession::from_session(session(Utc::now() + ChronoDuration::hours(1)));
        save_session(&path, &stored).unwrap();

        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn corrupt_session_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "{not json").unwrap();
        let ctx = SessionContext::restore(path).unwrap();
        assert!(ctx.snapshot().is_none());
    }

    #[test]
    fn cart_line_parsing() {
        let id = Uuid::new_v4();
        let line = parse_cart_line(&format!("{id}:3")).unwrap();
        assert_eq!(line.product_id, id);
        assert_eq!(line.quantity, 3);

        let single = parse_cart_line(&id.to_string()).unwrap();
        assert_eq!(single.quantity, 1);

        assert!(parse_cart_line(&format!("{id}:0")).is_err());
        assert!(parse_cart_line("not-a-uuid:2").is_err());
        assert!(parse_cart_line(&format!("{id}:two")).is_err());
    }

    #[test]
    fn enum_argument_parsing() {
        assert_eq!(parse_status("Preparing").unwrap(), OrderStatus::Preparing);
        assert!(parse_status("shipped").is_err());
        assert_eq!(parse_order_type("dine_in").unwrap(), OrderType::DineIn);
        assert_eq!(parse_payment_method("UPI").unwrap(), PaymentMethod::Upi);
    }

    #[test]
    fn cli_arguments_parse() {
        let cli = Cli::try_parse_from([
            "orderly",
            "--json",
            "admin",
            "orders",
            "--status",
            "pending",
            "--search",
            "ord-1",
        ])
        .unwrap();
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::Admin(AdminCommands::Orders(AdminOrdersArgs {
                status: Some(OrderStatus::Pending),
                ..
            }))
        ));
    }
}
