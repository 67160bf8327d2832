//! ticket-rush CLI
//!
//! Run a single bot against one event page. The web panel (`server` binary)
//! is the multi-bot front-end; this is the one-shot runner.

use std::sync::Arc;
use anyhow::Context;
use clap::Parser;
use tracing::info;

use ticket_rush::bot::{self, AutoBuy, BotConfig, RunControl, RunOutcome, Selection, TaskLog};
use ticket_rush::rate::Pacing;
use ticket_rush::sites::Site;
use ticket_rush::stats::TaskStats;

#[derive(Parser, Debug)]
#[command(name = "ticket-rush", about = "Poll a ticket page and click the purchase button the moment it appears")]
struct Cli {
    /// Event page URL
    #[arg(long)]
    url: String,

    /// Purchase button text to hunt for (e.g. "Beli Tiket")
    #[arg(long, default_value = "")]
    button_text: String,

    /// Target site (auto-detected from the URL when omitted)
    #[arg(long, value_enum)]
    site: Option<Site>,

    /// Walk the purchase funnel automatically after the click lands
    #[arg(long)]
    auto_buy: bool,

    /// Ticket category / package name for auto-buy
    #[arg(long)]
    category: Option<String>,

    /// Ticket quantity (1-6)
    #[arg(long, default_value_t = 1)]
    quantity: u32,

    /// Attach to a running Chrome (host:port or bare port)
    #[arg(long)]
    debugger_address: Option<String>,

    /// Open a fresh tab after attaching
    #[arg(long)]
    new_tab: bool,

    /// Run a launched Chrome headless
    #[arg(long)]
    headless: bool,

    /// Close the browser when the run ends
    #[arg(long)]
    close_on_exit: bool,

    /// Minimum refresh delay in seconds
    #[arg(long, default_value_t = 0.5)]
    refresh_min: f64,

    /// Maximum refresh delay in seconds
    #[arg(long, default_value_t = 4.0)]
    refresh_max: f64,

    /// Poll attempt ceiling (0 = unlimited)
    #[arg(long, default_value_t = 500)]
    max_attempts: u32,

    /// Fire plain clicks before the scroll/force-visible treatment
    #[arg(long)]
    aggressive_click: bool,

    /// Click order buttons even when the quantity could not be set
    #[arg(long)]
    aggressive_order: bool,

    /// Auto-buy hybrid mode: refresh the widget only every few attempts
    #[arg(long)]
    skip_refresh: bool,

    /// Jump straight to a checkout-widget URL found in the page DOM
    #[arg(long)]
    auto_detect_widget: bool,
}

impl Cli {
    fn into_config(self) -> BotConfig {
        BotConfig {
            url: self.url,
            button_text: self.button_text,
            site: self.site,
            auto_buy: self.auto_buy,
            ticket_category: self.category,
            ticket_quantity: self.quantity,
            await_selection: false,
            debugger_address: self.debugger_address,
            open_new_tab: self.new_tab,
            user_data_dir: None,
            headless: self.headless,
            close_on_exit: self.close_on_exit,
            aggressive_click: self.aggressive_click,
            aggressive_order: self.aggressive_order,
            skip_refresh: self.skip_refresh,
            auto_detect_widget: self.auto_detect_widget,
            pacing: Pacing {
                min_delay_ms: (self.refresh_min.max(0.0) * 1000.0) as u64,
                max_delay_ms: (self.refresh_max.max(0.0) * 1000.0) as u64,
            },
            max_attempts: self.max_attempts,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = ticket_rush::init_logging();

    let cli = Cli::parse();
    let config = cli.into_config().normalized();
    config.validate().map_err(anyhow::Error::msg)?;

    info!(
        "Starting one-shot bot: {} | '{}' | site {}",
        config.url,
        config.button_text,
        config.resolved_site()
    );

    let preset = if config.auto_buy {
        config.ticket_category.as_ref().map(|category| Selection {
            category: category.clone(),
            quantity: bot::clamp_quantity(config.ticket_quantity),
        })
    } else {
        None
    };

    let control = Arc::new(RunControl::new(AutoBuy::with_preset(preset)));
    let stats = Arc::new(TaskStats::new());
    let log = Arc::new(TaskLog::default());

    // Ctrl-C flips the same polled stop flag the panel uses
    let control_for_signal = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping");
            control_for_signal.request_stop();
        }
    });

    let outcome = bot::run(config, control, stats.clone(), log)
        .await
        .context("bot run failed")?;

    let snapshot = stats.snapshot();
    match outcome {
        RunOutcome::Handoff { url } => {
            println!("Hand-off point reached: {}", url);
            println!("Finish the purchase in the browser.");
        }
        RunOutcome::AttemptsExhausted => {
            println!("Attempt ceiling reached without a verified click.");
        }
        RunOutcome::Stopped => {
            println!("Stopped.");
        }
    }
    println!(
        "{} polls, {} clicks, {} errors",
        snapshot.refreshes, snapshot.clicks, snapshot.errors
    );

    Ok(())
}
