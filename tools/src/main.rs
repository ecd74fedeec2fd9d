//! upsell-runner: headless driver for the upsell engine.
//!
//! Usage:
//!   upsell-runner --host host.json --config engine.json --db offers.db --visitors 500 --seed 7
//!   upsell-runner --host host.json --db offers.db --ipc-mode
//!
//! Default mode seeds demo offers if the store is empty, simulates traffic and
//! prints an analytics summary. `--ipc-mode` reads one JSON command per line
//! on stdin and writes one JSON response per line on stdout.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use upsell_core::{
    analytics::AnalyticsFilters,
    clock::FixedClock,
    config::EngineConfig,
    engine::{Interaction, UpsellEngine},
    host::{InMemoryHost, Product, RequestContext, VisitorIdentity},
    offer::{OfferPayload, OfferType},
    store::UpsellStore,
    traffic::{TrafficConfig, TrafficSimulator},
    types::OfferId,
};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Eligible {
        offer_type: OfferType,
        context:    RequestContext,
    },
    ResolveVariant {
        offer_id:    OfferId,
        #[serde(default)]
        user_id:     Option<i64>,
        #[serde(default)]
        session_id:  Option<String>,
        #[serde(default)]
        remote_addr: Option<String>,
    },
    TrackEvent {
        action:      String,
        #[serde(flatten)]
        interaction: Interaction,
        #[serde(default)]
        revenue:     f64,
    },
    Summary {
        #[serde(default)]
        filters: AnalyticsFilters,
    },
    TopOffers {
        #[serde(default = "default_top_limit")]
        limit:   usize,
        #[serde(default)]
        filters: AnalyticsFilters,
    },
    Quit,
}

fn default_top_limit() -> usize {
    5
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let visitors = parse_arg(&args, "--visitors", 500u32);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = flag_value(&args, "--db").unwrap_or(":memory:");
    let config_path = flag_value(&args, "--config");
    let host_path = flag_value(&args, "--host");

    let config = match config_path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let host = match host_path {
        Some(path) => InMemoryHost::load(path)?,
        None => demo_host(),
    };

    if !ipc_mode {
        println!("upsell-runner");
        println!("  seed:      {seed}");
        println!("  visitors:  {visitors}");
        println!("  db:        {db}");
        println!("  config:    {}", config_path.unwrap_or("(defaults)"));
        println!("  host:      {}", host_path.unwrap_or("(demo catalog)"));
        println!();
    }

    let store = UpsellStore::open(db)?;

    if ipc_mode {
        let engine = UpsellEngine::new(config, store, Box::new(host))?;
        engine.bootstrap()?;
        return run_ipc_loop(&engine);
    }

    // Simulated time keeps repeated runs with the same seed identical.
    let start = Utc
        .with_ymd_and_hms(2026, 1, 5, 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    let clock = Arc::new(FixedClock::new(start));
    let products = host.products.clone();
    let known_customers = host.customers.iter().map(|c| c.user_id).collect();
    let engine = UpsellEngine::new(config, store, Box::new(host))?.with_clock(Box::new(clock.clone()));

    let migrated = engine.bootstrap()?;
    if !migrated.is_empty() {
        println!("  migrated legacy offers: {migrated:?}");
    }
    if engine.offers().count()? == 0 {
        seed_demo_offers(&engine, &products)?;
    }

    let traffic = TrafficConfig {
        seed,
        visitors,
        known_customers,
        ..TrafficConfig::default()
    };
    let report = TrafficSimulator::new(&engine, clock, &products, traffic).run();
    print_summary(&engine, &report)?;
    Ok(())
}

fn run_ipc_loop(engine: &UpsellEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string() });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };

        let response = match cmd {
            IpcCommand::Quit => break,
            IpcCommand::Eligible { offer_type, context } => {
                serde_json::json!({ "offer": engine.eligible_offer(offer_type, &context) })
            }
            IpcCommand::ResolveVariant { offer_id, user_id, session_id, remote_addr } => {
                let visitor = VisitorIdentity { user_id, session_id, remote_addr };
                serde_json::json!({ "variant": engine.resolve_variant(offer_id, &visitor) })
            }
            IpcCommand::TrackEvent { action, interaction, revenue } => {
                let recorded = match action.as_str() {
                    "view" => engine.record_view(&interaction),
                    "accept" => engine.record_accept(&interaction, revenue),
                    "accept_click" => engine.record_accept_click(&interaction),
                    "skip" => engine.record_skip(&interaction),
                    other => {
                        log::warn!("Unknown action: {other}");
                        false
                    }
                };
                serde_json::json!({ "recorded": recorded })
            }
            IpcCommand::Summary { filters } => serde_json::to_value(engine.summary(&filters))?,
            IpcCommand::TopOffers { limit, filters } => {
                serde_json::json!({ "offers": engine.top_offers(limit, &filters) })
            }
        };
        writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
        stdout.flush()?;
    }
    Ok(())
}

fn seed_demo_offers(engine: &UpsellEngine, products: &[Product]) -> Result<()> {
    let mut ids = products.iter().map(|p| p.id);
    let (Some(first), Some(second), Some(third)) = (ids.next(), ids.next(), ids.next()) else {
        log::warn!("demo catalog needs at least three products; no offers seeded");
        return Ok(());
    };

    let repository = engine.offers();
    repository.save(
        OfferPayload {
            name: Some("Protection plan bump".into()),
            offer_type: Some("checkout".into()),
            product_id: Some(first),
            discount_type: Some("percent".into()),
            discount_value: Some(20.0),
            title: Some("Add a protection plan".into()),
            min_cart_total: Some(20.0),
            ab_testing_enabled: Some(true),
            ab_auto_winner: Some(true),
            ab_min_views: Some(50),
            ab_variant_b_title: Some("Protect your order for less".into()),
            ab_variant_b_discount_value: Some(30.0),
            ..OfferPayload::default()
        },
        None,
    )?;
    repository.save(
        OfferPayload {
            name: Some("Cart add-on".into()),
            offer_type: Some("cart".into()),
            product_id: Some(second),
            discount_type: Some("fixed".into()),
            discount_value: Some(2.0),
            title: Some("Customers also grab this".into()),
            skip_if_in_cart: Some(true),
            bundle_mode: Some("fbt".into()),
            ..OfferPayload::default()
        },
        None,
    )?;
    repository.save(
        OfferPayload {
            name: Some("Thank-you upsell".into()),
            offer_type: Some("post_purchase".into()),
            product_id: Some(third),
            discount_type: Some("percent".into()),
            discount_value: Some(15.0),
            title: Some("One more thing".into()),
            countdown_mode: Some("evergreen".into()),
            countdown_minutes: Some(10),
            ..OfferPayload::default()
        },
        None,
    )?;
    println!("  seeded 3 demo offers");
    Ok(())
}

fn demo_host() -> InMemoryHost {
    let product = |id: i64, name: &str, price: f64, category: i64| Product {
        id,
        name: name.to_string(),
        price,
        category_ids: vec![category],
        tag_ids: Vec::new(),
        short_description: String::new(),
    };
    let mut host = InMemoryHost::default()
        .with_product(product(101, "Protection plan", 9.99, 1))
        .with_product(product(102, "Cable organiser", 6.50, 2))
        .with_product(product(103, "Travel case", 24.00, 2))
        .with_product(product(104, "Wireless charger", 29.00, 3))
        .with_product(product(105, "Screen cleaner", 4.25, 3));
    host.related.insert(102, vec![104, 105, 102]);
    host
}

fn print_summary(engine: &UpsellEngine, report: &upsell_core::traffic::TrafficReport) -> Result<()> {
    let filters = AnalyticsFilters::default();
    let summary = engine.summary(&filters);

    println!("=== TRAFFIC ===");
    println!("  visitors:        {}", report.visitors);
    println!("  orders:          {}", report.orders);
    println!("  offers shown:    {} (a: {}, b: {})", report.offers_shown, report.shown_a, report.shown_b);
    println!("  accepted:        {}", report.accepts);
    println!("  skipped:         {}", report.skips);
    println!("  dismissed:       {}", report.dismissals);

    println!();
    println!("=== ANALYTICS ===");
    println!("  views:           {}", summary.views);
    println!("  conversions:     {}", summary.conversions);
    println!("  conversion rate: {:.2}%", summary.conversion_rate);
    println!("  revenue:         ${:.2}", summary.revenue);

    println!();
    println!("=== TOP OFFERS ===");
    let top = engine.top_offers(5, &filters);
    if top.is_empty() {
        println!("  (No offer activity recorded)");
    }
    for row in &top {
        let name = engine
            .offers()
            .get(row.offer_id)?
            .map(|o| o.name)
            .unwrap_or_else(|| "(deleted)".to_string());
        println!(
            "  #{:<4} {:<14} {:<28} views {:>5} | conv {:>4} | ${:.2}",
            row.offer_id, row.offer_type, name, row.views, row.conversions, row.revenue
        );
    }
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
