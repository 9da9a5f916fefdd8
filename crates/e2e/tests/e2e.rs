//! Browser scenarios against the Sauce Demo storefront
//!
//! Skips unless `SAUCEDEMO_E2E=1` or `--run` is given.
//! Run with: SAUCEDEMO_E2E=1 cargo test --package saucedemo-e2e --test e2e -- --profile debug

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use futures::FutureExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use saucedemo_e2e::accessibility::{audit_form_controls, audit_images};
use saucedemo_e2e::driver::PlaywrightDriver;
use saucedemo_e2e::{
    expect, expect_page, E2eError, E2eResult, Page, Profile, Suite, SuiteConfig, TestCase, TestRunner,
};

#[derive(Parser, Debug)]
#[command(name = "saucedemo-e2e")]
#[command(about = "Browser E2E tests for Sauce Demo")]
#[command(ignore_errors = true)]
struct Args {
    /// Run even when SAUCEDEMO_E2E is not set
    #[arg(long)]
    run: bool,

    /// Fail instead of skipping when Playwright is not installed
    #[arg(long)]
    require_browser: bool,

    /// ci runs headless, debug shows the browser
    #[arg(long, value_enum)]
    profile: Option<Profile>,

    /// Optional YAML configuration file
    #[arg(long, default_value = "e2e.yaml")]
    config: PathBuf,

    /// Application under test
    #[arg(long, env = "SAUCEDEMO_BASE_URL")]
    base_url: Option<String>,

    /// Directory for failure screenshots
    #[arg(long)]
    screenshot_dir: Option<PathBuf>,

    /// Output directory for results
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skip the reachability check before launching the browser
    #[arg(long)]
    no_preflight: bool,

    /// Run only tests whose name contains this
    #[arg(short, long)]
    name: Option<String>,

    /// Run only tests with this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn enabled(args: &Args) -> bool {
    args.run
        || std::env::var("SAUCEDEMO_E2E")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    if !enabled(&args) {
        info!("Skipping browser tests: set SAUCEDEMO_E2E=1 or pass --run");
        return ExitCode::SUCCESS;
    }

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = PlaywrightDriver::check_playwright_installed(&config.launch) {
        if args.require_browser {
            error!("Error: {}", e);
            return ExitCode::from(2);
        }
        warn!("Skipping browser tests: {}", e);
        return ExitCode::SUCCESS;
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ExitCode::from(2);
        }
    };

    match rt.block_on(async_main(&args, config)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("Error: {}", e);
            ExitCode::from(2)
        }
    }
}

/// File values first, then CLI overrides
fn build_config(args: &Args) -> E2eResult<SuiteConfig> {
    let mut config = SuiteConfig::load(&args.config)?;
    if let Some(profile) = args.profile {
        config.apply_profile(profile);
    }
    if let Some(base_url) = &args.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(dir) = &args.screenshot_dir {
        config.screenshot_dir = dir.clone();
    }
    if let Some(dir) = &args.output {
        config.output_dir = dir.clone();
    }
    if args.no_preflight {
        config.preflight = false;
    }
    config.validate()?;
    Ok(config)
}

async fn async_main(args: &Args, config: SuiteConfig) -> E2eResult<bool> {
    info!(
        "Profile {:?} against {} (headless: {})",
        config.profile, config.base_url, config.launch.headless
    );

    let suite = suite(Site::new(&config));
    let runner = TestRunner::with_config(config).with_filter(args.name.clone(), args.tag.clone());

    let results = runner.run(&suite).await?;
    runner.write_results(&results)?;

    for result in results.results.iter().filter(|r| !r.passed()) {
        if let Some(shot) = &result.screenshot {
            info!("{}: {} (sha256 {})", result.name, shot.path.display(), shot.sha256);
        }
    }
    Ok(results.success())
}

/// URLs of the storefront pages
#[derive(Debug, Clone)]
struct Site {
    base_url: String,
}

impl Site {
    fn new(config: &SuiteConfig) -> Self {
        Self {
            base_url: config.url(""),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn suite(site: Site) -> Suite {
    let mut suite = Suite::new();

    macro_rules! case {
        ($name:literal, [$($tag:literal),*], $body:ident) => {{
            let site = site.clone();
            suite.push(
                TestCase::new($name, move |page| $body(page, site.clone()).boxed())
                    .with_tags(&[$($tag),*]),
            );
        }};
    }

    case!("test_login_success", ["smoke", "login"], login_success);
    case!("test_login_invalid_credentials", ["login"], login_invalid_credentials);
    case!("test_login_locked_out_user", ["login"], login_locked_out_user);
    case!("test_add_to_cart_and_checkout", ["smoke", "cart"], add_to_cart_and_checkout);
    case!(
        "test_inventory_listing_and_product_detail",
        ["inventory"],
        inventory_listing_and_product_detail
    );
    case!("test_login_form_accessibility", ["a11y"], login_form_accessibility);
    case!("test_inventory_images_have_alt_text", ["a11y"], inventory_images_have_alt_text);
    suite
}

async fn login(page: &Page, site: &Site, username: &str, password: &str) -> E2eResult<()> {
    page.goto(&site.url("")).await?;
    page.locator("[data-test=\"username\"]").fill(username).await?;
    page.locator("[data-test=\"password\"]").fill(password).await?;
    page.locator("[data-test=\"login-button\"]").click().await
}

async fn login_success(page: &Page, site: Site) -> E2eResult<()> {
    login(page, &site, "standard_user", "secret_sauce").await?;

    expect_page(page).to_have_url(site.url("inventory.html")).await?;
    expect(&page.locator(".title")).to_have_text("Products").await
}

async fn login_invalid_credentials(page: &Page, site: Site) -> E2eResult<()> {
    login(page, &site, "invalid_user", "wrong_password").await?;

    let error = page.locator("[data-test=\"error\"]");
    expect(&error).to_be_visible().await?;
    expect(&error)
        .to_contain_text("Username and password do not match")
        .await
}

async fn login_locked_out_user(page: &Page, site: Site) -> E2eResult<()> {
    login(page, &site, "locked_out_user", "secret_sauce").await?;

    expect(&page.locator("[data-test=\"error\"]"))
        .to_have_text("Epic sadface: Sorry, this user has been locked out.")
        .await
}

async fn add_to_cart_and_checkout(page: &Page, site: Site) -> E2eResult<()> {
    login(page, &site, "standard_user", "secret_sauce").await?;
    expect_page(page).to_have_url(site.url("inventory.html")).await?;

    page.locator("[data-test=\"add-to-cart-sauce-labs-backpack\"]")
        .click()
        .await?;
    expect(&page.locator(".shopping_cart_badge")).to_have_text("1").await?;

    page.locator(".shopping_cart_link").click().await?;
    expect_page(page).to_have_url(site.url("cart.html")).await?;
    expect(&page.locator(".cart_item")).to_have_count(1).await?;

    page.locator("[data-test=\"checkout\"]").click().await?;
    expect_page(page)
        .to_have_url(site.url("checkout-step-one.html"))
        .await
}

async fn inventory_listing_and_product_detail(page: &Page, site: Site) -> E2eResult<()> {
    login(page, &site, "standard_user", "secret_sauce").await?;
    expect_page(page).to_have_url(site.url("inventory.html")).await?;
    expect(&page.locator(".title")).to_have_text("Products").await?;

    let products = page.locator(".inventory_item");
    expect(&products).to_have_count(6).await?;

    let first = products.first();
    for part in [".inventory_item_name", ".inventory_item_desc", ".inventory_item_price"] {
        expect(&first.locator(part)).to_be_visible().await?;
    }

    first.locator(".inventory_item_name").click().await?;

    for part in [
        ".inventory_details_name",
        ".inventory_details_desc",
        ".inventory_details_price",
        "[data-test=\"back-to-products\"]",
    ] {
        expect(&page.locator(part)).to_be_visible().await?;
    }
    Ok(())
}

async fn login_form_accessibility(page: &Page, site: Site) -> E2eResult<()> {
    page.goto(&site.url("")).await?;
    expect(&page.locator("[data-test=\"login-button\"]")).to_be_visible().await?;

    let report = audit_form_controls(page, "#login_button_container input:not([type=\"submit\"])").await?;
    if report.checked < 2 {
        return Err(E2eError::AssertionFailed(format!(
            "expected username and password fields, found {} control(s)",
            report.checked
        )));
    }
    report.assert_clean()
}

async fn inventory_images_have_alt_text(page: &Page, site: Site) -> E2eResult<()> {
    login(page, &site, "standard_user", "secret_sauce").await?;
    expect(&page.locator(".inventory_item")).to_have_count(6).await?;

    let report = audit_images(page, ".inventory_item img").await?;
    if report.checked != 6 {
        return Err(E2eError::AssertionFailed(format!(
            "expected 6 product images, found {}",
            report.checked
        )));
    }
    report.assert_clean()
}
