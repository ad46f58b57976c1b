//! # Page Driver — Headless Browser Adapter
//!
//! Hides every DOM quirk of the remote pricing page behind the small, typed
//! surface described in the component design: two catalog observations, two
//! filter setters, and one row iterator. Built on `chromiumoxide` (a Chrome
//! DevTools Protocol client), the only headless-browser crate grounded
//! anywhere in the retrieved reference pack.
//!
//! ## Table state machine
//!
//! `select_os`/`select_region` force `Iterating -> Filtered`; `iterate_rows`
//! transitions `Filtered -> Iterating -> Filtered` on completion, performing
//! an explicit page-1 reset before reading the paginator (§4.3 — "pages like
//! to start on an arbitrary index").
//!
//! ## Filter discovery
//!
//! Dropdowns are located once per driver by scanning elements tagged with
//! `data-analytics-field-label`, not by positional indices, and the result is
//! kept as a typed map so no call site builds selector strings itself
//! (Design Notes, "Dynamic attribute lookups for DOM selectors").

use crate::error::EngineError;
use crate::record::RawRow;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

/// Bound on a single filter-change or page-turn visibility wait (§5).
pub const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);
/// Fixed settle delay following each interaction (§4.3: "≤1 second").
pub const SETTLE_DELAY: Duration = Duration::from_millis(750);

fn region_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z]{2}(-gov)?-[a-z]+-[1-9]$").unwrap())
}

/// The three states of §4.3's table state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Unfiltered,
    Filtered,
    Iterating,
}

/// A button selector paired with the options-listbox selector it toggles,
/// discovered once per driver from the page's analytics attributes.
#[derive(Debug, Clone)]
pub struct DropdownSelectors {
    pub button: String,
    pub options: String,
}

/// `category -> (button_selector, options_selector)`, built once per driver.
pub type FilterMap = HashMap<String, DropdownSelectors>;

/// Public surface the Worker drives. Object-safe so tests can substitute a
/// fake implementation without a live browser (§8's testable properties).
#[async_trait]
pub trait PageDriver: Send {
    async fn list_regions(&mut self) -> Result<Vec<String>, EngineError>;
    async fn list_operating_systems(&mut self) -> Result<Vec<String>, EngineError>;
    async fn select_os(&mut self, name: &str) -> Result<(), EngineError>;
    async fn select_region(&mut self, name: &str) -> Result<(), EngineError>;

    /// Yields every row across every page of the currently filtered table,
    /// starting from an explicit page-1 reset, in the table's own order.
    /// Finite; single-pass per call.
    async fn iterate_rows(&mut self) -> Result<Vec<[String; 6]>, EngineError>;

    /// Current table state, for worker-side assertions and tests.
    fn state(&self) -> TableState;
}

#[async_trait]
impl PageDriver for Box<dyn PageDriver> {
    async fn list_regions(&mut self) -> Result<Vec<String>, EngineError> {
        (**self).list_regions().await
    }
    async fn list_operating_systems(&mut self) -> Result<Vec<String>, EngineError> {
        (**self).list_operating_systems().await
    }
    async fn select_os(&mut self, name: &str) -> Result<(), EngineError> {
        (**self).select_os(name).await
    }
    async fn select_region(&mut self, name: &str) -> Result<(), EngineError> {
        (**self).select_region(name).await
    }
    async fn iterate_rows(&mut self) -> Result<Vec<[String; 6]>, EngineError> {
        (**self).iterate_rows().await
    }
    fn state(&self) -> TableState {
        (**self).state()
    }
}

/// `chromiumoxide`-backed Page Driver for the on-demand pricing page.
pub struct ChromePageDriver {
    browser: Browser,
    page: chromiumoxide::Page,
    filters: FilterMap,
    state: TableState,
}

impl ChromePageDriver {
    /// Launches a headless Chrome instance, navigates to `url`, waits for the
    /// pricing iframe's sentinel element, and discovers the filter dropdowns.
    /// Returns a driver already in `Unfiltered` state.
    pub async fn launch(url: &str, headless: bool, window: (u32, u32)) -> Result<Self, EngineError> {
        let config = BrowserConfig::builder()
            .window_size(window.0, window.1)
            .with_head_if(!headless)
            .build()
            .map_err(|e| EngineError::Driver(format!("browser config: {e}")))?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| EngineError::Driver(format!("browser launch: {e}")))?;
        tokio::spawn(async move { while handler.next().await.is_some() {} });

        let page = browser
            .new_page(url)
            .await
            .map_err(|e| EngineError::Driver(format!("navigate: {e}")))?;
        wait_for_sentinel(&page, "#iFrameResizer0").await?;
        scroll_into_view(&page, "[data-analytics-track='pricing-sidebar']").await?;

        let filters = discover_filters(&page).await?;
        Ok(ChromePageDriver {
            browser,
            page,
            filters,
            state: TableState::Unfiltered,
        })
    }

    async fn options_for(&self, category: &str) -> Result<Vec<String>, EngineError> {
        let selectors = self
            .filters
            .get(category)
            .ok_or_else(|| EngineError::Driver(format!("no dropdown discovered for {category}")))?;
        read_option_texts(&self.page, &selectors.options).await
    }

    async fn select(&mut self, category: &str, needle: &str) -> Result<(), EngineError> {
        let selectors = self
            .filters
            .get(category)
            .ok_or_else(|| EngineError::Driver(format!("no dropdown discovered for {category}")))?
            .clone();
        click(&self.page, &selectors.button).await?;
        wait_for_sentinel(&self.page, &selectors.options).await?;
        let matched = click_option_containing(&self.page, &selectors.options, needle).await?;
        if !matched {
            return Err(EngineError::Driver(format!("option {needle:?} not found in {category}")));
        }
        tokio::time::sleep(SETTLE_DELAY).await;
        self.state = TableState::Filtered;
        Ok(())
    }
}

#[async_trait]
impl PageDriver for ChromePageDriver {
    async fn list_regions(&mut self) -> Result<Vec<String>, EngineError> {
        let all = self.options_for("region").await?;
        Ok(all.into_iter().filter(|r| region_regex().is_match(r)).collect())
    }

    async fn list_operating_systems(&mut self) -> Result<Vec<String>, EngineError> {
        self.options_for("operating_system").await
    }

    async fn select_os(&mut self, name: &str) -> Result<(), EngineError> {
        let catalog = self.list_operating_systems().await?;
        if !catalog.iter().any(|c| c == name) {
            return Err(EngineError::Driver(format!("UnknownOS: {name}")));
        }
        self.select("operating_system", name).await
    }

    async fn select_region(&mut self, name: &str) -> Result<(), EngineError> {
        let catalog = self.list_regions().await?;
        if !catalog.iter().any(|c| c == name) {
            return Err(EngineError::Driver(format!("UnknownRegion: {name}")));
        }
        self.select("region", name).await
    }

    async fn iterate_rows(&mut self) -> Result<Vec<[String; 6]>, EngineError> {
        self.state = TableState::Iterating;
        reset_to_page_one(&self.page).await?;
        let total_pages = read_total_pages(&self.page).await?;

        let mut rows = Vec::new();
        for page_index in 1..=total_pages {
            let page_rows = read_current_page_rows(&self.page).await?;
            rows.extend(page_rows);
            if page_index < total_pages {
                click_next_page(&self.page).await?;
                wait_for_sentinel(&self.page, "tbody tr").await?;
                tokio::time::sleep(SETTLE_DELAY).await;
            }
        }

        self.state = TableState::Filtered;
        Ok(rows)
    }

    fn state(&self) -> TableState {
        self.state
    }
}

/// Launches a fresh Page Driver on demand: once per short-lived catalog
/// resolution and once per long-lived Worker (§4.4, §4.6).
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, EngineError>;
}

pub struct ChromeDriverFactory {
    pub url: String,
    pub headless: bool,
    pub window: (u32, u32),
}

#[async_trait]
impl DriverFactory for ChromeDriverFactory {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, EngineError> {
        let driver = ChromePageDriver::launch(&self.url, self.headless, self.window).await?;
        Ok(Box::new(driver))
    }
}

impl Drop for ChromePageDriver {
    fn drop(&mut self) {
        // Best-effort; a dropped handler task will also observe the browser
        // going away. Session teardown failures are not fatal to the run.
        let _ = &self.browser;
    }
}

/// Scans the page for elements tagged with `data-analytics-field-label`,
/// deriving a button/options selector pair per discovered category. This is
/// the one step that reads DOM-injected analytics attributes; everything
/// downstream works off the resulting typed map.
async fn discover_filters(page: &chromiumoxide::Page) -> Result<FilterMap, EngineError> {
    let script = r#"
        Array.from(document.querySelectorAll('[data-analytics-field-label]')).map(el => ({
            category: el.getAttribute('data-analytics-field-label'),
            button: el.getAttribute('data-selector-button') || '',
            options: el.getAttribute('data-selector-options') || '',
        }))
    "#;
    let raw: serde_json::Value = page
        .evaluate(script)
        .await
        .map_err(|e| EngineError::Driver(format!("filter discovery: {e}")))?
        .into_value()
        .map_err(|e| EngineError::Driver(format!("filter discovery decode: {e}")))?;

    let mut map = FilterMap::new();
    if let Some(entries) = raw.as_array() {
        for entry in entries {
            let category = entry.get("category").and_then(|v| v.as_str()).unwrap_or_default();
            let button = entry.get("button").and_then(|v| v.as_str()).unwrap_or_default();
            let options = entry.get("options").and_then(|v| v.as_str()).unwrap_or_default();
            if !category.is_empty() && !button.is_empty() && !options.is_empty() {
                map.insert(
                    normalize_category(category),
                    DropdownSelectors {
                        button: button.to_string(),
                        options: options.to_string(),
                    },
                );
            }
        }
    }
    if !map.contains_key("region") || !map.contains_key("operating_system") {
        return Err(EngineError::Catalog(
            "page did not expose region/operating_system dropdowns".into(),
        ));
    }
    Ok(map)
}

fn normalize_category(label: &str) -> String {
    label.to_lowercase().replace(' ', "_")
}

async fn wait_for_sentinel(page: &chromiumoxide::Page, selector: &str) -> Result<(), EngineError> {
    tokio::time::timeout(VISIBILITY_TIMEOUT, page.find_element(selector))
        .await
        .map_err(|_| EngineError::Driver(format!("timed out waiting for {selector}")))?
        .map_err(|e| EngineError::Driver(format!("{selector} not found: {e}")))?;
    Ok(())
}

async fn scroll_into_view(page: &chromiumoxide::Page, selector: &str) -> Result<(), EngineError> {
    if let Ok(el) = page.find_element(selector).await {
        let _ = el.scroll_into_view().await;
    }
    Ok(())
}

async fn click(page: &chromiumoxide::Page, selector: &str) -> Result<(), EngineError> {
    let el = page
        .find_element(selector)
        .await
        .map_err(|e| EngineError::Driver(format!("{selector} not found: {e}")))?;
    el.click()
        .await
        .map_err(|e| EngineError::Driver(format!("click {selector} failed: {e}")))?;
    Ok(())
}

async fn read_option_texts(page: &chromiumoxide::Page, options_selector: &str) -> Result<Vec<String>, EngineError> {
    let script = format!(
        "Array.from(document.querySelectorAll('{options_selector} li')).map(li => li.textContent.trim())"
    );
    let values: Vec<String> = page
        .evaluate(script.as_str())
        .await
        .map_err(|e| EngineError::Driver(format!("reading options: {e}")))?
        .into_value()
        .map_err(|e| EngineError::Driver(format!("decoding options: {e}")))?;
    Ok(values)
}

async fn click_option_containing(
    page: &chromiumoxide::Page,
    options_selector: &str,
    needle: &str,
) -> Result<bool, EngineError> {
    let script = format!(
        r#"(() => {{
            const items = Array.from(document.querySelectorAll('{options_selector} li'));
            const match = items.find(li => li.textContent.includes({needle:?}));
            if (match) {{ match.click(); return true; }}
            return false;
        }})()"#,
        needle = needle,
    );
    let matched: bool = page
        .evaluate(script.as_str())
        .await
        .map_err(|e| EngineError::Driver(format!("selecting option: {e}")))?
        .into_value()
        .map_err(|e| EngineError::Driver(format!("decoding selection result: {e}")))?;
    Ok(matched)
}

/// Explicit reset to page 1, per §4.3: "the page may start on an arbitrary
/// index after filter changes."
async fn reset_to_page_one(page: &chromiumoxide::Page) -> Result<(), EngineError> {
    let script = r#"(() => {
        const first = document.querySelector('[data-analytics-action="paginator-first"]');
        if (first) first.click();
        return true;
    })()"#;
    let _: bool = page
        .evaluate(script)
        .await
        .map_err(|e| EngineError::Driver(format!("page reset: {e}")))?
        .into_value()
        .unwrap_or(false);
    tokio::time::sleep(SETTLE_DELAY).await;
    Ok(())
}

async fn read_total_pages(page: &chromiumoxide::Page) -> Result<u32, EngineError> {
    let script = r#"(() => {
        const last = document.querySelector('[data-analytics-action="paginator-last"]');
        if (!last) return 1;
        const n = parseInt(last.textContent.trim(), 10);
        return Number.isFinite(n) && n > 0 ? n : 1;
    })()"#;
    page.evaluate(script)
        .await
        .map_err(|e| EngineError::Driver(format!("reading page count: {e}")))?
        .into_value()
        .map_err(|e| EngineError::Driver(format!("decoding page count: {e}")))
}

async fn read_current_page_rows(page: &chromiumoxide::Page) -> Result<Vec<[String; 6]>, EngineError> {
    let script = r#"
        Array.from(document.querySelectorAll('tbody tr')).map(tr =>
            Array.from(tr.querySelectorAll('td')).map(td => td.textContent.trim())
        )
    "#;
    let raw: Vec<Vec<String>> = page
        .evaluate(script)
        .await
        .map_err(|e| EngineError::Driver(format!("reading rows: {e}")))?
        .into_value()
        .map_err(|e| EngineError::Driver(format!("decoding rows: {e}")))?;

    raw.into_iter()
        .map(|cells| {
            let arr: [String; 6] = cells
                .try_into()
                .map_err(|c: Vec<String>| EngineError::Driver(format!("row had {} cells, expected 6", c.len())))?;
            Ok(arr)
        })
        .collect()
}

async fn click_next_page(page: &chromiumoxide::Page) -> Result<(), EngineError> {
    click(page, "[data-analytics-action='paginator-next']").await
}

/// Converts a raw six-cell row into the `RawRow` shape `Record::normalize`
/// expects, preserving the table's own column order.
pub fn as_raw_row(cells: &[String; 6]) -> RawRow<'_> {
    RawRow {
        instance_type: &cells[0],
        cost_per_hour: &cells[1],
        cpu_count: &cells[2],
        ram: &cells[3],
        storage_description: &cells[4],
        network_description: &cells[5],
    }
}
