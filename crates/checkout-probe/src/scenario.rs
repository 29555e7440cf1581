//! Scenario variants and the queries each one asserts.
//!
//! Two variants share one harness:
//!
//! - [`ScenarioKind::PaymentLink`]: the product page carries exactly one
//!   anchor to the processor's hosted checkout, which opens in a new tab.
//! - [`ScenarioKind::InlineCheckout`]: the product page links to the site's
//!   own `/checkout` page in the same tab, which embeds the payment widgets.

use crate::assertion::ElementQuery;
use crate::selector::Selector;
use crate::telemetry::NetworkFilter;
use crate::viewport::ViewportPreset;
use serde::Serialize;

/// Default application under test
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Default product slug
pub const DEFAULT_PRODUCT: &str = "loom-video-downloader";

/// Default payment-processor domain
pub const DEFAULT_PROCESSOR_DOMAIN: &str = "stripe.com";

/// Default hosted-checkout host
pub const DEFAULT_CHECKOUT_HOST: &str = "buy.stripe.com";

/// Domains monitored in addition to the processor domain
pub const DEFAULT_EXTRA_DOMAINS: &[&str] = &["paypal.com"];

/// Href fragment of the deprecated internal checkout link
pub const LEGACY_CHECKOUT_PATTERN: &str = "/checkout?product=";

/// Path the inline variant must land on
pub const CHECKOUT_PATH: &str = "/checkout";

/// Ancestor id of the embedded payment iframe
pub const CHECKOUT_CONTAINER_ID: &str = "checkout";

/// Scenario variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum ScenarioKind {
    /// CTA opens the processor's hosted checkout in a new tab
    #[default]
    PaymentLink,
    /// CTA navigates the same tab to the site's checkout page
    InlineCheckout,
}

impl ScenarioKind {
    /// Kebab-case name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PaymentLink => "payment-link",
            Self::InlineCheckout => "inline-checkout",
        }
    }

    /// Invariants summarised at the end of a run, in report order
    #[must_use]
    pub const fn invariants(self) -> &'static [Invariant] {
        match self {
            Self::PaymentLink => &[
                Invariant::LegacyRemoved,
                Invariant::CtaPresent,
                Invariant::DestinationReached,
            ],
            Self::InlineCheckout => &[
                Invariant::LegacyRemoved,
                Invariant::CtaPresent,
                Invariant::DestinationReached,
                Invariant::WidgetsPresent,
            ],
        }
    }

    /// File-name stem of the page reached after the click
    #[must_use]
    pub const fn destination_page(self) -> &'static str {
        match self {
            Self::PaymentLink => "processor-page",
            Self::InlineCheckout => "checkout-page",
        }
    }
}

impl std::fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Run-level property summarised across both viewport passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Invariant {
    /// Deprecated checkout controls are gone from the product page
    LegacyRemoved,
    /// The expected checkout CTA is on the product page
    CtaPresent,
    /// Following the CTA lands on the expected destination
    DestinationReached,
    /// The checkout page shows its payment widgets
    WidgetsPresent,
}

impl Invariant {
    /// Report label under `kind`
    #[must_use]
    pub const fn label(self, kind: ScenarioKind) -> &'static str {
        match (self, kind) {
            (Self::LegacyRemoved, ScenarioKind::PaymentLink) => "legacy links removed",
            (Self::LegacyRemoved, ScenarioKind::InlineCheckout) => "legacy buttons removed",
            (Self::CtaPresent, ScenarioKind::PaymentLink) => "payment CTA present",
            (Self::CtaPresent, ScenarioKind::InlineCheckout) => "checkout link present",
            (Self::DestinationReached, ScenarioKind::PaymentLink) => "destination host correct",
            (Self::DestinationReached, ScenarioKind::InlineCheckout) => "checkout page reached",
            (Self::WidgetsPresent, _) => "payment widgets present",
        }
    }

    /// Whether the check must have passed in every pass, as opposed to every
    /// pass in which it ran
    #[must_use]
    pub const fn required_every_pass(self) -> bool {
        matches!(self, Self::LegacyRemoved | Self::CtaPresent)
    }
}

/// Which page a screenshot shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ShotStage {
    /// Product page before the click
    Product,
    /// Page reached after the click
    Destination,
}

/// File name of a screenshot: `<n>-<page>-<preset>.png`, numbered from 1 in
/// run order
#[must_use]
pub fn screenshot_name(
    kind: ScenarioKind,
    pass_index: usize,
    stage: ShotStage,
    preset: ViewportPreset,
) -> String {
    let (n, page) = match stage {
        ShotStage::Product => (pass_index * 2 + 1, "product-page"),
        ShotStage::Destination => (pass_index * 2 + 2, kind.destination_page()),
    };
    format!("{n}-{page}-{}.png", preset.name())
}

/// What to probe and where
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioConfig {
    /// Variant
    pub kind: ScenarioKind,
    /// Application base URL
    pub base_url: String,
    /// Product slug appended to the base URL
    pub product: String,
    /// Payment-processor domain, monitored in network telemetry
    pub processor_domain: String,
    /// Host the payment link must open
    pub checkout_host: String,
    /// Further domains monitored in network telemetry
    pub extra_domains: Vec<String>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self::new(ScenarioKind::default())
    }
}

impl ScenarioConfig {
    /// Configuration for `kind` with default targets
    #[must_use]
    pub fn new(kind: ScenarioKind) -> Self {
        Self {
            kind,
            base_url: DEFAULT_BASE_URL.to_string(),
            product: DEFAULT_PRODUCT.to_string(),
            processor_domain: DEFAULT_PROCESSOR_DOMAIN.to_string(),
            checkout_host: DEFAULT_CHECKOUT_HOST.to_string(),
            extra_domains: DEFAULT_EXTRA_DOMAINS.iter().map(ToString::to_string).collect(),
        }
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the product slug
    #[must_use]
    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = product.into();
        self
    }

    /// Set the processor domain
    #[must_use]
    pub fn with_processor_domain(mut self, domain: impl Into<String>) -> Self {
        self.processor_domain = domain.into();
        self
    }

    /// Set the hosted-checkout host
    #[must_use]
    pub fn with_checkout_host(mut self, host: impl Into<String>) -> Self {
        self.checkout_host = host.into();
        self
    }

    /// Replace the extra monitored domains
    #[must_use]
    pub fn with_extra_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    /// `<base-url>/<product>`
    #[must_use]
    pub fn entry_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.product.trim_start_matches('/')
        )
    }

    /// Prefix every payment-link CTA must start with
    #[must_use]
    pub fn checkout_prefix(&self) -> String {
        format!("https://{}", self.checkout_host)
    }

    /// Network filter over the processor domain and the extra domains
    #[must_use]
    pub fn network_filter(&self) -> NetworkFilter {
        NetworkFilter::new(
            std::iter::once(self.processor_domain.as_str())
                .chain(self.extra_domains.iter().map(String::as_str)),
        )
    }

    /// Controls that must be gone from the product page
    #[must_use]
    pub fn legacy_queries(&self) -> Vec<ElementQuery> {
        let label = Invariant::LegacyRemoved.label(self.kind);
        match self.kind {
            ScenarioKind::PaymentLink => vec![ElementQuery::absent(
                label,
                Selector::anchor_href_contains(LEGACY_CHECKOUT_PATTERN),
            )],
            ScenarioKind::InlineCheckout => vec![
                ElementQuery::absent(label, Selector::button_with_text("Pay with PayPal")),
                ElementQuery::absent(
                    label,
                    Selector::button_with_text("Get Instant Access with Card"),
                ),
            ],
        }
    }

    /// The checkout CTA on the product page
    #[must_use]
    pub fn cta_query(&self) -> ElementQuery {
        let label = Invariant::CtaPresent.label(self.kind);
        match self.kind {
            ScenarioKind::PaymentLink => ElementQuery::exactly_one(
                label,
                Selector::anchor_href_prefix(self.checkout_prefix()),
            ),
            ScenarioKind::InlineCheckout => ElementQuery::present(
                label,
                Selector::anchor_href_contains(LEGACY_CHECKOUT_PATTERN),
            ),
        }
    }

    /// Widgets the inline checkout page must show
    #[must_use]
    pub fn widget_queries(&self) -> Vec<ElementQuery> {
        match self.kind {
            ScenarioKind::PaymentLink => Vec::new(),
            ScenarioKind::InlineCheckout => vec![
                ElementQuery::present(
                    "Pay with Stripe button",
                    Selector::button_with_text("Pay with Stripe"),
                ),
                ElementQuery::present(
                    "Pay with PayPal button",
                    Selector::button_with_text("Pay with PayPal"),
                ),
                ElementQuery::present(
                    "checkout iframe",
                    Selector::tag("iframe").within(CHECKOUT_CONTAINER_ID),
                ),
            ],
        }
    }
}
