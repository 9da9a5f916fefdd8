//! Basic accessibility checks run from inside a test body

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{E2eError, E2eResult};
use crate::page::{Locator, Page};

pub const FORM_CONTROLS: &str = "input:not([type=\"hidden\"]), select, textarea";
pub const IMAGES: &str = "img";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rule {
    /// Form control has aria-label, aria-labelledby or placeholder
    ControlName,
    /// Image has a non-empty alt attribute
    ImageAlt,
}

impl Rule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::ControlName => "control-name",
            Rule::ImageAlt => "image-alt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: Rule,
    /// Locator of the offending element
    pub target: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.rule.as_str(), self.target)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub checked: usize,
    pub violations: Vec<Violation>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn merge(mut self, other: AuditReport) -> Self {
        self.checked += other.checked;
        self.violations.extend(other.violations);
        self
    }

    /// Fail with every violation listed
    pub fn assert_clean(&self) -> E2eResult<()> {
        if self.is_clean() {
            return Ok(());
        }
        let listed: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
        Err(E2eError::AssertionFailed(format!(
            "{} accessibility violation(s) in {} element(s): {}",
            self.violations.len(),
            self.checked,
            listed.join(", ")
        )))
    }
}

async fn has_non_empty(locator: &Locator, attribute: &str) -> E2eResult<bool> {
    Ok(locator
        .get_attribute(attribute)
        .await?
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false))
}

/// Every element matching `selector` must expose a name through
/// `aria-label`, `aria-labelledby` or `placeholder`
pub async fn audit_form_controls(page: &Page, selector: &str) -> E2eResult<AuditReport> {
    let controls = page.locator(selector);
    let count = controls.count().await?;
    let mut report = AuditReport {
        checked: count,
        ..Default::default()
    };

    for i in 0..count {
        let control = controls.nth(i);
        let mut named = false;
        for attribute in ["aria-label", "aria-labelledby", "placeholder"] {
            if has_non_empty(&control, attribute).await? {
                named = true;
                break;
            }
        }
        if !named {
            report.violations.push(Violation {
                rule: Rule::ControlName,
                target: control.path().to_string(),
            });
        }
    }

    debug!("Checked {} form control(s) for accessible names", count);
    Ok(report)
}

/// Every element matching `selector` must carry non-empty alt text
pub async fn audit_images(page: &Page, selector: &str) -> E2eResult<AuditReport> {
    let images = page.locator(selector);
    let count = images.count().await?;
    let mut report = AuditReport {
        checked: count,
        ..Default::default()
    };

    for i in 0..count {
        let image = images.nth(i);
        if !has_non_empty(&image, "alt").await? {
            report.violations.push(Violation {
                rule: Rule::ImageAlt,
                target: image.path().to_string(),
            });
        }
    }

    debug!("Checked {} image(s) for alt text", count);
    Ok(report)
}

/// Form controls and images of the whole page
pub async fn audit_page(page: &Page) -> E2eResult<AuditReport> {
    let controls = audit_form_controls(page, FORM_CONTROLS).await?;
    let images = audit_images(page, IMAGES).await?;
    Ok(controls.merge(images))
}
