//! Data models for scraped products, batch bookkeeping and Telegram payloads

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

const NAME_MAX_CHARS: usize = 250;
const DESCRIPTION_MAX_CHARS: usize = 5000;
const DISCOUNT_MAX_CHARS: usize = 50;

const REQUIRED: &str = "This field is required.";
const BLANK: &str = "This field may not be blank.";
const INVALID_INTEGER: &str = "A valid integer is required.";
const INVALID_URL: &str = "Enter a valid URL.";

/// The site's numeric key for one listing item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub i64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fields pulled out of a product detail page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    Price,
    Description,
    ImageUrl,
    Discount,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Name,
        Field::Price,
        Field::Description,
        Field::ImageUrl,
        Field::Discount,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Price => "price",
            Field::Description => "description",
            Field::ImageUrl => "image_url",
            Field::Discount => "discount",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unvalidated extraction result for one detail page.
///
/// A field that was never set and a field set to `None` mean the same thing:
/// the extractor could not find it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RawFieldMap {
    values: BTreeMap<Field, Option<String>>,
}

impl RawFieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: Field, value: Option<String>) {
        self.values.insert(field, value);
    }

    pub fn with(mut self, field: Field, value: impl Into<String>) -> Self {
        self.set(field, Some(value.into()));
        self
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.values.get(&field).and_then(|v| v.as_deref())
    }

    /// Fields with no extracted value
    pub fn missing(&self) -> Vec<Field> {
        Field::ALL
            .into_iter()
            .filter(|field| self.get(*field).is_none())
            .collect()
    }
}

/// Validation messages keyed by field name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.add(field, message);
        errors
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{field}: {}", messages.join(" "))?;
        }
        Ok(())
    }
}

/// A fully validated product. Only [`ProductRecord::validate`] builds one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductRecord {
    name: String,
    price: i64,
    description: Option<String>,
    image_url: String,
    discount: Option<String>,
    external_id: ItemId,
    fetched_at: DateTime<Utc>,
}

impl ProductRecord {
    /// Validate a raw field map into a record, collecting every field error
    pub fn validate(
        external_id: ItemId,
        raw: &RawFieldMap,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self, FieldErrors> {
        let mut errors = FieldErrors::default();

        let name = required_text(raw, Field::Name, NAME_MAX_CHARS, &mut errors);
        let price = match trimmed(raw, Field::Price) {
            None => {
                errors.add(Field::Price.as_str(), REQUIRED);
                None
            }
            Some(text) => match text.parse::<i64>() {
                Ok(value) if i32::try_from(value).is_ok() => Some(value),
                Ok(value) if value > 0 => {
                    errors.add(
                        Field::Price.as_str(),
                        format!("Ensure this value is less than or equal to {}.", i32::MAX),
                    );
                    None
                }
                Ok(_) => {
                    errors.add(
                        Field::Price.as_str(),
                        format!("Ensure this value is greater than or equal to {}.", i32::MIN),
                    );
                    None
                }
                Err(_) => {
                    errors.add(Field::Price.as_str(), INVALID_INTEGER);
                    None
                }
            },
        };
        let description = optional_text(raw, Field::Description, DESCRIPTION_MAX_CHARS, &mut errors);
        let image_url = match trimmed(raw, Field::ImageUrl) {
            None => {
                errors.add(Field::ImageUrl.as_str(), REQUIRED);
                None
            }
            Some("") => {
                errors.add(Field::ImageUrl.as_str(), BLANK);
                None
            }
            Some(text) => match Url::parse(text) {
                Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {
                    Some(text.to_string())
                }
                _ => {
                    errors.add(Field::ImageUrl.as_str(), INVALID_URL);
                    None
                }
            },
        };
        let discount = optional_text(raw, Field::Discount, DISCOUNT_MAX_CHARS, &mut errors);

        match (name, price, image_url) {
            (Some(name), Some(price), Some(image_url)) if errors.is_empty() => Ok(Self {
                name,
                price,
                description,
                image_url,
                discount,
                external_id,
                fetched_at,
            }),
            _ => Err(errors),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> i64 {
        self.price
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn image_url(&self) -> &str {
        &self.image_url
    }

    pub fn discount(&self) -> Option<&str> {
        self.discount.as_deref()
    }

    pub fn external_id(&self) -> ItemId {
        self.external_id
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

fn trimmed(raw: &RawFieldMap, field: Field) -> Option<&str> {
    raw.get(field).map(str::trim)
}

fn too_long(max: usize) -> String {
    format!("Ensure this field has no more than {max} characters.")
}

fn required_text(
    raw: &RawFieldMap,
    field: Field,
    max: usize,
    errors: &mut FieldErrors,
) -> Option<String> {
    match trimmed(raw, field) {
        None => {
            errors.add(field.as_str(), REQUIRED);
            None
        }
        Some("") => {
            errors.add(field.as_str(), BLANK);
            None
        }
        Some(text) if text.chars().count() > max => {
            errors.add(field.as_str(), too_long(max));
            None
        }
        Some(text) => Some(text.to_string()),
    }
}

fn optional_text(
    raw: &RawFieldMap,
    field: Field,
    max: usize,
    errors: &mut FieldErrors,
) -> Option<String> {
    match trimmed(raw, field) {
        None | Some("") => None,
        Some(text) if text.chars().count() > max => {
            errors.add(field.as_str(), too_long(max));
            None
        }
        Some(text) => Some(text.to_string()),
    }
}

/// One item that could not be turned into a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub id: ItemId,
    pub errors: FieldErrors,
}

/// A record after the store assigned it a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredProduct {
    pub key: i64,
    pub record: ProductRecord,
}

/// Name and identifier of a stored product, for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductSummary {
    pub name: String,
    pub external_id: ItemId,
}

/// Everything one batch accumulated before it is handed to the store
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub fetched_at: DateTime<Utc>,
    pub requested: usize,
    pub records: Vec<ProductRecord>,
    pub failures: Vec<ItemFailure>,
}

impl BatchResult {
    pub fn new(requested: usize, fetched_at: DateTime<Utc>) -> Self {
        Self {
            fetched_at,
            requested,
            records: Vec::new(),
            failures: Vec::new(),
        }
    }
}

/// What the triggering caller gets back from a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchReport {
    Completed {
        requested: usize,
        saved: usize,
        failures: Vec<ItemFailure>,
    },
    Aborted {
        requested: usize,
        reason: String,
        failures: Vec<ItemFailure>,
    },
}

impl BatchReport {
    pub fn saved(&self) -> usize {
        match self {
            BatchReport::Completed { saved, .. } => *saved,
            BatchReport::Aborted { .. } => 0,
        }
    }

    pub fn failures(&self) -> &[ItemFailure] {
        match self {
            BatchReport::Completed { failures, .. } | BatchReport::Aborted { failures, .. } => {
                failures
            }
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, BatchReport::Aborted { .. })
    }

    /// Human-readable summary sent as the batch's completion notification
    pub fn summary(&self) -> String {
        let (mut message, failures) = match self {
            BatchReport::Completed {
                requested,
                saved,
                failures,
            } => {
                let head = if failures.is_empty() {
                    "Seller parsing finished."
                } else {
                    "Seller parsing finished with errors."
                };
                (format!("{head}\nRequested: {requested}. Saved: {saved}."), failures)
            }
            BatchReport::Aborted {
                requested,
                reason,
                failures,
            } => (
                format!("Seller parsing aborted: {reason}\nRequested: {requested}. Saved: 0."),
                failures,
            ),
        };

        if !failures.is_empty() {
            message.push_str(&format!("\nFailed: {}.", failures.len()));
            for failure in failures {
                message.push_str(&format!("\n- {}: {}", failure.id, failure.errors));
            }
        }
        message
    }
}

/// Telegram Bot API `sendMessage` payload
#[derive(Debug, Serialize)]
pub struct TelegramMessage {
    pub chat_id: String,
    pub text: String,
    pub disable_web_page_preview: bool,
}
