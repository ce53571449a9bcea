//! Field extraction from a product detail page

use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use super::{ScrapeError, compile, element_text};
use crate::config::{FieldSelectors, TagSelector};
use crate::models::{Field, RawFieldMap};

#[derive(Debug, Clone)]
struct CompiledField {
    field: Field,
    container: Selector,
    child: Option<Selector>,
    attr: Option<String>,
}

impl CompiledField {
    fn new(field: Field, selector: &TagSelector) -> Result<Self, ScrapeError> {
        Ok(Self {
            field,
            container: compile(field.as_str(), &selector.css())?,
            child: selector
                .child
                .as_deref()
                .map(|css| compile(field.as_str(), css))
                .transpose()?,
            attr: selector.attr.clone(),
        })
    }

    fn locate<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>> {
        let container = document.select(&self.container).next()?;
        match &self.child {
            Some(child) => container.select(child).next(),
            None => Some(container),
        }
    }

    fn read(&self, document: &Html) -> Option<String> {
        let element = self.locate(document)?;
        match &self.attr {
            Some(attr) => element.value().attr(attr).map(str::to_string),
            None => Some(element_text(element)),
        }
    }
}

/// Pulls the configured fields out of one detail document.
///
/// Every field is looked up on its own, so a missing element only blanks
/// that field.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    fields: Vec<CompiledField>,
}

impl FieldExtractor {
    pub fn new(selectors: &FieldSelectors) -> Result<Self, ScrapeError> {
        let fields: Vec<CompiledField> = Field::ALL
            .into_iter()
            .map(|field| CompiledField::new(field, selectors.get(field)))
            .collect::<Result<_, _>>()?;
        Ok(Self { fields })
    }

    pub fn extract(&self, html: &str) -> RawFieldMap {
        let document = Html::parse_document(html);
        let mut raw = RawFieldMap::new();

        for compiled in &self.fields {
            let value = compiled.read(&document).map(|text| match compiled.field {
                Field::Price => strip_unit(&text),
                Field::Description => text.nfkd().collect::<String>(),
                _ => text,
            });
            if value.is_none() {
                debug!("Field `{}` not found in detail page", compiled.field);
            }
            raw.set(compiled.field, value);
        }

        raw
    }
}

/// Drop the trailing unit token and glue the digit groups back together
fn strip_unit(text: &str) -> String {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    match tokens.split_last() {
        Some((_, rest)) => rest.concat(),
        None => String::new(),
    }
}
