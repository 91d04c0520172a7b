use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};
use url::Url;

use crate::error::{RuleError, ScrapeError};
use crate::job::{AttributeMode, ExtractionRules};

/// One field rule with its selector already parsed.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub name: String,
    pub selector_source: String,
    pub attribute: AttributeMode,
    selector: Selector,
}

/// A job's named and custom field rules, validated and ready to run.
#[derive(Debug, Clone, Default)]
pub struct CompiledRules {
    rules: Vec<CompiledRule>,
}

impl CompiledRules {
    pub fn compile(rules: &ExtractionRules) -> Result<Self, RuleError> {
        let named = rules
            .fields
            .iter()
            .map(|(name, rule)| (name.as_str(), rule.selector.as_str(), &rule.attribute));
        let custom = rules
            .custom
            .iter()
            .map(|field| (field.name.as_str(), field.selector.as_str(), &field.attribute));

        let mut seen = HashSet::new();
        let mut compiled = Vec::new();
        for (name, selector, attribute) in named.chain(custom) {
            let name = name.trim();
            let selector = selector.trim();
            if name.is_empty() {
                return Err(RuleError::EmptyName);
            }
            if selector.is_empty() {
                return Err(RuleError::EmptySelector(name.to_string()));
            }
            if !seen.insert(name.to_string()) {
                return Err(RuleError::DuplicateField(name.to_string()));
            }

            let parsed = Selector::parse(selector).map_err(|e| RuleError::InvalidSelector {
                field: name.to_string(),
                selector: selector.to_string(),
                message: format!("{:?}", e),
            })?;

            compiled.push(CompiledRule {
                name: name.to_string(),
                selector_source: selector.to_string(),
                attribute: attribute.clone(),
                selector: parsed,
            });
        }

        Ok(Self { rules: compiled })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub fields: HashMap<String, String>,
    pub element_count: usize,
}

impl Extraction {
    pub fn has_data(&self) -> bool {
        self.fields.values().any(|value| !value.is_empty())
    }

    /// `NoData` when every field came back empty.
    pub fn check_quality(&self) -> Result<(), ScrapeError> {
        if self.has_data() {
            Ok(())
        } else {
            Err(ScrapeError::NoData {
                element_count: self.element_count,
            })
        }
    }
}

/// Applies compiled field rules to a fetched document.
pub struct FieldExtractor {
    rules: CompiledRules,
}

impl FieldExtractor {
    pub fn new(rules: CompiledRules) -> Self {
        Self { rules }
    }

    pub fn extract(&self, html: &str, base_url: &Url) -> Extraction {
        let document = Html::parse_document(html);
        let element_count = document
            .root_element()
            .descendants()
            .filter(|node| node.value().is_element())
            .count();

        let mut fields = HashMap::with_capacity(self.rules.len());
        for rule in self.rules.iter() {
            let value = match document.select(&rule.selector).next() {
                Some(element) => Self::resolve(element, &rule.attribute, base_url),
                None => String::new(),
            };

            if value.is_empty() {
                log::warn!(
                    "No data found for field '{}' with selector '{}' on {}",
                    rule.name,
                    rule.selector_source,
                    base_url
                );
            }
            fields.insert(rule.name.clone(), value);
        }

        Extraction {
            fields,
            element_count,
        }
    }

    fn resolve(element: ElementRef<'_>, attribute: &AttributeMode, base_url: &Url) -> String {
        match attribute {
            AttributeMode::Text => {
                let text: String = element.text().collect();
                text.trim().to_string()
            }
            AttributeMode::Href => Self::absolute(element.value().attr("href"), base_url),
            AttributeMode::Src => Self::absolute(element.value().attr("src"), base_url),
            AttributeMode::Attr(name) => element.value().attr(name).unwrap_or_default().to_string(),
        }
    }

    fn absolute(value: Option<&str>, base_url: &Url) -> String {
        match value.map(str::trim) {
            Some(value) if !value.is_empty() => match base_url.join(value) {
                Ok(url) => url.to_string(),
                Err(e) => {
                    log::warn!("Cannot resolve '{}' against {}: {}", value, base_url, e);
                    String::new()
                }
            },
            _ => String::new(),
        }
    }
}
