//! Variant registry: per-model bundles of request/response transformations
//!
//! A variant is selected by an explicit `@label` suffix on the client-supplied
//! model identifier, or failing that by the first configured regex that
//! matches the identifier as-is. Identifiers nothing claims fall back to a
//! passthrough variant, so an unknown model is proxied untouched rather than
//! rejected.

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{ConfigError, LogitBiasEntry, VariantConfig};
use crate::strip::ThinkTags;

/// Think-tag behavior resolved for a variant
#[derive(Debug, Clone)]
pub struct Thinking {
    pub strip: bool,
    pub tags: ThinkTags,
}

/// A named, immutable bundle of request/response transformations
#[derive(Debug)]
pub struct Variant {
    pub name: String,
    pub label: String,
    pub inject_at_end: String,
    pub weak_defaults: HashMap<String, Value>,
    pub weak_logit_bias: Vec<LogitBiasEntry>,
    pub thinking: Thinking,
    pub system_prompt_file: Option<PathBuf>,
    model_regex: Option<Regex>,
}

impl Variant {
    fn from_config(cfg: &VariantConfig, default_tags: &ThinkTags) -> Result<Self, ConfigError> {
        let model_regex = if cfg.model_regex.is_empty() {
            None
        } else {
            let regex = Regex::new(&cfg.model_regex).map_err(|e| {
                ConfigError::Validation(format!(
                    "variant '{}': invalid model_regex '{}': {}",
                    cfg.name, cfg.model_regex, e
                ))
            })?;
            Some(regex)
        };

        let tags = ThinkTags::new(
            cfg.thinking
                .start_tag
                .clone()
                .unwrap_or_else(|| default_tags.start.clone()),
            cfg.thinking
                .end_tag
                .clone()
                .unwrap_or_else(|| default_tags.end.clone()),
        );
        if cfg.thinking.strip && (tags.start.is_empty() || tags.end.is_empty()) {
            return Err(ConfigError::Validation(format!(
                "variant '{}': thinking.strip requires non-empty start and end tags",
                cfg.name
            )));
        }

        Ok(Self {
            name: cfg.name.clone(),
            label: cfg.label.clone(),
            inject_at_end: cfg.inject_at_end.clone(),
            weak_defaults: cfg.weak_defaults.clone(),
            weak_logit_bias: cfg.weak_logit_bias.clone(),
            thinking: Thinking {
                strip: cfg.thinking.strip,
                tags,
            },
            system_prompt_file: cfg.system_prompt_file.clone(),
            model_regex,
        })
    }

    /// Fallback for identifiers no configured variant claims: no stripping,
    /// no injections, model forwarded unchanged.
    fn passthrough(name: &str, tags: ThinkTags) -> Self {
        Self {
            name: name.to_string(),
            label: String::new(),
            inject_at_end: String::new(),
            weak_defaults: HashMap::new(),
            weak_logit_bias: Vec::new(),
            thinking: Thinking { strip: false, tags },
            system_prompt_file: None,
            model_regex: None,
        }
    }

    fn matches(&self, model: &str) -> bool {
        self.model_regex
            .as_ref()
            .map(|re| re.is_match(model))
            .unwrap_or(false)
    }
}

/// Per-request resolution result: the upstream model name (any `@label`
/// suffix removed) plus the variant governing this request. Created once per
/// request and read-only afterward.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub upstream_model: String,
    pub variant: Arc<Variant>,
}

/// Ordered variant set with deterministic resolution
pub struct VariantRegistry {
    variants: Vec<Arc<Variant>>,
    default_tags: ThinkTags,
}

impl VariantRegistry {
    /// Compile the configured variants. Regexes are compiled here, once, so a
    /// bad pattern is a startup error rather than a per-request one.
    pub fn from_config(
        configs: &[VariantConfig],
        default_tags: &ThinkTags,
    ) -> Result<Self, ConfigError> {
        let variants = configs
            .iter()
            .map(|cfg| Variant::from_config(cfg, default_tags).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            variants,
            default_tags: default_tags.clone(),
        })
    }

    pub fn variants(&self) -> &[Arc<Variant>] {
        &self.variants
    }

    /// Resolve a client-supplied model identifier, possibly of the form
    /// `"<model>@<label>"`. A label match wins over any regex; regexes are
    /// tried in configured order against the full identifier. Unresolved
    /// identifiers get a passthrough variant — never an error.
    pub fn resolve(&self, model_identifier: &str) -> ResolvedModel {
        if let Some((base, label)) = model_identifier.rsplit_once('@') {
            if let Some(variant) = self
                .variants
                .iter()
                .find(|v| !v.label.is_empty() && v.label == label)
            {
                return ResolvedModel {
                    upstream_model: base.to_string(),
                    variant: Arc::clone(variant),
                };
            }
        }

        if let Some(variant) = self.variants.iter().find(|v| v.matches(model_identifier)) {
            return ResolvedModel {
                upstream_model: model_identifier.to_string(),
                variant: Arc::clone(variant),
            };
        }

        tracing::debug!(model = model_identifier, "No variant matched, using passthrough");
        ResolvedModel {
            upstream_model: model_identifier.to_string(),
            variant: Arc::new(Variant::passthrough(
                model_identifier,
                self.default_tags.clone(),
            )),
        }
    }
}
