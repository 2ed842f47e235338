use crate::extract::rule::FieldRule;
use crate::extract::schema::{default_schema, Format, StageSchema};
use crate::extract::{ExtractError, Extraction, Extractor, Tag};
use crate::task::Stage;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// A stage schema with its rules compiled
#[derive(Debug)]
struct CompiledSchema {
    format: Format,
    embedded_html: Option<String>,
    links: Option<FieldRule>,
    next: Option<FieldRule>,
    fields: Vec<(String, FieldRule)>,
    list_fields: Vec<(String, FieldRule)>,
    json_fields: Vec<(String, String)>,
    items: Option<Selector>,
    item_fields: Vec<(String, FieldRule)>,
    tags: Option<String>,
    tag_key: String,
    tag_count_key: String,
    required: Vec<String>,
}

fn compile_rules(
    rules: &BTreeMap<String, String>,
    allow_self: bool,
) -> Result<Vec<(String, FieldRule)>, ExtractError> {
    rules
        .iter()
        .map(|(field, rule)| {
            let compiled = FieldRule::parse(rule)?;
            if compiled.targets_self() && !allow_self {
                return Err(ExtractError::Selector(format!(
                    "'{}' for field '{}' needs a selector",
                    rule, field
                )));
            }
            Ok((field.clone(), compiled))
        })
        .collect()
}

fn check_pointer(pointer: &str) -> Result<String, ExtractError> {
    if pointer.is_empty() || pointer.starts_with('/') {
        Ok(pointer.to_string())
    } else {
        Err(ExtractError::Pointer(pointer.to_string()))
    }
}

impl CompiledSchema {
    fn compile(schema: &StageSchema) -> Result<Self, ExtractError> {
        let links = schema.links.as_deref().map(FieldRule::parse).transpose()?;
        let next = schema.next.as_deref().map(FieldRule::parse).transpose()?;
        let items = schema
            .items
            .as_deref()
            .map(|s| {
                Selector::parse(s).map_err(|e| ExtractError::Selector(format!("'{}': {:?}", s, e)))
            })
            .transpose()?;

        Ok(Self {
            format: schema.format,
            embedded_html: schema.embedded_html.as_deref().map(check_pointer).transpose()?,
            links,
            next,
            fields: compile_rules(&schema.fields, false)?,
            list_fields: compile_rules(&schema.list_fields, false)?,
            json_fields: schema
                .json_fields
                .iter()
                .map(|(field, pointer)| Ok((field.clone(), check_pointer(pointer)?)))
                .collect::<Result<_, ExtractError>>()?,
            items,
            item_fields: compile_rules(&schema.item_fields, true)?,
            tags: schema.tags.as_deref().map(check_pointer).transpose()?,
            tag_key: schema.tag_key.clone().unwrap_or_else(|| "name".to_string()),
            tag_count_key: schema
                .tag_count_key
                .clone()
                .unwrap_or_else(|| "count".to_string()),
            required: schema.required.clone(),
        })
    }

    fn extract_markup(&self, root: ElementRef<'_>, out: &mut Extraction) {
        if let Some(rule) = &self.links {
            out.links = rule.strings(root);
        }
        if let Some(rule) = &self.next {
            out.next = rule.strings(root).into_iter().next();
        }
        for (field, rule) in &self.fields {
            out.record.insert(field.clone(), rule.first(root));
        }
        for (field, rule) in &self.list_fields {
            out.record.insert(field.clone(), Value::Array(rule.all(root)));
        }
        if let Some(items) = &self.items {
            out.items = root
                .select(items)
                .map(|item| {
                    let object: Map<String, Value> = self
                        .item_fields
                        .iter()
                        .map(|(field, rule)| (field.clone(), rule.first(item)))
                        .collect();
                    Value::Object(object)
                })
                .collect();
        }
    }

    fn extract_tags(&self, json: &Value) -> Result<Vec<Tag>, ExtractError> {
        let Some(pointer) = &self.tags else {
            return Ok(Vec::new());
        };

        let entries = match json.pointer(pointer) {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(entries)) => entries,
            Some(_) => return Err(ExtractError::Pointer(pointer.clone())),
        };

        Ok(entries
            .iter()
            .filter_map(|entry| {
                let name = entry.get(&self.tag_key)?.as_str()?.to_string();
                let count = match entry.get(&self.tag_count_key) {
                    Some(Value::Number(n)) => n.as_i64().unwrap_or_default(),
                    Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
                    _ => 0,
                };
                Some(Tag { name, count })
            })
            .collect())
    }

    fn check_required(&self, out: &Extraction) -> Result<(), ExtractError> {
        for field in &self.required {
            let present = match out.record.get(field) {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.is_empty(),
                Some(Value::Array(values)) => !values.is_empty(),
                Some(_) => true,
            };
            if !present {
                return Err(ExtractError::MissingField(field.clone()));
            }
        }
        Ok(())
    }
}

/// CSS-selector and JSON-pointer driven extractor
///
/// All schemas are compiled up front, so an invalid selector in the
/// configuration is reported at startup rather than on the first page.
#[derive(Debug)]
pub struct SelectorExtractor {
    schemas: HashMap<Stage, CompiledSchema>,
}

impl SelectorExtractor {
    /// Builds an extractor from per-stage overrides; other stages use the
    /// built-in schemas
    pub fn new(overrides: &BTreeMap<Stage, StageSchema>) -> Result<Self, ExtractError> {
        let schemas = Stage::all()
            .into_iter()
            .map(|stage| {
                let schema = overrides
                    .get(&stage)
                    .cloned()
                    .unwrap_or_else(|| default_schema(stage));
                Ok((stage, CompiledSchema::compile(&schema)?))
            })
            .collect::<Result<HashMap<_, _>, ExtractError>>()?;

        Ok(Self { schemas })
    }

    /// Extractor using only the built-in schemas
    pub fn with_defaults() -> Result<Self, ExtractError> {
        Self::new(&BTreeMap::new())
    }
}

impl Extractor for SelectorExtractor {
    fn extract(&self, stage: Stage, body: &str) -> Result<Extraction, ExtractError> {
        let schema = self
            .schemas
            .get(&stage)
            .ok_or_else(|| ExtractError::Selector(format!("no schema for stage {}", stage)))?;
        let mut out = Extraction::default();

        match schema.format {
            Format::Html => {
                let document = Html::parse_document(body);
                schema.extract_markup(document.root_element(), &mut out);
            }
            Format::Json => {
                let json: Value = serde_json::from_str(body)?;

                for (field, pointer) in &schema.json_fields {
                    let value = json.pointer(pointer).cloned().unwrap_or(Value::Null);
                    out.record.insert(field.clone(), value);
                }
                out.tags = schema.extract_tags(&json)?;

                if let Some(pointer) = &schema.embedded_html {
                    let html = json
                        .pointer(pointer)
                        .and_then(Value::as_str)
                        .ok_or_else(|| ExtractError::Embedded(pointer.clone()))?;
                    let fragment = Html::parse_fragment(html);
                    schema.extract_markup(fragment.root_element(), &mut out);
                }
            }
        }

        schema.check_required(&out)?;
        Ok(out)
    }
}
