//! minijinja-backed exporters

use super::{ExportContext, MetadataExporter};
use crate::error::Result;
use minijinja::value::Value;
use minijinja::{Environment, Error, State, context};

const TEMPLATE_NAME: &str = "record";

/// Renders a record through a configured template.
///
/// Templates see `record` (merged draft values), `recid` and `collection`,
/// plus the `xml_escape` and `json` filters.
pub struct TemplateExporter {
    format: String,
    env: Environment<'static>,
}

impl TemplateExporter {
    /// Compile `source`; syntax errors surface here rather than at export time
    pub fn new(format: &str, source: &str) -> Result<Self> {
        let mut env = Environment::new();
        env.add_filter("xml_escape", filter_xml_escape);
        env.add_filter("json", filter_json);
        env.add_template_owned(TEMPLATE_NAME, source.to_string())?;

        Ok(Self {
            format: format.to_string(),
            env,
        })
    }
}

impl MetadataExporter for TemplateExporter {
    fn format(&self) -> &str {
        &self.format
    }

    fn export(&self, ctx: &ExportContext<'_>) -> Result<String> {
        let template = self.env.get_template(TEMPLATE_NAME)?;
        let rendered = template.render(context! {
            record => ctx.record,
            recid => ctx.recid,
            collection => ctx.collection,
        })?;
        Ok(rendered)
    }
}

/// Escape the five XML special characters
fn filter_xml_escape(_state: &State, value: Value) -> std::result::Result<Value, Error> {
    let s = value.to_string();
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    Ok(Value::from(escaped))
}

fn filter_json(_state: &State, value: Value) -> std::result::Result<Value, Error> {
    let json = serde_json::to_string(&value).map_err(|e| {
        Error::new(
            minijinja::ErrorKind::InvalidOperation,
            format!("JSON serialization failed: {}", e),
        )
    })?;
    Ok(Value::from(json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MARCXML: &str = r#"<record>
<controlfield tag="001">{{ recid }}</controlfield>
<datafield tag="245"><subfield code="a">{{ record.title | xml_escape }}</subfield></datafield>
{% for kw in record.keywords %}<datafield tag="653"><subfield code="a">{{ kw }}</subfield></datafield>
{% endfor %}<datafield tag="980"><subfield code="a">{{ collection }}</subfield></datafield>
</record>"#;

    #[test]
    fn test_template_export() {
        let exporter = TemplateExporter::new("marcxml", MARCXML).unwrap();
        assert_eq!(exporter.format(), "marcxml");

        let record = json!({"title": "Drafts & <Resumes>", "keywords": ["a", "b"]})
            .as_object()
            .cloned()
            .unwrap();
        let out = exporter
            .export(&ExportContext {
                record: &record,
                recid: 7,
                collection: "ARTICLES",
            })
            .unwrap();

        assert!(out.contains(r#"<controlfield tag="001">7</controlfield>"#));
        assert!(out.contains("Drafts &amp; &lt;Resumes&gt;"));
        assert_eq!(out.matches("tag=\"653\"").count(), 2);
        assert!(out.contains("<subfield code=\"a\">ARTICLES</subfield>"));
    }

    #[test]
    fn test_json_filter() {
        let exporter = TemplateExporter::new("dump", "{{ record | json }}").unwrap();
        let record = json!({"n": 1}).as_object().cloned().unwrap();
        let out = exporter
            .export(&ExportContext {
                record: &record,
                recid: 1,
                collection: "C",
            })
            .unwrap();
        assert_eq!(out, r#"{"n":1}"#);
    }
}
