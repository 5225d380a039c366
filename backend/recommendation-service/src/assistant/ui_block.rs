//! Server-rendered, HTML-escaped fragments describing how the client should
//! render an `AssistantResponse` (spec §4.10). All data-derived text and
//! attribute values are escaped; no `<script>` tag can ever be emitted
//! (spec §8.6).

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::models::{ChartType, UiType};

pub fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());
static ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*([^*]+)\*").unwrap());
static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").unwrap());

/// Converts a minimal, safe markdown subset (**bold**, *italic*,
/// [text](url)) on top of already-escaped text. Operating on escaped text
/// means there is no way for the source text to smuggle raw HTML through.
fn render_inline_markdown(escaped: &str) -> String {
    let with_links = LINK.replace_all(escaped, |caps: &regex::Captures| {
        let text = &caps[1];
        let url = &caps[2];
        if url.starts_with("http://") || url.starts_with("https://") || url.starts_with('/') {
            format!("<a href=\"{}\">{}</a>", escape_html(url), text)
        } else {
            text.to_string()
        }
    });
    let with_bold = BOLD.replace_all(&with_links, "<strong>$1</strong>");
    let with_italic = ITALIC.replace_all(&with_bold, "<em>$1</em>");
    with_italic.to_string()
}

fn prettify_key(key: &str) -> String {
    key.split(['_', '-'])
        .filter(|s| !s.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => escape_html(s),
        Value::Null => String::new(),
        other => escape_html(&other.to_string()),
    }
}

pub struct UiBlockBuilder;

impl UiBlockBuilder {
    pub fn render(
        ui_type: UiType,
        answer: &str,
        data: &Value,
        chart_type: Option<ChartType>,
    ) -> String {
        match ui_type {
            UiType::Text => Self::render_text(answer),
            UiType::Table => Self::render_table(data),
            UiType::CardGrid => Self::render_card_grid(data),
            UiType::Calculator => Self::render_calculator(data),
            UiType::Chart => Self::render_chart(data, chart_type),
        }
    }

    fn render_text(answer: &str) -> String {
        format!("<p>{}</p>", render_inline_markdown(&escape_html(answer)))
    }

    fn rows_of(data: &Value) -> Vec<&serde_json::Map<String, Value>> {
        match data {
            Value::Array(items) => items.iter().filter_map(|v| v.as_object()).collect(),
            Value::Object(obj) => vec![obj],
            _ => Vec::new(),
        }
    }

    fn render_table(data: &Value) -> String {
        let rows = Self::rows_of(data);
        let Some(first) = rows.first() else {
            return "<table></table>".to_string();
        };
        let headers: Vec<&String> = first.keys().collect();

        let mut html = String::from("<table><thead><tr>");
        for h in &headers {
            html.push_str(&format!("<th>{}</th>", escape_html(h)));
        }
        html.push_str("</tr></thead><tbody>");
        for row in &rows {
            html.push_str("<tr>");
            for h in &headers {
                let cell = row.get(*h).map(value_to_display).unwrap_or_default();
                html.push_str(&format!("<td>{cell}</td>"));
            }
            html.push_str("</tr>");
        }
        html.push_str("</tbody></table>");
        html
    }

    fn render_card_grid(data: &Value) -> String {
        let rows = Self::rows_of(data);
        let mut html = String::from("<div class=\"card-grid\">");
        for row in rows {
            html.push_str("<div class=\"card\">");
            for (key, value) in row.iter() {
                html.push_str(&format!(
                    "<div class=\"card-field\"><span class=\"card-key\">{}</span><span class=\"card-value\">{}</span></div>",
                    escape_html(&prettify_key(key)),
                    value_to_display(value)
                ));
            }
            html.push_str("</div>");
        }
        html.push_str("</div>");
        html
    }

    fn render_calculator(data: &Value) -> String {
        let obj = data.as_object();
        let mut html = String::from("<div class=\"card calculator\">");
        if let Some(obj) = obj {
            for (key, value) in obj.iter() {
                html.push_str(&format!(
                    "<div class=\"calc-row\"><span class=\"calc-key\">{}</span><span class=\"calc-value\">{}</span></div>",
                    escape_html(&prettify_key(key)),
                    value_to_display(value)
                ));
            }
        }
        html.push_str("</div>");
        html
    }

    fn render_chart(data: &Value, chart_type: Option<ChartType>) -> String {
        let chart_type_str = match chart_type {
            Some(ChartType::Bar) => "bar",
            Some(ChartType::Line) => "line",
            Some(ChartType::Pie) => "pie",
            None => "bar",
        };
        let serialized = serde_json::to_string(data).unwrap_or_else(|_| "null".to_string());
        format!(
            "<div class=\"chart\" data-chart-type=\"{}\" data-chart=\"{}\"></div>",
            escape_html(chart_type_str),
            escape_html(&serialized)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn escapes_script_tags() {
        let rendered = UiBlockBuilder::render_text("<script>alert(1)</script>");
        assert!(!rendered.contains("<script>"));
        assert!(rendered.contains("&lt;script&gt;"));
    }

    #[test]
    fn renders_bold_and_italic() {
        let rendered = UiBlockBuilder::render_text("a **bold** and *italic* word");
        assert!(rendered.contains("<strong>bold</strong>"));
        assert!(rendered.contains("<em>italic</em>"));
    }

    #[test]
    fn markdown_link_only_honored_for_safe_schemes() {
        let rendered = UiBlockBuilder::render_text("[click](javascript:alert(1))");
        assert!(!rendered.contains("<a href"));
    }

    #[test]
    fn table_headers_come_from_first_row() {
        let data = json!([{"make": "Toyota", "price": 20000}]);
        let html = UiBlockBuilder::render_table(&data);
        assert!(html.contains("<th>make</th>"));
        assert!(html.contains("Toyota"));
    }

    #[test]
    fn calculator_prettifies_keys() {
        let data = json!({"monthly_payment": 412.5});
        let html = UiBlockBuilder::render_calculator(&data);
        assert!(html.contains("Monthly Payment"));
    }

    #[test]
    fn chart_requires_matching_chart_type() {
        let data = json!({"labels": ["a", "b"], "values": [1, 2]});
        let html = UiBlockBuilder::render_chart(&data, Some(ChartType::Pie));
        assert!(html.contains("data-chart-type=\"pie\""));
    }
}
