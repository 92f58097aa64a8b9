use std::fmt::Write;

use exam_engine::Renderer;
use serde_json::Value;

/// Renders question fragments as plain terminal text.
pub struct TextRenderer;

fn strings(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn indices(value: &Value) -> Vec<u64> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(Value::as_u64).collect())
        .unwrap_or_default()
}

impl Renderer for TextRenderer {
    fn render(&self, name: &str, _locale: &str, params: &Value) -> exam_engine::Result<String> {
        let mut out = String::new();
        let text = params["text"].as_str().unwrap_or_default();
        let _ = writeln!(out, "{text}");

        match name {
            "choices" => {
                let selected = indices(&params["selected"]);
                let radio = params["type"] == "radio";
                for (idx, option) in strings(&params["options"]).iter().enumerate() {
                    let mark = if selected.contains(&(idx as u64)) { "x" } else { " " };
                    let (open, close) = if radio { ("(", ")") } else { ("[", "]") };
                    let _ = writeln!(out, "  {open}{mark}{close} {idx}: {option}");
                }
            }
            "order" => {
                let items = strings(&params["items"]);
                let _ = writeln!(out, "  selected:");
                for idx in indices(&params["selected"]) {
                    let item = items.get(idx as usize).map_or("?", String::as_str);
                    let _ = writeln!(out, "    {idx}: {item}");
                }
                let _ = writeln!(out, "  remaining:");
                for idx in indices(&params["remaining"]) {
                    let item = items.get(idx as usize).map_or("?", String::as_str);
                    let _ = writeln!(out, "    {idx}: {item}");
                }
            }
            "numeric" => {
                let answer = strings(&params["answer"]);
                let _ = writeln!(out, "  answer: {}", answer.join(", "));
            }
            _ => {
                let _ = writeln!(out, "{params:#}");
            }
        }
        if let Some(graded) = params.get("graded").and_then(Value::as_str) {
            let _ = writeln!(out, "  graded: {graded}");
        }
        Ok(out)
    }
}
