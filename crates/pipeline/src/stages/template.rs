//! `{{variable}}` substitution over text fragments.

use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use arena_domain::element::{ElementPayload, StreamElement};

use crate::{forward, next_element, Stage};

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").expect("valid pattern"))
}

/// Replace `{{variable}}` occurrences with values from the map. Unknown
/// variables are left intact.
pub fn substitute(text: &str, variables: &HashMap<String, String>) -> String {
    variable_pattern()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            variables
                .get(key)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

pub struct Template {
    variables: HashMap<String, String>,
}

impl Template {
    pub fn new(variables: HashMap<String, String>) -> Self {
        Self { variables }
    }
}

#[async_trait]
impl Stage for Template {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn run(
        self: Box<Self>,
        cancel: CancellationToken,
        mut input: mpsc::Receiver<StreamElement>,
        output: mpsc::Sender<StreamElement>,
    ) {
        while let Some(mut element) = next_element(&mut input, &cancel).await {
            if let ElementPayload::Text { text } = &element.payload {
                let substituted = substitute(text, &self.variables);
                if substituted != *text {
                    element.payload = ElementPayload::Text { text: substituted };
                }
            }
            if !forward(&output, &cancel, element).await {
                return;
            }
        }
    }
}
