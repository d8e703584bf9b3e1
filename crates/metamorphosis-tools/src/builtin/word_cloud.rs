use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::PathBuf;

use futures::future::BoxFuture;
use regex::Regex;
use tracing::debug;

use metamorphosis_core::config::WordCloudConfig;
use metamorphosis_core::error::{MetamorphosisError, Result};
use metamorphosis_core::traits::Tool;

use super::parse_text_input;

pub const NAME: &str = "word_cloud";

const WIDTH: f32 = 800.0;
const MIN_FONT: f32 = 12.0;
const MAX_FONT: f32 = 48.0;
const MARGIN: f32 = 10.0;

const STOPWORDS: &[&str] = &[
    "about", "after", "also", "and", "are", "been", "but", "by", "for", "from", "had", "has",
    "have", "her", "his", "into", "its", "more", "most", "not", "our", "out", "over", "she",
    "some", "such", "than", "that", "the", "their", "them", "then", "there", "these", "they",
    "this", "those", "through", "under", "very", "was", "were", "what", "when", "which",
    "while", "who", "will", "with", "would", "you", "your",
];

/// Renders review text as an SVG word cloud on local disk.
///
/// Returns the file path as a JSON string.
pub struct WordCloudTool {
    output_dir: PathBuf,
    max_words: usize,
    word_re: Regex,
}

impl WordCloudTool {
    /// Create the output directory and build the tool.
    pub fn from_config(config: &WordCloudConfig) -> Result<Self> {
        let output_dir = config.resolved_dir();
        std::fs::create_dir_all(&output_dir)?;
        let word_re = Regex::new(r"\p{L}[\p{L}\p{M}'-]+")
            .map_err(|e| MetamorphosisError::Config(e.to_string()))?;
        Ok(Self {
            output_dir,
            max_words: config.max_words.max(1),
            word_re,
        })
    }

    /// Most frequent words, highest first; ties broken alphabetically.
    fn top_words(&self, text: &str) -> Vec<(String, usize)> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for m in self.word_re.find_iter(text) {
            let word = m.as_str().trim_matches(|c: char| c == '\'' || c == '-').to_lowercase();
            if word.chars().count() < 3 || STOPWORDS.contains(&word.as_str()) {
                continue;
            }
            *counts.entry(word).or_default() += 1;
        }

        let mut words: Vec<(String, usize)> = counts.into_iter().collect();
        words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        words.truncate(self.max_words);
        words
    }
}

/// Lay words out left to right in rows, sized by frequency.
fn render_svg(words: &[(String, usize)]) -> String {
    let max = words.first().map(|w| w.1).unwrap_or(1) as f32;
    let min = words.last().map(|w| w.1).unwrap_or(1) as f32;
    let span = (max - min).max(1.0);

    let mut body = String::new();
    let mut x = MARGIN;
    let mut y = MARGIN;
    let mut row_height: f32 = 0.0;

    for (word, count) in words {
        let font = MIN_FONT + (*count as f32 - min) / span * (MAX_FONT - MIN_FONT);
        let advance = word.chars().count() as f32 * font * 0.6 + font * 0.5;
        if x + advance > WIDTH - MARGIN && x > MARGIN {
            x = MARGIN;
            y += row_height;
            row_height = 0.0;
        }
        row_height = row_height.max(font * 1.2);
        let _ = writeln!(
            body,
            r#"  <text x="{:.1}" y="{:.1}" font-size="{:.1}">{}</text>"#,
            x,
            y + font,
            font,
            xml_escape(word)
        );
        x += advance;
    }

    let height = y + row_height + MARGIN;
    format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{:.0}\" height=\"{:.0}\" \
font-family=\"sans-serif\">\n{}</svg>\n",
        WIDTH, height, body
    )
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

impl Tool for WordCloudTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Render a word cloud image of the review text and return its file path."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Review text to visualize" }
            },
            "required": ["text"]
        })
    }

    fn invoke(&self, payload: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let text = parse_text_input(payload)?;
            let words = self.top_words(&text);
            if words.is_empty() {
                return Err(MetamorphosisError::ToolValidation(
                    "text has no words to visualize".to_string(),
                ));
            }

            let path = self
                .output_dir
                .join(format!("wordcloud-{}.svg", uuid::Uuid::new_v4().simple()));
            tokio::fs::write(&path, render_svg(&words)).await?;
            debug!(path = %path.display(), words = words.len(), "Word cloud written");

            Ok(serde_json::Value::String(path.display().to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(dir: &std::path::Path, max_words: usize) -> WordCloudTool {
        WordCloudTool::from_config(&WordCloudConfig {
            output_dir: dir.display().to_string(),
            max_words,
        })
        .unwrap()
    }

    #[test]
    fn test_top_words_filters_and_ranks() {
        let dir = tempfile::tempdir().unwrap();
        let t = tool(dir.path(), 3);
        let words = t.top_words("Latency latency LATENCY. The team shipped the cache; cache wins.");
        assert_eq!(
            words,
            vec![
                ("latency".to_string(), 3),
                ("cache".to_string(), 2),
                ("shipped".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_top_words_keeps_non_ascii_words_whole() {
        let dir = tempfile::tempdir().unwrap();
        let t = tool(dir.path(), 10);

        let words = t.top_words("Développé la plateforme, réduit la latence de 50%.");
        let names: Vec<&str> = words.iter().map(|w| w.0.as_str()).collect();
        assert_eq!(names, vec!["développé", "latence", "plateforme", "réduit"]);

        let words = t.top_words("Развернул платформу и сократил задержку на 50%.");
        let names: Vec<&str> = words.iter().map(|w| w.0.as_str()).collect();
        assert_eq!(names, vec!["задержку", "платформу", "развернул", "сократил"]);
    }

    #[test]
    fn test_svg_escapes_text() {
        let svg = render_svg(&[("r&d".to_string(), 2), ("<ops>".to_string(), 1)]);
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("r&amp;d"));
        assert!(svg.contains("&lt;ops&gt;"));
        assert!(svg.contains(r#"font-size="48.0""#));
        assert!(svg.contains(r#"font-size="12.0""#));
    }

    #[tokio::test]
    async fn test_invoke_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let t = tool(dir.path(), 60);
        let out = t
            .invoke(serde_json::json!({"text": "Shipped X, cut latency 50%."}))
            .await
            .unwrap();

        let path = PathBuf::from(out.as_str().unwrap());
        assert!(path.starts_with(dir.path()));
        let svg = std::fs::read_to_string(path).unwrap();
        assert!(svg.contains("latency"));
        assert!(svg.contains("shipped"));
    }

    #[tokio::test]
    async fn test_invoke_rejects_text_without_words() {
        let dir = tempfile::tempdir().unwrap();
        let err = tool(dir.path(), 60)
            .invoke(serde_json::json!({"text": "1 2 3 %%"}))
            .await
            .unwrap_err();
        assert!(matches!(err, MetamorphosisError::ToolValidation(_)));
    }
}
