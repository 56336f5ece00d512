//! Field anonymization and synthetic row generation.
//!
//! Patterns: `#` is a random digit, `?` a random lowercase letter, `*` a
//! random alphanumeric character, `{field}` the value of another field of
//! the same row and `\` takes the next character literally. Anything else
//! is copied as is.

use std::collections::BTreeMap;

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

use crate::domain::{AnonymizationRule, Record, TestDataTemplate};

/// Applies anonymization rules using a random source.
#[derive(Debug)]
pub struct Anonymizer<R> {
    rng: R,
}

impl Anonymizer<StdRng> {
    /// Anonymizer seeded from the operating system.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic anonymizer.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl<R: Rng> Anonymizer<R> {
    /// Wraps an existing random source.
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Renders a pattern; `{field}` references are read from `row`, missing
    /// fields render empty. An unclosed `{` is kept literally.
    pub fn render(&mut self, pattern: &str, row: &Record) -> String {
        let mut out = String::with_capacity(pattern.len());
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            match c {
                '#' => out.push(char::from(b'0' + self.rng.gen_range(0..10u8))),
                '?' => out.push(char::from(b'a' + self.rng.gen_range(0..26u8))),
                '*' => out.push(char::from(self.rng.sample(Alphanumeric))),
                '\\' => {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                }
                '{' => {
                    let rest = chars.as_str();
                    match rest.find('}') {
                        Some(end) => {
                            let name = rest.get(..end).unwrap_or_default();
                            if let Some(value) = row.get(name) {
                                out.push_str(&field_text(value));
                            }
                            chars = rest.get(end + 1..).unwrap_or_default().chars();
                        }
                        None => out.push('{'),
                    }
                }
                other => out.push(other),
            }
        }
        out
    }

    /// Applies rules to the fields present in a row and returns how many
    /// fields were changed. References see the row as it was before any
    /// rule ran.
    pub fn anonymize_row(
        &mut self,
        rules: &BTreeMap<String, AnonymizationRule>,
        row: &mut Record,
    ) -> u64 {
        let original = row.clone();
        let mut changed = 0u64;
        for (field, rule) in rules {
            if !row.contains_key(field) {
                continue;
            }
            match rule {
                AnonymizationRule::Replace { value } => {
                    row.insert(field.clone(), value.clone());
                }
                AnonymizationRule::Randomize { pattern } => {
                    let rendered = self.render(pattern, &original);
                    row.insert(field.clone(), Value::String(rendered));
                }
                AnonymizationRule::Remove => {
                    row.remove(field);
                }
            }
            changed += 1;
        }
        changed
    }

    /// Applies rules to every row and returns the total number of changed
    /// fields.
    pub fn anonymize_rows(
        &mut self,
        rules: &BTreeMap<String, AnonymizationRule>,
        rows: &mut [Record],
    ) -> u64 {
        rows.iter_mut()
            .map(|row| self.anonymize_row(rules, row))
            .sum()
    }

    /// Generates `template.count` rows. Each row can reference `{index}`
    /// (1-based) and fields rendered before it in name order.
    pub fn generate_rows(&mut self, template: &TestDataTemplate) -> Vec<Record> {
        (1..=template.count)
            .map(|index| {
                let mut context = Record::new();
                context.insert("index".to_string(), Value::from(index));
                let mut row = Record::new();
                for (field, pattern) in &template.fields {
                    let value = self.render(pattern, &context);
                    context.insert(field.clone(), Value::String(value.clone()));
                    row.insert(field.clone(), Value::String(value));
                }
                row
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::service::fixtures::record;
    use serde_json::json;

    fn text(row: &Record, field: &str) -> String {
        match row.get(field) {
            Some(Value::String(s)) => s.clone(),
            other => panic!("{field} is not a string: {other:?}"),
        }
    }

    #[test]
    fn pattern_classes_render_matching_characters() {
        let mut anonymizer = Anonymizer::seeded(7);
        let row = Record::new();
        for _ in 0..20 {
            let out = anonymizer.render("05#########", &row);
            assert_eq!(out.len(), 11);
            assert!(out.starts_with("05"));
            assert!(out.chars().all(|c| c.is_ascii_digit()));

            let letters = anonymizer.render("????", &row);
            assert!(letters.chars().all(|c| c.is_ascii_lowercase()));
            let mixed = anonymizer.render("***", &row);
            assert!(mixed.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn references_and_escapes() {
        let mut anonymizer = Anonymizer::seeded(1);
        let row = record(json!({ "id": 42, "ad": "Ayse" }));
        assert_eq!(anonymizer.render("user{id}@example.com", &row), "user42@example.com");
        assert_eq!(anonymizer.render("{ad}-{missing}", &row), "Ayse-");
        assert_eq!(anonymizer.render(r"no\#\?\*", &row), "no#?*");
        assert_eq!(anonymizer.render("open{brace", &row), "open{brace");
    }

    #[test]
    fn seeded_output_is_reproducible() {
        let row = Record::new();
        let a = Anonymizer::seeded(99).render("###-???-***", &row);
        let b = Anonymizer::seeded(99).render("###-???-***", &row);
        assert_eq!(a, b);
    }

    #[test]
    fn rules_apply_only_to_present_fields() {
        let rules: BTreeMap<String, AnonymizationRule> = [
            (
                "tc_no".to_string(),
                AnonymizationRule::Randomize {
                    pattern: "###########".to_string(),
                },
            ),
            (
                "email".to_string(),
                AnonymizationRule::Randomize {
                    pattern: "user{id}@example.com".to_string(),
                },
            ),
            (
                "notlar".to_string(),
                AnonymizationRule::Replace {
                    value: json!("gizli"),
                },
            ),
            ("password_hash".to_string(), AnonymizationRule::Remove),
        ]
        .into_iter()
        .collect();
        let mut row = record(json!({
            "id": 7,
            "tc_no": "12345678901",
            "email": "ayse@okul.example",
            "password_hash": "x"
        }));

        let changed = Anonymizer::seeded(3).anonymize_row(&rules, &mut row);
        assert_eq!(changed, 3);
        assert_ne!(text(&row, "tc_no"), "12345678901");
        assert_eq!(text(&row, "email"), "user7@example.com");
        assert!(!row.contains_key("password_hash"));
        assert!(!row.contains_key("notlar"));
        assert_eq!(row.get("id"), Some(&json!(7)));
    }

    #[test]
    fn generated_rows_follow_the_template() {
        let template = TestDataTemplate {
            count: 3,
            fields: [
                ("ad".to_string(), "Test Isletme {index}".to_string()),
                ("telefon".to_string(), "0212#######".to_string()),
            ]
            .into_iter()
            .collect(),
        };
        let rows = Anonymizer::seeded(5).generate_rows(&template);
        assert_eq!(rows.len(), 3);
        let names: Vec<String> = rows.iter().map(|r| text(r, "ad")).collect();
        assert_eq!(names, vec!["Test Isletme 1", "Test Isletme 2", "Test Isletme 3"]);
        assert!(rows.iter().all(|r| text(r, "telefon").len() == 11));
    }
}
